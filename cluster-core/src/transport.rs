use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::node::NodeAddr;

/// A command: a sequence of byte-string arguments, the first of which is the
/// command name. Parsed only far enough to find the routing key; the wire
/// protocol itself is the transport's concern, not this crate's.
pub type Command = Vec<Vec<u8>>;

/// An opaque successful reply. Encoding/decoding RESP is outside this
/// crate's scope, so replies pass through as the bytes the transport handed
/// back.
pub type Reply = Vec<u8>;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One sub-command's outcome as reported by the server: either the reply
/// bytes, or an error line (which may be a plain application error, or a
/// `MOVED`/`ASK` redirection the classifier will parse).
#[derive(Clone, Debug)]
pub enum CommandOutcome {
    Ok(Reply),
    ServerError(String),
}

/// A failure below the protocol level: the socket dropped, DNS failed to
/// resolve, the connect attempt timed out. Distinguished from
/// `CommandOutcome::ServerError` because the cluster never redirects on
/// these, it only retries or tears the connection down.
#[derive(Clone, Debug)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: {}", self.0)
    }
}

impl std::error::Error for TransportError {}

/// The narrow interface this crate consumes to actually move bytes. A real
/// implementation owns RESP encoding, socket I/O and reconnection; this
/// crate only ever asks it to open a connection and send commands over one.
pub trait Transport: Send + Sync + 'static {
    /// A live connection to one node. Opaque to this crate beyond being
    /// cloneable and comparable for debugging/logging purposes.
    type Handle: Clone + Send + Sync + fmt::Debug + 'static;

    fn open<'a>(&'a self, node: &'a NodeAddr) -> BoxFuture<'a, Result<Self::Handle, TransportError>>;

    fn send_one<'a>(
        &'a self,
        conn: &'a Self::Handle,
        command: &'a Command,
    ) -> BoxFuture<'a, Result<CommandOutcome, TransportError>>;

    fn send_pipeline<'a>(
        &'a self,
        conn: &'a Self::Handle,
        commands: &'a [Command],
    ) -> BoxFuture<'a, Result<Vec<CommandOutcome>, TransportError>>;
}

/// One contiguous range of hash slots and the node currently serving it as
/// primary, as reported by `CLUSTER SLOTS`/`CLUSTER SHARDS`.
#[derive(Clone, Debug)]
pub struct SlotRange {
    pub lo: u16,
    pub hi: u16,
    pub primary: NodeAddr,
}

/// The topology-discovery collaborator: issues and parses whatever command
/// the deployment uses to learn slot ownership. Kept separate from
/// `Transport` because discovery is a single well-known query, not general
/// command dispatch, and deployments occasionally want to stub it
/// independently (e.g. a fixed topology in tests).
pub trait TopologyDiscovery<T: Transport>: Send + Sync + 'static {
    fn discover<'a>(&'a self, conn: &'a T::Handle) -> BoxFuture<'a, Result<Vec<SlotRange>, TransportError>>;
}
