use std::fmt;

use crate::node::NodeAddr;
use crate::transport::TransportError;

/// Everything that can keep a query from producing a reply.
///
/// Mirrors the shape of the server-side conditions a cluster client has to
/// react to (redirection, transient unavailability, transport failure) plus
/// the purely local ones (no routable key, nothing to send, unknown
/// cluster). `Moved`/`Ask` only ever escape to a caller when the indicated
/// node could not be reached; in the normal case the engine resolves them
/// internally and retries.
#[derive(Debug)]
pub enum ClusterError {
    /// The command carried no key the parser could route on (e.g. a
    /// multi-key command whose keys hash to different slots isn't rejected
    /// here, see `Non-goals`; this is for commands with literally no key).
    InvalidClusterKey,
    /// `qp` was called with an empty pipeline.
    EmptyPipeline,
    /// The slot map has no entry for this slot and the node it last pointed
    /// to could not be reached.
    NoConnection,
    /// The server said this slot moved permanently and the indicated node
    /// could not be reached either.
    Moved { slot: u16, node: NodeAddr },
    /// The server said this key is migrating and the indicated node could
    /// not be reached either.
    Ask { slot: u16, node: NodeAddr },
    /// A server error that isn't a redirection (`TRYAGAIN`, `CLUSTERDOWN`,
    /// an application error raised mid-migration, or anything else the
    /// classifier doesn't recognize as routing information).
    TransientServerError(String),
    /// The connection attempt or the send itself failed below the protocol
    /// level.
    Transport(TransportError),
    /// The request hit its retry ceiling. Carries the error from the final
    /// attempt.
    TtlExhausted(Box<ClusterError>),
    /// `q`/`qp` named a cluster no `start` call has registered.
    UnknownCluster(String),
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterError::InvalidClusterKey => write!(f, "command has no routable key"),
            ClusterError::EmptyPipeline => write!(f, "pipeline is empty"),
            ClusterError::NoConnection => write!(f, "no connection available for slot"),
            ClusterError::Moved { slot, node } => {
                write!(f, "MOVED {} {} unreachable", slot, node)
            }
            ClusterError::Ask { slot, node } => write!(f, "ASK {} {} unreachable", slot, node),
            ClusterError::TransientServerError(msg) => write!(f, "{}", msg),
            ClusterError::Transport(e) => write!(f, "{}", e),
            ClusterError::TtlExhausted(last) => {
                write!(f, "retry ttl exhausted, last error: {}", last)
            }
            ClusterError::UnknownCluster(name) => write!(f, "unknown cluster: {}", name),
        }
    }
}

impl std::error::Error for ClusterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClusterError::Transport(e) => Some(e),
            ClusterError::TtlExhausted(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<TransportError> for ClusterError {
    fn from(e: TransportError) -> Self {
        ClusterError::Transport(e)
    }
}
