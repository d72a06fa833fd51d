//! Slot routing and `MOVED`/`ASK` redirection for a Redis Cluster client.
//!
//! This crate is the core query-dispatch engine: given a command (or a
//! pipeline of them), it resolves which node owns the relevant slot, sends
//! the command through a caller-supplied [`Transport`], and follows
//! redirections and topology changes until the call succeeds or its retry
//! budget runs out. It does not speak RESP, open sockets, or discover
//! topology on its own: those are the [`Transport`] and [`TopologyDiscovery`]
//! collaborators a deployment plugs in.
//!
//! ```ignore
//! let registry: Registry<MyTransport, MyTopology> = Registry::new();
//! registry
//!     .start("orders", seeds, my_transport, my_topology, RetryParams::default(), TopologyCheckParams::default())
//!     .await?;
//! let reply = registry.q("orders", vec![b"GET".to_vec(), b"foo".to_vec()]).await?;
//! ```

mod config;
mod engine;
mod error;
mod node;
mod parser;
mod query;
mod registry;
mod state;
mod transport;

pub use config::{RetryParams, TopologyCheckParams};
pub use error::ClusterError;
pub use node::NodeAddr;
pub use parser::{key_of, slot_of, SLOT_COUNT};
pub use registry::Registry;
pub use state::ClusterState;
pub use transport::{Command, CommandOutcome, Reply, SlotRange, TopologyDiscovery, Transport, TransportError};
