use std::fmt;
use std::sync::Arc;

/// A `(host, port)` pair identifying one cluster node.
///
/// Cheaply cloneable: the host is interned behind an `Arc<str>` since the same
/// few node addresses are copied into every slot-map snapshot and connection
/// table entry.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct NodeAddr {
    pub host: Arc<str>,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<Arc<str>>, port: u16) -> Self {
        NodeAddr {
            host: host.into(),
            port,
        }
    }

    /// Parses a `host:port` string as returned by `MOVED`/`ASK` replies.
    ///
    /// Splits on the *last* colon so IPv6 literals (`dead::beef:30001`) and
    /// bracketed IPv6 literals (`[fe80::1]:30001`) both parse correctly.
    pub fn parse(s: &str) -> Option<NodeAddr> {
        let (host, port) = s.rsplit_once(':')?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return None;
        }
        let port: u16 = port.parse().ok()?;
        Some(NodeAddr::new(host.to_string(), port))
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
