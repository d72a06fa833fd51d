use crate::error::ClusterError;
use crate::transport::Command;

/// Mutable state the engine threads through the retry loop for one
/// sub-command. Every call, single or pipelined, is reduced to one or more
/// of these: a single `q` call is simply a one-element pipeline internally,
/// so the routing and redirection logic only needs to exist once.
pub(crate) struct SubQuery<H> {
    /// Position in the caller's original pipeline; carried through every
    /// retry so results can be reassembled in order regardless of how many
    /// of them redirected independently.
    pub index: usize,
    pub original: Command,
    pub slot: u16,
    pub connection: Option<H>,
    pub version_observed: u64,
    pub retries: u32,
    /// Set once an `ASK` redirect is being chased: the next send prefixes
    /// `original` with `ASKING` on the same connection, and the synthetic
    /// `ASKING` reply is stripped before the real one is classified.
    pub asking: bool,
    pub last_error: Option<ClusterError>,
}

impl<H> SubQuery<H> {
    pub fn new(index: usize, original: Command, slot: u16) -> Self {
        SubQuery {
            index,
            original,
            slot,
            connection: None,
            version_observed: 0,
            retries: 0,
            asking: false,
            last_error: None,
        }
    }

    /// The command(s) to actually send on this attempt: the bare command,
    /// or `[ASKING, original]` while chasing an `ASK` redirect.
    pub fn to_send(&self) -> Vec<Command> {
        if self.asking {
            vec![vec![b"ASKING".to_vec()], self.original.clone()]
        } else {
            vec![self.original.clone()]
        }
    }

    pub fn fail(self, ttl_exhausted: ClusterError) -> ClusterError {
        match self.last_error {
            Some(e) => ClusterError::TtlExhausted(Box::new(e)),
            None => ttl_exhausted,
        }
    }
}
