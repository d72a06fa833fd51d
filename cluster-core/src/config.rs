use std::time::Duration;

/// Bounds on how hard the engine will chase a single query before giving up.
///
/// The teacher's own `RetryParams` backs its delay off exponentially
/// (`base * factor.powi(retries)`, capped and jittered). Here the delay is
/// kept fixed: redirection loops in a cluster client are dominated by
/// topology convergence time, not by congestion, so a constant delay between
/// attempts is simpler to reason about and just as effective. See
/// `DESIGN.md` for the longer version of this tradeoff.
#[derive(Clone, Copy, Debug)]
pub struct RetryParams {
    /// Maximum number of attempts (including the first) before a query gives
    /// up and returns `ClusterError::TtlExhausted`.
    pub request_ttl: u32,
    /// Delay awaited before every retry after the first attempt.
    pub retry_delay: Duration,
}

impl Default for RetryParams {
    fn default() -> Self {
        RetryParams {
            request_ttl: 16,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Cadence for the background topology check that runs even when nothing is
/// redirecting, so a cluster that reshards quietly (no MOVED replies because
/// clients had already stopped sending to the moved slots) still converges.
#[derive(Clone, Copy, Debug)]
pub struct TopologyCheckParams {
    pub interval: Duration,
    pub jitter: Duration,
}

impl Default for TopologyCheckParams {
    fn default() -> Self {
        TopologyCheckParams {
            interval: Duration::from_secs(30),
            jitter: Duration::from_secs(5),
        }
    }
}
