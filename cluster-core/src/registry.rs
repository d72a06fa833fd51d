//! Process-wide lookup of cluster state by name.
//!
//! The source this crate is modeled on addresses each cluster as a named,
//! globally-registered process and calls into it by name from anywhere.
//! Rust has no equivalent ambient registry, so this is rendered as an
//! explicit value the application constructs once (typically held in an
//! `Arc` alongside its other shared state) and passes to whatever needs to
//! issue queries; `q`/`qp` keep the name-based calling convention.

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::config::{RetryParams, TopologyCheckParams};
use crate::engine;
use crate::error::ClusterError;
use crate::node::NodeAddr;
use crate::state::ClusterState;
use crate::transport::{Command, Reply, Transport, TopologyDiscovery};

pub struct Registry<T: Transport, D: TopologyDiscovery<T>> {
    clusters: DashMap<String, std::sync::Arc<OnceCell<ClusterState<T, D>>>>,
}

impl<T: Transport, D: TopologyDiscovery<T>> Default for Registry<T, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport, D: TopologyDiscovery<T>> Registry<T, D> {
    pub fn new() -> Self {
        Registry {
            clusters: DashMap::new(),
        }
    }

    /// Registers a new cluster under `name` and bootstraps its slot map.
    ///
    /// If `name` is already registered, returns the existing `ClusterState`
    /// without touching `transport`/`topology`/`seeds` (whichever caller got
    /// there first wins); this guarantees concurrent first-use from several
    /// callers produces exactly one `ClusterState`, not a race of several.
    pub async fn start(
        &self,
        name: impl Into<String>,
        seeds: Vec<NodeAddr>,
        transport: T,
        topology: D,
        retry_params: RetryParams,
        topology_check: TopologyCheckParams,
    ) -> Result<ClusterState<T, D>, ClusterError> {
        let name = name.into();
        let cell = self
            .clusters
            .entry(name.clone())
            .or_insert_with(|| std::sync::Arc::new(OnceCell::new()))
            .clone();
        cell.get_or_try_init(|| {
            ClusterState::bootstrap(name, seeds, transport, topology, retry_params, topology_check)
        })
        .await
        .map(Clone::clone)
    }

    pub fn lookup(&self, name: &str) -> Option<ClusterState<T, D>> {
        self.clusters.get(name).and_then(|c| c.get().cloned())
    }

    pub fn remove(&self, name: &str) -> Option<ClusterState<T, D>> {
        self.clusters.remove(name).and_then(|(_, c)| c.get().cloned())
    }

    pub async fn q(&self, name: &str, command: Command) -> Result<Reply, ClusterError> {
        let state = self
            .lookup(name)
            .ok_or_else(|| ClusterError::UnknownCluster(name.to_string()))?;
        engine::dispatch_single(&state, command).await
    }

    pub async fn qp(
        &self,
        name: &str,
        pipeline: Vec<Command>,
    ) -> Result<Vec<Result<Reply, ClusterError>>, ClusterError> {
        let state = self
            .lookup(name)
            .ok_or_else(|| ClusterError::UnknownCluster(name.to_string()))?;
        engine::dispatch(&state, pipeline).await
    }
}
