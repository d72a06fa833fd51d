//! Per-cluster mutable state: the slot map snapshot, the connection table,
//! and the single-flight refresh gate.
//!
//! Mirrors the shape of a classic actor: one `Inner` owns everything that
//! needs coordinated mutation, reached through a cheaply-cloneable handle
//! rather than copied around. Reads of the slot map never block behind a
//! lock, they just load the current `Arc` out of an `ArcSwap`; only a
//! refresh, or opening a connection to a node not seen before, takes the
//! async lock over the connection table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::RwLock;

use crate::config::{RetryParams, TopologyCheckParams};
use crate::error::ClusterError;
use crate::node::NodeAddr;
use crate::transport::{Transport, TopologyDiscovery};

struct SlotMap<H> {
    version: u64,
    table: Vec<Option<H>>,
}

impl<H> SlotMap<H> {
    fn empty() -> Self {
        SlotMap {
            version: 0,
            table: (0..crate::parser::SLOT_COUNT as usize).map(|_| None).collect(),
        }
    }
}

struct Inner<T: Transport, D: TopologyDiscovery<T>> {
    name: String,
    transport: T,
    topology: D,
    seeds: Vec<NodeAddr>,
    slot_map: ArcSwap<SlotMap<T::Handle>>,
    connections: RwLock<HashMap<NodeAddr, T::Handle>>,
    refresh_in_progress: AtomicBool,
    retry_params: RetryParams,
}

/// A handle to one cluster's routing state. Cheap to clone: internally just
/// an `Arc`, the way the teacher's own cluster connection is a cheaply
/// cloneable handle onto its actor rather than the state itself.
pub struct ClusterState<T: Transport, D: TopologyDiscovery<T>>(Arc<Inner<T, D>>);

impl<T: Transport, D: TopologyDiscovery<T>> Clone for ClusterState<T, D> {
    fn clone(&self) -> Self {
        ClusterState(self.0.clone())
    }
}

impl<T: Transport, D: TopologyDiscovery<T>> ClusterState<T, D> {
    pub(crate) async fn bootstrap(
        name: String,
        seeds: Vec<NodeAddr>,
        transport: T,
        topology: D,
        retry_params: RetryParams,
        topology_check: TopologyCheckParams,
    ) -> Result<Self, ClusterError> {
        if seeds.is_empty() {
            return Err(ClusterError::NoConnection);
        }
        let inner = Arc::new(Inner {
            name,
            transport,
            topology,
            seeds,
            slot_map: ArcSwap::from_pointee(SlotMap::empty()),
            connections: RwLock::new(HashMap::new()),
            refresh_in_progress: AtomicBool::new(false),
            retry_params,
        });
        // The bootstrap refresh runs inline and must succeed: unlike later
        // refreshes (fire-and-forget, the engine carries on with whatever
        // connection it already has), a cluster with no slot map at all has
        // nothing to carry on with.
        Self::refresh_once(&inner).await?;
        let state = ClusterState(inner);
        state.spawn_periodic_topology_check(topology_check);
        Ok(state)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn retry_params(&self) -> RetryParams {
        self.0.retry_params
    }

    pub(crate) fn transport(&self) -> &T {
        &self.0.transport
    }

    /// Looks up the connection currently serving `slot`, along with the
    /// slot-map version it was read from.
    pub(crate) fn get_connection_by_slot(&self, slot: u16) -> Option<(T::Handle, u64)> {
        let snapshot = self.0.slot_map.load();
        let handle = snapshot.table.get(slot as usize)?.clone()?;
        Some((handle, snapshot.version))
    }

    /// Returns a connection to `node`, opening one if this is the first
    /// time it's been addressed (e.g. a redirect target outside the
    /// precomputed slot map). Opening is serialized per cluster so two
    /// concurrent redirects to the same new node only open one socket.
    pub(crate) async fn get_or_open_connection(&self, node: &NodeAddr) -> Option<T::Handle> {
        {
            let conns = self.0.connections.read().await;
            if let Some(h) = conns.get(node) {
                return Some(h.clone());
            }
        }
        let mut conns = self.0.connections.write().await;
        if let Some(h) = conns.get(node) {
            return Some(h.clone());
        }
        match self.0.transport.open(node).await {
            Ok(h) => {
                conns.insert(node.clone(), h.clone());
                Some(h)
            }
            Err(e) => {
                tracing::warn!(cluster = %self.0.name, node = %node, error = %e, "failed to open connection");
                None
            }
        }
    }

    /// Spawns a background task that nudges a refresh on a fixed cadence,
    /// with a little jitter so a fleet of clients restarted together don't
    /// all poll in lockstep. Catches topology changes that never produce a
    /// `MOVED` reply because nothing happened to be sent to the moved slots
    /// in the meantime.
    pub(crate) fn spawn_periodic_topology_check(&self, params: TopologyCheckParams) {
        let state = self.clone();
        tokio::spawn(async move {
            loop {
                let jitter = params.jitter.mul_f64(rand::random::<f64>());
                tokio::time::sleep(params.interval + jitter).await;
                let version = state.0.slot_map.load().version;
                state.request_refresh(version);
            }
        });
    }

    /// Requests a background refresh if one isn't already running and the
    /// caller's observed version hasn't already been superseded. Never
    /// awaited by the caller: the engine treats a stale slot map as
    /// something to correct opportunistically, not something to block a
    /// query on.
    pub(crate) fn request_refresh(&self, observed_version: u64) {
        if observed_version < self.0.slot_map.load().version {
            return;
        }
        if self
            .0
            .refresh_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let inner = self.0.clone();
        tokio::spawn(async move {
            if let Err(e) = Self::refresh_once(&inner).await {
                tracing::warn!(cluster = %inner.name, error = %e, "slot map refresh failed");
            }
            inner.refresh_in_progress.store(false, Ordering::Release);
        });
    }

    /// Queries topology from every known node (falling back to the seed
    /// list if none are known yet) until one answers, then publishes a new
    /// slot map snapshot built from the result.
    async fn refresh_once(inner: &Arc<Inner<T, D>>) -> Result<(), ClusterError> {
        let candidates: Vec<NodeAddr> = {
            let conns = inner.connections.read().await;
            if conns.is_empty() {
                inner.seeds.clone()
            } else {
                conns.keys().cloned().collect()
            }
        };

        let mut last_err = None;
        for node in candidates {
            let conn = {
                let conns = inner.connections.read().await;
                conns.get(&node).cloned()
            };
            let conn = match conn {
                Some(c) => c,
                None => match inner.transport.open(&node).await {
                    Ok(c) => {
                        inner.connections.write().await.insert(node.clone(), c.clone());
                        c
                    }
                    Err(e) => {
                        last_err = Some(e);
                        continue;
                    }
                },
            };

            match inner.topology.discover(&conn).await {
                Ok(ranges) => {
                    let mut table: Vec<Option<T::Handle>> =
                        (0..crate::parser::SLOT_COUNT as usize).map(|_| None).collect();
                    let mut conns = inner.connections.write().await;
                    for range in ranges {
                        let handle = match conns.get(&range.primary) {
                            Some(h) => h.clone(),
                            None => match inner.transport.open(&range.primary).await {
                                Ok(h) => {
                                    conns.insert(range.primary.clone(), h.clone());
                                    h
                                }
                                Err(e) => {
                                    tracing::warn!(cluster = %inner.name, node = %range.primary, error = %e, "unreachable node in topology");
                                    continue;
                                }
                            },
                        };
                        for slot in range.lo..=range.hi {
                            table[slot as usize] = Some(handle.clone());
                        }
                    }
                    drop(conns);
                    let next_version = inner.slot_map.load().version + 1;
                    inner.slot_map.store(Arc::new(SlotMap {
                        version: next_version,
                        table,
                    }));
                    tracing::info!(cluster = %inner.name, version = next_version, "slot map refreshed");
                    return Ok(());
                }
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            }
        }
        Err(last_err
            .map(ClusterError::from)
            .unwrap_or(ClusterError::NoConnection))
    }
}
