//! A scriptable in-memory [`Transport`]/[`TopologyDiscovery`] pair for
//! exercising `cluster-core`'s redirection engine without a real cluster.
//!
//! Tests build a [`MockCluster`], script per-node replies and topology with
//! [`MockCluster::queue_reply`]/[`MockCluster::set_topology`], then hand out
//! cheap [`MockTransport`]/[`MockTopology`] handles to
//! `cluster_core::Registry::start`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;

use cluster_core::{Command, CommandOutcome, NodeAddr, SlotRange, TopologyDiscovery, Transport, TransportError};

struct State {
    queued: HashMap<NodeAddr, VecDeque<CommandOutcome>>,
    unreachable: HashSet<NodeAddr>,
    topology: Vec<SlotRange>,
    open_calls: HashMap<NodeAddr, u32>,
    send_calls: HashMap<NodeAddr, u32>,
    pipeline_calls: HashMap<NodeAddr, u32>,
    discover_calls: u32,
}

/// Shared handle onto one scripted cluster. Clone freely; every clone and
/// every [`MockTransport`]/[`MockTopology`] derived from it see the same
/// state.
#[derive(Clone)]
pub struct MockCluster {
    state: Arc<Mutex<State>>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    pub fn new() -> Self {
        MockCluster {
            state: Arc::new(Mutex::new(State {
                queued: HashMap::new(),
                unreachable: HashSet::new(),
                topology: Vec::new(),
                open_calls: HashMap::new(),
                send_calls: HashMap::new(),
                pipeline_calls: HashMap::new(),
                discover_calls: 0,
            })),
        }
    }

    pub fn transport(&self) -> MockTransport {
        MockTransport {
            state: self.state.clone(),
        }
    }

    pub fn topology_discovery(&self) -> MockTopology {
        MockTopology {
            state: self.state.clone(),
        }
    }

    /// Replaces the slot ranges `discover` hands back, regardless of which
    /// node was asked (as a real cluster would answer identically from any
    /// node).
    pub async fn set_topology(&self, ranges: Vec<SlotRange>) {
        self.state.lock().await.topology = ranges;
    }

    /// Queues one reply for the next `send_one`/pipeline-element addressed
    /// to `node`. Nodes with no queued reply left default to echoing the
    /// command name back as an `Ok`.
    pub async fn queue_reply(&self, node: &NodeAddr, outcome: CommandOutcome) {
        self.state
            .lock()
            .await
            .queued
            .entry(node.clone())
            .or_default()
            .push_back(outcome);
    }

    pub async fn mark_unreachable(&self, node: NodeAddr) {
        self.state.lock().await.unreachable.insert(node);
    }

    pub async fn mark_reachable(&self, node: &NodeAddr) {
        self.state.lock().await.unreachable.remove(node);
    }

    pub async fn open_call_count(&self, node: &NodeAddr) -> u32 {
        self.state.lock().await.open_calls.get(node).copied().unwrap_or(0)
    }

    pub async fn send_call_count(&self, node: &NodeAddr) -> u32 {
        self.state.lock().await.send_calls.get(node).copied().unwrap_or(0)
    }

    /// Number of `send_pipeline` round trips issued to `node` (as opposed to
    /// `send_one` calls, or the number of commands within a pipeline).
    pub async fn pipeline_call_count(&self, node: &NodeAddr) -> u32 {
        self.state.lock().await.pipeline_calls.get(node).copied().unwrap_or(0)
    }

    pub async fn discover_call_count(&self) -> u32 {
        self.state.lock().await.discover_calls
    }
}

#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

#[derive(Clone)]
pub struct MockTopology {
    state: Arc<Mutex<State>>,
}

async fn send_one_inner(state: &Arc<Mutex<State>>, conn: &NodeAddr, command: &Command) -> Result<CommandOutcome, TransportError> {
    let mut guard = state.lock().await;
    if guard.unreachable.contains(conn) {
        return Err(TransportError(format!("{} is unreachable", conn)));
    }
    *guard.send_calls.entry(conn.clone()).or_insert(0) += 1;
    let outcome = guard
        .queued
        .get_mut(conn)
        .and_then(VecDeque::pop_front)
        .unwrap_or_else(|| CommandOutcome::Ok(command.first().cloned().unwrap_or_default()));
    Ok(outcome)
}

impl Transport for MockTransport {
    type Handle = NodeAddr;

    fn open<'a>(
        &'a self,
        node: &'a NodeAddr,
    ) -> Pin<Box<dyn Future<Output = Result<NodeAddr, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let mut guard = self.state.lock().await;
            if guard.unreachable.contains(node) {
                return Err(TransportError(format!("{} is unreachable", node)));
            }
            *guard.open_calls.entry(node.clone()).or_insert(0) += 1;
            Ok(node.clone())
        })
    }

    fn send_one<'a>(
        &'a self,
        conn: &'a NodeAddr,
        command: &'a Command,
    ) -> Pin<Box<dyn Future<Output = Result<CommandOutcome, TransportError>> + Send + 'a>> {
        Box::pin(async move { send_one_inner(&self.state, conn, command).await })
    }

    fn send_pipeline<'a>(
        &'a self,
        conn: &'a NodeAddr,
        commands: &'a [Command],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<CommandOutcome>, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            *self.state.lock().await.pipeline_calls.entry(conn.clone()).or_insert(0) += 1;
            let mut outcomes = Vec::with_capacity(commands.len());
            for command in commands {
                outcomes.push(send_one_inner(&self.state, conn, command).await?);
            }
            Ok(outcomes)
        })
    }
}

impl TopologyDiscovery<MockTransport> for MockTopology {
    fn discover<'a>(
        &'a self,
        _conn: &'a NodeAddr,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SlotRange>, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let mut guard = self.state.lock().await;
            guard.discover_calls += 1;
            Ok(guard.topology.clone())
        })
    }
}
