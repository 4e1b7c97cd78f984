//! Mock worker cluster
//!
//! The cluster is the connection provider for tests: it knows every mock
//! worker, opens channels to reachable ones and pools released channels for
//! reuse.

use crate::{MockChannel, MockWorker};
use async_trait::async_trait;
use parking_lot::Mutex;
use remote_txn_common::{Channel, ConnectionProvider, WorkerNode};
use std::collections::HashMap;
use std::sync::Arc;

/// Mock cluster that hands out channels to its workers
#[derive(Default)]
pub struct MockCluster {
    /// Workers in the order they were added
    workers: Mutex<Vec<Arc<MockWorker>>>,

    /// Released channels available for reuse
    pool: Mutex<HashMap<WorkerNode, Vec<Box<dyn Channel>>>>,
}

impl MockCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker, or return the existing one with the same identity
    pub fn add_worker(&self, host: &str, port: u16) -> Arc<MockWorker> {
        let mut workers = self.workers.lock();

        if let Some(existing) = workers.iter().find(|w| w.node().is(host, port)) {
            return existing.clone();
        }

        let group_id = workers.len() as u32 + 1;
        let worker = Arc::new(MockWorker::new(
            WorkerNode::new(host, port).with_group(group_id),
        ));
        workers.push(worker.clone());
        worker
    }

    /// Worker with the given identity
    pub fn worker(&self, node: &WorkerNode) -> Option<Arc<MockWorker>> {
        self.workers
            .lock()
            .iter()
            .find(|w| w.node() == node)
            .cloned()
    }

    /// All workers in the order they were added
    pub fn workers(&self) -> Vec<Arc<MockWorker>> {
        self.workers.lock().clone()
    }

    /// Node identities of all workers
    pub fn nodes(&self) -> Vec<WorkerNode> {
        self.workers
            .lock()
            .iter()
            .map(|w| w.node().clone())
            .collect()
    }
}

#[async_trait]
impl ConnectionProvider for MockCluster {
    async fn get(&self, node: &WorkerNode) -> Option<Box<dyn Channel>> {
        let worker = self.worker(node)?;
        if !worker.is_reachable() {
            tracing::debug!("worker {} is unreachable", node);
            return None;
        }

        if let Some(channel) = self.pool.lock().get_mut(node).and_then(Vec::pop) {
            return Some(channel);
        }

        Some(Box::new(MockChannel::open(worker)))
    }

    fn release(&self, node: &WorkerNode, channel: Box<dyn Channel>) {
        self.pool
            .lock()
            .entry(node.clone())
            .or_default()
            .push(channel);
    }
}
