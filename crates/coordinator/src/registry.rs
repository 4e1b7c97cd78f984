//! Transaction registry
//!
//! The registry maps every worker to the remote transaction opened for the
//! current local transaction. It opens at most one remote transaction per
//! worker and returns the same handles on every call until the local
//! transaction completes.
//!
//! Membership changes are detected by worker count only. A node replaced by
//! another between calls keeps the count and goes unnoticed; this is a coarse
//! invalidation heuristic, not exact diffing.

use crate::error::{CoordinatorError, Result};
use crate::handle::{RemoteTransactionHandle, TransactionState, failure_reason};
use remote_txn_common::{
    ConnectionProvider, DistributedTransactionId, TopologyProvider, WorkerNode,
};
use std::sync::Arc;

/// Per-transaction cache of remote transaction handles
pub struct TransactionRegistry {
    /// Source of the current worker set
    topology: Arc<dyn TopologyProvider>,

    /// Source of worker channels
    connections: Arc<dyn ConnectionProvider>,

    /// Handles in topology order
    handles: Vec<RemoteTransactionHandle>,

    /// Worker count seen at the last population
    worker_count: usize,

    /// Whether the last population opened every worker
    complete: bool,

    /// Worker whose BEGIN failed during the last population
    start_failure: Option<WorkerNode>,

    /// Identifier of the distributed transaction, set at first population
    transaction_id: Option<DistributedTransactionId>,
}

impl TransactionRegistry {
    /// Create an empty registry
    pub fn new(
        topology: Arc<dyn TopologyProvider>,
        connections: Arc<dyn ConnectionProvider>,
    ) -> Self {
        Self {
            topology,
            connections,
            handles: Vec::new(),
            worker_count: 0,
            complete: false,
            start_failure: None,
            transaction_id: None,
        }
    }

    /// Open a remote transaction on every worker, or reuse the open ones
    ///
    /// On a BEGIN failure the handles opened so far stay registered so the
    /// abort path can roll them back, but they are never handed out again: the
    /// next call discards them and opens every worker afresh.
    pub async fn acquire_all(&mut self) -> Result<&mut [RemoteTransactionHandle]> {
        let nodes = self
            .topology
            .list_nodes()
            .map_err(CoordinatorError::Topology)?;

        if !self.handles.is_empty() && (!self.complete || nodes.len() != self.worker_count) {
            tracing::debug!(
                "discarding {} worker transactions (workers {} -> {}, complete: {})",
                self.handles.len(),
                self.worker_count,
                nodes.len(),
                self.complete
            );
            self.invalidate().await;
        }

        if self.handles.is_empty() {
            self.populate(nodes).await?;
        }

        Ok(&mut self.handles)
    }

    /// Open a remote transaction on each node in order
    async fn populate(&mut self, nodes: Vec<WorkerNode>) -> Result<()> {
        self.worker_count = nodes.len();
        self.complete = false;
        self.start_failure = None;
        let transaction_id = *self
            .transaction_id
            .get_or_insert_with(DistributedTransactionId::new);

        for (index, node) in nodes.into_iter().enumerate() {
            let Some(channel) = self.connections.get(&node).await else {
                tracing::warn!("could not open connection to {}", node);
                self.start_failure = Some(node.clone());
                return Err(CoordinatorError::RemoteTransactionStartFailed {
                    node,
                    reason: "could not open connection".to_string(),
                });
            };

            let mut handle = RemoteTransactionHandle::new(node, index as u32, channel);

            let reason = match handle.execute("BEGIN").await {
                Ok(result) if result.is_success() => None,
                Ok(result) => Some(failure_reason(&result)),
                Err(e) => Some(e.to_string()),
            };

            if let Some(reason) = reason {
                tracing::warn!("could not start transaction on {}: {}", handle.node(), reason);
                handle.transition(TransactionState::Failed)?;
                let (node, mut channel) = handle.into_parts();
                channel.close().await;
                self.start_failure = Some(node.clone());
                return Err(CoordinatorError::RemoteTransactionStartFailed { node, reason });
            }

            handle.transition(TransactionState::Open)?;
            tracing::debug!(
                "opened worker transaction {} on {}",
                transaction_id,
                handle.node()
            );
            self.handles.push(handle);
        }

        self.complete = true;
        Ok(())
    }

    /// Close and discard every handle without completing it
    pub async fn invalidate(&mut self) {
        for handle in self.handles.drain(..) {
            let (_, mut channel) = handle.into_parts();
            channel.close().await;
        }
        self.complete = false;
        self.worker_count = 0;
        self.start_failure = None;
    }

    /// Empty the registry once the local transaction has completed
    ///
    /// Channels of cleanly completed transactions go back to the connection
    /// provider; any other channel is closed.
    pub async fn clear(&mut self) {
        for handle in self.handles.drain(..) {
            let reusable = matches!(
                handle.state(),
                TransactionState::Committed | TransactionState::Aborted
            );
            let (node, mut channel) = handle.into_parts();
            if reusable {
                self.connections.release(&node, channel);
            } else {
                channel.close().await;
            }
        }
        self.worker_count = 0;
        self.complete = false;
        self.start_failure = None;
        self.transaction_id = None;
    }

    /// Handles in topology order
    pub fn handles(&self) -> &[RemoteTransactionHandle] {
        &self.handles
    }

    /// Mutable handles in topology order
    pub fn handles_mut(&mut self) -> &mut [RemoteTransactionHandle] {
        &mut self.handles
    }

    /// Number of registered handles
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no handle is registered
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Whether the last population opened every worker
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Worker whose transaction could not be started, if population failed
    pub fn start_failure(&self) -> Option<&WorkerNode> {
        self.start_failure.as_ref()
    }

    /// Identifier of the current distributed transaction
    pub fn transaction_id(&self) -> Option<DistributedTransactionId> {
        self.transaction_id
    }
}
