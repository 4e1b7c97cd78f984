//! Public coordinator operations
//!
//! A [`Coordinator`] holds the long-lived pieces: configuration, topology and
//! connection providers, the two-phase helper and the commit log. Each
//! session gets a [`TransactionContext`] bound to the event source of its
//! local transactions. The context owns the registry, so unrelated sessions
//! never share worker transactions.

use crate::commit_log::{CommitLog, MemoryCommitLog};
use crate::config::{CommitProtocol, CoordinatorConfig};
use crate::dispatcher::{check_command, send_ordered, send_parallel};
use crate::error::{CoordinatorError, Result};
use crate::handle::TransactionState;
use crate::lifecycle::{EventSource, Subscription, XactCallback};
use crate::orchestrator::CommitOrchestrator;
use crate::registry::TransactionRegistry;
use crate::two_phase::{PreparedTransactions, TwoPhaseCommit};
use parking_lot::{Mutex, RwLock};
use remote_txn_common::{
    ConnectionProvider, DistributedTransactionId, TopologyProvider, WorkerNode,
};
use std::sync::Arc;

/// Entry point for coordinating worker transactions
pub struct Coordinator {
    config: Arc<RwLock<CoordinatorConfig>>,
    topology: Arc<dyn TopologyProvider>,
    connections: Arc<dyn ConnectionProvider>,
    two_phase: Arc<dyn TwoPhaseCommit>,
    commit_log: Arc<dyn CommitLog>,
}

impl Coordinator {
    /// Create a coordinator using prepared transactions and an in-memory log
    pub fn new(
        config: CoordinatorConfig,
        topology: Arc<dyn TopologyProvider>,
        connections: Arc<dyn ConnectionProvider>,
    ) -> Result<Self> {
        config.validate()?;

        tracing::debug!(
            "coordinator {} using {} commit",
            config.coordinator_id,
            config.commit_protocol
        );

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            topology,
            connections,
            two_phase: Arc::new(PreparedTransactions),
            commit_log: Arc::new(MemoryCommitLog::new()),
        })
    }

    /// Replace the two-phase helper
    pub fn with_two_phase(mut self, two_phase: Arc<dyn TwoPhaseCommit>) -> Self {
        self.two_phase = two_phase;
        self
    }

    /// Replace the commit log
    pub fn with_commit_log(mut self, commit_log: Arc<dyn CommitLog>) -> Self {
        self.commit_log = commit_log;
        self
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> CoordinatorConfig {
        self.config.read().clone()
    }

    /// Change the commit protocol; transactions pick it up at PRE_COMMIT
    pub fn set_commit_protocol(&self, protocol: CommitProtocol) {
        self.config.write().commit_protocol = protocol;
    }

    /// The log receiving prepared transaction records
    pub fn commit_log(&self) -> Arc<dyn CommitLog> {
        self.commit_log.clone()
    }

    /// Create a context whose local transactions announce events on `events`
    pub fn context(&self, events: Arc<EventSource>) -> TransactionContext {
        let registry = Arc::new(tokio::sync::Mutex::new(TransactionRegistry::new(
            self.topology.clone(),
            self.connections.clone(),
        )));
        let orchestrator = Arc::new(CommitOrchestrator::new(
            registry.clone(),
            self.config.clone(),
            self.two_phase.clone(),
            self.commit_log.clone(),
        ));

        TransactionContext {
            registry,
            orchestrator,
            events,
            subscription: Mutex::new(None),
        }
    }
}

/// Worker transaction state of one session
///
/// Commands sent through the context open a transaction on every worker the
/// first time they are needed. The local transaction's COMMIT or ABORT then
/// completes them all and empties the registry for the next transaction.
pub struct TransactionContext {
    registry: Arc<tokio::sync::Mutex<TransactionRegistry>>,
    orchestrator: Arc<CommitOrchestrator>,
    events: Arc<EventSource>,
    subscription: Mutex<Option<Subscription>>,
}

impl TransactionContext {
    /// Subscribe the orchestrator to lifecycle events, once
    pub fn subscribe(&self) -> Subscription {
        let mut subscription = self.subscription.lock();
        if let Some(existing) = *subscription
            && self.events.is_subscribed(existing)
        {
            return existing;
        }

        let callback: Arc<dyn XactCallback> = self.orchestrator.clone();
        let created = self.events.subscribe(callback);
        *subscription = Some(created);
        created
    }

    /// Whether the orchestrator currently receives lifecycle events
    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .is_some_and(|s| self.events.is_subscribed(s))
    }

    /// Run a command on every worker in order, stopping at the first failure
    pub async fn send_command_ordered(&self, command: &str) -> Result<()> {
        check_command(command)?;
        let mut registry = self.acquire().await?;
        send_ordered(registry.handles_mut(), command).await
    }

    /// Run a command on every worker concurrently
    pub async fn send_command_parallel(&self, command: &str) -> Result<()> {
        check_command(command)?;
        let mut registry = self.acquire().await?;
        send_parallel(registry.handles_mut(), command).await
    }

    async fn acquire(&self) -> Result<tokio::sync::MutexGuard<'_, TransactionRegistry>> {
        let mut registry = self.registry.lock().await;
        let acquired = registry.acquire_all().await.map(|_| ());

        // A partially started set still needs the abort path, even when the
        // first worker failed and no handle was kept
        if registry.transaction_id().is_some() {
            self.subscribe();
        }

        acquired.map(|()| registry)
    }

    /// Node and state of every registered worker transaction
    pub async fn handle_states(&self) -> Vec<(WorkerNode, TransactionState)> {
        self.registry
            .lock()
            .await
            .handles()
            .iter()
            .map(|h| (h.node().clone(), h.state()))
            .collect()
    }

    /// Number of registered worker transactions
    pub async fn len(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Whether no worker transaction is registered
    pub async fn is_empty(&self) -> bool {
        self.registry.lock().await.is_empty()
    }

    /// Identifier of the open distributed transaction
    pub async fn transaction_id(&self) -> Option<DistributedTransactionId> {
        self.registry.lock().await.transaction_id()
    }

    /// Failures reported while completing the last transaction
    pub fn take_completion_failures(&self) -> Vec<CoordinatorError> {
        self.orchestrator.take_failures()
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.lock().take() {
            self.events.unsubscribe(subscription);
        }
    }
}
