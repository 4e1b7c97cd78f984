//! Commit protocol orchestration
//!
//! The orchestrator reacts to local transaction events and drives every
//! registered worker transaction to the same outcome:
//!
//! - PRE_COMMIT: under two-phase commit, prepare every worker and record the
//!   prepared transactions. Any failure here aborts the local transaction.
//! - COMMIT: commit prepared transactions, then plain-commit open ones.
//! - ABORT: roll back prepared transactions, then open ones.
//!
//! COMMIT and ABORT failures are logged and kept for inspection but never
//! returned, since the local outcome is already decided. The registry is
//! emptied after either event regardless of remote results.

use crate::commit_log::{CommitLog, PreparedTransactionRecord};
use crate::config::{CommitProtocol, CoordinatorConfig};
use crate::error::{CoordinatorError, Result};
use crate::handle::TransactionState;
use crate::lifecycle::{XactCallback, XactEvent};
use crate::registry::TransactionRegistry;
use crate::two_phase::{TwoPhaseCommit, finish};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Lifecycle callback completing worker transactions
pub struct CommitOrchestrator {
    registry: Arc<tokio::sync::Mutex<TransactionRegistry>>,
    config: Arc<RwLock<CoordinatorConfig>>,
    two_phase: Arc<dyn TwoPhaseCommit>,
    commit_log: Arc<dyn CommitLog>,

    /// Unescalated failures from the last COMMIT or ABORT
    failures: Mutex<Vec<CoordinatorError>>,
}

impl CommitOrchestrator {
    pub fn new(
        registry: Arc<tokio::sync::Mutex<TransactionRegistry>>,
        config: Arc<RwLock<CoordinatorConfig>>,
        two_phase: Arc<dyn TwoPhaseCommit>,
        commit_log: Arc<dyn CommitLog>,
    ) -> Self {
        Self {
            registry,
            config,
            two_phase,
            commit_log,
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Take the failures reported while completing the last transaction
    pub fn take_failures(&self) -> Vec<CoordinatorError> {
        std::mem::take(&mut *self.failures.lock())
    }

    async fn pre_commit(&self) -> Result<()> {
        let mut registry = self.registry.lock().await;

        // Checked first: a failure on the first worker leaves no handle behind
        if let Some(node) = registry.start_failure() {
            return Err(CoordinatorError::RemoteTransactionStartFailed {
                node: node.clone(),
                reason: "transaction was not started on every worker".to_string(),
            });
        }

        if registry.is_empty() {
            return Ok(());
        }

        let (protocol, prefix, coordinator_id) = {
            let config = self.config.read();
            (
                config.commit_protocol,
                config.prepared_name_prefix.clone(),
                config.coordinator_id.clone(),
            )
        };

        if protocol == CommitProtocol::OnePhase {
            return Ok(());
        }

        let Some(transaction_id) = registry.transaction_id() else {
            return Ok(());
        };

        tracing::debug!(
            "preparing {} worker transactions for {}",
            registry.len(),
            transaction_id
        );
        self.two_phase
            .prepare_all(transaction_id, &prefix, registry.handles_mut())
            .await?;

        let recorded_at = Utc::now();
        let records: Vec<_> = registry
            .handles()
            .iter()
            .filter_map(|handle| {
                let gid = handle.prepared_name()?;
                Some(PreparedTransactionRecord {
                    gid: gid.to_string(),
                    node: handle.node().clone(),
                    group_id: handle.group_id(),
                    coordinator_id: coordinator_id.clone(),
                    transaction_id,
                    recorded_at,
                })
            })
            .collect();

        self.commit_log.record_prepared(&records)
    }

    async fn complete(&self, event: XactEvent) {
        self.failures.lock().clear();

        let mut registry = self.registry.lock().await;
        if registry.is_empty() {
            // Still drop the transaction id and any start failure
            registry.clear().await;
            return;
        }

        let committing = event == XactEvent::Commit;
        let mut failures = if committing {
            self.two_phase.commit_all(registry.handles_mut()).await
        } else {
            self.two_phase.abort_all(registry.handles_mut()).await
        };

        let (command, done) = if committing {
            ("COMMIT", TransactionState::Committed)
        } else {
            ("ROLLBACK", TransactionState::Aborted)
        };

        for handle in registry
            .handles_mut()
            .iter_mut()
            .filter(|h| h.state() == TransactionState::Open)
        {
            if let Err(reason) = finish(handle, command, done).await {
                let node = handle.node().clone();
                failures.push(if committing {
                    CoordinatorError::RemoteCommitFailed { node, reason }
                } else {
                    CoordinatorError::RemoteRollbackFailed { node, reason }
                });
            }
        }

        if !failures.is_empty() {
            tracing::warn!(
                "{} of {} worker transactions did not complete on {:?}",
                failures.len(),
                registry.len(),
                event
            );
        }
        tracing::debug!("completed {} worker transactions on {:?}", registry.len(), event);

        registry.clear().await;
        *self.failures.lock() = failures;
    }
}

#[async_trait]
impl XactCallback for CommitOrchestrator {
    async fn on_event(&self, event: XactEvent) -> Result<()> {
        match event {
            XactEvent::PreCommit => self.pre_commit().await,
            XactEvent::Commit | XactEvent::Abort => {
                self.complete(event).await;
                Ok(())
            }
            XactEvent::PrePrepare | XactEvent::Prepare => Ok(()),
        }
    }
}
