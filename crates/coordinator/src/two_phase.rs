//! Two-phase commit over worker transactions
//!
//! The helper owns the wire-level exchange for prepared transactions:
//! `PREPARE TRANSACTION`, `COMMIT PREPARED` and `ROLLBACK PREPARED`. The
//! commit orchestrator only decides when each step runs.

use crate::error::{CoordinatorError, Result};
use crate::handle::{RemoteTransactionHandle, TransactionState, failure_reason};
use async_trait::async_trait;
use remote_txn_common::{CommandResult, DistributedTransactionId};

/// Prepare, commit and abort prepared transactions on a handle set
#[async_trait]
pub trait TwoPhaseCommit: Send + Sync {
    /// Prepare every open handle; the first failure is returned
    async fn prepare_all(
        &self,
        transaction_id: DistributedTransactionId,
        prefix: &str,
        handles: &mut [RemoteTransactionHandle],
    ) -> Result<()>;

    /// Commit every prepared handle, attempting all of them
    async fn commit_all(&self, handles: &mut [RemoteTransactionHandle]) -> Vec<CoordinatorError>;

    /// Roll back every prepared handle, attempting all of them
    async fn abort_all(&self, handles: &mut [RemoteTransactionHandle]) -> Vec<CoordinatorError>;
}

/// Prepared transactions over SQL channels
#[derive(Debug, Default, Clone, Copy)]
pub struct PreparedTransactions;

#[async_trait]
impl TwoPhaseCommit for PreparedTransactions {
    async fn prepare_all(
        &self,
        transaction_id: DistributedTransactionId,
        prefix: &str,
        handles: &mut [RemoteTransactionHandle],
    ) -> Result<()> {
        for handle in handles
            .iter_mut()
            .filter(|h| h.state() == TransactionState::Open)
        {
            let name = transaction_id.prepared_name(prefix, handle.group_id());
            let command = format!("PREPARE TRANSACTION '{}'", name);

            // A failed prepare leaves the handle open; the abort path rolls it back
            let reason = match handle.execute(&command).await {
                Ok(result) if result.is_success() => None,
                Ok(result) => Some(failure_reason(&result)),
                Err(e) => Some(e.to_string()),
            };

            if let Some(reason) = reason {
                tracing::warn!("failed to prepare transaction on {}: {}", handle.node(), reason);
                return Err(CoordinatorError::RemotePrepareFailed {
                    node: handle.node().clone(),
                    reason,
                });
            }

            tracing::debug!("prepared transaction {} on {}", name, handle.node());
            handle.mark_prepared(name)?;
        }

        Ok(())
    }

    async fn commit_all(&self, handles: &mut [RemoteTransactionHandle]) -> Vec<CoordinatorError> {
        let mut failures = Vec::new();

        for handle in prepared(handles) {
            let command = format!(
                "COMMIT PREPARED '{}'",
                handle.prepared_name().unwrap_or_default()
            );
            if let Err(reason) = finish(handle, &command, TransactionState::Committed).await {
                failures.push(CoordinatorError::RemoteCommitFailed {
                    node: handle.node().clone(),
                    reason,
                });
            }
        }

        failures
    }

    async fn abort_all(&self, handles: &mut [RemoteTransactionHandle]) -> Vec<CoordinatorError> {
        let mut failures = Vec::new();

        for handle in prepared(handles) {
            let command = format!(
                "ROLLBACK PREPARED '{}'",
                handle.prepared_name().unwrap_or_default()
            );
            if let Err(reason) = finish(handle, &command, TransactionState::Aborted).await {
                failures.push(CoordinatorError::RemoteRollbackFailed {
                    node: handle.node().clone(),
                    reason,
                });
            }
        }

        failures
    }
}

fn prepared(
    handles: &mut [RemoteTransactionHandle],
) -> impl Iterator<Item = &mut RemoteTransactionHandle> {
    handles
        .iter_mut()
        .filter(|h| h.state() == TransactionState::Prepared)
}

/// Run a completion command and move the handle to `done`, or to `Failed`
///
/// The error carries the reason; the remote outcome is unknown at that point.
pub(crate) async fn finish(
    handle: &mut RemoteTransactionHandle,
    command: &str,
    done: TransactionState,
) -> std::result::Result<(), String> {
    let reason = match handle.execute(command).await {
        Ok(result) if result.is_success() => {
            // COMMIT of a transaction that already failed reports ROLLBACK
            match (&result, done) {
                (CommandResult::Complete { tag }, TransactionState::Committed)
                    if tag == "ROLLBACK" =>
                {
                    Some("transaction was rolled back on the worker".to_string())
                }
                _ => None,
            }
        }
        Ok(result) => Some(failure_reason(&result)),
        Err(e) => Some(e.to_string()),
    };

    match reason {
        None => {
            let _ = handle.transition(done);
            Ok(())
        }
        Some(reason) => {
            tracing::warn!("\"{}\" failed on {}: {}", command, handle.node(), reason);
            let _ = handle.transition(TransactionState::Failed);
            Err(reason)
        }
    }
}
