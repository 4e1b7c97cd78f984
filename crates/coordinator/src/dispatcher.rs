//! Command dispatch to worker transactions
//!
//! Two modes are offered:
//! - Ordered: each worker runs the command in registry order, and the next
//!   worker only sees it after the previous one succeeded
//! - Parallel: the command is submitted to every worker first, then results
//!   are drained in submission order, so latency is bounded by the slowest
//!   worker rather than the sum

use crate::error::{CoordinatorError, Result};
use crate::handle::{RemoteTransactionHandle, failure_reason};
use remote_txn_common::{CommandResult, WorkerNode};

/// Reject commands that carry nothing to execute
pub fn check_command(command: &str) -> Result<()> {
    if command.trim().is_empty() {
        return Err(CoordinatorError::EmptyCommand);
    }
    Ok(())
}

/// Send a command to each handle in order, stopping at the first failure
pub async fn send_ordered(handles: &mut [RemoteTransactionHandle], command: &str) -> Result<()> {
    check_command(command)?;

    for handle in handles.iter_mut() {
        let result = handle.execute(command).await.map_err(|e| {
            tracing::warn!("could not send \"{}\" to {}: {}", command, handle.node(), e);
            CoordinatorError::ConnectionUnavailable {
                node: handle.node().clone(),
                reason: e.to_string(),
            }
        })?;

        if !result.is_success() {
            return Err(command_failed(handle.node(), command, &result));
        }
    }

    Ok(())
}

/// Submit a command to every handle, then drain every result
///
/// A failed submission drains the handles already submitted to before the
/// error is returned, and a failed result still drains the remaining handles.
/// Either way every channel is idle again when this returns, so the abort path
/// can roll back each of them.
pub async fn send_parallel(handles: &mut [RemoteTransactionHandle], command: &str) -> Result<()> {
    check_command(command)?;

    let mut submitted = 0;
    let mut submit_error = None;

    for handle in handles.iter_mut() {
        if let Err(e) = handle.channel_mut().send(command).await {
            tracing::warn!("could not send \"{}\" to {}: {}", command, handle.node(), e);
            submit_error = Some(CoordinatorError::ConnectionUnavailable {
                node: handle.node().clone(),
                reason: e.to_string(),
            });
            break;
        }
        submitted += 1;
    }

    if let Some(error) = submit_error {
        for handle in handles[..submitted].iter_mut() {
            while handle.channel_mut().next_result().await.is_some() {}
        }
        return Err(error);
    }

    let mut first_error = None;

    for handle in handles.iter_mut() {
        let result = handle.channel_mut().next_result().await;

        // The wire appends an idle marker after every result
        if let Some(extra) = handle.channel_mut().next_result().await {
            tracing::warn!("unexpected extra result from {}: {:?}", handle.node(), extra);
        }

        let error = match result {
            Some(result) if result.is_success() => continue,
            Some(result) => command_failed(handle.node(), command, &result),
            None => CoordinatorError::ConnectionUnavailable {
                node: handle.node().clone(),
                reason: "no result received".to_string(),
            },
        };

        if first_error.is_none() {
            first_error = Some(error);
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Report a remote error and build the dispatch failure naming its node
fn command_failed(node: &WorkerNode, command: &str, result: &CommandResult) -> CoordinatorError {
    let reason = failure_reason(result);
    tracing::warn!("failed to apply \"{}\" on {}: {}", command, node, reason);
    CoordinatorError::RemoteCommandFailed {
        node: node.clone(),
        command: command.to_string(),
        reason,
    }
}
