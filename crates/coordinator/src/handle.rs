//! Remote transaction handles
//!
//! A handle is the coordinator-side proxy for one BEGIN ... COMMIT/ROLLBACK
//! session on a worker. Handles are owned by the transaction registry; the
//! dispatcher and the commit orchestrator only borrow them.

use crate::error::{CoordinatorError, Result};
use remote_txn_common::{Channel, ChannelError, CommandResult, WorkerNode};
use std::fmt;

/// State of a remote transaction
///
/// Transitions are monotonic: `Unopened -> Open -> [Prepared] -> terminal`.
/// A failed BEGIN moves `Unopened` straight to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Channel obtained, BEGIN not yet acknowledged
    Unopened,
    /// BEGIN acknowledged
    Open,
    /// PREPARE TRANSACTION acknowledged
    Prepared,
    /// COMMIT or COMMIT PREPARED acknowledged
    Committed,
    /// ROLLBACK or ROLLBACK PREPARED acknowledged
    Aborted,
    /// Outcome unknown after a failed start or a failed completion
    Failed,
}

impl TransactionState {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted | Self::Failed)
    }

    /// Whether `self -> to` is a legal transition
    pub fn can_transition_to(self, to: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, to),
            (Unopened, Open | Failed)
                | (Open, Prepared | Committed | Aborted | Failed)
                | (Prepared, Committed | Aborted | Failed)
        )
    }
}

/// Coordinator-side proxy for one remote transaction
pub struct RemoteTransactionHandle {
    /// Worker the transaction runs on
    node: WorkerNode,

    /// Position of the worker when the registry was populated
    group_id: u32,

    /// Channel carrying the transaction
    channel: Box<dyn Channel>,

    /// Current state
    state: TransactionState,

    /// Name given at PREPARE TRANSACTION
    prepared_name: Option<String>,
}

impl RemoteTransactionHandle {
    /// Create an unopened handle over a channel
    pub fn new(node: WorkerNode, group_id: u32, channel: Box<dyn Channel>) -> Self {
        Self {
            node,
            group_id,
            channel,
            state: TransactionState::Unopened,
            prepared_name: None,
        }
    }

    /// Worker node of this transaction
    pub fn node(&self) -> &WorkerNode {
        &self.node
    }

    /// Group id assigned at population
    pub fn group_id(&self) -> u32 {
        self.group_id
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Name of the prepared transaction, once prepared
    pub fn prepared_name(&self) -> Option<&str> {
        self.prepared_name.as_deref()
    }

    /// Move to a new state, rejecting non-monotonic transitions
    pub fn transition(&mut self, to: TransactionState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(CoordinatorError::InvalidTransition {
                node: self.node.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Record a successful PREPARE TRANSACTION under `name`
    pub fn mark_prepared(&mut self, name: String) -> Result<()> {
        self.transition(TransactionState::Prepared)?;
        self.prepared_name = Some(name);
        Ok(())
    }

    /// Execute a command and wait for its result
    pub(crate) async fn execute(
        &mut self,
        command: &str,
    ) -> std::result::Result<CommandResult, ChannelError> {
        self.channel.execute(command).await
    }

    /// Borrow the underlying channel
    pub(crate) fn channel_mut(&mut self) -> &mut dyn Channel {
        self.channel.as_mut()
    }

    /// Give up the handle, keeping its channel
    pub(crate) fn into_parts(self) -> (WorkerNode, Box<dyn Channel>) {
        (self.node, self.channel)
    }
}

impl fmt::Debug for RemoteTransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTransactionHandle")
            .field("node", &self.node)
            .field("group_id", &self.group_id)
            .field("state", &self.state)
            .field("prepared_name", &self.prepared_name)
            .finish()
    }
}

/// Describe a failed command result for error messages and logs
pub(crate) fn failure_reason(result: &CommandResult) -> String {
    match result {
        CommandResult::Error(error) => error.to_string(),
        CommandResult::Complete { tag } => format!("unexpected completion {}", tag),
    }
}
