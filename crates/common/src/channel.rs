//! Contracts for reaching worker nodes
//!
//! Connection establishment and worker discovery live outside this workspace.
//! These traits are the seams the coordinator talks through.

use crate::{CommandResult, WorkerNode};
use async_trait::async_trait;
use thiserror::Error;

/// Transport-level channel errors
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,

    #[error("Failed to send command: {0}")]
    SendFailed(String),

    #[error("No result received for submitted command")]
    MissingResult,
}

/// Bidirectional command channel to one worker
///
/// A channel carries at most one command at a time. After every command result
/// the wire appends an idle marker, surfaced by `next_result` as `None`.
#[async_trait]
pub trait Channel: Send {
    /// Submit a command without waiting for its result
    async fn send(&mut self, command: &str) -> Result<(), ChannelError>;

    /// Next result for the submitted command
    ///
    /// Returns `None` for the idle marker, or immediately when nothing is
    /// outstanding on the channel.
    async fn next_result(&mut self) -> Option<CommandResult>;

    /// Close the channel; an open remote transaction is abandoned
    async fn close(&mut self);

    /// Execute a command and wait for its result
    async fn execute(&mut self, command: &str) -> Result<CommandResult, ChannelError> {
        self.send(command).await?;
        let result = self.next_result().await.ok_or(ChannelError::MissingResult)?;

        // The wire appends an idle marker after every result
        if let Some(extra) = self.next_result().await {
            tracing::warn!("unexpected extra result for \"{}\": {:?}", command, extra);
        }

        Ok(result)
    }
}

/// Hands out reusable channels to worker nodes
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Get a channel to the given node, or `None` if it cannot be reached
    async fn get(&self, node: &WorkerNode) -> Option<Box<dyn Channel>>;

    /// Return a channel for reuse once its remote transaction has ended
    fn release(&self, node: &WorkerNode, channel: Box<dyn Channel>) {
        let _ = (node, channel);
    }
}

/// Yields the current worker node set
pub trait TopologyProvider: Send + Sync {
    /// Current worker nodes in topology order
    fn list_nodes(&self) -> Result<Vec<WorkerNode>, String>;
}
