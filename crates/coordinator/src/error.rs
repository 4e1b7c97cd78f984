//! Error types for the coordinator

use crate::handle::TransactionState;
use remote_txn_common::WorkerNode;
use thiserror::Error;

/// Coordinator error types
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Connection to {node} unavailable: {reason}")]
    ConnectionUnavailable { node: WorkerNode, reason: String },

    #[error("Could not start transaction on {node}: {reason}")]
    RemoteTransactionStartFailed { node: WorkerNode, reason: String },

    #[error("Failed to apply \"{command}\" on {node}: {reason}")]
    RemoteCommandFailed {
        node: WorkerNode,
        command: String,
        reason: String,
    },

    #[error("Failed to prepare transaction on {node}: {reason}")]
    RemotePrepareFailed { node: WorkerNode, reason: String },

    #[error("Failed to commit transaction on {node}: {reason}")]
    RemoteCommitFailed { node: WorkerNode, reason: String },

    #[error("Failed to roll back transaction on {node}: {reason}")]
    RemoteRollbackFailed { node: WorkerNode, reason: String },

    #[error("Cannot send an empty command to workers")]
    EmptyCommand,

    #[error("Invalid transaction state transition on {node}: {from:?} -> {to:?}")]
    InvalidTransition {
        node: WorkerNode,
        from: TransactionState,
        to: TransactionState,
    },

    #[error("Topology error: {0}")]
    Topology(String),

    #[error("Could not parse worker node line {line}: {reason}")]
    InvalidWorkerFile { line: usize, reason: String },

    #[error("Commit log error: {0}")]
    CommitLog(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoordinatorError {
    /// The worker node this error names, if any
    pub fn node(&self) -> Option<&WorkerNode> {
        match self {
            Self::ConnectionUnavailable { node, .. }
            | Self::RemoteTransactionStartFailed { node, .. }
            | Self::RemoteCommandFailed { node, .. }
            | Self::RemotePrepareFailed { node, .. }
            | Self::RemoteCommitFailed { node, .. }
            | Self::RemoteRollbackFailed { node, .. }
            | Self::InvalidTransition { node, .. } => Some(node),
            _ => None,
        }
    }
}

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;
