//! Results returned by worker channels

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error reported by a worker for a single command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Severity, e.g. `ERROR` or `FATAL`
    pub severity: String,

    /// SQLSTATE-style error code
    pub code: String,

    /// Primary error message
    pub message: String,

    /// Optional detail line
    pub detail: Option<String>,
}

impl RemoteError {
    /// Create an `ERROR` severity remote error
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: "ERROR".to_string(),
            code: code.into(),
            message: message.into(),
            detail: None,
        }
    }

    /// Attach a detail line
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.severity, self.message, self.code)?;
        if let Some(detail) = &self.detail {
            write!(f, " DETAIL: {}", detail)?;
        }
        Ok(())
    }
}

/// Outcome of one command on a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandResult {
    /// Command completed; `tag` is the command tag, e.g. `CREATE TABLE`
    Complete { tag: String },

    /// Command failed on the worker
    Error(RemoteError),
}

impl CommandResult {
    /// Successful result with the given command tag
    pub fn complete(tag: impl Into<String>) -> Self {
        Self::Complete { tag: tag.into() }
    }

    /// Whether the command succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    /// The remote error, if the command failed
    pub fn error(&self) -> Option<&RemoteError> {
        match self {
            Self::Error(e) => Some(e),
            Self::Complete { .. } => None,
        }
    }
}
