//! Coordinator configuration

use crate::error::{CoordinatorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Environment variable selecting the commit protocol
pub const COMMIT_PROTOCOL_ENV: &str = "REMOTE_TXN_COMMIT_PROTOCOL";

/// Environment variable naming this coordinator
pub const COORDINATOR_ID_ENV: &str = "REMOTE_TXN_COORDINATOR_ID";

/// Atomic commit protocol used for worker transactions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitProtocol {
    /// COMMIT directly on every worker
    #[default]
    OnePhase,
    /// PREPARE on every worker before the local commit, COMMIT PREPARED after
    TwoPhase,
}

impl FromStr for CommitProtocol {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1pc" | "one_phase" | "one-phase" => Ok(Self::OnePhase),
            "2pc" | "two_phase" | "two-phase" => Ok(Self::TwoPhase),
            other => Err(CoordinatorError::Config(format!(
                "unknown commit protocol \"{}\"",
                other
            ))),
        }
    }
}

impl fmt::Display for CommitProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnePhase => write!(f, "1pc"),
            Self::TwoPhase => write!(f, "2pc"),
        }
    }
}

/// Configuration for the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Identifier recorded with prepared transactions
    pub coordinator_id: String,

    /// Commit protocol, read when the local transaction is about to commit
    pub commit_protocol: CommitProtocol,

    /// Prefix for prepared transaction names
    pub prepared_name_prefix: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            coordinator_id: "coordinator".to_string(),
            commit_protocol: CommitProtocol::OnePhase,
            prepared_name_prefix: "rtx".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Create a new config with the given coordinator ID
    pub fn new(coordinator_id: impl Into<String>) -> Self {
        Self {
            coordinator_id: coordinator_id.into(),
            ..Default::default()
        }
    }

    /// Set commit protocol
    pub fn with_commit_protocol(mut self, protocol: CommitProtocol) -> Self {
        self.commit_protocol = protocol;
        self
    }

    /// Set prepared transaction name prefix
    pub fn with_prepared_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prepared_name_prefix = prefix.into();
        self
    }

    /// Parse a config from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(id) = lookup(COORDINATOR_ID_ENV) {
            config.coordinator_id = id;
        }
        if let Some(protocol) = lookup(COMMIT_PROTOCOL_ENV) {
            config.commit_protocol = protocol.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the prepared name prefix is a usable identifier
    pub fn validate(&self) -> Result<()> {
        let prefix = &self.prepared_name_prefix;
        if prefix.is_empty()
            || !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(CoordinatorError::Config(format!(
                "prepared name prefix \"{}\" must be a non-empty identifier",
                prefix
            )));
        }
        Ok(())
    }
}
