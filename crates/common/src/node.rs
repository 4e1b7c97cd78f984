//! Worker node identity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Port used when a worker is listed without one
pub const DEFAULT_WORKER_PORT: u16 = 5432;

/// A worker node as reported by the topology provider
///
/// Identity is the `(host, port)` pair. The group id and activity flag are
/// metadata and do not take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerNode {
    /// Host name or address of the worker
    pub host: String,

    /// Port the worker listens on
    pub port: u16,

    /// Group the worker belongs to
    #[serde(rename = "group")]
    pub group_id: u32,

    /// Whether the worker takes part in new transactions
    pub active: bool,
}

impl WorkerNode {
    /// Create an active worker node in group 0
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            group_id: 0,
            active: true,
        }
    }

    /// Set the group id
    pub fn with_group(mut self, group_id: u32) -> Self {
        self.group_id = group_id;
        self
    }

    /// Check whether this node has the given identity
    pub fn is(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }

    /// JSON summary of the node, as reported to operators
    pub fn summary(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl PartialEq for WorkerNode {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for WorkerNode {}

impl std::hash::Hash for WorkerNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for WorkerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
