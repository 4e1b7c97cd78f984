//! Distributed transaction identifier using UUIDv7
//!
//! One identifier is assigned per local transaction that opens worker
//! transactions. It names the prepared transactions left on workers, so an
//! out-of-band resolver can match them against the coordinator's records.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier for the worker transactions of one local transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistributedTransactionId(Uuid);

impl DistributedTransactionId {
    /// Assign an id to a local transaction that is about to open workers
    ///
    /// UUIDv7 ids sort by creation time, so records of older in-doubt
    /// transactions come first.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Rebuild the id recorded for a prepared transaction
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// UUID embedded in prepared transaction names
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Read an id back from a commit log entry or an operator command
    pub fn parse(s: &str) -> Result<Self, String> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| format!("invalid distributed transaction id \"{}\": {}", s, e))
    }

    /// Name of the prepared transaction for this ID on a worker group
    ///
    /// Uses the hyphen-free UUID form so the name is a plain identifier.
    pub fn prepared_name(&self, prefix: &str, group_id: u32) -> String {
        format!("{}_{}_{}", prefix, self.0.simple(), group_id)
    }
}

impl Default for DistributedTransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DistributedTransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
