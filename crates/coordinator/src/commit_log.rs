//! Records of prepared worker transactions
//!
//! Before the local transaction commits under two-phase commit, one record is
//! written per prepared worker transaction. A record means the coordinator
//! decided to commit; a prepared transaction on a worker without a matching
//! record should be rolled back. Resolving them is left to an out-of-band
//! resolver reading these records.

use crate::error::{CoordinatorError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use remote_txn_common::{DistributedTransactionId, WorkerNode};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// One prepared worker transaction the coordinator decided to commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedTransactionRecord {
    /// Name given at PREPARE TRANSACTION
    pub gid: String,

    /// Worker holding the prepared transaction
    pub node: WorkerNode,

    /// Group id of the handle
    pub group_id: u32,

    /// Coordinator that prepared it
    pub coordinator_id: String,

    /// Distributed transaction it belongs to
    pub transaction_id: DistributedTransactionId,

    /// When the record was written
    pub recorded_at: DateTime<Utc>,
}

/// Durable store for prepared transaction records
pub trait CommitLog: Send + Sync {
    /// Record prepared transactions; failure must abort the local transaction
    fn record_prepared(&self, records: &[PreparedTransactionRecord]) -> Result<()>;

    /// All records written so far
    fn records(&self) -> Result<Vec<PreparedTransactionRecord>>;
}

/// In-memory commit log
#[derive(Debug, Default)]
pub struct MemoryCommitLog {
    records: Mutex<Vec<PreparedTransactionRecord>>,
}

impl MemoryCommitLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommitLog for MemoryCommitLog {
    fn record_prepared(&self, records: &[PreparedTransactionRecord]) -> Result<()> {
        self.records.lock().extend_from_slice(records);
        Ok(())
    }

    fn records(&self) -> Result<Vec<PreparedTransactionRecord>> {
        Ok(self.records.lock().clone())
    }
}

/// Append-only JSON-lines commit log
pub struct FileCommitLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileCommitLog {
    /// Open or create a commit log at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CoordinatorError::CommitLog(format!("open {}: {}", path.display(), e)))?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records and sync them to disk
    pub fn append(&self, records: &[PreparedTransactionRecord]) -> Result<()> {
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let mut file = self.file.lock();
        file.write_all(&buf)
            .and_then(|_| file.sync_data())
            .map_err(|e| CoordinatorError::CommitLog(format!("write {}: {}", self.path.display(), e)))
    }

    /// Read every record in the log
    pub fn read_all(&self) -> Result<Vec<PreparedTransactionRecord>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }

        Ok(records)
    }
}

impl CommitLog for FileCommitLog {
    fn record_prepared(&self, records: &[PreparedTransactionRecord]) -> Result<()> {
        self.append(records)
    }

    fn records(&self) -> Result<Vec<PreparedTransactionRecord>> {
        self.read_all()
    }
}
