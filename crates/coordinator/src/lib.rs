//! Coordinator for transactions spanning remote workers
//!
//! Commands are sent to every worker inside a remote transaction opened on
//! first use. The local transaction's lifecycle events then decide the
//! remote outcome, with one-phase or two-phase commit.
//!
//! ```text
//! caller -> TransactionContext -> dispatcher -> registry -> workers
//! local transaction -> EventSource -> CommitOrchestrator -> registry -> workers
//! ```

pub mod commit_log;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod orchestrator;
pub mod registry;
pub mod topology;
pub mod two_phase;

pub use commit_log::{CommitLog, FileCommitLog, MemoryCommitLog, PreparedTransactionRecord};
pub use config::{CommitProtocol, CoordinatorConfig};
pub use context::{Coordinator, TransactionContext};
pub use error::{CoordinatorError, Result};
pub use handle::{RemoteTransactionHandle, TransactionState};
pub use lifecycle::{EventSource, LocalOutcome, LocalTransaction, Subscription, XactCallback, XactEvent};
pub use orchestrator::CommitOrchestrator;
pub use registry::TransactionRegistry;
pub use topology::{StaticTopology, parse_worker_file};
pub use two_phase::{PreparedTransactions, TwoPhaseCommit};
