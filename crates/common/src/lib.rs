//! Common types for remote worker transactions
//!
//! This crate defines:
//! - Worker node identities as reported by a topology provider
//! - Command results and remote errors returned by worker channels
//! - The channel, connection provider and topology provider contracts
//! - Distributed transaction IDs (UUIDv7-based)

mod channel;
mod node;
mod response;
mod transaction_id;

pub use channel::{Channel, ChannelError, ConnectionProvider, TopologyProvider};
pub use node::{DEFAULT_WORKER_PORT, WorkerNode};
pub use response::{CommandResult, RemoteError};
pub use transaction_id::DistributedTransactionId;
