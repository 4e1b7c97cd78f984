//! In-memory mock worker cluster for testing remote worker transactions
//!
//! This crate provides an in-memory implementation of the connection provider
//! and channel contracts. Each mock worker keeps just enough transaction state
//! to tell committed, prepared and rolled back work apart, and supports
//! injected latency and failures.

pub mod channel;
pub mod cluster;
pub mod worker;

pub use channel::MockChannel;
pub use cluster::MockCluster;
pub use worker::MockWorker;
