//! Example running one transaction across three workers with two-phase commit
//!
//! The workers are in-memory mocks with some network latency. The local
//! transaction first commits cleanly, then a second one fails to prepare on
//! one worker and is rolled back everywhere.
//!
//! Run with: cargo run --example worker_transaction

use remote_txn_cluster::MockCluster;
use remote_txn_coordinator::{
    CommitLog, CommitProtocol, Coordinator, CoordinatorConfig, EventSource, LocalTransaction,
    StaticTopology,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remote_txn_coordinator=debug".into()),
        )
        .init();

    println!("=== Worker Transaction Example ===\n");

    // 1. Start three mock workers and list them in the topology
    let cluster = Arc::new(MockCluster::new());
    let topology = Arc::new(StaticTopology::default());
    for host in ["worker-1", "worker-2", "worker-3"] {
        let worker = cluster.add_worker(host, 5432);
        worker.set_latency(Duration::from_millis(20));
        topology.add_node(host, 5432);
    }
    println!("✓ Started {} workers", cluster.workers().len());

    // 2. Create the coordinator and a context for this session
    let config = CoordinatorConfig::new("example").with_commit_protocol(CommitProtocol::TwoPhase);
    let coordinator = Coordinator::new(config, topology.clone(), cluster.clone())?;
    let events = Arc::new(EventSource::new());
    let ctx = coordinator.context(events.clone());
    println!("✓ Coordinator using {} commit", coordinator.config().commit_protocol);

    // 3. Run DDL in order, then data changes in parallel
    let local = LocalTransaction::begin(events.clone());
    ctx.send_command_ordered("CREATE TABLE accounts (id int, balance int)")
        .await?;
    ctx.send_command_parallel("INSERT INTO accounts VALUES (1, 100)")
        .await?;
    println!(
        "✓ Transaction {} open on {} workers",
        ctx.transaction_id().await.unwrap_or_default(),
        ctx.len().await
    );

    local.commit().await?;
    for worker in cluster.workers() {
        println!("  [{}] committed {:?}", worker.node(), worker.committed());
    }
    for record in coordinator.commit_log().records()? {
        println!("  [log] {} on {}", record.gid, record.node);
    }

    // 4. A prepare failure on one worker aborts the whole transaction
    cluster.workers()[1].fail_on("PREPARE");
    let local = LocalTransaction::begin(events.clone());
    ctx.send_command_parallel("UPDATE accounts SET balance = 0")
        .await?;

    match local.commit().await {
        Ok(outcome) => println!("✗ Unexpected outcome {:?}", outcome),
        Err(e) => println!("✓ Local transaction aborted: {}", e),
    }
    for worker in cluster.workers() {
        println!(
            "  [{}] prepared {:?}, committed {} commands",
            worker.node(),
            worker.prepared(),
            worker.committed().len()
        );
    }

    println!("\n=== Example completed ===");
    Ok(())
}
