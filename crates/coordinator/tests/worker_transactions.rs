//! Worker transactions driven through local transaction lifecycle events

use remote_txn_cluster::MockCluster;
use remote_txn_coordinator::{
    CommitLog, CommitProtocol, Coordinator, CoordinatorConfig, CoordinatorError, EventSource,
    FileCommitLog, LocalOutcome, LocalTransaction, StaticTopology, TransactionState,
};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct Harness {
    cluster: Arc<MockCluster>,
    topology: Arc<StaticTopology>,
    coordinator: Coordinator,
    events: Arc<EventSource>,
}

impl Harness {
    fn new(workers: usize, protocol: CommitProtocol) -> Self {
        init_tracing();

        let cluster = Arc::new(MockCluster::new());
        let topology = Arc::new(StaticTopology::default());
        for i in 1..=workers {
            cluster.add_worker(&format!("worker-{}", i), 5432);
            topology.add_node(&format!("worker-{}", i), 5432);
        }

        let config = CoordinatorConfig::new("test-coordinator").with_commit_protocol(protocol);
        let coordinator =
            Coordinator::new(config, topology.clone(), cluster.clone()).unwrap();

        Self {
            cluster,
            topology,
            coordinator,
            events: Arc::new(EventSource::new()),
        }
    }

    fn local(&self) -> LocalTransaction {
        LocalTransaction::begin(self.events.clone())
    }
}

#[tokio::test]
async fn test_handles_are_reused_within_a_transaction() {
    let h = Harness::new(3, CommitProtocol::OnePhase);
    let ctx = h.coordinator.context(h.events.clone());

    ctx.send_command_ordered("CREATE TABLE t (a int)").await.unwrap();
    let id = ctx.transaction_id().await;
    ctx.send_command_ordered("INSERT INTO t VALUES (1)").await.unwrap();
    ctx.send_command_parallel("INSERT INTO t VALUES (2)").await.unwrap();

    assert_eq!(ctx.transaction_id().await, id);
    for worker in h.cluster.workers() {
        assert_eq!(worker.count_received("BEGIN"), 1);
        assert_eq!(worker.connections_opened(), 1);
    }
}

#[tokio::test]
async fn test_cardinality_change_reopens_every_worker() {
    let h = Harness::new(3, CommitProtocol::OnePhase);
    let ctx = h.coordinator.context(h.events.clone());

    ctx.send_command_ordered("INSERT INTO t VALUES (1)").await.unwrap();

    let added = h.cluster.add_worker("worker-4", 5432);
    h.topology.add_node("worker-4", 5432);

    ctx.send_command_ordered("INSERT INTO t VALUES (2)").await.unwrap();
    assert_eq!(ctx.len().await, 4);
    assert_eq!(added.count_received("BEGIN"), 1);

    h.local().commit().await.unwrap();

    // Work sent on the discarded sessions never became durable
    for worker in h.cluster.workers().iter().take(3) {
        assert_eq!(worker.count_received("BEGIN"), 2);
        assert_eq!(worker.connections_opened(), 2);
        assert_eq!(worker.committed(), vec!["INSERT INTO t VALUES (2)".to_string()]);
    }
}

#[tokio::test]
async fn test_ordered_stops_at_first_failing_worker() {
    let h = Harness::new(3, CommitProtocol::OnePhase);
    let ctx = h.coordinator.context(h.events.clone());
    let workers = h.cluster.workers();
    workers[1].fail_on("CREATE");

    let err = ctx
        .send_command_ordered("CREATE TABLE t (a int)")
        .await
        .unwrap_err();

    match err {
        CoordinatorError::RemoteCommandFailed { node, command, reason } => {
            assert_eq!(node.host, "worker-2");
            assert_eq!(command, "CREATE TABLE t (a int)");
            assert!(reason.contains("XX000"), "{reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(workers[0].count_received("CREATE"), 1);
    assert_eq!(workers[2].count_received("CREATE"), 0);

    h.local().abort().await.unwrap();
    for worker in &workers {
        assert_eq!(worker.count_received("ROLLBACK"), 1);
        assert!(worker.committed().is_empty());
    }
}

#[tokio::test]
async fn test_parallel_failure_still_reaches_every_worker() {
    let h = Harness::new(3, CommitProtocol::OnePhase);
    let ctx = h.coordinator.context(h.events.clone());
    let workers = h.cluster.workers();
    workers[0].fail_on("INSERT");

    let err = ctx
        .send_command_parallel("INSERT INTO t VALUES (1)")
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        CoordinatorError::RemoteCommandFailed { node, .. } if node.host == "worker-1"
    ));
    for worker in &workers {
        assert_eq!(worker.count_received("INSERT"), 1);
    }

    // Channels are idle again, so the next result belongs to the next command
    workers[0].clear_failures();
    let err = ctx.send_command_parallel("SELECT 1").await.unwrap_err();
    match err {
        CoordinatorError::RemoteCommandFailed { node, command, reason } => {
            assert_eq!(node.host, "worker-1");
            assert_eq!(command, "SELECT 1");
            assert!(reason.contains("25P02"), "{reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(workers[2].count_received("SELECT"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_latency_is_bounded_by_slowest_worker() {
    let h = Harness::new(4, CommitProtocol::OnePhase);
    let ctx = h.coordinator.context(h.events.clone());
    let latency = Duration::from_millis(100);
    for worker in h.cluster.workers() {
        worker.set_latency(latency);
    }

    // Open the worker transactions first
    ctx.send_command_parallel("SELECT 1").await.unwrap();

    let start = tokio::time::Instant::now();
    ctx.send_command_parallel("UPDATE t SET a = a + 1").await.unwrap();
    let parallel = start.elapsed();

    let start = tokio::time::Instant::now();
    ctx.send_command_ordered("UPDATE t SET a = a + 1").await.unwrap();
    let ordered = start.elapsed();

    assert!(parallel >= latency);
    assert!(parallel < latency * 2, "parallel took {parallel:?}");
    assert!(ordered >= latency * 4, "ordered took {ordered:?}");
}

#[tokio::test]
async fn test_one_phase_commit_never_prepares() {
    let h = Harness::new(3, CommitProtocol::OnePhase);
    let ctx = h.coordinator.context(h.events.clone());

    ctx.send_command_ordered("CREATE TABLE t (a int)").await.unwrap();
    let outcome = h.local().commit().await.unwrap();

    assert_eq!(outcome, LocalOutcome::Committed);
    for worker in h.cluster.workers() {
        assert_eq!(worker.count_received("PREPARE"), 0);
        assert_eq!(worker.count_received("COMMIT"), 1);
        assert_eq!(worker.committed(), vec!["CREATE TABLE t (a int)".to_string()]);
    }
    assert!(ctx.is_empty().await);
    assert!(h.coordinator.commit_log().records().unwrap().is_empty());
}

#[tokio::test]
async fn test_prepare_failure_prevents_local_commit() {
    let h = Harness::new(3, CommitProtocol::TwoPhase);
    let ctx = h.coordinator.context(h.events.clone());
    let workers = h.cluster.workers();
    workers[1].fail_on("PREPARE");

    ctx.send_command_ordered("INSERT INTO t VALUES (1)").await.unwrap();
    let err = h.local().commit().await.unwrap_err();

    assert!(matches!(
        &err,
        CoordinatorError::RemotePrepareFailed { node, .. } if node.host == "worker-2"
    ));
    assert_eq!(workers[0].count_received("ROLLBACK PREPARED"), 1);
    assert_eq!(workers[1].count_received("ROLLBACK"), 1);
    assert_eq!(workers[2].count_received("PREPARE"), 0);
    assert_eq!(workers[2].count_received("ROLLBACK"), 1);
    for worker in &workers {
        assert!(worker.committed().is_empty());
        assert!(worker.prepared().is_empty());
        assert_eq!(worker.count_received("COMMIT"), 0);
    }
    assert!(ctx.is_empty().await);
}

#[tokio::test]
async fn test_registry_is_emptied_after_every_outcome() {
    let h = Harness::new(2, CommitProtocol::TwoPhase);
    let ctx = h.coordinator.context(h.events.clone());

    ctx.send_command_ordered("INSERT INTO t VALUES (1)").await.unwrap();
    let first = ctx.transaction_id().await.unwrap();
    h.local().commit().await.unwrap();
    assert!(ctx.is_empty().await);
    assert!(ctx.transaction_id().await.is_none());

    ctx.send_command_ordered("INSERT INTO t VALUES (2)").await.unwrap();
    let second = ctx.transaction_id().await.unwrap();
    assert_ne!(first, second);
    assert!(
        ctx.handle_states()
            .await
            .iter()
            .all(|(_, state)| *state == TransactionState::Open)
    );
    h.local().abort().await.unwrap();
    assert!(ctx.is_empty().await);

    for worker in h.cluster.workers() {
        assert_eq!(worker.count_received("BEGIN"), 2);
        assert_eq!(worker.committed(), vec!["INSERT INTO t VALUES (1)".to_string()]);
        // Completed sessions were handed back and reused
        assert_eq!(worker.connections_opened(), 1);
    }
}

#[tokio::test]
async fn test_one_phase_create_table_on_three_workers() {
    let h = Harness::new(3, CommitProtocol::OnePhase);
    let ctx = h.coordinator.context(h.events.clone());

    ctx.send_command_ordered("CREATE TABLE t (a int)").await.unwrap();
    h.local().commit().await.unwrap();

    for worker in h.cluster.workers() {
        assert_eq!(
            worker.received(),
            vec!["BEGIN", "CREATE TABLE t (a int)", "COMMIT"]
        );
        assert!(!worker.in_transaction());
    }
    assert!(ctx.is_empty().await);
    assert!(ctx.take_completion_failures().is_empty());
}

#[tokio::test]
async fn test_start_failure_names_worker_and_is_not_reused() {
    let h = Harness::new(3, CommitProtocol::OnePhase);
    let ctx = h.coordinator.context(h.events.clone());
    let workers = h.cluster.workers();
    workers[1].fail_on("BEGIN");

    let err = ctx
        .send_command_ordered("CREATE TABLE t (a int)")
        .await
        .unwrap_err();
    match err {
        CoordinatorError::RemoteTransactionStartFailed { node, .. } => {
            assert_eq!(node.host, "worker-2");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(workers[2].received().is_empty());
    assert_eq!(workers[0].count_received("CREATE"), 0);

    // The caller's abort still reaches the worker that did begin
    h.local().abort().await.unwrap();
    assert_eq!(workers[0].count_received("ROLLBACK"), 1);
    assert!(ctx.is_empty().await);

    workers[1].clear_failures();
    ctx.send_command_ordered("CREATE TABLE t (a int)").await.unwrap();
    assert_eq!(ctx.len().await, 3);
    assert_eq!(workers[0].count_received("BEGIN"), 2);
}

#[tokio::test]
async fn test_first_worker_begin_failure_gets_a_fresh_transaction_id() {
    let h = Harness::new(2, CommitProtocol::TwoPhase);
    let ctx = h.coordinator.context(h.events.clone());
    let workers = h.cluster.workers();
    workers[0].fail_on("BEGIN");

    let err = ctx.send_command_ordered("SELECT 1").await.unwrap_err();
    assert!(matches!(
        &err,
        CoordinatorError::RemoteTransactionStartFailed { node, .. } if node.host == "worker-1"
    ));
    assert!(ctx.is_empty().await);
    let failed = ctx.transaction_id().await.unwrap();

    h.local().abort().await.unwrap();
    assert!(ctx.transaction_id().await.is_none());
    assert!(workers[1].received().is_empty());

    workers[0].clear_failures();
    ctx.send_command_ordered("SELECT 1").await.unwrap();
    let next = ctx.transaction_id().await.unwrap();
    assert_ne!(failed, next);
    h.local().commit().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_first_worker_blocks_local_commit() {
    let h = Harness::new(2, CommitProtocol::OnePhase);
    let ctx = h.coordinator.context(h.events.clone());
    let workers = h.cluster.workers();
    workers[0].set_reachable(false);

    assert!(ctx.send_command_parallel("INSERT INTO t VALUES (1)").await.is_err());

    // Committing anyway must not succeed
    let err = h.local().commit().await.unwrap_err();
    assert!(matches!(
        &err,
        CoordinatorError::RemoteTransactionStartFailed { node, .. } if node.host == "worker-1"
    ));
    assert!(ctx.transaction_id().await.is_none());
    assert!(workers[1].received().is_empty());
}

#[tokio::test]
async fn test_prepare_failure_rolls_back_prepared_and_open_workers() {
    let h = Harness::new(2, CommitProtocol::TwoPhase);
    let ctx = h.coordinator.context(h.events.clone());
    let workers = h.cluster.workers();
    workers[1].fail_on("PREPARE");

    ctx.send_command_parallel("INSERT INTO t VALUES (1)").await.unwrap();
    assert!(h.local().commit().await.is_err());

    assert_eq!(workers[0].count_received("PREPARE TRANSACTION"), 1);
    assert_eq!(workers[0].count_received("ROLLBACK PREPARED"), 1);
    assert_eq!(workers[1].count_received("ROLLBACK"), 1);
    for worker in &workers {
        assert!(worker.prepared().is_empty());
        assert!(worker.committed().is_empty());
    }
    assert!(ctx.take_completion_failures().is_empty());
}

#[tokio::test]
async fn test_protocol_change_applies_at_pre_commit() {
    let h = Harness::new(2, CommitProtocol::OnePhase);
    let ctx = h.coordinator.context(h.events.clone());

    ctx.send_command_ordered("INSERT INTO t VALUES (1)").await.unwrap();
    h.coordinator.set_commit_protocol(CommitProtocol::TwoPhase);
    h.local().commit().await.unwrap();

    for worker in h.cluster.workers() {
        assert_eq!(worker.count_received("PREPARE TRANSACTION"), 1);
        assert_eq!(worker.count_received("COMMIT PREPARED"), 1);
    }
    assert_eq!(h.coordinator.config().commit_protocol, CommitProtocol::TwoPhase);
}

#[tokio::test]
async fn test_failed_commit_prepared_is_left_in_doubt() {
    let h = Harness::new(2, CommitProtocol::TwoPhase);
    let ctx = h.coordinator.context(h.events.clone());
    let workers = h.cluster.workers();
    workers[1].fail_on("COMMIT PREPARED");

    ctx.send_command_ordered("INSERT INTO t VALUES (1)").await.unwrap();
    let outcome = h.local().commit().await.unwrap();
    assert_eq!(outcome, LocalOutcome::Committed);

    let failures = ctx.take_completion_failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        &failures[0],
        CoordinatorError::RemoteCommitFailed { node, .. } if node.host == "worker-2"
    ));

    assert_eq!(workers[0].committed().len(), 1);
    let in_doubt = workers[1].prepared();
    assert_eq!(in_doubt.len(), 1);

    // The record lets a resolver commit the in-doubt transaction
    let records = h.coordinator.commit_log().records().unwrap();
    assert!(records.iter().any(|r| r.gid == in_doubt[0]));
    assert!(ctx.is_empty().await);
}

#[tokio::test]
async fn test_prepared_transactions_are_logged_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prepared.log");
    let h = Harness::new(2, CommitProtocol::TwoPhase);
    let coordinator = Coordinator::new(
        CoordinatorConfig::new("file-coordinator")
            .with_commit_protocol(CommitProtocol::TwoPhase)
            .with_prepared_name_prefix("citus"),
        h.topology.clone(),
        h.cluster.clone(),
    )
    .unwrap()
    .with_commit_log(Arc::new(FileCommitLog::open(&path).unwrap()));
    let ctx = coordinator.context(h.events.clone());

    ctx.send_command_ordered("INSERT INTO t VALUES (1)").await.unwrap();
    let id = ctx.transaction_id().await.unwrap();
    h.local().commit().await.unwrap();

    let records = FileCommitLog::open(&path).unwrap().read_all().unwrap();
    assert_eq!(records.len(), 2);
    for (group, record) in records.iter().enumerate() {
        assert_eq!(record.coordinator_id, "file-coordinator");
        assert_eq!(record.transaction_id, id);
        assert_eq!(record.gid, id.prepared_name("citus", group as u32));
    }
}

#[tokio::test]
async fn test_subscription_is_idempotent_and_dropped_with_context() {
    let h = Harness::new(2, CommitProtocol::OnePhase);
    let ctx = h.coordinator.context(h.events.clone());

    // Subscribing before any worker transaction exists is harmless
    let token = ctx.subscribe();
    h.local().commit().await.unwrap();
    assert!(h.cluster.workers().iter().all(|w| w.received().is_empty()));

    ctx.send_command_ordered("SELECT 1").await.unwrap();
    ctx.send_command_parallel("SELECT 2").await.unwrap();
    assert_eq!(ctx.subscribe(), token);
    assert_eq!(h.events.subscriber_count(), 1);

    drop(ctx);
    assert_eq!(h.events.subscriber_count(), 0);
}

#[tokio::test]
async fn test_contexts_on_separate_event_sources_are_isolated() {
    let h = Harness::new(2, CommitProtocol::OnePhase);
    let other_events = Arc::new(EventSource::new());
    let first = h.coordinator.context(h.events.clone());
    let second = h.coordinator.context(other_events.clone());

    first.send_command_ordered("INSERT INTO t VALUES (1)").await.unwrap();
    second.send_command_ordered("INSERT INTO t VALUES (2)").await.unwrap();

    LocalTransaction::begin(other_events).abort().await.unwrap();
    assert!(second.is_empty().await);
    assert_eq!(first.len().await, 2);

    h.local().commit().await.unwrap();
    for worker in h.cluster.workers() {
        assert_eq!(worker.committed(), vec!["INSERT INTO t VALUES (1)".to_string()]);
    }
}

#[tokio::test]
async fn test_empty_command_is_rejected_before_opening_workers() {
    let h = Harness::new(2, CommitProtocol::OnePhase);
    let ctx = h.coordinator.context(h.events.clone());

    assert!(matches!(
        ctx.send_command_ordered("  ").await,
        Err(CoordinatorError::EmptyCommand)
    ));
    assert!(matches!(
        ctx.send_command_parallel("").await,
        Err(CoordinatorError::EmptyCommand)
    ));
    assert!(ctx.is_empty().await);
    assert!(!ctx.is_subscribed());
}
