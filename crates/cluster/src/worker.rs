//! Mock worker node
//!
//! A worker keeps the state shared by all of its sessions: which commands it
//! received, which work became durable, and which transactions sit prepared.
//! Per-session transaction state lives in [`Session`], owned by the backend
//! task of a channel.

use parking_lot::Mutex;
use remote_txn_common::{CommandResult, RemoteError, WorkerNode};
use std::collections::BTreeMap;
use std::time::Duration;

/// Transaction state of one session on a worker
#[derive(Debug, Default)]
pub struct Session {
    /// Inside a BEGIN block
    in_transaction: bool,

    /// A command failed inside the current block
    failed: bool,

    /// Commands waiting for the block to end
    pending: Vec<String>,
}

/// Mutable worker state
#[derive(Debug, Default)]
struct WorkerState {
    /// Every command processed, in arrival order
    received: Vec<String>,

    /// Commands made durable
    committed: Vec<String>,

    /// Prepared transactions by name
    prepared: BTreeMap<String, Vec<String>>,

    /// Command prefixes that fail when executed
    failures: Vec<String>,

    /// Delay applied before each command
    latency: Duration,

    /// Whether the connection provider can reach this worker
    unreachable: bool,

    /// Whether submissions fail before reaching the worker
    fail_submissions: bool,

    /// Number of sessions currently inside a BEGIN block
    open_transactions: usize,

    /// Connections opened against this worker
    connections_opened: usize,

    /// Sessions that ended by disconnect
    disconnects: usize,
}

/// In-memory worker that behaves like a transactional SQL node
#[derive(Debug)]
pub struct MockWorker {
    node: WorkerNode,
    state: Mutex<WorkerState>,
}

impl MockWorker {
    /// Create a new worker for the given node
    pub fn new(node: WorkerNode) -> Self {
        Self {
            node,
            state: Mutex::new(WorkerState::default()),
        }
    }

    /// Node identity of this worker
    pub fn node(&self) -> &WorkerNode {
        &self.node
    }

    /// Fail every command starting with `prefix` (case-insensitive)
    pub fn fail_on(&self, prefix: &str) {
        self.state.lock().failures.push(prefix.to_uppercase());
    }

    /// Remove all injected command failures
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Make submissions fail before they reach the worker
    pub fn fail_submissions(&self, fail: bool) {
        self.state.lock().fail_submissions = fail;
    }

    /// Set the delay applied before each command
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Set whether new connections can be opened
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    /// Every command processed, in arrival order
    pub fn received(&self) -> Vec<String> {
        self.state.lock().received.clone()
    }

    /// Number of processed commands starting with `prefix` (case-insensitive)
    pub fn count_received(&self, prefix: &str) -> usize {
        let prefix = prefix.to_uppercase();
        self.state
            .lock()
            .received
            .iter()
            .filter(|command| command.to_uppercase().starts_with(&prefix))
            .count()
    }

    /// Commands made durable
    pub fn committed(&self) -> Vec<String> {
        self.state.lock().committed.clone()
    }

    /// Names of transactions currently prepared
    pub fn prepared(&self) -> Vec<String> {
        self.state.lock().prepared.keys().cloned().collect()
    }

    /// Whether any session is inside a BEGIN block
    pub fn in_transaction(&self) -> bool {
        self.state.lock().open_transactions > 0
    }

    /// Connections opened against this worker
    pub fn connections_opened(&self) -> usize {
        self.state.lock().connections_opened
    }

    /// Sessions that ended by disconnect
    pub fn disconnects(&self) -> usize {
        self.state.lock().disconnects
    }

    pub(crate) fn latency(&self) -> Duration {
        self.state.lock().latency
    }

    pub(crate) fn is_reachable(&self) -> bool {
        !self.state.lock().unreachable
    }

    pub(crate) fn submissions_fail(&self) -> bool {
        self.state.lock().fail_submissions
    }

    pub(crate) fn connect(&self) {
        self.state.lock().connections_opened += 1;
    }

    /// End a session; an open block is rolled back
    pub(crate) fn disconnect(&self, session: &mut Session) {
        let mut state = self.state.lock();
        if session.in_transaction {
            state.open_transactions -= 1;
            tracing::debug!(
                "worker {} abandoned {} pending commands on disconnect",
                self.node,
                session.pending.len()
            );
        }
        *session = Session::default();
        state.disconnects += 1;
    }

    /// Apply one command to a session
    pub(crate) fn apply(&self, session: &mut Session, command: &str) -> CommandResult {
        let mut state = self.state.lock();
        state.received.push(command.to_string());

        let normalized = command.trim().to_uppercase();

        if state
            .failures
            .iter()
            .any(|prefix| normalized.starts_with(prefix))
        {
            if session.in_transaction {
                session.failed = true;
            }
            return CommandResult::Error(
                RemoteError::new("XX000", format!("injected failure for \"{}\"", command))
                    .with_detail(format!("on worker {}", self.node)),
            );
        }

        if normalized == "BEGIN" {
            if !session.in_transaction {
                session.in_transaction = true;
                state.open_transactions += 1;
            }
            return CommandResult::complete("BEGIN");
        }

        if normalized == "COMMIT" {
            return self.end_block(&mut state, session, true);
        }

        if normalized == "ROLLBACK" {
            return self.end_block(&mut state, session, false);
        }

        if let Some(name) = prepared_name(&normalized, command, "PREPARE TRANSACTION") {
            if !session.in_transaction {
                return CommandResult::Error(RemoteError::new(
                    "25P01",
                    "PREPARE TRANSACTION can only be used in transaction blocks",
                ));
            }
            if session.failed {
                self.end_block(&mut state, session, false);
                return CommandResult::Error(RemoteError::new(
                    "25P02",
                    "current transaction is aborted, prepare rolled back",
                ));
            }
            if state.prepared.contains_key(&name) {
                return CommandResult::Error(RemoteError::new(
                    "42710",
                    format!("transaction identifier \"{}\" is already in use", name),
                ));
            }
            let pending = std::mem::take(&mut session.pending);
            state.prepared.insert(name, pending);
            session.in_transaction = false;
            state.open_transactions -= 1;
            return CommandResult::complete("PREPARE TRANSACTION");
        }

        if let Some(name) = prepared_name(&normalized, command, "COMMIT PREPARED") {
            return match state.prepared.remove(&name) {
                Some(commands) => {
                    state.committed.extend(commands);
                    CommandResult::complete("COMMIT PREPARED")
                }
                None => missing_prepared(&name),
            };
        }

        if let Some(name) = prepared_name(&normalized, command, "ROLLBACK PREPARED") {
            return match state.prepared.remove(&name) {
                Some(_) => CommandResult::complete("ROLLBACK PREPARED"),
                None => missing_prepared(&name),
            };
        }

        if session.in_transaction {
            if session.failed {
                return CommandResult::Error(RemoteError::new(
                    "25P02",
                    "current transaction is aborted, commands ignored until end of transaction block",
                ));
            }
            session.pending.push(command.to_string());
        } else {
            // Autocommit
            state.committed.push(command.to_string());
        }

        CommandResult::complete(command_tag(&normalized))
    }

    fn end_block(&self, state: &mut WorkerState, session: &mut Session, commit: bool) -> CommandResult {
        if !session.in_transaction {
            // Outside a block both are accepted with a warning
            return CommandResult::complete(if commit { "COMMIT" } else { "ROLLBACK" });
        }

        state.open_transactions -= 1;
        let pending = std::mem::take(&mut session.pending);
        let failed = session.failed;
        *session = Session::default();

        if commit && !failed {
            state.committed.extend(pending);
            CommandResult::complete("COMMIT")
        } else {
            CommandResult::complete("ROLLBACK")
        }
    }
}

/// Extract the quoted transaction name after `keyword`, keeping its case
fn prepared_name(normalized: &str, original: &str, keyword: &str) -> Option<String> {
    if !normalized.starts_with(keyword) {
        return None;
    }
    let rest = original.trim()[keyword.len()..].trim();
    Some(rest.trim_matches('\'').to_string())
}

fn missing_prepared(name: &str) -> CommandResult {
    CommandResult::Error(RemoteError::new(
        "42704",
        format!("prepared transaction with identifier \"{}\" does not exist", name),
    ))
}

/// Command tag for a normalized command, e.g. `CREATE TABLE`
fn command_tag(normalized: &str) -> String {
    let mut words = normalized.split_whitespace();
    let first = words.next().unwrap_or_default();
    match first {
        "CREATE" | "DROP" | "ALTER" => match words.next() {
            Some(second) => format!("{} {}", first, second),
            None => first.to_string(),
        },
        _ => first.to_string(),
    }
}
