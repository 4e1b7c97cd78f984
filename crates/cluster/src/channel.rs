//! Mock channel to a worker
//!
//! Each channel owns a backend task that plays the role of the worker-side
//! session. Commands are processed in submission order; every result is
//! followed by an idle marker, as on the real wire.

use crate::worker::{MockWorker, Session};
use async_trait::async_trait;
use remote_txn_common::{Channel, ChannelError, CommandResult, WorkerNode};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Channel to one mock worker session
pub struct MockChannel {
    /// Worker this channel talks to
    worker: Arc<MockWorker>,

    /// Command sender to the backend task, `None` once closed
    commands: Option<mpsc::UnboundedSender<String>>,

    /// Results and idle markers from the backend task
    results: mpsc::UnboundedReceiver<Option<CommandResult>>,

    /// Results and idle markers not yet drained
    outstanding: usize,
}

impl MockChannel {
    /// Open a new session against the worker
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(worker: Arc<MockWorker>) -> Self {
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<String>();
        let (result_tx, result_rx) = mpsc::unbounded_channel();

        worker.connect();

        let backend = worker.clone();
        tokio::spawn(async move {
            let mut session = Session::default();

            while let Some(command) = command_rx.recv().await {
                let latency = backend.latency();
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }

                let result = backend.apply(&mut session, &command);
                if result_tx.send(Some(result)).is_err() {
                    break;
                }
                let _ = result_tx.send(None);
            }

            backend.disconnect(&mut session);
        });

        Self {
            worker,
            commands: Some(command_tx),
            results: result_rx,
            outstanding: 0,
        }
    }

    /// Node identity of the worker behind this channel
    pub fn node(&self) -> &WorkerNode {
        self.worker.node()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn send(&mut self, command: &str) -> Result<(), ChannelError> {
        let commands = self.commands.as_ref().ok_or(ChannelError::Closed)?;

        if self.worker.submissions_fail() {
            return Err(ChannelError::SendFailed(format!(
                "connection to {} is not writable",
                self.worker.node()
            )));
        }

        commands
            .send(command.to_string())
            .map_err(|_| ChannelError::Closed)?;

        // One result plus the idle marker
        self.outstanding += 2;
        Ok(())
    }

    async fn next_result(&mut self) -> Option<CommandResult> {
        if self.outstanding == 0 {
            return None;
        }

        match self.results.recv().await {
            Some(item) => {
                self.outstanding -= 1;
                item
            }
            None => {
                self.outstanding = 0;
                None
            }
        }
    }

    async fn close(&mut self) {
        self.commands = None;
        self.outstanding = 0;
    }
}
