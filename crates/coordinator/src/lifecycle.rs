//! Local transaction lifecycle events
//!
//! The local transaction manager announces PRE_COMMIT then COMMIT when it
//! commits, or ABORT alone when it rolls back. Callbacks subscribe to an
//! [`EventSource`] and get a [`Subscription`] token back, so every test or
//! embedding can use a private event source.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle event of a local transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XactEvent {
    /// About to commit; a callback error aborts the transaction
    PreCommit,
    /// Committed and durable
    Commit,
    /// Rolled back
    Abort,
    /// About to prepare the local transaction itself
    PrePrepare,
    /// Local transaction prepared
    Prepare,
}

/// Receiver of lifecycle events
#[async_trait]
pub trait XactCallback: Send + Sync {
    /// Handle an event; errors only matter for [`XactEvent::PreCommit`]
    async fn on_event(&self, event: XactEvent) -> Result<()>;
}

/// Token identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

/// Delivers lifecycle events to subscribed callbacks in subscription order
#[derive(Default)]
pub struct EventSource {
    subscribers: Mutex<Vec<(Subscription, Arc<dyn XactCallback>)>>,
    next_id: AtomicU64,
}

impl EventSource {
    /// Create an event source with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a callback
    pub fn subscribe(&self, callback: Arc<dyn XactCallback>) -> Subscription {
        let subscription = Subscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push((subscription, callback));
        subscription
    }

    /// Remove a subscription; returns whether it was present
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(s, _)| *s != subscription);
        subscribers.len() != before
    }

    /// Whether a subscription is active
    pub fn is_subscribed(&self, subscription: Subscription) -> bool {
        self.subscribers.lock().iter().any(|(s, _)| *s == subscription)
    }

    /// Number of active subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver an event to every subscriber
    ///
    /// For PRE_COMMIT the first callback error stops delivery and is returned.
    /// For any other event every subscriber is called and errors are logged.
    pub async fn fire(&self, event: XactEvent) -> Result<()> {
        let callbacks: Vec<_> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in callbacks {
            if let Err(e) = callback.on_event(event).await {
                if event == XactEvent::PreCommit {
                    return Err(e);
                }
                tracing::warn!("{:?} callback failed: {}", event, e);
            }
        }

        Ok(())
    }
}

/// Outcome of a local transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOutcome {
    Committed,
    Aborted,
}

/// Minimal local transaction driving an event source
///
/// Stands in for the host's transaction manager: it only sequences events.
/// Dropping it without calling [`commit`](Self::commit) or
/// [`abort`](Self::abort) delivers nothing.
pub struct LocalTransaction {
    events: Arc<EventSource>,
}

impl LocalTransaction {
    /// Begin a local transaction announcing events on `events`
    pub fn begin(events: Arc<EventSource>) -> Self {
        Self { events }
    }

    /// Commit: PRE_COMMIT then COMMIT, or ABORT if PRE_COMMIT fails
    pub async fn commit(self) -> Result<LocalOutcome> {
        if let Err(e) = self.events.fire(XactEvent::PreCommit).await {
            tracing::debug!("pre-commit failed, aborting local transaction: {}", e);
            self.events.fire(XactEvent::Abort).await?;
            return Err(e);
        }

        self.events.fire(XactEvent::Commit).await?;
        Ok(LocalOutcome::Committed)
    }

    /// Abort: ABORT only
    pub async fn abort(self) -> Result<LocalOutcome> {
        self.events.fire(XactEvent::Abort).await?;
        Ok(LocalOutcome::Aborted)
    }
}
