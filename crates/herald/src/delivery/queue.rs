//! Backlog, batching, and retry for outbound messages.

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
// std::sync::Mutex: enqueue/stats/clear are synchronous and the lock is never
// held across an .await.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use super::error::{DeliveryError, TransportError};
use super::sender::MessageSender;

// ============================================================================
// Policy
// ============================================================================

/// Retry and pacing policy, fixed for the life of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per item. Zero is treated as one.
    pub max_retries: u32,
    /// Pause before a failed item goes back to the front of the backlog.
    pub retry_delay: Duration,
    /// Pause after every batch.
    pub inter_batch_delay: Duration,
    /// Items dispatched concurrently per batch. Zero is treated as one.
    pub concurrency: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(2000),
            inter_batch_delay: Duration::from_millis(1000),
            concurrency: 1,
        }
    }
}

impl RetryPolicy {
    fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    fn batch_size(&self) -> usize {
        self.concurrency.max(1)
    }
}

// ============================================================================
// Payload and results
// ============================================================================

/// Priority hint. Advisory only: the backlog stays FIFO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePayload {
    pub recipient: String,
    pub content: String,
    pub priority: Priority,
}

impl MessagePayload {
    pub fn new(recipient: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            content: content.into(),
            priority: Priority::default(),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// A successfully delivered item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub item_id: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub attempts: u32,
}

type DeliveryResult = Result<Delivery, DeliveryError>;

struct QueueItem {
    id: String,
    payload: MessagePayload,
    attempts: u32,
    enqueued_at: DateTime<Utc>,
    result_tx: oneshot::Sender<DeliveryResult>,
}

/// Caller's handle to the eventual outcome of one queued message.
///
/// Resolves exactly once. If the item is cleared from the backlog before it
/// is sent, resolves to [`DeliveryError::Discarded`].
#[derive(Debug)]
pub struct DeliveryHandle {
    id: String,
    rx: oneshot::Receiver<DeliveryResult>,
}

impl DeliveryHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for DeliveryHandle {
    type Output = DeliveryResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(DeliveryError::Discarded)))
    }
}

// ============================================================================
// Stats
// ============================================================================

/// Point-in-time queue statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Items waiting in the backlog.
    pub queued: usize,
    /// Items currently dispatched to the sender (including retry waits).
    pub in_flight: usize,
    pub sent_total: u64,
    pub failed_total: u64,
    /// Items ever enqueued.
    pub queued_total: u64,
    pub is_processing: bool,
}

// ============================================================================
// DeliveryQueue
// ============================================================================

#[derive(Default)]
struct QueueState {
    backlog: VecDeque<QueueItem>,
    in_flight: usize,
    sent_total: u64,
    failed_total: u64,
    queued_total: u64,
    processing: bool,
}

struct QueueInner {
    sender: Arc<dyn MessageSender>,
    policy: RetryPolicy,
    state: Mutex<QueueState>,
}

/// FIFO delivery queue with bounded batches and per-item retries.
///
/// At most one processing loop runs at a time; it is started by `enqueue`
/// when idle and exits once the backlog is empty. Cheap to clone.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<QueueInner>,
}

impl DeliveryQueue {
    pub fn new(sender: Arc<dyn MessageSender>, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                sender,
                policy,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message to the backlog and start processing if idle.
    ///
    /// Never waits; must be called from within a tokio runtime.
    pub fn enqueue(&self, payload: MessagePayload) -> DeliveryHandle {
        let (result_tx, rx) = oneshot::channel();
        let id = Ulid::new().to_string();

        let start = {
            let mut state = self.state();
            state.backlog.push_back(QueueItem {
                id: id.clone(),
                payload,
                attempts: 0,
                enqueued_at: Utc::now(),
                result_tx,
            });
            state.queued_total += 1;
            debug!(item_id = %id, backlog = state.backlog.len(), "Message enqueued");
            !std::mem::replace(&mut state.processing, true)
        };

        if start {
            let queue = self.clone();
            tokio::spawn(async move { queue.process().await });
        }

        DeliveryHandle { id, rx }
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state();
        QueueStats {
            queued: state.backlog.len(),
            in_flight: state.in_flight,
            sent_total: state.sent_total,
            failed_total: state.failed_total,
            queued_total: state.queued_total,
            is_processing: state.processing,
        }
    }

    /// Discard every item not yet dispatched. Returns how many were removed.
    ///
    /// Items already handed to the sender are unaffected.
    pub fn clear(&self) -> usize {
        let discarded: Vec<QueueItem> = self.state().backlog.drain(..).collect();
        let count = discarded.len();
        info!(count, "Delivery backlog cleared");
        // Dropping the items resolves their handles as discarded.
        drop(discarded);
        count
    }

    // ------------------------------------------------------------------------
    // Processing loop
    // ------------------------------------------------------------------------

    async fn process(self) {
        let policy = self.inner.policy;
        loop {
            let batch: Vec<QueueItem> = {
                let mut state = self.state();
                if state.backlog.is_empty() {
                    state.processing = false;
                    debug!("Delivery backlog drained");
                    return;
                }
                let size = policy.batch_size().min(state.backlog.len());
                let batch: Vec<_> = state.backlog.drain(..size).collect();
                state.in_flight += batch.len();
                batch
            };

            debug!(batch_size = batch.len(), "Dispatching delivery batch");
            join_all(batch.into_iter().map(|item| self.deliver(item))).await;

            if !policy.inter_batch_delay.is_zero() {
                tokio::time::sleep(policy.inter_batch_delay).await;
            }
        }
    }

    async fn deliver(&self, mut item: QueueItem) {
        let policy = &self.inner.policy;
        // A panicking sender counts as a failed attempt; it must not take the
        // processing loop down with it.
        let result = AssertUnwindSafe(
            self.inner
                .sender
                .send(&item.payload.recipient, &item.payload.content),
        )
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(TransportError::Panicked(panic_message(panic.as_ref()))));
        item.attempts += 1;

        match result {
            Ok(receipt) => {
                {
                    let mut state = self.state();
                    state.in_flight -= 1;
                    state.sent_total += 1;
                }
                let waited = Utc::now() - item.enqueued_at;
                info!(
                    item_id = %item.id,
                    message_id = %receipt.message_id,
                    attempts = item.attempts,
                    waited_ms = waited.num_milliseconds(),
                    "Message delivered"
                );
                let _ = item.result_tx.send(Ok(Delivery {
                    item_id: item.id,
                    message_id: receipt.message_id,
                    timestamp: receipt.timestamp,
                    attempts: item.attempts,
                }));
            }
            Err(err) if item.attempts < policy.max_attempts() => {
                warn!(
                    item_id = %item.id,
                    attempts = item.attempts,
                    max_attempts = policy.max_attempts(),
                    error = %err,
                    "Delivery attempt failed, will retry"
                );
                tokio::time::sleep(policy.retry_delay).await;

                let mut state = self.state();
                state.in_flight -= 1;
                state.backlog.push_front(item);
            }
            Err(err) => {
                {
                    let mut state = self.state();
                    state.in_flight -= 1;
                    state.failed_total += 1;
                }
                error!(
                    item_id = %item.id,
                    attempts = item.attempts,
                    error = %err,
                    "Delivery failed permanently"
                );
                let _ = item.result_tx.send(Err(DeliveryError::Failed {
                    attempts: item.attempts,
                    last_error: err,
                }));
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
