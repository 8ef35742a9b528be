//! Registry of fire-and-forget tasks that must finish before the process exits.
//!
//! Webhook deliveries are spawned here so that a notification emitted right
//! before shutdown (e.g. the final `disconnected`) still reaches its endpoint.

// std::sync::Mutex: the lock is never held across .await points.
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{info, warn};

// ============================================================================
// BackgroundTasks
// ============================================================================

/// Tracks spawned tasks so shutdown can await them.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn a task and register its handle.
    ///
    /// Registration happens before this returns, so a task that completes
    /// immediately is still observed by `shutdown()`. Finished handles are
    /// pruned on every call.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);

        let mut handles = self.handles();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Wait for every registered task to complete.
    pub async fn shutdown(&self) {
        let handles = std::mem::take(&mut *self.handles());
        if handles.is_empty() {
            return;
        }

        info!(count = handles.len(), "Waiting for background deliveries");

        for (i, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                warn!(task = i, error = %e, "Background task panicked");
            }
        }

        info!("Background deliveries completed");
    }

    /// Number of tasks still running.
    pub fn pending_count(&self) -> usize {
        let mut handles = self.handles();
        handles.retain(|h| !h.is_finished());
        handles.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_awaits_all_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks = BackgroundTasks::new();

        for delay in [10, 20] {
            let counter = counter.clone();
            tasks.spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        tasks.shutdown().await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(tasks.pending_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_with_no_tasks_returns() {
        BackgroundTasks::new().shutdown().await;
    }

    #[tokio::test]
    async fn panicking_task_does_not_abort_shutdown() {
        let tasks = BackgroundTasks::new();
        tasks.spawn(async { panic!("delivery bug") });
        tasks.spawn(async {});

        tasks.shutdown().await;
        assert_eq!(tasks.pending_count(), 0);
    }
}
