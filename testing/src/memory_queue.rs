//! In-memory payload queue with real blocking-pop semantics.

use loomline_core::queue::{PayloadQueue, QueueError};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// In-memory FIFO byte queue for tests.
///
/// Mirrors the production queue contract: tail push for new work, head push
/// for retry priority, bounded blocking pop. `fail_pushes(true)` makes both
/// push ends return [`QueueError::Unreachable`] until switched back —
/// enough to drive the producer hard-stop and dead-letter paths.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    queues: Arc<Mutex<HashMap<String, VecDeque<Vec<u8>>>>>,
    notify: Arc<Notify>,
    push_failure: Arc<AtomicBool>,
}

impl MemoryQueue {
    /// Create an empty queue set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent pushes fail (or succeed again).
    pub fn fail_pushes(&self, fail: bool) {
        self.push_failure.store(fail, Ordering::SeqCst);
    }

    /// Number of buffered payloads in `queue`.
    #[must_use]
    pub fn len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Whether `queue` is empty.
    #[must_use]
    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    /// Snapshot of `queue` contents, head first (for assertions).
    #[must_use]
    pub fn contents(&self, queue: &str) -> Vec<Vec<u8>> {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn try_pop(&self, queue: &str) -> Option<Vec<u8>> {
        self.queues
            .lock()
            .unwrap()
            .get_mut(queue)
            .and_then(VecDeque::pop_front)
    }

    fn check_push(&self) -> Result<(), QueueError> {
        if self.push_failure.load(Ordering::SeqCst) {
            Err(QueueError::Unreachable("push failure (injected)".into()))
        } else {
            Ok(())
        }
    }
}

impl PayloadQueue for MemoryQueue {
    fn push_back(
        &self,
        queue: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        let this = self.clone();
        let queue = queue.to_owned();
        let payload = payload.to_vec();
        Box::pin(async move {
            this.check_push()?;
            this.queues
                .lock()
                .unwrap()
                .entry(queue)
                .or_default()
                .push_back(payload);
            this.notify.notify_waiters();
            Ok(())
        })
    }

    fn push_front(
        &self,
        queue: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        let this = self.clone();
        let queue = queue.to_owned();
        let payload = payload.to_vec();
        Box::pin(async move {
            this.check_push()?;
            this.queues
                .lock()
                .unwrap()
                .entry(queue)
                .or_default()
                .push_front(payload);
            this.notify.notify_waiters();
            Ok(())
        })
    }

    fn pop_front(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, QueueError>> + Send + '_>> {
        let this = self.clone();
        let queue = queue.to_owned();
        Box::pin(async move {
            let deadline = Instant::now() + timeout;
            loop {
                // Register for wakeups before checking, so a push landing
                // between the check and the await still wakes us.
                let notified = this.notify.notified();
                if let Some(item) = this.try_pop(&queue) {
                    return Ok(Some(item));
                }
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                tokio::select! {
                    () = notified => {}
                    () = tokio::time::sleep_until(deadline) => return Ok(None),
                }
            }
        })
    }
}
