//! The persistence consumer loop.

use crate::spool::DeadLetterSpool;
use loomline_core::payload::InspectionPayload;
use loomline_core::queue::{INSPECTION_QUEUE, PayloadQueue};
use loomline_core::store::RollStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// What happened to one poll of the queue. Exposed so tests can drive the
/// loop deterministically via [`PersistenceConsumer::poll_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The bounded wait timed out — no work.
    Idle,
    /// A payload was upserted and committed.
    Persisted,
    /// Persistence failed; the payload was re-queued at the head.
    Requeued,
    /// The payload went to the dead-letter spool (malformed bytes, or the
    /// head re-queue itself failed).
    Spooled,
    /// The queue itself failed; nothing was popped.
    QueueError,
}

/// Single long-running consumer draining the inspection queue.
///
/// Create one per deployment, hand it a shutdown receiver, and
/// [`spawn`](Self::spawn) it onto a dedicated task — its blocking pop must
/// never run on a request-serving path.
pub struct PersistenceConsumer {
    queue: Arc<dyn PayloadQueue>,
    store: Arc<dyn RollStore>,
    spool: DeadLetterSpool,
    shutdown: broadcast::Receiver<()>,
    queue_name: String,
    pop_timeout: Duration,
    backoff: Duration,
}

impl PersistenceConsumer {
    /// Create a consumer with the default queue name, a 5 s blocking-pop
    /// window and a 5 s failure backoff.
    #[must_use]
    pub fn new(
        queue: Arc<dyn PayloadQueue>,
        store: Arc<dyn RollStore>,
        spool: DeadLetterSpool,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            queue,
            store,
            spool,
            shutdown,
            queue_name: INSPECTION_QUEUE.to_string(),
            pop_timeout: Duration::from_secs(5),
            backoff: Duration::from_secs(5),
        }
    }

    /// Consume from a different queue name.
    #[must_use]
    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Override the blocking-pop window.
    #[must_use]
    pub const fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    /// Override the post-failure backoff.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Spawn the consumer loop on a dedicated task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run until a shutdown signal arrives.
    ///
    /// Shutdown is only observed at the pop point — a payload in flight is
    /// always fully persisted or re-queued before the loop exits.
    pub async fn run(&mut self) {
        info!(queue = %self.queue_name, "persistence consumer started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(queue = %self.queue_name, "persistence consumer received shutdown signal");
                    break;
                }
                popped = self.queue.pop_front(&self.queue_name, self.pop_timeout) => {
                    let outcome = match popped {
                        Ok(Some(bytes)) => self.handle_payload(bytes).await,
                        Ok(None) => Outcome::Idle,
                        Err(e) => {
                            error!(queue = %self.queue_name, error = %e, "queue pop failed");
                            Outcome::QueueError
                        }
                    };
                    if matches!(outcome, Outcome::Requeued | Outcome::QueueError) {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }

        info!(queue = %self.queue_name, "persistence consumer stopped");
    }

    /// Pop and fully process at most one payload.
    pub async fn poll_once(&self) -> Outcome {
        let bytes = match self.queue.pop_front(&self.queue_name, self.pop_timeout).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Outcome::Idle,
            Err(e) => {
                error!(queue = %self.queue_name, error = %e, "queue pop failed");
                return Outcome::QueueError;
            }
        };

        self.handle_payload(bytes).await
    }

    async fn handle_payload(&self, bytes: Vec<u8>) -> Outcome {
        let payload = match InspectionPayload::from_bytes(&bytes) {
            Ok(payload) => payload,
            Err(e) => {
                // Undecodable bytes would poison the head forever if
                // re-queued; they go straight to the spool.
                error!(error = %e, "malformed payload on queue, spooling");
                self.spool_bytes(&bytes).await;
                return Outcome::Spooled;
            }
        };

        info!(
            ticket_id = %payload.ticket_id,
            roll_code = %payload.roll_code,
            "processing payload"
        );

        match self.store.persist_payload(&payload).await {
            Ok(()) => {
                metrics::counter!("loomline_payloads_persisted_total").increment(1);
                info!(
                    ticket_id = %payload.ticket_id,
                    roll_code = %payload.roll_code,
                    "payload persisted"
                );
                Outcome::Persisted
            }
            Err(e) => {
                error!(
                    ticket_id = %payload.ticket_id,
                    roll_code = %payload.roll_code,
                    error = %e,
                    "persistence failed, re-queuing payload at head"
                );

                match self.queue.push_front(&self.queue_name, &bytes).await {
                    Ok(()) => {
                        metrics::counter!("loomline_payloads_requeued_total").increment(1);
                        warn!(
                            ticket_id = %payload.ticket_id,
                            backoff_ms = %self.backoff.as_millis(),
                            "payload re-queued, backing off"
                        );
                        Outcome::Requeued
                    }
                    Err(push_err) => {
                        error!(
                            ticket_id = %payload.ticket_id,
                            error = %push_err,
                            data_at_risk = true,
                            "failed to re-queue payload, spooling to dead letter"
                        );
                        self.spool_bytes(&bytes).await;
                        Outcome::Spooled
                    }
                }
            }
        }
    }

    async fn spool_bytes(&self, bytes: &[u8]) {
        metrics::counter!("loomline_payloads_spooled_total").increment(1);
        if let Err(e) = self.spool.append(bytes).await {
            // Last line of defense failed; nothing further to do but say so
            // loudly.
            error!(
                error = %e,
                data_at_risk = true,
                "dead-letter spool write failed, payload lost"
            );
        }
    }
}
