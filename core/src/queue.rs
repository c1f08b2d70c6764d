//! Durable queue seam — the at-least-once buffer between stations and the
//! persistence worker.
//!
//! The queue is an ordered byte FIFO shared by all stations. Producers
//! append to the tail ([`PayloadQueue::push_back`]); the single consumer
//! blocks on the head with a bounded wait ([`PayloadQueue::pop_front`]).
//! A payload that fails to persist is re-queued at the *head*
//! ([`PayloadQueue::push_front`]) so it is retried before newer work —
//! at-least-once delivery with retry priority, never silent drops.
//!
//! # Delivery semantics
//!
//! - **At-least-once**: a payload popped but not yet committed can be
//!   redelivered after a requeue. The consumer's upserts are idempotent for
//!   exactly this reason.
//! - **FIFO under normal operation**: ordering between unrelated tickets is
//!   only perturbed by head-requeues of failed payloads.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// The single queue name used by the inspection pipeline.
pub const INSPECTION_QUEUE: &str = "queue:inspection_data";

/// Errors from the durable queue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Could not reach the queue. For producers this is fatal to the
    /// roll-boundary action; for the consumer's requeue path it triggers
    /// the dead-letter spool.
    #[error("queue unreachable: {0}")]
    Unreachable(String),

    /// The queue answered with an error.
    #[error("queue command failed: {0}")]
    Command(String),
}

/// Ordered, at-least-once byte queue reachable by every station.
pub trait PayloadQueue: Send + Sync {
    /// Append a serialized payload to the tail of `queue` (new work).
    ///
    /// # Errors
    ///
    /// [`QueueError`] on any failure. Producers must surface this to the
    /// operator — skipping the durable queue risks permanent data loss.
    fn push_back(
        &self,
        queue: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>>;

    /// Push a serialized payload to the head of `queue` (retry priority).
    ///
    /// Used only by the consumer to put a failed payload back in front of
    /// newer work.
    ///
    /// # Errors
    ///
    /// [`QueueError`] on any failure — at this point the payload is at risk
    /// and the caller must divert it to the dead-letter spool.
    fn push_front(
        &self,
        queue: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>>;

    /// Block on the head of `queue` for up to `timeout`.
    ///
    /// Returns `Ok(None)` on timeout — the idle state, not an error. This
    /// is the pipeline's only intentionally long-blocking call and must
    /// only run on the consumer's dedicated task.
    ///
    /// # Errors
    ///
    /// [`QueueError`] when the queue itself fails (as opposed to simply
    /// being empty).
    fn pop_front(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, QueueError>> + Send + '_>>;
}
