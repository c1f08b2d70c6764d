//! Relational store seam — idempotent persistence of roll payloads.
//!
//! The relational store is written by exactly one consumer loop per
//! deployment. All writes for a payload happen inside one transaction, and
//! every statement is an upsert keyed on the natural identity of the row —
//! replaying the same payload (at-least-once delivery) must never create
//! duplicate rows or double-count meters.
//!
//! # Idempotency keys
//!
//! - Ticket header: `ticket_id`
//! - Roll header: roll id (the ticket token) — and once a roll's
//!   human-facing code is set, it is never overwritten by a replay
//! - Production rows: `(roll, worker, shift)`
//! - Defect rows: full replace per production row (delete-then-reinsert)

use crate::payload::InspectionPayload;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from the relational store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RollStoreError {
    /// Could not reach the database.
    #[error("relational store unreachable: {0}")]
    Unreachable(String),

    /// A statement inside the transaction failed; the transaction was
    /// rolled back.
    #[error("persistence failed: {0}")]
    Query(String),
}

/// Transactional, idempotent persistence of inspection payloads, plus the
/// two read paths the station side needs (degraded sequence issuance and
/// retroactive gap reconciliation).
pub trait RollStore: Send + Sync {
    /// Upsert one payload inside a single transaction.
    ///
    /// Statement order: resolve/insert the fabric reference, upsert the
    /// ticket header, upsert the roll header (status and totals overwrite;
    /// an already-set roll code does not), upsert each worker's production
    /// row keyed `(roll, worker, shift)`, replace each production row's
    /// defect set, recompute roll totals from the production rows, commit.
    ///
    /// # Errors
    ///
    /// [`RollStoreError`] after rollback. The caller (the consumer loop)
    /// re-queues the payload; nothing is partially persisted.
    fn persist_payload(
        &self,
        payload: &InspectionPayload,
    ) -> Pin<Box<dyn Future<Output = Result<(), RollStoreError>> + Send + '_>>;

    /// Highest sequence suffix among roll codes starting with `prefix`,
    /// or `None` when no such roll exists.
    ///
    /// This is the tier-2 sequence fallback. It is a plain read — two
    /// stations racing through it can observe the same maximum, which is
    /// the documented duplicate-code window of the degraded tiers.
    ///
    /// # Errors
    ///
    /// [`RollStoreError`] when the query cannot run; the sequence issuer
    /// demotes to the local tier.
    fn max_sequence(
        &self,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u64>, RollStoreError>> + Send + '_>>;

    /// Reassign pending-identification production rows on the previous roll
    /// of the machine behind `current_ticket` to `worker_id`.
    ///
    /// Finds the most recent roll on the same machine (excluding the
    /// current ticket) whose production rows still carry the
    /// pending-worker sentinel and updates their worker reference.
    /// Returns the number of rows updated; 0 means no pending rows — a
    /// no-op, not an error. Idempotent and best-effort.
    ///
    /// # Errors
    ///
    /// [`RollStoreError`] when the lookup or update fails; callers log and
    /// carry on.
    fn reconcile_pending_worker(
        &self,
        current_ticket: &str,
        worker_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, RollStoreError>> + Send + '_>>;
}
