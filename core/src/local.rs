//! Local fallback store seam — the station's embedded, always-available
//! table set.
//!
//! Each station owns exactly one local store; no other station ever reads
//! or writes it. It serves two roles:
//!
//! 1. **Durability backup**: every roll-boundary payload is written here
//!    synchronously, independent of network reachability, before the queue
//!    push is attempted. Label printing reads back from here rather than
//!    from the central store, which may lag behind the queue.
//! 2. **Last-resort sequence source**: when both the shared counter and the
//!    central database are unreachable, the next sequence is derived from
//!    the highest code this station itself has assigned.

use crate::payload::{InspectionPayload, RollStatus};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from the local store. A single variant: the embedded store either
/// works or the station has much bigger problems.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocalStoreError {
    /// The local store failed to read or write.
    #[error("local store error: {0}")]
    Storage(String),
}

/// Ticket header as stored locally, read back for label printing and
/// post-action updates.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTicket {
    /// Opaque ticket token.
    pub ticket_id: String,
    /// Human-facing roll code assigned at issuance time.
    pub roll_code: String,
    /// Fabric name.
    pub fabric_name: String,
    /// Machine the roll came off.
    pub machine_id: String,
    /// Inspector on duty, when known.
    pub inspector_id: Option<String>,
    /// Production order number, when known.
    pub order_number: Option<String>,
    /// Capture time of the snapshot.
    pub inspection_date: DateTime<Utc>,
    /// Status at capture time.
    pub status: RollStatus,
    /// Free-form operator notes.
    pub notes: String,
}

/// One worker row as stored locally (the label path only needs the name
/// and the meter figures).
#[derive(Debug, Clone, PartialEq)]
pub struct LocalWorkerRow {
    /// Display name captured at badge-in.
    pub worker_name: String,
    /// Shift label.
    pub shift: String,
    /// Span length in meters.
    pub total_meters: f64,
    /// Grade-1 meters.
    pub meters_g1: f64,
    /// Grade-2 meters.
    pub meters_g2: f64,
}

/// Embedded per-station store: synchronous durability backup plus the
/// tier-3 sequence source.
pub trait LocalStore: Send + Sync {
    /// Durably record a roll-boundary payload (header, worker rows, defect
    /// rows) in one transaction.
    ///
    /// # Errors
    ///
    /// [`LocalStoreError`] when the write fails — fatal to the
    /// roll-boundary action, since the local copy is the only guaranteed
    /// durable record at that moment.
    fn save_roll(
        &self,
        payload: &InspectionPayload,
        notes: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), LocalStoreError>> + Send + '_>>;

    /// Next sequence for `prefix` derived from this station's own history:
    /// highest matching code's numeric suffix + 1, or 1 when the station
    /// has never issued a code under the prefix.
    ///
    /// Sees only local history — the weakest tier, used only under total
    /// network outage.
    ///
    /// # Errors
    ///
    /// [`LocalStoreError`] when the lookup fails; at that point sequence
    /// issuance as a whole has failed.
    fn next_sequence(
        &self,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, LocalStoreError>> + Send + '_>>;

    /// Read a ticket header back by token.
    ///
    /// # Errors
    ///
    /// [`LocalStoreError`] when the read fails.
    fn ticket_info(
        &self,
        ticket_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<LocalTicket>, LocalStoreError>> + Send + '_>>;

    /// Read the worker rows for a ticket, in insertion order.
    ///
    /// # Errors
    ///
    /// [`LocalStoreError`] when the read fails.
    fn worker_log(
        &self,
        ticket_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LocalWorkerRow>, LocalStoreError>> + Send + '_>>;

    /// Update a stored ticket's notes and status after a warehouse
    /// hand-off decision.
    ///
    /// # Errors
    ///
    /// [`LocalStoreError`] when the update fails.
    fn update_post_action(
        &self,
        ticket_id: &str,
        notes: &str,
        status: RollStatus,
    ) -> Pin<Box<dyn Future<Output = Result<(), LocalStoreError>> + Send + '_>>;
}
