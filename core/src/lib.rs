//! # Loomline Core
//!
//! Core domain types and trait seams for the Loomline fabric-inspection
//! roll pipeline.
//!
//! This crate defines everything the pipeline's moving parts agree on:
//!
//! - **Roll identity**: sequence-prefix derivation from a fabric name and
//!   calendar month, and the zero-padded human-facing roll code ([`roll`]).
//! - **Wire format**: the self-contained [`InspectionPayload`] snapshot
//!   that travels through the durable queue ([`payload`]).
//! - **Trait seams**: [`CounterStore`], [`PayloadQueue`], [`RollStore`],
//!   [`LocalStore`] and [`MeterReader`] — one trait per external
//!   collaborator, each with its own error enum, so station-side and
//!   consumer-side components are testable against in-memory
//!   implementations.
//!
//! No I/O happens in this crate.

pub mod counter;
pub mod local;
pub mod meter;
pub mod payload;
pub mod queue;
pub mod roll;
pub mod store;

pub use counter::{CounterError, CounterStore, roll_sequence_key};
pub use local::{LocalStore, LocalStoreError, LocalTicket, LocalWorkerRow};
pub use meter::{MeterError, MeterReader};
pub use payload::{
    DefectEntry, InspectionPayload, PENDING_WORKER_ID, RollStatus, UNASSIGNED_WORKER_ID,
    WorkerLog, WorkerRef,
};
pub use queue::{INSPECTION_QUEUE, PayloadQueue, QueueError};
pub use roll::{format_roll_code, item_identifier, parse_sequence_suffix, sequence_prefix};
pub use store::{RollStore, RollStoreError};
