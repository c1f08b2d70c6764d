//! # Loomline Station
//!
//! Station-side runtime of the roll pipeline: the per-station inspection
//! session, the three-tier sequence issuer, the pure payload builder, and
//! the orchestration service tying them to the durable queue and the local
//! fallback store.
//!
//! A station is an independent process driving one inspection frame. Its
//! session is single-writer, explicitly scoped state: created on "start
//! inspection", mutated by shift and defect events, destroyed when the
//! roll is finalized. Roll-boundary events (finish, split) snapshot the
//! session into an [`InspectionPayload`], save it locally, and hand it to
//! the durable queue; the central persistence consumer takes it from
//! there.
//!
//! [`InspectionPayload`]: loomline_core::payload::InspectionPayload

pub mod builder;
pub mod sequence;
pub mod service;
pub mod session;

pub use sequence::{SequenceError, SequenceIssuer};
pub use service::{
    LabelPrinter, LogPrinter, RollLabel, RollService, SplitOutcome, StartInspection,
    StationError,
};
pub use session::{
    CurrentWorker, InspectionSession, SessionError, SessionManager, SessionStart,
};
