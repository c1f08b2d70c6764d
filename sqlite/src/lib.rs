//! Embedded per-station fallback store, backed by SQLite.
//!
//! Each inspection station owns one local database file. It is written
//! synchronously at every roll boundary — before any network I/O is
//! attempted — so a completed roll is durably recorded even under total
//! outage. It also answers the tier-3 sequence query from the station's own
//! issuance history, and serves the label-print read path (the central
//! store may lag behind the queue, the local copy never does).
//!
//! The schema is applied on open with `CREATE TABLE IF NOT EXISTS`; there
//! is no migration machinery for a single-station embedded file.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod local_store;

pub use local_store::SqliteLocalStore;
