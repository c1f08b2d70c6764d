//! # Loomline Consumer
//!
//! The single persistence consumer of the inspection pipeline: one loop
//! per deployment (not per station) that drains the durable queue into the
//! relational store.
//!
//! # Loop contract
//!
//! 1. Block on the head of the queue with a bounded wait; a timeout is the
//!    idle state, not an error.
//! 2. Upsert the payload in one transaction (the store's job).
//! 3. On failure: roll back (the store's job), re-queue the original bytes
//!    at the *head* so the payload is retried before newer work, then back
//!    off before resuming.
//! 4. If the re-queue itself fails, the bytes go to the dead-letter spool
//!    on local disk; the spool is drained back onto the queue at startup.
//!
//! Persistence failures never reach any station operator — the queue
//! boundary isolates the synchronous station path from this asynchronous
//! one. Shutdown is observed only between payloads: an in-flight
//! transaction always completes (or rolls back and requeues) first.

pub mod config;
pub mod consumer;
pub mod spool;

pub use config::{ConfigError, WorkerConfig};
pub use consumer::{Outcome, PersistenceConsumer};
pub use spool::DeadLetterSpool;
