//! # Loomline Testing
//!
//! In-memory implementations of every `loomline-core` trait seam, for
//! fast, deterministic tests:
//!
//! - [`MemoryCounterStore`]: per-key atomic counters with an offline switch
//! - [`MemoryQueue`]: FIFO byte queues with both push ends, bounded
//!   blocking pop, and injectable push failures
//! - [`MemoryRollStore`]: a faithful model of the relational store's upsert
//!   semantics (idempotency keys, code-never-overwritten rule, total
//!   re-derivation) with scripted failure injection
//! - [`MemoryLocalStore`]: the per-station fallback store
//! - [`FixedMeter`]: a settable meter reading
//!
//! Failure injection is deliberate and scriptable — fallback-tier ordering
//! and requeue-on-failure behavior are exercised by flipping a store
//! offline or scripting "fail the next N calls".

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

mod memory_queue;
mod memory_stores;

pub use memory_queue::MemoryQueue;
pub use memory_stores::{
    FixedMeter, MemoryCounterStore, MemoryLocalStore, MemoryRollStore, PersistedProduction,
    PersistedRoll,
};
