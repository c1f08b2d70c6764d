//! Shared counter store seam — the atomic sequence source.
//!
//! The counter store is the only strongly-consistent piece of the pipeline:
//! it serializes all increments to a given key server-side, so N stations
//! calling [`CounterStore::increment`] concurrently for the same prefix
//! receive N distinct, strictly-increasing values with no client-side
//! read-then-write race.
//!
//! Keys follow the namespace `seq:roll:{prefix}` (see
//! [`roll_sequence_key`]). A key that does not exist yet is initialized to
//! zero before the first increment, so the first roll of a new prefix is
//! always sequence 1.
//!
//! # Dyn compatibility
//!
//! The trait returns explicit `Pin<Box<dyn Future>>` instead of `async fn`
//! so callers can hold `Arc<dyn CounterStore>`.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from the shared counter store.
///
/// Every variant is treated identically by the sequence issuer: log, demote
/// to the next tier. The distinction exists for diagnostics only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CounterError {
    /// Could not reach the store at all.
    #[error("counter store unreachable: {0}")]
    Unreachable(String),

    /// The store did not answer within the fail-fast window.
    #[error("counter store timed out after {0} ms")]
    Timeout(u64),

    /// The store answered with an error.
    #[error("counter command failed: {0}")]
    Command(String),
}

/// Build the counter key for a roll-sequence prefix.
///
/// # Examples
///
/// ```
/// use loomline_core::counter::roll_sequence_key;
///
/// assert_eq!(roll_sequence_key("2601XYZ"), "seq:roll:2601XYZ");
/// ```
#[must_use]
pub fn roll_sequence_key(prefix: &str) -> String {
    format!("seq:roll:{prefix}")
}

/// Atomic, monotonic per-key counter reachable by every station.
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` and return the post-increment value.
    ///
    /// A nonexistent key counts from zero, so the first call returns 1.
    /// Implementations must bound this call in time: a hung counter store
    /// must demote to the fallback tiers, not hang a user-facing action.
    ///
    /// # Errors
    ///
    /// Any [`CounterError`] signals the caller to fall through to the next
    /// sequence tier.
    fn increment(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, CounterError>> + Send + '_>>;

    /// Health check. Returns `false` instead of erroring — reachability is
    /// the only question being asked.
    fn ping(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
}
