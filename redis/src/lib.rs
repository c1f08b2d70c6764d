//! Redis implementations of the shared counter store and the durable queue.
//!
//! Both seams ride on a single Redis deployment reachable by every station:
//!
//! - [`RedisCounterStore`] maps [`CounterStore`] onto `INCR` — one atomic
//!   server-side operation per issuance, serialized per key by Redis
//!   itself. A missing key counts from zero, so the first roll of a new
//!   prefix is sequence 1.
//! - [`RedisPayloadQueue`] maps [`PayloadQueue`] onto a Redis list:
//!   `RPUSH` for new work at the tail, `LPUSH` for retry-priority requeues
//!   at the head, `BLPOP` with a bounded wait for the consumer.
//!
//! # Fail-fast
//!
//! Every station-facing call is wrapped in a short timeout
//! ([`CALL_TIMEOUT`]): a hung Redis must demote the sequence issuer to its
//! fallback tiers instead of hanging an operator action. The consumer-side
//! `BLPOP` gets its requested wait plus a small grace window.
//!
//! [`CounterStore`]: loomline_core::counter::CounterStore
//! [`PayloadQueue`]: loomline_core::queue::PayloadQueue

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod counter_store;
mod payload_queue;

pub use counter_store::RedisCounterStore;
pub use payload_queue::RedisPayloadQueue;

use redis::aio::ConnectionManager;
use std::time::Duration;

/// Fail-fast bound for station-facing Redis calls.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Extra wait granted to a blocking pop on top of its requested timeout,
/// so the server-side `BLPOP` deadline fires before the client-side one.
pub(crate) const POP_GRACE: Duration = Duration::from_secs(1);

/// Open a connection manager for the given Redis URL.
///
/// The manager multiplexes one connection and reconnects on failure; both
/// stores clone it cheaply per call. Use this once at startup and hand the
/// manager to [`RedisCounterStore::new`] and [`RedisPayloadQueue::new`].
///
/// # Errors
///
/// Returns the underlying [`redis::RedisError`] if the URL is invalid or
/// the initial connection cannot be established.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, redis::RedisError> {
    let client = redis::Client::open(redis_url)?;
    ConnectionManager::new(client).await
}

/// Map a Redis error onto an unreachable/command split: I/O-shaped
/// failures mean the store could not be reached, anything else is a
/// command-level failure.
pub(crate) fn is_connection_error(err: &redis::RedisError) -> bool {
    err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout()
}
