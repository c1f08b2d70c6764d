//! Redis-backed atomic sequence counter.

use crate::{CALL_TIMEOUT, is_connection_error};
use loomline_core::counter::{CounterError, CounterStore};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Redis implementation of [`CounterStore`].
///
/// `INCR` is a single atomic server-side operation, so this store is safe
/// under arbitrary concurrent callers across all stations — no client-side
/// read-then-write race is possible. Redis serializes all increments to a
/// key, which is the sole strong-consistency guarantee the pipeline relies
/// on.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    call_timeout: Duration,
}

impl RedisCounterStore {
    /// Wrap an existing connection manager.
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            call_timeout: CALL_TIMEOUT,
        }
    }

    /// Override the fail-fast timeout (tests use a tighter bound).
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

impl CounterStore for RedisCounterStore {
    fn increment(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, CounterError>> + Send + '_>> {
        let mut conn = self.conn.clone();
        let key = key.to_owned();
        let call_timeout = self.call_timeout;
        Box::pin(async move {
            let incr = async {
                let value: u64 = conn.incr(&key, 1u64).await.map_err(|e| {
                    if is_connection_error(&e) {
                        CounterError::Unreachable(e.to_string())
                    } else {
                        CounterError::Command(e.to_string())
                    }
                })?;
                Ok::<u64, CounterError>(value)
            };

            match tokio::time::timeout(call_timeout, incr).await {
                Ok(result) => result,
                Err(_) => {
                    let millis = u64::try_from(call_timeout.as_millis()).unwrap_or(u64::MAX);
                    Err(CounterError::Timeout(millis))
                }
            }
        })
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        let mut conn = self.conn.clone();
        let call_timeout = self.call_timeout;
        Box::pin(async move {
            let ping = async {
                let pong: Result<String, redis::RedisError> =
                    redis::cmd("PING").query_async(&mut conn).await;
                pong.is_ok()
            };
            tokio::time::timeout(call_timeout, ping)
                .await
                .unwrap_or(false)
        })
    }
}
