//! Redis-list implementation of the durable queue.

use crate::{CALL_TIMEOUT, POP_GRACE, is_connection_error};
use loomline_core::queue::{PayloadQueue, QueueError};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

fn map_err(e: &redis::RedisError) -> QueueError {
    if is_connection_error(e) {
        QueueError::Unreachable(e.to_string())
    } else {
        QueueError::Command(e.to_string())
    }
}

/// Redis implementation of [`PayloadQueue`] over a list per queue name.
///
/// `RPUSH` appends new work at the tail; `LPUSH` puts a failed payload back
/// at the head so the consumer retries it before newer work; `BLPOP` blocks
/// the consumer with a bounded wait instead of burning CPU on an empty
/// queue. Redis offers both push ends natively, so head-priority requeue
/// needs no auxiliary queue.
#[derive(Clone)]
pub struct RedisPayloadQueue {
    conn: ConnectionManager,
    call_timeout: Duration,
}

impl RedisPayloadQueue {
    /// Wrap an existing connection manager.
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            call_timeout: CALL_TIMEOUT,
        }
    }

    /// Override the fail-fast timeout for push calls.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    async fn push(
        mut conn: ConnectionManager,
        call_timeout: Duration,
        queue: String,
        payload: Vec<u8>,
        head: bool,
    ) -> Result<(), QueueError> {
        let push = async {
            let result: Result<(), redis::RedisError> = if head {
                conn.lpush(&queue, payload.as_slice()).await
            } else {
                conn.rpush(&queue, payload.as_slice()).await
            };
            result.map_err(|e| map_err(&e))
        };

        match tokio::time::timeout(call_timeout, push).await {
            Ok(result) => result,
            Err(_) => Err(QueueError::Unreachable(format!(
                "push timed out after {} ms",
                call_timeout.as_millis()
            ))),
        }
    }
}

impl PayloadQueue for RedisPayloadQueue {
    fn push_back(
        &self,
        queue: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        let conn = self.conn.clone();
        let queue = queue.to_owned();
        let payload = payload.to_vec();
        let call_timeout = self.call_timeout;
        Box::pin(Self::push(conn, call_timeout, queue, payload, false))
    }

    fn push_front(
        &self,
        queue: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        let conn = self.conn.clone();
        let queue = queue.to_owned();
        let payload = payload.to_vec();
        let call_timeout = self.call_timeout;
        Box::pin(Self::push(conn, call_timeout, queue, payload, true))
    }

    fn pop_front(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, QueueError>> + Send + '_>> {
        let mut conn = self.conn.clone();
        let queue = queue.to_owned();
        Box::pin(async move {
            // BLPOP returns (list, element) or nil on server-side timeout.
            let pop = async {
                let popped: Option<(String, Vec<u8>)> = conn
                    .blpop(&queue, timeout.as_secs_f64())
                    .await
                    .map_err(|e| map_err(&e))?;
                Ok::<Option<Vec<u8>>, QueueError>(popped.map(|(_, payload)| payload))
            };

            // Client-side bound slightly above the server-side one, so a
            // dead connection cannot park the consumer forever.
            match tokio::time::timeout(timeout + POP_GRACE, pop).await {
                Ok(result) => result,
                Err(_) => Err(QueueError::Unreachable(format!(
                    "blocking pop timed out after {} ms",
                    (timeout + POP_GRACE).as_millis()
                ))),
            }
        })
    }
}
