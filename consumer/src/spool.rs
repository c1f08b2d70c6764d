//! Dead-letter spool: the last line of defense for payloads that cannot be
//! re-queued.
//!
//! The spool is a JSONL file on the consumer's local disk — one serialized
//! payload per line. It is written when the head re-queue of a failed
//! payload itself fails (queue unreachable) or when undecodable bytes are
//! pulled off the queue, and drained back onto the queue tail at consumer
//! startup.

use loomline_core::queue::PayloadQueue;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Append-only JSONL spool file.
#[derive(Debug, Clone)]
pub struct DeadLetterSpool {
    path: PathBuf,
}

impl DeadLetterSpool {
    /// Use (or create on first write) the spool file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Spool file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one payload as a line.
    ///
    /// # Errors
    ///
    /// Propagates the underlying I/O error — the caller logs it as
    /// unrecoverable data risk, there is no further fallback.
    pub async fn append(&self, bytes: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(bytes).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    /// Read all spooled payloads without consuming them.
    ///
    /// # Errors
    ///
    /// Propagates the underlying I/O error. A missing file reads as empty.
    pub async fn read_all(&self) -> io::Result<Vec<Vec<u8>>> {
        match fs::read(&self.path).await {
            Ok(contents) => Ok(contents
                .split(|b| *b == b'\n')
                .filter(|line| !line.is_empty())
                .map(<[u8]>::to_vec)
                .collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Push every spooled payload back onto the tail of `queue_name`, then
    /// truncate the spool. If a push fails partway, the unpushed remainder
    /// (including the failed payload) is written back so nothing is lost.
    ///
    /// Returns the number of payloads restored to the queue.
    ///
    /// # Errors
    ///
    /// Propagates the spool's own I/O errors. Queue errors end the drain
    /// early but are not themselves fatal — the remainder stays spooled.
    pub async fn drain_into(
        &self,
        queue: &dyn PayloadQueue,
        queue_name: &str,
    ) -> io::Result<usize> {
        let entries = self.read_all().await?;
        if entries.is_empty() {
            return Ok(0);
        }

        let mut restored = 0;
        for (index, entry) in entries.iter().enumerate() {
            if let Err(e) = queue.push_back(queue_name, entry).await {
                tracing::error!(
                    error = %e,
                    restored,
                    remaining = entries.len() - index,
                    "spool drain interrupted, keeping remainder spooled"
                );
                self.rewrite(&entries[index..]).await?;
                return Ok(restored);
            }
            restored += 1;
        }

        fs::remove_file(&self.path).await.or_else(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Ok(())
            } else {
                Err(e)
            }
        })?;
        tracing::info!(restored, "dead-letter spool drained back onto queue");
        Ok(restored)
    }

    async fn rewrite(&self, entries: &[Vec<u8>]) -> io::Result<()> {
        let mut contents = Vec::new();
        for entry in entries {
            contents.extend_from_slice(entry);
            contents.push(b'\n');
        }
        fs::write(&self.path, contents).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_spool(tag: &str) -> DeadLetterSpool {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        DeadLetterSpool::new(std::env::temp_dir().join(format!("loomline_spool_{tag}_{nanos}.jsonl")))
    }

    #[tokio::test]
    async fn append_then_read_round_trips() {
        let spool = temp_spool("roundtrip");
        spool.append(br#"{"a":1}"#).await.unwrap();
        spool.append(br#"{"b":2}"#).await.unwrap();

        let entries = spool.read_all().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], br#"{"a":1}"#);
        assert_eq!(entries[1], br#"{"b":2}"#);

        let _ = fs::remove_file(spool.path()).await;
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let spool = temp_spool("missing");
        assert!(spool.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn drain_restores_entries_and_truncates() {
        use loomline_testing::MemoryQueue;

        let spool = temp_spool("drain");
        spool.append(b"one").await.unwrap();
        spool.append(b"two").await.unwrap();

        let queue = MemoryQueue::new();
        let restored = spool.drain_into(&queue, "q").await.unwrap();
        assert_eq!(restored, 2);
        assert_eq!(queue.contents("q"), vec![b"one".to_vec(), b"two".to_vec()]);
        assert!(spool.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn interrupted_drain_keeps_the_remainder() {
        use loomline_testing::MemoryQueue;

        let spool = temp_spool("interrupted");
        spool.append(b"one").await.unwrap();
        spool.append(b"two").await.unwrap();

        let queue = MemoryQueue::new();
        queue.fail_pushes(true);
        let restored = spool.drain_into(&queue, "q").await.unwrap();
        assert_eq!(restored, 0);

        let remaining = spool.read_all().await.unwrap();
        assert_eq!(remaining.len(), 2);

        let _ = fs::remove_file(spool.path()).await;
    }
}
