//! The `LocalStore` implementation over a single SQLite connection.

use loomline_core::local::{LocalStore, LocalStoreError, LocalTicket, LocalWorkerRow};
use loomline_core::payload::{InspectionPayload, RollStatus, UNASSIGNED_WORKER_ID};
use loomline_core::roll::parse_sequence_suffix;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS completed_tickets (
    ticket_id            TEXT PRIMARY KEY,
    roll_code            TEXT NOT NULL DEFAULT '',
    inspection_date      TEXT,
    inspector_id         TEXT,
    machine_id           TEXT,
    fabric_name          TEXT,
    order_number         TEXT,
    deployment_ticket_id TEXT,
    notes                TEXT NOT NULL DEFAULT '',
    status               TEXT NOT NULL DEFAULT 'PENDING',
    is_synced            INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS roll_production_log (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_id    TEXT NOT NULL,
    worker_id    TEXT NOT NULL,
    worker_name  TEXT,
    shift        TEXT NOT NULL,
    start_meter  REAL NOT NULL DEFAULT 0,
    end_meter    REAL NOT NULL DEFAULT 0,
    total_meters REAL NOT NULL DEFAULT 0,
    meters_g1    REAL NOT NULL DEFAULT 0,
    meters_g2    REAL NOT NULL DEFAULT 0,
    FOREIGN KEY (ticket_id) REFERENCES completed_tickets (ticket_id)
);

CREATE TABLE IF NOT EXISTS ticket_errors (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_id      TEXT NOT NULL,
    error_type     TEXT NOT NULL,
    meter_location REAL,
    worker_id      TEXT,
    shift          TEXT,
    points         INTEGER NOT NULL DEFAULT 1,
    FOREIGN KEY (ticket_id) REFERENCES completed_tickets (ticket_id)
);
";

fn storage_err(e: &sqlx::Error) -> LocalStoreError {
    LocalStoreError::Storage(e.to_string())
}

/// SQLite-backed [`LocalStore`]: one file per station, one connection.
///
/// A single connection is enough — the station is the only writer — and it
/// keeps `sqlite::memory:` databases coherent in tests (an in-memory
/// database exists per connection).
#[derive(Clone)]
pub struct SqliteLocalStore {
    pool: SqlitePool,
}

impl SqliteLocalStore {
    /// Open (creating if missing) the station database at `url` and apply
    /// the schema. `url` accepts `sqlite://path/to/station.db` or
    /// `sqlite::memory:`.
    ///
    /// # Errors
    ///
    /// [`LocalStoreError`] when the file cannot be opened or the schema
    /// cannot be applied.
    pub async fn open(url: &str) -> Result<Self, LocalStoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| storage_err(&e))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| storage_err(&e))?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| storage_err(&e))?;

        Ok(Self { pool })
    }
}

impl LocalStore for SqliteLocalStore {
    fn save_roll(
        &self,
        payload: &InspectionPayload,
        notes: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), LocalStoreError>> + Send + '_>> {
        let pool = self.pool.clone();
        let payload = payload.clone();
        let notes = notes.to_owned();
        Box::pin(async move {
            let mut tx = pool.begin().await.map_err(|e| storage_err(&e))?;

            sqlx::query(
                "INSERT INTO completed_tickets
                 (ticket_id, roll_code, inspection_date, inspector_id, machine_id,
                  fabric_name, order_number, deployment_ticket_id, notes, status, is_synced)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
                 ON CONFLICT (ticket_id) DO UPDATE SET
                     roll_code = excluded.roll_code,
                     inspection_date = excluded.inspection_date,
                     notes = excluded.notes,
                     status = excluded.status,
                     is_synced = 0",
            )
            .bind(&payload.ticket_id)
            .bind(&payload.roll_code)
            .bind(payload.inspection_date)
            .bind(payload.inspector_id.as_deref())
            .bind(&payload.machine_id)
            .bind(&payload.fabric_name)
            .bind(payload.order_number.as_deref())
            .bind(payload.deployment_ticket_id.as_deref())
            .bind(&notes)
            .bind(payload.status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_err(&e))?;

            // Re-saving a ticket replaces its rows wholesale.
            sqlx::query("DELETE FROM roll_production_log WHERE ticket_id = ?")
                .bind(&payload.ticket_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| storage_err(&e))?;
            sqlx::query("DELETE FROM ticket_errors WHERE ticket_id = ?")
                .bind(&payload.ticket_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| storage_err(&e))?;

            for entry in &payload.workers {
                sqlx::query(
                    "INSERT INTO roll_production_log
                     (ticket_id, worker_id, worker_name, shift,
                      start_meter, end_meter, total_meters, meters_g1, meters_g2)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&payload.ticket_id)
                .bind(&entry.worker.id)
                .bind(&entry.worker.name)
                .bind(&entry.shift)
                .bind(entry.start_meter)
                .bind(entry.end_meter)
                .bind(entry.total_meters)
                .bind(entry.meters_g1)
                .bind(entry.meters_g2)
                .execute(&mut *tx)
                .await
                .map_err(|e| storage_err(&e))?;

                for defect in &entry.defects {
                    // UNASSIGNED becomes NULL so old IS NULL queries keep
                    // matching defects logged before a badge-in.
                    let worker_id = if entry.worker.id == UNASSIGNED_WORKER_ID {
                        None
                    } else {
                        Some(entry.worker.id.as_str())
                    };
                    sqlx::query(
                        "INSERT INTO ticket_errors
                         (ticket_id, error_type, meter_location, worker_id, shift, points)
                         VALUES (?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&payload.ticket_id)
                    .bind(&defect.error_type)
                    .bind(defect.meter_location)
                    .bind(worker_id)
                    .bind(&entry.shift)
                    .bind(defect.points)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| storage_err(&e))?;
                }
            }

            tx.commit().await.map_err(|e| storage_err(&e))?;
            tracing::debug!(
                ticket_id = %payload.ticket_id,
                roll_code = %payload.roll_code,
                "roll saved to local store"
            );
            Ok(())
        })
    }

    fn next_sequence(
        &self,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, LocalStoreError>> + Send + '_>> {
        let pool = self.pool.clone();
        let pattern = format!("{prefix}%");
        Box::pin(async move {
            let top_code: Option<String> = sqlx::query_scalar(
                "SELECT roll_code FROM completed_tickets
                 WHERE roll_code LIKE ?
                 ORDER BY roll_code DESC
                 LIMIT 1",
            )
            .bind(&pattern)
            .fetch_optional(&pool)
            .await
            .map_err(|e| storage_err(&e))?;

            Ok(top_code
                .as_deref()
                .and_then(parse_sequence_suffix)
                .map_or(1, |max| max + 1))
        })
    }

    fn ticket_info(
        &self,
        ticket_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<LocalTicket>, LocalStoreError>> + Send + '_>>
    {
        let pool = self.pool.clone();
        let ticket_id = ticket_id.to_owned();
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT ticket_id, roll_code, inspection_date, inspector_id, machine_id,
                        fabric_name, order_number, notes, status
                 FROM completed_tickets WHERE ticket_id = ?",
            )
            .bind(&ticket_id)
            .fetch_optional(&pool)
            .await
            .map_err(|e| storage_err(&e))?;

            let Some(row) = row else {
                return Ok(None);
            };

            let status: String = row.try_get("status").map_err(|e| storage_err(&e))?;
            let status = RollStatus::from_str(&status)
                .map_err(|e| LocalStoreError::Storage(e.to_string()))?;

            Ok(Some(LocalTicket {
                ticket_id: row.try_get("ticket_id").map_err(|e| storage_err(&e))?,
                roll_code: row.try_get("roll_code").map_err(|e| storage_err(&e))?,
                fabric_name: row
                    .try_get::<Option<String>, _>("fabric_name")
                    .map_err(|e| storage_err(&e))?
                    .unwrap_or_default(),
                machine_id: row
                    .try_get::<Option<String>, _>("machine_id")
                    .map_err(|e| storage_err(&e))?
                    .unwrap_or_default(),
                inspector_id: row.try_get("inspector_id").map_err(|e| storage_err(&e))?,
                order_number: row.try_get("order_number").map_err(|e| storage_err(&e))?,
                inspection_date: row.try_get("inspection_date").map_err(|e| storage_err(&e))?,
                status,
                notes: row.try_get("notes").map_err(|e| storage_err(&e))?,
            }))
        })
    }

    fn worker_log(
        &self,
        ticket_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LocalWorkerRow>, LocalStoreError>> + Send + '_>>
    {
        let pool = self.pool.clone();
        let ticket_id = ticket_id.to_owned();
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT worker_name, shift, total_meters, meters_g1, meters_g2
                 FROM roll_production_log
                 WHERE ticket_id = ?
                 ORDER BY id",
            )
            .bind(&ticket_id)
            .fetch_all(&pool)
            .await
            .map_err(|e| storage_err(&e))?;

            rows.into_iter()
                .map(|row| {
                    Ok(LocalWorkerRow {
                        worker_name: row
                            .try_get::<Option<String>, _>("worker_name")
                            .map_err(|e| storage_err(&e))?
                            .unwrap_or_default(),
                        shift: row.try_get("shift").map_err(|e| storage_err(&e))?,
                        total_meters: row.try_get("total_meters").map_err(|e| storage_err(&e))?,
                        meters_g1: row.try_get("meters_g1").map_err(|e| storage_err(&e))?,
                        meters_g2: row.try_get("meters_g2").map_err(|e| storage_err(&e))?,
                    })
                })
                .collect()
        })
    }

    fn update_post_action(
        &self,
        ticket_id: &str,
        notes: &str,
        status: RollStatus,
    ) -> Pin<Box<dyn Future<Output = Result<(), LocalStoreError>> + Send + '_>> {
        let pool = self.pool.clone();
        let ticket_id = ticket_id.to_owned();
        let notes = notes.to_owned();
        Box::pin(async move {
            sqlx::query(
                "UPDATE completed_tickets
                 SET notes = ?, status = ?, is_synced = 0
                 WHERE ticket_id = ?",
            )
            .bind(&notes)
            .bind(status.as_str())
            .bind(&ticket_id)
            .execute(&pool)
            .await
            .map_err(|e| storage_err(&e))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::Utc;
    use loomline_core::payload::{DefectEntry, WorkerLog, WorkerRef};

    fn sample_payload(ticket: &str, code: &str) -> InspectionPayload {
        InspectionPayload {
            ticket_id: ticket.into(),
            roll_code: code.into(),
            fabric_name: "ABC.123456".into(),
            machine_id: "M01".into(),
            inspector_id: Some("I1".into()),
            order_number: Some("PO-9".into()),
            deployment_ticket_id: None,
            inspection_date: Utc::now(),
            status: RollStatus::ToInspectedWarehouse,
            meters_grade1: 95.0,
            meters_grade2: 5.0,
            workers: vec![
                WorkerLog {
                    worker: WorkerRef::new("W1", "An"),
                    shift: "1".into(),
                    start_meter: 0.0,
                    end_meter: 60.0,
                    total_meters: 60.0,
                    meters_g1: 58.0,
                    meters_g2: 2.0,
                    defects: vec![DefectEntry {
                        id: None,
                        error_type: "slub".into(),
                        meter_location: 12.5,
                        points: 1,
                        is_fixed: false,
                    }],
                },
                WorkerLog {
                    worker: WorkerRef::new(UNASSIGNED_WORKER_ID, ""),
                    shift: "2".into(),
                    start_meter: 60.0,
                    end_meter: 100.0,
                    total_meters: 40.0,
                    meters_g1: 37.0,
                    meters_g2: 3.0,
                    defects: vec![DefectEntry {
                        id: None,
                        error_type: "broken pick".into(),
                        meter_location: 71.0,
                        points: 2,
                        is_fixed: false,
                    }],
                },
            ],
        }
    }

    async fn open_memory() -> SqliteLocalStore {
        SqliteLocalStore::open("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn saved_roll_reads_back() {
        let store = open_memory().await;
        let payload = sample_payload("t-1", "2601ABC0001");
        store.save_roll(&payload, "first roll").await.unwrap();

        let info = store.ticket_info("t-1").await.unwrap().unwrap();
        assert_eq!(info.roll_code, "2601ABC0001");
        assert_eq!(info.status, RollStatus::ToInspectedWarehouse);
        assert_eq!(info.notes, "first roll");

        let log = store.worker_log("t-1").await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].worker_name, "An");
        assert!((log[1].meters_g1 - 37.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn resave_replaces_rows_instead_of_duplicating() {
        let store = open_memory().await;
        let payload = sample_payload("t-1", "2601ABC0001");
        store.save_roll(&payload, "").await.unwrap();
        store.save_roll(&payload, "").await.unwrap();

        let log = store.worker_log("t-1").await.unwrap();
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn next_sequence_continues_from_highest_local_code() {
        let store = open_memory().await;
        assert_eq!(store.next_sequence("2601ABC").await.unwrap(), 1);

        store
            .save_roll(&sample_payload("t-1", "2601ABC0004"), "")
            .await
            .unwrap();
        store
            .save_roll(&sample_payload("t-2", "2601ABC0011"), "")
            .await
            .unwrap();
        store
            .save_roll(&sample_payload("t-3", "2601ZZZ0099"), "")
            .await
            .unwrap();

        assert_eq!(store.next_sequence("2601ABC").await.unwrap(), 12);
        assert_eq!(store.next_sequence("2601ZZZ").await.unwrap(), 100);
        assert_eq!(store.next_sequence("2602ABC").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn post_action_updates_notes_and_status() {
        let store = open_memory().await;
        let mut payload = sample_payload("t-1", "2601ABC0001");
        payload.status = RollStatus::Pending;
        store.save_roll(&payload, "").await.unwrap();

        store
            .update_post_action("t-1", "sent to warehouse", RollStatus::ToInspectedWarehouse)
            .await
            .unwrap();

        let info = store.ticket_info("t-1").await.unwrap().unwrap();
        assert_eq!(info.status, RollStatus::ToInspectedWarehouse);
        assert_eq!(info.notes, "sent to warehouse");
    }
}
