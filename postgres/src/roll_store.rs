//! The `RollStore` implementation: one transaction per payload, upserts
//! everywhere, totals re-derived before commit.

use loomline_core::payload::{InspectionPayload, PENDING_WORKER_ID};
use loomline_core::roll::parse_sequence_suffix;
use loomline_core::store::{RollStore, RollStoreError};
use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;
use std::pin::Pin;

fn map_err(e: &sqlx::Error) -> RollStoreError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => RollStoreError::Unreachable(e.to_string()),
        other => RollStoreError::Query(other.to_string()),
    }
}

/// PostgreSQL-backed [`RollStore`].
#[derive(Clone)]
pub struct PostgresRollStore {
    pool: PgPool,
}

impl PostgresRollStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve the fabric id for a name, inserting the fabric on first
    /// sight. An empty name resolves to no fabric.
    async fn resolve_fabric(
        tx: &mut Transaction<'_, Postgres>,
        fabric_name: &str,
    ) -> Result<Option<i64>, sqlx::Error> {
        if fabric_name.is_empty() {
            return Ok(None);
        }

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM fabrics WHERE fabric_name = $1 LIMIT 1")
                .bind(fabric_name)
                .fetch_optional(&mut **tx)
                .await?;
        if let Some(id) = existing {
            return Ok(Some(id));
        }

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO fabrics (fabric_name) VALUES ($1)
             ON CONFLICT (fabric_name) DO UPDATE SET fabric_name = EXCLUDED.fabric_name
             RETURNING id",
        )
        .bind(fabric_name)
        .fetch_one(&mut **tx)
        .await?;
        Ok(Some(id))
    }

    async fn persist_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        payload: &InspectionPayload,
    ) -> Result<(), sqlx::Error> {
        let fabric_id = Self::resolve_fabric(tx, &payload.fabric_name).await?;

        sqlx::query(
            "INSERT INTO inspection_tickets
             (ticket_id, inspection_date, order_number, machine_id, inspector_id, fabric_id, deployment_ticket_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (ticket_id) DO UPDATE SET
                 inspection_date = EXCLUDED.inspection_date,
                 inspector_id = EXCLUDED.inspector_id,
                 machine_id = EXCLUDED.machine_id",
        )
        .bind(&payload.ticket_id)
        .bind(payload.inspection_date)
        .bind(payload.order_number.as_deref())
        .bind(&payload.machine_id)
        .bind(payload.inspector_id.as_deref())
        .bind(fabric_id)
        .bind(payload.deployment_ticket_id.as_deref())
        .execute(&mut **tx)
        .await?;

        // The roll id is the ticket token. Status and meters overwrite on
        // replay; the human-facing code does not once set.
        sqlx::query(
            "INSERT INTO fabric_rolls
             (id, ticket_id, roll_number, meters_grade1, meters_grade2, status)
             VALUES ($1, $1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET
                 status = EXCLUDED.status,
                 meters_grade1 = EXCLUDED.meters_grade1,
                 meters_grade2 = EXCLUDED.meters_grade2,
                 roll_number = fabric_rolls.roll_number",
        )
        .bind(&payload.ticket_id)
        .bind(&payload.roll_code)
        .bind(payload.meters_grade1)
        .bind(payload.meters_grade2)
        .bind(payload.status.as_str())
        .execute(&mut **tx)
        .await?;

        for entry in &payload.workers {
            let production_id: i64 = sqlx::query_scalar(
                "INSERT INTO individual_productions
                 (roll_id, worker_id, shift, production_date, meters_grade1, meters_grade2)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (roll_id, worker_id, shift) DO UPDATE SET
                     meters_grade1 = EXCLUDED.meters_grade1,
                     meters_grade2 = EXCLUDED.meters_grade2,
                     production_date = EXCLUDED.production_date
                 RETURNING id",
            )
            .bind(&payload.ticket_id)
            .bind(&entry.worker.id)
            .bind(&entry.shift)
            .bind(payload.inspection_date)
            .bind(entry.meters_g1)
            .bind(entry.meters_g2)
            .fetch_one(&mut **tx)
            .await?;

            // Full replace: a replay leaves exactly the latest defect set.
            sqlx::query("DELETE FROM production_errors WHERE production_id = $1")
                .bind(production_id)
                .execute(&mut **tx)
                .await?;

            for defect in &entry.defects {
                sqlx::query(
                    "INSERT INTO production_errors
                     (production_id, error_type, occurrences, meter_location, points, is_fixed)
                     VALUES ($1, $2, 1, $3, $4, $5)",
                )
                .bind(production_id)
                .bind(&defect.error_type)
                .bind(defect.meter_location)
                .bind(defect.points)
                .bind(defect.is_fixed)
                .execute(&mut **tx)
                .await?;
            }
        }

        // Re-derive roll totals from what was actually persisted.
        sqlx::query(
            "UPDATE fabric_rolls SET
                 meters_grade1 = (SELECT COALESCE(SUM(meters_grade1), 0)
                                  FROM individual_productions WHERE roll_id = $1),
                 meters_grade2 = (SELECT COALESCE(SUM(meters_grade2), 0)
                                  FROM individual_productions WHERE roll_id = $1)
             WHERE id = $1",
        )
        .bind(&payload.ticket_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

impl RollStore for PostgresRollStore {
    fn persist_payload(
        &self,
        payload: &InspectionPayload,
    ) -> Pin<Box<dyn Future<Output = Result<(), RollStoreError>> + Send + '_>> {
        let pool = self.pool.clone();
        let payload = payload.clone();
        Box::pin(async move {
            let mut tx = pool.begin().await.map_err(|e| map_err(&e))?;
            match Self::persist_in_tx(&mut tx, &payload).await {
                Ok(()) => {
                    tx.commit().await.map_err(|e| map_err(&e))?;
                    tracing::debug!(
                        ticket_id = %payload.ticket_id,
                        roll_code = %payload.roll_code,
                        workers = payload.workers.len(),
                        "roll payload persisted"
                    );
                    Ok(())
                }
                Err(e) => {
                    // Dropping the transaction rolls it back; do it
                    // explicitly so the error path reads as one.
                    tx.rollback().await.ok();
                    Err(map_err(&e))
                }
            }
        })
    }

    fn max_sequence(
        &self,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u64>, RollStoreError>> + Send + '_>> {
        let pool = self.pool.clone();
        let pattern = format!("{prefix}%");
        Box::pin(async move {
            let top_code: Option<String> = sqlx::query_scalar(
                "SELECT roll_number FROM fabric_rolls
                 WHERE roll_number LIKE $1
                 ORDER BY roll_number DESC
                 LIMIT 1",
            )
            .bind(&pattern)
            .fetch_optional(&pool)
            .await
            .map_err(|e| map_err(&e))?;

            Ok(top_code.as_deref().and_then(parse_sequence_suffix))
        })
    }

    fn reconcile_pending_worker(
        &self,
        current_ticket: &str,
        worker_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, RollStoreError>> + Send + '_>> {
        let pool = self.pool.clone();
        let current_ticket = current_ticket.to_owned();
        let worker_id = worker_id.to_owned();
        Box::pin(async move {
            let machine_id: Option<String> = sqlx::query_scalar(
                "SELECT machine_id FROM inspection_tickets WHERE ticket_id = $1",
            )
            .bind(&current_ticket)
            .fetch_optional(&pool)
            .await
            .map_err(|e| map_err(&e))?
            .flatten();

            let Some(machine_id) = machine_id else {
                return Ok(0);
            };

            let previous_roll: Option<String> = sqlx::query_scalar(
                "SELECT fr.id FROM fabric_rolls fr
                 JOIN inspection_tickets it ON fr.ticket_id = it.ticket_id
                 WHERE it.machine_id = $1 AND it.ticket_id != $2
                 ORDER BY fr.roll_number DESC
                 LIMIT 1",
            )
            .bind(&machine_id)
            .bind(&current_ticket)
            .fetch_optional(&pool)
            .await
            .map_err(|e| map_err(&e))?;

            let Some(previous_roll) = previous_roll else {
                return Ok(0);
            };

            let result = sqlx::query(
                "UPDATE individual_productions
                 SET worker_id = $1
                 WHERE roll_id = $2 AND worker_id = $3",
            )
            .bind(&worker_id)
            .bind(&previous_roll)
            .bind(PENDING_WORKER_ID)
            .execute(&pool)
            .await
            .map_err(|e| map_err(&e))?;

            let updated = result.rows_affected();
            if updated > 0 {
                tracing::info!(
                    roll_id = %previous_roll,
                    worker_id = %worker_id,
                    rows = updated,
                    "reassigned pending production rows"
                );
            }
            Ok(updated)
        })
    }
}
