//! PostgreSQL roll store for the Loomline pipeline.
//!
//! This crate implements the [`RollStore`] seam against PostgreSQL using
//! sqlx. It owns the four pipeline tables (tickets, rolls, per-worker
//! production rows, per-defect rows) and is written by exactly one
//! persistence consumer per deployment.
//!
//! # Idempotency
//!
//! Every statement in the persist transaction is an upsert keyed on the
//! row's natural identity, so replaying a payload (at-least-once queue
//! delivery) can never create duplicate rows or double-count meters:
//!
//! - `inspection_tickets` conflicts on `ticket_id`
//! - `fabric_rolls` conflicts on `id`, and `roll_number` is kept at its
//!   existing value on conflict — a stale retried payload can update status
//!   and meters but can never revert a corrected code
//! - `individual_productions` conflicts on `(roll_id, worker_id, shift)`
//! - `production_errors` are deleted and reinserted per production row, so
//!   a replay always leaves exactly the latest payload's defect set
//!
//! Roll totals are re-derived from the production rows inside the same
//! transaction rather than trusted from the payload.
//!
//! [`RollStore`]: loomline_core::store::RollStore

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod roll_store;

pub use roll_store::PostgresRollStore;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Open a connection pool against the given PostgreSQL URL.
///
/// # Errors
///
/// Returns the underlying [`sqlx::Error`] when the pool cannot connect.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
}

/// Apply the pipeline's embedded migrations.
///
/// # Errors
///
/// Returns the underlying [`sqlx::migrate::MigrateError`] when a migration
/// fails to apply.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
