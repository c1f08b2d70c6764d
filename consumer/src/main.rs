//! Worker entry point: drains the inspection queue into PostgreSQL.
//!
//! Exactly one worker runs per deployment. Startup order: verify Redis is
//! reachable (fatal if not — a worker that cannot pop is useless), apply
//! migrations, drain any dead-letter spool left by a previous run back
//! onto the queue tail, then consume until SIGINT. The in-flight payload
//! completes before shutdown.

use anyhow::Context;
use loomline_consumer::{DeadLetterSpool, PersistenceConsumer, WorkerConfig};
use loomline_core::counter::CounterStore;
use loomline_postgres::PostgresRollStore;
use loomline_redis::{RedisCounterStore, RedisPayloadQueue};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = WorkerConfig::from_env().context("reading worker configuration")?;
    tracing::info!(queue = %config.queue_name, "worker starting");

    let manager = loomline_redis::connect(&config.redis_url)
        .await
        .context("connecting to redis")?;
    let health = RedisCounterStore::new(manager.clone());
    anyhow::ensure!(
        health.ping().await,
        "cannot reach redis at startup, refusing to run blind"
    );
    let queue = RedisPayloadQueue::new(manager);

    let pool = loomline_postgres::connect(&config.database_url)
        .await
        .context("connecting to postgres")?;
    loomline_postgres::run_migrations(&pool)
        .await
        .context("applying migrations")?;
    let store = PostgresRollStore::new(pool);

    let spool = DeadLetterSpool::new(&config.spool_path);
    match spool.drain_into(&queue, &config.queue_name).await {
        Ok(0) => {}
        Ok(restored) => tracing::info!(restored, "restored spooled payloads from previous run"),
        Err(e) => tracing::error!(error = %e, "could not drain dead-letter spool"),
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let consumer = PersistenceConsumer::new(
        Arc::new(queue),
        Arc::new(store),
        spool,
        shutdown_rx,
    )
    .with_queue_name(config.queue_name);
    let handle = consumer.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received, draining in-flight work");
    let _ = shutdown_tx.send(());
    handle.await.context("joining consumer task")?;

    tracing::info!("worker stopped");
    Ok(())
}
