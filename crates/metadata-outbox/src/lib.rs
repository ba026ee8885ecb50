//! Transactional outbox engine for durable, at-least-once delivery of
//! business-entity side effects.
//!
//! A producer writes an [`entry::OutboxEntry`] atomically with its own
//! business transaction via [`repository::OutboxRepository::create_in`]; an
//! external worker pool then claims due entries in batches with
//! [`repository::OutboxRepository::claim_pending_batch`], dispatches them,
//! and reports the outcome back with `mark_published` / `mark_failed` /
//! `mark_dlq`. See each module for the details this summary omits.

pub mod config;
pub mod entry;
pub mod error;
pub mod jitter;
pub mod repository;
pub mod sanitize;

pub use config::{OutboxConfig, ENV_DB_URL};
pub use entry::{EntityType, OutboxEntry, OutboxStatus};
pub use error::{OutboxError, Result, ValidationError};
pub use jitter::secure_random_f64;
pub use repository::{parse_id, OutboxRepository};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connect to Postgres using [`ENV_DB_URL`], with a pool sized for a
/// single worker process. Callers running a larger service alongside this
/// crate should build their own `PgPool` and pass it to
/// [`OutboxRepository::new`] instead.
pub async fn connect_from_env() -> anyhow::Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .map_err(|_| anyhow::anyhow!("{ENV_DB_URL} is not set"))?;

    PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .map_err(anyhow::Error::from)
}

/// Run the embedded migrations against `pool`. Idempotent — safe to call
/// on every process start.
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
