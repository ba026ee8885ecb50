//! The repository: every mutation of `metadata_outbox` goes through here.
//!
//! Operations participate in a caller-supplied transaction when the caller
//! passes one explicitly (see [`OutboxRepository::create_in`]); otherwise
//! they run their own short transaction (claim) or autocommit (everything
//! else) against the pool.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgExecutor, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::config::OutboxConfig;
use crate::entry::{EntityType, OutboxEntry, OutboxStatus};
use crate::error::{OutboxError, Result, ValidationError};

const ENTITY_CREATE: &str = "create";
const ENTITY_CLAIM: &str = "claim_pending_batch";
const ENTITY_MARK_PUBLISHED: &str = "mark_published";
const ENTITY_MARK_FAILED: &str = "mark_failed";
const ENTITY_MARK_DLQ: &str = "mark_dlq";
const ENTITY_FIND_BY_ENTITY_ID: &str = "find_by_entity_id";
const ENTITY_FIND_METADATA: &str = "find_metadata_by_entity_ids";
const ENTITY_DELETE_OLD: &str = "delete_old_entries";

/// Parse an externally-supplied id string (e.g. from a wire message) into
/// the `Uuid` the rest of this crate's API expects.
pub fn parse_id(raw: &str) -> std::result::Result<Uuid, ValidationError> {
    Uuid::parse_str(raw).map_err(|_| ValidationError::InvalidId(raw.to_string()))
}

/// Wraps a single Postgres connection pool. Cheap to clone (it's just the
/// pool handle); construct once per process.
#[derive(Clone)]
pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        OutboxRepository { pool }
    }

    /// Insert `entry` with conditional-unique duplicate suppression,
    /// enrolled in the caller's own business transaction.
    ///
    /// This is the only operation meant to share a transaction with the
    /// producer: the insert of the outbox row must commit atomically with
    /// whatever business state produced it.
    pub async fn create_in(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &OutboxEntry,
    ) -> Result<()> {
        self.create_with(&mut **tx, entry).await
    }

    /// Insert `entry` against the pool directly (autocommit), for callers
    /// with no surrounding business transaction to enroll in.
    pub async fn create(&self, entry: &OutboxEntry) -> Result<()> {
        self.create_with(&self.pool, entry).await
    }

    async fn create_with<'e, E>(&self, executor: E, entry: &OutboxEntry) -> Result<()>
    where
        E: PgExecutor<'e>,
    {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            insert into metadata_outbox (
                id, entity_id, entity_type, metadata, status,
                retry_count, max_retries, next_retry_at, processing_started_at,
                last_error, created_at, updated_at, processed_at
            ) values (
                $1, $2, $3, $4, 'PENDING',
                0, $5, null, null,
                null, $6, $6, null
            )
            on conflict (entity_id, entity_type) where status in ('PENDING', 'PROCESSING') do nothing
            returning id
            "#,
        )
        .bind(entry.id)
        .bind(&entry.entity_id)
        .bind(entry.entity_type.as_str())
        .bind(&entry.metadata)
        .bind(entry.max_retries)
        .bind(entry.created_at)
        .fetch_optional(executor)
        .await
        .map_err(|e| OutboxError::internal(ENTITY_CREATE, e))?;

        if row.is_none() {
            return Err(OutboxError::DuplicateOutboxEntry {
                entity_id: entry.entity_id.clone(),
                entity_type: entry.entity_type.as_str().to_string(),
            });
        }

        Ok(())
    }

    /// Atomically reserve up to `batch_size` due entries: PENDING rows,
    /// FAILED rows whose retry is due and budget remains, and PROCESSING
    /// rows abandoned by a crashed worker (stale past
    /// `config.stale_processing`).
    ///
    /// Runs `SELECT ... FOR UPDATE SKIP LOCKED` inside one transaction so
    /// concurrent callers never see the same row, deduplicates the
    /// candidate set in application code (defense in depth against the
    /// partial unique index ever being out of sync with runtime state —
    /// see crate-level docs), then bulk-updates the kept ids to
    /// `PROCESSING` and commits. Returns at most `batch_size` entries, or
    /// fewer (possibly zero) with no error.
    pub async fn claim_pending_batch(
        &self,
        batch_size: i64,
        config: &OutboxConfig,
    ) -> Result<Vec<OutboxEntry>> {
        let batch_size = config.normalize_batch_size(batch_size);
        let fetch_size = (batch_size.saturating_mul(3)).min(config.max_batch_size);

        let now = Utc::now();
        let stale_cutoff = now
            - chrono::Duration::from_std(config.stale_processing)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OutboxError::internal(ENTITY_CLAIM, e))?;

        // Ordered createdAt ASC at the database level (see crate-level
        // design notes on the ambiguous ASC-vs-dedup-subquery source
        // variant): application dedup below handles residual duplicates,
        // it doesn't decide ordering.
        let candidate_rows = sqlx::query(
            r#"
            select id, entity_id, entity_type, metadata, status, retry_count, max_retries,
                   next_retry_at, processing_started_at, last_error, created_at, updated_at,
                   processed_at
            from metadata_outbox
            where status = 'PENDING'
               or (status = 'FAILED' and next_retry_at <= $1 and retry_count < max_retries)
               or (status = 'PROCESSING' and processing_started_at < $2)
            order by created_at asc
            limit $3
            for update skip locked
            "#,
        )
        .bind(now)
        .bind(stale_cutoff)
        .bind(fetch_size)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| OutboxError::internal(ENTITY_CLAIM, e))?;

        let fetched = candidate_rows.len();

        let mut candidates = Vec::with_capacity(fetched);
        for row in &candidate_rows {
            candidates.push(row_to_entry(row).map_err(|e| OutboxError::internal(ENTITY_CLAIM, e))?);
        }

        // Dedup: keep first occurrence per (entity_id, entity_type).
        // `candidates` is already createdAt-ascending so "first" is oldest.
        let mut seen: HashSet<(String, EntityType)> = HashSet::new();
        let mut kept: Vec<OutboxEntry> = Vec::new();
        for entry in candidates {
            let key = (entry.entity_id.clone(), entry.entity_type);
            if seen.insert(key) {
                kept.push(entry);
            }
        }
        kept.sort_by_key(|e| e.created_at);
        kept.truncate(batch_size as usize);

        if kept.is_empty() {
            tx.rollback()
                .await
                .map_err(|e| OutboxError::internal(ENTITY_CLAIM, e))?;
            tracing::debug!(fetched, kept = 0, claimed = 0, "claim_pending_batch");
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = kept.iter().map(|e| e.id).collect();

        sqlx::query(
            r#"
            update metadata_outbox
            set status = 'PROCESSING', processing_started_at = $1, updated_at = $1
            where id = any($2)
            "#,
        )
        .bind(now)
        .bind(&ids)
        .execute(&mut *tx)
        .await
        .map_err(|e| OutboxError::internal(ENTITY_CLAIM, e))?;

        tx.commit()
            .await
            .map_err(|e| OutboxError::internal(ENTITY_CLAIM, e))?;

        for entry in kept.iter_mut() {
            entry.status = OutboxStatus::Processing;
            entry.processing_started_at = Some(now);
        }

        tracing::debug!(fetched, kept = kept.len(), claimed = kept.len(), "claim_pending_batch");

        Ok(kept)
    }

    /// `PROCESSING -> PUBLISHED`. Fails with [`OutboxError::OutboxEntryNotFound`]
    /// if the row is not currently `PROCESSING` with a recorded claim.
    pub async fn mark_published(&self, id: Uuid) -> Result<()> {
        let now = Utc::now();

        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            update metadata_outbox
            set status = 'PUBLISHED', updated_at = $1, processed_at = $1
            where id = $2 and status = 'PROCESSING' and processing_started_at is not null
            returning processing_started_at
            "#,
        )
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| OutboxError::internal(ENTITY_MARK_PUBLISHED, e))?;

        match row {
            Some((started,)) => {
                debug_assert!(started <= now);
                Ok(())
            }
            None => Err(OutboxError::OutboxEntryNotFound { id: id.to_string() }),
        }
    }

    /// `PROCESSING -> FAILED`, incrementing `retry_count` and sanitizing
    /// `err_msg`. Fails with [`OutboxError::OutboxEntryNotFound`] if the
    /// row isn't `PROCESSING` with retry budget remaining.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        err_msg: &str,
        next_retry_at: DateTime<Utc>,
        config: &OutboxConfig,
    ) -> Result<()> {
        let now = Utc::now();

        if err_msg.is_empty() {
            return Err(ValidationError::ErrorMessageEmpty.into());
        }
        if next_retry_at < now {
            return Err(ValidationError::NextRetryAtInPast.into());
        }

        let sanitized = crate::sanitize::sanitize(err_msg, config.max_error_message_len);

        let row: Option<(i32, i32, DateTime<Utc>)> = sqlx::query_as(
            r#"
            update metadata_outbox
            set status = 'FAILED',
                retry_count = retry_count + 1,
                last_error = $1,
                next_retry_at = $2,
                updated_at = $3
            where id = $4
              and status = 'PROCESSING'
              and processing_started_at is not null
              and retry_count < max_retries
            returning retry_count, max_retries, processing_started_at
            "#,
        )
        .bind(&sanitized)
        .bind(next_retry_at)
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| OutboxError::internal(ENTITY_MARK_FAILED, e))?;

        match row {
            Some((retry_count, max_retries, started)) => {
                debug_assert!(retry_count <= max_retries);
                debug_assert!(started <= now);
                Ok(())
            }
            None => Err(OutboxError::OutboxEntryNotFound { id: id.to_string() }),
        }
    }

    /// `{PROCESSING, FAILED} -> DLQ`, the terminal exhaustion transition.
    /// Fails with [`OutboxError::OutboxEntryNotFound`] if the row isn't
    /// eligible (wrong status, retry budget not yet exhausted, or already
    /// published).
    pub async fn mark_dlq(&self, id: Uuid, err_msg: &str, config: &OutboxConfig) -> Result<()> {
        let now = Utc::now();

        if err_msg.is_empty() {
            return Err(ValidationError::ErrorMessageEmpty.into());
        }

        let sanitized = crate::sanitize::sanitize(err_msg, config.max_error_message_len);

        let row: Option<(i32, i32, Option<DateTime<Utc>>)> = sqlx::query_as(
            r#"
            update metadata_outbox
            set status = 'DLQ',
                last_error = $1,
                updated_at = $2,
                retry_count = retry_count + 1
            where id = $3
              and status in ('PROCESSING', 'FAILED')
              and retry_count >= max_retries - 1
              and processed_at is null
            returning retry_count, max_retries, processed_at
            "#,
        )
        .bind(&sanitized)
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| OutboxError::internal(ENTITY_MARK_DLQ, e))?;

        match row {
            Some((retry_count, max_retries, processed_at)) => {
                debug_assert!(retry_count >= max_retries);
                debug_assert!(processed_at.is_none());
                tracing::warn!(entry_id = %id, retry_count, max_retries, "mark_dlq: entry moved to dead-letter queue");
                Ok(())
            }
            None => Err(OutboxError::OutboxEntryNotFound { id: id.to_string() }),
        }
    }

    /// Newest row for `(entity_id, entity_type)`, used by producers to
    /// probe idempotency before re-issuing a business operation. `None` if
    /// no such row exists — that is not an error.
    pub async fn find_by_entity_id(
        &self,
        entity_id: &str,
        entity_type: EntityType,
    ) -> Result<Option<OutboxEntry>> {
        if entity_id.is_empty() {
            return Err(ValidationError::EntityIdEmpty.into());
        }

        let row = sqlx::query(
            r#"
            select id, entity_id, entity_type, metadata, status, retry_count, max_retries,
                   next_retry_at, processing_started_at, last_error, created_at, updated_at,
                   processed_at
            from metadata_outbox
            where entity_id = $1 and entity_type = $2
            order by created_at desc
            limit 1
            "#,
        )
        .bind(entity_id)
        .bind(entity_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| OutboxError::internal(ENTITY_FIND_BY_ENTITY_ID, e))?;

        match row {
            Some(row) => Ok(Some(
                row_to_entry(&row).map_err(|e| OutboxError::internal(ENTITY_FIND_BY_ENTITY_ID, e))?,
            )),
            None => Ok(None),
        }
    }

    /// Batch metadata lookup: newest row per `entity_id`, picked in a
    /// single query. Rows whose metadata fails to decode are skipped from
    /// the returned map and surfaced by id in the error map instead; rows
    /// with an empty metadata object are omitted from both.
    pub async fn find_metadata_by_entity_ids(
        &self,
        entity_ids: &[String],
        entity_type: EntityType,
    ) -> Result<(HashMap<String, Value>, HashMap<String, OutboxError>)> {
        let rows = sqlx::query(
            r#"
            select distinct on (entity_id) entity_id, metadata
            from metadata_outbox
            where entity_id = any($1) and entity_type = $2
            order by entity_id, created_at desc
            "#,
        )
        .bind(entity_ids)
        .bind(entity_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OutboxError::internal(ENTITY_FIND_METADATA, e))?;

        let mut metadata_by_id = HashMap::new();
        let mut errors_by_id = HashMap::new();

        for row in rows {
            let entity_id: String = row
                .try_get("entity_id")
                .map_err(|e| OutboxError::internal(ENTITY_FIND_METADATA, e))?;

            match row.try_get::<Value, _>("metadata") {
                Ok(value) => {
                    let is_empty = value.as_object().is_some_and(|m| m.is_empty());
                    if !is_empty {
                        metadata_by_id.insert(entity_id, value);
                    }
                }
                Err(e) => {
                    errors_by_id.insert(
                        entity_id,
                        OutboxError::internal(
                            ENTITY_FIND_METADATA,
                            anyhow::anyhow!("UnmarshalMetadata: {e}"),
                        ),
                    );
                }
            }
        }

        Ok((metadata_by_id, errors_by_id))
    }

    /// Retention cleanup: delete `PUBLISHED` rows older than `older_than`
    /// by `processed_at`, and `DLQ` rows older than `older_than` by
    /// `updated_at`. The asymmetry is intentional (see crate-level design
    /// notes) — `DLQ` has no `processed_at`. Returns the number deleted.
    pub async fn delete_old_entries(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            delete from metadata_outbox
            where (status = 'PUBLISHED' and processed_at < $1)
               or (status = 'DLQ' and updated_at < $1)
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(|e| OutboxError::internal(ENTITY_DELETE_OLD, e))?;

        Ok(result.rows_affected())
    }
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> anyhow::Result<OutboxEntry> {
    let entity_type_str: String = row.try_get("entity_type")?;
    let status_str: String = row.try_get("status")?;

    Ok(OutboxEntry {
        id: row.try_get("id")?,
        entity_id: row.try_get("entity_id")?,
        entity_type: EntityType::parse(&entity_type_str)
            .map_err(|e| anyhow::anyhow!("stored entity_type failed to parse: {e}"))?,
        metadata: row.try_get("metadata")?,
        status: OutboxStatus::parse(&status_str)?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        next_retry_at: row.try_get("next_retry_at")?,
        processing_started_at: row.try_get("processing_started_at")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_rejects_non_uuid() {
        assert!(parse_id("not-a-uuid").is_err());
    }

    #[test]
    fn parse_id_accepts_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
    }
}
