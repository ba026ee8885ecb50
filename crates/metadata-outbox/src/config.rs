//! Tunable constants for the outbox engine, overridable via environment
//! variables with sensible defaults as a fallback.

use std::env;
use std::sync::Once;
use std::time::Duration;

/// Env var read by [`crate::connect_from_env`] for the Postgres connection
/// string. Pool sizing/connection setup is otherwise the caller's concern —
/// the repository is constructed from an already-built `PgPool`.
pub const ENV_DB_URL: &str = "OUTBOX_DATABASE_URL";

const ENV_DEFAULT_BATCH_SIZE: &str = "OUTBOX_DEFAULT_BATCH_SIZE";
const ENV_MAX_BATCH_SIZE: &str = "OUTBOX_MAX_BATCH_SIZE";
const ENV_STALE_PROCESSING_SECS: &str = "OUTBOX_STALE_PROCESSING_SECS";
const ENV_MAX_ERROR_MESSAGE_LEN: &str = "OUTBOX_MAX_ERROR_MESSAGE_LEN";
const ENV_MAX_METADATA_BYTES: &str = "OUTBOX_MAX_METADATA_BYTES";
const ENV_MAX_ENTITY_ID_LEN: &str = "OUTBOX_MAX_ENTITY_ID_LEN";
const ENV_DEFAULT_MAX_RETRIES: &str = "OUTBOX_DEFAULT_MAX_RETRIES";

static PARSE_WARNED: Once = Once::new();

/// Runtime-tunable knobs for the outbox engine, with sensible defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxConfig {
    /// Used when a caller passes `batch_size <= 0` to `claim_pending_batch`.
    pub default_batch_size: i64,
    /// Ceiling a requested batch size is clamped to.
    pub max_batch_size: i64,
    /// How long a row may sit in `PROCESSING` before claim treats its
    /// owner as crashed and reclaims it.
    pub stale_processing: Duration,
    /// Max length a sanitized `last_error` string is truncated to (before
    /// the `...[truncated]` suffix), consulted by [`crate::sanitize::sanitize`]
    /// via `mark_failed`/`mark_dlq`.
    pub max_error_message_len: usize,
    /// Max serialized size of an entry's `metadata` JSON, enforced by
    /// [`crate::OutboxEntry::new`].
    pub max_metadata_bytes: usize,
    /// Max length of `entity_id`, enforced by [`crate::OutboxEntry::new`].
    pub max_entity_id_len: usize,
    /// `max_retries` assigned to entries built via [`crate::OutboxEntry::new`]
    /// when the caller does not override it.
    pub default_max_retries: i32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        OutboxConfig {
            default_batch_size: 100,
            max_batch_size: 1000,
            stale_processing: Duration::from_secs(5 * 60),
            max_error_message_len: 500,
            max_metadata_bytes: 64 * 1024,
            max_entity_id_len: 255,
            default_max_retries: 3,
        }
    }
}

impl OutboxConfig {
    /// Build a config from environment variables, falling back to the
    /// default for any variable that is unset or fails to parse. A parse
    /// failure is logged once at `warn` — it is never a hard error, since
    /// this crate must still start with no environment configured.
    pub fn from_env() -> Self {
        let d = OutboxConfig::default();
        OutboxConfig {
            default_batch_size: env_i64(ENV_DEFAULT_BATCH_SIZE, d.default_batch_size),
            max_batch_size: env_i64(ENV_MAX_BATCH_SIZE, d.max_batch_size),
            stale_processing: Duration::from_secs(env_u64(
                ENV_STALE_PROCESSING_SECS,
                d.stale_processing.as_secs(),
            )),
            max_error_message_len: env_usize(ENV_MAX_ERROR_MESSAGE_LEN, d.max_error_message_len),
            max_metadata_bytes: env_usize(ENV_MAX_METADATA_BYTES, d.max_metadata_bytes),
            max_entity_id_len: env_usize(ENV_MAX_ENTITY_ID_LEN, d.max_entity_id_len),
            default_max_retries: env_i32(ENV_DEFAULT_MAX_RETRIES, d.default_max_retries),
        }
    }

    /// Normalize a caller-requested claim batch size: `<=0` becomes the
    /// configured default, and anything above `max_batch_size` is clamped.
    pub fn normalize_batch_size(&self, requested: i64) -> i64 {
        let size = if requested <= 0 {
            self.default_batch_size
        } else {
            requested
        };
        size.min(self.max_batch_size)
    }
}

fn warn_parse_failure(var: &str, raw: &str) {
    PARSE_WARNED.call_once(|| {
        tracing::warn!(
            var,
            raw,
            "OutboxConfig::from_env: failed to parse env var, using default"
        );
    });
}

fn env_i64(var: &str, default: i64) -> i64 {
    match env::var(var) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn_parse_failure(var, &raw);
            default
        }),
        Err(_) => default,
    }
}

fn env_i32(var: &str, default: i32) -> i32 {
    match env::var(var) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn_parse_failure(var, &raw);
            default
        }),
        Err(_) => default,
    }
}

fn env_u64(var: &str, default: u64) -> u64 {
    match env::var(var) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn_parse_failure(var, &raw);
            default
        }),
        Err(_) => default,
    }
}

fn env_usize(var: &str, default: usize) -> usize {
    match env::var(var) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn_parse_failure(var, &raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let c = OutboxConfig::default();
        assert_eq!(c.default_batch_size, 100);
        assert_eq!(c.max_batch_size, 1000);
        assert_eq!(c.stale_processing, Duration::from_secs(300));
        assert_eq!(c.max_error_message_len, 500);
        assert_eq!(c.max_metadata_bytes, 65_536);
        assert_eq!(c.max_entity_id_len, 255);
    }

    #[test]
    fn normalize_batch_size_applies_default_and_ceiling() {
        let c = OutboxConfig::default();
        assert_eq!(c.normalize_batch_size(0), 100);
        assert_eq!(c.normalize_batch_size(-5), 100);
        assert_eq!(c.normalize_batch_size(50), 50);
        assert_eq!(c.normalize_batch_size(5000), 1000);
    }
}
