//! In-memory representation of an outbox entry, its status lifecycle, and
//! constructor-time validation.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::config::OutboxConfig;
use crate::error::{OutboxError, ValidationError};

/// Caller-provided reference to the domain entity this entry's metadata
/// request is tied to. Rejects any value outside the allowed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Transaction,
    Operation,
}

impl EntityType {
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityType::Transaction => "Transaction",
            EntityType::Operation => "Operation",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "Transaction" => Ok(EntityType::Transaction),
            "Operation" => Ok(EntityType::Operation),
            other => Err(ValidationError::InvalidEntityType(other.to_string())),
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an outbox entry. See [`OutboxStatus::can_transition_to`]
/// for the allowed transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Published,
    Failed,
    Dlq,
}

impl OutboxStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
            OutboxStatus::Dlq => "DLQ",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "PROCESSING" => Ok(OutboxStatus::Processing),
            "PUBLISHED" => Ok(OutboxStatus::Published),
            "FAILED" => Ok(OutboxStatus::Failed),
            "DLQ" => Ok(OutboxStatus::Dlq),
            other => Err(anyhow::anyhow!("invalid outbox status: {other}")),
        }
    }

    /// Whether a transition from `self` to `target` is one of the allowed
    /// edges of the state machine (claim / worker-outcome / reclaim).
    pub const fn can_transition_to(self, target: OutboxStatus) -> bool {
        matches!(
            (self, target),
            (OutboxStatus::Pending, OutboxStatus::Processing)
                | (OutboxStatus::Processing, OutboxStatus::Published)
                | (OutboxStatus::Processing, OutboxStatus::Failed)
                | (OutboxStatus::Processing, OutboxStatus::Dlq)
                | (OutboxStatus::Failed, OutboxStatus::Processing)
                | (OutboxStatus::Failed, OutboxStatus::Dlq)
        )
    }

    /// `Published` and `Dlq` accept no further mutation.
    pub const fn is_terminal(self) -> bool {
        matches!(self, OutboxStatus::Published | OutboxStatus::Dlq)
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbox entry: a pending asynchronous side-effect tied to a domain
/// entity, durable in `metadata_outbox` and owned by the repository once
/// created.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub metadata: Value,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// Construct a new entry in status `Pending`, validating the caller's
    /// inputs against `config`'s limits.
    ///
    /// `max_retries` is taken from `config.default_max_retries` — not a
    /// caller input — callers provide `entity_id`, `entity_type`, and
    /// `metadata` only.
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: EntityType,
        metadata: Option<Value>,
        config: &OutboxConfig,
    ) -> Result<Self, OutboxError> {
        let entity_id = entity_id.into();

        if entity_id.is_empty() {
            return Err(ValidationError::EntityIdEmpty.into());
        }
        if entity_id.len() > config.max_entity_id_len {
            return Err(ValidationError::EntityIdTooLong {
                actual: entity_id.len(),
                max: config.max_entity_id_len,
            }
            .into());
        }

        let metadata = metadata.ok_or(ValidationError::MetadataNil)?;
        if !metadata.is_object() {
            return Err(ValidationError::MarshalMetadata(
                "metadata top-level value must be a JSON object".to_string(),
            )
            .into());
        }

        let encoded = serde_json::to_vec(&metadata)
            .map_err(|e| ValidationError::MarshalMetadata(e.to_string()))?;
        if encoded.len() > config.max_metadata_bytes {
            return Err(ValidationError::MetadataTooLarge {
                actual: encoded.len(),
                max: config.max_metadata_bytes,
            }
            .into());
        }

        let now = Utc::now();
        Ok(OutboxEntry {
            id: Uuid::new_v4(),
            entity_id,
            entity_type,
            metadata,
            status: OutboxStatus::Pending,
            retry_count: 0,
            max_retries: config.default_max_retries,
            next_retry_at: None,
            processing_started_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta() -> Value {
        json!({"a": 1})
    }

    fn config() -> OutboxConfig {
        OutboxConfig {
            default_max_retries: 5,
            ..OutboxConfig::default()
        }
    }

    #[test]
    fn constructs_pending_entry_with_defaults() {
        let e = OutboxEntry::new("acct-1", EntityType::Transaction, Some(meta()), &config())
            .unwrap();
        assert_eq!(e.status, OutboxStatus::Pending);
        assert_eq!(e.retry_count, 0);
        assert_eq!(e.max_retries, 5);
        assert!(e.processing_started_at.is_none());
        assert!(e.processed_at.is_none());
        assert_eq!(e.created_at, e.updated_at);
    }

    #[test]
    fn rejects_empty_entity_id() {
        let err = OutboxEntry::new("", EntityType::Transaction, Some(meta()), &config())
            .unwrap_err();
        assert!(matches!(
            err,
            OutboxError::Validation(ValidationError::EntityIdEmpty)
        ));
    }

    #[test]
    fn rejects_oversized_entity_id() {
        let config = config();
        let id = "x".repeat(config.max_entity_id_len + 1);
        let err = OutboxEntry::new(id, EntityType::Transaction, Some(meta()), &config)
            .unwrap_err();
        assert!(matches!(
            err,
            OutboxError::Validation(ValidationError::EntityIdTooLong { .. })
        ));
    }

    #[test]
    fn rejects_nil_metadata() {
        let err =
            OutboxEntry::new("acct-1", EntityType::Transaction, None, &config()).unwrap_err();
        assert!(matches!(
            err,
            OutboxError::Validation(ValidationError::MetadataNil)
        ));
    }

    #[test]
    fn rejects_non_object_metadata() {
        let err = OutboxEntry::new(
            "acct-1",
            EntityType::Transaction,
            Some(json!([1, 2])),
            &config(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            OutboxError::Validation(ValidationError::MarshalMetadata(_))
        ));
    }

    #[test]
    fn rejects_oversized_metadata() {
        let config = config();
        let big = "y".repeat(config.max_metadata_bytes + 1);
        let err = OutboxEntry::new(
            "acct-1",
            EntityType::Transaction,
            Some(json!({ "blob": big })),
            &config,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            OutboxError::Validation(ValidationError::MetadataTooLarge { .. })
        ));
    }

    #[test]
    fn entity_type_parse_roundtrip() {
        for t in [EntityType::Transaction, EntityType::Operation] {
            assert_eq!(EntityType::parse(t.as_str()).unwrap(), t);
        }
        assert!(EntityType::parse("Widget").is_err());
    }

    #[test]
    fn status_transition_table() {
        use OutboxStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Published));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Dlq));
        assert!(Failed.can_transition_to(Processing));
        assert!(Failed.can_transition_to(Dlq));

        // Disallowed edges.
        assert!(!Pending.can_transition_to(Published));
        assert!(!Published.can_transition_to(Processing));
        assert!(!Dlq.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Published));
    }

    #[test]
    fn terminal_states() {
        assert!(OutboxStatus::Published.is_terminal());
        assert!(OutboxStatus::Dlq.is_terminal());
        assert!(!OutboxStatus::Pending.is_terminal());
        assert!(!OutboxStatus::Processing.is_terminal());
        assert!(!OutboxStatus::Failed.is_terminal());
    }

    #[test]
    fn status_str_roundtrip() {
        for s in [
            OutboxStatus::Pending,
            OutboxStatus::Processing,
            OutboxStatus::Published,
            OutboxStatus::Failed,
            OutboxStatus::Dlq,
        ] {
            assert_eq!(OutboxStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(OutboxStatus::parse("BOGUS").is_err());
    }
}
