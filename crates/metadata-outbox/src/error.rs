//! Error taxonomy for the metadata outbox engine.
//!
//! Callers branch on the variant, not the message: `DuplicateOutboxEntry`
//! is a business-level signal an idempotent producer may treat as success,
//! `OutboxEntryNotFound` means "log and move on", and `Internal` is the only
//! variant a worker should retry.

use thiserror::Error;

/// Top-level error returned by every [`crate::OutboxRepository`] method.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The caller violated a precondition. Not retried.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// `create` found a conflicting non-terminal row for the same
    /// `(entity_id, entity_type)` pair. Callers may treat this as success.
    #[error("duplicate outbox entry for entity_id={entity_id:?} entity_type={entity_type:?}")]
    DuplicateOutboxEntry {
        entity_id: String,
        entity_type: String,
    },

    /// A conditional update affected zero rows: either the id does not
    /// exist or the status/retry-budget precondition did not hold.
    #[error("outbox entry not found or precondition failed: id={id}")]
    OutboxEntryNotFound { id: String },

    /// Any database error (connection, scan, commit) or metadata
    /// (de)serialization failure. Treated as transient by workers.
    #[error("internal outbox error ({entity}): {source}")]
    Internal {
        entity: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl OutboxError {
    pub(crate) fn internal(entity: &'static str, source: impl Into<anyhow::Error>) -> Self {
        OutboxError::Internal {
            entity,
            source: source.into(),
        }
    }
}

/// Sub-taxonomy of [`OutboxError::Validation`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("entity_id must not be empty")]
    EntityIdEmpty,

    #[error("entity_id exceeds {max} bytes (got {actual})")]
    EntityIdTooLong { actual: usize, max: usize },

    #[error("invalid entity_type: {0:?}")]
    InvalidEntityType(String),

    #[error("metadata must not be absent")]
    MetadataNil,

    #[error("metadata exceeds {max} bytes serialized (got {actual})")]
    MetadataTooLarge { actual: usize, max: usize },

    #[error("failed to marshal metadata to JSON: {0}")]
    MarshalMetadata(String),

    #[error("id is not a valid identifier: {0:?}")]
    InvalidId(String),

    #[error("error message must not be empty")]
    ErrorMessageEmpty,

    #[error("next_retry_at must not be in the past")]
    NextRetryAtInPast,
}

pub type Result<T> = std::result::Result<T, OutboxError>;
