//! Domain errors for the Vigil alerting engine.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the Vigil system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Alert not found: {0}")]
    AlertNotFound(Uuid),

    #[error("Notification job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Remediation execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("Contact not found: {0}")]
    ContactNotFound(Uuid),

    #[error("Team not found: {0}")]
    TeamNotFound(Uuid),

    #[error("Escalation policy not found: {0}")]
    PolicyNotFound(Uuid),

    #[error("Remediation action not found: {0}")]
    ActionNotFound(Uuid),

    #[error("Record already exists: {entity} {id}")]
    AlreadyExists { entity: &'static str, id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Version mismatch on {entity} {id}: expected {expected}")]
    VersionMismatch {
        entity: &'static str,
        id: Uuid,
        expected: u64,
    },

    #[error("Malformed ingress event: {0}")]
    MalformedIngress(String),

    #[error("Ingress queue full (capacity {0})")]
    IngressFull(usize),

    #[error("Template error: {0}")]
    TemplateError(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Remediation refused: {0}")]
    RemediationRefused(String),

    #[error("Engine stopped")]
    EngineStopped,
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Whether the error is transient and worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::DatabaseError(_)
        )
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                DomainError::StoreUnavailable(err.to_string())
            }
            other => DomainError::DatabaseError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
