//! Remediation execution repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::RemediationExecution;

/// Repository interface for RemediationExecution persistence.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Insert a new execution. Fails with `AlreadyExists` on ID collision.
    async fn insert(&self, execution: &RemediationExecution) -> DomainResult<()>;

    /// Get an execution by ID.
    async fn get(&self, id: Uuid) -> DomainResult<Option<RemediationExecution>>;

    /// Conditionally update an execution; bumps `execution.version` on
    /// success.
    async fn update(&self, execution: &mut RemediationExecution) -> DomainResult<()>;

    /// All executions for an alert.
    async fn list_by_alert(&self, alert_id: Uuid) -> DomainResult<Vec<RemediationExecution>>;

    /// Non-terminal execution for `(action, alert)`, if any. Used to
    /// enforce at-most-one concurrent execution per pair.
    async fn find_open(
        &self,
        action_id: Uuid,
        alert_id: Uuid,
    ) -> DomainResult<Option<RemediationExecution>>;

    /// Executions created at or after the given instant, newest first.
    async fn list_since(&self, since: DateTime<Utc>)
        -> DomainResult<Vec<RemediationExecution>>;

    /// Delete terminal executions older than `before`, honoring the
    /// constitutional flag.
    async fn delete_expired(
        &self,
        before: DateTime<Utc>,
        constitutional: bool,
    ) -> DomainResult<u64>;
}
