//! Notification job repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::NotificationJob;

/// Repository interface for NotificationJob persistence.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job. Fails with `AlreadyExists` on ID collision, which
    /// makes `enqueue` idempotent on `job_id`.
    async fn insert(&self, job: &NotificationJob) -> DomainResult<()>;

    /// Get a job by ID.
    async fn get(&self, id: Uuid) -> DomainResult<Option<NotificationJob>>;

    /// Conditionally update a job; bumps `job.version` on success.
    async fn update(&self, job: &mut NotificationJob) -> DomainResult<()>;

    /// Pending jobs with `scheduled_not_before <= now`, ordered by
    /// priority (desc) then `scheduled_not_before` (asc).
    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> DomainResult<Vec<NotificationJob>>;

    /// Non-terminal jobs belonging to an alert (for cancellation on
    /// resolve/suppress).
    async fn list_open_by_alert(&self, alert_id: Uuid) -> DomainResult<Vec<NotificationJob>>;

    /// Delete terminal jobs older than `before`.
    async fn delete_expired(&self, before: DateTime<Utc>) -> DomainResult<u64>;
}
