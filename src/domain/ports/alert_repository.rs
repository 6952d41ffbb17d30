//! Alert repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Alert, AlertStatus};

/// Repository interface for Alert persistence.
///
/// Updates are conditional on the record's `version` field: `update` CASes
/// against the caller's copy and bumps the version in place on success, or
/// fails with `DomainError::VersionMismatch` when another writer interleaved.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// Insert a new alert. Fails with `AlreadyExists` on ID collision.
    async fn insert(&self, alert: &Alert) -> DomainResult<()>;

    /// Get an alert by ID.
    async fn get(&self, id: Uuid) -> DomainResult<Option<Alert>>;

    /// Conditionally update an alert; bumps `alert.version` on success.
    async fn update(&self, alert: &mut Alert) -> DomainResult<()>;

    /// The live alert (active/acknowledged/escalated) for a correlation
    /// key, if one exists. At most one may be live at a time.
    async fn find_live_by_correlation(&self, correlation_key: &str)
        -> DomainResult<Option<Alert>>;

    /// Alert previously admitted under a producer-supplied external ID
    /// (idempotent ingress).
    async fn find_by_external_id(&self, external_id: &str) -> DomainResult<Option<Alert>>;

    /// All alerts in a given status.
    async fn list_by_status(&self, status: AlertStatus) -> DomainResult<Vec<Alert>>;

    /// Alerts created at or after the given instant, newest first.
    async fn list_since(&self, since: DateTime<Utc>) -> DomainResult<Vec<Alert>>;

    /// Delete terminal alerts older than `before`, honoring the
    /// constitutional flag (`constitutional` selects which population).
    async fn delete_expired(
        &self,
        before: DateTime<Utc>,
        constitutional: bool,
    ) -> DomainResult<u64>;
}
