//! SQLite implementation of the AlertRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Alert, AlertSeverity, AlertStatus};
use crate::domain::ports::AlertRepository;

use super::{parse_dt, parse_dt_opt, parse_uuid, parse_uuid_opt};

#[derive(Clone)]
pub struct SqliteAlertRepository {
    pool: SqlitePool,
}

impl SqliteAlertRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: String,
    rule_name: String,
    severity: String,
    status: String,
    message: String,
    source: String,
    labels: String,
    annotations: String,
    correlation_key: String,
    external_id: Option<String>,
    constitutional_flag: i64,
    escalation_level: i64,
    policy_id: Option<String>,
    rule_cursor: i64,
    cursor_version: i64,
    merge_count: i64,
    degraded: i64,
    remediation_attempted: i64,
    remediation_success: Option<i64>,
    created_at: String,
    updated_at: String,
    acked_at: Option<String>,
    ack_by: Option<String>,
    resolved_at: Option<String>,
    schema_version: i64,
    version: i64,
}

impl TryFrom<AlertRow> for Alert {
    type Error = DomainError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(Alert {
            id: parse_uuid(&row.id)?,
            rule_name: row.rule_name,
            severity: AlertSeverity::from_str(&row.severity).ok_or_else(|| {
                DomainError::SerializationError(format!("bad severity '{}'", row.severity))
            })?,
            status: AlertStatus::from_str(&row.status).ok_or_else(|| {
                DomainError::SerializationError(format!("bad status '{}'", row.status))
            })?,
            message: row.message,
            source: row.source,
            labels: serde_json::from_str(&row.labels)?,
            annotations: serde_json::from_str(&row.annotations)?,
            correlation_key: row.correlation_key,
            external_id: row.external_id,
            constitutional_flag: row.constitutional_flag != 0,
            escalation_level: row.escalation_level as u32,
            policy_id: parse_uuid_opt(row.policy_id.as_deref())?,
            rule_cursor: row.rule_cursor as u32,
            cursor_version: row.cursor_version as u64,
            merge_count: row.merge_count as u32,
            degraded: row.degraded != 0,
            remediation_attempted: row.remediation_attempted != 0,
            remediation_success: row.remediation_success.map(|v| v != 0),
            created_at: parse_dt(&row.created_at)?,
            updated_at: parse_dt(&row.updated_at)?,
            acked_at: parse_dt_opt(row.acked_at.as_deref())?,
            ack_by: parse_uuid_opt(row.ack_by.as_deref())?,
            resolved_at: parse_dt_opt(row.resolved_at.as_deref())?,
            schema_version: row.schema_version as u32,
            version: row.version as u64,
        })
    }
}

/// Bind every mutable column of an alert, in the column order shared by
/// insert and update statements.
macro_rules! bind_alert_fields {
    ($query:expr, $alert:expr, $labels:expr, $annotations:expr) => {
        $query
            .bind(&$alert.rule_name)
            .bind($alert.severity.as_str())
            .bind($alert.status.as_str())
            .bind(&$alert.message)
            .bind(&$alert.source)
            .bind($labels)
            .bind($annotations)
            .bind(&$alert.correlation_key)
            .bind(&$alert.external_id)
            .bind($alert.constitutional_flag as i64)
            .bind($alert.escalation_level as i64)
            .bind($alert.policy_id.map(|id| id.to_string()))
            .bind($alert.rule_cursor as i64)
            .bind($alert.cursor_version as i64)
            .bind($alert.merge_count as i64)
            .bind($alert.degraded as i64)
            .bind($alert.remediation_attempted as i64)
            .bind($alert.remediation_success.map(i64::from))
            .bind($alert.created_at.to_rfc3339())
            .bind($alert.updated_at.to_rfc3339())
            .bind($alert.acked_at.map(|dt| dt.to_rfc3339()))
            .bind($alert.ack_by.map(|id| id.to_string()))
            .bind($alert.resolved_at.map(|dt| dt.to_rfc3339()))
            .bind($alert.schema_version as i64)
    };
}

#[async_trait]
impl AlertRepository for SqliteAlertRepository {
    async fn insert(&self, alert: &Alert) -> DomainResult<()> {
        let labels = serde_json::to_string(&alert.labels)?;
        let annotations = serde_json::to_string(&alert.annotations)?;

        let query = sqlx::query(
            r"INSERT INTO alerts (
                id, rule_name, severity, status, message, source, labels, annotations,
                correlation_key, external_id, constitutional_flag, escalation_level,
                policy_id, rule_cursor, cursor_version, merge_count, degraded,
                remediation_attempted, remediation_success, created_at, updated_at,
                acked_at, ack_by, resolved_at, schema_version, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(alert.id.to_string());
        let query = bind_alert_fields!(query, alert, &labels, &annotations)
            .bind(alert.version as i64);

        match query.execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(DomainError::AlreadyExists {
                    entity: "alert",
                    id: alert.id.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Alert>> {
        let row: Option<AlertRow> = sqlx::query_as("SELECT * FROM alerts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Alert::try_from).transpose()
    }

    async fn update(&self, alert: &mut Alert) -> DomainResult<()> {
        let labels = serde_json::to_string(&alert.labels)?;
        let annotations = serde_json::to_string(&alert.annotations)?;
        let expected = alert.version;

        let query = sqlx::query(
            r"UPDATE alerts SET
                rule_name = ?, severity = ?, status = ?, message = ?, source = ?,
                labels = ?, annotations = ?, correlation_key = ?, external_id = ?,
                constitutional_flag = ?, escalation_level = ?, policy_id = ?,
                rule_cursor = ?, cursor_version = ?, merge_count = ?, degraded = ?,
                remediation_attempted = ?, remediation_success = ?, created_at = ?,
                updated_at = ?, acked_at = ?, ack_by = ?, resolved_at = ?,
                schema_version = ?, version = ?
             WHERE id = ? AND version = ?",
        );
        let result = bind_alert_fields!(query, alert, &labels, &annotations)
            .bind((expected + 1) as i64)
            .bind(alert.id.to_string())
            .bind(expected as i64)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return if self.get(alert.id).await?.is_some() {
                Err(DomainError::VersionMismatch {
                    entity: "alert",
                    id: alert.id,
                    expected,
                })
            } else {
                Err(DomainError::AlertNotFound(alert.id))
            };
        }

        alert.version = expected + 1;
        Ok(())
    }

    async fn find_live_by_correlation(
        &self,
        correlation_key: &str,
    ) -> DomainResult<Option<Alert>> {
        let row: Option<AlertRow> = sqlx::query_as(
            "SELECT * FROM alerts
             WHERE correlation_key = ? AND status IN ('active', 'acknowledged', 'escalated')
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(correlation_key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Alert::try_from).transpose()
    }

    async fn find_by_external_id(&self, external_id: &str) -> DomainResult<Option<Alert>> {
        let row: Option<AlertRow> =
            sqlx::query_as("SELECT * FROM alerts WHERE external_id = ? LIMIT 1")
                .bind(external_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Alert::try_from).transpose()
    }

    async fn list_by_status(&self, status: AlertStatus) -> DomainResult<Vec<Alert>> {
        let rows: Vec<AlertRow> =
            sqlx::query_as("SELECT * FROM alerts WHERE status = ? ORDER BY created_at DESC")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Alert::try_from).collect()
    }

    async fn list_since(&self, since: DateTime<Utc>) -> DomainResult<Vec<Alert>> {
        let rows: Vec<AlertRow> =
            sqlx::query_as("SELECT * FROM alerts WHERE created_at >= ? ORDER BY created_at DESC")
                .bind(since.to_rfc3339())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Alert::try_from).collect()
    }

    async fn delete_expired(
        &self,
        before: DateTime<Utc>,
        constitutional: bool,
    ) -> DomainResult<u64> {
        let result = sqlx::query(
            "DELETE FROM alerts
             WHERE status IN ('resolved', 'suppressed')
               AND constitutional_flag = ?
               AND created_at < ?",
        )
        .bind(constitutional as i64)
        .bind(before.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
