//! SQLite implementation of the ExecutionRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExecutionStatus, RemediationExecution};
use crate::domain::ports::ExecutionRepository;

use super::{parse_dt, parse_dt_opt, parse_uuid};

#[derive(Clone)]
pub struct SqliteExecutionRepository {
    pool: SqlitePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: String,
    action_id: String,
    alert_id: String,
    status: String,
    constitutional_flag: i64,
    attempt: i64,
    started_at: Option<String>,
    ended_at: Option<String>,
    exit_code: Option<i64>,
    stdout_tail: String,
    stderr_tail: String,
    created_at: String,
    updated_at: String,
    schema_version: i64,
    version: i64,
}

impl TryFrom<ExecutionRow> for RemediationExecution {
    type Error = DomainError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        Ok(RemediationExecution {
            id: parse_uuid(&row.id)?,
            action_id: parse_uuid(&row.action_id)?,
            alert_id: parse_uuid(&row.alert_id)?,
            status: ExecutionStatus::from_str(&row.status).ok_or_else(|| {
                DomainError::SerializationError(format!("bad status '{}'", row.status))
            })?,
            constitutional_flag: row.constitutional_flag != 0,
            attempt: row.attempt as u32,
            started_at: parse_dt_opt(row.started_at.as_deref())?,
            ended_at: parse_dt_opt(row.ended_at.as_deref())?,
            exit_code: row.exit_code.map(|v| v as i32),
            stdout_tail: row.stdout_tail,
            stderr_tail: row.stderr_tail,
            created_at: parse_dt(&row.created_at)?,
            updated_at: parse_dt(&row.updated_at)?,
            schema_version: row.schema_version as u32,
            version: row.version as u64,
        })
    }
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    async fn insert(&self, execution: &RemediationExecution) -> DomainResult<()> {
        let result = sqlx::query(
            r"INSERT INTO remediation_executions (
                id, action_id, alert_id, status, constitutional_flag, attempt,
                started_at, ended_at, exit_code, stdout_tail, stderr_tail,
                created_at, updated_at, schema_version, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(execution.id.to_string())
        .bind(execution.action_id.to_string())
        .bind(execution.alert_id.to_string())
        .bind(execution.status.as_str())
        .bind(execution.constitutional_flag as i64)
        .bind(execution.attempt as i64)
        .bind(execution.started_at.map(|dt| dt.to_rfc3339()))
        .bind(execution.ended_at.map(|dt| dt.to_rfc3339()))
        .bind(execution.exit_code.map(i64::from))
        .bind(&execution.stdout_tail)
        .bind(&execution.stderr_tail)
        .bind(execution.created_at.to_rfc3339())
        .bind(execution.updated_at.to_rfc3339())
        .bind(execution.schema_version as i64)
        .bind(execution.version as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(DomainError::AlreadyExists {
                    entity: "execution",
                    id: execution.id.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<RemediationExecution>> {
        let row: Option<ExecutionRow> =
            sqlx::query_as("SELECT * FROM remediation_executions WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(RemediationExecution::try_from).transpose()
    }

    async fn update(&self, execution: &mut RemediationExecution) -> DomainResult<()> {
        let expected = execution.version;

        let result = sqlx::query(
            r"UPDATE remediation_executions SET
                action_id = ?, alert_id = ?, status = ?, constitutional_flag = ?,
                attempt = ?, started_at = ?, ended_at = ?, exit_code = ?,
                stdout_tail = ?, stderr_tail = ?, created_at = ?, updated_at = ?,
                schema_version = ?, version = ?
             WHERE id = ? AND version = ?",
        )
        .bind(execution.action_id.to_string())
        .bind(execution.alert_id.to_string())
        .bind(execution.status.as_str())
        .bind(execution.constitutional_flag as i64)
        .bind(execution.attempt as i64)
        .bind(execution.started_at.map(|dt| dt.to_rfc3339()))
        .bind(execution.ended_at.map(|dt| dt.to_rfc3339()))
        .bind(execution.exit_code.map(i64::from))
        .bind(&execution.stdout_tail)
        .bind(&execution.stderr_tail)
        .bind(execution.created_at.to_rfc3339())
        .bind(execution.updated_at.to_rfc3339())
        .bind(execution.schema_version as i64)
        .bind((expected + 1) as i64)
        .bind(execution.id.to_string())
        .bind(expected as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return if self.get(execution.id).await?.is_some() {
                Err(DomainError::VersionMismatch {
                    entity: "execution",
                    id: execution.id,
                    expected,
                })
            } else {
                Err(DomainError::ExecutionNotFound(execution.id))
            };
        }

        execution.version = expected + 1;
        Ok(())
    }

    async fn list_by_alert(&self, alert_id: Uuid) -> DomainResult<Vec<RemediationExecution>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            "SELECT * FROM remediation_executions WHERE alert_id = ? ORDER BY created_at DESC",
        )
        .bind(alert_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(RemediationExecution::try_from)
            .collect()
    }

    async fn find_open(
        &self,
        action_id: Uuid,
        alert_id: Uuid,
    ) -> DomainResult<Option<RemediationExecution>> {
        let row: Option<ExecutionRow> = sqlx::query_as(
            "SELECT * FROM remediation_executions
             WHERE action_id = ? AND alert_id = ?
               AND status IN ('pending', 'approved', 'running')
             LIMIT 1",
        )
        .bind(action_id.to_string())
        .bind(alert_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(RemediationExecution::try_from).transpose()
    }

    async fn list_since(
        &self,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<RemediationExecution>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            "SELECT * FROM remediation_executions WHERE created_at >= ? ORDER BY created_at DESC",
        )
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(RemediationExecution::try_from)
            .collect()
    }

    async fn delete_expired(
        &self,
        before: DateTime<Utc>,
        constitutional: bool,
    ) -> DomainResult<u64> {
        let result = sqlx::query(
            "DELETE FROM remediation_executions
             WHERE status IN ('success', 'failed', 'timeout', 'cancelled')
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
