//! SQLite implementation of the JobRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ChannelKind, JobStatus, NotificationJob};
use crate::domain::ports::JobRepository;

use super::{parse_dt, parse_dt_opt, parse_uuid};

#[derive(Clone)]
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    alert_id: String,
    contact_id: String,
    channel: String,
    template_id: String,
    variables: String,
    priority: i64,
    constitutional_flag: i64,
    status: String,
    scheduled_not_before: String,
    deadline: String,
    attempts: i64,
    max_attempts: i64,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
    delivered_at: Option<String>,
    schema_version: i64,
    version: i64,
}

impl TryFrom<JobRow> for NotificationJob {
    type Error = DomainError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(NotificationJob {
            id: parse_uuid(&row.id)?,
            alert_id: parse_uuid(&row.alert_id)?,
            contact_id: parse_uuid(&row.contact_id)?,
            channel: ChannelKind::from_str(&row.channel).ok_or_else(|| {
                DomainError::SerializationError(format!("bad channel '{}'", row.channel))
            })?,
            template_id: row.template_id,
            variables: serde_json::from_str(&row.variables)?,
            priority: row.priority as u8,
            constitutional_flag: row.constitutional_flag != 0,
            status: JobStatus::from_str(&row.status).ok_or_else(|| {
                DomainError::SerializationError(format!("bad status '{}'", row.status))
            })?,
            scheduled_not_before: parse_dt(&row.scheduled_not_before)?,
            deadline: parse_dt(&row.deadline)?,
            attempts: row.attempts as u32,
            max_attempts: row.max_attempts as u32,
            last_error: row.last_error,
            created_at: parse_dt(&row.created_at)?,
            updated_at: parse_dt(&row.updated_at)?,
            delivered_at: parse_dt_opt(row.delivered_at.as_deref())?,
            schema_version: row.schema_version as u32,
            version: row.version as u64,
        })
    }
}

macro_rules! bind_job_fields {
    ($query:expr, $job:expr, $variables:expr) => {
        $query
            .bind($job.alert_id.to_string())
            .bind($job.contact_id.to_string())
            .bind($job.channel.as_str())
            .bind(&$job.template_id)
            .bind($variables)
            .bind($job.priority as i64)
            .bind($job.constitutional_flag as i64)
            .bind($job.status.as_str())
            .bind($job.scheduled_not_before.to_rfc3339())
            .bind($job.deadline.to_rfc3339())
            .bind($job.attempts as i64)
            .bind($job.max_attempts as i64)
            .bind(&$job.last_error)
            .bind($job.created_at.to_rfc3339())
            .bind($job.updated_at.to_rfc3339())
            .bind($job.delivered_at.map(|dt| dt.to_rfc3339()))
            .bind($job.schema_version as i64)
    };
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &NotificationJob) -> DomainResult<()> {
        let variables = serde_json::to_string(&job.variables)?;

        let query = sqlx::query(
            r"INSERT INTO notification_jobs (
                id, alert_id, contact_id, channel, template_id, variables, priority,
                constitutional_flag, status, scheduled_not_before, deadline, attempts,
                max_attempts, last_error, created_at, updated_at, delivered_at,
                schema_version, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string());
        let query = bind_job_fields!(query, job, &variables).bind(job.version as i64);

        match query.execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(DomainError::AlreadyExists {
                    entity: "job",
                    id: job.id.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<NotificationJob>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM notification_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(NotificationJob::try_from).transpose()
    }

    async fn update(&self, job: &mut NotificationJob) -> DomainResult<()> {
        let variables = serde_json::to_string(&job.variables)?;
        let expected = job.version;

        let query = sqlx::query(
            r"UPDATE notification_jobs SET
                alert_id = ?, contact_id = ?, channel = ?, template_id = ?, variables = ?,
                priority = ?, constitutional_flag = ?, status = ?, scheduled_not_before = ?,
                deadline = ?, attempts = ?, max_attempts = ?, last_error = ?, created_at = ?,
                updated_at = ?, delivered_at = ?, schema_version = ?, version = ?
             WHERE id = ? AND version = ?",
        );
        let result = bind_job_fields!(query, job, &variables)
            .bind((expected + 1) as i64)
            .bind(job.id.to_string())
            .bind(expected as i64)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return if self.get(job.id).await?.is_some() {
                Err(DomainError::VersionMismatch {
                    entity: "job",
                    id: job.id,
                    expected,
                })
            } else {
                Err(DomainError::JobNotFound(job.id))
            };
        }

        job.version = expected + 1;
        Ok(())
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> DomainResult<Vec<NotificationJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM notification_jobs
             WHERE status = 'pending' AND scheduled_not_before <= ?
             ORDER BY priority DESC, scheduled_not_before ASC
             LIMIT ?",
        )
        .bind(now.to_rfc3339())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(NotificationJob::try_from).collect()
    }

    async fn list_open_by_alert(&self, alert_id: Uuid) -> DomainResult<Vec<NotificationJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM notification_jobs
             WHERE alert_id = ? AND status IN ('pending', 'in_flight')",
        )
        .bind(alert_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(NotificationJob::try_from).collect()
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query(
            "DELETE FROM notification_jobs
             WHERE status IN ('delivered', 'failed_permanent', 'cancelled')
               AND created_at < ?",
        )
        .bind(before.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
