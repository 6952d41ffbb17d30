//! SQLite implementation of the DirectoryRepository.
//!
//! Administrative records are upserted whole (`INSERT OR REPLACE`);
//! they are configuration, not contended runtime state, so they skip
//! the CAS discipline the alert/job/execution tables use.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AlertSeverity, ChannelKind, Contact, EscalationPolicy, EscalationRule, EscalationTrigger,
    ImpactLevel, MaintenanceWindow, OnCallSchedule, RemediationAction, Team,
};
use crate::domain::models::escalation::EscalationTarget;
use crate::domain::ports::DirectoryRepository;

use super::{parse_dt, parse_uuid, parse_uuid_opt};

#[derive(Clone)]
pub struct SqliteDirectoryRepository {
    pool: SqlitePool,
}

impl SqliteDirectoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ContactRow {
    id: String,
    name: String,
    preferred_channels: String,
    addresses: String,
    clearance_level: i64,
    created_at: String,
    updated_at: String,
    schema_version: i64,
    version: i64,
}

impl TryFrom<ContactRow> for Contact {
    type Error = DomainError;

    fn try_from(row: ContactRow) -> Result<Self, Self::Error> {
        Ok(Contact {
            id: parse_uuid(&row.id)?,
            name: row.name,
            preferred_channels: serde_json::from_str(&row.preferred_channels)?,
            addresses: serde_json::from_str(&row.addresses)?,
            clearance_level: row.clearance_level as u8,
            created_at: parse_dt(&row.created_at)?,
            updated_at: parse_dt(&row.updated_at)?,
            schema_version: row.schema_version as u32,
            version: row.version as u64,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TeamRow {
    id: String,
    name: String,
    members: String,
    escalation_policy_id: Option<String>,
    created_at: String,
    updated_at: String,
    schema_version: i64,
    version: i64,
}

impl TryFrom<TeamRow> for Team {
    type Error = DomainError;

    fn try_from(row: TeamRow) -> Result<Self, Self::Error> {
        Ok(Team {
            id: parse_uuid(&row.id)?,
            name: row.name,
            members: serde_json::from_str(&row.members)?,
            escalation_policy_id: parse_uuid_opt(row.escalation_policy_id.as_deref())?,
            created_at: parse_dt(&row.created_at)?,
            updated_at: parse_dt(&row.updated_at)?,
            schema_version: row.schema_version as u32,
            version: row.version as u64,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: String,
    team_id: String,
    primary_contact_id: String,
    override_contact_id: Option<String>,
    start_at: String,
    end_at: String,
    rotation_hours: i64,
    created_at: String,
    updated_at: String,
    schema_version: i64,
    version: i64,
}

impl TryFrom<ScheduleRow> for OnCallSchedule {
    type Error = DomainError;

    fn try_from(row: ScheduleRow) -> Result<Self, Self::Error> {
        Ok(OnCallSchedule {
            id: parse_uuid(&row.id)?,
            team_id: parse_uuid(&row.team_id)?,
            primary_contact_id: parse_uuid(&row.primary_contact_id)?,
            override_contact_id: parse_uuid_opt(row.override_contact_id.as_deref())?,
            start: parse_dt(&row.start_at)?,
            end: parse_dt(&row.end_at)?,
            rotation_hours: row.rotation_hours as u32,
            created_at: parse_dt(&row.created_at)?,
            updated_at: parse_dt(&row.updated_at)?,
            schema_version: row.schema_version as u32,
            version: row.version as u64,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PolicyRow {
    id: String,
    name: String,
    rule_ids: String,
    max_escalations: i64,
    severity_filter: String,
    constitutional_only: i64,
    created_at: String,
    schema_version: i64,
    version: i64,
}

impl TryFrom<PolicyRow> for EscalationPolicy {
    type Error = DomainError;

    fn try_from(row: PolicyRow) -> Result<Self, Self::Error> {
        Ok(EscalationPolicy {
            id: parse_uuid(&row.id)?,
            name: row.name,
            rule_ids: serde_json::from_str(&row.rule_ids)?,
            max_escalations: row.max_escalations as u32,
            severity_filter: serde_json::from_str(&row.severity_filter)?,
            constitutional_only: row.constitutional_only != 0,
            created_at: parse_dt(&row.created_at)?,
            schema_version: row.schema_version as u32,
            version: row.version as u64,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: String,
    name: String,
    trigger_kind: String,
    delay_secs: i64,
    target_kind: String,
    target_id: String,
    channel: String,
    severity_threshold: Option<String>,
    impact_flag: i64,
    created_at: String,
    schema_version: i64,
    version: i64,
}

impl TryFrom<RuleRow> for EscalationRule {
    type Error = DomainError;

    fn try_from(row: RuleRow) -> Result<Self, Self::Error> {
        let target_id = parse_uuid(&row.target_id)?;
        let target = match row.target_kind.as_str() {
            "contact" => EscalationTarget::Contact(target_id),
            "team" => EscalationTarget::Team(target_id),
            other => {
                return Err(DomainError::SerializationError(format!(
                    "bad target kind '{other}'"
                )))
            }
        };
        Ok(EscalationRule {
            id: parse_uuid(&row.id)?,
            name: row.name,
            trigger: EscalationTrigger::from_str(&row.trigger_kind).ok_or_else(|| {
                DomainError::SerializationError(format!("bad trigger '{}'", row.trigger_kind))
            })?,
            delay_secs: row.delay_secs as u64,
            target,
            channel: ChannelKind::from_str(&row.channel).ok_or_else(|| {
                DomainError::SerializationError(format!("bad channel '{}'", row.channel))
            })?,
            severity_threshold: row
                .severity_threshold
                .as_deref()
                .map(|s| {
                    AlertSeverity::from_str(s).ok_or_else(|| {
                        DomainError::SerializationError(format!("bad severity '{s}'"))
                    })
                })
                .transpose()?,
            impact_flag: row.impact_flag != 0,
            created_at: parse_dt(&row.created_at)?,
            schema_version: row.schema_version as u32,
            version: row.version as u64,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ActionRow {
    id: String,
    name: String,
    command_template: String,
    timeout_secs: i64,
    max_retries: i64,
    requires_approval: i64,
    impact: String,
    created_at: String,
    schema_version: i64,
    version: i64,
}

impl TryFrom<ActionRow> for RemediationAction {
    type Error = DomainError;

    fn try_from(row: ActionRow) -> Result<Self, Self::Error> {
        Ok(RemediationAction {
            id: parse_uuid(&row.id)?,
            name: row.name,
            command_template: row.command_template,
            timeout_secs: row.timeout_secs as u64,
            max_retries: row.max_retries as u32,
            requires_approval: row.requires_approval != 0,
            impact: ImpactLevel::from_str(&row.impact).ok_or_else(|| {
                DomainError::SerializationError(format!("bad impact '{}'", row.impact))
            })?,
            created_at: parse_dt(&row.created_at)?,
            schema_version: row.schema_version as u32,
            version: row.version as u64,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WindowRow {
    id: String,
    name: String,
    affected_sources: String,
    label_selector: String,
    start_at: String,
    end_at: String,
    suppress_notifications: i64,
    created_at: String,
    updated_at: String,
    schema_version: i64,
    version: i64,
}

impl TryFrom<WindowRow> for MaintenanceWindow {
    type Error = DomainError;

    fn try_from(row: WindowRow) -> Result<Self, Self::Error> {
        Ok(MaintenanceWindow {
            id: parse_uuid(&row.id)?,
            name: row.name,
            affected_sources: serde_json::from_str(&row.affected_sources)?,
            label_selector: serde_json::from_str(&row.label_selector)?,
            start: parse_dt(&row.start_at)?,
            end: parse_dt(&row.end_at)?,
            suppress_notifications: row.suppress_notifications != 0,
            created_at: parse_dt(&row.created_at)?,
            updated_at: parse_dt(&row.updated_at)?,
            schema_version: row.schema_version as u32,
            version: row.version as u64,
        })
    }
}

#[async_trait]
impl DirectoryRepository for SqliteDirectoryRepository {
    async fn upsert_contact(&self, contact: &Contact) -> DomainResult<()> {
        let preferred = serde_json::to_string(&contact.preferred_channels)?;
        let addresses = serde_json::to_string(&contact.addresses)?;
        sqlx::query(
            r"INSERT OR REPLACE INTO contacts
              (id, name, preferred_channels, addresses, clearance_level,
               created_at, updated_at, schema_version, version)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(contact.id.to_string())
        .bind(&contact.name)
        .bind(&preferred)
        .bind(&addresses)
        .bind(i64::from(contact.clearance_level))
        .bind(contact.created_at.to_rfc3339())
        .bind(contact.updated_at.to_rfc3339())
        .bind(contact.schema_version as i64)
        .bind(contact.version as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_contact(&self, id: Uuid) -> DomainResult<Option<Contact>> {
        let row: Option<ContactRow> = sqlx::query_as("SELECT * FROM contacts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Contact::try_from).transpose()
    }

    async fn upsert_team(&self, team: &Team) -> DomainResult<()> {
        let members = serde_json::to_string(&team.members)?;
        sqlx::query(
            r"INSERT OR REPLACE INTO teams
              (id, name, members, escalation_policy_id, created_at, updated_at,
               schema_version, version)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(team.id.to_string())
        .bind(&team.name)
        .bind(&members)
        .bind(team.escalation_policy_id.map(|id| id.to_string()))
        .bind(team.created_at.to_rfc3339())
        .bind(team.updated_at.to_rfc3339())
        .bind(team.schema_version as i64)
        .bind(team.version as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_team(&self, id: Uuid) -> DomainResult<Option<Team>> {
        let row: Option<TeamRow> = sqlx::query_as("SELECT * FROM teams WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Team::try_from).transpose()
    }

    async fn upsert_schedule(&self, schedule: &OnCallSchedule) -> DomainResult<()> {
        sqlx::query(
            r"INSERT OR REPLACE INTO oncall_schedules
              (id, team_id, primary_contact_id, override_contact_id, start_at, end_at,
               rotation_hours, created_at, updated_at, schema_version, version)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(schedule.id.to_string())
        .bind(schedule.team_id.to_string())
        .bind(schedule.primary_contact_id.to_string())
        .bind(schedule.override_contact_id.map(|id| id.to_string()))
        .bind(schedule.start.to_rfc3339())
        .bind(schedule.end.to_rfc3339())
        .bind(i64::from(schedule.rotation_hours))
        .bind(schedule.created_at.to_rfc3339())
        .bind(schedule.updated_at.to_rfc3339())
        .bind(schedule.schema_version as i64)
        .bind(schedule.version as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_schedules_for_team(
        &self,
        team_id: Uuid,
    ) -> DomainResult<Vec<OnCallSchedule>> {
        let rows: Vec<ScheduleRow> =
            sqlx::query_as("SELECT * FROM oncall_schedules WHERE team_id = ?")
                .bind(team_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(OnCallSchedule::try_from).collect()
    }

    async fn upsert_policy(&self, policy: &EscalationPolicy) -> DomainResult<()> {
        let rule_ids = serde_json::to_string(&policy.rule_ids)?;
        let severity_filter = serde_json::to_string(&policy.severity_filter)?;
        sqlx::query(
            r"INSERT OR REPLACE INTO escalation_policies
              (id, name, rule_ids, max_escalations, severity_filter, constitutional_only,
               created_at, schema_version, version)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(policy.id.to_string())
        .bind(&policy.name)
        .bind(&rule_ids)
        .bind(i64::from(policy.max_escalations))
        .bind(&severity_filter)
        .bind(policy.constitutional_only as i64)
        .bind(policy.created_at.to_rfc3339())
        .bind(policy.schema_version as i64)
        .bind(policy.version as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_policy(&self, id: Uuid) -> DomainResult<Option<EscalationPolicy>> {
        let row: Option<PolicyRow> =
            sqlx::query_as("SELECT * FROM escalation_policies WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(EscalationPolicy::try_from).transpose()
    }

    async fn upsert_rule(&self, rule: &EscalationRule) -> DomainResult<()> {
        let (target_kind, target_id) = match rule.target {
            EscalationTarget::Contact(id) => ("contact", id),
            EscalationTarget::Team(id) => ("team", id),
        };
        sqlx::query(
            r"INSERT OR REPLACE INTO escalation_rules
              (id, name, trigger_kind, delay_secs, target_kind, target_id, channel,
               severity_threshold, impact_flag, created_at, schema_version, version)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(rule.id.to_string())
        .bind(&rule.name)
        .bind(rule.trigger.as_str())
        .bind(rule.delay_secs as i64)
        .bind(target_kind)
        .bind(target_id.to_string())
        .bind(rule.channel.as_str())
        .bind(rule.severity_threshold.map(|s| s.as_str()))
        .bind(rule.impact_flag as i64)
        .bind(rule.created_at.to_rfc3339())
        .bind(rule.schema_version as i64)
        .bind(rule.version as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_rule(&self, id: Uuid) -> DomainResult<Option<EscalationRule>> {
        let row: Option<RuleRow> = sqlx::query_as("SELECT * FROM escalation_rules WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(EscalationRule::try_from).transpose()
    }

    async fn upsert_action(&self, action: &RemediationAction) -> DomainResult<()> {
        sqlx::query(
            r"INSERT OR REPLACE INTO remediation_actions
              (id, name, command_template, timeout_secs, max_retries, requires_approval,
               impact, created_at, schema_version, version)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(action.id.to_string())
        .bind(&action.name)
        .bind(&action.command_template)
        .bind(action.timeout_secs as i64)
        .bind(i64::from(action.max_retries))
        .bind(action.requires_approval as i64)
        .bind(action.impact.as_str())
        .bind(action.created_at.to_rfc3339())
        .bind(action.schema_version as i64)
        .bind(action.version as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_action(&self, id: Uuid) -> DomainResult<Option<RemediationAction>> {
        let row: Option<ActionRow> =
            sqlx::query_as("SELECT * FROM remediation_actions WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(RemediationAction::try_from).transpose()
    }

    async fn get_action_by_name(&self, name: &str) -> DomainResult<Option<RemediationAction>> {
        let row: Option<ActionRow> =
            sqlx::query_as("SELECT * FROM remediation_actions WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        row.map(RemediationAction::try_from).transpose()
    }

    async fn upsert_maintenance_window(
        &self,
        window: &MaintenanceWindow,
    ) -> DomainResult<()> {
        let sources = serde_json::to_string(&window.affected_sources)?;
        let selector = serde_json::to_string(&window.label_selector)?;
        sqlx::query(
            r"INSERT OR REPLACE INTO maintenance_windows
              (id, name, affected_sources, label_selector, start_at, end_at,
               suppress_notifications, created_at, updated_at, schema_version, version)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(window.id.to_string())
        .bind(&window.name)
        .bind(&sources)
        .bind(&selector)
        .bind(window.start.to_rfc3339())
        .bind(window.end.to_rfc3339())
        .bind(window.suppress_notifications as i64)
        .bind(window.created_at.to_rfc3339())
        .bind(window.updated_at.to_rfc3339())
        .bind(window.schema_version as i64)
        .bind(window.version as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_maintenance_windows(&self) -> DomainResult<Vec<MaintenanceWindow>> {
        let rows: Vec<WindowRow> = sqlx::query_as("SELECT * FROM maintenance_windows")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(MaintenanceWindow::try_from).collect()
    }
}
