//! Directory repository port: contacts, teams, schedules, policies,
//! rules, actions, and maintenance windows.
//!
//! These records are administered by external collaborators; the engine
//! reads them and only the maintenance-window surface writes through it.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    Contact, EscalationPolicy, EscalationRule, MaintenanceWindow, OnCallSchedule,
    RemediationAction, Team,
};

/// Repository interface for administrative records.
#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    async fn upsert_contact(&self, contact: &Contact) -> DomainResult<()>;
    async fn get_contact(&self, id: Uuid) -> DomainResult<Option<Contact>>;

    async fn upsert_team(&self, team: &Team) -> DomainResult<()>;
    async fn get_team(&self, id: Uuid) -> DomainResult<Option<Team>>;

    async fn upsert_schedule(&self, schedule: &OnCallSchedule) -> DomainResult<()>;
    async fn list_schedules_for_team(&self, team_id: Uuid)
        -> DomainResult<Vec<OnCallSchedule>>;

    async fn upsert_policy(&self, policy: &EscalationPolicy) -> DomainResult<()>;
    async fn get_policy(&self, id: Uuid) -> DomainResult<Option<EscalationPolicy>>;

    async fn upsert_rule(&self, rule: &EscalationRule) -> DomainResult<()>;
    async fn get_rule(&self, id: Uuid) -> DomainResult<Option<EscalationRule>>;

    async fn upsert_action(&self, action: &RemediationAction) -> DomainResult<()>;
    async fn get_action(&self, id: Uuid) -> DomainResult<Option<RemediationAction>>;
    async fn get_action_by_name(&self, name: &str)
        -> DomainResult<Option<RemediationAction>>;

    async fn upsert_maintenance_window(&self, window: &MaintenanceWindow)
        -> DomainResult<()>;
    async fn list_maintenance_windows(&self) -> DomainResult<Vec<MaintenanceWindow>>;
}
