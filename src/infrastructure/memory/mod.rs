//! In-memory repository implementations.
//!
//! Mirror the sqlite adapters' semantics (conditional updates included)
//! over `RwLock`-guarded maps. Used by the deterministic engine tests
//! and available to hosts that embed the engine without persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Alert, AlertStatus, Contact, EscalationPolicy, EscalationRule, MaintenanceWindow,
    NotificationJob, OnCallSchedule, RemediationAction, RemediationExecution, Team,
};
use crate::domain::ports::{
    AlertRepository, DirectoryRepository, ExecutionRepository, JobRepository,
};

/// In-memory AlertRepository.
#[derive(Default)]
pub struct InMemoryAlertRepository {
    alerts: RwLock<HashMap<Uuid, Alert>>,
}

impl InMemoryAlertRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertRepository for InMemoryAlertRepository {
    async fn insert(&self, alert: &Alert) -> DomainResult<()> {
        let mut alerts = self.alerts.write().await;
        if alerts.contains_key(&alert.id) {
            return Err(DomainError::AlreadyExists {
                entity: "alert",
                id: alert.id.to_string(),
            });
        }
        alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Alert>> {
        Ok(self.alerts.read().await.get(&id).cloned())
    }

    async fn update(&self, alert: &mut Alert) -> DomainResult<()> {
        let mut alerts = self.alerts.write().await;
        let stored = alerts
            .get_mut(&alert.id)
            .ok_or(DomainError::AlertNotFound(alert.id))?;
        if stored.version != alert.version {
            return Err(DomainError::VersionMismatch {
                entity: "alert",
                id: alert.id,
                expected: alert.version,
            });
        }
        alert.version += 1;
        *stored = alert.clone();
        Ok(())
    }

    async fn find_live_by_correlation(
        &self,
        correlation_key: &str,
    ) -> DomainResult<Option<Alert>> {
        Ok(self
            .alerts
            .read()
            .await
            .values()
            .find(|a| a.correlation_key == correlation_key && a.status.is_live())
            .cloned())
    }

    async fn find_by_external_id(&self, external_id: &str) -> DomainResult<Option<Alert>> {
        Ok(self
            .alerts
            .read()
            .await
            .values()
            .find(|a| a.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn list_by_status(&self, status: AlertStatus) -> DomainResult<Vec<Alert>> {
        Ok(self
            .alerts
            .read()
            .await
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect())
    }

    async fn list_since(&self, since: DateTime<Utc>) -> DomainResult<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .read()
            .await
            .values()
            .filter(|a| a.created_at >= since)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts)
    }

    async fn delete_expired(
        &self,
        before: DateTime<Utc>,
        constitutional: bool,
    ) -> DomainResult<u64> {
        let mut alerts = self.alerts.write().await;
        let doomed: Vec<Uuid> = alerts
            .values()
            .filter(|a| {
                a.status.is_terminal()
                    && a.constitutional_flag == constitutional
                    && a.created_at < before
            })
            .map(|a| a.id)
            .collect();
        for id in &doomed {
            alerts.remove(id);
        }
        Ok(doomed.len() as u64)
    }
}

/// In-memory JobRepository.
#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<Uuid, NotificationJob>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn insert(&self, job: &NotificationJob) -> DomainResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(DomainError::AlreadyExists {
                entity: "job",
                id: job.id.to_string(),
            });
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<NotificationJob>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn update(&self, job: &mut NotificationJob) -> DomainResult<()> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(&job.id)
            .ok_or(DomainError::JobNotFound(job.id))?;
        if stored.version != job.version {
            return Err(DomainError::VersionMismatch {
                entity: "job",
                id: job.id,
                expected: job.version,
            });
        }
        job.version += 1;
        *stored = job.clone();
        Ok(())
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> DomainResult<Vec<NotificationJob>> {
        let jobs = self.jobs.read().await;
        let mut due: Vec<NotificationJob> = jobs
            .values()
            .filter(|j| {
                j.status == crate::domain::models::JobStatus::Pending
                    && j.scheduled_not_before <= now
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.scheduled_not_before.cmp(&b.scheduled_not_before))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn list_open_by_alert(&self, alert_id: Uuid) -> DomainResult<Vec<NotificationJob>> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.alert_id == alert_id && !j.is_terminal())
            .cloned()
            .collect())
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> DomainResult<u64> {
        let mut jobs = self.jobs.write().await;
        let doomed: Vec<Uuid> = jobs
            .values()
            .filter(|j| j.is_terminal() && j.created_at < before)
            .map(|j| j.id)
            .collect();
        for id in &doomed {
            jobs.remove(id);
        }
        Ok(doomed.len() as u64)
    }
}

/// In-memory ExecutionRepository.
#[derive(Default)]
pub struct InMemoryExecutionRepository {
    executions: RwLock<HashMap<Uuid, RemediationExecution>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn insert(&self, execution: &RemediationExecution) -> DomainResult<()> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.id) {
            return Err(DomainError::AlreadyExists {
                entity: "execution",
                id: execution.id.to_string(),
            });
        }
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<RemediationExecution>> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn update(&self, execution: &mut RemediationExecution) -> DomainResult<()> {
        let mut executions = self.executions.write().await;
        let stored = executions
            .get_mut(&execution.id)
            .ok_or(DomainError::ExecutionNotFound(execution.id))?;
        if stored.version != execution.version {
            return Err(DomainError::VersionMismatch {
                entity: "execution",
                id: execution.id,
                expected: execution.version,
            });
        }
        execution.version += 1;
        *stored = execution.clone();
        Ok(())
    }

    async fn list_by_alert(&self, alert_id: Uuid) -> DomainResult<Vec<RemediationExecution>> {
        Ok(self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.alert_id == alert_id)
            .cloned()
            .collect())
    }

    async fn find_open(
        &self,
        action_id: Uuid,
        alert_id: Uuid,
    ) -> DomainResult<Option<RemediationExecution>> {
        Ok(self
            .executions
            .read()
            .await
            .values()
            .find(|e| e.action_id == action_id && e.alert_id == alert_id && !e.is_terminal())
            .cloned())
    }

    async fn list_since(
        &self,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<RemediationExecution>> {
        let mut executions: Vec<RemediationExecution> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.created_at >= since)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(executions)
    }

    async fn delete_expired(
        &self,
        before: DateTime<Utc>,
        constitutional: bool,
    ) -> DomainResult<u64> {
        let mut executions = self.executions.write().await;
        let doomed: Vec<Uuid> = executions
            .values()
            .filter(|e| {
                e.is_terminal()
                    && e.constitutional_flag == constitutional
                    && e.created_at < before
            })
            .map(|e| e.id)
            .collect();
        for id in &doomed {
            executions.remove(id);
        }
        Ok(doomed.len() as u64)
    }
}

/// In-memory DirectoryRepository.
#[derive(Default)]
pub struct InMemoryDirectoryRepository {
    contacts: RwLock<HashMap<Uuid, Contact>>,
    teams: RwLock<HashMap<Uuid, Team>>,
    schedules: RwLock<HashMap<Uuid, OnCallSchedule>>,
    policies: RwLock<HashMap<Uuid, EscalationPolicy>>,
    rules: RwLock<HashMap<Uuid, EscalationRule>>,
    actions: RwLock<HashMap<Uuid, RemediationAction>>,
    windows: RwLock<HashMap<Uuid, MaintenanceWindow>>,
}

impl InMemoryDirectoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DirectoryRepository for InMemoryDirectoryRepository {
    async fn upsert_contact(&self, contact: &Contact) -> DomainResult<()> {
        self.contacts.write().await.insert(contact.id, contact.clone());
        Ok(())
    }

    async fn get_contact(&self, id: Uuid) -> DomainResult<Option<Contact>> {
        Ok(self.contacts.read().await.get(&id).cloned())
    }

    async fn upsert_team(&self, team: &Team) -> DomainResult<()> {
        self.teams.write().await.insert(team.id, team.clone());
        Ok(())
    }

    async fn get_team(&self, id: Uuid) -> DomainResult<Option<Team>> {
        Ok(self.teams.read().await.get(&id).cloned())
    }

    async fn upsert_schedule(&self, schedule: &OnCallSchedule) -> DomainResult<()> {
        self.schedules
            .write()
            .await
            .insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn list_schedules_for_team(
        &self,
        team_id: Uuid,
    ) -> DomainResult<Vec<OnCallSchedule>> {
        Ok(self
            .schedules
            .read()
            .await
            .values()
            .filter(|s| s.team_id == team_id)
            .cloned()
            .collect())
    }

    async fn upsert_policy(&self, policy: &EscalationPolicy) -> DomainResult<()> {
        self.policies.write().await.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn get_policy(&self, id: Uuid) -> DomainResult<Option<EscalationPolicy>> {
        Ok(self.policies.read().await.get(&id).cloned())
    }

    async fn upsert_rule(&self, rule: &EscalationRule) -> DomainResult<()> {
        self.rules.write().await.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn get_rule(&self, id: Uuid) -> DomainResult<Option<EscalationRule>> {
        Ok(self.rules.read().await.get(&id).cloned())
    }

    async fn upsert_action(&self, action: &RemediationAction) -> DomainResult<()> {
        self.actions.write().await.insert(action.id, action.clone());
        Ok(())
    }

    async fn get_action(&self, id: Uuid) -> DomainResult<Option<RemediationAction>> {
        Ok(self.actions.read().await.get(&id).cloned())
    }

    async fn get_action_by_name(&self, name: &str) -> DomainResult<Option<RemediationAction>> {
        Ok(self
            .actions
            .read()
            .await
            .values()
            .find(|a| a.name == name)
            .cloned())
    }

    async fn upsert_maintenance_window(
        &self,
        window: &MaintenanceWindow,
    ) -> DomainResult<()> {
        self.windows.write().await.insert(window.id, window.clone());
        Ok(())
    }

    async fn list_maintenance_windows(&self) -> DomainResult<Vec<MaintenanceWindow>> {
        Ok(self.windows.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AlertSeverity, IngressEvent};
    use std::collections::BTreeMap;

    fn alert() -> Alert {
        let now = Utc::now();
        let event = IngressEvent {
            rule_name: "r".to_string(),
            severity: AlertSeverity::Info,
            message: "m".to_string(),
            source: "s".to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            constitutional_flag: false,
            external_id: Some("ext-1".to_string()),
            timestamp: now,
        };
        Alert::from_ingress(Uuid::new_v4(), &event, "r/s".to_string(), now)
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_ids() {
        let repo = InMemoryAlertRepository::new();
        let a = alert();
        repo.insert(&a).await.unwrap();
        assert!(matches!(
            repo.insert(&a).await,
            Err(DomainError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_conditional_update_detects_conflict() {
        let repo = InMemoryAlertRepository::new();
        let a = alert();
        repo.insert(&a).await.unwrap();

        let mut first = repo.get(a.id).await.unwrap().unwrap();
        let mut second = repo.get(a.id).await.unwrap().unwrap();

        first.message = "first".to_string();
        repo.update(&mut first).await.unwrap();
        assert_eq!(first.version, 2);

        second.message = "second".to_string();
        assert!(matches!(
            repo.update(&mut second).await,
            Err(DomainError::VersionMismatch { .. })
        ));

        // Replay after re-read succeeds.
        let mut fresh = repo.get(a.id).await.unwrap().unwrap();
        fresh.message = "second".to_string();
        repo.update(&mut fresh).await.unwrap();
        assert_eq!(fresh.version, 3);
    }

    #[tokio::test]
    async fn test_live_correlation_lookup() {
        let repo = InMemoryAlertRepository::new();
        let a = alert();
        repo.insert(&a).await.unwrap();

        let found = repo.find_live_by_correlation("r/s").await.unwrap().unwrap();
        assert_eq!(found.id, a.id);

        let mut resolved = repo.get(a.id).await.unwrap().unwrap();
        resolved
            .transition_to(AlertStatus::Resolved, Utc::now())
            .unwrap();
        repo.update(&mut resolved).await.unwrap();
        assert!(repo.find_live_by_correlation("r/s").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_external_id_lookup() {
        let repo = InMemoryAlertRepository::new();
        let a = alert();
        repo.insert(&a).await.unwrap();
        assert!(repo.find_by_external_id("ext-1").await.unwrap().is_some());
        assert!(repo.find_by_external_id("ext-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_due_jobs_ordered_by_priority_then_time() {
        use crate::domain::models::ChannelKind;
        let repo = InMemoryJobRepository::new();
        let now = Utc::now();
        let deadline = now + chrono::Duration::minutes(10);

        let mut low = NotificationJob::new(
            Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(),
            ChannelKind::Email, "alert", 2, now, deadline,
        );
        low.scheduled_not_before = now - chrono::Duration::seconds(30);
        let high_late = NotificationJob::new(
            Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(),
            ChannelKind::Email, "alert", 9, now, deadline,
        );
        let mut high_early = NotificationJob::new(
            Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(),
            ChannelKind::Email, "alert", 9, now, deadline,
        );
        high_early.scheduled_not_before = now - chrono::Duration::seconds(60);
        let mut future = NotificationJob::new(
            Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(),
            ChannelKind::Email, "alert", 10, now, deadline,
        );
        future.scheduled_not_before = now + chrono::Duration::minutes(5);

        for job in [&low, &high_late, &high_early, &future] {
            repo.insert(job).await.unwrap();
        }

        let due = repo.list_due(now, 10).await.unwrap();
        assert_eq!(due.len(), 3, "future job must not be due");
        assert_eq!(due[0].id, high_early.id);
        assert_eq!(due[1].id, high_late.id);
        assert_eq!(due[2].id, low.id);
    }
}
