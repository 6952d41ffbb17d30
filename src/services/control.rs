//! Control surface.
//!
//! The narrow facade external collaborators call: alert submission and
//! lifecycle commands, approval decisions, history queries, and
//! maintenance-window administration. No HTTP or CLI here; hosts wrap
//! this facade in whatever surface they expose.

use chrono::Duration;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Alert, AlertStatus, Contact, EscalationPolicy, EscalationRule, IngressEvent,
    MaintenanceWindow, OnCallSchedule, RemediationAction, RemediationExecution, Team,
    VigilConfig,
};
use crate::domain::ports::{
    AlertRepository, Clock, DirectoryRepository, ExecutionRepository,
};
use crate::services::engine::{EngineEvent, EngineHandle, EngineStats, EngineStatsSnapshot};
use crate::services::executor::allowed_placeholders;
use crate::services::suppression::SuppressionIndex;
use crate::services::templates::validate_placeholders;

/// Facade over the engine for external collaborators.
pub struct ControlSurface {
    engine: EngineHandle,
    alerts: Arc<dyn AlertRepository>,
    executions: Arc<dyn ExecutionRepository>,
    directory: Arc<dyn DirectoryRepository>,
    suppression: Arc<SuppressionIndex>,
    clock: Arc<dyn Clock>,
    stats: Arc<EngineStats>,
    config: VigilConfig,
}

impl ControlSurface {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: EngineHandle,
        alerts: Arc<dyn AlertRepository>,
        executions: Arc<dyn ExecutionRepository>,
        directory: Arc<dyn DirectoryRepository>,
        suppression: Arc<SuppressionIndex>,
        clock: Arc<dyn Clock>,
        stats: Arc<EngineStats>,
        config: VigilConfig,
    ) -> Self {
        Self {
            engine,
            alerts,
            executions,
            directory,
            suppression,
            clock,
            stats,
            config,
        }
    }

    /// Submit a pre-formed alert event.
    ///
    /// Malformed events are rejected here, before they reach the engine;
    /// a full ingress queue is an explicit `IngressFull` rejection, never
    /// a silent drop.
    pub fn submit_alert(&self, event: IngressEvent) -> DomainResult<()> {
        event.validate().map_err(DomainError::MalformedIngress)?;
        let correlation_key = event.correlation_key(&self.config.correlation_label_keys);
        self.engine.try_submit(EngineEvent::Ingress {
            event,
            correlation_key,
        })
    }

    /// Acknowledge an alert.
    pub async fn acknowledge_alert(
        &self,
        alert_id: Uuid,
        by: Option<Uuid>,
    ) -> DomainResult<()> {
        self.engine.send(EngineEvent::Ack { alert_id, by }).await
    }

    /// Resolve an alert with an operator-supplied reason.
    pub async fn resolve_alert(&self, alert_id: Uuid, reason: &str) -> DomainResult<()> {
        self.engine
            .send(EngineEvent::Resolve {
                alert_id,
                reason: reason.to_string(),
            })
            .await
    }

    /// Approve a pending remediation execution.
    pub async fn approve_remediation(
        &self,
        exec_id: Uuid,
        decided_by: Option<Uuid>,
    ) -> DomainResult<()> {
        self.send_approval(exec_id, true, decided_by).await
    }

    /// Deny a pending remediation execution.
    pub async fn deny_remediation(
        &self,
        exec_id: Uuid,
        decided_by: Option<Uuid>,
    ) -> DomainResult<()> {
        self.send_approval(exec_id, false, decided_by).await
    }

    async fn send_approval(
        &self,
        exec_id: Uuid,
        approved: bool,
        decided_by: Option<Uuid>,
    ) -> DomainResult<()> {
        let execution = self
            .executions
            .get(exec_id)
            .await?
            .ok_or(DomainError::ExecutionNotFound(exec_id))?;
        self.engine
            .send(EngineEvent::ApprovalDecision {
                exec_id,
                alert_id: execution.alert_id,
                approved,
                decided_by,
            })
            .await
    }

    /// All non-terminal alerts.
    pub async fn list_active_alerts(&self) -> DomainResult<Vec<Alert>> {
        let mut alerts = self.alerts.list_by_status(AlertStatus::Active).await?;
        alerts.extend(
            self.alerts
                .list_by_status(AlertStatus::Acknowledged)
                .await?,
        );
        alerts.extend(self.alerts.list_by_status(AlertStatus::Escalated).await?);
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts)
    }

    /// Alerts created within the trailing window, newest first.
    pub async fn get_alert_history(&self, window: Duration) -> DomainResult<Vec<Alert>> {
        self.alerts.list_since(self.clock.now() - window).await
    }

    /// Remediation executions created within the trailing window,
    /// newest first.
    pub async fn get_remediation_history(
        &self,
        window: Duration,
    ) -> DomainResult<Vec<RemediationExecution>> {
        self.executions.list_since(self.clock.now() - window).await
    }

    /// Create or update a maintenance window; the suppression index picks
    /// it up immediately.
    pub async fn update_maintenance_window(
        &self,
        window: MaintenanceWindow,
    ) -> DomainResult<()> {
        self.directory.upsert_maintenance_window(&window).await?;
        info!(
            window_id = %window.id,
            name = %window.name,
            start = %window.start,
            end = %window.end,
            "Maintenance window updated"
        );
        self.suppression.upsert_window(window);
        Ok(())
    }

    /// Engine counters.
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    // ------------------------------------------------------------------
    // Directory administration
    // ------------------------------------------------------------------

    pub async fn register_contact(&self, contact: Contact) -> DomainResult<()> {
        self.directory.upsert_contact(&contact).await
    }

    pub async fn register_team(&self, team: Team) -> DomainResult<()> {
        self.directory.upsert_team(&team).await
    }

    pub async fn register_schedule(&self, schedule: OnCallSchedule) -> DomainResult<()> {
        self.directory.upsert_schedule(&schedule).await
    }

    pub async fn register_policy(&self, policy: EscalationPolicy) -> DomainResult<()> {
        self.directory.upsert_policy(&policy).await
    }

    pub async fn register_rule(&self, rule: EscalationRule) -> DomainResult<()> {
        self.directory.upsert_rule(&rule).await
    }

    /// Register a remediation action. Command templates referencing
    /// placeholders outside the restricted set are a configuration error,
    /// rejected here at load time.
    pub async fn register_action(&self, action: RemediationAction) -> DomainResult<()> {
        let allowed = allowed_placeholders(&self.config.correlation_label_keys);
        validate_placeholders(&action.name, &action.command_template, &allowed)
            .map_err(|e| DomainError::ValidationFailed(e.to_string()))?;
        self.directory.upsert_action(&action).await
    }
}
