//! Event handlers for the escalation engine.
//!
//! Each handler is a pure function of (event, latest store state): it
//! re-reads what it needs, decides, and writes back with conditional
//! updates. A CAS conflict propagates as `VersionMismatch` and the
//! partition loop replays the event against fresh state.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Alert, AlertSeverity, AlertStatus, EscalationPolicy, EscalationRule, ExecutionStatus,
    IngressEvent, NotificationJob, RemediationExecution,
};
use crate::domain::models::escalation::EscalationTarget;
use crate::services::suppression::{SuppressReason, SuppressionDecision};
use crate::services::templates::builtin;

use super::events::{EngineEvent, EngineStats};
use super::EscalationEngine;

/// Side effects decided while mutating an alert, flushed only after the
/// alert's conditional write succeeds. Emitting earlier would let a
/// fast collaborator (executor, dispatcher) race the write from another
/// partition and force a replay that repeats the effects.
#[derive(Default)]
struct PendingEffects {
    jobs: Vec<NotificationJob>,
    submissions: Vec<Uuid>,
    timers: Vec<(DateTime<Utc>, Uuid, u64)>,
}

impl EscalationEngine {
    pub(super) async fn handle_event(&self, event: &EngineEvent) -> DomainResult<()> {
        match event {
            EngineEvent::Ingress {
                event,
                correlation_key,
            } => self.handle_ingress(event, correlation_key).await,
            EngineEvent::Ack { alert_id, by } => self.handle_ack(*alert_id, *by).await,
            EngineEvent::Resolve { alert_id, reason } => {
                self.handle_resolve(*alert_id, reason).await
            }
            EngineEvent::Timer {
                alert_id,
                cursor_version,
            } => self.handle_timer(*alert_id, *cursor_version).await,
            EngineEvent::NotificationDelivered {
                rule_name,
                source,
                delivered_at,
                ..
            } => {
                self.suppression
                    .record_notification(rule_name, source, *delivered_at);
                EngineStats::bump(&self.stats.notifications_delivered);
                Ok(())
            }
            EngineEvent::NotificationFailed {
                alert_id, error, ..
            } => self.handle_notification_failed(*alert_id, error).await,
            EngineEvent::RemediationResult {
                exec_id,
                alert_id,
                status,
            } => {
                self.handle_remediation_result(*exec_id, *alert_id, *status)
                    .await
            }
            EngineEvent::ApprovalDecision {
                exec_id,
                approved,
                decided_by,
                ..
            } => self.handle_approval(*exec_id, *approved, *decided_by).await,
        }
    }

    /// Mark the alert degraded after sustained store failures. Best
    /// effort: the alert is kept, never dropped.
    pub(super) async fn mark_degraded(&self, alert_id: Uuid) {
        if let Ok(Some(mut alert)) = self.alerts.get(alert_id).await {
            if !alert.degraded && !alert.is_terminal() {
                alert.degraded = true;
                warn!(alert_id = %alert_id, "Alert marked degraded after store failures");
                let _ = self.alerts.update(&mut alert).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Ingress
    // ------------------------------------------------------------------

    async fn handle_ingress(
        &self,
        event: &IngressEvent,
        correlation_key: &str,
    ) -> DomainResult<()> {
        event
            .validate()
            .map_err(DomainError::MalformedIngress)?;

        // Idempotent admission on producer-supplied external IDs.
        if let Some(external_id) = &event.external_id {
            if let Some(existing) = self
                .retry
                .execute(|| self.alerts.find_by_external_id(external_id))
                .await?
            {
                debug!(
                    external_id,
                    alert_id = %existing.id,
                    "Ingress retry deduplicated on external ID"
                );
                return Ok(());
            }
        }

        let now = self.clock.now();
        let live = self
            .retry
            .execute(|| self.alerts.find_live_by_correlation(correlation_key))
            .await?;

        match self.suppression.decide(event, live.as_ref(), now) {
            SuppressionDecision::Suppress(reason) => {
                self.record_suppressed(event, correlation_key, &reason, now)
                    .await
            }
            SuppressionDecision::MergeInto(existing_id) => {
                let mut alert = live.ok_or(DomainError::AlertNotFound(existing_id))?;
                alert.merge_duplicate(event, now);
                // A merge stamps a fresh cursor version and re-arms the
                // pending rule, so its delay restarts from this arrival.
                alert.bump_cursor_version();
                self.alerts.update(&mut alert).await?;
                EngineStats::bump(&self.stats.alerts_merged);
                debug!(
                    alert_id = %alert.id,
                    merge_count = alert.merge_count,
                    "Duplicate arrival merged into live alert"
                );

                if let Some(policy) = self.load_policy(&alert).await? {
                    if self.may_escalate(&alert, &policy) {
                        if let Some(rule) = self.rule_at_cursor(&alert, &policy).await? {
                            self.timers.schedule(
                                now + rule.delay(),
                                alert.id,
                                alert.cursor_version,
                            );
                        }
                    }
                }
                Ok(())
            }
            SuppressionDecision::Admit => self.admit(event, correlation_key, now).await,
        }
    }

    /// Record a suppressed arrival for audit; no state machine entry, no
    /// jobs, no timers.
    async fn record_suppressed(
        &self,
        event: &IngressEvent,
        correlation_key: &str,
        reason: &SuppressReason,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let mut alert =
            Alert::from_ingress(self.ids.mint(), event, correlation_key.to_string(), now);
        alert.status = AlertStatus::Suppressed;
        let reason_text = match reason {
            SuppressReason::MaintenanceWindow(id) => format!("maintenance window {id}"),
            SuppressReason::Cooldown => "notification cooldown".to_string(),
        };
        alert
            .annotations
            .insert("suppressed_reason".to_string(), reason_text.clone());

        self.retry.execute(|| self.alerts.insert(&alert)).await?;
        EngineStats::bump(&self.stats.alerts_suppressed);
        info!(
            alert_id = %alert.id,
            rule_name = %alert.rule_name,
            source = %alert.source,
            reason = %reason_text,
            "Alert suppressed at ingress"
        );
        Ok(())
    }

    async fn admit(
        &self,
        event: &IngressEvent,
        correlation_key: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let mut alert =
            Alert::from_ingress(self.ids.mint(), event, correlation_key.to_string(), now);

        let policy = self
            .select_policy(alert.severity, alert.constitutional_flag)
            .await?;
        alert.policy_id = policy.as_ref().map(|p| p.id);

        self.retry.execute(|| self.alerts.insert(&alert)).await?;
        EngineStats::bump(&self.stats.alerts_admitted);
        info!(
            alert_id = %alert.id,
            rule_name = %alert.rule_name,
            severity = alert.severity.as_str(),
            source = %alert.source,
            constitutional = alert.constitutional_flag,
            "Alert admitted"
        );

        if let Some(policy) = policy {
            let mut effects = PendingEffects::default();
            self.evaluate_rules(&mut alert, &policy, false, &mut effects)
                .await?;
            self.alerts.update(&mut alert).await?;
            self.flush_effects(effects).await?;
        } else {
            warn!(alert_id = %alert.id, "No escalation policy attached");
        }
        Ok(())
    }

    /// Emit the buffered side effects of a successfully persisted
    /// decision.
    async fn flush_effects(&self, effects: PendingEffects) -> DomainResult<()> {
        for (fire_at, alert_id, cursor_version) in effects.timers {
            self.timers.schedule(fire_at, alert_id, cursor_version);
        }
        for job in effects.jobs {
            self.dispatcher.enqueue(job).await?;
        }
        for exec_id in effects.submissions {
            EngineStats::bump(&self.stats.remediations_started);
            self.executor.submit(exec_id).await?;
        }
        Ok(())
    }

    /// Pick the policy for a new alert: constitutional alerts prefer the
    /// constitutional policy; a policy that does not accept the alert's
    /// severity or flag attaches nothing.
    async fn select_policy(
        &self,
        severity: AlertSeverity,
        constitutional: bool,
    ) -> DomainResult<Option<EscalationPolicy>> {
        let candidate = if constitutional {
            self.config
                .constitutional_policy_id
                .or(self.config.default_policy_id)
        } else {
            self.config.default_policy_id
        };
        let Some(policy_id) = candidate else {
            return Ok(None);
        };
        let Some(policy) = self
            .retry
            .execute(|| self.directory.get_policy(policy_id))
            .await?
        else {
            warn!(policy_id = %policy_id, "Configured escalation policy not found");
            return Ok(None);
        };
        if !policy.accepts(severity, constitutional) {
            return Ok(None);
        }
        Ok(Some(policy))
    }

    // ------------------------------------------------------------------
    // Ack / Resolve
    // ------------------------------------------------------------------

    async fn handle_ack(&self, alert_id: Uuid, by: Option<Uuid>) -> DomainResult<()> {
        let Some(mut alert) = self.retry.execute(|| self.alerts.get(alert_id)).await? else {
            warn!(alert_id = %alert_id, "Ack for unknown alert");
            return Ok(());
        };
        if alert.is_terminal() || alert.status == AlertStatus::Acknowledged {
            debug!(alert_id = %alert_id, status = alert.status.as_str(), "Ack ignored");
            return Ok(());
        }

        let now = self.clock.now();
        alert
            .transition_to(AlertStatus::Acknowledged, now)
            .map_err(|_| DomainError::InvalidStateTransition {
                from: alert.status.as_str().to_string(),
                to: AlertStatus::Acknowledged.as_str().to_string(),
            })?;
        alert.ack_by = by;
        // Invalidate the pending escalation timer...
        alert.bump_cursor_version();
        self.alerts.update(&mut alert).await?;
        info!(alert_id = %alert_id, by = ?by, "Alert acknowledged");

        // ...then re-arm the current rule under the new stamp so triggers
        // are re-evaluated at fire time (time_based still fires;
        // ack_timeout and no_response no longer match).
        if let Some(policy) = self.load_policy(&alert).await? {
            if self.may_escalate(&alert, &policy) {
                if let Some(rule) = self.rule_at_cursor(&alert, &policy).await? {
                    self.timers
                        .schedule(now + rule.delay(), alert.id, alert.cursor_version);
                }
            }
        }
        Ok(())
    }

    async fn handle_resolve(&self, alert_id: Uuid, reason: &str) -> DomainResult<()> {
        let Some(mut alert) = self.retry.execute(|| self.alerts.get(alert_id)).await? else {
            warn!(alert_id = %alert_id, "Resolve for unknown alert");
            return Ok(());
        };
        if alert.is_terminal() {
            debug!(alert_id = %alert_id, "Resolve ignored, alert already terminal");
            return Ok(());
        }
        self.resolve_alert(&mut alert, reason).await
    }

    /// Terminal transition plus cancellation fan-out. Pending jobs and
    /// pending/approved executions are cancelled; running remediations
    /// finish and their late results are recorded but not acted upon.
    async fn resolve_alert(&self, alert: &mut Alert, reason: &str) -> DomainResult<()> {
        let now = self.clock.now();
        alert.bump_cursor_version();
        alert
            .annotations
            .insert("resolution_reason".to_string(), reason.to_string());
        alert
            .transition_to(AlertStatus::Resolved, now)
            .map_err(|_| DomainError::InvalidStateTransition {
                from: alert.status.as_str().to_string(),
                to: AlertStatus::Resolved.as_str().to_string(),
            })?;
        self.alerts.update(alert).await?;
        EngineStats::bump(&self.stats.alerts_resolved);
        info!(alert_id = %alert.id, reason, "Alert resolved");

        let open_jobs = self
            .retry
            .execute(|| self.jobs.list_open_by_alert(alert.id))
            .await?;
        for job in open_jobs {
            self.dispatcher.cancel(job.id).await?;
        }

        let executions = self
            .retry
            .execute(|| self.executions.list_by_alert(alert.id))
            .await?;
        for mut execution in executions {
            if matches!(
                execution.status,
                ExecutionStatus::Pending | ExecutionStatus::Approved
            ) {
                if execution.transition_to(ExecutionStatus::Cancelled, now).is_ok() {
                    match self.executions.update(&mut execution).await {
                        Ok(()) | Err(DomainError::VersionMismatch { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        // Courtesy note to whoever acknowledged the alert.
        if let Some(contact_id) = alert.ack_by {
            if let Some(contact) = self
                .retry
                .execute(|| self.directory.get_contact(contact_id))
                .await?
            {
                if let Some(channel) = contact.preferred_channels.first().copied() {
                    let mut variables = self.base_variables(alert);
                    variables.insert("reason".to_string(), reason.to_string());
                    let job = self.make_job(
                        alert,
                        contact_id,
                        channel,
                        builtin::RESOLUTION,
                        variables,
                        now,
                    );
                    self.dispatcher.enqueue(job).await?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Timers and escalation
    // ------------------------------------------------------------------

    async fn handle_timer(&self, alert_id: Uuid, cursor_version: u64) -> DomainResult<()> {
        let Some(mut alert) = self.retry.execute(|| self.alerts.get(alert_id)).await? else {
            return Ok(());
        };
        if alert.is_terminal() {
            return Ok(());
        }
        if alert.cursor_version != cursor_version {
            debug!(
                alert_id = %alert_id,
                stale = cursor_version,
                current = alert.cursor_version,
                "Stale timer ignored"
            );
            return Ok(());
        }
        let Some(policy) = self.load_policy(&alert).await? else {
            return Ok(());
        };
        let mut effects = PendingEffects::default();
        self.evaluate_rules(&mut alert, &policy, true, &mut effects)
            .await?;
        self.alerts.update(&mut alert).await?;
        self.flush_effects(effects).await?;
        Ok(())
    }

    async fn handle_notification_failed(
        &self,
        alert_id: Uuid,
        error: &str,
    ) -> DomainResult<()> {
        EngineStats::bump(&self.stats.notifications_failed);
        let Some(mut alert) = self.retry.execute(|| self.alerts.get(alert_id)).await? else {
            return Ok(());
        };
        if alert.is_terminal() {
            return Ok(());
        }
        warn!(
            alert_id = %alert_id,
            error,
            "Notification failed permanently, advancing escalation"
        );
        let Some(policy) = self.load_policy(&alert).await? else {
            return Ok(());
        };
        // The failed step produced a negative result: move on to the next
        // rule immediately, bypassing its pending timer.
        alert.bump_cursor_version();
        let mut effects = PendingEffects::default();
        self.evaluate_rules(&mut alert, &policy, true, &mut effects)
            .await?;
        self.alerts.update(&mut alert).await?;
        self.flush_effects(effects).await?;
        Ok(())
    }

    /// Fire every rule that is due, then schedule a timer for the first
    /// rule that is not.
    ///
    /// `fire_first` is set when a timer fire (or a bypass-the-delay
    /// advance) made the cursor rule due regardless of its delay;
    /// otherwise only zero-delay rules run inline.
    async fn evaluate_rules(
        &self,
        alert: &mut Alert,
        policy: &EscalationPolicy,
        fire_first: bool,
        effects: &mut PendingEffects,
    ) -> DomainResult<()> {
        let now = self.clock.now();
        let mut fire_now = fire_first;

        loop {
            if alert.is_terminal() || !self.may_escalate(alert, policy) {
                break;
            }
            let Some(rule) = self.rule_at_cursor(alert, policy).await? else {
                // Dangling rule reference: skip it rather than stall.
                alert.rule_cursor += 1;
                continue;
            };

            if !fire_now && rule.delay_secs > 0 {
                effects
                    .timers
                    .push((now + rule.delay(), alert.id, alert.cursor_version));
                break;
            }

            let cursor = alert.rule_cursor;
            if rule.matches(alert) {
                self.fire_rule(alert, &rule, cursor, now, effects).await?;
            } else {
                debug!(
                    alert_id = %alert.id,
                    rule = %rule.name,
                    trigger = rule.trigger.as_str(),
                    "Trigger condition not met, skipping rule"
                );
            }
            alert.rule_cursor = cursor + 1;
            fire_now = false;
        }
        Ok(())
    }

    fn may_escalate(&self, alert: &Alert, policy: &EscalationPolicy) -> bool {
        policy.can_escalate(alert.rule_cursor, alert.escalation_level)
            && alert.escalation_level < self.config.max_escalation_level
    }

    async fn rule_at_cursor(
        &self,
        alert: &Alert,
        policy: &EscalationPolicy,
    ) -> DomainResult<Option<EscalationRule>> {
        let Some(rule_id) = policy.rule_at(alert.rule_cursor) else {
            return Ok(None);
        };
        let rule = self
            .retry
            .execute(|| self.directory.get_rule(rule_id))
            .await?;
        if rule.is_none() {
            warn!(rule_id = %rule_id, "Escalation rule missing from directory");
        }
        Ok(rule)
    }

    /// A matched rule fires: notify its target and, when a remediation is
    /// mapped for this alert, launch it. Steps beyond the first raise the
    /// escalation level and move the alert to `escalated`.
    async fn fire_rule(
        &self,
        alert: &mut Alert,
        rule: &EscalationRule,
        cursor: u32,
        now: DateTime<Utc>,
        effects: &mut PendingEffects,
    ) -> DomainResult<()> {
        let contact = match rule.target {
            EscalationTarget::Contact(contact_id) => Some(contact_id),
            EscalationTarget::Team(team_id) => self
                .oncall
                .resolve(team_id, now)
                .await?
                .or(self.config.default_contact_id),
        };

        if cursor > 0 {
            alert.escalation_level = alert.escalation_level.max(cursor);
            if matches!(
                alert.status,
                AlertStatus::Active | AlertStatus::Acknowledged
            ) {
                let _ = alert.transition_to(AlertStatus::Escalated, now);
            }
            EngineStats::bump(&self.stats.escalations);
            info!(
                alert_id = %alert.id,
                rule = %rule.name,
                escalation_level = alert.escalation_level,
                "Alert escalated"
            );
        }

        match contact {
            Some(contact_id) => {
                let template = if cursor == 0 {
                    builtin::ALERT
                } else {
                    builtin::ESCALATION
                };
                let variables = self.base_variables(alert);
                let job =
                    self.make_job(alert, contact_id, rule.channel, template, variables, now);
                effects.jobs.push(job);
            }
            None => warn!(
                alert_id = %alert.id,
                rule = %rule.name,
                "No contact resolvable for escalation target"
            ),
        }

        self.maybe_launch_remediation(alert, contact, rule, now, effects)
            .await
    }

    // ------------------------------------------------------------------
    // Remediation
    // ------------------------------------------------------------------

    /// Consult the `(rule_name, severity)` mapping and launch the mapped
    /// action once per alert. Approval-gated actions park in `pending`
    /// behind an approval-request notification.
    async fn maybe_launch_remediation(
        &self,
        alert: &mut Alert,
        approval_contact: Option<Uuid>,
        rule: &EscalationRule,
        now: DateTime<Utc>,
        effects: &mut PendingEffects,
    ) -> DomainResult<()> {
        if !self.config.remediation_enabled || alert.remediation_attempted {
            return Ok(());
        }
        let Some(action_name) = default_action_name(&alert.rule_name, alert.severity) else {
            return Ok(());
        };
        let Some(action) = self
            .retry
            .execute(|| self.directory.get_action_by_name(action_name))
            .await?
        else {
            debug!(action_name, "No remediation action registered under mapped name");
            return Ok(());
        };
        if self
            .retry
            .execute(|| self.executions.find_open(action.id, alert.id))
            .await?
            .is_some()
        {
            return Ok(());
        }

        let status = if action.needs_approval() {
            ExecutionStatus::Pending
        } else {
            ExecutionStatus::Approved
        };
        let execution = RemediationExecution::new(
            self.ids.mint(),
            action.id,
            alert.id,
            status,
            alert.constitutional_flag,
            now,
        );
        self.retry
            .execute(|| self.executions.insert(&execution))
            .await?;
        alert.remediation_attempted = true;
        info!(
            alert_id = %alert.id,
            exec_id = %execution.id,
            action = %action.name,
            impact = action.impact.as_str(),
            status = status.as_str(),
            "Remediation execution created"
        );

        match status {
            ExecutionStatus::Pending => {
                let contact = approval_contact.or(self.config.default_contact_id);
                match contact {
                    Some(contact_id) => {
                        let mut variables = self.base_variables(alert);
                        variables.insert("action_name".to_string(), action.name.clone());
                        variables
                            .insert("impact".to_string(), action.impact.as_str().to_string());
                        variables
                            .insert("command".to_string(), action.command_template.clone());
                        variables.insert("exec_id".to_string(), execution.id.to_string());
                        let job = self.make_job(
                            alert,
                            contact_id,
                            rule.channel,
                            builtin::APPROVAL_REQUEST,
                            variables,
                            now,
                        );
                        effects.jobs.push(job);
                    }
                    None => warn!(
                        exec_id = %execution.id,
                        "Approval required but no contact to ask"
                    ),
                }
            }
            _ => effects.submissions.push(execution.id),
        }
        Ok(())
    }

    async fn handle_remediation_result(
        &self,
        exec_id: Uuid,
        alert_id: Uuid,
        status: ExecutionStatus,
    ) -> DomainResult<()> {
        let Some(mut alert) = self.retry.execute(|| self.alerts.get(alert_id)).await? else {
            return Ok(());
        };
        if alert.is_terminal() {
            // Late-arriving result: the execution record keeps the history,
            // the alert does not move.
            debug!(
                exec_id = %exec_id,
                alert_id = %alert_id,
                "Remediation result for terminal alert recorded only"
            );
            return Ok(());
        }

        match status {
            ExecutionStatus::Success => {
                alert.remediation_success = Some(true);
                EngineStats::bump(&self.stats.remediations_succeeded);
                if alert.constitutional_flag {
                    // Constitutional alerts are never auto-resolved by
                    // remediation success; an explicit resolution event is
                    // required.
                    info!(
                        alert_id = %alert_id,
                        "Remediation succeeded; constitutional alert awaits explicit resolution"
                    );
                    self.alerts.update(&mut alert).await?;
                } else {
                    self.alerts.update(&mut alert).await?;
                    self.resolve_alert(&mut alert, "automated remediation succeeded")
                        .await?;
                }
            }
            ExecutionStatus::Failed | ExecutionStatus::Timeout | ExecutionStatus::Cancelled => {
                alert.remediation_success = Some(false);
                EngineStats::bump(&self.stats.remediations_failed);
                warn!(
                    exec_id = %exec_id,
                    alert_id = %alert_id,
                    status = status.as_str(),
                    "Remediation did not succeed, advancing escalation"
                );
                let policy = self.load_policy(&alert).await?;
                let mut effects = PendingEffects::default();
                if let Some(policy) = policy {
                    // Negative result advances escalation one step,
                    // bypassing the pending rule's normal delay.
                    alert.bump_cursor_version();
                    self.evaluate_rules(&mut alert, &policy, true, &mut effects)
                        .await?;
                }
                self.alerts.update(&mut alert).await?;
                self.flush_effects(effects).await?;
            }
            other => {
                debug!(exec_id = %exec_id, status = other.as_str(), "Non-terminal remediation report ignored");
            }
        }
        Ok(())
    }

    async fn handle_approval(
        &self,
        exec_id: Uuid,
        approved: bool,
        decided_by: Option<Uuid>,
    ) -> DomainResult<()> {
        let Some(mut execution) = self
            .retry
            .execute(|| self.executions.get(exec_id))
            .await?
        else {
            warn!(exec_id = %exec_id, "Approval decision for unknown execution");
            return Ok(());
        };
        if execution.status != ExecutionStatus::Pending {
            debug!(
                exec_id = %exec_id,
                status = execution.status.as_str(),
                "Approval decision ignored, execution no longer pending"
            );
            return Ok(());
        }

        let now = self.clock.now();
        if approved {
            execution
                .transition_to(ExecutionStatus::Approved, now)
                .map_err(|_| DomainError::InvalidStateTransition {
                    from: execution.status.as_str().to_string(),
                    to: ExecutionStatus::Approved.as_str().to_string(),
                })?;
            self.executions.update(&mut execution).await?;
            info!(exec_id = %exec_id, by = ?decided_by, "Remediation approved");
            EngineStats::bump(&self.stats.remediations_started);
            self.executor.submit(exec_id).await?;
        } else {
            let _ = execution.transition_to(ExecutionStatus::Cancelled, now);
            self.executions.update(&mut execution).await?;
            info!(exec_id = %exec_id, by = ?decided_by, "Remediation denied");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn load_policy(&self, alert: &Alert) -> DomainResult<Option<EscalationPolicy>> {
        let Some(policy_id) = alert.policy_id else {
            return Ok(None);
        };
        self.retry
            .execute(|| self.directory.get_policy(policy_id))
            .await
    }

    fn base_variables(&self, alert: &Alert) -> BTreeMap<String, String> {
        let mut variables = BTreeMap::new();
        variables.insert("alert_id".to_string(), alert.id.to_string());
        variables.insert("rule_name".to_string(), alert.rule_name.clone());
        variables.insert("severity".to_string(), alert.severity.as_str().to_string());
        variables.insert("source".to_string(), alert.source.clone());
        variables.insert("message".to_string(), alert.message.clone());
        variables.insert(
            "escalation_level".to_string(),
            alert.escalation_level.to_string(),
        );
        variables
    }

    fn make_job(
        &self,
        alert: &Alert,
        contact_id: Uuid,
        channel: crate::domain::models::ChannelKind,
        template_id: &str,
        variables: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> NotificationJob {
        let deadline = now + chrono::Duration::seconds(self.config.job_deadline_secs as i64);
        let mut job = NotificationJob::new(
            self.ids.mint(),
            alert.id,
            contact_id,
            channel,
            template_id,
            job_priority(alert.severity, alert.constitutional_flag),
            now,
            deadline,
        )
        .with_constitutional_flag(alert.constitutional_flag);
        job.max_attempts = self.config.job_max_attempts;
        job.variables = variables;
        job
    }
}

/// Job priority from alert urgency; constitutional traffic floors high.
fn job_priority(severity: AlertSeverity, constitutional: bool) -> u8 {
    let base = match severity {
        AlertSeverity::Info => 2,
        AlertSeverity::Warning => 5,
        AlertSeverity::Critical => 8,
        AlertSeverity::Emergency => 10,
    };
    if constitutional {
        base.max(9)
    } else {
        base
    }
}

/// Default `(rule_name, severity)` to remediation-action mapping.
///
/// Named rules win; otherwise urgency picks a generic response. Actions
/// are looked up by name in the directory, so an unregistered name simply
/// means no automated remediation.
fn default_action_name(rule_name: &str, severity: AlertSeverity) -> Option<&'static str> {
    match rule_name {
        "ServiceDown" | "GovernanceWorkflowFailure" => Some("service_restart"),
        "HighResponseTime" => Some("health_check"),
        "DatabaseConnectionIssues" => Some("restart_database"),
        "HighMemoryUsage" => Some("clear_cache"),
        "HighCPUUsage" => Some("scale_service"),
        "CompliancePolicyViolated" => Some("quarantine_service"),
        _ => match severity {
            AlertSeverity::Critical | AlertSeverity::Emergency => Some("service_restart"),
            AlertSeverity::Warning => Some("health_check"),
            AlertSeverity::Info => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_priority_mapping() {
        assert_eq!(job_priority(AlertSeverity::Info, false), 2);
        assert_eq!(job_priority(AlertSeverity::Warning, false), 5);
        assert_eq!(job_priority(AlertSeverity::Critical, false), 8);
        assert_eq!(job_priority(AlertSeverity::Emergency, false), 10);
        // Constitutional traffic is floored near the top.
        assert_eq!(job_priority(AlertSeverity::Info, true), 9);
        assert_eq!(job_priority(AlertSeverity::Emergency, true), 10);
    }

    #[test]
    fn test_default_action_mapping() {
        assert_eq!(
            default_action_name("ServiceDown", AlertSeverity::Info),
            Some("service_restart")
        );
        assert_eq!(
            default_action_name("HighMemoryUsage", AlertSeverity::Critical),
            Some("clear_cache")
        );
        assert_eq!(
            default_action_name("CompliancePolicyViolated", AlertSeverity::Emergency),
            Some("quarantine_service")
        );
        // Unknown rules fall back on severity.
        assert_eq!(
            default_action_name("SomethingElse", AlertSeverity::Critical),
            Some("service_restart")
        );
        assert_eq!(
            default_action_name("SomethingElse", AlertSeverity::Warning),
            Some("health_check")
        );
        assert_eq!(default_action_name("SomethingElse", AlertSeverity::Info), None);
    }
}
