//! Escalation rules and policies.
//!
//! A policy is an ordered list of rules; a rule is a (trigger, delay,
//! target, channel) tuple. Both are immutable once referenced by a live
//! alert.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::alert::{Alert, AlertSeverity, AlertStatus};
use super::directory::ChannelKind;
use super::SCHEMA_VERSION;

/// Condition under which an escalation rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    /// Always matches when the rule's delay elapses
    TimeBased,
    /// Matches iff the alert is still active (never acknowledged)
    AckTimeout,
    /// Matches iff severity is at or above the rule's threshold
    SeverityIncrease,
    /// Matches iff no acknowledgment and no resolution occurred
    NoResponse,
    /// Matches iff the alert carries the constitutional flag
    ConstitutionalViolation,
}

impl EscalationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeBased => "time_based",
            Self::AckTimeout => "ack_timeout",
            Self::SeverityIncrease => "severity_increase",
            Self::NoResponse => "no_response",
            Self::ConstitutionalViolation => "constitutional_violation",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "time_based" => Some(Self::TimeBased),
            "ack_timeout" => Some(Self::AckTimeout),
            "severity_increase" => Some(Self::SeverityIncrease),
            "no_response" => Some(Self::NoResponse),
            "constitutional_violation" => Some(Self::ConstitutionalViolation),
            _ => None,
        }
    }
}

/// Target of an escalation rule: a contact directly, or a team resolved
/// through the on-call resolver at fire time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EscalationTarget {
    Contact(Uuid),
    Team(Uuid),
}

/// One step of an escalation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRule {
    pub id: Uuid,
    pub name: String,
    pub trigger: EscalationTrigger,
    /// Delay after the previous step (or alert creation for the first rule)
    pub delay_secs: u64,
    pub target: EscalationTarget,
    pub channel: ChannelKind,
    /// Severity threshold for `SeverityIncrease` triggers
    pub severity_threshold: Option<AlertSeverity>,
    /// High-blast-radius marker carried into remediation gating
    pub impact_flag: bool,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
    pub version: u64,
}

impl EscalationRule {
    pub fn new(
        id: Uuid,
        name: impl Into<String>,
        trigger: EscalationTrigger,
        delay_secs: u64,
        target: EscalationTarget,
        channel: ChannelKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            trigger,
            delay_secs,
            target,
            channel,
            severity_threshold: None,
            impact_flag: false,
            created_at: now,
            schema_version: SCHEMA_VERSION,
            version: 1,
        }
    }

    pub fn with_severity_threshold(mut self, threshold: AlertSeverity) -> Self {
        self.severity_threshold = Some(threshold);
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::seconds(self.delay_secs as i64)
    }

    /// Evaluate the trigger condition against the alert's current state.
    pub fn matches(&self, alert: &Alert) -> bool {
        match self.trigger {
            EscalationTrigger::TimeBased => true,
            EscalationTrigger::AckTimeout => alert.status == AlertStatus::Active,
            EscalationTrigger::SeverityIncrease => {
                let threshold = self.severity_threshold.unwrap_or(AlertSeverity::Critical);
                alert.severity >= threshold
            }
            EscalationTrigger::NoResponse => {
                alert.acked_at.is_none() && alert.resolved_at.is_none()
            }
            EscalationTrigger::ConstitutionalViolation => alert.constitutional_flag,
        }
    }
}

/// Ordered list of escalation rules plus limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub id: Uuid,
    pub name: String,
    /// Rule IDs in evaluation order
    pub rule_ids: Vec<Uuid>,
    pub max_escalations: u32,
    /// When non-empty, only alerts with one of these severities attach
    pub severity_filter: Vec<AlertSeverity>,
    /// When set, only constitutional-flagged alerts may attach
    pub constitutional_only: bool,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
    pub version: u64,
}

impl EscalationPolicy {
    pub fn new(id: Uuid, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            rule_ids: Vec::new(),
            max_escalations: 3,
            severity_filter: Vec::new(),
            constitutional_only: false,
            created_at: now,
            schema_version: SCHEMA_VERSION,
            version: 1,
        }
    }

    pub fn with_rule(mut self, rule_id: Uuid) -> Self {
        self.rule_ids.push(rule_id);
        self
    }

    pub fn with_max_escalations(mut self, max: u32) -> Self {
        self.max_escalations = max;
        self
    }

    /// Whether the policy accepts the given alert.
    pub fn accepts(&self, severity: AlertSeverity, constitutional: bool) -> bool {
        if self.constitutional_only && !constitutional {
            return false;
        }
        self.severity_filter.is_empty() || self.severity_filter.contains(&severity)
    }

    /// Rule ID at the cursor position, if the policy has not been exhausted.
    pub fn rule_at(&self, cursor: u32) -> Option<Uuid> {
        self.rule_ids.get(cursor as usize).copied()
    }

    /// Whether escalation may continue from the given cursor and level.
    pub fn can_escalate(&self, cursor: u32, escalation_level: u32) -> bool {
        (cursor as usize) < self.rule_ids.len() && escalation_level < self.max_escalations
    }
}
