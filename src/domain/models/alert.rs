//! Alert domain model.
//!
//! Alerts are the unit of state in the engine: one record per abnormal
//! condition, driven through the escalation state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::SCHEMA_VERSION;

/// Alert urgency. Ordered: `Info < Warning < Critical < Emergency`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            "emergency" => Some(Self::Emergency),
            _ => None,
        }
    }
}

/// Status of an alert in the escalation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Admitted and awaiting acknowledgment or resolution
    Active,
    /// A responder acknowledged the alert
    Acknowledged,
    /// At least one escalation rule has fired
    Escalated,
    /// Terminal: resolved manually, by remediation, or by an external resolver
    Resolved,
    /// Terminal: short-circuited at ingress (maintenance window or cooldown)
    Suppressed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Escalated => "escalated",
            Self::Resolved => "resolved",
            Self::Suppressed => "suppressed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "acknowledged" => Some(Self::Acknowledged),
            "escalated" => Some(Self::Escalated),
            "resolved" => Some(Self::Resolved),
            "suppressed" => Some(Self::Suppressed),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Suppressed)
    }

    /// Check if this state counts as live for correlation (duplicate merge).
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::Acknowledged | Self::Escalated)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [AlertStatus] {
        match self {
            Self::Active => &[Self::Acknowledged, Self::Escalated, Self::Resolved],
            Self::Acknowledged => &[Self::Escalated, Self::Active, Self::Resolved],
            Self::Escalated => &[Self::Acknowledged, Self::Active, Self::Resolved],
            Self::Resolved => &[],
            Self::Suppressed => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// A pre-formed alert event arriving from a monitoring producer.
///
/// This is the ingress wire shape; admission turns it into an [`Alert`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressEvent {
    pub rule_name: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub source: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub constitutional_flag: bool,
    /// Producer-side ID used to deduplicate ingress retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl IngressEvent {
    /// Reject protocol violations before the event reaches the engine.
    pub fn validate(&self) -> Result<(), String> {
        if self.rule_name.trim().is_empty() {
            return Err("rule_name cannot be empty".to_string());
        }
        if self.source.trim().is_empty() {
            return Err("source cannot be empty".to_string());
        }
        if self.message.trim().is_empty() {
            return Err("message cannot be empty".to_string());
        }
        Ok(())
    }

    /// Derive the correlation key for duplicate detection.
    ///
    /// Key shape: `rule_name/source/k1=v1,k2=v2` over the configured label
    /// subset, in sorted key order. Stable for the life of one alert.
    pub fn correlation_key(&self, label_keys: &[String]) -> String {
        let mut key = format!("{}/{}", self.rule_name, self.source);
        let mut pairs: Vec<String> = label_keys
            .iter()
            .filter_map(|k| self.labels.get(k).map(|v| format!("{k}={v}")))
            .collect();
        pairs.sort();
        if !pairs.is_empty() {
            key.push('/');
            key.push_str(&pairs.join(","));
        }
        key
    }
}

/// A persistent record of an abnormal condition, driven through the
/// escalation state machine. Mutated only by the escalation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier
    pub id: Uuid,
    /// Name of the producing rule (e.g. "ServiceDown")
    pub rule_name: String,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub message: String,
    /// Originating service or subsystem
    pub source: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Derived duplicate-detection key; stable for the alert's lifetime
    pub correlation_key: String,
    /// Producer-supplied ID for idempotent ingress
    pub external_id: Option<String>,
    /// Governance marker: distinct retention, no auto-resolve on remediation
    pub constitutional_flag: bool,
    /// Current escalation level; non-decreasing
    pub escalation_level: u32,
    /// Escalation policy attached at admission
    pub policy_id: Option<Uuid>,
    /// Index of the next policy rule to evaluate
    pub rule_cursor: u32,
    /// Monotonic stamp; pending timers carry it and are dropped when stale
    pub cursor_version: u64,
    /// Number of duplicate arrivals merged into this alert
    pub merge_count: u32,
    /// Set after sustained store failures; the alert is kept, not dropped
    pub degraded: bool,
    pub remediation_attempted: bool,
    pub remediation_success: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acked_at: Option<DateTime<Utc>>,
    /// Contact that acknowledged the alert
    pub ack_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Record schema discriminator
    pub schema_version: u32,
    /// Monotonic counter for conditional updates
    pub version: u64,
}

impl Alert {
    /// Build an alert from an admitted ingress event.
    pub fn from_ingress(
        id: Uuid,
        event: &IngressEvent,
        correlation_key: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            rule_name: event.rule_name.clone(),
            severity: event.severity,
            status: AlertStatus::Active,
            message: event.message.clone(),
            source: event.source.clone(),
            labels: event.labels.clone(),
            annotations: event.annotations.clone(),
            correlation_key,
            external_id: event.external_id.clone(),
            constitutional_flag: event.constitutional_flag,
            escalation_level: 0,
            policy_id: None,
            rule_cursor: 0,
            cursor_version: 0,
            merge_count: 0,
            degraded: false,
            remediation_attempted: false,
            remediation_success: None,
            created_at: now,
            updated_at: now,
            acked_at: None,
            ack_by: None,
            resolved_at: None,
            schema_version: SCHEMA_VERSION,
            version: 1,
        }
    }

    /// Transition to a new status, enforcing the state machine.
    pub fn transition_to(
        &mut self,
        new_status: AlertStatus,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        if !self.status.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.status.as_str(),
                new_status.as_str()
            ));
        }

        self.status = new_status;
        self.updated_at = now;

        match new_status {
            AlertStatus::Acknowledged => self.acked_at = Some(now),
            AlertStatus::Resolved => self.resolved_at = Some(now),
            _ => {}
        }

        Ok(())
    }

    /// Fold a duplicate arrival into this alert: bump `updated_at`, append
    /// label diffs, count the merge. Does not create a new record.
    pub fn merge_duplicate(&mut self, event: &IngressEvent, now: DateTime<Utc>) {
        for (k, v) in &event.labels {
            self.labels.entry(k.clone()).or_insert_with(|| v.clone());
        }
        self.merge_count += 1;
        self.updated_at = now;
    }

    /// Invalidate all pending timers for this alert.
    pub fn bump_cursor_version(&mut self) -> u64 {
        self.cursor_version += 1;
        self.cursor_version
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(rule: &str, source: &str) -> IngressEvent {
        IngressEvent {
            rule_name: rule.to_string(),
            severity: AlertSeverity::Critical,
            message: "service unreachable".to_string(),
            source: source.to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            constitutional_flag: false,
            external_id: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Info < AlertSeverity::Warning);
        assert!(AlertSeverity::Warning < AlertSeverity::Critical);
        assert!(AlertSeverity::Critical < AlertSeverity::Emergency);
    }

    #[test]
    fn test_severity_round_trip() {
        for s in [
            AlertSeverity::Info,
            AlertSeverity::Warning,
            AlertSeverity::Critical,
            AlertSeverity::Emergency,
        ] {
            assert_eq!(AlertSeverity::from_str(s.as_str()), Some(s));
        }
        assert_eq!(AlertSeverity::from_str("bogus"), None);
    }

    #[test]
    fn test_correlation_key_includes_sorted_label_subset() {
        let mut ev = event("ServiceDown", "svc-a");
        ev.labels.insert("service".to_string(), "pgc".to_string());
        ev.labels.insert("zone".to_string(), "eu".to_string());
        ev.labels.insert("noise".to_string(), "x".to_string());

        let keys = vec!["zone".to_string(), "service".to_string()];
        assert_eq!(
            ev.correlation_key(&keys),
            "ServiceDown/svc-a/service=pgc,zone=eu"
        );
    }

    #[test]
    fn test_correlation_key_without_labels() {
        let ev = event("ServiceDown", "svc-a");
        assert_eq!(ev.correlation_key(&["service".to_string()]), "ServiceDown/svc-a");
    }

    #[test]
    fn test_ingress_validation() {
        assert!(event("ServiceDown", "svc-a").validate().is_ok());
        assert!(event("", "svc-a").validate().is_err());
        assert!(event("ServiceDown", " ").validate().is_err());

        let mut ev = event("ServiceDown", "svc-a");
        ev.message = String::new();
        assert!(ev.validate().is_err());
    }

    #[test]
    fn test_valid_transitions() {
        let now = Utc::now();
        let ev = event("ServiceDown", "svc-a");
        let mut alert = Alert::from_ingress(Uuid::new_v4(), &ev, "k".to_string(), now);

        assert_eq!(alert.status, AlertStatus::Active);
        alert.transition_to(AlertStatus::Acknowledged, now).unwrap();
        assert!(alert.acked_at.is_some());
        alert.transition_to(AlertStatus::Escalated, now).unwrap();
        alert.transition_to(AlertStatus::Resolved, now).unwrap();
        assert!(alert.resolved_at.is_some());
        assert!(alert.is_terminal());
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let now = Utc::now();
        let ev = event("ServiceDown", "svc-a");
        let mut alert = Alert::from_ingress(Uuid::new_v4(), &ev, "k".to_string(), now);
        alert.transition_to(AlertStatus::Resolved, now).unwrap();

        assert!(alert.transition_to(AlertStatus::Active, now).is_err());
        assert!(alert.transition_to(AlertStatus::Acknowledged, now).is_err());
    }

    #[test]
    fn test_acknowledged_can_reenter_active() {
        // Re-notification path: no response within the ack timeout forces
        // the alert back to active.
        let now = Utc::now();
        let ev = event("ServiceDown", "svc-a");
        let mut alert = Alert::from_ingress(Uuid::new_v4(), &ev, "k".to_string(), now);
        alert.transition_to(AlertStatus::Acknowledged, now).unwrap();
        assert!(alert.transition_to(AlertStatus::Active, now).is_ok());
    }

    #[test]
    fn test_merge_duplicate_appends_labels_and_counts() {
        let now = Utc::now();
        let ev = event("ServiceDown", "svc-a");
        let mut alert = Alert::from_ingress(Uuid::new_v4(), &ev, "k".to_string(), now);
        alert.labels.insert("service".to_string(), "a".to_string());

        let mut dup = event("ServiceDown", "svc-a");
        dup.labels.insert("service".to_string(), "b".to_string());
        dup.labels.insert("zone".to_string(), "eu".to_string());

        alert.merge_duplicate(&dup, now);
        assert_eq!(alert.merge_count, 1);
        // Existing label values win; new keys are appended.
        assert_eq!(alert.labels.get("service"), Some(&"a".to_string()));
        assert_eq!(alert.labels.get("zone"), Some(&"eu".to_string()));
    }

    #[test]
    fn test_cursor_version_monotonic() {
        let now = Utc::now();
        let ev = event("ServiceDown", "svc-a");
        let mut alert = Alert::from_ingress(Uuid::new_v4(), &ev, "k".to_string(), now);
        let v1 = alert.bump_cursor_version();
        let v2 = alert.bump_cursor_version();
        assert!(v2 > v1);
    }
}
