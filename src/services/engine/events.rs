//! Engine events and statistics.
//!
//! Everything the escalation engine reacts to arrives as an
//! [`EngineEvent`] on one of its partitions. Events for one alert are
//! always routed to the same partition and processed in arrival order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::domain::models::{ExecutionStatus, IngressEvent};

/// One unit of input to the escalation engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A validated alert event admitted through the control surface.
    /// Carries its precomputed correlation key for partition routing.
    Ingress {
        event: IngressEvent,
        correlation_key: String,
    },

    /// A responder acknowledged the alert.
    Ack {
        alert_id: Uuid,
        by: Option<Uuid>,
    },

    /// Resolve the alert (manual, remediation-success rule, or external
    /// resolver).
    Resolve {
        alert_id: Uuid,
        reason: String,
    },

    /// A scheduled escalation timer fired. Ignored when `cursor_version`
    /// no longer matches the alert's current stamp.
    Timer {
        alert_id: Uuid,
        cursor_version: u64,
    },

    /// The dispatcher delivered a notification job.
    NotificationDelivered {
        job_id: Uuid,
        alert_id: Uuid,
        rule_name: String,
        source: String,
        delivered_at: DateTime<Utc>,
    },

    /// The dispatcher gave up on a notification job.
    NotificationFailed {
        job_id: Uuid,
        alert_id: Uuid,
        error: String,
    },

    /// The executor finished (or abandoned) a remediation execution.
    RemediationResult {
        exec_id: Uuid,
        alert_id: Uuid,
        status: ExecutionStatus,
    },

    /// A human approved or denied a pending remediation.
    ApprovalDecision {
        exec_id: Uuid,
        alert_id: Uuid,
        approved: bool,
        decided_by: Option<Uuid>,
    },
}

impl EngineEvent {
    /// Partition routing key. Ingress routes by correlation key so that
    /// duplicate admissions serialize; all post-admission events route by
    /// alert ID.
    pub fn partition(&self, partitions: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        match self {
            Self::Ingress {
                correlation_key, ..
            } => correlation_key.hash(&mut hasher),
            Self::Ack { alert_id, .. }
            | Self::Resolve { alert_id, .. }
            | Self::Timer { alert_id, .. }
            | Self::NotificationDelivered { alert_id, .. }
            | Self::NotificationFailed { alert_id, .. }
            | Self::RemediationResult { alert_id, .. }
            | Self::ApprovalDecision { alert_id, .. } => alert_id.hash(&mut hasher),
        }
        (hasher.finish() as usize) % partitions.max(1)
    }

    /// The alert this event concerns, when already admitted.
    pub fn alert_id(&self) -> Option<Uuid> {
        match self {
            Self::Ingress { .. } => None,
            Self::Ack { alert_id, .. }
            | Self::Resolve { alert_id, .. }
            | Self::Timer { alert_id, .. }
            | Self::NotificationDelivered { alert_id, .. }
            | Self::NotificationFailed { alert_id, .. }
            | Self::RemediationResult { alert_id, .. }
            | Self::ApprovalDecision { alert_id, .. } => Some(*alert_id),
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ingress { .. } => "ingress",
            Self::Ack { .. } => "ack",
            Self::Resolve { .. } => "resolve",
            Self::Timer { .. } => "timer",
            Self::NotificationDelivered { .. } => "notification_delivered",
            Self::NotificationFailed { .. } => "notification_failed",
            Self::RemediationResult { .. } => "remediation_result",
            Self::ApprovalDecision { .. } => "approval_decision",
        }
    }
}

/// Cheap process-wide counters, readable through the control surface.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub alerts_admitted: AtomicU64,
    pub alerts_suppressed: AtomicU64,
    pub alerts_merged: AtomicU64,
    pub alerts_resolved: AtomicU64,
    pub escalations: AtomicU64,
    pub notifications_delivered: AtomicU64,
    pub notifications_failed: AtomicU64,
    pub remediations_started: AtomicU64,
    pub remediations_succeeded: AtomicU64,
    pub remediations_failed: AtomicU64,
}

/// Point-in-time snapshot of [`EngineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStatsSnapshot {
    pub alerts_admitted: u64,
    pub alerts_suppressed: u64,
    pub alerts_merged: u64,
    pub alerts_resolved: u64,
    pub escalations: u64,
    pub notifications_delivered: u64,
    pub notifications_failed: u64,
    pub remediations_started: u64,
    pub remediations_succeeded: u64,
    pub remediations_failed: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            alerts_admitted: self.alerts_admitted.load(Ordering::Relaxed),
            alerts_suppressed: self.alerts_suppressed.load(Ordering::Relaxed),
            alerts_merged: self.alerts_merged.load(Ordering::Relaxed),
            alerts_resolved: self.alerts_resolved.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            notifications_delivered: self.notifications_delivered.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            remediations_started: self.remediations_started.load(Ordering::Relaxed),
            remediations_succeeded: self.remediations_succeeded.load(Ordering::Relaxed),
            remediations_failed: self.remediations_failed.load(Ordering::Relaxed),
        }
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
