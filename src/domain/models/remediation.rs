//! Remediation actions and executions.
//!
//! An action is a static definition of an external corrective command; an
//! execution is one runtime attempt to apply it on behalf of an alert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SCHEMA_VERSION;

/// Blast radius of a remediation action. Orthogonal to alert severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ImpactLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Static definition of an external corrective action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationAction {
    pub id: Uuid,
    pub name: String,
    /// Command template with `{placeholder}` variables from the restricted
    /// set; validated at load time
    pub command_template: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub requires_approval: bool,
    pub impact: ImpactLevel,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
    pub version: u64,
}

impl RemediationAction {
    pub fn new(
        id: Uuid,
        name: impl Into<String>,
        command_template: impl Into<String>,
        impact: ImpactLevel,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            command_template: command_template.into(),
            timeout_secs: 300,
            max_retries: 3,
            requires_approval: false,
            impact,
            created_at: now,
            schema_version: SCHEMA_VERSION,
            version: 1,
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_approval_required(mut self, required: bool) -> Self {
        self.requires_approval = required;
        self
    }

    /// Whether launching requires a prior human approval.
    pub fn needs_approval(&self) -> bool {
        self.requires_approval || self.impact >= ImpactLevel::High
    }
}

/// Status of a remediation execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Waiting for an approval decision
    Pending,
    /// Approved (or approval not required); queued for the executor
    Approved,
    /// The external command is running
    Running,
    Success,
    Failed,
    Timeout,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::Timeout),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [ExecutionStatus] {
        match self {
            Self::Pending => &[Self::Approved, Self::Cancelled],
            Self::Approved => &[Self::Running, Self::Cancelled],
            Self::Running => &[Self::Success, Self::Failed, Self::Timeout, Self::Cancelled],
            Self::Success => &[],
            Self::Failed => &[],
            Self::Timeout => &[],
            Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// A runtime instance of a remediation action applied to an alert.
/// Created by the engine; runtime transitions owned by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationExecution {
    pub id: Uuid,
    pub action_id: Uuid,
    pub alert_id: Uuid,
    pub status: ExecutionStatus,
    /// Carried for retention routing, mirroring the alert's flag
    pub constitutional_flag: bool,
    /// Retry attempt counter (0 before the first launch)
    pub attempt: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    /// Bounded tail of captured stdout
    pub stdout_tail: String,
    /// Bounded tail of captured stderr
    pub stderr_tail: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u32,
    pub version: u64,
}

impl RemediationExecution {
    pub fn new(
        id: Uuid,
        action_id: Uuid,
        alert_id: Uuid,
        status: ExecutionStatus,
        constitutional_flag: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            action_id,
            alert_id,
            status,
            constitutional_flag,
            attempt: 0,
            started_at: None,
            ended_at: None,
            exit_code: None,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
            created_at: now,
            updated_at: now,
            schema_version: SCHEMA_VERSION,
            version: 1,
        }
    }

    /// Transition to a new status, enforcing the state machine.
    pub fn transition_to(
        &mut self,
        new_status: ExecutionStatus,
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
            ExecutionStatus::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.ended_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_approval_by_flag_or_impact() {
        let now = Utc::now();
        let low = RemediationAction::new(Uuid::new_v4(), "health_check", "true", ImpactLevel::Low, now);
        assert!(!low.needs_approval());

        let flagged = low.clone().with_approval_required(true);
        assert!(flagged.needs_approval());

        let high =
            RemediationAction::new(Uuid::new_v4(), "isolate", "true", ImpactLevel::High, now);
        assert!(high.needs_approval());

        let critical = RemediationAction::new(
            Uuid::new_v4(),
            "restart_database",
            "true",
            ImpactLevel::Critical,
            now,
        );
        assert!(critical.needs_approval());
    }

    #[test]
    fn test_execution_lifecycle() {
        let now = Utc::now();
        let mut exec = RemediationExecution::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            ExecutionStatus::Pending,
            false,
            now,
        );

        exec.transition_to(ExecutionStatus::Approved, now).unwrap();
        exec.transition_to(ExecutionStatus::Running, now).unwrap();
        assert!(exec.started_at.is_some());
        exec.transition_to(ExecutionStatus::Success, now).unwrap();
        assert!(exec.ended_at.is_some());
        assert!(exec.is_terminal());

        // Terminal is final.
        assert!(exec.transition_to(ExecutionStatus::Running, now).is_err());
    }

    #[test]
    fn test_pending_cannot_run_without_approval() {
        let now = Utc::now();
        let mut exec = RemediationExecution::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            ExecutionStatus::Pending,
            false,
            now,
        );
        assert!(exec.transition_to(ExecutionStatus::Running, now).is_err());
        exec.transition_to(ExecutionStatus::Cancelled, now).unwrap();
        assert!(exec.is_terminal());
    }

    #[test]
    fn test_impact_ordering() {
        assert!(ImpactLevel::Low < ImpactLevel::Medium);
        assert!(ImpactLevel::High < ImpactLevel::Critical);
    }
}
