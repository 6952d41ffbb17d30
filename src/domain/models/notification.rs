//! Notification jobs and templates.
//!
//! A job is one unit of deliverable work: one rendered message, one
//! channel, one contact. Jobs transition to a terminal state exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::directory::ChannelKind;
use super::SCHEMA_VERSION;

/// Status of a notification job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a dispatcher worker (or for its `scheduled_not_before`)
    Pending,
    /// A worker holds the job; an attempt is outstanding
    InFlight,
    /// Terminal: the channel adapter confirmed delivery
    Delivered,
    /// Terminal: permanent failure (bad address, template error, 4xx)
    FailedPermanent,
    /// Terminal: cancelled before any attempt started
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Delivered => "delivered",
            Self::FailedPermanent => "failed_permanent",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "delivered" => Some(Self::Delivered),
            "failed_permanent" => Some(Self::FailedPermanent),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::FailedPermanent | Self::Cancelled)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [JobStatus] {
        match self {
            Self::Pending => &[Self::InFlight, Self::Cancelled],
            Self::InFlight => &[Self::Pending, Self::Delivered, Self::FailedPermanent],
            Self::Delivered => &[],
            Self::FailedPermanent => &[],
            Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// A unit of work: deliver one rendered message via one channel to one
/// contact. Created by the engine, consumed by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub contact_id: Uuid,
    pub channel: ChannelKind,
    /// Template looked up in the template registry at render time
    pub template_id: String,
    /// Variables interpolated into the template
    pub variables: BTreeMap<String, String>,
    /// 1 (lowest) to 10 (highest)
    pub priority: u8,
    /// Constitutional jobs are served by the reserved worker partition
    pub constitutional_flag: bool,
    pub status: JobStatus,
    /// Not dispatched before this instant (backoff reschedules push it out)
    pub scheduled_not_before: DateTime<Utc>,
    /// Hard deadline after which transient retries stop
    pub deadline: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub schema_version: u32,
    pub version: u64,
}

impl NotificationJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        alert_id: Uuid,
        contact_id: Uuid,
        channel: ChannelKind,
        template_id: impl Into<String>,
        priority: u8,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            alert_id,
            contact_id,
            channel,
            template_id: template_id.into(),
            variables: BTreeMap::new(),
            priority: priority.clamp(1, 10),
            constitutional_flag: false,
            status: JobStatus::Pending,
            scheduled_not_before: now,
            deadline,
            attempts: 0,
            max_attempts: 5,
            last_error: None,
            created_at: now,
            updated_at: now,
            delivered_at: None,
            schema_version: SCHEMA_VERSION,
            version: 1,
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_constitutional_flag(mut self, flag: bool) -> Self {
        self.constitutional_flag = flag;
        self
    }

    /// Transition to a new status, enforcing exactly-once terminality.
    pub fn transition_to(
        &mut self,
        new_status: JobStatus,
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
        if new_status == JobStatus::Delivered {
            self.delivered_at = Some(now);
        }
        Ok(())
    }

    /// Record a failed attempt and reschedule after the given backoff.
    /// Returns `false` when attempts or deadline are exhausted and the job
    /// must go terminal instead.
    pub fn reschedule_after_transient(
        &mut self,
        backoff: chrono::Duration,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> bool {
        self.attempts += 1;
        self.last_error = Some(error.into());
        self.updated_at = now;
        let next = now + backoff;
        if self.attempts >= self.max_attempts || next >= self.deadline {
            return false;
        }
        self.scheduled_not_before = next;
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Ordering key within the dispatcher: the (alert, channel, contact)
    /// tuple whose attempts must never overlap.
    pub fn ordering_key(&self) -> (Uuid, ChannelKind, Uuid) {
        (self.alert_id, self.channel, self.contact_id)
    }
}

/// A message template: subject and body with `{placeholder}` variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTemplate {
    pub id: String,
    pub subject: String,
    pub body: String,
}

impl NotificationTemplate {
    pub fn new(
        id: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}
