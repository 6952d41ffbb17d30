//! Domain models
//!
//! Persisted record types and their status state machines. Every record
//! that lives in the store carries a `schema_version` discriminator and a
//! monotonic `version` counter used for conditional updates.

pub mod alert;
pub mod config;
pub mod directory;
pub mod escalation;
pub mod maintenance;
pub mod notification;
pub mod remediation;

pub use alert::{Alert, AlertSeverity, AlertStatus, IngressEvent};
pub use config::VigilConfig;
pub use directory::{ChannelKind, Contact, OnCallSchedule, Team};
pub use escalation::{EscalationPolicy, EscalationRule, EscalationTrigger};
pub use maintenance::MaintenanceWindow;
pub use notification::{JobStatus, NotificationJob, NotificationTemplate};
pub use remediation::{
    ExecutionStatus, ImpactLevel, RemediationAction, RemediationExecution,
};

/// Schema version stamped on every persisted record.
pub const SCHEMA_VERSION: u32 = 1;
