//! Vigil - Alerting, Escalation, and Automated Remediation Engine
//!
//! A long-lived coordinator for a constitutional-governance service mesh:
//! - Alert ingress with duplicate suppression and maintenance windows
//! - Multi-tier escalation state machine over on-call schedules
//! - Notification fan-out with per-channel rate limits and retries
//! - Bounded external remediation actions with approval gates
//! - SQLite persistence with conditional updates (WAL mode)

pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::config::VigilConfig;
pub use infrastructure::runtime::VigilRuntime;
pub use services::control::ControlSurface;
