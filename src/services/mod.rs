//! Application services for the Vigil alerting engine.

pub mod control;
pub mod dispatcher;
pub mod engine;
pub mod executor;
pub mod oncall;
pub mod rate_limit;
pub mod retention;
pub mod retry;
pub mod suppression;
pub mod templates;
pub mod timer;

pub use control::ControlSurface;
pub use dispatcher::NotificationDispatcher;
pub use engine::{EngineEvent, EngineHandle, EscalationEngine};
pub use executor::RemediationExecutor;
pub use oncall::OnCallResolver;
pub use rate_limit::TokenBucketRateLimiter;
pub use retention::RetentionSweeper;
pub use retry::RetryPolicy;
pub use suppression::{SuppressionDecision, SuppressionIndex};
pub use templates::TemplateRegistry;
pub use timer::TimerService;
