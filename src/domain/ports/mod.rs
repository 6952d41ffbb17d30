//! Domain ports (interfaces) for the Vigil alerting engine.
//!
//! Capabilities are injected at wiring time: the clock, the store
//! repositories, channel adapters, and the remediation runner. Services
//! depend only on these traits.

pub mod alert_repository;
pub mod channel;
pub mod clock;
pub mod directory_repository;
pub mod execution_repository;
pub mod job_repository;
pub mod remediation_runner;

pub use alert_repository::AlertRepository;
pub use channel::{Channel, RateLimitSpec, RenderedMessage, SendOutcome};
pub use clock::{Clock, IdMinter};
pub use directory_repository::DirectoryRepository;
pub use execution_repository::ExecutionRepository;
pub use job_repository::JobRepository;
pub use remediation_runner::{RemediationRunner, RunOutcome};
