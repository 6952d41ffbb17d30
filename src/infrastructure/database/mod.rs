//! SQLite persistence for the Vigil store.
//!
//! Connection pooling (WAL mode), embedded migrations, and the
//! repository implementations with row-version conditional updates.

pub mod alert_repo;
pub mod connection;
pub mod directory_repo;
pub mod execution_repo;
pub mod job_repo;
pub mod migrations;

pub use alert_repo::SqliteAlertRepository;
pub use connection::{create_pool, create_test_pool, PoolConfig};
pub use directory_repo::SqliteDirectoryRepository;
pub use execution_repo::SqliteExecutionRepository;
pub use job_repo::SqliteJobRepository;
pub use migrations::{all_embedded_migrations, Migration, Migrator};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainError;

pub(crate) fn parse_dt(s: &str) -> Result<DateTime<Utc>, DomainError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DomainError::SerializationError(format!("bad datetime '{s}': {e}")))
}

pub(crate) fn parse_dt_opt(s: Option<&str>) -> Result<Option<DateTime<Utc>>, DomainError> {
    s.map(parse_dt).transpose()
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, DomainError> {
    Uuid::parse_str(s).map_err(|e| DomainError::SerializationError(format!("bad uuid '{s}': {e}")))
}

pub(crate) fn parse_uuid_opt(s: Option<&str>) -> Result<Option<Uuid>, DomainError> {
    s.map(parse_uuid).transpose()
}
