//! Domain layer for the Vigil alerting engine
//!
//! Contains the core record types, status state machines, and the
//! capability ports (interfaces) the services are written against.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
