//! PostgreSQL bootstrap for the France Services application
//!
//! Brings a local PostgreSQL server into a state the application can use:
//! - Dependency checks for the client and server packages
//! - Server start with a bounded readiness wait
//! - Idempotent database and role creation, privilege grants
//! - Connection configuration file written for the other processes

pub mod check;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod error;
pub mod provision;
pub mod readiness;
pub mod sql;

pub use cluster::{AdminAccess, CreateOutcome, PgCluster, PsqlCluster};
pub use config::ProvisionConfig;
pub use connection::ConnectionConfig;
pub use error::{Dependency, Phase, ProvisionError};
pub use provision::{ProvisionReport, Provisioner};
pub use readiness::wait_until_ready;
