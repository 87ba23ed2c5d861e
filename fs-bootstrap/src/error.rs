//! Provisioning error taxonomy

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Step of a provisioning run, used in diagnostics and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    LoadConfig,
    CheckClient,
    CheckServer,
    StartServer,
    WaitReady,
    EnsureDatabase,
    EnsureRole,
    GrantPrivileges,
    PersistConfig,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadConfig => "load_config",
            Self::CheckClient => "check_client",
            Self::CheckServer => "check_server",
            Self::StartServer => "start_server",
            Self::WaitReady => "wait_ready",
            Self::EnsureDatabase => "ensure_database",
            Self::EnsureRole => "ensure_role",
            Self::GrantPrivileges => "grant_privileges",
            Self::PersistConfig => "persist_config",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Software the provisioner cannot work without.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    Client,
    Server,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("PostgreSQL client"),
            Self::Server => f.write_str("PostgreSQL server"),
        }
    }
}

/// Every way a provisioning run can fail. All of them are fatal.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Client or server software is absent.
    #[error("{dependency} is not installed. Install it with: {hint}")]
    MissingDependency { dependency: Dependency, hint: String },

    /// A start, query, create or grant command failed.
    #[error("{phase} failed: {reason}")]
    ProvisioningFailed { phase: Phase, reason: String },

    /// The server never accepted connections after being started.
    #[error("PostgreSQL did not accept connections within {waited:?}")]
    StartupTimeout { waited: Duration },

    #[error("failed to write connection configuration {path:?}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ProvisionError {
    /// Build a `ProvisioningFailed` from any displayable cause.
    ///
    /// Uses the alternate format so anyhow context chains are kept.
    pub fn failed(phase: Phase, cause: impl fmt::Display) -> Self {
        Self::ProvisioningFailed {
            phase,
            reason: format!("{:#}", cause),
        }
    }

    /// The phase the error belongs to.
    pub fn phase(&self) -> Phase {
        match self {
            Self::MissingDependency {
                dependency: Dependency::Client,
                ..
            } => Phase::CheckClient,
            Self::MissingDependency {
                dependency: Dependency::Server,
                ..
            } => Phase::CheckServer,
            Self::ProvisioningFailed { phase, .. } => *phase,
            Self::StartupTimeout { .. } => Phase::WaitReady,
            Self::ConfigWrite { .. } => Phase::PersistConfig,
            Self::InvalidConfig(_) => Phase::LoadConfig,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_keeps_context_chain() {
        let cause = anyhow::anyhow!("permission denied to create database").context("psql failed");
        let err = ProvisionError::failed(Phase::EnsureDatabase, cause);
        assert_eq!(
            err.to_string(),
            "ensure_database failed: psql failed: permission denied to create database"
        );
        assert_eq!(err.phase(), Phase::EnsureDatabase);
    }

    #[test]
    fn missing_dependency_names_install_command() {
        let err = ProvisionError::MissingDependency {
            dependency: Dependency::Server,
            hint: "sudo apt-get install -y postgresql".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "PostgreSQL server is not installed. Install it with: sudo apt-get install -y postgresql"
        );
        assert_eq!(err.phase(), Phase::CheckServer);
        assert_eq!(err.exit_code(), 1);
    }
}
