//! The provisioning sequence
//!
//! Each step checks current state before changing anything, so a run can be
//! repeated, or resumed after a failure, without errors. Nothing is rolled
//! back when a later step fails.

use crate::cluster::{CreateOutcome, PgCluster};
use crate::config::ProvisionConfig;
use crate::error::{Dependency, Phase, ProvisionError};
use crate::readiness::wait_until_ready;
use common::{EventLog, ProvisionEvent};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;

/// What a successful run changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub server_started: bool,
    pub database_created: bool,
    pub role_created: bool,
    pub config_path: PathBuf,
    pub duration: Duration,
}

pub struct Provisioner<C> {
    cluster: C,
    config: ProvisionConfig,
    events: EventLog,
}

impl<C: PgCluster> Provisioner<C> {
    pub fn new(cluster: C, config: ProvisionConfig, events: EventLog) -> Self {
        Self {
            cluster,
            config,
            events,
        }
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Run every step in order, stopping at the first failure.
    pub async fn run(&self) -> Result<ProvisionReport, ProvisionError> {
        let start = Instant::now();
        self.events.send(ProvisionEvent::ProvisionStarted {
            database: self.config.database.clone(),
            role: self.config.role.clone(),
        });

        match self.run_steps(start).await {
            Ok(report) => {
                self.events.send(ProvisionEvent::ProvisionCompleted {
                    duration_ms: report.duration.as_millis() as u64,
                });
                Ok(report)
            }
            Err(e) => {
                self.events.send(ProvisionEvent::ProvisionFailed {
                    phase: e.phase().to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_steps(&self, start: Instant) -> Result<ProvisionReport, ProvisionError> {
        self.check_dependencies().await?;
        let server_started = self.ensure_server_running().await?;
        let database_created = self.ensure_database().await?;
        let role_created = self.ensure_role().await?;
        self.grant_privileges().await?;
        let config_path = self.persist_configuration()?;

        Ok(ProvisionReport {
            server_started,
            database_created,
            role_created,
            config_path,
            duration: start.elapsed(),
        })
    }

    /// Client first, then server: each missing piece is its own diagnostic.
    pub async fn check_dependencies(&self) -> Result<(), ProvisionError> {
        if !self.cluster.client_installed().await {
            return Err(ProvisionError::MissingDependency {
                dependency: Dependency::Client,
                hint: self.config.client_install_hint.clone(),
            });
        }

        if !self.cluster.server_installed().await {
            return Err(ProvisionError::MissingDependency {
                dependency: Dependency::Server,
                hint: self.config.server_install_hint.clone(),
            });
        }

        info!("PostgreSQL client and server are installed");
        Ok(())
    }

    /// Start the server if needed and wait until it accepts connections.
    ///
    /// Returns whether a start was issued.
    pub async fn ensure_server_running(&self) -> Result<bool, ProvisionError> {
        if self.cluster.is_ready().await {
            info!("PostgreSQL is already running");
            return Ok(false);
        }

        let command = self.config.start_command.join(" ");
        info!(command = %command, "PostgreSQL is not running, starting it");
        self.cluster
            .start_server()
            .await
            .map_err(|e| ProvisionError::failed(Phase::StartServer, e))?;
        self.events.send(ProvisionEvent::ServerStartIssued { command });

        let waited = wait_until_ready(
            &self.cluster,
            self.config.ready_timeout,
            self.config.ready_interval,
        )
        .await?;
        self.events.send(ProvisionEvent::ServerReady {
            waited_ms: waited.as_millis() as u64,
        });

        Ok(true)
    }

    /// Create the database unless the catalog already lists it.
    ///
    /// Returns whether this run created it.
    pub async fn ensure_database(&self) -> Result<bool, ProvisionError> {
        let database = &self.config.database;
        let exists = self
            .cluster
            .database_exists(database)
            .await
            .map_err(|e| ProvisionError::failed(Phase::EnsureDatabase, e))?;

        let created = if exists {
            false
        } else {
            info!(database = %database, "Creating database");
            let outcome = self
                .cluster
                .create_database(database)
                .await
                .map_err(|e| ProvisionError::failed(Phase::EnsureDatabase, e))?;
            outcome == CreateOutcome::Created
        };

        let event = if created {
            ProvisionEvent::DatabaseCreated {
                database: database.clone(),
            }
        } else {
            ProvisionEvent::DatabaseExists {
                database: database.clone(),
            }
        };
        self.events.send(event);
        Ok(created)
    }

    /// Create the login role unless the catalog already lists it.
    ///
    /// An existing role keeps its current password.
    pub async fn ensure_role(&self) -> Result<bool, ProvisionError> {
        let role = &self.config.role;
        let exists = self
            .cluster
            .role_exists(role)
            .await
            .map_err(|e| ProvisionError::failed(Phase::EnsureRole, e))?;

        let created = if exists {
            false
        } else {
            info!(role = %role, "Creating role");
            let outcome = self
                .cluster
                .create_role(role, &self.config.password)
                .await
                .map_err(|e| ProvisionError::failed(Phase::EnsureRole, e))?;
            outcome == CreateOutcome::Created
        };

        let event = if created {
            ProvisionEvent::RoleCreated { role: role.clone() }
        } else {
            ProvisionEvent::RoleExists { role: role.clone() }
        };
        self.events.send(event);
        Ok(created)
    }

    /// Grant all privileges on the database to the role, every run.
    pub async fn grant_privileges(&self) -> Result<(), ProvisionError> {
        self.cluster
            .grant_all(&self.config.database, &self.config.role)
            .await
            .map_err(|e| ProvisionError::failed(Phase::GrantPrivileges, e))?;

        self.events.send(ProvisionEvent::PrivilegesGranted {
            database: self.config.database.clone(),
            role: self.config.role.clone(),
        });
        Ok(())
    }

    /// Overwrite the connection configuration file.
    pub fn persist_configuration(&self) -> Result<PathBuf, ProvisionError> {
        let path = self.config.env_file.clone();
        self.config
            .connection()
            .write(&path)
            .map_err(|source| ProvisionError::ConfigWrite {
                path: path.clone(),
                source,
            })?;

        self.events.send(ProvisionEvent::ConfigWritten {
            path: path.display().to_string(),
        });
        Ok(path)
    }
}
