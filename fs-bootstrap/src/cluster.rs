//! Access to the local PostgreSQL server
//!
//! `PgCluster` is the seam between the provisioning sequence and the
//! machine: the real implementation shells out to psql and friends, tests
//! substitute an in-memory server.

use crate::config::ProvisionConfig;
use crate::sql;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use common::{is_installed, run, run_checked, run_with_input, CommandOutput};
use nix::unistd::{geteuid, User};
use tracing::{debug, info, warn};

/// Outcome of an idempotent create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Another creator won the race between the catalog check and CREATE
    AlreadyExists,
}

/// Operations the provisioner needs from a PostgreSQL installation.
#[async_trait]
pub trait PgCluster: Send + Sync {
    /// Whether the client tool is on the search path.
    async fn client_installed(&self) -> bool;

    /// Whether any server binary is on the search path.
    async fn server_installed(&self) -> bool;

    /// Whether the server accepts connections right now.
    async fn is_ready(&self) -> bool;

    /// Issue the start command. Does not wait for readiness.
    async fn start_server(&self) -> Result<()>;

    async fn database_exists(&self, database: &str) -> Result<bool>;

    async fn create_database(&self, database: &str) -> Result<CreateOutcome>;

    async fn role_exists(&self, role: &str) -> Result<bool>;

    async fn create_role(&self, role: &str, password: &str) -> Result<CreateOutcome>;

    async fn grant_all(&self, database: &str, role: &str) -> Result<()>;
}

/// How psql reaches the server as the administrative role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminAccess {
    pub user: String,
    /// Run psql through `sudo -u <user>` for peer authentication
    pub sudo: bool,
}

impl AdminAccess {
    /// Decide on sudo from the effective Unix user unless forced.
    pub fn resolve(user: &str, forced: Option<bool>) -> Self {
        let sudo = forced.unwrap_or_else(|| needs_sudo(user));
        Self {
            user: user.to_string(),
            sudo,
        }
    }

    /// Program and leading arguments for running `bin` as the admin role.
    pub fn command_for<'a>(&'a self, bin: &'a str) -> (&'a str, Vec<&'a str>) {
        if self.sudo {
            ("sudo", vec!["-u", self.user.as_str(), bin])
        } else {
            (bin, Vec::new())
        }
    }
}

fn needs_sudo(admin_user: &str) -> bool {
    match User::from_uid(geteuid()) {
        Ok(Some(user)) => user.name != admin_user,
        Ok(None) => true,
        Err(e) => {
            warn!(error = %e, "Could not resolve effective user, assuming sudo is needed");
            true
        }
    }
}

/// `PgCluster` backed by the PostgreSQL command-line tools.
pub struct PsqlCluster {
    admin: AdminAccess,
    client_bin: String,
    server_binaries: Vec<String>,
    start_command: Vec<String>,
    port: String,
}

impl PsqlCluster {
    pub fn new(config: &ProvisionConfig) -> Self {
        let admin = AdminAccess::resolve(&config.admin_user, config.use_sudo);
        debug!(admin = %admin.user, sudo = admin.sudo, "Admin access resolved");

        Self {
            admin,
            client_bin: config.client_bin.clone(),
            server_binaries: config.server_binaries.clone(),
            start_command: config.start_command.clone(),
            port: config.port.to_string(),
        }
    }

    /// Arguments for an admin psql session reading SQL from stdin.
    ///
    /// Connects over the local socket so peer authentication applies.
    /// Verbose errors carry the SQLSTATE used to spot duplicate objects.
    fn psql_args(&self) -> Vec<&str> {
        vec![
            "-X",
            "-q",
            "-t",
            "-A",
            "-v",
            "ON_ERROR_STOP=1",
            "-v",
            "VERBOSITY=verbose",
            "-p",
            self.port.as_str(),
            "-U",
            self.admin.user.as_str(),
            "-d",
            "postgres",
        ]
    }

    /// Arguments for `pg_isready`, probing the same local socket psql uses.
    fn ready_args(&self) -> Vec<&str> {
        vec!["-q", "-p", self.port.as_str()]
    }

    /// Pipe `script` to an admin psql session.
    async fn psql(&self, script: &str) -> Result<CommandOutput> {
        let (program, mut args) = self.admin.command_for(&self.client_bin);
        args.extend(self.psql_args());
        run_with_input(program, &args, script, &[]).await
    }

    async fn psql_checked(&self, script: &str) -> Result<String> {
        let output = self.psql(script).await?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(anyhow!(output.failure_message(&self.client_bin)))
        }
    }

    async fn create(&self, script: &str, what: &str) -> Result<CreateOutcome> {
        let output = self.psql(script).await?;
        if output.success {
            Ok(CreateOutcome::Created)
        } else if sql::is_duplicate_object(&output.stderr) {
            info!(object = what, "Created concurrently by another session");
            Ok(CreateOutcome::AlreadyExists)
        } else {
            Err(anyhow!(output.failure_message(&self.client_bin)))
        }
    }
}

#[async_trait]
impl PgCluster for PsqlCluster {
    async fn client_installed(&self) -> bool {
        is_installed(&self.client_bin).await
    }

    async fn server_installed(&self) -> bool {
        for bin in &self.server_binaries {
            if is_installed(bin).await {
                debug!(bin = %bin, "Found server binary");
                return true;
            }
        }
        false
    }

    async fn is_ready(&self) -> bool {
        match run("pg_isready", &self.ready_args()).await {
            Ok(output) => output.success,
            Err(e) => {
                debug!(error = %e, "pg_isready could not run");
                false
            }
        }
    }

    async fn start_server(&self) -> Result<()> {
        let Some((program, args)) = self.start_command.split_first() else {
            bail!("Server start command is empty");
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        run_checked(program, &args).await?;
        Ok(())
    }

    async fn database_exists(&self, database: &str) -> Result<bool> {
        let stdout = self.psql_checked(&sql::database_exists(database)).await?;
        Ok(sql::probe_matched(&stdout))
    }

    async fn create_database(&self, database: &str) -> Result<CreateOutcome> {
        self.create(&sql::create_database(database), database).await
    }

    async fn role_exists(&self, role: &str) -> Result<bool> {
        let stdout = self.psql_checked(&sql::role_exists(role)).await?;
        Ok(sql::probe_matched(&stdout))
    }

    async fn create_role(&self, role: &str, password: &str) -> Result<CreateOutcome> {
        self.create(&sql::create_role(role, password), role).await
    }

    async fn grant_all(&self, database: &str, role: &str) -> Result<()> {
        self.psql_checked(&sql::grant_all(database, role)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn sudo_wraps_admin_commands() {
        let access = AdminAccess {
            user: "postgres".to_string(),
            sudo: true,
        };
        assert_eq!(
            access.command_for("psql"),
            ("sudo", vec!["-u", "postgres", "psql"])
        );

        let direct = AdminAccess::resolve("postgres", Some(false));
        assert_eq!(direct.command_for("psql"), ("psql", Vec::<&str>::new()));
    }

    #[test]
    fn psql_session_connects_locally_as_admin() {
        let mut config = ProvisionConfig::default();
        config.use_sudo = Some(false);
        config.port = 5433;
        let cluster = PsqlCluster::new(&config);

        let args = cluster.psql_args();
        assert!(!args.contains(&"-h"));
        assert!(args.windows(2).any(|w| w == ["-p", "5433"]));
        assert!(args.windows(2).any(|w| w == ["-U", "postgres"]));
        assert!(args.windows(2).any(|w| w == ["-v", "ON_ERROR_STOP=1"]));
        assert!(args.windows(2).any(|w| w == ["-v", "VERBOSITY=verbose"]));
    }

    #[test]
    fn readiness_checks_the_local_socket() {
        let mut config = ProvisionConfig::default();
        config.use_sudo = Some(false);
        config.host = "db.internal".to_string();
        config.port = 5433;
        let cluster = PsqlCluster::new(&config);

        let args = cluster.ready_args();
        assert!(!args.contains(&"-h"));
        assert!(!args.contains(&"db.internal"));
        assert!(args.windows(2).any(|w| w == ["-p", "5433"]));
    }

    /// Cluster whose client is a shell script standing in for psql.
    fn scripted_cluster(dir: &TempDir, body: &str) -> PsqlCluster {
        let path = dir.path().join("fake-psql");
        fs::write(&path, format!("#!/bin/sh\ncat >/dev/null\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = ProvisionConfig::default();
        config.use_sudo = Some(false);
        config.client_bin = path.to_string_lossy().into_owned();
        PsqlCluster::new(&config)
    }

    #[tokio::test]
    async fn duplicate_database_error_counts_as_existing() {
        let dir = TempDir::new().unwrap();
        let cluster = scripted_cluster(
            &dir,
            "echo 'psql:<stdin>:1: ERROR:  42P04: database \"france_services_db\" already exists' >&2\nexit 1",
        );
        let outcome = cluster.create_database("france_services_db").await.unwrap();
        assert_eq!(outcome, CreateOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn duplicate_role_error_counts_as_existing() {
        let dir = TempDir::new().unwrap();
        let cluster = scripted_cluster(
            &dir,
            "echo 'ERROR:  42710: role \"fs_user\" already exists' >&2\nexit 1",
        );
        let outcome = cluster.create_role("fs_user", "fs_password").await.unwrap();
        assert_eq!(outcome, CreateOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn permission_denied_on_create_is_an_error() {
        let dir = TempDir::new().unwrap();
        let cluster = scripted_cluster(
            &dir,
            "echo 'ERROR:  42501: permission denied to create database' >&2\nexit 1",
        );
        let err = cluster.create_database("france_services_db").await.unwrap_err();
        assert!(err.to_string().contains("42501"));
        assert!(cluster.create_role("fs_user", "fs_password").await.is_err());
    }

    #[tokio::test]
    async fn successful_create_reports_created() {
        let dir = TempDir::new().unwrap();
        let cluster = scripted_cluster(&dir, "exit 0");
        assert_eq!(
            cluster.create_database("france_services_db").await.unwrap(),
            CreateOutcome::Created
        );
        cluster.grant_all("france_services_db", "fs_user").await.unwrap();
    }

    #[tokio::test]
    async fn catalog_lookup_reads_psql_output() {
        let dir = TempDir::new().unwrap();
        let found = scripted_cluster(&dir, "echo 1");
        assert!(found.database_exists("france_services_db").await.unwrap());
        assert!(found.role_exists("fs_user").await.unwrap());

        let other = TempDir::new().unwrap();
        let absent = scripted_cluster(&other, "exit 0");
        assert!(!absent.database_exists("france_services_db").await.unwrap());
    }

    #[tokio::test]
    async fn failed_catalog_lookup_is_an_error() {
        let dir = TempDir::new().unwrap();
        let cluster = scripted_cluster(
            &dir,
            "echo 'FATAL:  role \"postgres\" does not exist' >&2\nexit 2",
        );
        let err = cluster.database_exists("france_services_db").await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn missing_start_program_is_an_error() {
        let mut config = ProvisionConfig::default();
        config.use_sudo = Some(false);
        config.start_command = vec!["no-such-start-program-7c2e".to_string()];
        let cluster = PsqlCluster::new(&config);
        assert!(cluster.start_server().await.is_err());
    }

    #[tokio::test]
    async fn failing_start_command_is_an_error() {
        let mut config = ProvisionConfig::default();
        config.use_sudo = Some(false);
        config.start_command = vec!["false".to_string()];
        let cluster = PsqlCluster::new(&config);
        let err = cluster.start_server().await.unwrap_err();
        assert!(err.to_string().contains("false failed (exit 1)"));
    }
}
