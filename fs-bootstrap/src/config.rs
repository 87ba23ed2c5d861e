//! Provisioner configuration
//!
//! Built-in defaults, optionally overridden by a YAML file named in
//! `PROVISION_CONFIG`, then by individual environment variables.

use crate::connection::{
    check_value, ConnectionConfig, DATABASE_HOST, DATABASE_NAME, DATABASE_PASSWORD, DATABASE_USER,
};
use crate::error::ProvisionError;
use crate::sql::validate_identifier;
use common::config::split_list;
use common::ConfigExt;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DATABASE: &str = "france_services_db";
pub const DEFAULT_ROLE: &str = "fs_user";
pub const DEFAULT_PASSWORD: &str = "fs_password";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Partial YAML configuration - every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    postgres: ServerSection,
    #[serde(default)]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseSection {
    name: Option<String>,
    user: Option<String>,
    password: Option<String>,
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerSection {
    admin_user: Option<String>,
    use_sudo: Option<bool>,
    client_bin: Option<String>,
    client_install_hint: Option<String>,
    server_binaries: Option<Vec<String>>,
    install_hint: Option<String>,
    start_command: Option<String>,
    ready_timeout_secs: Option<u64>,
    ready_interval_ms: Option<u64>,
}

impl FileConfig {
    /// Read and parse a YAML configuration file
    pub fn read(path: &Path) -> Result<Self, ProvisionError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvisionError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| ProvisionError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}

/// Everything a provisioning run needs to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionConfig {
    pub database: String,
    pub role: String,
    pub password: String,
    /// Host written to the connection file
    pub host: String,
    pub port: u16,
    pub env_file: PathBuf,
    /// Administrative role psql connects as over the local socket
    pub admin_user: String,
    /// `None` means decide from the effective Unix user
    pub use_sudo: Option<bool>,
    pub client_bin: String,
    pub client_install_hint: String,
    /// Any one of these on the search path counts as an installed server
    pub server_binaries: Vec<String>,
    pub server_install_hint: String,
    pub start_command: Vec<String>,
    pub ready_timeout: Duration,
    pub ready_interval: Duration,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            role: DEFAULT_ROLE.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            env_file: PathBuf::from(DEFAULT_ENV_FILE),
            admin_user: "postgres".to_string(),
            use_sudo: None,
            client_bin: "psql".to_string(),
            client_install_hint: "sudo apt-get install -y postgresql-client".to_string(),
            server_binaries: vec![
                "postgres".to_string(),
                "pg_ctl".to_string(),
                "pg_ctlcluster".to_string(),
            ],
            server_install_hint: "sudo apt-get install -y postgresql postgresql-contrib"
                .to_string(),
            start_command: split_command("sudo service postgresql start"),
            ready_timeout: Duration::from_secs(30),
            ready_interval: Duration::from_millis(1000),
        }
    }
}

impl ProvisionConfig {
    /// Load configuration: defaults, then `PROVISION_CONFIG` file, then env.
    pub fn from_env() -> Result<Self, ProvisionError> {
        let mut config = Self::default();
        if let Ok(path) = env::var("PROVISION_CONFIG") {
            config.apply_file(FileConfig::read(Path::new(&path))?);
        }
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values present in a YAML file.
    pub fn apply_file(&mut self, file: FileConfig) {
        let db = file.database;
        let pg = file.postgres;

        overlay(&mut self.database, db.name);
        overlay(&mut self.role, db.user);
        overlay(&mut self.password, db.password);
        overlay(&mut self.host, db.host);
        overlay(&mut self.port, db.port);
        overlay(&mut self.env_file, file.env_file);
        overlay(&mut self.admin_user, pg.admin_user);
        if pg.use_sudo.is_some() {
            self.use_sudo = pg.use_sudo;
        }
        overlay(&mut self.client_bin, pg.client_bin);
        overlay(&mut self.client_install_hint, pg.client_install_hint);
        overlay(&mut self.server_binaries, pg.server_binaries);
        overlay(&mut self.server_install_hint, pg.install_hint);
        overlay(&mut self.start_command, pg.start_command.map(|c| split_command(&c)));
        overlay(
            &mut self.ready_timeout,
            pg.ready_timeout_secs.map(Duration::from_secs),
        );
        overlay(
            &mut self.ready_interval,
            pg.ready_interval_ms.map(Duration::from_millis),
        );
    }

    /// Overlay values set in the process environment.
    pub fn apply_env(&mut self) -> Result<(), ProvisionError> {
        self.database = String::env_or("FS_DB_NAME", &self.database);
        self.role = String::env_or("FS_DB_USER", &self.role);
        self.password = String::env_or("FS_DB_PASSWORD", &self.password);
        self.host = String::env_or("FS_DB_HOST", &self.host);
        if let Some(port) = strict::<u16>("FS_DB_PORT")? {
            self.port = port;
        }
        if let Ok(path) = env::var("PROVISION_ENV_FILE") {
            self.env_file = PathBuf::from(path);
        }
        self.admin_user = String::env_or("PG_ADMIN_USER", &self.admin_user);
        if env::var_os("PG_USE_SUDO").is_some() {
            self.use_sudo = Some(bool::env_bool("PG_USE_SUDO", false));
        }
        self.client_bin = String::env_or("PG_CLIENT_BIN", &self.client_bin);
        self.client_install_hint =
            String::env_or("PG_CLIENT_INSTALL_HINT", &self.client_install_hint);
        let current: Vec<&str> = self.server_binaries.iter().map(String::as_str).collect();
        self.server_binaries = String::env_list("PG_SERVER_BINARIES", &current);
        self.server_install_hint = String::env_or("PG_INSTALL_HINT", &self.server_install_hint);
        if let Ok(cmd) = env::var("PG_START_COMMAND") {
            self.start_command = split_command(&cmd);
        }
        if let Some(secs) = strict::<u64>("PG_READY_TIMEOUT")? {
            self.ready_timeout = Duration::from_secs(secs);
        }
        if let Some(millis) = strict::<u64>("PG_READY_INTERVAL")? {
            self.ready_interval = Duration::from_millis(millis);
        }
        Ok(())
    }

    /// Reject settings that would fail half-way through a run.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        validate_identifier("database", &self.database)?;
        validate_identifier("role", &self.role)?;
        validate_identifier("admin role", &self.admin_user)?;
        let written = [
            (DATABASE_HOST, &self.host),
            (DATABASE_NAME, &self.database),
            (DATABASE_USER, &self.role),
            (DATABASE_PASSWORD, &self.password),
        ];
        for (key, value) in written {
            check_value(key, value).map_err(|e| ProvisionError::InvalidConfig(e.to_string()))?;
        }
        if self.password.is_empty() {
            return Err(ProvisionError::InvalidConfig(
                "role password is empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ProvisionError::InvalidConfig("port must not be 0".to_string()));
        }
        if self.host.is_empty() {
            return Err(ProvisionError::InvalidConfig("host is empty".to_string()));
        }
        if self.server_binaries.is_empty() {
            return Err(ProvisionError::InvalidConfig(
                "no server binaries to look for".to_string(),
            ));
        }
        if self.start_command.is_empty() {
            return Err(ProvisionError::InvalidConfig(
                "server start command is empty".to_string(),
            ));
        }
        if self.ready_interval.is_zero() {
            return Err(ProvisionError::InvalidConfig(
                "readiness poll interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The connection parameters written for the application.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.host.clone(),
            database: self.database.clone(),
            user: self.role.clone(),
            password: self.password.clone(),
            port: self.port,
        }
    }
}

fn strict<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ProvisionError> {
    T::env_try_parse(name).map_err(|e| ProvisionError::InvalidConfig(e.to_string()))
}

fn overlay<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

/// Split a command line on whitespace. Quoting is not supported.
pub fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}
