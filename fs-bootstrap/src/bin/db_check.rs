//! Connection check for the provisioned database
//!
//! Loads the connection file (environment variables take precedence) and
//! connects with the application's credentials. Exits 1 if that fails.

use anyhow::Result;
use common::{init_logging, ConfigExt};
use fs_bootstrap::check::probe;
use fs_bootstrap::config::DEFAULT_ENV_FILE;
use fs_bootstrap::ConnectionConfig;
use std::path::PathBuf;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logging("db-check");

    let env_file = PathBuf::from(String::env_or("PROVISION_ENV_FILE", DEFAULT_ENV_FILE));
    let client_bin = String::env_or("PG_CLIENT_BIN", "psql");

    let connection = match ConnectionConfig::load(&env_file) {
        Ok(c) => c,
        Err(e) => {
            error!(file = %env_file.display(), "{:#}", e);
            std::process::exit(1);
        }
    };

    let target = connection
        .redacted_url()
        .unwrap_or_else(|_| format!("{}:{}", connection.host, connection.port));
    info!(target = %target, "Checking database connection");

    match probe(&client_bin, &connection).await {
        Ok(server) => {
            info!(
                user = %server.user,
                database = %server.database,
                version = %server.version,
                "Connection OK"
            );
            Ok(())
        }
        Err(e) => {
            error!(target = %target, "Connection failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
