//! Bootstrap provisioner for the France Services database
//!
//! Ensures a local PostgreSQL server is installed and running, that the
//! application database and login role exist with full privileges, and
//! writes the connection file the other application processes read.
//! Safe to run any number of times. Takes no arguments.

use anyhow::Result;
use common::{init_logging, EventLog};
use fs_bootstrap::{ProvisionConfig, Provisioner, PsqlCluster};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logging("provision-db");

    let config = match ProvisionConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(e.exit_code());
        }
    };

    info!(
        database = %config.database,
        role = %config.role,
        port = config.port,
        env_file = %config.env_file.display(),
        "=== Provisioning PostgreSQL ==="
    );

    let cluster = PsqlCluster::new(&config);
    let provisioner = Provisioner::new(cluster, config, EventLog::new());

    match provisioner.run().await {
        Ok(report) => {
            info!(
                server_started = report.server_started,
                database_created = report.database_created,
                role_created = report.role_created,
                config = %report.config_path.display(),
                "PostgreSQL is ready for the application"
            );
            Ok(())
        }
        Err(e) => {
            error!(phase = %e.phase(), "{}", e);
            std::process::exit(e.exit_code());
        }
    }
}
