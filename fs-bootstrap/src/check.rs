//! Connection check for the written configuration
//!
//! Connects over TCP exactly as the application would, with the
//! application's role and password.

use crate::connection::ConnectionConfig;
use anyhow::{anyhow, bail, Result};
use common::run_with_input;
use tracing::debug;

const PROBE_SQL: &str = "SELECT version(), current_user, current_database();\n";

/// What the server reported back to the probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub version: String,
    pub user: String,
    pub database: String,
}

/// Run the probe query through `client_bin` with the given connection.
///
/// The password travels in the child's `PGPASSWORD`, never on argv.
pub async fn probe(client_bin: &str, connection: &ConnectionConfig) -> Result<ServerInfo> {
    let port = connection.port.to_string();
    let args = [
        "-X",
        "-q",
        "-t",
        "-A",
        "-F",
        "|",
        "-v",
        "ON_ERROR_STOP=1",
        "-w",
        "-h",
        connection.host.as_str(),
        "-p",
        port.as_str(),
        "-U",
        connection.user.as_str(),
        "-d",
        connection.database.as_str(),
    ];
    debug!(host = %connection.host, port = %port, user = %connection.user, "Probing database");

    let output = run_with_input(
        client_bin,
        &args,
        PROBE_SQL,
        &[("PGPASSWORD", connection.password.as_str())],
    )
    .await?;

    if !output.success {
        return Err(anyhow!(output.failure_message(client_bin)));
    }
    parse_probe(&output.stdout)
}

/// Parse the `version|user|database` row printed by the probe.
pub fn parse_probe(stdout: &str) -> Result<ServerInfo> {
    let Some(line) = stdout.lines().find(|l| !l.trim().is_empty()) else {
        bail!("Probe returned no rows");
    };

    // version() may itself contain '|' in theory; user and database come last.
    let mut parts = line.rsplitn(3, '|');
    let database = parts.next();
    let user = parts.next();
    let version = parts.next();

    match (version, user, database) {
        (Some(version), Some(user), Some(database)) => Ok(ServerInfo {
            version: version.trim().to_string(),
            user: user.trim().to_string(),
            database: database.trim().to_string(),
        }),
        _ => bail!("Unexpected probe output: {:?}", line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_row() {
        let info = parse_probe(
            "PostgreSQL 16.2 (Ubuntu 16.2-1.pgdg22.04+1) on x86_64-pc-linux-gnu|fs_user|france_services_db\n",
        )
        .unwrap();
        assert!(info.version.starts_with("PostgreSQL 16.2"));
        assert_eq!(info.user, "fs_user");
        assert_eq!(info.database, "france_services_db");
    }

    #[test]
    fn rejects_empty_or_short_output() {
        assert!(parse_probe("").is_err());
        assert!(parse_probe("fs_user|france_services_db").is_err());
    }

    #[tokio::test]
    async fn probe_reports_client_failure() {
        assert!(probe("false", &ConnectionConfig::default()).await.is_err());
    }
}
