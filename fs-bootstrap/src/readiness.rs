//! Bounded wait for the server to accept connections

use crate::cluster::PgCluster;
use crate::error::ProvisionError;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// Poll `is_ready` every `interval` until it succeeds or `timeout` elapses.
///
/// Returns how long the wait took. The first probe happens immediately; the
/// last one happens no later than `timeout` after the start.
pub async fn wait_until_ready<C: PgCluster + ?Sized>(
    cluster: &C,
    timeout: Duration,
    interval: Duration,
) -> Result<Duration, ProvisionError> {
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if cluster.is_ready().await {
            let waited = start.elapsed();
            info!(attempts, waited_ms = waited.as_millis() as u64, "PostgreSQL is ready");
            return Ok(waited);
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            warn!(attempts, ?timeout, "PostgreSQL never became ready");
            return Err(ProvisionError::StartupTimeout { waited: elapsed });
        }

        if attempts % 10 == 0 {
            info!(attempts, elapsed = ?elapsed, timeout = ?timeout, "Still waiting for PostgreSQL");
        }

        sleep(interval.min(timeout - elapsed)).await;
    }
}
