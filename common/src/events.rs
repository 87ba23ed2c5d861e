//! Provisioning events
//!
//! Every notable step of a provisioning run is reported as a typed event,
//! logged with its type and JSON metadata so runs can be audited from logs.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// All events a provisioning run can emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ProvisionEvent {
    /// Run started
    ProvisionStarted { database: String, role: String },

    /// Server was not accepting connections and a start was issued
    ServerStartIssued { command: String },

    /// Server accepted connections
    ServerReady { waited_ms: u64 },

    DatabaseCreated { database: String },

    DatabaseExists { database: String },

    RoleCreated { role: String },

    RoleExists { role: String },

    PrivilegesGranted { database: String, role: String },

    /// Connection configuration file was (over)written
    ConfigWritten { path: String },

    /// Run completed successfully
    ProvisionCompleted { duration_ms: u64 },

    /// Run aborted
    ProvisionFailed { phase: String, error: String },
}

impl ProvisionEvent {
    /// Get the event type name for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ProvisionStarted { .. } => "PROVISION_STARTED",
            Self::ServerStartIssued { .. } => "PROVISION_SERVER_START_ISSUED",
            Self::ServerReady { .. } => "PROVISION_SERVER_READY",
            Self::DatabaseCreated { .. } => "PROVISION_DATABASE_CREATED",
            Self::DatabaseExists { .. } => "PROVISION_DATABASE_EXISTS",
            Self::RoleCreated { .. } => "PROVISION_ROLE_CREATED",
            Self::RoleExists { .. } => "PROVISION_ROLE_EXISTS",
            Self::PrivilegesGranted { .. } => "PROVISION_PRIVILEGES_GRANTED",
            Self::ConfigWritten { .. } => "PROVISION_CONFIG_WRITTEN",
            Self::ProvisionCompleted { .. } => "PROVISION_COMPLETED",
            Self::ProvisionFailed { .. } => "PROVISION_FAILED",
        }
    }

    /// Convert event to a human-readable message.
    pub fn message(&self) -> String {
        match self {
            Self::ProvisionStarted { database, role } => {
                format!("Provisioning database {} for role {}", database, role)
            }
            Self::ServerStartIssued { command } => {
                format!("PostgreSQL not running, started with `{}`", command)
            }
            Self::ServerReady { waited_ms } => {
                format!("PostgreSQL accepting connections (waited {}ms)", waited_ms)
            }
            Self::DatabaseCreated { database } => format!("Database {} created", database),
            Self::DatabaseExists { database } => format!("Database {} already exists", database),
            Self::RoleCreated { role } => format!("Role {} created", role),
            Self::RoleExists { role } => format!("Role {} already exists", role),
            Self::PrivilegesGranted { database, role } => {
                format!("Granted all privileges on {} to {}", database, role)
            }
            Self::ConfigWritten { path } => format!("Connection configuration written to {}", path),
            Self::ProvisionCompleted { duration_ms } => {
                format!("Provisioning completed in {}ms", duration_ms)
            }
            Self::ProvisionFailed { phase, error } => {
                format!("Provisioning failed during {}: {}", phase, error)
            }
        }
    }

    fn is_failure(&self) -> bool {
        matches!(self, Self::ProvisionFailed { .. })
    }
}

/// Sink for provisioning events.
///
/// Events are always logged; a recording log additionally keeps them in
/// memory so callers (and tests) can inspect what a run did.
#[derive(Clone, Default)]
pub struct EventLog {
    recorded: Option<Arc<Mutex<Vec<ProvisionEvent>>>>,
}

impl EventLog {
    /// Log-only sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that also keeps every event in memory.
    pub fn recording() -> Self {
        Self {
            recorded: Some(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    /// Record an event.
    pub fn send(&self, event: ProvisionEvent) {
        let event_type = event.event_type();
        let metadata = serde_json::to_string(&event).unwrap_or_default();

        if event.is_failure() {
            error!(event = %event_type, metadata = %metadata, "{}", event.message());
        } else {
            info!(event = %event_type, metadata = %metadata, "{}", event.message());
        }

        if let Some(recorded) = &self.recorded {
            if let Ok(mut events) = recorded.lock() {
                events.push(event);
            }
        }
    }

    /// Events recorded so far (empty for a log-only sink).
    pub fn events(&self) -> Vec<ProvisionEvent> {
        self.recorded
            .as_ref()
            .and_then(|r| r.lock().ok().map(|events| events.clone()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_metadata_is_tagged() {
        let event = ProvisionEvent::RoleCreated {
            role: "fs_user".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "RoleCreated");
        assert_eq!(json["role"], "fs_user");
        assert_eq!(event.event_type(), "PROVISION_ROLE_CREATED");
    }

    #[test]
    fn failure_message_names_phase() {
        let event = ProvisionEvent::ProvisionFailed {
            phase: "ensure_database".to_string(),
            error: "permission denied".to_string(),
        };
        assert_eq!(
            event.message(),
            "Provisioning failed during ensure_database: permission denied"
        );
    }

    #[test]
    fn recording_log_keeps_events_in_order() {
        let log = EventLog::recording();
        let clone = log.clone();
        log.send(ProvisionEvent::ServerReady { waited_ms: 0 });
        clone.send(ProvisionEvent::ProvisionCompleted { duration_ms: 5 });
        assert_eq!(
            log.events(),
            vec![
                ProvisionEvent::ServerReady { waited_ms: 0 },
                ProvisionEvent::ProvisionCompleted { duration_ms: 5 },
            ]
        );
        assert!(EventLog::new().events().is_empty());
    }
}
