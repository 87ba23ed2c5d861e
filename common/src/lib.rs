//! Shared utilities for the France Services bootstrap tooling
//!
//! This crate provides functionality used by every binary in the workspace:
//! - Structured logging initialization
//! - Environment variable parsing helpers
//! - External command execution
//! - Provisioning events

pub mod command;
pub mod config;
pub mod events;
pub mod logging;

pub use command::{is_installed, run, run_checked, run_with_input, CommandOutput};
pub use config::ConfigExt;
pub use events::{EventLog, ProvisionEvent};
pub use logging::init_logging;
