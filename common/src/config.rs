//! Environment variable parsing helpers
//!
//! Provides ergonomic helpers for reading configuration from environment variables.

use anyhow::{anyhow, Result};
use std::env;
use std::str::FromStr;

/// Extension trait for parsing environment variables.
///
/// Provides convenient methods for reading env vars with defaults, required values,
/// and type parsing.
pub trait ConfigExt {
    /// Get an environment variable with a default value.
    ///
    /// # Example
    /// ```ignore
    /// let admin = String::env_or("PG_ADMIN_USER", "postgres");
    /// ```
    fn env_or(name: &str, default: &str) -> String {
        env::var(name).unwrap_or_else(|_| default.to_string())
    }

    /// Get an environment variable as a boolean.
    ///
    /// Returns `true` for "true", "1" or "yes" (case-insensitive), `false` for
    /// any other value, and `default` when unset.
    fn env_bool(name: &str, default: bool) -> bool {
        env::var(name)
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(default)
    }

    /// Get an environment variable parsed as a specific type, rejecting bad values.
    ///
    /// A value that is set but does not parse is an error rather than a
    /// silent fallback. Returns `Ok(None)` when unset.
    ///
    /// # Example
    /// ```ignore
    /// let port: Option<u16> = u16::env_try_parse("FS_DB_PORT")?;
    /// ```
    fn env_try_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
        match env::var(name) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| anyhow!("{} has invalid value {:?}", name, raw)),
            Err(_) => Ok(None),
        }
    }

    /// Get a comma-separated environment variable as a list.
    ///
    /// Empty entries are dropped. Returns `default` when unset.
    fn env_list(name: &str, default: &[&str]) -> Vec<String> {
        match env::var(name) {
            Ok(raw) => split_list(&raw),
            Err(_) => default.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// Blanket implementation for all types
impl<T> ConfigExt for T {}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(
            split_list(" postgres, ,pg_ctl ,"),
            vec!["postgres".to_string(), "pg_ctl".to_string()]
        );
    }

    #[test]
    fn env_try_parse_rejects_garbage() {
        env::set_var("COMMON_TEST_PORT_BAD", "54x2");
        assert!(u16::env_try_parse::<u16>("COMMON_TEST_PORT_BAD").is_err());
        env::set_var("COMMON_TEST_PORT_GOOD", " 5433 ");
        assert_eq!(u16::env_try_parse("COMMON_TEST_PORT_GOOD").unwrap(), Some(5433));
        assert_eq!(u16::env_try_parse::<u16>("COMMON_TEST_PORT_UNSET").unwrap(), None);
    }

    #[test]
    fn env_bool_accepts_common_spellings() {
        env::set_var("COMMON_TEST_BOOL", "YES");
        assert!(bool::env_bool("COMMON_TEST_BOOL", false));
        env::set_var("COMMON_TEST_BOOL_OFF", "0");
        assert!(!bool::env_bool("COMMON_TEST_BOOL_OFF", true));
        assert!(bool::env_bool("COMMON_TEST_BOOL_UNSET", true));
    }

    #[test]
    fn env_list_uses_default_when_unset() {
        assert_eq!(
            String::env_list("COMMON_TEST_LIST_UNSET", &["a", "b"]),
            vec!["a".to_string(), "b".to_string()]
        );
    }
}
