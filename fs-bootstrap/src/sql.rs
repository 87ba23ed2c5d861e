//! SQL statements and psql error classification
//!
//! Statements are built here with PostgreSQL quoting rules and piped to psql
//! on stdin, so names and passwords never pass through a shell.

use crate::error::ProvisionError;

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// SQLSTATE for `CREATE DATABASE` on an existing database.
pub const DUPLICATE_DATABASE: &str = "42P04";

/// SQLSTATE for `CREATE ROLE` on an existing role.
pub const DUPLICATE_OBJECT: &str = "42710";

/// Quote an identifier the way `quote_ident` does, always adding quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal the way `quote_literal` does.
///
/// Backslashes switch the literal to the `E''` form so the result is correct
/// whatever `standard_conforming_strings` is set to.
pub fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    if escaped.contains('\\') {
        format!("E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{}'", escaped)
    }
}

/// Reject names PostgreSQL would silently truncate or cannot store.
pub fn validate_identifier(kind: &str, name: &str) -> Result<(), ProvisionError> {
    if name.is_empty() {
        return Err(ProvisionError::InvalidConfig(format!("{} name is empty", kind)));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(ProvisionError::InvalidConfig(format!(
            "{} name {:?} is longer than {} bytes",
            kind, name, MAX_IDENTIFIER_LEN
        )));
    }
    if name.contains('\0') {
        return Err(ProvisionError::InvalidConfig(format!(
            "{} name contains a NUL byte",
            kind
        )));
    }
    Ok(())
}

pub fn database_exists(database: &str) -> String {
    format!(
        "SELECT 1 FROM pg_database WHERE datname = {};",
        quote_literal(database)
    )
}

pub fn create_database(database: &str) -> String {
    format!("CREATE DATABASE {};", quote_ident(database))
}

pub fn role_exists(role: &str) -> String {
    format!(
        "SELECT 1 FROM pg_roles WHERE rolname = {};",
        quote_literal(role)
    )
}

pub fn create_role(role: &str, password: &str) -> String {
    format!(
        "SET password_encryption = 'scram-sha-256';\nCREATE ROLE {} WITH LOGIN PASSWORD {};",
        quote_ident(role),
        quote_literal(password)
    )
}

pub fn grant_all(database: &str, role: &str) -> String {
    format!(
        "GRANT ALL PRIVILEGES ON DATABASE {} TO {};",
        quote_ident(database),
        quote_ident(role)
    )
}

/// Whether a catalog probe printed a row.
///
/// Probes run with tuples-only unaligned output, so a hit is a line `1`.
pub fn probe_matched(stdout: &str) -> bool {
    stdout.lines().any(|line| line.trim() == "1")
}

/// Extract the SQLSTATE from psql stderr.
///
/// Requires `VERBOSITY=verbose`, which prints errors as
/// `ERROR:  42P04: database "x" already exists`, possibly prefixed with the
/// script location (`psql:<stdin>:2: `).
pub fn sqlstate(stderr: &str) -> Option<&str> {
    stderr.lines().find_map(|line| {
        let start = line.find("ERROR:")? + "ERROR:".len();
        let rest = line[start..].trim_start();
        let (code, _) = rest.split_once(':')?;
        let is_code = code.len() == 5 && code.chars().all(|c| c.is_ascii_alphanumeric());
        is_code.then_some(code)
    })
}

/// Whether a failed CREATE lost a race against another creator.
pub fn is_duplicate_object(stderr: &str) -> bool {
    match sqlstate(stderr) {
        Some(code) => code == DUPLICATE_DATABASE || code == DUPLICATE_OBJECT,
        None => stderr.contains("already exists"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_identifiers_and_literals() {
        assert_eq!(quote_ident("france_services_db"), "\"france_services_db\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("fs_password"), "'fs_password'");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal(r"a\b'c"), r"E'a\\b''c'");
    }

    #[test]
    fn builds_provisioning_statements() {
        assert_eq!(
            database_exists("france_services_db"),
            "SELECT 1 FROM pg_database WHERE datname = 'france_services_db';"
        );
        assert_eq!(
            create_database("france_services_db"),
            "CREATE DATABASE \"france_services_db\";"
        );
        assert_eq!(
            role_exists("fs_user"),
            "SELECT 1 FROM pg_roles WHERE rolname = 'fs_user';"
        );
        assert!(create_role("fs_user", "fs_password")
            .ends_with("CREATE ROLE \"fs_user\" WITH LOGIN PASSWORD 'fs_password';"));
        assert_eq!(
            grant_all("france_services_db", "fs_user"),
            "GRANT ALL PRIVILEGES ON DATABASE \"france_services_db\" TO \"fs_user\";"
        );
    }

    #[test]
    fn validates_identifiers() {
        assert!(validate_identifier("database", "france_services_db").is_ok());
        assert!(validate_identifier("database", "").is_err());
        assert!(validate_identifier("role", &"r".repeat(64)).is_err());
        assert!(validate_identifier("role", &"r".repeat(63)).is_ok());
    }

    #[test]
    fn probe_output() {
        assert!(probe_matched("1\n"));
        assert!(!probe_matched(""));
        assert!(!probe_matched("10"));
    }

    #[test]
    fn classifies_duplicate_errors() {
        let db = "ERROR:  42P04: database \"france_services_db\" already exists\nLOCATION:  createdb, dbcommands.c:700";
        assert_eq!(sqlstate(db), Some("42P04"));
        assert!(is_duplicate_object(db));

        let role = "psql:<stdin>:2: ERROR:  42710: role \"fs_user\" already exists";
        assert_eq!(sqlstate(role), Some("42710"));
        assert!(is_duplicate_object(role));

        let denied = "ERROR:  42501: permission denied to create database";
        assert_eq!(sqlstate(denied), Some("42501"));
        assert!(!is_duplicate_object(denied));

        // Terse verbosity has no code; fall back to the message.
        assert!(is_duplicate_object("ERROR:  role \"fs_user\" already exists"));
    }
}
