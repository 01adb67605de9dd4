//! Migration-specific error types

use crate::connection::ConnectionError;
use crate::executor::DbError;
use std::path::PathBuf;

/// Migration-specific errors
///
/// Every variant stops the run. None of them is retried internally.
#[derive(Debug)]
pub enum MigrationError {
    /// The database could not be reached or refused the credentials
    Connection(ConnectionError),
    /// The lock sentinel is already present: another run holds the lock
    MigrationInProgress,
    /// A `.sql` file does not follow `<yyyymmddHHMMSS>-<label>.sql`
    InvalidFilename { name: String },
    /// The ledger references a script that is not in the migrations directory
    MigrationFileNotFound { name: String },
    /// Strict ordering only: ledger and files disagree at the same position
    MigrationNameMismatch { expected: String, found: String },
    /// An already-applied script was edited afterwards
    ChecksumMismatch {
        name: String,
        stored: String,
        current: String,
    },
    /// A pending script failed; it was not recorded
    ExecutionFailed { name: String, error: DbError },
    /// Ledger bootstrap, read, append or unlock failed
    Database(DbError),
    /// The migrations directory or a script could not be read or written
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The runner was given settings it cannot use
    InvalidConfig(String),
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationError::Connection(e) => write!(f, "Cannot connect to database: {}", e),
            MigrationError::MigrationInProgress => {
                write!(
                    f,
                    "Another migration is in progress.\n\
                     If no other process is running, a previous run may have crashed while holding \
                     the lock; delete the ledger row with id = 1 to release it."
                )
            }
            MigrationError::InvalidFilename { name } => {
                write!(
                    f,
                    "Migration file name '{}' does not match expected pattern: {{YYYYMMDDHHMMSS}}-{{label}}.sql",
                    name
                )
            }
            MigrationError::MigrationFileNotFound { name } => {
                write!(
                    f,
                    "Applied migration file not found: {}\n\
                     Suggestion: Ensure all migration files are present in migrations directory",
                    name
                )
            }
            MigrationError::MigrationNameMismatch { expected, found } => {
                write!(
                    f,
                    "Migration names do not match - {} vs {}\n\
                     A migration was added before already-applied ones; run with any-order to allow this.",
                    expected, found
                )
            }
            MigrationError::ChecksumMismatch {
                name,
                stored,
                current,
            } => {
                write!(
                    f,
                    "Migration '{}' has been modified after being applied.\n\
                     Stored checksum: {}\n\
                     Current checksum: {}",
                    name, stored, current
                )
            }
            MigrationError::ExecutionFailed { name, error } => {
                write!(f, "Migration '{}' failed during execution: {}", name, error)
            }
            MigrationError::Database(e) => write!(f, "Database error: {}", e),
            MigrationError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            MigrationError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MigrationError::Connection(e) => Some(e),
            MigrationError::ExecutionFailed { error, .. } => Some(error),
            MigrationError::Database(e) => Some(e),
            MigrationError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<DbError> for MigrationError {
    fn from(error: DbError) -> Self {
        MigrationError::Database(error)
    }
}

impl From<ConnectionError> for MigrationError {
    fn from(error: ConnectionError) -> Self {
        MigrationError::Connection(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_checksum_mismatch_names_the_file() {
        let err = MigrationError::ChecksumMismatch {
            name: "20240101000000-users.sql".to_string(),
            stored: "a".repeat(40),
            current: "b".repeat(40),
        };
        let msg = err.to_string();
        assert!(msg.contains("20240101000000-users.sql"));
        assert!(msg.contains(&"a".repeat(40)));
    }

    #[test]
    fn test_name_mismatch_reports_ledger_then_file() {
        let err = MigrationError::MigrationNameMismatch {
            expected: "C".to_string(),
            found: "B".to_string(),
        };
        assert!(err.to_string().starts_with("Migration names do not match - C vs B"));
    }

    #[test]
    fn test_execution_failed_keeps_cause() {
        let err = MigrationError::ExecutionFailed {
            name: "20240101000000-bad.sql".to_string(),
            error: DbError::QueryError("syntax error".to_string()),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("syntax error"));
    }

    #[test]
    fn test_db_error_conversion() {
        let err: MigrationError = DbError::Other("boom".to_string()).into();
        assert!(matches!(err, MigrationError::Database(_)));
    }
}
