//! Executor Module
//!
//! Provides the `MigrationExecutor` trait: the database handle the migration engine
//! talks to: ledger rows in and out, raw scripts, and the transaction that wraps
//! a script together with its ledger row.
//!
//! `MayPostgresExecutor` is the production implementation over `may_postgres`.

use crate::migration::record::{LedgerEntry, NewLedgerEntry};
use crate::migration::state_table;
use chrono::NaiveDateTime;
use may_postgres::error::SqlState;
use may_postgres::types::ToSql;
use may_postgres::{Client, Error as PostgresError};
use std::fmt;

/// Database error type
#[derive(Debug)]
pub enum DbError {
    /// `PostgreSQL` error from `may_postgres`
    PostgresError(PostgresError),
    /// A unique or primary-key constraint rejected an insert
    UniqueViolation(String),
    /// Query execution error
    QueryError(String),
    /// Other execution errors
    Other(String),
}

impl DbError {
    /// Whether this error was raised by a unique/primary-key constraint
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DbError::UniqueViolation(_))
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::PostgresError(e) => {
                write!(f, "PostgreSQL error: {e}")
            }
            DbError::UniqueViolation(s) => {
                write!(f, "Unique constraint violation: {s}")
            }
            DbError::QueryError(s) => {
                write!(f, "Query error: {s}")
            }
            DbError::Other(s) => {
                write!(f, "Execution error: {s}")
            }
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DbError::PostgresError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PostgresError> for DbError {
    fn from(err: PostgresError) -> Self {
        if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
            DbError::UniqueViolation(err.to_string())
        } else {
            DbError::PostgresError(err)
        }
    }
}

/// Trait for the database operations the migration engine performs
///
/// Every method that names a `table` receives the ledger table name already
/// validated as a plain identifier (see [`crate::config::MigrateConfig::validate`]).
///
/// Implementations must report primary-key collisions on [`insert_entry`] as
/// [`DbError::UniqueViolation`]; the lock manager relies on it.
///
/// [`insert_entry`]: MigrationExecutor::insert_entry
pub trait MigrationExecutor {
    /// Create the ledger table if it does not exist yet
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the DDL cannot be executed.
    fn ensure_ledger(&self, table: &str) -> Result<(), DbError>;

    /// Read every row of the ledger table, the lock sentinel included
    ///
    /// No particular order is guaranteed.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the query fails or a row cannot be decoded.
    fn ledger_entries(&self, table: &str) -> Result<Vec<LedgerEntry>, DbError>;

    /// Insert one ledger row
    ///
    /// When `entry.id` is `None` the database assigns the id.
    ///
    /// # Errors
    ///
    /// Returns `DbError::UniqueViolation` if the id is already taken,
    /// or another `DbError` if the insert fails.
    fn insert_entry(&self, table: &str, entry: &NewLedgerEntry<'_>) -> Result<(), DbError>;

    /// Delete the ledger row with the given id and return the number of rows removed
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the statement fails.
    fn delete_entry(&self, table: &str, id: i64) -> Result<u64, DbError>;

    /// Execute a raw script that may contain several statements
    ///
    /// # Errors
    ///
    /// Returns `DbError` from the first failing statement.
    fn batch_execute(&self, script: &str) -> Result<(), DbError>;

    /// Start a transaction
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the transaction cannot be started.
    fn begin(&self) -> Result<(), DbError>;

    /// Commit the current transaction
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the commit fails.
    fn commit(&self) -> Result<(), DbError>;

    /// Roll back the current transaction
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the rollback fails.
    fn rollback(&self) -> Result<(), DbError>;
}

/// Implementation of `MigrationExecutor` for `may_postgres::Client`
///
/// The connection is closed when the executor is dropped.
pub struct MayPostgresExecutor {
    client: Client,
}

impl MayPostgresExecutor {
    /// Create a new executor from a `may_postgres::Client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl MigrationExecutor for MayPostgresExecutor {
    fn ensure_ledger(&self, table: &str) -> Result<(), DbError> {
        let sql = state_table::create_ledger_table(table);
        self.client.batch_execute(sql.as_str())?;
        Ok(())
    }

    fn ledger_entries(&self, table: &str) -> Result<Vec<LedgerEntry>, DbError> {
        let sql = state_table::select_entries_sql(table);
        let rows = self.client.query(sql.as_str(), &[])?;

        rows.iter()
            .map(|row| {
                let date: NaiveDateTime = row.try_get(2)?;
                let executed_at: NaiveDateTime = row.try_get(4)?;
                Ok(LedgerEntry {
                    id: row.try_get(0)?,
                    name: row.try_get(1)?,
                    date: date.and_utc(),
                    checksum: row.try_get(3)?,
                    executed_at: executed_at.and_utc(),
                })
            })
            .collect::<Result<Vec<_>, PostgresError>>()
            .map_err(|e| DbError::QueryError(format!("failed to decode ledger row: {e}")))
    }

    fn insert_entry(&self, table: &str, entry: &NewLedgerEntry<'_>) -> Result<(), DbError> {
        // TIMESTAMP columns hold UTC wall-clock values
        let date = entry.date.naive_utc();

        match entry.id {
            Some(id) => {
                let sql = state_table::insert_entry_with_id_sql(table);
                let params: [&dyn ToSql; 4] = [&id, &entry.name, &date, &entry.checksum];
                self.client.execute(sql.as_str(), &params)?;
            }
            None => {
                let sql = state_table::insert_entry_sql(table);
                let params: [&dyn ToSql; 3] = [&entry.name, &date, &entry.checksum];
                self.client.execute(sql.as_str(), &params)?;
            }
        }

        Ok(())
    }

    fn delete_entry(&self, table: &str, id: i64) -> Result<u64, DbError> {
        let sql = state_table::delete_entry_sql(table);
        let deleted = self.client.execute(sql.as_str(), &[&id])?;
        Ok(deleted)
    }

    fn batch_execute(&self, script: &str) -> Result<(), DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("batch_execute", bytes = script.len()).entered();

        self.client.batch_execute(script)?;
        Ok(())
    }

    fn begin(&self) -> Result<(), DbError> {
        self.client.batch_execute("BEGIN")?;
        Ok(())
    }

    fn commit(&self) -> Result<(), DbError> {
        self.client.batch_execute("COMMIT")?;
        Ok(())
    }

    fn rollback(&self) -> Result<(), DbError> {
        self.client.batch_execute("ROLLBACK")?;
        Ok(())
    }
}
