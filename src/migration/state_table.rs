//! Migration ledger table management
//!
//! The ledger records every applied migration. Row `id = 1` is reserved for the
//! lock sentinel (see [`crate::migration::lock`]), so the identity column starts at 2.

use crate::executor::MigrationExecutor;
use crate::migration::file::MigrationFile;
use crate::migration::record::{LedgerEntry, NewLedgerEntry, SENTINEL_ID};
use crate::migration::MigrationError;
use sea_query::{Alias, ColumnDef, Expr, PostgresQueryBuilder, Table};

/// Build the `CREATE TABLE IF NOT EXISTS` statement for the ledger table
///
/// Columns:
/// - `id` (identity starting at 2, primary key)
/// - `name` (script file name)
/// - `date` (timestamp parsed from the file name)
/// - `sha1sum` (SHA-1 checksum of the script)
/// - `executed_at` (insertion time, UTC)
pub fn create_ledger_table(table: &str) -> String {
    Table::create()
        .table(Alias::new(table))
        .if_not_exists()
        .col(
            ColumnDef::new(Alias::new("id"))
                .big_integer()
                .not_null()
                .primary_key()
                .extra("GENERATED BY DEFAULT AS IDENTITY (START WITH 2)"),
        )
        .col(
            ColumnDef::new(Alias::new("name"))
                .string()
                .string_len(255)
                .not_null(),
        )
        .col(ColumnDef::new(Alias::new("date")).timestamp().not_null())
        .col(
            ColumnDef::new(Alias::new("sha1sum"))
                .string()
                .string_len(40)
                .not_null(),
        )
        .col(
            ColumnDef::new(Alias::new("executed_at"))
                .timestamp()
                .not_null()
                .default(Expr::cust("(now() AT TIME ZONE 'utc')")),
        )
        .build(PostgresQueryBuilder)
}

/// Select every ledger row, sentinel included
pub fn select_entries_sql(table: &str) -> String {
    format!(r#"SELECT id, name, date, sha1sum, executed_at FROM "{table}" ORDER BY id"#)
}

/// Insert an applied migration; the database assigns `id` and `executed_at`
pub fn insert_entry_sql(table: &str) -> String {
    format!(r#"INSERT INTO "{table}" (name, date, sha1sum) VALUES ($1, $2, $3)"#)
}

/// Insert a row with an explicit `id` (used for the lock sentinel)
pub fn insert_entry_with_id_sql(table: &str) -> String {
    format!(r#"INSERT INTO "{table}" (id, name, date, sha1sum) VALUES ($1, $2, $3, $4)"#)
}

/// Delete the row with the given `id`
pub fn delete_entry_sql(table: &str) -> String {
    format!(r#"DELETE FROM "{table}" WHERE id = $1"#)
}

/// Create the ledger table if it is missing
///
/// Safe to call on every run. Two processes racing through `CREATE TABLE IF NOT
/// EXISTS` can make the loser's statement fail on PostgreSQL's catalog unique index
/// (`pg_type`); that loser is reported exactly like a lost lock.
///
/// # Errors
///
/// Returns `MigrationError::MigrationInProgress` when another run is creating the
/// table at the same moment, or `MigrationError::Database` if it cannot be created.
pub fn bootstrap(executor: &dyn MigrationExecutor, table: &str) -> Result<(), MigrationError> {
    match executor.ensure_ledger(table) {
        Ok(()) => Ok(()),
        Err(e) if e.is_unique_violation() => {
            log::debug!("ledger {} is being created by another run: {}", table, e);
            Err(MigrationError::MigrationInProgress)
        }
        Err(e) => Err(MigrationError::Database(e)),
    }
}

/// Read all applied migrations, ordered by name
///
/// The sentinel row is excluded. Ordering is by `name`, not by `id`, and uses
/// byte order so that it agrees with discovery regardless of database collation.
///
/// # Errors
///
/// Returns `MigrationError::Database` if the ledger cannot be read.
pub fn read_all(
    executor: &dyn MigrationExecutor,
    table: &str,
) -> Result<Vec<LedgerEntry>, MigrationError> {
    let mut entries: Vec<LedgerEntry> = executor
        .ledger_entries(table)?
        .into_iter()
        .filter(|entry| entry.id > SENTINEL_ID)
        .collect();

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Record a migration as applied
///
/// # Errors
///
/// Returns `MigrationError::Database` if the insert fails.
pub fn append(
    executor: &dyn MigrationExecutor,
    table: &str,
    file: &MigrationFile,
) -> Result<(), MigrationError> {
    let entry = NewLedgerEntry::migration(&file.name, file.timestamp, &file.checksum);
    executor.insert_entry(table, &entry)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::memory::MemoryExecutor;
    use chrono::Utc;

    #[test]
    fn test_create_ledger_table_sql() {
        let sql = create_ledger_table("migrations");
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"migrations\""));
        assert!(sql.contains("GENERATED BY DEFAULT AS IDENTITY (START WITH 2)"));
        assert!(sql.contains("\"sha1sum\""));
        assert!(sql.contains("\"executed_at\""));
    }

    #[test]
    fn test_statements_quote_table_name() {
        assert!(select_entries_sql("Ledger").contains("FROM \"Ledger\""));
        assert!(insert_entry_sql("Ledger").contains("INTO \"Ledger\" (name, date, sha1sum)"));
        assert!(insert_entry_with_id_sql("Ledger").contains("(id, name, date, sha1sum)"));
        assert_eq!(delete_entry_sql("Ledger"), "DELETE FROM \"Ledger\" WHERE id = $1");
    }

    #[test]
    fn test_bootstrap_is_idempotent() {
        let db = MemoryExecutor::new();
        bootstrap(&db, "migrations").unwrap();
        bootstrap(&db, "migrations").unwrap();
        assert!(db.has_table("migrations"));
        assert!(read_all(&db, "migrations").unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_creation_reports_in_progress() {
        let db = MemoryExecutor::new();
        db.fail_ledger_creation_as_duplicate(true);

        let err = bootstrap(&db, "migrations").unwrap_err();
        assert!(matches!(err, MigrationError::MigrationInProgress));
        assert!(!db.has_table("migrations"));
    }

    #[test]
    fn test_read_all_skips_sentinel_and_orders_by_name() {
        let db = MemoryExecutor::new();
        bootstrap(&db, "migrations").unwrap();

        let later = MigrationFile::from_content("20240102000000-b.sql", "SELECT 2;").unwrap();
        let earlier = MigrationFile::from_content("20240101000000-a.sql", "SELECT 1;").unwrap();
        append(&db, "migrations", &later).unwrap();
        db.insert_entry("migrations", &NewLedgerEntry::sentinel(Utc::now()))
            .unwrap();
        append(&db, "migrations", &earlier).unwrap();

        let entries = read_all(&db, "migrations").unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["20240101000000-a.sql", "20240102000000-b.sql"]);
        assert!(entries.iter().all(|e| e.id > SENTINEL_ID));
        assert_eq!(entries[0].checksum, earlier.checksum);
        assert_eq!(entries[0].date, earlier.timestamp);
    }
}
