//! Ledger-table-based locking
//!
//! The lock is a sentinel row with `id = 1` in the ledger table itself. Whoever
//! inserts it holds the lock; the primary key guarantees only one process can.
//! There is no lease or heartbeat: a process that dies while holding the lock
//! leaves the row behind until someone deletes it by hand.

use crate::executor::MigrationExecutor;
use crate::migration::record::{LedgerEntry, NewLedgerEntry, SENTINEL_ID};
use crate::migration::MigrationError;
use chrono::Utc;

/// Acquire the migration lock by inserting the sentinel row
///
/// Does not wait: if the sentinel is already present the call fails at once.
///
/// # Errors
///
/// Returns `MigrationError::MigrationInProgress` if another run holds the lock,
/// or `MigrationError::Database` for any other failure.
pub fn acquire_migration_lock(
    executor: &dyn MigrationExecutor,
    table: &str,
) -> Result<(), MigrationError> {
    match executor.insert_entry(table, &NewLedgerEntry::sentinel(Utc::now())) {
        Ok(()) => {
            log::debug!("acquired migration lock on {}", table);
            Ok(())
        }
        Err(e) if e.is_unique_violation() => Err(MigrationError::MigrationInProgress),
        Err(e) => Err(MigrationError::Database(e)),
    }
}

/// Release the migration lock by deleting the sentinel row
///
/// # Errors
///
/// Returns `MigrationError::Database` if the deletion fails.
pub fn release_migration_lock(
    executor: &dyn MigrationExecutor,
    table: &str,
) -> Result<(), MigrationError> {
    let deleted = executor.delete_entry(table, SENTINEL_ID)?;
    if deleted == 0 {
        log::warn!("migration lock on {} was already released", table);
    } else {
        log::debug!("released migration lock on {}", table);
    }
    Ok(())
}

/// Check if the migration lock is currently held
///
/// # Errors
///
/// Returns `MigrationError::Database` if the ledger cannot be read.
pub fn is_migration_lock_held(
    executor: &dyn MigrationExecutor,
    table: &str,
) -> Result<bool, MigrationError> {
    let entries = executor.ledger_entries(table)?;
    Ok(entries.iter().any(LedgerEntry::is_sentinel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::memory::MemoryExecutor;

    fn ledger() -> MemoryExecutor {
        let db = MemoryExecutor::new();
        db.ensure_ledger("migrations").unwrap();
        db
    }

    #[test]
    fn test_acquire_then_release() {
        let db = ledger();
        acquire_migration_lock(&db, "migrations").unwrap();
        assert!(is_migration_lock_held(&db, "migrations").unwrap());

        release_migration_lock(&db, "migrations").unwrap();
        assert!(!is_migration_lock_held(&db, "migrations").unwrap());
    }

    #[test]
    fn test_second_acquire_reports_in_progress() {
        let db = ledger();
        let other_process = db.session();

        acquire_migration_lock(&db, "migrations").unwrap();
        let err = acquire_migration_lock(&other_process, "migrations").unwrap_err();
        assert!(matches!(err, MigrationError::MigrationInProgress));

        // the failed attempt must not disturb the holder's row
        assert!(is_migration_lock_held(&db, "migrations").unwrap());
    }

    #[test]
    fn test_lock_can_be_reacquired_after_release() {
        let db = ledger();
        acquire_migration_lock(&db, "migrations").unwrap();
        release_migration_lock(&db, "migrations").unwrap();
        acquire_migration_lock(&db.session(), "migrations").unwrap();
    }

    #[test]
    fn test_other_failures_are_not_in_progress() {
        let db = MemoryExecutor::new();
        // no ledger table
        let err = acquire_migration_lock(&db, "migrations").unwrap_err();
        assert!(matches!(err, MigrationError::Database(_)));
    }

    #[test]
    fn test_release_without_lock_is_not_an_error() {
        let db = ledger();
        release_migration_lock(&db, "migrations").unwrap();
    }
}
