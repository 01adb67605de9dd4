//! In-memory `MigrationExecutor` for tests
//!
//! Behaves like the ledger table of a real database closely enough to exercise the
//! whole run: ids start at 2, explicit ids are checked against the primary key,
//! transactions roll back ledger rows and scripts. Several sessions created with
//! [`MemoryExecutor::session`] share one database, which is how tests model
//! concurrent processes.

use crate::executor::{DbError, MigrationExecutor};
use crate::migration::record::{LedgerEntry, NewLedgerEntry};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const FIRST_ASSIGNED_ID: i64 = 2;

#[derive(Debug, Clone)]
struct MemoryTable {
    rows: BTreeMap<i64, LedgerEntry>,
    next_id: i64,
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: FIRST_ASSIGNED_ID,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryDatabase {
    tables: HashMap<String, MemoryTable>,
    executed_scripts: Vec<String>,
    failing_scripts: Vec<String>,
    failing_deletes: bool,
    duplicate_ledger_creation: bool,
    open_sessions: usize,
}

impl MemoryDatabase {
    fn table_mut(&mut self, table: &str) -> Result<&mut MemoryTable, DbError> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| DbError::QueryError(format!("relation \"{table}\" does not exist")))
    }
}

#[derive(Debug)]
struct Snapshot {
    tables: HashMap<String, MemoryTable>,
    scripts: usize,
}

/// One session on a shared in-memory database
#[derive(Debug)]
pub struct MemoryExecutor {
    db: Arc<Mutex<MemoryDatabase>>,
    transaction: Mutex<Option<Snapshot>>,
}

impl MemoryExecutor {
    /// Open a session on a new, empty database
    #[must_use]
    pub fn new() -> Self {
        let db = MemoryDatabase {
            open_sessions: 1,
            ..MemoryDatabase::default()
        };
        Self {
            db: Arc::new(Mutex::new(db)),
            transaction: Mutex::new(None),
        }
    }

    /// Open another session on the same database
    #[must_use]
    pub fn session(&self) -> Self {
        self.state().open_sessions += 1;
        Self {
            db: Arc::clone(&self.db),
            transaction: Mutex::new(None),
        }
    }

    /// Make every script containing `needle` fail
    pub fn fail_scripts_containing(&self, needle: &str) {
        self.state().failing_scripts.push(needle.to_string());
    }

    /// Make row deletion fail (the lock cannot be released)
    pub fn fail_deletes(&self, fail: bool) {
        self.state().failing_deletes = fail;
    }

    /// Make ledger creation fail the way a concurrent `CREATE TABLE` does on PostgreSQL
    pub fn fail_ledger_creation_as_duplicate(&self, fail: bool) {
        self.state().duplicate_ledger_creation = fail;
    }

    /// Scripts executed and not rolled back, in execution order
    #[must_use]
    pub fn executed_scripts(&self) -> Vec<String> {
        self.state().executed_scripts.clone()
    }

    /// Every row of `table` ordered by id, sentinel included
    #[must_use]
    pub fn entries(&self, table: &str) -> Vec<LedgerEntry> {
        self.state()
            .tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn has_table(&self, table: &str) -> bool {
        self.state().tables.contains_key(table)
    }

    /// Sessions not yet dropped, this one included
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.state().open_sessions
    }

    fn state(&self) -> MutexGuard<'_, MemoryDatabase> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_state(&self) -> Result<MutexGuard<'_, MemoryDatabase>, DbError> {
        self.db
            .lock()
            .map_err(|_| DbError::Other("memory database poisoned".to_string()))
    }

    fn snapshot(&self) -> Result<MutexGuard<'_, Option<Snapshot>>, DbError> {
        self.transaction
            .lock()
            .map_err(|_| DbError::Other("transaction state poisoned".to_string()))
    }
}

impl Default for MemoryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryExecutor {
    fn drop(&mut self) {
        let mut db = self.state();
        db.open_sessions = db.open_sessions.saturating_sub(1);
    }
}

impl MigrationExecutor for MemoryExecutor {
    fn ensure_ledger(&self, table: &str) -> Result<(), DbError> {
        let mut db = self.try_state()?;
        if db.duplicate_ledger_creation {
            return Err(DbError::UniqueViolation(
                "duplicate key value violates unique constraint \"pg_type_typname_nsp_index\""
                    .to_string(),
            ));
        }
        db.tables.entry(table.to_string()).or_default();
        Ok(())
    }

    fn ledger_entries(&self, table: &str) -> Result<Vec<LedgerEntry>, DbError> {
        let mut db = self.try_state()?;
        Ok(db.table_mut(table)?.rows.values().cloned().collect())
    }

    fn insert_entry(&self, table: &str, entry: &NewLedgerEntry<'_>) -> Result<(), DbError> {
        let mut db = self.try_state()?;
        let ledger = db.table_mut(table)?;

        let id = match entry.id {
            Some(id) => id,
            None => {
                let id = ledger.next_id;
                ledger.next_id += 1;
                id
            }
        };
        if ledger.rows.contains_key(&id) {
            return Err(DbError::UniqueViolation(format!(
                "duplicate key value violates unique constraint \"{table}_pkey\": id={id}"
            )));
        }

        ledger.rows.insert(
            id,
            LedgerEntry {
                id,
                name: entry.name.to_string(),
                date: entry.date,
                checksum: entry.checksum.to_string(),
                executed_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn delete_entry(&self, table: &str, id: i64) -> Result<u64, DbError> {
        let mut db = self.try_state()?;
        if db.failing_deletes {
            return Err(DbError::Other("connection reset while deleting".to_string()));
        }
        let removed = db.table_mut(table)?.rows.remove(&id);
        Ok(u64::from(removed.is_some()))
    }

    fn batch_execute(&self, script: &str) -> Result<(), DbError> {
        let mut db = self.try_state()?;
        if let Some(needle) = db.failing_scripts.iter().find(|n| script.contains(n.as_str())) {
            return Err(DbError::QueryError(format!("syntax error at or near \"{needle}\"")));
        }
        db.executed_scripts.push(script.to_string());
        Ok(())
    }

    fn begin(&self) -> Result<(), DbError> {
        let mut transaction = self.snapshot()?;
        if transaction.is_some() {
            return Err(DbError::Other("transaction already in progress".to_string()));
        }
        let db = self.try_state()?;
        *transaction = Some(Snapshot {
            tables: db.tables.clone(),
            scripts: db.executed_scripts.len(),
        });
        Ok(())
    }

    fn commit(&self) -> Result<(), DbError> {
        self.snapshot()?
            .take()
            .map(|_| ())
            .ok_or_else(|| DbError::Other("no transaction in progress".to_string()))
    }

    fn rollback(&self) -> Result<(), DbError> {
        let snapshot = self
            .snapshot()?
            .take()
            .ok_or_else(|| DbError::Other("no transaction in progress".to_string()))?;
        let mut db = self.try_state()?;
        db.tables = snapshot.tables;
        db.executed_scripts.truncate(snapshot.scripts);
        Ok(())
    }
}
