//! `LedgerEntry` - Represents rows of the migration ledger table

use chrono::{DateTime, Utc};

/// Id reserved for the lock sentinel row; real migrations always have a larger id
pub const SENTINEL_ID: i64 = 1;

/// Placeholder name stored in the lock sentinel row
pub const SENTINEL_NAME: &str = ">> migration in progress <<";

/// A row of the ledger table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Store-assigned id; `1` is the lock sentinel
    pub id: i64,

    /// File name of the applied script
    pub name: String,

    /// Timestamp parsed from the file name
    pub date: DateTime<Utc>,

    /// SHA-1 checksum of the script at application time
    pub checksum: String,

    /// When the row was inserted (informational only)
    pub executed_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Whether this row is the lock sentinel rather than an applied migration
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.id == SENTINEL_ID
    }
}

/// Values for a row about to be inserted
///
/// `id` is `None` for applied migrations, letting the database assign it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewLedgerEntry<'a> {
    pub id: Option<i64>,
    pub name: &'a str,
    pub date: DateTime<Utc>,
    pub checksum: &'a str,
}

impl<'a> NewLedgerEntry<'a> {
    /// Row recording an applied migration
    #[must_use]
    pub fn migration(name: &'a str, date: DateTime<Utc>, checksum: &'a str) -> Self {
        Self {
            id: None,
            name,
            date,
            checksum,
        }
    }

    /// The lock sentinel row, dated `now`
    #[must_use]
    pub fn sentinel(now: DateTime<Utc>) -> Self {
        Self {
            id: Some(SENTINEL_ID),
            name: SENTINEL_NAME,
            date: now,
            checksum: "",
        }
    }
}
