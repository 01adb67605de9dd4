//! Reconciliation of the ledger against the scripts on disk
//!
//! Both policies validate the whole ledger before returning anything: one bad
//! entry aborts with no partial result.

use crate::migration::file::MigrationFile;
use crate::migration::record::LedgerEntry;
use crate::migration::MigrationError;
use std::collections::BTreeMap;

/// How applied migrations must line up with the scripts on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderPolicy {
    /// Applied migrations must be an exact, order-preserving prefix of the files
    #[default]
    Strict,
    /// Applied migrations are matched by name; new files may sort before applied ones
    AnyOrder,
}

impl OrderPolicy {
    #[must_use]
    pub fn from_any_order(any_order: bool) -> Self {
        if any_order {
            OrderPolicy::AnyOrder
        } else {
            OrderPolicy::Strict
        }
    }
}

/// Compute the scripts still to apply
///
/// `executed` and `files` must both be sorted by name, as returned by
/// [`crate::migration::state_table::read_all`] and
/// [`crate::migration::file::discover_migrations`].
///
/// # Returns
///
/// Returns the pending scripts sorted by name.
///
/// # Errors
///
/// - `MigrationFileNotFound` if an applied migration has no file
/// - `MigrationNameMismatch` (strict only) if ledger and files disagree at a position
/// - `ChecksumMismatch` if an applied script's content changed
pub fn pending_migrations(
    executed: &[LedgerEntry],
    files: Vec<MigrationFile>,
    policy: OrderPolicy,
) -> Result<Vec<MigrationFile>, MigrationError> {
    match policy {
        OrderPolicy::Strict => pending_in_order(executed, files),
        OrderPolicy::AnyOrder => pending_any_order(executed, files),
    }
}

fn pending_in_order(
    executed: &[LedgerEntry],
    mut files: Vec<MigrationFile>,
) -> Result<Vec<MigrationFile>, MigrationError> {
    for (i, entry) in executed.iter().enumerate() {
        let file = files.get(i).ok_or_else(|| MigrationError::MigrationFileNotFound {
            name: entry.name.clone(),
        })?;

        if file.name != entry.name {
            return Err(MigrationError::MigrationNameMismatch {
                expected: entry.name.clone(),
                found: file.name.clone(),
            });
        }

        validate_checksum(entry, file)?;
    }

    Ok(files.split_off(executed.len()))
}

fn pending_any_order(
    executed: &[LedgerEntry],
    files: Vec<MigrationFile>,
) -> Result<Vec<MigrationFile>, MigrationError> {
    let mut by_name: BTreeMap<String, MigrationFile> = files
        .into_iter()
        .map(|file| (file.name.clone(), file))
        .collect();

    for entry in executed {
        let file = by_name
            .remove(&entry.name)
            .ok_or_else(|| MigrationError::MigrationFileNotFound {
                name: entry.name.clone(),
            })?;

        validate_checksum(entry, &file)?;
    }

    Ok(by_name.into_values().collect())
}

fn validate_checksum(entry: &LedgerEntry, file: &MigrationFile) -> Result<(), MigrationError> {
    if entry.checksum == file.checksum {
        Ok(())
    } else {
        Err(MigrationError::ChecksumMismatch {
            name: file.name.clone(),
            stored: entry.checksum.clone(),
            current: file.checksum.clone(),
        })
    }
}
