//! Migration file discovery and parsing

use crate::migration::checksum::calculate_checksum;
use crate::migration::MigrationError;
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Extension every migration script carries
pub const MIGRATION_EXTENSION: &str = ".sql";

/// Label used by [`create_migration`] when none is given
pub const DEFAULT_LABEL: &str = "unnamed";

/// Content of a freshly created migration script
pub const PLACEHOLDER_SCRIPT: &str = "-- migration script --";

// `[0-9]` rather than `\d`: the latter also matches non-ASCII digits.
static FILENAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]{4})([0-9]{2})([0-9]{2})([0-9]{2})([0-9]{2})([0-9]{2})-[^.]+\.sql$")
        .expect("migration file name pattern is valid")
});

/// Represents a discovered migration script
///
/// Built fresh on every discovery pass; nothing here is cached on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// Path to the migration file
    pub path: PathBuf,

    /// File name, e.g. `20240120120000-create_users.sql`
    pub name: String,

    /// UTC instant encoded in the 14-digit prefix
    pub timestamp: DateTime<Utc>,

    /// Raw script text
    pub content: String,

    /// SHA-1 checksum of `content`
    pub checksum: String,
}

impl MigrationFile {
    /// Build a `MigrationFile` from a name and its script text
    ///
    /// `path` is set to the bare name; use this for scripts that do not live on disk.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidFilename` if `name` does not follow the naming pattern.
    pub fn from_content(
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Self, MigrationError> {
        let name = name.into();
        let timestamp = parse_timestamp(&name)?;
        let content = content.into();
        let checksum = calculate_checksum(&content);

        Ok(Self {
            path: PathBuf::from(&name),
            name,
            timestamp,
            content,
            checksum,
        })
    }

    /// Read `dir/name` from disk
    ///
    /// The name is validated before the file is opened.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidFilename` for a malformed name, or
    /// `MigrationError::Io` if the file cannot be read as UTF-8 text.
    pub fn load(dir: &Path, name: &str) -> Result<Self, MigrationError> {
        let timestamp = parse_timestamp(name)?;
        let path = dir.join(name);
        let content = fs::read_to_string(&path).map_err(|source| MigrationError::Io {
            path: path.clone(),
            source,
        })?;
        let checksum = calculate_checksum(&content);

        Ok(Self {
            path,
            name: name.to_string(),
            timestamp,
            content,
            checksum,
        })
    }
}

/// Parse the UTC timestamp encoded in a migration file name
///
/// Expected format: `{YYYYMMDDHHMMSS}-{label}.sql`, where the label contains no `.`
///
/// # Example
/// - `20240120120000-create_users.sql` → 2024-01-20 12:00:00 UTC
///
/// # Errors
///
/// Returns `MigrationError::InvalidFilename` if the name does not match the pattern
/// or the digits do not form a real calendar instant (month 13, February 30, ...).
pub fn parse_timestamp(name: &str) -> Result<DateTime<Utc>, MigrationError> {
    let invalid = || MigrationError::InvalidFilename {
        name: name.to_string(),
    };

    let caps = FILENAME.captures(name).ok_or_else(invalid)?;
    let field = |i: usize| caps[i].parse::<u32>().map_err(|_| invalid());

    let year = caps[1].parse::<i32>().map_err(|_| invalid())?;
    Utc.with_ymd_and_hms(year, field(2)?, field(3)?, field(4)?, field(5)?, field(6)?)
        .single()
        .ok_or_else(invalid)
}

/// Format an instant as the zero-padded 14-digit UTC prefix of a migration file name
#[must_use]
pub fn format_timestamp(instant: &DateTime<Utc>) -> String {
    instant.format("%Y%m%d%H%M%S").to_string()
}

/// Discover all migration scripts in a directory
///
/// Keeps entries whose name ends in `.sql`, sorts them by name (which is
/// chronological order given the zero-padded prefix), then parses and reads each.
///
/// # Returns
///
/// Returns the scripts sorted by name, content and checksum loaded.
///
/// # Errors
///
/// Returns errors if:
/// - The directory doesn't exist or can't be read (`Io`)
/// - Any `.sql` file has an invalid name (`InvalidFilename`); discovery stops there
/// - A script cannot be read (`Io`)
pub fn discover_migrations(migrations_dir: &Path) -> Result<Vec<MigrationFile>, MigrationError> {
    let io_error = |source| MigrationError::Io {
        path: migrations_dir.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    for entry in fs::read_dir(migrations_dir).map_err(io_error)? {
        let file_name = entry.map_err(io_error)?.file_name();

        match file_name.to_str() {
            Some(name) if name.ends_with(MIGRATION_EXTENSION) => names.push(name.to_string()),
            Some(_) => {}
            None => {
                let lossy = file_name.to_string_lossy();
                if lossy.ends_with(MIGRATION_EXTENSION) {
                    return Err(MigrationError::InvalidFilename {
                        name: lossy.into_owned(),
                    });
                }
            }
        }
    }

    names.sort();
    log::debug!(
        "found {} migration script(s) in {}",
        names.len(),
        migrations_dir.display()
    );

    names
        .iter()
        .map(|name| MigrationFile::load(migrations_dir, name))
        .collect()
}

/// Create a new, empty migration script named after `now`
///
/// Writes `<YYYYMMDDHHMMSS>-<label>.sql` into `migrations_dir` (created if missing)
/// with placeholder content. An empty or absent label becomes [`DEFAULT_LABEL`].
///
/// # Errors
///
/// Returns `MigrationError::InvalidFilename` if the label would produce a name
/// discovery rejects (it contains `.` or a path separator), or `MigrationError::Io`
/// if the directory or file cannot be created. Existing files are never overwritten.
pub fn create_migration(
    migrations_dir: &Path,
    label: Option<&str>,
    now: DateTime<Utc>,
) -> Result<PathBuf, MigrationError> {
    let label = label.filter(|l| !l.is_empty()).unwrap_or(DEFAULT_LABEL);
    let name = format!("{}-{}{}", format_timestamp(&now), label, MIGRATION_EXTENSION);

    if label.contains(['/', '\\']) {
        return Err(MigrationError::InvalidFilename { name });
    }
    parse_timestamp(&name)?;

    fs::create_dir_all(migrations_dir).map_err(|source| MigrationError::Io {
        path: migrations_dir.to_path_buf(),
        source,
    })?;

    let path = migrations_dir.join(&name);
    let io_error = |source| MigrationError::Io {
        path: path.clone(),
        source,
    };
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(io_error)?;
    file.write_all(PLACEHOLDER_SCRIPT.as_bytes()).map_err(io_error)?;

    log::info!("created migration file: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("20240120123456-create_users.sql").unwrap();
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.month(), 1);
        assert_eq!(ts.day(), 20);
        assert_eq!(ts.hour(), 12);
        assert_eq!(ts.minute(), 34);
        assert_eq!(ts.second(), 56);
    }

    #[test]
    fn test_parse_timestamp_rejects_malformed_names() {
        let bad = [
            "2024012012345-short.sql",      // 13 digits
            "20240120123456create.sql",     // missing separator
            "20240120123456-.sql",          // empty label
            "20240120123456-a.b.sql",       // dot in label
            "20240120123456-users.rs",      // wrong extension
            "x20240120123456-users.sql",    // leading junk
            "20241320123456-month13.sql",   // not a calendar date
            "20240230000000-feb30.sql",
            "20240120250000-hour25.sql",
        ];
        for name in bad {
            match parse_timestamp(name) {
                Err(MigrationError::InvalidFilename { name: reported }) => assert_eq!(reported, name),
                other => panic!("{name} should be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_format_then_parse_round_trips() {
        let instants = [
            Utc.with_ymd_and_hms(2016, 2, 29, 23, 59, 59).unwrap(),
            Utc.with_ymd_and_hms(1999, 12, 31, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        ];
        for t in instants {
            let name = format!("{}-label.sql", format_timestamp(&t));
            assert_eq!(parse_timestamp(&name).unwrap(), t);
        }
    }

    #[test]
    fn test_format_timestamp_zero_pads() {
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_timestamp(&t), "20240102030405");
    }

    #[test]
    fn test_from_content_computes_checksum() {
        let file = MigrationFile::from_content("20240101000000-a.sql", "SELECT 1;").unwrap();
        assert_eq!(file.checksum, calculate_checksum("SELECT 1;"));
        assert_eq!(file.path, PathBuf::from("20240101000000-a.sql"));
    }
}
