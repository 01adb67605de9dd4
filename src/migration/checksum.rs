//! Checksum calculation for migration scripts

use sha1::{Digest, Sha1};

/// Calculate the SHA-1 checksum of a migration script
///
/// This is used to validate that migration scripts haven't been modified
/// after being applied to the database. The digest covers the exact bytes
/// of `content`.
///
/// # Returns
///
/// Returns the lowercase hexadecimal SHA-1 hash (40 characters)
#[must_use]
pub fn calculate_checksum(content: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(content.as_bytes());
    let hash = hasher.finalize();

    format!("{:x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            calculate_checksum(""),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(
            calculate_checksum("abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_single_byte_change_changes_checksum() {
        let original = "CREATE TABLE users (id BIGINT);";
        let edited = "CREATE TABLE users (id BIGINT) ;";
        assert_ne!(calculate_checksum(original), calculate_checksum(edited));
        assert_eq!(calculate_checksum(original), calculate_checksum(original));
    }

    #[test]
    fn test_checksum_fits_ledger_column() {
        let checksum = calculate_checksum("SELECT 1;");
        assert_eq!(checksum.len(), 40);
        assert!(checksum.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
