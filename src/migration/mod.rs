//! SQL migration engine
//!
//! Scripts named `<YYYYMMDDHHMMSS>-<label>.sql` are discovered in a directory,
//! reconciled against a ledger table and applied in name order, each in its own
//! transaction, while the ledger's sentinel row locks out concurrent runs.
//!
//! # Example
//!
//! ```rust,no_run
//! use sqlmigrate::config::MigrateConfig;
//! use sqlmigrate::migration::{MigrateOptions, Migrator};
//!
//! let config = MigrateConfig::load("sqlmigrate.toml")?;
//! let migrator = Migrator::new(config)?;
//!
//! let report = migrator.migrate(MigrateOptions::new().max(5))?;
//! for name in &report.applied {
//!     println!("applied {name}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod checksum;
pub mod error;
pub mod file;
pub mod lock;
#[cfg(any(test, feature = "mock"))]
pub mod memory;
pub mod migrator;
pub mod reconcile;
pub mod record;
pub mod state_table;

pub use checksum::calculate_checksum;
pub use error::MigrationError;
pub use file::{
    create_migration, discover_migrations, format_timestamp, parse_timestamp, MigrationFile,
};
pub use lock::{acquire_migration_lock, is_migration_lock_held, release_migration_lock};
pub use migrator::{MigrateOptions, MigrationReport, Migrator};
pub use reconcile::{pending_migrations, OrderPolicy};
pub use record::{LedgerEntry, NewLedgerEntry, SENTINEL_ID};
