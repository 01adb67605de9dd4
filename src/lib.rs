//! # sqlmigrate
//!
//! Plain-SQL schema migrations for PostgreSQL over `may_postgres`.
//!
//! See [`migration`] for the engine and [`config`] for how a run is configured.

pub mod config;
pub mod connection;
pub mod executor;
pub mod migration;

pub use config::{DatabaseConfig, MigrateConfig};
pub use connection::{connect, ConnectionError};
pub use executor::{DbError, MayPostgresExecutor, MigrationExecutor};
pub use migration::{MigrateOptions, MigrationError, MigrationReport, Migrator, OrderPolicy};
