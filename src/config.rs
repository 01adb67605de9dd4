//! Configuration for a migration run.
//!
//! [`MigrateConfig`] replaces process-wide settings: it is built once (usually
//! through [`MigrateConfig::load`]) and handed to the
//! [`Migrator`](crate::migration::Migrator).

use config::{Config, ConfigError, Environment, File};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of environment variables that override file settings,
/// e.g. `SQLMIGRATE__DATABASE__PASSWORD`.
pub const ENV_PREFIX: &str = "SQLMIGRATE";

static TABLE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("table name pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MigrateConfig {
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    #[serde(default = "default_migration_table")]
    pub migration_table: String,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Full connection string; when set, the discrete fields below are ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_migration_table() -> String {
    "migrations".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "test".to_string()
}

fn default_password() -> String {
    "test".to_string()
}

fn default_database() -> String {
    "mydb".to_string()
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            migrations_dir: default_migrations_dir(),
            migration_table: default_migration_table(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: default_password(),
            database: default_database(),
        }
    }
}

impl DatabaseConfig {
    /// Connection string handed to [`crate::connection::connect`].
    #[must_use]
    pub fn connection_string(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.host,
            self.port,
            quote_value(&self.user),
            quote_value(&self.password),
            quote_value(&self.database),
        )
    }
}

/// Quote a key/value connection parameter when it contains spaces or quotes.
fn quote_value(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

impl MigrateConfig {
    /// Load the configuration from `path`, then overlay `SQLMIGRATE__*` environment variables.
    ///
    /// The file format is inferred from the extension (`.toml`, `.json`, ...).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing or unreadable, if a value has the
    /// wrong type, or if [`MigrateConfig::validate`] rejects the result.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let settings = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| {
                ConfigError::Message(format!(
                    "failed to read config file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        let loaded: MigrateConfig = settings.try_deserialize().map_err(|e| {
            ConfigError::Message(format!("invalid config file {}: {}", path.display(), e))
        })?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Check values the engine interpolates into SQL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` if `migration_table` is not a plain identifier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !TABLE_NAME.is_match(&self.migration_table) {
            return Err(ConfigError::Message(format!(
                "migration_table '{}' must match {}",
                self.migration_table,
                TABLE_NAME.as_str()
            )));
        }
        Ok(())
    }
}
