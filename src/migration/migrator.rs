//! Migrator - Core migration execution engine

use crate::config::MigrateConfig;
use crate::connection::{connect, ConnectionError};
use crate::executor::{MayPostgresExecutor, MigrationExecutor};
use crate::migration::file::{self, MigrationFile};
use crate::migration::lock::{acquire_migration_lock, release_migration_lock};
use crate::migration::reconcile::{pending_migrations, OrderPolicy};
use crate::migration::state_table::{append, bootstrap, read_all};
use crate::migration::MigrationError;
use chrono::Utc;
use std::path::PathBuf;
use std::time::Instant;

/// Options for a single [`Migrator::migrate`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrateOptions {
    /// Apply at most this many pending scripts; `None` applies all of them
    pub max: Option<usize>,
    pub policy: OrderPolicy,
}

impl MigrateOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }

    #[must_use]
    pub fn any_order(mut self, any_order: bool) -> Self {
        self.policy = OrderPolicy::from_any_order(any_order);
        self
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Names of the scripts applied by this run, in application order
    pub applied: Vec<String>,
    /// Pending scripts left for a later run because of `max`
    pub deferred: usize,
}

/// Core migration execution engine
///
/// The `Migrator` discovers scripts, reconciles them with the ledger table and
/// applies what is pending, one script per transaction, while holding the
/// ledger lock.
#[derive(Debug, Clone)]
pub struct Migrator {
    config: MigrateConfig,
}

impl Migrator {
    /// Create a new Migrator
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidConfig` if the configuration is rejected by
    /// [`MigrateConfig::validate`].
    pub fn new(config: MigrateConfig) -> Result<Self, MigrationError> {
        config
            .validate()
            .map_err(|e| MigrationError::InvalidConfig(e.to_string()))?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    /// Discover all migration scripts in the configured directory
    ///
    /// # Errors
    ///
    /// See [`file::discover_migrations`].
    pub fn discover_migrations(&self) -> Result<Vec<MigrationFile>, MigrationError> {
        file::discover_migrations(&self.config.migrations_dir)
    }

    /// Create an empty script named after the current UTC time
    ///
    /// # Errors
    ///
    /// See [`file::create_migration`].
    pub fn create_migration(&self, label: Option<&str>) -> Result<PathBuf, MigrationError> {
        file::create_migration(&self.config.migrations_dir, label, Utc::now())
    }

    /// Apply pending migrations against the configured PostgreSQL database
    ///
    /// # Errors
    ///
    /// Returns the first error of the run. The lock is released and the
    /// connection closed before returning, whatever failed.
    pub fn migrate(&self, options: MigrateOptions) -> Result<MigrationReport, MigrationError> {
        let connection_string = self.config.database.connection_string();
        self.migrate_with(
            || connect(&connection_string).map(MayPostgresExecutor::new),
            options,
        )
    }

    /// Apply pending migrations over a connection opened by `connect`
    ///
    /// The executor is dropped, closing its connection, before this returns.
    ///
    /// # Errors
    ///
    /// - `Connection` if `connect` fails (nothing else is attempted)
    /// - `MigrationInProgress` if another run holds the lock
    /// - any discovery, reconciliation or execution error of the locked phase
    /// - `Database` if only the final lock release failed
    pub fn migrate_with<E, F>(
        &self,
        connect: F,
        options: MigrateOptions,
    ) -> Result<MigrationReport, MigrationError>
    where
        E: MigrationExecutor,
        F: FnOnce() -> Result<E, ConnectionError>,
    {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!(
            "migrate",
            table = %self.config.migration_table,
            max = ?options.max,
            policy = ?options.policy
        )
        .entered();

        let executor = connect()?;
        let result = self.run_connected(&executor, options);

        drop(executor);
        log::debug!("disconnected from database");
        result
    }

    fn run_connected(
        &self,
        executor: &dyn MigrationExecutor,
        options: MigrateOptions,
    ) -> Result<MigrationReport, MigrationError> {
        let table = &self.config.migration_table;

        bootstrap(executor, table)?;
        acquire_migration_lock(executor, table)?;

        let outcome = self.run_locked(executor, options);
        let released = release_migration_lock(executor, table);

        match (outcome, released) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(unlock_error)) => Err(unlock_error),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(unlock_error)) => {
                log::error!("failed to release migration lock: {}", unlock_error);
                Err(e)
            }
        }
    }

    fn run_locked(
        &self,
        executor: &dyn MigrationExecutor,
        options: MigrateOptions,
    ) -> Result<MigrationReport, MigrationError> {
        let executed = read_all(executor, &self.config.migration_table)?;
        let files = self.discover_migrations()?;
        let mut pending = pending_migrations(&executed, files, options.policy)?;

        let deferred = match options.max {
            Some(max) if pending.len() > max => pending.split_off(max).len(),
            _ => 0,
        };

        if pending.is_empty() {
            log::info!("no pending migrations");
        }

        let mut applied = Vec::with_capacity(pending.len());
        for file in &pending {
            self.apply(executor, file)?;
            applied.push(file.name.clone());
        }

        if !applied.is_empty() {
            log::info!("applied {} migration(s)", applied.len());
        }
        if deferred > 0 {
            log::info!("{} pending migration(s) left for a later run", deferred);
        }

        Ok(MigrationReport { applied, deferred })
    }

    /// Run one script and record it, as a single transaction
    fn apply(
        &self,
        executor: &dyn MigrationExecutor,
        file: &MigrationFile,
    ) -> Result<(), MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("apply_migration", name = %file.name).entered();

        let start = Instant::now();
        executor.begin()?;

        if let Err(error) = executor.batch_execute(&file.content) {
            rollback(executor, &file.name);
            return Err(MigrationError::ExecutionFailed {
                name: file.name.clone(),
                error,
            });
        }

        if let Err(e) = append(executor, &self.config.migration_table, file) {
            rollback(executor, &file.name);
            return Err(e);
        }

        executor.commit()?;
        log::info!("applied migration {} in {:?}", file.name, start.elapsed());
        Ok(())
    }
}

fn rollback(executor: &dyn MigrationExecutor, name: &str) {
    if let Err(e) = executor.rollback() {
        log::warn!("rollback after failed migration {} failed: {}", name, e);
    }
}
