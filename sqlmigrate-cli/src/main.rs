//! sqlmigrate command-line tool
//!
//! Writes a default configuration, creates timestamped migration scripts and
//! applies pending ones. `migrate` is the default when no subcommand is given.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sqlmigrate::config::MigrateConfig;
use sqlmigrate::migration::{MigrateOptions, MigrationError, Migrator, OrderPolicy};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "sqlmigrate")]
#[command(about = "Apply versioned SQL migration scripts to PostgreSQL")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "sqlmigrate.toml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,

    /// Create an empty migration script named after the current UTC time
    Create {
        /// Label appended to the timestamp (no dots or path separators)
        #[arg(short, long, default_value = "new-migration")]
        name: String,
    },

    /// Apply pending migrations
    Migrate {
        /// Apply at most this many migrations (default: all pending)
        #[arg(long)]
        max: Option<usize>,

        /// Allow pending migrations that sort before already-applied ones
        #[arg(long)]
        any_order: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli) {
        match e.downcast_ref::<MigrationError>() {
            Some(migration_error) => eprintln!("migration error: {}", migration_error),
            None => eprintln!("error: {:#}", e),
        }
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let command = cli.command.unwrap_or(Commands::Migrate {
        max: None,
        any_order: false,
    });

    match command {
        Commands::Init => handle_init(&cli.config),
        Commands::Create { name } => handle_create(&cli.config, &name),
        Commands::Migrate { max, any_order } => handle_migrate(&cli.config, max, any_order),
    }
}

fn load_config(path: &Path) -> Result<MigrateConfig> {
    MigrateConfig::load(path)
        .with_context(|| format!("cannot load configuration from {}", path.display()))
}

fn handle_init(path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(&MigrateConfig::default())
        .context("failed to serialize default configuration")?;

    let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            bail!("config file exists: {}", path.display())
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to create {}", path.display()));
        }
    };

    log::info!("writing config file {}", path.display());
    file.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn handle_create(path: &Path, name: &str) -> Result<()> {
    let migrator = Migrator::new(load_config(path)?)?;
    let created = migrator.create_migration(Some(name))?;
    println!("{}", created.display());
    Ok(())
}

fn handle_migrate(path: &Path, max: Option<usize>, any_order: bool) -> Result<()> {
    let config = load_config(path)?;
    fs::create_dir_all(&config.migrations_dir).with_context(|| {
        format!(
            "failed to create migrations directory {}",
            config.migrations_dir.display()
        )
    })?;

    let migrator = Migrator::new(config)?;
    let options = MigrateOptions {
        max,
        policy: OrderPolicy::from_any_order(any_order),
    };
    let report = migrator.migrate(options)?;

    if report.applied.is_empty() {
        log::info!("database is up to date");
    } else {
        for name in &report.applied {
            log::info!("  {}", name);
        }
    }
    Ok(())
}
