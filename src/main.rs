//! Command-line interface for legacy-sync
//!
//! # Usage Examples
//!
//! ## Migration
//! ```bash
//! # Check that both databases are reachable
//! legacy-sync --config legacy-sync.toml check
//!
//! # Create destination tables, copy rows and compare counts
//! legacy-sync --config legacy-sync.toml migrate --table customers --table orders
//!
//! # Start over instead of resuming an interrupted run
//! legacy-sync --config legacy-sync.toml migrate --fresh
//! ```
//!
//! ## Incremental Sync
//! ```bash
//! # Sync every interval until Ctrl-C
//! legacy-sync --config legacy-sync.toml sync
//!
//! # One cycle per table, then exit
//! legacy-sync --config legacy-sync.toml sync --once
//! ```
//!
//! ## Backup and Restore
//! ```bash
//! legacy-sync --config legacy-sync.toml backup --output-dir /var/backups
//! legacy-sync --config legacy-sync.toml contents /var/backups/backup_20240101T000000_<id>.jsonl
//! legacy-sync --config legacy-sync.toml restore /var/backups/backup_20240101T000000_<id>.jsonl \
//!   --section pre-data --section data
//! legacy-sync --config legacy-sync.toml restore /var/backups/backup_20240101T000000_<id>.jsonl --resume
//! ```

use anyhow::{bail, Context};
use checkpoint::CheckpointManager;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use legacy_sync::backup::BackupRestoreCoordinator;
use legacy_sync::config::Config;
use legacy_sync::connection::ConnectionManager;
use legacy_sync::full_sync::{BatchDataMigrator, RunStatus};
use legacy_sync::incremental_sync::{IncrementalSyncEngine, SyncScheduler};
use legacy_sync::mysql::MySQLConnector;
use legacy_sync::postgresql::{self, PostgreSQLPool};
use legacy_sync::progress::ProgressReporter;
use legacy_sync::schema::{prepare_tables, PreparedTables};
use legacy_sync::verify::verify_tables;
use sync_core::Section;

#[derive(Parser)]
#[command(name = "legacy-sync")]
#[command(about = "Migrate and continuously sync legacy MySQL data into PostgreSQL")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file (TOML, or YAML with a .yaml/.yml extension)
    #[arg(
        long,
        short,
        global = true,
        default_value = "legacy-sync.toml",
        env = "LEGACY_SYNC_CONFIG"
    )]
    config: PathBuf,

    /// Log filter, e.g. `debug` or `legacy_sync=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Round-trip to the source and the destination
    Check,

    /// Translate source tables and create them on the destination
    Schema {
        /// Tables to process (default: configured tables, else every source table)
        #[arg(long = "table", value_name = "TABLE")]
        tables: Vec<String>,
    },

    /// Create destination tables, copy all rows, then compare row counts
    Migrate {
        #[arg(long = "table", value_name = "TABLE")]
        tables: Vec<String>,

        /// Rows per batch (default: migration.batch_size)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Discard saved progress and start every table from the beginning
        #[arg(long)]
        fresh: bool,
    },

    /// Apply source changes to the destination every interval
    Sync {
        #[arg(long = "table", value_name = "TABLE")]
        tables: Vec<String>,

        /// Run a single cycle per table and exit
        #[arg(long)]
        once: bool,
    },

    /// Compare source and destination row counts
    Verify {
        #[arg(long = "table", value_name = "TABLE")]
        tables: Vec<String>,
    },

    /// Write a sectioned archive of the destination database
    Backup {
        /// Archive directory (default: backup.dir)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Restore sections of an archive into the destination database
    Restore {
        archive: PathBuf,

        /// Section to restore: pre-data, data or post-data (default: all)
        #[arg(long = "section", value_name = "SECTION", value_parser = parse_section)]
        sections: Vec<Section>,

        /// Skip sections recorded as applied by an earlier restore of this archive
        #[arg(long)]
        resume: bool,
    },

    /// List the contents of an archive
    Contents { archive: PathBuf },
}

fn parse_section(s: &str) -> Result<Section, String> {
    s.parse().map_err(|e: sync_core::SyncError| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = match &cli.log_level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("legacy_sync=info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;

    match cli.command {
        Commands::Check => run_check(&config).await,
        Commands::Schema { tables } => {
            let connections = connect(&config).await?;
            let tables = resolve_tables(&connections, &config, tables).await?;
            let prepared = prepare(&connections, &config, &tables).await?;
            report_failures(&prepared)
        }
        Commands::Migrate {
            tables,
            batch_size,
            fresh,
        } => run_migrate(&config, tables, batch_size, fresh).await,
        Commands::Sync { tables, once } => run_sync(&config, tables, once).await,
        Commands::Verify { tables } => {
            let connections = connect(&config).await?;
            let tables = resolve_tables(&connections, &config, tables).await?;
            run_verify(&connections, &tables).await
        }
        Commands::Backup { output_dir } => {
            let connections = connect(&config).await?;
            let dir = output_dir.unwrap_or_else(|| config.backup.dir.clone());
            let handle = coordinator(&config, connections, dir).backup().await?;
            println!("Archive {} written to {}", handle.id, handle.path.display());
            for (section, entries) in &handle.sections {
                println!("  {section}: {entries} entries");
            }
            Ok(())
        }
        Commands::Restore {
            archive,
            sections,
            resume,
        } => {
            let connections = connect(&config).await?;
            let coordinator = coordinator(&config, connections, config.backup.dir.clone());
            let result = if resume {
                coordinator.resume(&archive, &sections).await?
            } else {
                coordinator.restore(&archive, &sections, None).await?
            };
            println!(
                "Restore of {}: {} (applied {:?}, skipped {:?}, pending {:?})",
                result.archive_id, result.status, result.applied, result.skipped, result.pending
            );
            match result.error() {
                Some(e) => Err(e.into()),
                None => Ok(()),
            }
        }
        Commands::Contents { archive } => {
            let connections = connect(&config).await?;
            let contents = coordinator(&config, connections, config.backup.dir.clone())
                .contents(&archive)?;
            println!(
                "Archive {} (format {} v{}) created {} from {}",
                contents.header.id,
                contents.header.format,
                contents.header.version,
                contents.header.created_at,
                contents.header.origin
            );
            for (section, entries) in &contents.sections {
                println!("{section}:");
                for entry in entries {
                    println!("  {entry}");
                }
            }
            Ok(())
        }
    }
}

/// Build the connection manager. No connection is opened yet, except to
/// create the destination database when configured to.
async fn connect(config: &Config) -> anyhow::Result<Arc<ConnectionManager>> {
    if config.destination.create_database {
        postgresql::ensure_database(&config.destination)
            .await
            .context("Failed to prepare the destination database")?;
    }
    let source = MySQLConnector::new(&config.source)?;
    let destination = PostgreSQLPool::new(&config.destination)?;
    Ok(Arc::new(ConnectionManager::new(
        Arc::new(source),
        Arc::new(destination),
        config.connection_settings(),
    )))
}

fn checkpoints(config: &Config) -> CheckpointManager {
    CheckpointManager::from_storage(&config.checkpoint_storage())
}

fn coordinator(
    config: &Config,
    connections: Arc<ConnectionManager>,
    dir: PathBuf,
) -> BackupRestoreCoordinator {
    BackupRestoreCoordinator::new(connections, checkpoints(config), dir)
        .with_retry(config.retry_policy())
        .with_reporter(ProgressReporter::new())
}

/// Cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping at the next batch or cycle boundary");
            child.cancel();
        }
    });
    token
}

/// Command-line tables, else configured tables, else every source table.
async fn resolve_tables(
    connections: &ConnectionManager,
    config: &Config,
    requested: Vec<String>,
) -> anyhow::Result<Vec<String>> {
    if !requested.is_empty() {
        return Ok(requested);
    }
    let configured = config.table_names();
    if !configured.is_empty() {
        return Ok(configured);
    }
    let mut source = connections.acquire_source().await?;
    let tables = source.list_tables().await;
    source.release().await;
    let tables = tables.context("Failed to list source tables")?;
    tracing::info!("Found {} source table(s)", tables.len());
    Ok(tables)
}

async fn prepare(
    connections: &ConnectionManager,
    config: &Config,
    tables: &[String],
) -> anyhow::Result<PreparedTables> {
    let prepared = prepare_tables(connections, config, tables, &ProgressReporter::new())
        .await
        .context("Failed to prepare destination schema")?;
    tracing::info!(
        "Destination schema ready for {} of {} table(s)",
        prepared.mappings.len(),
        tables.len()
    );
    Ok(prepared)
}

fn report_failures(prepared: &PreparedTables) -> anyhow::Result<()> {
    for (table, error) in &prepared.failures {
        eprintln!("  {table}: {error}");
    }
    if !prepared.failures.is_empty() {
        bail!(
            "{} table(s) could not be prepared",
            prepared.failures.len()
        );
    }
    Ok(())
}

async fn run_check(config: &Config) -> anyhow::Result<()> {
    let connections = connect(config).await?;
    let report = connections.check_connections().await;
    if !report.is_healthy() {
        bail!("Connection check failed");
    }
    println!("Source and destination are reachable");
    Ok(())
}

async fn run_migrate(
    config: &Config,
    tables: Vec<String>,
    batch_size: Option<usize>,
    fresh: bool,
) -> anyhow::Result<()> {
    let batch_size = batch_size.unwrap_or(config.migration.batch_size);
    if batch_size == 0 {
        bail!("--batch-size must be at least 1");
    }

    let connections = connect(config).await?;
    let tables = resolve_tables(&connections, config, tables).await?;
    let prepared = prepare(&connections, config, &tables).await?;

    let migrator = BatchDataMigrator::new(
        Arc::clone(&connections),
        checkpoints(config),
        config.retry_policy(),
    )
    .with_cancellation(cancel_on_ctrl_c())
    .with_reporter(ProgressReporter::new());

    if fresh {
        for mapping in &prepared.mappings {
            migrator.discard_checkpoint(&mapping.table).await?;
        }
    }

    let results = migrator
        .migrate_all(&prepared.mappings, batch_size, config.migration.table_workers)
        .await;

    let mut unfinished = 0;
    for (table, result) in &results {
        match result {
            Ok(run) if run.status == RunStatus::Completed => {
                println!("{table}: {} rows migrated", run.rows_completed);
            }
            Ok(run) => {
                unfinished += 1;
                println!(
                    "{table}: {} after {} rows{}",
                    run.status,
                    run.rows_completed,
                    run.error
                        .as_deref()
                        .map(|e| format!(" ({e})"))
                        .unwrap_or_default()
                );
            }
            Err(e) => {
                unfinished += 1;
                println!("{table}: {e}");
            }
        }
    }

    let migrated: Vec<String> = prepared.mappings.iter().map(|m| m.table.clone()).collect();
    run_verify(&connections, &migrated).await?;
    report_failures(&prepared)?;
    if unfinished > 0 {
        bail!("{unfinished} table(s) did not finish migrating");
    }
    Ok(())
}

async fn run_sync(config: &Config, tables: Vec<String>, once: bool) -> anyhow::Result<()> {
    let connections = connect(config).await?;
    let tables = resolve_tables(&connections, config, tables).await?;
    let prepared = prepare(&connections, config, &tables).await?;

    let mut engines = Vec::new();
    for mapping in prepared.mappings {
        if mapping.change_tracking_column.is_none() {
            tracing::info!("Skipping {}: no change-tracking column", mapping.table);
            continue;
        }
        let engine = IncrementalSyncEngine::new(
            mapping,
            Arc::clone(&connections),
            checkpoints(config),
            config.retry_policy(),
            config.migration.batch_size,
        )?
        .with_reporter(ProgressReporter::new());
        engines.push(engine);
    }
    if engines.is_empty() {
        bail!("No table has a change-tracking column to sync on");
    }

    if once {
        let mut failed = 0;
        for (table, outcome) in SyncScheduler::run_once(&mut engines).await {
            match outcome {
                Ok(cycle) => println!("{table}: {} rows synced", cycle.rows_synced),
                Err(e) => {
                    failed += 1;
                    println!("{table}: {e}");
                }
            }
        }
        if failed > 0 {
            bail!("{failed} table(s) failed to sync");
        }
        return Ok(());
    }

    let scheduler = SyncScheduler::new(config.sync_interval(), cancel_on_ctrl_c());
    for (table, stats) in scheduler.run(engines).await {
        println!(
            "{table}: {} cycles, {} failed, {} rows synced",
            stats.cycles_completed, stats.cycles_failed, stats.rows_synced
        );
    }
    Ok(())
}

async fn run_verify(connections: &ConnectionManager, tables: &[String]) -> anyhow::Result<()> {
    let results = verify_tables(connections, tables)
        .await
        .context("Failed to verify row counts")?;
    let mismatched = results.iter().filter(|r| !r.matches()).count();
    for result in &results {
        println!(
            "{}: source {} / destination {}{}",
            result.table,
            result.source_rows,
            result.destination_rows,
            if result.matches() { "" } else { "  MISMATCH" }
        );
    }
    if mismatched > 0 {
        bail!("{mismatched} table(s) have mismatched row counts");
    }
    Ok(())
}
