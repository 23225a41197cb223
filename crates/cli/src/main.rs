//! Administrative CLI for docvault.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use docvault_core::config::AppConfig;
use docvault_core::storage_key::StorageKey;
use docvault_core::stored_file::LegacyHint;
use docvault_metadata::models::AuditFilter;
use docvault_storage::{ExportFormat, Resolution, Vault, VerifyOutcome};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Serialize;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_CONFIG: &str = "docvault.toml";

#[derive(Parser)]
#[command(name = "docvaultctl")]
#[command(about = "Administrative CLI for docvault")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(long, global = true, env = "DOCVAULT_CONFIG", default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Actor recorded in the audit log (default: audit.system_actor)
    #[arg(long, global = true, env = "DOCVAULT_ACTOR")]
    actor: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file and print its storage key
    Store {
        /// File to store
        file: PathBuf,
        /// Name to record (default: the file's name)
        #[arg(long)]
        name: Option<String>,
        /// Owning record to point at the new file
        #[arg(long)]
        owner: Option<String>,
    },
    /// Locate a stored file, repairing its primary copy if needed
    Resolve {
        #[command(flatten)]
        target: ResolveTarget,
        /// Write the file's content here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace a stored file's content, keeping the old revision
    Update {
        /// Storage key to replace
        key: String,
        /// File holding the new content
        file: PathBuf,
    },
    /// Delete a stored file, its copies and its versions
    Delete {
        /// Storage key to delete
        key: String,
    },
    /// Show the recorded metadata of a storage key
    Info {
        /// Storage key
        key: String,
    },
    /// List retained revisions of a storage key
    Versions {
        /// Storage key
        key: String,
    },
    /// Verify checksums and repair what can be repaired
    Verify {
        /// Verify only this storage key
        #[arg(long, conflicts_with = "limit")]
        key: Option<String>,
        /// Maximum number of entries to check (default: maintenance.verify_limit)
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Move owning records onto the current storage layout
    Migrate {
        /// Records to attempt (default: maintenance.migrate_batch_size)
        #[arg(long)]
        batch_size: Option<u32>,
        /// Continue after this record id (default: where the previous batch stopped)
        #[arg(long)]
        after: Option<String>,
        /// Examine every record, starting from the first
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Remove unreferenced files from the managed tree
    Sweep {
        /// Report what would be deleted without deleting
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Storage and index statistics
    Stats,
    /// Audit log commands
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ResolveTarget {
    /// Storage key
    key: Option<String>,
    /// Owning record id
    #[arg(long)]
    record: Option<String>,
    /// Legacy file name
    #[arg(long)]
    legacy: Option<String>,
}

#[derive(Subcommand)]
enum AuditCommands {
    /// Recompute record hashes and check the chain
    Verify {
        /// Only check records about this subject
        #[arg(long)]
        subject: Option<String>,
    },
    /// List records
    List {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Export records to a file
    Export {
        /// Destination file
        #[arg(short, long)]
        output: PathBuf,
        /// Output format
        #[arg(long, value_enum, default_value_t = ExportFormatArg::Json)]
        format: ExportFormatArg,
        #[command(flatten)]
        filter: FilterArgs,
    },
}

/// Audit export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormatArg {
    /// JSON lines
    Json,
    /// Comma-separated values
    Csv,
}

impl From<ExportFormatArg> for ExportFormat {
    fn from(arg: ExportFormatArg) -> Self {
        match arg {
            ExportFormatArg::Json => ExportFormat::JsonLines,
            ExportFormatArg::Csv => ExportFormat::Csv,
        }
    }
}

#[derive(Args, Clone, Default)]
struct FilterArgs {
    /// Records at or after this RFC 3339 time
    #[arg(long)]
    since: Option<String>,
    /// Records at or before this RFC 3339 time
    #[arg(long)]
    until: Option<String>,
    /// Only records by this actor
    #[arg(long)]
    by: Option<String>,
    /// Only this operation (store, retrieve, repair, verify, migrate, update, delete)
    #[arg(long)]
    operation: Option<String>,
    /// Only this result (success, failure)
    #[arg(long)]
    result: Option<String>,
    /// Only records about this subject
    #[arg(long)]
    subject: Option<String>,
    /// Maximum number of records
    #[arg(long)]
    limit: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli.config)?;
    let actor = cli
        .actor
        .clone()
        .unwrap_or_else(|| config.audit.system_actor.clone());
    let vault = docvault_storage::from_config(&config)
        .await
        .context("failed to open vault")?;
    let out = Output { json: cli.json };

    match cli.command {
        Commands::Store { file, name, owner } => {
            handle_store_command(&vault, &actor, &out, &file, name, owner).await
        }
        Commands::Resolve { target, output } => {
            handle_resolve_command(&vault, &actor, &out, target, output).await
        }
        Commands::Update { key, file } => {
            handle_update_command(&vault, &actor, &out, &key, &file).await
        }
        Commands::Delete { key } => handle_delete_command(&vault, &actor, &out, &key).await,
        Commands::Info { key } => handle_info_command(&vault, &out, &key).await,
        Commands::Versions { key } => handle_versions_command(&vault, &out, &key).await,
        Commands::Verify { key, limit } => {
            handle_verify_command(&vault, &actor, &out, key, limit).await
        }
        Commands::Migrate {
            batch_size,
            after,
            all,
        } => handle_migrate_command(&vault, &actor, &out, batch_size, after, all).await,
        Commands::Sweep { dry_run } => handle_sweep_command(&vault, &actor, &out, dry_run).await,
        Commands::Stats => handle_stats_command(&vault, &out).await,
        Commands::Audit { command } => handle_audit_command(&vault, &out, command).await,
    }
}

/// Load configuration from an optional TOML file merged with `DOCVAULT_` variables.
fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if path.exists() {
        tracing::debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        let has_env_config = std::env::vars().any(|(key, _)| {
            key.starts_with("DOCVAULT_") && key != "DOCVAULT_CONFIG" && key != "DOCVAULT_ACTOR"
        });
        if !has_env_config {
            anyhow::bail!(
                "No configuration provided.\n\n\
                 Provide configuration via one of:\n  \
                 1. Config file: docvaultctl --config /path/to/docvault.toml\n  \
                 2. Environment variables: DOCVAULT_STORAGE__ROOT=/srv/docvault \
                 DOCVAULT_METADATA__PATH=/srv/docvault/docvault.db docvaultctl stats"
            );
        }
    }

    let config: AppConfig = figment
        .merge(
            Env::prefixed("DOCVAULT_")
                .ignore(&["config", "actor"])
                .split("__"),
        )
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;
    Ok(config)
}

struct Output {
    json: bool,
}

impl Output {
    /// Print `value` as JSON, or run `human` to print it for people.
    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human(value);
        }
        Ok(())
    }
}

fn parse_key(key: &str) -> Result<StorageKey> {
    StorageKey::parse(key).with_context(|| format!("invalid storage key: {key}"))
}

async fn handle_store_command(
    vault: &Vault,
    actor: &str,
    out: &Output,
    file: &Path,
    name: Option<String>,
    owner: Option<String>,
) -> Result<()> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let name = match name {
        Some(name) => name,
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("file path has no file name; pass --name")?,
    };

    let stored = vault.store(actor, &data, &name, owner.as_deref()).await?;
    out.emit(&stored, |stored| {
        println!("Stored: {}", stored.storage_key);
        println!("  Path: {}", stored.primary_path.display());
        for backup in &stored.backup_paths {
            println!("  Backup: {}", backup.display());
        }
        println!("  Size: {}", format_bytes(stored.size_bytes));
        println!("  Type: {}", stored.content_type);
        if let Some(checksum) = &stored.checksum {
            println!("  SHA-256: {checksum}");
        }
    })
}

async fn handle_resolve_command(
    vault: &Vault,
    actor: &str,
    out: &Output,
    target: ResolveTarget,
    output: Option<PathBuf>,
) -> Result<()> {
    let result = match target {
        ResolveTarget { key: Some(key), .. } => vault.resolve(actor, &parse_key(&key)?).await,
        ResolveTarget {
            record: Some(record),
            ..
        } => vault.resolve_record(actor, &record).await,
        ResolveTarget {
            legacy: Some(name), ..
        } => vault.resolve_legacy(actor, &LegacyHint::new(name)).await,
        _ => anyhow::bail!("one of KEY, --record, or --legacy is required"),
    };
    let resolution = result.map_err(|e| {
        let unavailable = e.is_unavailable();
        let err = anyhow::Error::new(e);
        if unavailable {
            err.context("file is unavailable")
        } else {
            err
        }
    })?;

    if let Some(path) = &output {
        tokio::fs::write(path, &resolution.content)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    out.emit(&resolution, print_resolution)?;
    if let Some(path) = output
        && !out.json
    {
        println!("Content written to: {}", path.display());
    }
    Ok(())
}

fn print_resolution(resolution: &Resolution) {
    println!("Path: {}", resolution.path.display());
    println!("  Tier: {:?}", resolution.tier);
    if let Some(key) = &resolution.storage_key {
        println!("  Storage key: {key}");
    }
    if resolution.repaired {
        println!("  Repaired from: {}", resolution.found_at.display());
    } else if resolution.found_at != resolution.path {
        println!("  Found at: {}", resolution.found_at.display());
    }
}

async fn handle_update_command(
    vault: &Vault,
    actor: &str,
    out: &Output,
    key: &str,
    file: &Path,
) -> Result<()> {
    let key = parse_key(key)?;
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    let stored = vault.update(actor, &key, &data).await?;
    out.emit(&stored, |stored| {
        println!("Updated: {key} -> {}", stored.storage_key);
        println!("  Path: {}", stored.primary_path.display());
        println!("  Size: {}", format_bytes(stored.size_bytes));
    })
}

async fn handle_delete_command(vault: &Vault, actor: &str, out: &Output, key: &str) -> Result<()> {
    let report = vault.delete(actor, &parse_key(key)?).await?;
    out.emit(&report, |report| {
        println!("Deleted: {}", report.storage_key);
        println!("  Files removed: {}", report.files_removed);
        println!("  Versions removed: {}", report.versions_removed);
        println!("  Records cleared: {}", report.records_cleared);
        for error in &report.errors {
            println!("  Error: {error}");
        }
    })
}

async fn handle_info_command(vault: &Vault, out: &Output, key: &str) -> Result<()> {
    let stored = vault.describe(&parse_key(key)?).await?;
    out.emit(&stored, |stored| {
        println!("Storage key: {}", stored.storage_key);
        println!("  Name: {}", stored.original_name);
        println!("  Type: {}", stored.content_type);
        println!("  Size: {}", format_bytes(stored.size_bytes));
        match &stored.checksum {
            Some(checksum) => println!("  SHA-256: {checksum}"),
            None => println!("  SHA-256: (not recorded)"),
        }
        println!("  Primary: {}", stored.primary_path.display());
        for backup in &stored.backup_paths {
            println!("  Backup: {}", backup.display());
        }
        match stored.last_verified_at {
            Some(at) => println!("  Last verified: {at}"),
            None => println!("  Last verified: never"),
        }
    })
}

async fn handle_versions_command(vault: &Vault, out: &Output, key: &str) -> Result<()> {
    let versions = vault.versions(&parse_key(key)?).await?;
    out.emit(&versions, |versions| {
        if versions.is_empty() {
            println!("No versions found.");
            return;
        }
        println!("{:<6} {:<52} {:>12} Archived", "ID", "Previous key", "Size");
        println!("{}", "-".repeat(100));
        for version in versions {
            println!(
                "{:<6} {:<52} {:>12} {}",
                version.version_id,
                version.previous_key,
                format_bytes(version.size_bytes.max(0) as u64),
                version
                    .archived_at
                    .format(&Rfc3339)
                    .unwrap_or_else(|_| version.archived_at.to_string())
            );
        }
    })
}

async fn handle_verify_command(
    vault: &Vault,
    actor: &str,
    out: &Output,
    key: Option<String>,
    limit: Option<u32>,
) -> Result<()> {
    if let Some(key) = key {
        let outcome = vault.verify_one(actor, &parse_key(&key)?).await?;
        out.emit(&outcome, |outcome| match outcome {
            VerifyOutcome::Ok => println!("{key}: ok"),
            VerifyOutcome::Repaired => println!("{key}: repaired"),
            VerifyOutcome::Skipped => println!("{key}: skipped (migrated)"),
            VerifyOutcome::Failed(reason) => println!("{key}: FAILED ({reason})"),
        })?;
        if matches!(outcome, VerifyOutcome::Failed(_)) {
            anyhow::bail!("verification failed");
        }
        return Ok(());
    }

    let report = vault.verify_all(actor, limit).await?;
    out.emit(&report, |report| {
        println!("Verification:");
        println!("  Checked: {}", report.checked());
        println!("  Ok: {}", report.ok_count);
        println!("  Repaired: {}", report.repaired_count);
        println!("  Failed: {}", report.failed_count);
        println!("  Skipped: {}", report.skipped_count);
        for failure in &report.failures {
            println!("  {}: {}", failure.storage_key, failure.reason);
        }
    })?;
    if report.failed_count > 0 {
        anyhow::bail!("{} entries failed verification", report.failed_count);
    }
    Ok(())
}

async fn handle_migrate_command(
    vault: &Vault,
    actor: &str,
    out: &Output,
    batch_size: Option<u32>,
    after: Option<String>,
    all: bool,
) -> Result<()> {
    let mut cursor = after;
    let mut failed = 0;
    loop {
        let report = match (&cursor, all) {
            // Plain runs pick up where the previous batch stopped.
            (None, false) => vault.migrate_batch(actor, batch_size).await?,
            _ => {
                vault
                    .migrate_batch_after(actor, batch_size, cursor.as_deref())
                    .await?
            }
        };
        let report_path = vault
            .write_migration_report(&report)
            .await
            .context("failed to write migration report")?;
        failed += report.failed;

        out.emit(&report, |report| {
            println!("Migration batch:");
            println!("  Attempted: {}", report.total);
            println!("  Migrated: {}", report.migrated);
            println!("  Failed: {}", report.failed);
            println!("  Already current: {}", report.already_current);
            for failure in &report.errors {
                println!("  {}: {}", failure.record_id, failure.reason);
            }
            match &report.next_cursor {
                Some(next) => println!("  Continue with: --after {next}"),
                None => println!("  All records examined."),
            }
            if let Some(path) = &report_path {
                println!("  Report: {}", path.display());
            }
        })?;

        cursor = report.next_cursor;
        if !all || cursor.is_none() {
            break;
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} records failed to migrate");
    }
    Ok(())
}

async fn handle_sweep_command(
    vault: &Vault,
    actor: &str,
    out: &Output,
    dry_run: bool,
) -> Result<()> {
    let report = vault.sweep_orphans(actor, dry_run).await?;
    out.emit(&report, |report| {
        if report.dry_run {
            println!("Orphan sweep (dry run):");
        } else {
            println!("Orphan sweep:");
        }
        println!("  Files scanned: {}", report.scanned);
        println!("  Orphans: {}", report.orphans);
        println!("  Deleted: {}", report.deleted);
        println!("  Kept (within grace period): {}", report.kept_recent);
        println!("  Bytes reclaimed: {}", format_bytes(report.bytes_reclaimed));
        for error in &report.errors {
            println!("  Error: {error}");
        }
    })
}

async fn handle_stats_command(vault: &Vault, out: &Output) -> Result<()> {
    let stats = vault.stats().await?;
    out.emit(&stats, |stats| {
        println!("Storage Statistics:");
        println!("  Indexed entries: {}", stats.index.entries);
        println!("  Indexed size: {}", format_bytes(stats.index.total_bytes));
        println!("  Unrecoverable: {}", stats.index.unrecoverable);
        println!("  Migrated: {}", stats.index.migrated);
        println!(
            "  Originals: {} files, {}",
            stats.originals.files,
            format_bytes(stats.originals.bytes)
        );
        println!(
            "  Backups: {} files, {}",
            stats.backups.files,
            format_bytes(stats.backups.bytes)
        );
        println!(
            "  Versions: {} files, {}",
            stats.versions.files,
            format_bytes(stats.versions.bytes)
        );
    })
}

async fn handle_audit_command(vault: &Vault, out: &Output, command: AuditCommands) -> Result<()> {
    match command {
        AuditCommands::Verify { subject } => {
            let report = vault.audit().verify_chain(subject.as_deref()).await?;
            out.emit(&report, |report| {
                println!("Audit chain:");
                println!("  Verified: {}", report.verified_count);
                println!("  Tampered: {}", report.tampered_count);
                for id in &report.tampered_records {
                    println!("    record {id}");
                }
                if !report.broken_links.is_empty() {
                    println!("  Broken links: {}", report.broken_links.len());
                    for id in &report.broken_links {
                        println!("    record {id}");
                    }
                }
            })?;
            if !report.is_intact() {
                anyhow::bail!("audit log has been tampered with");
            }
        }
        AuditCommands::List { filter } => {
            let records = vault.audit().list(&build_filter(&filter)?).await?;
            out.emit(&records, |records| {
                if records.is_empty() {
                    println!("No audit records found.");
                    return;
                }
                println!(
                    "{:<8} {:<28} {:<10} {:<9} {:<16} Subject",
                    "ID", "Timestamp", "Operation", "Result", "Actor"
                );
                println!("{}", "-".repeat(110));
                for record in records {
                    println!(
                        "{:<8} {:<28} {:<10} {:<9} {:<16} {}",
                        record.id,
                        record.timestamp,
                        record.operation,
                        record.result,
                        record.actor_id,
                        record.subject_key
                    );
                }
            })?;
        }
        AuditCommands::Export {
            output,
            format,
            filter,
        } => {
            let summary = vault
                .audit()
                .export(&build_filter(&filter)?, &output, format.into())
                .await?;
            out.emit(&summary, |summary| {
                println!(
                    "Exported {} records to {}",
                    summary.records,
                    summary.path.display()
                );
                if summary.tampered > 0 {
                    println!("  {} records failed integrity checks", summary.tampered);
                }
            })?;
        }
    }
    Ok(())
}

fn build_filter(args: &FilterArgs) -> Result<AuditFilter> {
    Ok(AuditFilter {
        start: args.since.as_deref().map(parse_time).transpose()?,
        end: args.until.as_deref().map(parse_time).transpose()?,
        actor_id: args.by.clone(),
        operation: args.operation.clone(),
        result: args.result.clone(),
        subject_key: args.subject.clone(),
        after_id: None,
        limit: args.limit,
    })
}

fn parse_time(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339)
        .with_context(|| format!("invalid RFC 3339 time: {value}"))
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    const TB: u64 = 1024 * GB;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} bytes")
    }
}
