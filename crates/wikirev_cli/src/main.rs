//! Command-line entry point for the rollback core.
//!
//! # Responsibility
//! - Print the linked core version when run without a subcommand.
//! - Roll one document back in a SQLite database file.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use wikirev_core::db::open_db;
use wikirev_core::{
    core_version, default_log_level, init_logging, DocumentId, RollbackConfig, RollbackOutcome,
    RollbackService, SqliteAttachmentHistory, SqliteAttachmentTrash, SqliteDocumentStore,
    SqliteSavePipeline,
};

/// Document revision rollback tool.
#[derive(Parser, Debug)]
#[command(name = "wikirev", version, about)]
struct Cli {
    /// Absolute directory for rotated log files; logging is off when unset.
    #[arg(long, env = "WIKIREV_LOG_DIR", global = true)]
    log_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "WIKIREV_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the linked core version.
    Version,
    /// Roll a document back to a saved revision.
    Rollback(RollbackArgs),
}

#[derive(Args, Debug)]
struct RollbackArgs {
    /// SQLite database file.
    db_path: PathBuf,
    /// Document reference, `wiki:Space.Page`.
    document: DocumentId,
    /// Target revision label, e.g. `1.1`.
    version: String,
    /// User recorded as author of the new revision.
    actor: String,
    /// TOML file with rollback switches.
    #[arg(long, env = "WIKIREV_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, log_dir).context("failed to start logging")?;
    }

    match cli.command {
        None | Some(Command::Version) => {
            println!("wikirev_core version={}", core_version());
        }
        Some(Command::Rollback(args)) => {
            let outcome = run_rollback(&args)?;
            let report = &outcome.report;
            println!(
                "document={} new_version={}",
                args.document, outcome.document.version
            );
            println!(
                "trashed={:?} reverted={:?} restored={:?} dropped={:?} kept_in_place={:?}",
                report.trashed, report.reverted, report.restored, report.dropped, report.kept_in_place
            );
        }
    }
    Ok(())
}

fn run_rollback(args: &RollbackArgs) -> anyhow::Result<RollbackOutcome> {
    let config = match &args.config {
        Some(path) => RollbackConfig::from_path(path)?,
        None => RollbackConfig::default(),
    };
    let conn = open_db(&args.db_path)
        .with_context(|| format!("failed to open `{}`", args.db_path.display()))?;

    let service = RollbackService::new(
        SqliteDocumentStore::try_new(&conn)?,
        SqliteAttachmentHistory::try_new(&conn)?,
        SqliteAttachmentTrash::try_new(&conn)?,
        SqliteSavePipeline::try_new(&conn)?,
    )
    .with_config(config);

    let outcome = service
        .rollback_to(&args.document, &args.version, &args.actor)
        .with_context(|| format!("rollback of {} to {} failed", args.document, args.version))?;
    Ok(outcome)
}
