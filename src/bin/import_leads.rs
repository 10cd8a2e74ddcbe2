//! Imports a lead spreadsheet from the command line.
//!
//! `--dry-run` runs against an empty in-memory store, which validates the file
//! and shows how its rows deduplicate among themselves without touching the
//! database. Ctrl-C stops after the current row and prints a partial report.

use clap::Parser;
use rust_leads_api::config::Config;
use rust_leads_api::db::Database;
use rust_leads_api::db_storage::{PgAuditLog, PgLeadStore};
use rust_leads_api::error_export::errors_to_csv;
use rust_leads_api::importer::{ImportCancellation, LeadImporter, LookupStrategy};
use rust_leads_api::memory_store::{InMemoryAuditLog, InMemoryLeadStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(about = "Import a lead spreadsheet into the leads database", version)]
struct Args {
    /// Spreadsheet to import (.xlsx, .xls, .xlsb, .ods or .csv).
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Import into an empty in-memory store instead of the database.
    #[arg(long)]
    dry_run: bool,

    /// Write the row errors to this CSV file.
    #[arg(long, value_name = "FILE")]
    errors_csv: Option<PathBuf>,

    /// Admin recorded as the author of the import.
    #[arg(long, value_name = "UUID")]
    imported_by: Option<Uuid>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_leads_api=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let bytes = tokio::fs::read(&args.file).await?;
    let file_name = args
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("arquivo")
        .to_string();

    let importer = if args.dry_run {
        tracing::info!("Dry run: importing into an empty in-memory store");
        LeadImporter::new(
            Arc::new(InMemoryLeadStore::new()),
            Arc::new(InMemoryAuditLog::new()),
        )
        .with_strategy(LookupStrategy::PerRow)
    } else {
        let config = Config::from_env()?;
        let db = Database::new(&config.database_url).await?;
        db.ensure_schema().await?;
        tracing::info!("Connected to database");
        LeadImporter::new(
            Arc::new(PgLeadStore::new(db.pool.clone())),
            Arc::new(PgAuditLog::new(db.pool.clone())),
        )
        .with_strategy(LookupStrategy::from_chunk_size(config.prefetch_chunk))
    };

    let cancel = ImportCancellation::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing current row...");
            on_ctrl_c.cancel();
        }
    });

    let report = importer
        .import_file(bytes, &file_name, args.imported_by, &cancel)
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    tracing::info!("{}", report.summary());

    if let Some(path) = args.errors_csv.as_deref() {
        write_errors_csv(path, &errors_to_csv(&report.erros_detalhes)?).await?;
    }

    Ok(())
}

async fn write_errors_csv(path: &Path, csv: &str) -> anyhow::Result<()> {
    if csv.is_empty() {
        tracing::info!("No row errors, {} not written", path.display());
        return Ok(());
    }
    tokio::fs::write(path, csv).await?;
    tracing::info!("Row errors written to {}", path.display());
    Ok(())
}
