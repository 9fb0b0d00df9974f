//! `jobsink` command line.
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use jobsink_infra::cache::{CacheBackend, RedisCache};
use jobsink_infra::connection::ConnectionManager;
use jobsink_infra::connection::postgres::PostgresDialer;
use jobsink_infra::connection::redis::RedisDialer;
use jobsink_infra::dedup::DedupGate;
use jobsink_infra::document_store::{DocumentStore, PostgresDocumentStore};
use jobsink_infra::export::export_collection;
use jobsink_infra::pipeline::IngestPipeline;
use jobsink_infra::source::load_records;
use jobsink_infra::store::IdempotentStore;
use jobsink_infra::Settings;

#[derive(Parser)]
#[command(name = "jobsink")]
#[command(about = "Deduplicating ingestion of crawled job postings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest crawl files into the document store
    Ingest {
        /// Run/source identifier; names the seen-set
        #[arg(long)]
        source: String,

        /// Crawl files (`{"jobs": [{"data": {...}}]}`)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Export a collection as CSV
    Export {
        #[arg(long)]
        out: PathBuf,

        /// Defaults to JOBSINK_COLLECTION
        #[arg(long)]
        collection: Option<String>,
    },

    /// Check that both backends are reachable
    Check,
}

#[derive(Serialize)]
struct ExportReport {
    collection: String,
    path: PathBuf,
    rows: usize,
}

#[derive(Serialize)]
struct CheckReport {
    redis: BackendStatus,
    postgres: BackendStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "error")]
enum BackendStatus {
    Live,
    Unavailable(String),
}

impl BackendStatus {
    fn from_result<E: std::fmt::Display>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => BackendStatus::Live,
            Err(e) => BackendStatus::Unavailable(e.to_string()),
        }
    }

    fn is_live(&self) -> bool {
        matches!(self, BackendStatus::Live)
    }
}

/// Both backends, each behind one shared connection manager.
struct Backends {
    cache: Arc<RedisCache>,
    store: Arc<PostgresDocumentStore>,
}

impl Backends {
    fn new(settings: &Settings) -> Self {
        let redis = ConnectionManager::with_timeout(RedisDialer::new(&settings.redis_url), settings.connect_timeout);
        let postgres = ConnectionManager::with_timeout(
            PostgresDialer::new(&settings.database_url)
                .with_max_connections(settings.pg_max_connections)
                .with_acquire_timeout(settings.operation_timeout),
            settings.connect_timeout,
        );

        Self {
            cache: Arc::new(RedisCache::new(Arc::new(redis)).with_operation_timeout(settings.operation_timeout)),
            store: Arc::new(
                PostgresDocumentStore::new(Arc::new(postgres)).with_operation_timeout(settings.operation_timeout),
            ),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn ingest(settings: &Settings, source: &str, files: &[PathBuf]) -> Result<ExitCode> {
    let backends = Backends::new(settings);
    let records = load_records(files);
    info!(source, files = files.len(), records = records.len(), "ingest starting");

    let mut pipeline = IngestPipeline::new(
        DedupGate::new(backends.cache.clone()).with_namespace_template(&settings.seen_set_template),
        IdempotentStore::with_key_field(backends.store.clone(), &settings.unique_key),
        &settings.collection,
    );

    let stats = pipeline
        .run(source, records)
        .await
        .context("ingest aborted")?;
    print_json(&stats)?;
    Ok(ExitCode::SUCCESS)
}

async fn export(settings: &Settings, out: PathBuf, collection: Option<String>) -> Result<ExitCode> {
    let backends = Backends::new(settings);
    let collection = collection.unwrap_or_else(|| settings.collection.clone());

    let exported = export_collection(backends.store.as_ref(), &collection, &out).await;
    backends.store.release().await;

    let rows = exported.with_context(|| format!("failed to export {collection}"))?;
    print_json(&ExportReport {
        collection,
        path: out,
        rows,
    })?;
    Ok(ExitCode::SUCCESS)
}

async fn check(settings: &Settings) -> Result<ExitCode> {
    let backends = Backends::new(settings);

    let report = CheckReport {
        redis: BackendStatus::from_result(backends.cache.ping().await),
        postgres: BackendStatus::from_result(backends.store.ping().await),
    };
    backends.cache.release().await;
    backends.store.release().await;

    print_json(&report)?;
    if report.redis.is_live() && report.postgres.is_live() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    jobsink_observability::init();

    let cli = Cli::parse();
    let settings = Settings::from_env().context("invalid configuration")?;

    match cli.command {
        Commands::Ingest { source, files } => ingest(&settings, &source, &files).await,
        Commands::Export { out, collection } => export(&settings, out, collection).await,
        Commands::Check => check(&settings).await,
    }
}
