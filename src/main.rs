use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chat_log_ingest::config::AppConfig;
use chat_log_ingest::db::SqliteStore;
use chat_log_ingest::file_writer::{write_export, ExportFormat};
use chat_log_ingest::format::CsvFormat;
use chat_log_ingest::logging::{init_logging, OperationTimer};
use chat_log_ingest::progress::ProgressObserver;
use chat_log_ingest::repository::MemoryStore;
use chat_log_ingest::service::{IngestRequest, IngestionService};
use chat_log_ingest::source::read_upload;
use chat_log_ingest::transport::{ChunkedUploader, HttpChunkTransport, HttpUploadClient};
use chat_log_ingest::utils::format_bytes;
use chat_log_ingest::validation::UploadValidator;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (overrides configuration)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also write JSON logs to this file (rotated daily)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a CSV export into the local SQLite store
    Ingest {
        /// CSV file (optionally .csv.gz)
        #[arg(short, long)]
        file: PathBuf,

        /// Owner of the created conversations
        #[arg(short, long)]
        user_id: i64,

        /// Force the CSV format (wrl or rcws) and skip detection
        #[arg(long)]
        format: Option<CsvFormat>,

        /// SQLite database (overrides configuration)
        #[arg(short, long)]
        database: Option<String>,
    },
    /// Upload a CSV export to a remote endpoint
    Upload {
        /// CSV file (optionally .csv.gz)
        #[arg(short, long)]
        file: PathBuf,

        /// Owner of the created conversations
        #[arg(short, long)]
        user_id: i64,

        /// Force the CSV format (wrl or rcws) on the receiving side
        #[arg(long)]
        format: Option<CsvFormat>,

        /// Single-shot upload endpoint (overrides configuration)
        #[arg(long)]
        endpoint: Option<String>,

        /// Chunked upload endpoint (defaults to `<endpoint>-chunk`)
        #[arg(long)]
        chunk_endpoint: Option<String>,

        /// Chunk size in bytes (overrides configuration)
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Normalize a CSV export and write the result without storing it
    Export {
        /// CSV file (optionally .csv.gz)
        #[arg(short, long)]
        file: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        output_format: ExportFormat,

        /// Force the CSV format (wrl or rcws) and skip detection
        #[arg(long)]
        format: Option<CsvFormat>,

        /// Owner recorded on the exported conversations
        #[arg(short, long, default_value = "1")]
        user_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    let level = cli.log_level.clone().unwrap_or_else(|| config.get_log_level());
    let log_file = cli.log_file.clone().or_else(|| config.logging.file_path.as_ref().map(PathBuf::from));
    let _guard = init_logging(Some(&level), log_file.as_deref(), config.logging.format == "json")?;

    info!("Starting chat-log-ingest");

    match cli.command {
        Commands::Ingest {
            file,
            user_id,
            format,
            database,
        } => ingest_file(&config, &file, user_id, format, database).await?,
        Commands::Upload {
            file,
            user_id,
            format,
            endpoint,
            chunk_endpoint,
            chunk_size,
        } => upload_file(&config, &file, user_id, format, endpoint, chunk_endpoint, chunk_size).await?,
        Commands::Export {
            file,
            output,
            output_format,
            format,
            user_id,
        } => export_file(&config, &file, &output, output_format, format, user_id).await?,
    }

    Ok(())
}

fn log_progress() -> Arc<dyn ProgressObserver> {
    Arc::new(|percent: u8, message: &str| info!(percent, "{message}"))
}

/// Ingest a local file into SQLite
async fn ingest_file(
    config: &AppConfig, file: &Path, user_id: i64, format: Option<CsvFormat>, database: Option<String>,
) -> Result<()> {
    let upload = read_upload(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let database_url = database.unwrap_or_else(|| config.get_database_url());
    let store = SqliteStore::new(&database_url, config.store.max_connections)
        .with_context(|| format!("Failed to open store {database_url}"))?;
    info!("Using store at: {}", database_url);

    let service = IngestionService::new(Arc::new(store), config.ingest_options());
    let request = IngestRequest {
        file_name: upload.file_name,
        content: upload.content,
        user_id,
        format_override: format,
    };

    // Ctrl-C stops before the next batch
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current batch");
            on_signal.cancel();
        }
    });

    let timer = OperationTimer::new("ingest");
    match service.ingest_cancellable(&request, log_progress(), &cancel).await {
        Ok(summary) => {
            timer.finish();
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        },
        Err(failure) => {
            eprintln!("{}", serde_json::to_string_pretty(&failure.report())?);
            Err(failure.into())
        },
    }
}

/// Upload a file, chunked when above the single-shot ceiling
async fn upload_file(
    config: &AppConfig, file: &Path, user_id: i64, format: Option<CsvFormat>, endpoint: Option<String>,
    chunk_endpoint: Option<String>, chunk_size: Option<usize>,
) -> Result<()> {
    UploadValidator::validate_user_id(user_id)?;
    let upload = read_upload(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    UploadValidator::validate_file_name(&upload.file_name)?;
    UploadValidator::validate_size(upload.content.len() as u64, config.ingest.max_file_size_bytes)?;

    let endpoint = endpoint.unwrap_or_else(|| config.transport.endpoint.clone());
    let client = Client::new();
    let size = upload.content.len() as u64;

    if size <= config.transport.single_shot_limit_bytes {
        info!("Uploading {} ({}) in one request", upload.file_name, format_bytes(size));
        let receipt = HttpUploadClient::new(client, endpoint)
            .upload(&upload.file_name, upload.content.into_bytes(), user_id)
            .await?;
        println!("{}", serde_json::to_string_pretty(&receipt)?);
        return Ok(());
    }

    let mut settings = config.uploader_settings();
    if let Some(bytes) = chunk_size {
        UploadValidator::validate_chunk_size(bytes)?;
        settings.chunk_size = bytes;
    }
    let chunk_endpoint = chunk_endpoint.unwrap_or_else(|| format!("{endpoint}-chunk"));
    info!("Uploading {} ({}) in chunks to {}", upload.file_name, format_bytes(size), chunk_endpoint);

    let uploader = ChunkedUploader::new(Arc::new(HttpChunkTransport::new(client, chunk_endpoint)), settings);
    let summary = uploader
        .upload(&upload.content, user_id, format, log_progress(), &CancellationToken::new())
        .await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Normalize a file and write what would be stored
async fn export_file(
    config: &AppConfig, file: &Path, output: &Path, output_format: ExportFormat, format: Option<CsvFormat>, user_id: i64,
) -> Result<()> {
    let upload = read_upload(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let service = IngestionService::new(Arc::new(MemoryStore::new()), config.ingest_options());
    let request = IngestRequest {
        file_name: upload.file_name,
        content: upload.content,
        user_id,
        format_override: format,
    };

    let prepared = match service.prepare(&request, log_progress()).await {
        Ok(prepared) => prepared,
        Err(failure) => {
            eprintln!("{}", serde_json::to_string_pretty(&failure.report())?);
            return Err(failure.into());
        },
    };

    write_export(
        prepared.format.tag(),
        &prepared.new_conversations,
        &prepared.messages,
        output_format,
        output,
    )?;
    info!(
        "Exported {} messages in {} conversations to {}",
        prepared.messages.len(),
        prepared.new_conversations.len(),
        output.display()
    );
    Ok(())
}
