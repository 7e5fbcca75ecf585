use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use campus_chat::config::{AppConfig, Backend, VectorBackend};
use campus_chat::indexer::extractor::extract_text;
use campus_chat::indexer::walker::{walk_directory, SupportedFormat};
use campus_chat::indexer::Ingestor;
use campus_chat::queue::postgres::PgQueue;
use campus_chat::store::postgres::PgStore;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Ingest a directory of .txt, .md and .pdf files into the knowledge base")]
struct Args {
    /// Directory to recursively ingest
    #[arg(short, long, env = "INGEST_DIR")]
    dir: PathBuf,

    /// Prefix added to every document title (titles default to the file stem)
    #[arg(long, default_value = "")]
    title_prefix: String,

    /// List the files that would be ingested without touching any store
    #[arg(long)]
    dry_run: bool,
}

fn document_title(path: &Path, prefix: &str) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().replace(&['_', '-'][..], " "))
        .unwrap_or_default();
    format!("{}{}", prefix, stem.trim())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    campus_chat::init_tracing();

    let args = Args::parse();

    if !args.dir.exists() {
        anyhow::bail!("Directory does not exist: {}", args.dir.display());
    }

    println!("Scanning directory: {}", args.dir.display());
    let files = walk_directory(&args.dir);
    println!("Found {} supported files", files.len());

    if args.dry_run {
        for (path, format) in &files {
            println!("  {:?}  {}  ->  {}", format, path.display(), document_title(path, &args.title_prefix));
        }
        return Ok(());
    }
    if files.is_empty() {
        println!("No supported files found. Exiting.");
        return Ok(());
    }

    let config = AppConfig::load()?;
    require_durable_backends(&config)?;

    println!("Connecting to database...");
    let store = Arc::new(PgStore::connect(&config.database_url).await?);
    store.init_schema().await?;
    let queue = Arc::new(PgQueue::new(store.pool().clone()));
    queue.init_schema().await?;

    println!("Connecting to vector index at {}...", config.qdrant_url);
    let index = config.vector_index().await?;

    let ingestor = Ingestor::new(
        config.embedding_provider()?,
        index,
        store,
        queue,
        config.ingest_settings(),
    );

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut success_count = 0usize;
    let mut total_chunks = 0usize;
    let mut failed_files: Vec<(PathBuf, String)> = Vec::new();

    for (path, format) in &files {
        pb.set_message(format!("{}", path.file_name().unwrap_or_default().to_string_lossy()));

        match process_file(&ingestor, path, *format, &args.title_prefix).await {
            Ok(chunk_count) => {
                success_count += 1;
                total_chunks += chunk_count;
            }
            Err(e) => {
                tracing::warn!("Failed to ingest {}: {}", path.display(), e);
                failed_files.push((path.clone(), format!("{}", e)));
            }
        }

        pb.inc(1);
    }

    pb.finish_with_message("done");

    println!("\nIngestion complete!");
    println!("  Files ingested: {}/{}", success_count, files.len());
    println!("  Files failed:   {}", failed_files.len());
    println!("  Total chunks:   {}", total_chunks);
    println!("  Collection:     {}", config.collection_name);

    if !failed_files.is_empty() {
        println!("\nFailed files:");
        for (path, err) in &failed_files {
            println!("  {}: {}", path.display(), err);
        }
    }

    Ok(())
}

async fn process_file(
    ingestor: &Ingestor,
    path: &Path,
    format: SupportedFormat,
    title_prefix: &str,
) -> Result<usize> {
    let owned = path.to_path_buf();
    let text = tokio::task::spawn_blocking(move || extract_text(&owned, format)).await??;

    let filename = path.file_name().map(|f| f.to_string_lossy().to_string());
    let reply = ingestor
        .ingest(
            &document_title(path, title_prefix),
            format.document_type(),
            &text,
            filename.as_deref(),
        )
        .await?;

    Ok(reply.chunk_count as usize)
}

/// Anything ingested into a memory backend is gone when this process exits.
fn require_durable_backends(config: &AppConfig) -> Result<()> {
    if config.store_backend == Backend::Memory {
        anyhow::bail!("Ingesting into the memory store would be discarded on exit; use postgres");
    }
    if config.vector_backend == VectorBackend::Memory {
        anyhow::bail!("Ingesting into the memory vector index would be discarded on exit; use qdrant");
    }
    Ok(())
}
