//! CLI entry point for the insight backend (for dev and testing).

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use insight_core::{
    app_data_dir, load_config, scan_sources, set_sources_root, source_documents, status, Config,
    IndexStatus, IngestMode, MetadataValue, OllamaClient, OpenOutcome, RagContext, RagError,
    SearchOutcome, Settings,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "insight")]
#[command(about = "insight: ask questions about your indexed data")]
struct Cli {
    /// Index directory (overrides config).
    #[arg(long, global = true, value_name = "DIR")]
    index_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show backend and index status.
    Status,
    /// Show where insight stores its config and index (app data directory).
    DataDir,
    /// Set the default sources directory used when PATH is omitted.
    SetRoot {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Scan a directory for text sources and list them.
    Scan {
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },
    /// Chunk, embed and index every text source under a directory.
    Ingest {
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
        /// Rebuild the index from these sources alone.
        #[arg(long)]
        replace: bool,
    },
    /// Answer a question from the indexed data.
    Ask {
        #[arg(value_name = "QUESTION")]
        question: String,
    },
    /// Show the documents most similar to a query.
    Search {
        #[arg(value_name = "QUERY")]
        query: String,
        /// Number of results (defaults to config `top_k`).
        #[arg(short, long)]
        k: Option<usize>,
        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Load and validate the persisted index.
    Validate,
    /// Delete the persisted index.
    Clear,
    /// Rebuild the index from a directory whenever its files change.
    Watch {
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },
    /// List installed Ollama models and the ones insight would use.
    Models,
}

#[derive(Serialize)]
struct Hit<'a> {
    position: u64,
    score: f32,
    id: &'a str,
    content: &'a str,
    metadata: &'a std::collections::BTreeMap<String, MetadataValue>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if matches!(e.downcast_ref::<RagError>(), Some(RagError::RebuildRequired(_))) {
                eprintln!("Run `insight ingest --replace` to rebuild it, or `insight clear`.");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = load_config();
    let index_dir = match cli.index_dir.clone().or_else(|| config.index_path()) {
        Some(dir) => dir,
        None => return Err("could not determine index directory".into()),
    };
    tracing::debug!(index = %index_dir.display(), "using index directory");

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => {
            println!("insight backend");
            println!("  core: {}", status());
            println!("  index: {}", index_dir.display());
            match config.sources_path() {
                Some(root) => println!("  sources: {}", root.display()),
                None => println!("  sources: not set (use `insight set-root <PATH>`)"),
            }
            let mut ctx = offline_context(&config, &index_dir, Settings::from(&config))?;
            match ctx.open() {
                Ok(OpenOutcome::Loaded { total_vectors }) => println!("  vectors: {}", total_vectors),
                Ok(OpenOutcome::NoIndex) => println!("  vectors: none (nothing ingested yet)"),
                Err(e) => println!("  index: {}", e),
            }
        }
        Commands::DataDir => match app_data_dir() {
            Some(p) => println!("{}", p.display()),
            None => eprintln!("Could not determine app data directory."),
        },
        Commands::SetRoot { path } => {
            let root = set_sources_root(&path)?;
            println!("Sources root set to {}", root.display());
        }
        Commands::Scan { path } => {
            let path = sources_root(path, &config)?;
            let sources = scan_sources(&path)?;
            println!("Scanned {} source(s) under {}", sources.len(), path.display());
            for s in sources {
                println!("  {}  {}", s.path.display(), preview(&s.body));
            }
        }
        Commands::Ingest { path, replace } => {
            let path = sources_root(path, &config)?;
            let mut settings = Settings::from(&config);
            if replace {
                settings.ingest_mode = IngestMode::Replace;
            }
            let mut ctx = online_context(&config, &index_dir, settings).await?;
            let sources = scan_sources(&path)?;
            let docs = source_documents(&sources, config.chunk_params());
            let report = ctx.ingest(docs).await?;
            if report.recovered {
                println!("Previous index was corrupt and has been cleared.");
            }
            println!(
                "Indexed {} chunk(s) from {} source(s); index now holds {} vector(s).",
                report.added,
                sources.len(),
                report.total_vectors
            );
        }
        Commands::Ask { question } => {
            let mut ctx = online_context(&config, &index_dir, Settings::from(&config)).await?;
            let answer = ctx.ask(&question).await?;
            println!("{}", answer.text());
        }
        Commands::Search { query, k, json } => {
            let mut ctx = online_context(&config, &index_dir, Settings::from(&config)).await?;
            let outcome = ctx.search_k(&query, k.unwrap_or(config.top_k)).await?;
            print_hits(&outcome, json)?;
        }
        Commands::Validate => {
            let mut ctx = offline_context(&config, &index_dir, Settings::from(&config))?;
            match ctx.validate()? {
                IndexStatus::Active { total_vectors } => println!("Index OK ({} vectors).", total_vectors),
                _ => println!("No index to validate."),
            }
        }
        Commands::Clear => {
            let mut ctx = offline_context(&config, &index_dir, Settings::from(&config))?;
            ctx.clear()?;
            println!("Cleared {}", index_dir.display());
        }
        Commands::Watch { path } => {
            let path = sources_root(path, &config)?;
            watch(&config, &index_dir, &path).await?
        }
        Commands::Models => {
            let client = client(&config)?;
            let installed = client.installed_models().await?;
            println!("Installed models:");
            for m in &installed {
                println!("  {}", m);
            }
            let resolved = client.resolve_models().await?;
            println!("Embedding model:  {}", resolved.embed_model());
            println!("Generation model: {}", resolved.generation_model());
        }
    }
    Ok(())
}

/// PATH if given, otherwise the configured sources root.
fn sources_root(path: Option<PathBuf>, config: &Config) -> Result<PathBuf, Box<dyn Error>> {
    path.or_else(|| config.sources_path())
        .ok_or_else(|| "no PATH given and no sources root set (use `insight set-root <PATH>`)".into())
}

fn client(config: &Config) -> Result<OllamaClient, Box<dyn Error>> {
    Ok(OllamaClient::from_url(&config.ollama_url)?
        .with_embed_model(config.embed_model.clone())
        .with_generation_model(config.generation_model.clone()))
}

/// Context for commands that never reach the models.
fn offline_context(config: &Config, index_dir: &Path, settings: Settings) -> Result<RagContext, Box<dyn Error>> {
    let client = Arc::new(client(config)?);
    Ok(RagContext::new(client.clone(), client, index_dir, settings))
}

/// Context backed by installed models, falling back when configured ones are missing.
async fn online_context(config: &Config, index_dir: &Path, settings: Settings) -> Result<RagContext, Box<dyn Error>> {
    let client = Arc::new(client(config)?.resolve_models().await?);
    Ok(RagContext::new(client.clone(), client, index_dir, settings))
}

async fn watch(config: &Config, index_dir: &Path, root: &Path) -> Result<(), Box<dyn Error>> {
    let settings = Settings {
        ingest_mode: IngestMode::Replace,
        ..Settings::from(config)
    };
    let mut ctx = online_context(config, index_dir, settings).await?;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _watcher = insight_core::watch_sources(root, move |scan| {
        let _ = tx.send(scan);
    })?;

    rebuild(&mut ctx, scan_sources(root), config).await;
    println!("Watching {} (Ctrl+C to stop)", root.display());
    while let Some(scan) = rx.recv().await {
        rebuild(&mut ctx, scan, config).await;
    }
    Ok(())
}

async fn rebuild(
    ctx: &mut RagContext,
    scan: Result<Vec<insight_core::SourceFile>, insight_core::ScanError>,
    config: &Config,
) {
    let sources = match scan {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Scan failed: {}", e);
            return;
        }
    };
    let docs = source_documents(&sources, config.chunk_params());
    match ctx.ingest(docs).await {
        Ok(report) => println!("Rebuilt index: {} vector(s) from {} source(s).", report.total_vectors, sources.len()),
        Err(e @ RagError::CorruptIndex { .. }) => eprintln!("{}", e),
        Err(e) => eprintln!("Rebuild failed (will retry on next change): {}", e),
    }
}

fn print_hits(outcome: &SearchOutcome, json: bool) -> Result<(), Box<dyn Error>> {
    if json {
        let hits: Vec<Hit> = outcome
            .hits()
            .iter()
            .map(|h| Hit {
                position: h.position,
                score: h.score,
                id: h.document.id(),
                content: h.document.content(),
                metadata: h.document.metadata(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if outcome.is_empty_index() {
        println!("The index is empty. Ingest some data first.");
        return Ok(());
    }
    for h in outcome.hits() {
        println!("[{:.3}] #{} {}", h.score, h.position, preview(h.document.content()));
    }
    Ok(())
}

fn preview(text: &str) -> String {
    let first = text.lines().next().unwrap_or("").trim();
    if first.chars().count() > 60 {
        format!("{}...", first.chars().take(60).collect::<String>())
    } else {
        first.to_string()
    }
}
