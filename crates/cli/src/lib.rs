use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use lookalike_catalog::{ImageSource, JsonCatalogStore};
use lookalike_indexer::IndexBuilder;
use lookalike_search::{ProductSearch, QueryEngine, SearchRequest};
use lookalike_vector_store::{
    load_artifacts, read_header, EmbeddingBackend, EmbeddingCache, IndexStore, LocalEngine,
};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

mod config;
mod report;

pub use config::{LookalikeConfig, CONFIG_ENV, CONFIG_FILE_NAME};
use report::{print_stdout, Meta, Response};

#[derive(Parser)]
#[command(name = "lookalike")]
#[command(about = "Find catalog items that look like a given product image", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file (default: $LOOKALIKE_CONFIG, then ./lookalike.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Catalog JSON file
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Directory holding the index artifacts and embedding cache
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Index artifact path (overrides --data-dir)
    #[arg(long, global = true)]
    index_path: Option<PathBuf>,

    /// Mapping artifact path (overrides --data-dir)
    #[arg(long, global = true)]
    mapping_path: Option<PathBuf>,

    /// Embedding backend
    #[arg(long, global = true, value_enum)]
    embed_backend: Option<BackendArg>,

    /// Local inference engine
    #[arg(long, global = true, value_enum)]
    embed_mode: Option<EngineArg>,

    /// Model directory for the local ONNX engine
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Base URL of the remote inference service
    #[arg(long, global = true)]
    remote_url: Option<String>,

    /// Disable the on-disk embedding cache
    #[arg(long, global = true)]
    no_cache: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendArg {
    Local,
    Remote,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EngineArg {
    Onnx,
    Stub,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from the catalog and publish it
    Build(BuildArgs),

    /// Find catalog items similar to an image (and optional text)
    Search(SearchArgs),

    /// Show the header of the published index and check the artifact pair
    Inspect,
}

#[derive(Args)]
struct BuildArgs {
    /// Index only the first N catalog items
    #[arg(long)]
    sample_size: Option<usize>,

    /// Number of trees in the forest
    #[arg(long)]
    trees: Option<usize>,

    /// Maximum items per leaf
    #[arg(long)]
    leaf_size: Option<usize>,

    /// Parallel embedding workers
    #[arg(long)]
    concurrency: Option<usize>,
}

#[derive(Args)]
struct SearchArgs {
    /// Query image: URL or file path
    #[arg(long)]
    image: Option<String>,

    /// Optional text describing the product
    #[arg(long)]
    text: Option<String>,

    /// Number of results
    #[arg(long, short = 'k')]
    k: Option<usize>,
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    // ORT is extremely noisy
    if !cli.verbose {
        builder.filter_module("ort", log::LevelFilter::Off);
    }
    builder.target(env_logger::Target::Stderr).init();

    let started = Instant::now();
    let mut meta = Meta::default();
    let outcome = match resolve_config(&cli) {
        Ok((config, path)) => {
            meta.config_path = path.map(|p| p.display().to_string());
            run(cli.command, config).await
        }
        Err(err) => Err(err),
    };
    meta.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let response = match outcome {
        Ok(data) => Response::ok(data, meta),
        Err(err) => {
            log::error!("{err:#}");
            Response::error(&err, meta)
        }
    };
    print_stdout(&serde_json::to_string_pretty(&response)?)?;
    let code = response.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// File, then environment, then flags.
fn resolve_config(cli: &Cli) -> Result<(LookalikeConfig, Option<PathBuf>)> {
    let (mut config, path) = LookalikeConfig::load(cli.config.as_deref())?;
    config.apply_env(|name| std::env::var(name).ok())?;

    if let Some(catalog) = &cli.catalog {
        config.catalog = catalog.clone();
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(path) = &cli.index_path {
        config.index_path = Some(path.clone());
    }
    if let Some(path) = &cli.mapping_path {
        config.mapping_path = Some(path.clone());
    }
    if let Some(backend) = cli.embed_backend {
        config.embedding.backend = match backend {
            BackendArg::Local => EmbeddingBackend::Local,
            BackendArg::Remote => EmbeddingBackend::Remote,
        };
    }
    if let Some(mode) = cli.embed_mode {
        config.set_local_engine(match mode {
            EngineArg::Onnx => LocalEngine::Onnx,
            EngineArg::Stub => LocalEngine::Stub,
        });
    }
    if let Some(dir) = &cli.model_dir {
        config.embedding.local.model_dir = dir.clone();
    }
    if let Some(url) = &cli.remote_url {
        config.embedding.remote.url = url.clone();
    }
    if cli.no_cache {
        config.cache.enabled = false;
    }
    if let Commands::Build(args) = &cli.command {
        if let Some(n) = args.sample_size {
            config.build.sample_size = Some(n);
        }
        if let Some(trees) = args.trees {
            config.build.trees = trees;
        }
        if let Some(leaf) = args.leaf_size {
            config.build.leaf_size = leaf;
        }
        if let Some(n) = args.concurrency {
            config.build.concurrency = Some(n);
        }
    }
    config.validate()?;
    Ok((config, path))
}

async fn run(command: Commands, config: LookalikeConfig) -> Result<Value> {
    match command {
        Commands::Build(_) => run_build(&config).await,
        Commands::Search(args) => run_search(args, &config).await,
        Commands::Inspect => run_inspect(&config).await,
    }
}

async fn run_build(config: &LookalikeConfig) -> Result<Value> {
    let catalog = JsonCatalogStore::open(&config.catalog)
        .await
        .with_context(|| format!("Failed to open catalog {}", config.catalog.display()))?;
    let embedder = config.joint_embedder()?;
    let images = config.catalog_images()?;

    let store = IndexStore::new();
    let report = IndexBuilder::new(Arc::new(catalog), embedder, Arc::new(images))
        .with_options(config.build_options())
        .rebuild(&store, &config.artifact_paths())
        .await?;

    if config.cache.enabled && config.cache.max_bytes > 0 {
        EmbeddingCache::new(config.cache_dir())
            .prune(config.cache.max_bytes)
            .await;
    }
    eprintln!(
        "Indexed {} of {} items ({} skipped) in {}ms",
        report.indexed,
        report.attempted,
        report.skipped_count(),
        report.elapsed_ms
    );
    Ok(serde_json::to_value(report)?)
}

async fn run_search(args: SearchArgs, config: &LookalikeConfig) -> Result<Value> {
    let request = SearchRequest {
        image: args.image.as_deref().map(ImageSource::from_reference),
        text: args.text,
        k: args.k.unwrap_or(config.search.k),
    };
    // Reject bad input before loading models or artifacts.
    request.validate()?;

    let paths = config.artifact_paths();
    let store = Arc::new(IndexStore::new());
    let index = store
        .load(&paths)
        .await
        .with_context(|| format!("Failed to load index {}", paths.index.display()))?;
    let catalog = JsonCatalogStore::open(&config.catalog)
        .await
        .with_context(|| format!("Failed to open catalog {}", config.catalog.display()))?;
    let embedder = config.joint_embedder()?;
    let fingerprint = embedder.provider().fingerprint();
    if fingerprint != index.meta().provider {
        log::warn!(
            "Index {} was built with '{}' but queries use '{}'",
            index.build_id(),
            index.meta().provider,
            fingerprint
        );
    }

    let engine = QueryEngine::new(store, Arc::new(catalog));
    let search = ProductSearch::new(engine, embedder, Arc::new(config.query_images()?));
    let response = search.search(&request).await?;
    Ok(serde_json::to_value(response)?)
}

#[derive(Serialize)]
struct InspectOutput {
    index_path: String,
    mapping_path: String,
    #[serde(flatten)]
    header: lookalike_vector_store::IndexHeader,
    mapping_count: usize,
}

async fn run_inspect(config: &LookalikeConfig) -> Result<Value> {
    let paths = config.artifact_paths();
    let header = read_header(&paths.index)
        .await
        .with_context(|| format!("Failed to read index header {}", paths.index.display()))?;
    // Full load validates the pairing, not just the header.
    let published = load_artifacts(&paths).await?;
    Ok(serde_json::to_value(InspectOutput {
        index_path: paths.index.display().to_string(),
        mapping_path: paths.mapping.display().to_string(),
        header,
        mapping_count: published.mapping().len(),
    })?)
}
