use newsvec::cli::{Cli, Commands, ConfigAction};
use newsvec::config::Config;
use newsvec::error::{NewsvecError, Result};
use newsvec::migration::{IndexMigrator, MigrationReport};
use newsvec::runtime::NativeRuntime;
use newsvec::search::{EmbeddingJob, InMemoryNewsRepository, SimilarityService};
use newsvec::store::VectorStore;
use std::path::PathBuf;
use std::sync::Arc;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Migrate { backup_dir } => {
            cmd_migrate(cli.config, backup_dir)?;
        }
        Commands::Init { force } => {
            cmd_init(cli.config, force)?;
        }
        Commands::Status => {
            cmd_status(cli.config)?;
        }
        Commands::Search {
            text,
            stock,
            top_k,
            threshold,
            json,
        } => {
            cmd_search(cli.config, &text, stock, top_k, threshold, json)?;
        }
        Commands::Embed {
            articles,
            batch_size,
        } => {
            cmd_embed(cli.config, &articles, batch_size)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "newsvec=debug" } else { "newsvec=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn cmd_migrate(config_path: Option<PathBuf>, backup_dir: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;

    println!("Index:    {}", config.index_path().display());
    println!("Metadata: {}", config.metadata_path().display());

    let mut migrator = IndexMigrator::from_config(&config, NativeRuntime::new());
    if let Some(dir) = backup_dir {
        migrator = migrator.with_backup_dir(dir);
    }

    match migrator.run()? {
        MigrationReport::AlreadyClustered { vectors } => {
            println!("✓ Index is already clustered ({} vectors); nothing to do", vectors);
        }
        MigrationReport::Migrated {
            vectors,
            dimension,
            nlist,
            backup_index,
            backup_metadata,
            elapsed_ms,
        } => {
            println!("✓ Migration complete ({}ms)", elapsed_ms);
            println!("  Vectors:   {} (dimension {})", vectors, dimension);
            println!("  Clusters:  {}", nlist);
            println!("  Backups:   {}", backup_index.display());
            println!("             {}", backup_metadata.display());
            println!(
                "  Rollback:  cp {} {}",
                backup_index.display(),
                config.index_path().display()
            );
        }
    }

    Ok(())
}

fn cmd_init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let index_path = config.index_path();
    let metadata_path = config.metadata_path();

    if index_path.exists() && !force {
        println!("Index already exists at: {}", index_path.display());
        print_store_summary(&config)?;
        println!("Use --force to replace it with an empty index");
        return Ok(());
    }

    let runtime = NativeRuntime::new();
    let mut store = VectorStore::create_empty(config.embedding.dimension);
    {
        let _guard = runtime.enter();
        store.persist(&index_path, &metadata_path)?;
    }

    println!("✓ Empty index created");
    println!("  Index:     {}", index_path.display());
    println!("  Metadata:  {}", metadata_path.display());
    println!("  Dimension: {}", config.embedding.dimension);

    Ok(())
}

fn cmd_status(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    println!("Index:    {}", config.index_path().display());
    println!("Metadata: {}", config.metadata_path().display());
    print_store_summary(&config)
}

fn print_store_summary(config: &Config) -> Result<()> {
    let runtime = NativeRuntime::new();
    let loaded = {
        let _guard = runtime.enter();
        VectorStore::try_load(
            &config.index_path(),
            &config.metadata_path(),
            config.embedding.dimension,
        )?
    };

    let Some(store) = loaded else {
        println!("No index found. Run 'newsvec init' to create one.");
        return Ok(());
    };

    println!("  Vectors:   {}", store.len());
    println!("  Dimension: {}", store.dimension());
    println!("  Topology:  {}", store.topology());
    if let (Some(nlist), Some(nprobe)) = (store.index().nlist(), store.index().nprobe()) {
        println!("  Clusters:  {} (nprobe {})", nlist, nprobe);
    }
    println!("  Metadata:  {} entries", store.metadata().len());

    if let Some(sample) = store.metadata().first() {
        let published = sample
            .published_at
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  Sample:    article {} / stock '{}' / {}",
            sample.article_id, sample.stock_key, published
        );
    }

    Ok(())
}

fn cmd_search(
    config_path: Option<PathBuf>,
    text: &str,
    stock: Option<String>,
    top_k: Option<usize>,
    threshold: Option<f32>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let top_k = top_k.unwrap_or(config.search.top_k);
    let threshold = threshold.unwrap_or(config.search.similarity_threshold);

    let rt = tokio_runtime()?;
    let service = SimilarityService::shared(|| SimilarityService::from_config(&config));
    let results = rt.block_on(service.search_similar(text, stock.as_deref(), top_k, threshold));

    if json {
        let output = serde_json::to_string_pretty(&results).map_err(|e| NewsvecError::Json {
            source: e,
            context: "Failed to serialize search results".to_string(),
        })?;
        println!("{}", output);
        return Ok(());
    }

    if results.is_empty() {
        println!("No similar news found");
        return Ok(());
    }

    println!("Found {} similar articles:", results.len());
    for (rank, news) in results.iter().enumerate() {
        let stock_key = if news.stock_key.is_empty() {
            "-"
        } else {
            news.stock_key.as_str()
        };
        println!(
            "  {}. article {} (similarity {:.4}, stock {})",
            rank + 1,
            news.news_id,
            news.similarity,
            stock_key
        );
    }

    Ok(())
}

fn cmd_embed(
    config_path: Option<PathBuf>,
    articles: &std::path::Path,
    batch_size: Option<usize>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let batch_size = batch_size.unwrap_or(config.job.batch_size);

    let repository = InMemoryNewsRepository::from_json_file(articles).map_err(anyhow::Error::from)?;
    println!("Loaded {} articles from {}", repository.len(), articles.display());

    let rt = tokio_runtime()?;
    let service = SimilarityService::shared(|| SimilarityService::from_config(&config));
    let job = EmbeddingJob::new(Arc::clone(&service));
    let report = rt
        .block_on(job.run(&repository, batch_size))
        .map_err(anyhow::Error::from)?;

    println!("✓ Embedding run finished");
    println!("  Saved:  {}", report.saved);
    println!("  Failed: {}", report.failed);

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let json = serde_json::to_string_pretty(&config).map_err(|e| NewsvecError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            // Create parent directory
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| NewsvecError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            // Save default config
            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'newsvec config init' to create one."
        );
        return Config::from_env_defaults();
    }

    Config::load(&path)
}

fn tokio_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| NewsvecError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}
