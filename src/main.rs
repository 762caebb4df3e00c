use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use scholarnet::cache::{MokaSearchCache, SearchCache};
use scholarnet::catalog::Catalog;
use scholarnet::config::Config;
use scholarnet::embedding::EmbeddingProvider;
use scholarnet::embedding::local::LocalEmbeddingProvider;
use scholarnet::embedding::openai::OpenAIEmbeddingProvider;
use scholarnet::logging;
use scholarnet::search::{Bm25Params, LexicalIndex, SearchRequest};
use scholarnet::semantic::SemanticSearch;
use scholarnet::semantic::chroma::ChromaSemanticSearch;
use scholarnet::server::CatalogService;
use scholarnet::store::{InMemoryPaperStore, PaperStore, PostgresPaperStore};
use rmcp::ServiceExt;

#[derive(Parser)]
#[command(name = "scholarnet", version, about = "Research paper catalog with hybrid search, served over MCP")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Skip automatic database migration on startup
    #[arg(long)]
    skip_migrate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations and exit
    Migrate,
    /// Build the lexical index from the database and print its statistics
    Reindex,
    /// Embed papers missing from the vector collection and upsert them
    SyncVectors,
    /// Run one hybrid search and print the results as JSON
    Search {
        /// Query text
        query: String,
        /// Number of results (defaults to search.default_size)
        #[arg(long)]
        size: Option<usize>,
        /// Semantic channel weight (defaults to search.bert_weight)
        #[arg(long)]
        bert_weight: Option<f64>,
        /// Citation signal weight (defaults to search.citation_weight)
        #[arg(long)]
        citation_weight: Option<f64>,
    },
}

/// Create the paper store based on configuration.
async fn create_store(config: &Config, run_migrations: bool) -> Result<Arc<dyn PaperStore>> {
    match config.store.backend.as_str() {
        "memory" => {
            tracing::info!("Using in-memory paper store");
            Ok(Arc::new(InMemoryPaperStore::new()))
        }
        "postgres" => {
            let store = PostgresPaperStore::new(&config.database_url, run_migrations)
                .await
                .context("Failed to initialize database")?;
            tracing::info!("PostgreSQL store initialized");
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("Unknown store backend '{}': expected 'postgres' or 'memory'", other),
    }
}

/// Create the embedding provider based on configuration.
async fn create_embedding_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.semantic.embedding_provider.as_str() {
        "openai" => {
            let api_key = config.semantic.openai_api_key.clone()
                .ok_or_else(|| anyhow::anyhow!(
                    "OpenAI API key required when embedding provider is 'openai'. \
                     Set SCHOLARNET_SEMANTIC__OPENAI_API_KEY or semantic.openai_api_key in scholarnet.toml"
                ))?;
            Ok(Arc::new(OpenAIEmbeddingProvider::new(api_key)?))
        }
        "local" => Ok(Arc::new(LocalEmbeddingProvider::new(&config.semantic.cache_dir).await?)),
        other => anyhow::bail!("Unknown embedding provider '{}': expected 'local' or 'openai'", other),
    }
}

/// Create the semantic channel, or None when disabled.
///
/// A provider that fails to start disables the channel rather than the server.
async fn create_semantic(config: &Config) -> Option<Arc<dyn SemanticSearch>> {
    if !config.semantic.enabled {
        tracing::info!("Semantic search disabled via config (semantic.enabled=false)");
        return None;
    }
    match create_embedding_provider(config).await {
        Ok(embedder) => {
            tracing::info!(
                chroma_url = %config.semantic.chroma_url,
                collection = %config.semantic.collection,
                model = embedder.model_name(),
                "Semantic search enabled"
            );
            Some(Arc::new(ChromaSemanticSearch::new(&config.semantic, embedder)))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to initialize embedding provider, semantic search disabled");
            None
        }
    }
}

async fn create_catalog(config: &Config, run_migrations: bool) -> Result<Arc<Catalog>> {
    let store = create_store(config, run_migrations).await?;
    let index = Arc::new(LexicalIndex::new(Bm25Params {
        k1: config.index.k1,
        b: config.index.b,
    }));
    let semantic = create_semantic(config).await;
    let cache: Option<Arc<dyn SearchCache>> = if config.cache.enabled {
        Some(Arc::new(MokaSearchCache::from_config(&config.cache)))
    } else {
        None
    };

    let catalog = Catalog::new(store, index, semantic, cache, config.search.clone())
        .with_sync_batch_size(config.semantic.sync_batch_size);
    Ok(Arc::new(catalog))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Config error (using defaults): {}", e);
        Config::default()
    });

    // Logging goes to stderr only; stdout is reserved for JSON-RPC
    logging::init_logging(&config);

    let run_migrations = config.store.run_migrations && !cli.skip_migrate;

    match cli.command {
        Some(Commands::Migrate) => {
            tracing::info!("Running database migrations...");
            PostgresPaperStore::new(&config.database_url, true)
                .await
                .context("Failed to connect and run migrations")?;
            println!("Migrations completed successfully.");
        }
        Some(Commands::Reindex) => {
            let catalog = create_catalog(&config, run_migrations).await?;
            let stats = catalog.rebuild().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Some(Commands::SyncVectors) => {
            let catalog = create_catalog(&config, run_migrations).await?;
            let report = catalog.sync_vectors().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some(Commands::Search { query, size, bert_weight, citation_weight }) => {
            let catalog = create_catalog(&config, run_migrations).await?;
            catalog.rebuild().await?;

            let request = SearchRequest {
                query,
                size: size.unwrap_or(config.search.default_size),
                bert_weight: bert_weight.unwrap_or(config.search.bert_weight),
                citation_weight: citation_weight.unwrap_or(config.search.citation_weight),
            };
            let response = catalog.search(&request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        None => {
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "scholarnet server starting");

            let catalog = create_catalog(&config, run_migrations).await?;

            // Serve even if the first build fails; search reports the index as not ready
            if let Err(e) = catalog.rebuild().await {
                tracing::error!(error = %e, "Initial index build failed, call reindex to retry");
            }

            let service = CatalogService::new(catalog);

            let (stdin, stdout) = rmcp::transport::io::stdio();
            let server = service.serve((stdin, stdout)).await?;

            tracing::info!("scholarnet server running, awaiting tool calls via stdio");

            server.waiting().await?;

            tracing::info!("scholarnet server stopped");
        }
    }

    Ok(())
}
