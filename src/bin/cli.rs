//! Memvault CLI
//!
//! Command-line interface for migrations, readiness checks, and data inspection.
//! The HTTP transport that normally fronts the service lives elsewhere; this
//! binary wires the same component stack for operational tasks.

use clap::{Parser, Subcommand};
use memvault::config::Config;
use memvault::database::{
    init_pool, init_pool_for_migrations, migrations, PostgresRepository,
};
use memvault::memory::{
    build_cache, Embedder, EmbeddingBatcher, EmbeddingClient, HeuristicExtractor, MemoryService,
};
use memvault::VERSION;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "memvault",
    version = VERSION,
    about = "Memvault - semantic memory service",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,

    /// Check database connectivity and embedding server readiness
    Validate,

    /// Show per-kind memory counts for a user
    Stats {
        /// User to inspect
        #[arg(long)]
        user_id: String,
        /// Project to include in the counts
        #[arg(long)]
        project_id: Option<String>,
    },

    /// Export a user's memory as JSON
    Export {
        /// User to export
        #[arg(long)]
        user_id: String,
    },
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log.level));

    if config.log.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Wire the full component stack: pool, repository, cache, embedding
/// client, and batcher. Returns the batcher too so callers can stop it.
async fn build_service(config: &Config) -> anyhow::Result<(MemoryService, Arc<EmbeddingBatcher>)> {
    let pool = init_pool(&config.database).await?;
    let repo = Arc::new(PostgresRepository::new(pool, &config.retrieval));

    let cache = build_cache(&config.embedding.cache).await?;
    let client = Arc::new(EmbeddingClient::new(&config.embedding, cache)?);
    if config.validate_on_start {
        client.validate_server().await?;
    }

    let batcher = Arc::new(EmbeddingBatcher::new(
        client,
        config.batcher.batch_size,
        config.batcher.linger(),
    ));

    let service = MemoryService::new(repo, batcher.clone(), Arc::new(HeuristicExtractor));
    Ok((service, batcher))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    config.validate()?;
    init_tracing(&config);

    match cli.command {
        Commands::Migrate => {
            let pool = init_pool_for_migrations(&config.database).await?;
            migrations::run(&pool, config.embedding.dimension).await?;
            info!("Migrations complete");
        }

        Commands::Validate => {
            init_pool(&config.database).await?;
            let cache = build_cache(&config.embedding.cache).await?;
            let client = EmbeddingClient::new(&config.embedding, cache)?;
            client.validate_server().await?;
            println!("Database and embedding server are ready");
        }

        Commands::Stats {
            user_id,
            project_id,
        } => {
            let (service, batcher) = build_service(&config).await?;
            let stats = service.stats(&user_id, project_id.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            batcher.stop().await;
        }

        Commands::Export { user_id } => {
            let (service, batcher) = build_service(&config).await?;
            let export = service.export(&user_id).await?;
            println!("{}", serde_json::to_string_pretty(&export)?);
            batcher.stop().await;
        }
    }

    Ok(())
}
