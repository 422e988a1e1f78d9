//! docbase entry point.
//!
//! `docbase init` applies the metadata schema; `docbase serve` wires the
//! adapters together and runs the HTTP service. All components are built
//! here, at the composition root, from the loaded configuration.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use docbase::blob::S3BlobStore;
use docbase::config;
use docbase::content::estimator_for;
use docbase::db;
use docbase::embedder::HttpEmbedder;
use docbase::migrate;
use docbase::parser::HttpParser;
use docbase::pipeline::{Coordinator, PipelineContext};
use docbase::search_index::{HttpSearchIndex, SearchIndex};
use docbase::server::{self, AppState};

#[derive(Parser)]
#[command(
    name = "docbase",
    about = "docbase — a self-hosted retrieval-augmented knowledge service",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/docbase.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the metadata store schema
    Init,

    /// Run the HTTP service
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Metadata store initialized successfully.");
        }
        Commands::Serve => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;

            let blob = Arc::new(S3BlobStore::new(&cfg.blob_store).context("blob store init")?);
            let parser = Arc::new(HttpParser::new(&cfg.parser).context("parser init")?);
            let embedder = Arc::new(HttpEmbedder::new(&cfg.embedding).context("embedder init")?);
            let index: Arc<dyn SearchIndex> = Arc::new(
                HttpSearchIndex::new(&cfg.search_index, cfg.embedding.dimension)
                    .context("search index init")?,
            );

            index
                .ensure_index()
                .await
                .context("search index bootstrap")?;

            let ctx = PipelineContext::new(
                pool.clone(),
                blob,
                parser,
                embedder.clone(),
                Arc::clone(&index),
                &cfg,
            );
            let coordinator = Coordinator::start(ctx, cfg.pipeline.workers);

            let estimator = Arc::from(estimator_for(&cfg.content.tokenizer));

            let state = AppState {
                config: Arc::new(cfg),
                pool,
                coordinator,
                index,
                embedder,
                estimator,
            };

            server::run_server(state).await?;
        }
    }

    Ok(())
}
