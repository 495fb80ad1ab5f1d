// Knowledge-graph orchestration backend CLI
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;

// Macro for conditional printing based on quiet flag
macro_rules! qprintln {
    ($quiet:expr, $($arg:tt)*) => {
        if !$quiet {
            println!($($arg)*);
        }
    };
}

use kgraph_orchestrator::artifact_store::ParquetArtifactStore;
use kgraph_orchestrator::contracts::ArtifactStore;
use kgraph_orchestrator::metrics_cache::MetricsCache;
use kgraph_orchestrator::search_gateway::{SearchGateway, SubprocessSearchBackend};
use kgraph_orchestrator::supervisor::Supervisor;
use kgraph_orchestrator::topology::TopologyProjector;
use kgraph_orchestrator::upload_intake::UploadIntake;
use kgraph_orchestrator::{
    create_server, init_logging_with_level, start_server, with_trace_id, AppState, Config,
    IndexerSettings,
};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Orchestration backend for a local knowledge-graph retrieval system",
    long_about = None,
    after_help = "QUICK START:
  1. Start the backend:   kgraph-orchestrator serve
  2. Upload a corpus file via POST /api/files/upload
  3. Trigger indexing via POST /api/indexing/start
  4. Query via POST /api/search/global or /api/search/local

EXAMPLES:
  kgraph-orchestrator serve --port 8000
  kgraph-orchestrator reload
  kgraph-orchestrator doctor"
)]
struct Cli {
    /// Enable verbose logging (DEBUG level). Default is INFO level.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all non-essential output (ERROR level logging only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server (default when no subcommand is given)
    Serve,

    /// Force an artifact-store reload without restarting the process
    Reload,

    /// Print resolved configuration and artifact-generation status, then exit
    Doctor,
}

async fn build_state(config: Arc<Config>) -> Result<AppState> {
    let store = Arc::new(ParquetArtifactStore::new(config.output_dir()));
    let cache = Arc::new(MetricsCache::new(store.clone()));
    let supervisor = Arc::new(Supervisor::new(
        config.data_dir.clone(),
        config.output_dir(),
        config.indexer_bin.clone(),
        store.clone(),
        cache.clone(),
        config.index_timeout,
    ));
    let intake = Arc::new(UploadIntake::new(config.input_dir(), supervisor.clone()));
    let backend = Arc::new(SubprocessSearchBackend::new(
        config.indexer_bin.clone(),
        config.data_dir.clone(),
    ));
    let search = Arc::new(SearchGateway::new(
        backend,
        store.clone(),
        config.search_timeout,
    ));
    let topology = Arc::new(TopologyProjector::new(store.clone()));

    Ok(AppState {
        store,
        cache,
        supervisor,
        intake,
        search,
        topology,
        config,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = init_logging_with_level(cli.verbose, cli.quiet);
    let quiet = cli.quiet;

    with_trace_id("kgraph-orchestrator-cli", async move {
        let config = Arc::new(Config::from_env().context("failed to load configuration")?);

        match cli.command.unwrap_or(Commands::Serve) {
            Commands::Serve => {
                let _settings = IndexerSettings::load(&config.settings_path)
                    .unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "failed to load indexer settings, using defaults");
                        IndexerSettings::default()
                    });

                qprintln!(quiet, "Starting knowledge-graph orchestration backend on port {}", config.port);
                qprintln!(quiet, "Data directory: {}", config.data_dir.display());
                qprintln!(quiet, "API endpoints:");
                qprintln!(quiet, "   GET    /                       - Status");
                qprintln!(quiet, "   POST   /api/files/upload       - Upload corpus file");
                qprintln!(quiet, "   GET    /api/files              - List uploaded files");
                qprintln!(quiet, "   DELETE /api/files/:id          - Delete uploaded file");
                qprintln!(quiet, "   POST   /api/indexing/start     - Start indexing job");
                qprintln!(quiet, "   GET    /api/indexing/status    - Indexing job status");
                qprintln!(quiet, "   POST   /api/search/global      - Global search");
                qprintln!(quiet, "   POST   /api/search/local       - Local search");
                qprintln!(quiet, "   GET    /api/statistics         - Graph statistics");
                qprintln!(quiet, "   GET    /api/graph/topology     - Graph topology view");
                if !quiet {
                    println!();
                }

                let state = build_state(config).await?;
                start_server(state).await?;
            }

            Commands::Reload => {
                let state = build_state(config).await?;
                state.store.reload().await.context("artifact reload failed")?;
                state.cache.invalidate();
                let generation = state.store.current_generation();
                qprintln!(quiet, "Reloaded artifacts. Current generation: {generation}");
            }

            Commands::Doctor => {
                let settings = IndexerSettings::load(&config.settings_path).ok();
                let state = build_state(config.clone()).await?;
                let generation = state.store.current_generation();

                println!("Configuration:");
                println!("  data_dir:             {}", config.data_dir.display());
                println!("  settings_path:        {}", config.settings_path.display());
                println!("  port:                 {}", config.port);
                println!("  cors_origin:          {}", config.cors_origin);
                println!("  indexer_bin:          {}", config.indexer_bin);
                println!("  index_timeout_secs:   {}", config.index_timeout.as_secs());
                println!("  search_timeout_secs:  {}", config.search_timeout.as_secs());
                println!();
                println!("Artifact generation:   {generation}");
                println!("Indexer settings:      {}", if settings.is_some() { "loaded" } else { "unavailable, using defaults" });
            }
        }

        Ok(())
    })
    .await
}
