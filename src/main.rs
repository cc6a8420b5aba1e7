//! Foundry - project, version and code-task orchestration

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use foundry::{
    api::{build_router, AppState},
    backend::{HttpTaskBackend, TaskBackend, UnconfiguredBackend},
    config::{config_file_path, load_config, save_config, Config, LoggingConfig},
    db::init_database,
    engine::EngineSettings,
    Orchestrator,
};

#[derive(Parser)]
#[command(name = "foundry")]
#[command(author = "Foundry Team")]
#[command(version = "0.1.0")]
#[command(about = "Project, version and code-task orchestration service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Host to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Database path (defaults to <data dir>/foundry/foundry.db)
    #[arg(short, long, env = "FOUNDRY_DATABASE")]
    database: Option<String>,

    /// Number of job workers
    #[arg(short, long)]
    workers: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Foundry server
    Serve,
    /// Initialize the database
    Init,
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config()?;
    init_tracing(&config.logging);

    // Command line flags win over file and environment
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(database) = cli.database {
        config.database.path = Some(database);
    }
    if let Some(workers) = cli.workers {
        config.engine.workers = workers;
    }

    let db_path = config.database.get_path().to_string_lossy().to_string();

    match cli.command {
        Some(Commands::Init) => {
            println!("Initializing database at: {}", db_path);
            let pool = init_database(&db_path).await?;
            pool.close().await;
            println!("Database initialized successfully!");

            if !config_file_path().exists() {
                let path = save_config(&config)?;
                println!("Wrote configuration to: {}", path.display());
            }
            Ok(())
        }
        Some(Commands::Config) => {
            println!("# Config file: {}", config_file_path().display());
            println!("# Database path: {}", db_path);
            println!();
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Some(Commands::Serve) | None => run_server(config, &db_path).await,
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.filter.clone().into());

    tracing_subscriber::registry()
        .with(filter)
        .with(logging.json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!logging.json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

fn build_backend(config: &Config) -> anyhow::Result<Arc<dyn TaskBackend>> {
    if config.backend.endpoint.is_none() {
        tracing::warn!("No backend endpoint configured; jobs will fail with BACKEND_ERROR");
        return Ok(Arc::new(UnconfiguredBackend));
    }

    let backend = HttpTaskBackend::from_config(&config.backend)?;
    tracing::info!(endpoint = backend.endpoint(), "Using HTTP task backend");
    Ok(Arc::new(backend))
}

async fn run_server(config: Config, db_path: &str) -> anyhow::Result<()> {
    tracing::info!("Initializing database at: {}", db_path);
    let pool = init_database(db_path).await?;

    let backend = build_backend(&config)?;
    let orchestrator = Arc::new(Orchestrator::new(
        pool.clone(),
        backend,
        EngineSettings::from(&config.engine),
    ));

    let shutdown = CancellationToken::new();
    let workers = orchestrator.start(shutdown.child_token()).await?;

    let app = build_router(AppState::new(Arc::clone(&orchestrator)), config.server.cors_enabled);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    print_banner(&config, db_path);

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    workers.shutdown().await;
    pool.close().await;
    Ok(())
}

fn print_banner(config: &Config, db_path: &str) {
    println!();
    println!("  FOUNDRY v0.1.0");
    println!("  Project, version and code-task orchestration");
    println!();
    println!("  API:       http://{}:{}/api", config.server.host, config.server.port);
    println!("  Workers:   {}", config.engine.workers.max(1));
    println!("  Database:  {}", db_path);
    println!();
}
