//! mls-cxr - chest radiograph intake service
//!
//! Accepts received objects, stores each as a normalized 16-bit raster and
//! runs inference once a study has been quiet for the configured delay.

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use mls_common::config::{self, TomlConfig};
use mls_common::ArtifactLayout;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mls_cxr::db::SqliteStudyStore;
use mls_cxr::inference::build_model;
use mls_cxr::services::{
    DelayedExecutor, EventDispatcher, ExecutorConfig, ImageMaterializer, KeyResolver,
    StudyPipeline,
};
use mls_cxr::{build_router, AppState};

const MODULE_NAME: &str = "mls-cxr";

/// Command-line arguments for mls-cxr
///
/// Every flag overrides the matching TOML setting.
#[derive(Parser, Debug)]
#[command(name = "mls-cxr")]
#[command(about = "Chest radiograph intake and inference service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "MLS_CONFIG")]
    config: Option<PathBuf>,

    /// Output root for study artifacts
    #[arg(short, long, env = "MLS_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "MLS_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "MLS_PORT")]
    port: Option<u16>,

    /// Application entity title
    #[arg(long, env = "MLS_AE_TITLE")]
    ae_title: Option<String>,

    /// Quiet period before a study is processed, in seconds
    #[arg(long, env = "MLS_DELAY")]
    delay: Option<f64>,

    /// Time between scheduler sweeps, in seconds
    #[arg(long, env = "MLS_INTERVAL")]
    interval: Option<f64>,

    /// Log level for mls crates (RUST_LOG takes precedence)
    #[arg(long, env = "MLS_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut TomlConfig) {
        if let Some(root) = &self.root_folder {
            config.root_folder = Some(root.clone());
        }
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ae_title) = &self.ae_title {
            config.server.ae_title = ae_title.clone();
        }
        if let Some(delay) = self.delay {
            config.scheduler.delay_secs = delay;
        }
        if let Some(interval) = self.interval {
            config.scheduler.interval_secs = interval;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = config::load_or_default(args.config.as_deref(), MODULE_NAME)
        .context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging.level, config.logging.file.as_deref())?;

    info!("Starting {} v{}", MODULE_NAME, env!("CARGO_PKG_VERSION"));

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &config);
    let layout = ArtifactLayout::new(&root_folder);
    layout
        .ensure_root()
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let model = build_model(&config.inference).context("Failed to initialize inference backend")?;
    let mut pipeline = StudyPipeline::new(layout.clone(), model);

    if config.database.enabled {
        let db_path = config.database.resolve_path(&root_folder);
        info!("Database: {}", db_path.display());
        let pool = mls_common::db::init_database(&db_path)
            .await
            .context("Failed to open study database")?;
        pipeline = pipeline.with_store(Arc::new(SqliteStudyStore::new(pool)));
    } else {
        info!("Study record persistence disabled");
    }

    let executor = Arc::new(DelayedExecutor::new(ExecutorConfig::from(&config.scheduler)));
    let sweep = executor.start();

    let dispatcher = Arc::new(EventDispatcher::new(
        KeyResolver::new(layout.clone()),
        ImageMaterializer::new(layout),
        Arc::clone(&executor),
        Arc::new(pipeline),
    ));

    let state = AppState::new(dispatcher, config.server.ae_title.clone());
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!("{} listening on http://{}", config.server.ae_title, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    executor.shutdown();
    if let Some(sweep) = sweep {
        if let Err(e) = sweep.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Install the global subscriber, writing to `log_file` when configured
fn init_tracing(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "mls_cxr={0},mls_common={0},tower_http={0}",
            level
        ))
    });
    let registry = tracing_subscriber::registry().with(filter);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => registry.with(fmt::layer()).init(),
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
