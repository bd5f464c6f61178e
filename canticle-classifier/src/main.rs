//! canticle-classifier - Christian/Secular music classification service
//!
//! Loads a trained model bundle, then serves classification of raw audio
//! signals over HTTP. Starts without a model when none can be loaded, in
//! which case /health reports 503 and classify endpoints refuse work.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

use canticle_classifier::{build_router, model::ModelBundle, AppState};
use canticle_common::config::{
    resolve_config_path, write_toml_config, ConfigOverrides, ExtractorStrategy, TomlConfig,
};

/// Command-line arguments for canticle-classifier
#[derive(Parser, Debug)]
#[command(name = "canticle-classifier")]
#[command(about = "Christian/Secular music classification service")]
#[command(version)]
struct Args {
    /// Path to TOML configuration file (falls back to CANTICLE_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CANTICLE_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "CANTICLE_BIND")]
    bind: Option<String>,

    /// Model bundle to load (replaces the configured search list)
    #[arg(short, long, env = "CANTICLE_MODEL")]
    model: Option<PathBuf>,

    /// Feature extractor: "full" or "reduced"
    #[arg(short, long, env = "CANTICLE_EXTRACTOR")]
    extractor: Option<ExtractorStrategy>,

    /// Worker pool size (0 = automatic)
    #[arg(short, long, env = "CANTICLE_WORKERS")]
    workers: Option<usize>,

    /// Log level when RUST_LOG is unset
    #[arg(long, env = "CANTICLE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Write the resolved configuration to this path and exit
    #[arg(long, value_name = "PATH")]
    write_default_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing before loading config so its messages are kept
    let startup_level = args.log_level.clone().unwrap_or_else(|| "info".to_string());
    let (filter, filter_handle) = reload::Layer::new(env_filter(&startup_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting canticle-classifier v{}", env!("CARGO_PKG_VERSION"));

    let config_path = resolve_config_path(args.config.as_deref());
    let mut config = TomlConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;
    config.apply_overrides(ConfigOverrides {
        port: args.port,
        bind_address: args.bind,
        model_path: args.model,
        strategy: args.extractor,
        workers: args.workers,
        log_level: args.log_level,
    });
    config.validate().context("Invalid configuration")?;

    // The file may set a different level than the startup default
    if config.logging.level != startup_level {
        if let Err(e) = filter_handle.reload(env_filter(&config.logging.level)) {
            warn!("Failed to apply log level {}: {}", config.logging.level, e);
        }
    }

    if let Some(path) = args.write_default_config {
        write_toml_config(&config, &path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Wrote configuration to {}", path.display());
        return Ok(());
    }

    info!(
        extractor = %config.extraction.strategy,
        sample_rate = config.extraction.sample_rate,
        duration_secs = config.extraction.duration_secs,
        workers = config.batch.effective_workers(),
        "Pipeline settings"
    );

    let bundle = match ModelBundle::load_first(&config.model.candidates()) {
        Ok(bundle) => Some(bundle),
        Err(e) => {
            error!("No model bundle loaded: {}", e);
            warn!("Serving without a model; classification endpoints return 503");
            None
        }
    };

    let addr = format!("{}:{}", config.bind_address, config.port);
    let state = AppState::new(config, bundle);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// RUST_LOG when set, otherwise `level` for this workspace's crates
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("canticle_classifier={level},canticle_common={level},tower_http={level}").into()
    })
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
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
