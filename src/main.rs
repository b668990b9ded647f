//! Slider GW - bridge a serial slider box to system and per-app volume.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slider_gw::config::ConfigWatcher;
use slider_gw::paths::AppPaths;
use slider_gw::serial::transport::list_ports_formatted;
use slider_gw::serial::ConnectionState;
use slider_gw::{AppConfig, Engine, ReloadOutcome};

/// Slider GW - route hardware slider positions to application volumes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (created with defaults if missing)
    #[arg(short, long, env = "SLIDER_GW_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available serial ports
    #[arg(long)]
    list_ports: bool,

    /// Print the default configuration and exit
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    if args.list_ports {
        list_ports_formatted();
        return Ok(());
    }

    if args.print_default_config {
        print!("{}", AppConfig::default_yaml()?);
        return Ok(());
    }

    let paths = AppPaths::detect();
    paths.ensure_directories()?;
    let config_path = args.config.clone().unwrap_or_else(|| paths.config.clone());

    let _log_guard = init_logging(&args.log_level, &paths.logs_dir)?;

    info!("Starting Slider GW...");
    info!(
        "Mode: {}",
        if paths.is_portable { "portable" } else { "installed" }
    );
    info!("Configuration file: {}", config_path.display());
    info!("Logs directory: {}", paths.logs_dir.display());

    // Load configuration with hot-reload watcher
    let (config_watcher, initial_config) = ConfigWatcher::new(config_path.clone()).await?;
    info!("Configuration loaded successfully with hot-reload enabled");

    let engine = Engine::from_config(initial_config).context("Invalid initial configuration")?;

    run_app(engine, config_watcher, shutdown_signal()).await?;

    info!("Slider GW shutdown complete");
    Ok(())
}

async fn run_app(
    mut engine: Engine,
    mut config_watcher: ConfigWatcher,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let mut state_rx = engine.subscribe_state();
    engine.start();

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            // Handle config reload
            Some(new_config) = config_watcher.next_config() => {
                info!("📝 Configuration file changed, reloading...");

                match engine.apply_config(new_config).await {
                    Ok(ReloadOutcome::Applied) => info!("✅ Configuration reloaded, serial session restarted"),
                    Ok(ReloadOutcome::Unchanged) => {}
                    Err(e) => warn!("⚠️  Failed to reload config (keeping old config): {}", e),
                }
            }

            // Surface link changes in the log
            Ok(()) = state_rx.changed() => {
                let state = *state_rx.borrow_and_update();
                match state {
                    ConnectionState::Open => info!("✅ Slider device connected"),
                    ConnectionState::Degraded => warn!("🔌 Slider device link lost"),
                    ConnectionState::Opening | ConnectionState::Closed => {}
                }
            }

            // Handle shutdown signal
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    info!("Shutting down...");
    engine.stop().await;

    Ok(())
}

fn init_logging(level: &str, logs_dir: &Path) -> Result<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::daily(logs_dir, "slider-gw.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(file_writer),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
