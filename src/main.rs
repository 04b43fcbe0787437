use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use opcbridge::config::Config;
use opcbridge::health::HealthMetrics;
use opcbridge::poll::PollLoop;
use opcbridge::sink::influx::InfluxClient;
use opcbridge::source::http::HttpSourceClient;
use opcbridge::source::SourceSession;

/// OPC DA to InfluxDB bridge with per-tag change suppression.
#[derive(Parser)]
#[command(name = "opcbridge", about)]
struct Cli {
    /// Path to the YAML configuration file; omitted = environment variables.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info, injected via RUSTFLAGS or the environment.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("opcbridge {}", version::full());
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    // Config file if given, environment otherwise.
    let cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::from_env().context("loading config from environment")?,
    };

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting opcbridge",
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    // Set up signal handling; the engine observes the token between steps.
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    tracing::info!("received SIGINT, shutting down");
                }
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM, shutting down");
                }
            }

            cancel.cancel();
        });
    }

    // Health metrics server, if enabled.
    let health = if cfg.health.enabled {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);
        health
            .start()
            .await
            .context("starting health metrics server")?;
        Some(health)
    } else {
        None
    };

    // Wire up the engine.
    let sink = InfluxClient::new(&cfg.sink).context("creating sink client")?;
    let client = HttpSourceClient::new(&cfg.source).context("creating source client")?;
    let session = SourceSession::new(client, &cfg.source);

    let mut engine = PollLoop::new(&cfg, session, sink, health.clone(), cancel.clone());
    let result = engine.run().await;

    if let Some(health) = &health {
        health.stop();
    }

    tracing::info!("opcbridge stopped");

    result
}
