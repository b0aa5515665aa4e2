use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use sensorhub::agent::{shutdown_signal, Agent};
use sensorhub::config::Config;

/// Environmental sensor collector with rolling daily statistics.
#[derive(Parser)]
#[command(name = "sensorhub", about)]
struct Cli {
    /// Path to the YAML configuration file. Built-in defaults apply when
    /// omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity (trace, debug, info, warn, error). Overrides the
    /// config file.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
    /// Load and validate the configuration, then exit.
    Check,
}

/// Build-time version info.
mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

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

    if let Some(Command::Version) = &cli.command {
        println!("sensorhub {}", version::full());
        return Ok(());
    }

    let cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            let cfg = Config::default();
            cfg.validate().context("validating default config")?;
            cfg
        }
    };

    if let Some(Command::Check) = &cli.command {
        println!("config ok");
        return Ok(());
    }

    let log_level = cli.log_level.as_deref().unwrap_or(&cfg.log_level);
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("invalid log level: {log_level}"))?;

    fmt().with_env_filter(filter).with_target(true).init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting sensorhub",
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(cfg))
}

async fn run(cfg: Config) -> Result<()> {
    let mut agent = Agent::new(cfg)?;
    agent.start().await?;

    agent
        .run_until(async {
            if let Err(e) = shutdown_signal().await {
                tracing::error!(error = %e, "signal handling failed, shutting down");
            }
        })
        .await?;

    tracing::info!("sensorhub stopped");
    Ok(())
}
