use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "monsti-daemon", version, about = "Monsti CMS daemon")]
struct Cli {
    /// Directory holding monsti.yaml and sites/
    config_dir: PathBuf,

    /// Log for the system logger: no colors, no timestamps
    #[arg(long)]
    syslog: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.syslog);

    let config_dir = std::fs::canonicalize(&cli.config_dir)
        .with_context(|| format!("config directory {} not found", cli.config_dir.display()))?;
    tracing::info!(config = %config_dir.display(), "starting monsti");
    monsti_host::daemon::run(&config_dir, shutdown_signal())
        .await
        .context("monsti failed")?;
    tracing::info!("monsti stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, shutting down...");
        }
        _ = async {
            if let Some(ref mut t) = term { t.recv().await; }
        } => {
            tracing::info!("SIGTERM received, shutting down...");
        }
    }
}

/// `RUST_LOG` wins over the default `info` filter.
fn setup_logging(syslog: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true);
    if syslog {
        builder.with_ansi(false).without_time().init();
    } else {
        builder.init();
    }
}
