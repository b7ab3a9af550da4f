//! datalens - coordination runtime entry point
//!
//! Connects to the supervisor named by the environment and serves until the
//! supervisor hangs up or the process is interrupted.

use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{error, info};

use datalens::analysis::AnalyzerRegistry;
use datalens::cli::Cli;
use datalens::config::Config;
use datalens::datasource::FolderSourceFactory;
use datalens::runtime::{Runtime, RuntimeError};

fn setup_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let level: tracing::Level = level.parse().context(format!("Invalid log level: {}", level))?;
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            let file = fs::File::create(path).context("Failed to create log file")?;
            tracing_subscriber::fmt()
                .with_writer(file)
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
    }

    info!("Logging initialized (level: {})", level);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    setup_logging(level, cli.log_file.as_deref()).context("Failed to setup logging")?;

    info!(
        "datalens loaded config: supervisor={}, max-concurrent={}",
        config.control.host, config.tasks.max_concurrent
    );

    let registry = AnalyzerRegistry::with_builtin(config.analysis.detector.clone(), config.analysis.scratch_dir.clone());
    let runtime = Runtime::start(config, registry, Arc::new(FolderSourceFactory)).await?;

    let shutdown = runtime.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            shutdown.cancel();
        }
    });

    runtime.wait().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.downcast_ref::<RuntimeError>().map(RuntimeError::exit_code).unwrap_or(1);
            error!("{:#}", e);
            eprintln!("datalens: {:#}", e);
            ExitCode::from(code)
        }
    }
}
