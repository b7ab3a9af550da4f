//! CLI definition

use clap::Parser;
use std::path::PathBuf;

/// datalens - coordination runtime for a data-exploration server
#[derive(Debug, Parser)]
#[command(
    name = "datalens",
    about = "Coordination runtime for an interactive data-exploration server",
    version,
    after_help = "The supervisor port and secret are read from CONNECTION_PORT and CONNECTION_AUTHKEY."
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, help = "Log level (overrides config)")]
    pub log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, help = "Write logs to a file instead of stderr")]
    pub log_file: Option<PathBuf>,
}
