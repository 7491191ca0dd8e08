//! Command-line surface (spec.md §6: "A single binary accepts at minimum:
//! `--config <path>`, `--log-level <level>`").

use std::path::PathBuf;

use clap::Parser;

use crate::config::LogLevel;

#[derive(Debug, Parser)]
#[command(name = "orchestrator", about = "Process orchestrator")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long)]
    pub config: PathBuf,

    /// Overrides the configured log level.
    #[arg(long, value_enum)]
    pub log_level: Option<CliLogLevel>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum CliLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<CliLogLevel> for LogLevel {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Debug => LogLevel::Debug,
            CliLogLevel::Info => LogLevel::Info,
            CliLogLevel::Warn => LogLevel::Warn,
            CliLogLevel::Error => LogLevel::Error,
        }
    }
}
