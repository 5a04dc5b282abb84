//! Docket - real-time change streams for the client portal
//!
//! Main entry point for the Docket CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{config, record, start};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Docket - real-time change streams for the client portal
#[derive(Parser)]
#[command(name = "docket")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// User config directory (default: ~/.config/docket)
    #[arg(long, global = true, env = "DOCKET_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the change stream server
    Start(start::StartArgs),

    /// Write a portal record so open streams pick it up
    Record(record::RecordArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

const CRATES: [&str; 5] = [
    "docket",
    "docket_feed",
    "docket_store",
    "docket_server",
    "docket_config",
];

fn directives(level: &str, fallback: &str) -> String {
    let mut parts: Vec<String> = CRATES.iter().map(|c| format!("{c}={level}")).collect();
    parts.push(fallback.to_string());
    parts.join(",")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = docket_config::load_config_with_options(None, cli.config_dir.as_deref())?;
    let logging = loaded.config.logging();

    // Console (human-readable) + rotating JSON file
    let console_filter = if cli.verbose {
        directives("debug", "info")
    } else {
        directives(&logging.level, "warn")
    };

    use tracing_subscriber::prelude::*;
    let console = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_filter(tracing_subscriber::EnvFilter::new(console_filter));

    let (file, _guard) = if logging.json_file {
        let log_dir = loaded.log_dir().unwrap_or_else(|| PathBuf::from("logs"));
        let file_appender = tracing_appender::rolling::daily(&log_dir, "docket.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(tracing_subscriber::EnvFilter::new(directives(
                "trace", "info",
            )));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry().with(console).with(file).init();

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let ctx = commands::Context {
        loaded,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Start(args) => start::run(args, &ctx).await,
        Commands::Record(args) => record::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
