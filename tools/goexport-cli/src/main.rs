//! GoExport CLI: export legacy movies to video.
//!
//! Usage:
//!   goexport export [OPTIONS]    Record one or more movies and render them
//!   goexport services            List playback services
//!   goexport resolutions         List aspect ratios and resolutions
//!   goexport check               Check tools, display, OBS and services

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use goexport_common::config::{config_file_path, AppConfig};
use goexport_common::shutdown::{signal_exit_code, CleanupRegistry};

mod commands;
mod output;
mod prompt;

#[derive(Parser)]
#[command(
    name = "goexport",
    about = "Export legacy plugin movies to video files",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the per-user location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a movie and turn it into a video
    Export(commands::export::ExportArgs),

    /// List playback services
    Services,

    /// List aspect ratios and their resolutions
    Resolutions,

    /// Check tools, display, OBS and services
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(config_file_path);
    let config = AppConfig::load_from(&config_path);

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    goexport_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Export(args) => {
            let cleanup = CleanupRegistry::new();
            tokio::select! {
                result = commands::export::run(args, config, config_path, cleanup.clone()) => result,
                signo = shutdown_signal() => {
                    eprintln!();
                    tracing::warn!(signal = signo, "Interrupted, releasing recorder and browser");
                    cleanup.run_all().await;
                    std::process::exit(signal_exit_code(signo));
                }
            }
        }
        Commands::Services => commands::list::services(),
        Commands::Resolutions => commands::list::resolutions(),
        Commands::Check => commands::check::run(&config).await,
    }
}

/// Resolves with the number of the first SIGINT/SIGTERM received.
#[cfg(unix)]
async fn shutdown_signal() -> i32 {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut interrupt, mut terminate) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(i), Ok(t)) => (i, t),
        _ => {
            let _ = tokio::signal::ctrl_c().await;
            return 2;
        }
    };
    tokio::select! {
        _ = interrupt.recv() => 2,
        _ = terminate.recv() => 15,
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> i32 {
    let _ = tokio::signal::ctrl_c().await;
    2
}
