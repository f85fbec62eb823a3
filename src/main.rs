//! camlapse
//!
//! Captures a still frame from a network camera on a fixed cadence, batches
//! the frames, and turns every full batch into a timestamped video.

mod batch;
mod capture;
mod config;
mod logging;
mod media;
mod scheduler;

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use config::Config;
use media::FfmpegTool;
use scheduler::{create_scheduler_channels, Scheduler, SchedulerCommand};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = logging::init_logging()?;

    info!("camlapse starting...");

    // Load configuration
    let config = Config::load()?;
    let config_path = config.config_path()?;
    info!("Configuration loaded from {:?}", config_path);

    if let Err(e) = config.validate() {
        error!("Invalid configuration in {:?}: {:#}", config_path, e);
        std::process::exit(1);
    }

    if let Err(e) = config.ensure_directories() {
        error!("Cannot use output directories: {:#}", e);
        std::process::exit(1);
    }

    info!(
        "Source {} -> frames in {:?}, videos in {:?}",
        config.redacted_source_url(),
        config.storage.frame_directory,
        config.storage.video_directory
    );

    let tool = Arc::new(FfmpegTool::from_config(&config)?);

    // Create tokio runtime for async operations
    let runtime = tokio::runtime::Runtime::new()?;

    let (cmd_tx, cmd_rx, status_tx, _status_rx) = create_scheduler_channels();
    let mut scheduler = Scheduler::new(&config, tool, cmd_rx, status_tx);

    // Ctrl+C lets the in-flight capture or encode finish, then stops
    let ctrl_c_tx = cmd_tx.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        let _ = ctrl_c_tx.try_send(SchedulerCommand::Shutdown);
    })?;

    runtime.block_on(scheduler.run());

    drop(cmd_tx);
    info!("Shutdown complete");
    Ok(())
}

fn print_help() {
    println!("camlapse - network camera frame batcher");
    println!();
    println!("USAGE:");
    println!("    camlapse [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help    Print this help message");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG            Set log level (e.g., debug, info, warn)");
    println!("    CAMLAPSE_CONFIG     Path to config.toml (default: platform config dir)");
    println!("    CAMLAPSE_LOG_PATH   Directory for log files");
    match logging::log_dir() {
        Ok(dir) => println!("\nLogs are written to {}", dir.display()),
        Err(_) => println!("\nLog directory could not be determined"),
    }
}
