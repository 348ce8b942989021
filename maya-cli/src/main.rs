use clap::Parser;
use indicatif::MultiProgress;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod config;
mod error;
mod processor;
mod utils;

use cli::{CliArgs, Command};
use config::ProgramConfig;
use error::AppError;
use utils::progress::ProgressManager;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        // Log the full error for debugging
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    // Parse command-line arguments
    let args = CliArgs::parse();

    let _log_guard = init_logging(&args)?;

    info!("███╗   ███╗ █████╗ ██╗   ██╗ █████╗ ");
    info!("████╗ ████║██╔══██╗╚██╗ ██╔╝██╔══██╗");
    info!("██╔████╔██║███████║ ╚████╔╝ ███████║");
    info!("██║╚██╔╝██║██╔══██║  ╚██╔╝  ██╔══██║");
    info!("██║ ╚═╝ ██║██║  ██║   ██║   ██║  ██║");
    info!("╚═╝     ╚═╝╚═╝  ╚═╝   ╚═╝   ╚═╝  ╚═╝");
    info!("");
    info!("HLS Stream Downloader v{}", env!("CARGO_PKG_VERSION"));
    info!("==================================================================");

    match args.command {
        Command::Download(download) => {
            let program_config = ProgramConfig::from_args(&download)?;

            // Create a progress manager based on show_progress flag
            let multi = MultiProgress::new();
            let progress_manager = if program_config.show_progress {
                ProgressManager::new(multi)
            } else {
                ProgressManager::new_disabled(multi)
            };

            let token = CancellationToken::new();
            let on_signal = token.clone();
            tokio::spawn(async move {
                let ctrl_c = || async { tokio::signal::ctrl_c().await.is_ok() };
                if watch_interrupts(ctrl_c, on_signal).await {
                    std::process::exit(INTERRUPTED_EXIT_CODE);
                }
            });

            processor::process_download(program_config, args.verbose, progress_manager, token)
                .await?;
        }
    }

    Ok(())
}

/// Conventional status for a process ended by SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// The first interrupt cancels the job. Returns `true` when a second one
/// arrives and the process should exit without waiting for cleanup.
async fn watch_interrupts<F, Fut>(mut next_interrupt: F, token: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    if !next_interrupt().await {
        return false;
    }
    warn!("Interrupt received, stopping after in-flight requests are aborted (press Ctrl-C again to force exit)");
    token.cancel();

    if !next_interrupt().await {
        return false;
    }
    warn!("Second interrupt received, exiting immediately");
    true
}

/// Console subscriber plus an optional plain-text file sink.
/// The returned guard flushes the file writer when dropped.
fn init_logging(args: &CliArgs) -> Result<Option<WorkerGuard>, AppError> {
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match &args.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_ansi(true))
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    Ok(guard)
}
