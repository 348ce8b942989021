mod hls;

use std::sync::Arc;

use maya_engine::hls::JobReport;
use maya_engine::{Logger, TracingLogger};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ProgramConfig;
use crate::error::AppError;
use crate::utils::progress::ProgressManager;
use crate::utils::{format_bytes, format_duration, format_elapsed};

/// Run the acquisition described by `config` and log a summary
pub async fn process_download(
    config: ProgramConfig,
    verbose: bool,
    progress: ProgressManager,
    token: CancellationToken,
) -> Result<JobReport, AppError> {
    let logger: Arc<dyn Logger> = Arc::new(TracingLogger::new(verbose));
    let start_time = std::time::Instant::now();

    let report = hls::process_hls_stream(&config, logger, progress, &token).await?;

    info!(
        url = %config.playlist_url,
        segments = report.total_segments,
        downloaded = report.downloaded_segments,
        reused = report.reused_segments,
        "HLS download complete: {} ({} of media) in {}",
        format_bytes(report.bytes),
        format_duration(report.duration_seconds),
        format_elapsed(start_time.elapsed())
    );

    Ok(report)
}
