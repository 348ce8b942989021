use std::sync::Arc;

use maya_engine::Logger;
use maya_engine::hls::{AcquisitionEvent, AcquisitionRequest, HlsDownloader, JobError, JobReport};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProgramConfig;
use crate::error::AppError;
use crate::utils::progress::ProgressManager;
use crate::utils::{create_dirs, output_file_name, temp_dir_for};

/// Build the acquisition request: `<output>/<name>` plus its hidden parts directory
pub fn build_request(config: &ProgramConfig) -> Result<AcquisitionRequest, AppError> {
    let file_name = output_file_name(&config.playlist_url, config.output_name.as_deref())?;
    let output_path = config.output_dir.join(file_name);
    let temp_dir = temp_dir_for(&output_path);

    Ok(
        AcquisitionRequest::new(config.playlist_url.clone(), output_path, temp_dir)
            .with_resume(config.resume)
            .with_config_concurrency(&config.hls_config),
    )
}

/// Process an HLS stream
pub async fn process_hls_stream(
    config: &ProgramConfig,
    logger: Arc<dyn Logger>,
    progress: ProgressManager,
    token: &CancellationToken,
) -> Result<JobReport, AppError> {
    create_dirs(&config.output_dir).await?;

    let request = build_request(config)?;
    info!(
        output = %request.output_path.display(),
        concurrency = request.concurrency,
        resume = request.resume,
        "Starting HLS download"
    );
    debug!(temp_dir = %request.temp_dir.display(), "Segment directory");

    let downloader = HlsDownloader::new(config.hls_config.clone(), logger)?
        .with_event_handler(Arc::new(move |event: AcquisitionEvent| progress.handle_event(event)));

    match downloader.start_download(request.clone(), token).await {
        Ok(report) => Ok(report),
        Err(err) => {
            log_resume_hint(&err, &request);
            Err(err.into())
        }
    }
}

fn log_resume_hint(err: &JobError, request: &AcquisitionRequest) {
    if !err.is_resumable() {
        return;
    }
    if err.needs_download() {
        warn!(
            "Downloaded segments were kept in {}. Run the same command again to resume.",
            request.temp_dir.display()
        );
    } else {
        warn!(
            "All segments are downloaded in {}. Run the same command again to retry the merge.",
            request.temp_dir.display()
        );
    }
}
