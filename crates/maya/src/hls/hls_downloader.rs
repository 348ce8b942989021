use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::hls::config::{HlsConfig, HlsSchedulerConfig};
use crate::hls::events::{AcquisitionEvent, OnEvent};
use crate::hls::fetcher::{SegmentDownloader, SegmentFetcher};
use crate::hls::ledger::ResumeLedger;
use crate::hls::manifest::PlaylistRef;
use crate::hls::merger::SegmentMerger;
use crate::hls::playlist::{PlaylistEngine, PlaylistProvider, resolve_manifest};
use crate::hls::scheduler::SegmentScheduler;
use crate::hls::state::{JobError, JobState, JobStateMachine};
use crate::hls::HlsDownloaderError;
use crate::{DownloadError, Logger, create_client};

/// Everything one acquisition needs, fully resolved by the caller
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    pub playlist_url: Url,
    pub output_path: PathBuf,
    pub temp_dir: PathBuf,
    /// Reuse verified segments already in `temp_dir`
    pub resume: bool,
    pub concurrency: usize,
}

impl AcquisitionRequest {
    pub fn new(
        playlist_url: Url,
        output_path: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            playlist_url,
            output_path: output_path.into(),
            temp_dir: temp_dir.into(),
            resume: true,
            concurrency: HlsSchedulerConfig::default().download_concurrency,
        }
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Use the scheduler limit from `config`
    pub fn with_config_concurrency(self, config: &HlsConfig) -> Self {
        self.with_concurrency(config.scheduler_config.download_concurrency)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// Summary of a finished acquisition
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub playlist: PlaylistRef,
    pub output_path: PathBuf,
    pub total_segments: usize,
    /// Fetched during this run
    pub downloaded_segments: usize,
    /// Taken from a previous run's temp directory
    pub reused_segments: usize,
    /// Size of the final file
    pub bytes: u64,
    pub duration_seconds: f64,
}

pub struct HlsDownloader {
    config: Arc<HlsConfig>,
    playlist_provider: Arc<dyn PlaylistProvider>,
    segment_fetcher: Arc<dyn SegmentDownloader>,
    log: Arc<dyn Logger>,
    on_event: Option<OnEvent>,
}

impl HlsDownloader {
    /// Build a downloader backed by one shared HTTP client
    pub fn new(config: HlsConfig, log: Arc<dyn Logger>) -> Result<Self, DownloadError> {
        let client = create_client(&config.base)?;
        let config = Arc::new(config);
        Ok(Self::with_components(
            Arc::clone(&config),
            Arc::new(PlaylistEngine::new(client.clone(), Arc::clone(&config))),
            Arc::new(SegmentFetcher::new(client, config)),
            log,
        ))
    }

    /// Assemble a downloader from custom playlist and segment sources
    pub fn with_components(
        config: Arc<HlsConfig>,
        playlist_provider: Arc<dyn PlaylistProvider>,
        segment_fetcher: Arc<dyn SegmentDownloader>,
        log: Arc<dyn Logger>,
    ) -> Self {
        Self {
            config,
            playlist_provider,
            segment_fetcher,
            log,
            on_event: None,
        }
    }

    pub fn with_event_handler(mut self, on_event: OnEvent) -> Self {
        self.on_event = Some(on_event);
        self
    }

    /// Run one acquisition to completion.
    ///
    /// On failure the returned [`JobError`] names the furthest stage reached.
    /// Segment files and the ledger stay in `temp_dir` so a later call with the
    /// same request can resume; the output path is never written partially.
    pub async fn start_download(
        &self,
        request: AcquisitionRequest,
        token: &CancellationToken,
    ) -> Result<JobReport, JobError> {
        let mut machine = JobStateMachine::new(self.on_event.clone());
        match self.run(&request, token, &mut machine).await {
            Ok(report) => {
                self.log.debug(&format!("Job finished: {}", machine.state()));
                Ok(report)
            }
            Err(source) => {
                let err = machine.fail(source);
                self.log.error(&err.to_string());
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        request: &AcquisitionRequest,
        token: &CancellationToken,
        machine: &mut JobStateMachine,
    ) -> Result<JobReport, HlsDownloaderError> {
        if request.concurrency == 0 {
            return Err(HlsDownloaderError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }

        self.log.info(&format!("Fetching playlist {}", request.playlist_url));
        let text = self
            .playlist_provider
            .fetch_playlist(&request.playlist_url, token)
            .await?;
        machine.advance(JobState::PlaylistFetched)?;

        let (playlist, manifest) = resolve_manifest(
            self.playlist_provider.as_ref(),
            &request.playlist_url,
            &text,
            &self.config.playlist_config.variant_selection_policy,
            token,
        )
        .await?;
        manifest.check_indices()?;
        machine.advance(JobState::ManifestReady)?;

        if let Some(key) = manifest.encryption() {
            return Err(HlsDownloaderError::UnsupportedEncryption {
                method: key.method.clone(),
            });
        }
        self.log.info(&format!(
            "Playlist has {} segment(s), {:.1}s total",
            manifest.len(),
            manifest.total_duration()
        ));

        let output_config = &self.config.output_config;
        let ledger = if request.resume {
            ResumeLedger::load_state(&request.temp_dir, output_config).await?
        } else {
            self.log.debug(&format!(
                "Resume disabled, clearing {}",
                request.temp_dir.display()
            ));
            ResumeLedger::reset(&request.temp_dir, output_config).await?
        };
        let ledger = Arc::new(ledger);

        let plan = ledger.plan(&manifest).await?;
        if plan.manifest_changed {
            self.log
                .warn("Playlist changed since the last run, previous segments discarded");
        }
        if !plan.completed.is_empty() {
            self.log.info(&format!(
                "Resuming: {} of {} segment(s) already complete",
                plan.completed.len(),
                manifest.len()
            ));
        }
        machine.emit(AcquisitionEvent::ResumePlanned {
            total_segments: manifest.len(),
            already_complete: plan.completed.len(),
            already_complete_bytes: plan.completed_bytes,
        });

        if token.is_cancelled() {
            return Err(HlsDownloaderError::Cancelled);
        }
        machine.advance(JobState::Downloading)?;

        let downloaded = if plan.pending.is_empty() {
            0
        } else {
            SegmentScheduler::new(
                Arc::clone(&self.config),
                Arc::clone(&self.segment_fetcher),
                Arc::clone(&ledger),
                Arc::clone(&self.log),
            )
            .with_event_handler(self.on_event.clone())
            .run(
                &manifest,
                &plan.pending,
                request.concurrency,
                &request.temp_dir,
                token,
            )
            .await?
            .segments
        };
        drop(ledger);

        if token.is_cancelled() {
            return Err(HlsDownloaderError::Cancelled);
        }
        machine.advance(JobState::Merging)?;

        let merged = SegmentMerger::new(Arc::clone(&self.config), Arc::clone(&self.log))
            .merge(&manifest, &request.temp_dir, &request.output_path)
            .await?;
        machine.emit(AcquisitionEvent::MergeCompleted {
            output: request.output_path.clone(),
            bytes: merged.bytes,
        });
        machine.advance(JobState::Done)?;

        self.log.success(&format!(
            "Saved {} ({} bytes, {} segment(s))",
            request.output_path.display(),
            merged.bytes,
            merged.segments
        ));

        Ok(JobReport {
            playlist,
            output_path: request.output_path.clone(),
            total_segments: manifest.len(),
            downloaded_segments: downloaded,
            reused_segments: plan.completed.len(),
            bytes: merged.bytes,
            duration_seconds: manifest.total_duration(),
        })
    }
}
