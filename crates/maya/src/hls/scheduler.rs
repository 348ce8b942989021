// HLS Segment Scheduler: runs segment fetches through a bounded worker pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::Logger;
use crate::hls::HlsDownloaderError;
use crate::hls::config::HlsConfig;
use crate::hls::events::{AcquisitionEvent, OnEvent};
use crate::hls::fetcher::{FetchedSegment, SegmentDownloader};
use crate::hls::ledger::ResumeLedger;
use crate::hls::manifest::{Segment, SegmentManifest, segment_file_name};

/// What a successful run downloaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub segments: usize,
    pub bytes: u64,
}

pub struct SegmentScheduler {
    config: Arc<HlsConfig>,
    segment_fetcher: Arc<dyn SegmentDownloader>,
    ledger: Arc<ResumeLedger>,
    log: Arc<dyn Logger>,
    on_event: Option<OnEvent>,
}

impl SegmentScheduler {
    pub fn new(
        config: Arc<HlsConfig>,
        segment_fetcher: Arc<dyn SegmentDownloader>,
        ledger: Arc<ResumeLedger>,
        log: Arc<dyn Logger>,
    ) -> Self {
        Self {
            config,
            segment_fetcher,
            ledger,
            log,
            on_event: None,
        }
    }

    pub fn with_event_handler(mut self, on_event: Option<OnEvent>) -> Self {
        self.on_event = on_event;
        self
    }

    async fn perform_fetch(
        segment_fetcher: Arc<dyn SegmentDownloader>,
        segment: Segment,
        dest: PathBuf,
        token: CancellationToken,
    ) -> (usize, Result<FetchedSegment, HlsDownloaderError>) {
        let result = segment_fetcher.fetch_segment(&segment, &dest, &token).await;
        (segment.index, result)
    }

    /// Download the `pending` segments of `manifest` into `dest_dir`.
    ///
    /// At most `concurrency_limit` fetches are in flight. They start in ascending
    /// index order and may finish in any order. Every finished segment is
    /// recorded in the ledger as it lands.
    ///
    /// The first terminal failure cancels the remaining work and is returned once
    /// all in-flight fetches have stopped. Cancelling `token` has the same effect
    /// and yields [`HlsDownloaderError::Cancelled`].
    pub async fn run(
        &self,
        manifest: &SegmentManifest,
        pending: &[usize],
        concurrency_limit: usize,
        dest_dir: &Path,
        token: &CancellationToken,
    ) -> Result<DownloadReport, HlsDownloaderError> {
        if concurrency_limit == 0 {
            return Err(HlsDownloaderError::Configuration(
                "concurrency limit must be at least 1".to_string(),
            ));
        }

        let mut queue = pending.to_vec();
        queue.sort_unstable();
        queue.dedup();
        if let Some(bad) = queue.iter().find(|i| **i >= manifest.len()) {
            return Err(HlsDownloaderError::Configuration(format!(
                "pending index {bad} is outside a manifest of {} segments",
                manifest.len()
            )));
        }

        self.log.info(&format!(
            "Downloading {} segment(s), {} at a time",
            queue.len(),
            concurrency_limit
        ));

        let job_token = token.child_token();
        let prefix = &self.config.output_config.segment_file_prefix;
        let mut queue = queue.into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut failure: Option<HlsDownloaderError> = None;
        let mut report = DownloadReport::default();

        loop {
            while !job_token.is_cancelled() && in_flight.len() < concurrency_limit {
                let Some(index) = queue.next() else {
                    break;
                };
                let segment = manifest.segments[index].clone();
                debug!(index, uri = %segment.uri, "Dispatching segment");
                in_flight.push(Self::perform_fetch(
                    Arc::clone(&self.segment_fetcher),
                    segment,
                    dest_dir.join(segment_file_name(prefix, index)),
                    job_token.clone(),
                ));
            }

            let Some((index, result)) = in_flight.next().await else {
                break;
            };

            let recorded = match result {
                Ok(fetched) => {
                    let byte_size = fetched.byte_size;
                    self.ledger.record(fetched.into()).await.map(|()| byte_size)
                }
                Err(e) => Err(e),
            };

            match recorded {
                Ok(byte_size) => {
                    report.segments += 1;
                    report.bytes += byte_size;
                    self.log.debug(&format!("Segment {index} complete ({byte_size} bytes)"));
                    if let Some(on_event) = &self.on_event {
                        on_event(AcquisitionEvent::SegmentCompleted { index, byte_size });
                    }
                }
                Err(HlsDownloaderError::Cancelled) => {}
                Err(e) => {
                    self.log.error(&format!("Segment {index} failed: {e}"));
                    if failure.is_none() {
                        failure = Some(e);
                        job_token.cancel();
                    }
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if token.is_cancelled() {
            self.log.warn(&format!(
                "Download cancelled after {} segment(s)",
                report.segments
            ));
            return Err(HlsDownloaderError::Cancelled);
        }
        Ok(report)
    }
}
