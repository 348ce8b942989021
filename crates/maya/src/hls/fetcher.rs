// HLS Segment Fetcher: downloads one segment to disk with retry logic.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::downloader::get_with_params;
use crate::hls::HlsDownloaderError;
use crate::hls::config::HlsConfig;
use crate::hls::ledger::part_path;
use crate::hls::manifest::{LedgerEntry, Segment};
use crate::hls::retry::{RetryAction, RetryPolicy, is_retryable_reqwest_error, retry_with_backoff};

/// A segment written to its final path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedSegment {
    pub index: usize,
    pub byte_size: u64,
    /// Hex SHA-256 of the written bytes
    pub checksum: String,
}

impl From<FetchedSegment> for LedgerEntry {
    fn from(fetched: FetchedSegment) -> Self {
        LedgerEntry {
            segment_index: fetched.index,
            byte_size: fetched.byte_size,
            checksum: Some(fetched.checksum),
        }
    }
}

#[async_trait]
pub trait SegmentDownloader: Send + Sync {
    /// Download `segment` to `dest`.
    ///
    /// Bytes are streamed to `<dest>.part` and renamed into place only once
    /// complete, so `dest` either holds the whole segment or does not exist.
    async fn fetch_segment(
        &self,
        segment: &Segment,
        dest: &Path,
        token: &CancellationToken,
    ) -> Result<FetchedSegment, HlsDownloaderError>;
}

pub struct SegmentFetcher {
    http_client: Client,
    config: Arc<HlsConfig>,
    retry_policy: RetryPolicy,
}

impl SegmentFetcher {
    pub fn new(http_client: Client, config: Arc<HlsConfig>) -> Self {
        let retry_policy = RetryPolicy::for_segments(&config.fetcher_config);
        Self {
            http_client,
            config,
            retry_policy,
        }
    }

    /// One attempt. The `.part` file is removed on every failure path.
    async fn fetch_once(
        &self,
        segment: &Segment,
        dest: &Path,
        token: &CancellationToken,
    ) -> RetryAction<FetchedSegment> {
        let part = part_path(dest);
        let action = self.download_to_part(segment, &part, token).await;
        if !matches!(action, RetryAction::Success(_)) {
            let _ = tokio::fs::remove_file(&part).await;
            return action;
        }
        if let Err(e) = tokio::fs::rename(&part, dest).await {
            let _ = tokio::fs::remove_file(&part).await;
            return RetryAction::Fail(e.into());
        }
        action
    }

    async fn download_to_part(
        &self,
        segment: &Segment,
        part: &Path,
        token: &CancellationToken,
    ) -> RetryAction<FetchedSegment> {
        let index = segment.index;
        let transient = |reason: String| {
            RetryAction::Retry(HlsDownloaderError::SegmentFetch { index, reason })
        };

        let mut request = get_with_params(&self.http_client, &segment.uri, &self.config.base)
            .timeout(self.config.fetcher_config.segment_download_timeout);
        if let Some(range) = segment.byte_range {
            request = request.header(reqwest::header::RANGE, range.to_header_value());
        }

        let response = tokio::select! {
            _ = token.cancelled() => return RetryAction::Fail(HlsDownloaderError::Cancelled),
            sent = request.send() => match sent {
                Ok(response) => response,
                Err(e) if is_retryable_reqwest_error(&e) => return transient(e.to_string()),
                Err(e) => {
                    return RetryAction::Fail(HlsDownloaderError::SegmentFetch {
                        index,
                        reason: e.to_string(),
                    });
                }
            },
        };

        let status = response.status();
        if status.is_client_error() {
            return RetryAction::Fail(HlsDownloaderError::SegmentRejected {
                index,
                status,
                url: segment.uri.to_string(),
            });
        }
        if !status.is_success() {
            return transient(format!("HTTP {status}"));
        }
        if segment.byte_range.is_some() && status != StatusCode::PARTIAL_CONTENT {
            return RetryAction::Fail(HlsDownloaderError::SegmentFetch {
                index,
                reason: format!("expected 206 for a byte-range request, got {status}"),
            });
        }

        let content_length = response.content_length();
        let mut file = match tokio::fs::File::create(part).await {
            Ok(file) => file,
            Err(e) => return RetryAction::Fail(e.into()),
        };
        let mut hasher = Sha256::new();
        let mut written = 0u64;
        let mut body = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => return RetryAction::Fail(HlsDownloaderError::Cancelled),
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    if let Err(e) = file.write_all(&bytes).await {
                        return RetryAction::Fail(e.into());
                    }
                    hasher.update(&bytes);
                    written += bytes.len() as u64;
                }
                Some(Err(e)) => {
                    return transient(format!("body read failed after {written} bytes: {e}"));
                }
                None => break,
            }
        }

        if let Err(e) = file.flush().await {
            return RetryAction::Fail(e.into());
        }
        if let Err(e) = file.sync_all().await {
            return RetryAction::Fail(e.into());
        }
        drop(file);

        if let Some(expected) = content_length
            && expected != written
        {
            return transient(format!(
                "received {written} bytes, Content-Length was {expected}"
            ));
        }
        if let Some(expected) = segment.expected_len()
            && expected != written
        {
            return transient(format!(
                "received {written} bytes for a {expected}-byte range"
            ));
        }
        if written == 0 {
            return transient("empty response body".to_string());
        }

        RetryAction::Success(FetchedSegment {
            index,
            byte_size: written,
            checksum: hex::encode(hasher.finalize()),
        })
    }
}

#[async_trait]
impl SegmentDownloader for SegmentFetcher {
    async fn fetch_segment(
        &self,
        segment: &Segment,
        dest: &Path,
        token: &CancellationToken,
    ) -> Result<FetchedSegment, HlsDownloaderError> {
        let fetched = retry_with_backoff(&self.retry_policy, token, move |_| async move {
            self.fetch_once(segment, dest, token).await
        })
        .await?;

        debug!(
            index = fetched.index,
            bytes = fetched.byte_size,
            url = %segment.uri,
            "Downloaded segment"
        );
        Ok(fetched)
    }
}
