//! Exponential backoff with jitter, shared by playlist and segment requests.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::hls::HlsDownloaderError;
use crate::hls::config::{HlsFetcherConfig, HlsPlaylistConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add up to `base_delay / 2` of random delay
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn for_segments(config: &HlsFetcherConfig) -> Self {
        Self {
            max_retries: config.max_segment_retries,
            base_delay: config.segment_retry_delay_base,
            max_delay: config.max_retry_delay,
            jitter: config.retry_jitter,
        }
    }

    pub fn for_playlists(playlist: &HlsPlaylistConfig, fetcher: &HlsFetcherConfig) -> Self {
        Self {
            max_retries: playlist.max_playlist_retries,
            ..Self::for_segments(fetcher)
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Shifts past 31 saturate instead of overflowing.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let capped = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let half_base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let headroom_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let limit_ms = half_base_ms.min(headroom_ms);
        if limit_ms == 0 {
            return capped;
        }

        capped + Duration::from_millis(rand::rng().random_range(0..limit_ms))
    }
}

/// Outcome of one attempt
pub enum RetryAction<T> {
    Success(T),
    /// Transient failure: timeout, reset, 5xx, short body
    Retry(HlsDownloaderError),
    /// Terminal failure: 4xx, local I/O, cancellation
    Fail(HlsDownloaderError),
}

/// Run `operation` until it succeeds, fails terminally or the retry budget is spent.
///
/// The token is checked before every attempt and while sleeping between attempts.
/// When retries run out the last transient error is returned.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, HlsDownloaderError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(HlsDownloaderError::Cancelled);
        }

        let err = match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => err,
        };

        if attempt >= policy.max_retries {
            return Err(err);
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            attempt = attempt + 1,
            max = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after transient error"
        );
        tokio::select! {
            _ = token.cancelled() => return Err(HlsDownloaderError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

/// Connection, timeout, request, body and decode errors are transient.
/// Redirect and builder errors are not.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_retries: u32, base_ms: u64, max_ms: u64, jitter: bool) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            jitter,
        }
    }

    fn transient() -> HlsDownloaderError {
        HlsDownloaderError::SegmentFetch {
            index: 0,
            reason: "HTTP 503".to_string(),
        }
    }

    #[test]
    fn delay_doubles_until_the_cap() {
        let p = policy(10, 100, 1_000, false);
        assert_eq!(p.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(p.delay_for_attempt(4), Duration::from_millis(1_000));
        assert_eq!(p.delay_for_attempt(40), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_half_base_and_cap() {
        let p = policy(3, 100, 10_000, true);
        for _ in 0..64 {
            let d = p.delay_for_attempt(0);
            assert!(d >= Duration::from_millis(100) && d < Duration::from_millis(150));
        }
        let capped = policy(3, 500, 1_000, true);
        for _ in 0..64 {
            assert!(capped.delay_for_attempt(10) <= Duration::from_secs(1));
        }
    }

    #[test]
    fn policies_follow_config() {
        let fetcher = HlsFetcherConfig::default();
        let playlist = HlsPlaylistConfig {
            max_playlist_retries: 7,
            ..Default::default()
        };
        let p = RetryPolicy::for_playlists(&playlist, &fetcher);
        assert_eq!(p.max_retries, 7);
        assert_eq!(p.base_delay, fetcher.segment_retry_delay_base);
        assert_eq!(RetryPolicy::for_segments(&fetcher).max_retries, 3);
    }

    #[tokio::test]
    async fn terminal_failure_is_not_retried() {
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&policy(3, 1, 10, false), &token, |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { RetryAction::Fail(HlsDownloaderError::EmptyPlaylist) }
        })
        .await;
        assert!(matches!(result, Err(HlsDownloaderError::EmptyPlaylist)));
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn transient_failures_exhaust_the_budget() {
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&policy(2, 1, 10, false), &token, |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { RetryAction::Retry(transient()) }
        })
        .await;
        assert!(matches!(
            result,
            Err(HlsDownloaderError::SegmentFetch { index: 0, .. })
        ));
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn recovers_after_a_transient_failure() {
        let token = CancellationToken::new();
        let result = retry_with_backoff(&policy(3, 1, 10, true), &token, |attempt| async move {
            if attempt < 2 {
                RetryAction::Retry(transient())
            } else {
                RetryAction::Success(attempt)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn cancelled_token_skips_the_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&policy(3, 1, 10, false), &token, |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { RetryAction::Success(()) }
        })
        .await;
        assert!(matches!(result, Err(HlsDownloaderError::Cancelled)));
        assert_eq!(attempts.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_backoff_sleep() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<(), _> =
            retry_with_backoff(&policy(5, 60_000, 60_000, false), &token, |_| async {
                RetryAction::Retry(transient())
            })
            .await;
        assert!(matches!(result, Err(HlsDownloaderError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
