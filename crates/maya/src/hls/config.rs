use std::time::Duration;

use crate::DownloaderConfig;

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default)]
pub struct HlsConfig {
    /// HTTP client configuration
    pub base: DownloaderConfig,
    pub playlist_config: HlsPlaylistConfig,
    pub fetcher_config: HlsFetcherConfig,
    pub scheduler_config: HlsSchedulerConfig,
    pub output_config: HlsOutputConfig,
}

impl HlsConfig {
    pub fn builder() -> HlsConfigBuilder {
        HlsConfigBuilder::new()
    }
}

// --- Playlist Configuration ---
#[derive(Debug, Clone)]
pub struct HlsPlaylistConfig {
    pub playlist_fetch_timeout: Duration,
    pub max_playlist_retries: u32,
    pub variant_selection_policy: HlsVariantSelectionPolicy,
}

impl Default for HlsPlaylistConfig {
    fn default() -> Self {
        Self {
            playlist_fetch_timeout: Duration::from_secs(15),
            max_playlist_retries: 3,
            variant_selection_policy: Default::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HlsVariantSelectionPolicy {
    /// Highest bandwidth; the first-listed variant wins a tie
    #[default]
    HighestBitrate,
    LowestBitrate,
    /// Variant whose bandwidth is nearest to the given bits per second
    ClosestToBitrate(u64),
    /// Exact resolution match, falling back to the highest bitrate
    MatchingResolution { width: u64, height: u64 },
}

// --- Fetcher Configuration ---
#[derive(Debug, Clone)]
pub struct HlsFetcherConfig {
    pub segment_download_timeout: Duration,
    pub max_segment_retries: u32,
    /// Base for exponential backoff
    pub segment_retry_delay_base: Duration,
    pub max_retry_delay: Duration,
    pub retry_jitter: bool,
}

impl Default for HlsFetcherConfig {
    fn default() -> Self {
        Self {
            segment_download_timeout: Duration::from_secs(30),
            max_segment_retries: 3,
            segment_retry_delay_base: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(10),
            retry_jitter: true,
        }
    }
}

// --- Scheduler Configuration ---
#[derive(Debug, Clone)]
pub struct HlsSchedulerConfig {
    /// Max concurrent segment downloads
    pub download_concurrency: usize,
}

impl Default for HlsSchedulerConfig {
    fn default() -> Self {
        Self {
            download_concurrency: 5,
        }
    }
}

// --- Output Configuration ---
#[derive(Debug, Clone)]
pub struct HlsOutputConfig {
    /// Segment files are named `<prefix><index>` inside the temp directory
    pub segment_file_prefix: String,
    pub ledger_file_name: String,
    pub merge_buffer_size: usize,
    pub remove_temp_dir_on_success: bool,
}

impl Default for HlsOutputConfig {
    fn default() -> Self {
        Self {
            segment_file_prefix: "segment-".to_string(),
            ledger_file_name: "ledger.json".to_string(),
            merge_buffer_size: 256 * 1024,
            remove_temp_dir_on_success: true,
        }
    }
}

/// Fluent builder for [`HlsConfig`]
#[derive(Debug, Clone, Default)]
pub struct HlsConfigBuilder {
    config: HlsConfig,
}

impl HlsConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_config(mut self, base_config: DownloaderConfig) -> Self {
        self.config.base = base_config;
        self
    }

    // --- Playlist ---

    pub fn playlist_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.playlist_config.playlist_fetch_timeout = timeout;
        self
    }

    pub fn max_playlist_retries(mut self, retries: u32) -> Self {
        self.config.playlist_config.max_playlist_retries = retries;
        self
    }

    pub fn variant_selection_policy(mut self, policy: HlsVariantSelectionPolicy) -> Self {
        self.config.playlist_config.variant_selection_policy = policy;
        self
    }

    // --- Fetcher ---

    pub fn segment_download_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetcher_config.segment_download_timeout = timeout;
        self
    }

    pub fn max_segment_retries(mut self, retries: u32) -> Self {
        self.config.fetcher_config.max_segment_retries = retries;
        self
    }

    pub fn segment_retry_delay_base(mut self, delay: Duration) -> Self {
        self.config.fetcher_config.segment_retry_delay_base = delay;
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.config.fetcher_config.max_retry_delay = delay;
        self
    }

    pub fn retry_jitter(mut self, enabled: bool) -> Self {
        self.config.fetcher_config.retry_jitter = enabled;
        self
    }

    // --- Scheduler ---

    pub fn download_concurrency(mut self, concurrency: usize) -> Self {
        self.config.scheduler_config.download_concurrency = concurrency;
        self
    }

    // --- Output ---

    pub fn segment_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.output_config.segment_file_prefix = prefix.into();
        self
    }

    pub fn merge_buffer_size(mut self, size: usize) -> Self {
        self.config.output_config.merge_buffer_size = size;
        self
    }

    pub fn remove_temp_dir_on_success(mut self, remove: bool) -> Self {
        self.config.output_config.remove_temp_dir_on_success = remove;
        self
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &HlsConfig {
        &self.config
    }

    pub fn build(self) -> HlsConfig {
        self.config
    }
}
