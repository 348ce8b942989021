use std::sync::Arc;

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error, Clone)]
pub enum HlsDownloaderError {
    #[error("Malformed playlist: {0}")]
    MalformedPlaylist(String),
    #[error("Playlist contains no segments or variants")]
    EmptyPlaylist,
    #[error("Playlist has no end-of-stream marker; live streams are not supported")]
    LiveStream,
    #[error("Encrypted stream ({method}) is not supported")]
    UnsupportedEncryption { method: String },
    #[error("Unsupported playlist feature: {0}")]
    UnsupportedPlaylist(String),
    #[error("Playlist fetch error: {0}")]
    PlaylistFetch(String),
    #[error("Segment {index} rejected with HTTP {status} ({url})")]
    SegmentRejected {
        index: usize,
        status: StatusCode,
        url: String,
    },
    #[error("Segment {index} failed: {reason}")]
    SegmentFetch { index: usize, reason: String },
    #[error("Segment {index} is missing or incomplete")]
    IncompleteSegment { index: usize },
    #[error("Merge failed: {0}")]
    MergeFailed(String),
    #[error("Ledger error: {0}")]
    Ledger(String),
    #[error("Network error: {source}")]
    Network {
        #[from]
        source: Arc<reqwest::Error>,
    },
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: Arc<std::io::Error>,
    },
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl HlsDownloaderError {
    /// Index of the segment this error is about, if any
    pub fn segment_index(&self) -> Option<usize> {
        match self {
            Self::SegmentRejected { index, .. }
            | Self::SegmentFetch { index, .. }
            | Self::IncompleteSegment { index } => Some(*index),
            _ => None,
        }
    }

    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { source } => crate::hls::retry::is_retryable_reqwest_error(source),
            Self::SegmentFetch { .. } | Self::PlaylistFetch(_) => true,
            _ => false,
        }
    }
}

// Manual implementation because of the Arc wrapping.
impl From<reqwest::Error> for HlsDownloaderError {
    fn from(err: reqwest::Error) -> Self {
        HlsDownloaderError::Network {
            source: Arc::new(err),
        }
    }
}

impl From<std::io::Error> for HlsDownloaderError {
    fn from(err: std::io::Error) -> Self {
        HlsDownloaderError::Io {
            source: Arc::new(err),
        }
    }
}

impl From<serde_json::Error> for HlsDownloaderError {
    fn from(err: serde_json::Error) -> Self {
        HlsDownloaderError::Ledger(err.to_string())
    }
}

impl From<url::ParseError> for HlsDownloaderError {
    fn from(err: url::ParseError) -> Self {
        HlsDownloaderError::MalformedPlaylist(format!("invalid URI: {err}"))
    }
}
