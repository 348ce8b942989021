// HLS acquisition: playlist resolution, segment download, resume and merge

pub mod config;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod hls_downloader;
pub mod ledger;
pub mod manifest;
pub mod merger;
pub mod playlist;
pub mod retry;
pub mod scheduler;
pub mod state;

pub use config::{HlsConfig, HlsConfigBuilder, HlsVariantSelectionPolicy};
pub use error::HlsDownloaderError;
pub use events::{AcquisitionEvent, OnEvent};
pub use hls_downloader::{AcquisitionRequest, HlsDownloader, JobReport};
pub use manifest::{PlaylistRef, Segment, SegmentManifest};
pub use state::{JobError, JobStage, JobState};
