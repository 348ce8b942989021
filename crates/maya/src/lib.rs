//! # Maya engine
//!
//! Acquires an HLS (M3U8) stream and materializes it as a single local file.
//!
//! ## Features
//!
//! - Master and media playlist parsing with variant selection
//! - Bounded concurrent segment download with retry and backoff
//! - Verified resume ledger so interrupted jobs pick up where they stopped
//! - Ordered, atomic merge into the final artifact
//!
//! The entry point is [`hls::HlsDownloader::start_download`].

pub mod builder;
pub mod config;
pub mod downloader;
pub mod error;
pub mod hls;
pub mod logger;
pub mod proxy;

pub use builder::DownloaderConfigBuilder;
pub use config::DownloaderConfig;
pub use error::DownloadError;
pub use logger::{Logger, TracingLogger};

pub use downloader::create_client;

pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
