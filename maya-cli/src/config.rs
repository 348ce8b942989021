use std::path::PathBuf;
use std::time::Duration;

use maya_engine::hls::HlsConfig;
use maya_engine::{DownloaderConfig, ProxyAuth, ProxyConfig};
use tracing::info;
use url::Url;

use crate::cli::DownloadArgs;
use crate::error::AppError;
use crate::utils::parse_headers;

/// Configuration for one `download` invocation
#[derive(Debug, Clone)]
pub struct ProgramConfig {
    pub playlist_url: Url,

    /// Directory receiving the merged file
    pub output_dir: PathBuf,

    /// Explicit output file name
    pub output_name: Option<String>,

    pub resume: bool,

    pub show_progress: bool,

    /// Engine configuration
    pub hls_config: HlsConfig,
}

impl ProgramConfig {
    pub fn from_args(args: &DownloadArgs) -> Result<Self, AppError> {
        let playlist_url = Url::parse(&args.url)
            .map_err(|e| AppError::InvalidInput(format!("'{}' is not a valid URL: {e}", args.url)))?;
        if !matches!(playlist_url.scheme(), "http" | "https") {
            return Err(AppError::InvalidInput(format!(
                "unsupported URL scheme '{}', expected http or https",
                playlist_url.scheme()
            )));
        }
        if args.concurrency == 0 {
            return Err(AppError::InvalidInput(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let hls_config = HlsConfig::builder()
            .with_base_config(downloader_config(args))
            .download_concurrency(args.concurrency)
            .max_segment_retries(args.retries)
            .segment_download_timeout(Duration::from_secs(args.segment_timeout))
            .build();

        Ok(Self {
            playlist_url,
            output_dir: args.output.clone(),
            output_name: args.name.clone(),
            resume: args.resume,
            show_progress: args.show_progress,
            hls_config,
        })
    }
}

fn downloader_config(args: &DownloadArgs) -> DownloaderConfig {
    info!(
        "HTTP timeout configuration: overall={}s, connect={}s, segment={}s",
        args.timeout, args.connect_timeout, args.segment_timeout
    );

    let builder = DownloaderConfig::builder()
        .with_timeout(Duration::from_secs(args.timeout))
        .with_connect_timeout(Duration::from_secs(args.connect_timeout))
        .with_headers(parse_headers(&args.headers))
        .with_pool_max_idle_per_host(args.concurrency.max(10));

    if args.no_proxy {
        // No proxy flag overrides everything else
        info!("All proxy settings disabled (--no-proxy flag)");
        return builder.with_system_proxy(false).build();
    }

    let Some(proxy_url) = args.proxy.as_ref() else {
        return builder.with_system_proxy(true).build();
    };

    let auth = match (&args.proxy_user, &args.proxy_pass) {
        (Some(username), Some(password)) => Some(ProxyAuth {
            username: username.clone(),
            password: password.clone(),
        }),
        _ => None,
    };

    info!(
        proxy_url = %proxy_url,
        proxy_type = ?args.proxy_type,
        has_auth = auth.is_some(),
        "Using explicit proxy configuration for downloads"
    );

    builder
        .with_proxy(ProxyConfig {
            url: proxy_url.clone(),
            proxy_type: args.proxy_type,
            auth,
        })
        .build()
}
