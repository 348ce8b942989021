use clap::{ArgAction, Args, Parser, Subcommand};
use maya_engine::ProxyType;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "HLS (M3U8) stream downloader",
    long_about = "Downloads a video-on-demand HLS stream and saves it as a single file.\n\
                  \n\
                  Master playlists are resolved to their highest-bandwidth variant, segments\n\
                  are fetched concurrently with retry, and interrupted jobs resume from the\n\
                  segments already on disk."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true, help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Append log output to a file (without colors)"
    )]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download an HLS playlist into a single file
    Download(DownloadArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// Playlist URL
    #[arg(required = true, help = "URL of the master or media playlist (.m3u8)")]
    pub url: String,

    /// Output directory
    #[arg(
        short,
        long,
        default_value = ".",
        help = "Directory where the merged file will be saved"
    )]
    pub output: PathBuf,

    /// Resume from a previous run
    #[arg(
        short,
        long,
        default_value_t = true,
        action = ArgAction::Set,
        help = "Reuse segments downloaded by a previous run of the same job"
    )]
    pub resume: bool,

    /// Concurrent segment downloads
    #[arg(
        short,
        long,
        default_value_t = 5,
        help = "Maximum number of segments downloaded at the same time"
    )]
    pub concurrency: usize,

    /// Output file name
    #[arg(
        short = 'n',
        long = "name",
        help = "Output file name (default: the playlist name with a .ts extension)"
    )]
    pub name: Option<String>,

    /// Retry attempts per segment
    #[arg(
        long,
        default_value_t = 3,
        help = "Number of retry attempts for a segment after a transient failure"
    )]
    pub retries: u32,

    /// Overall request timeout in seconds
    #[arg(
        long,
        default_value_t = 0,
        help = "Overall timeout in seconds for HTTP requests (0 disables it)"
    )]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value_t = 30,
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: u64,

    /// Segment timeout in seconds
    #[arg(
        long,
        default_value_t = 30,
        help = "Timeout for a single segment download in seconds"
    )]
    pub segment_timeout: u64,

    /// Custom HTTP headers for download requests
    #[arg(
        long = "header",
        short = 'H',
        help = "Add custom HTTP header to requests (can be used multiple times). Format: 'Name: Value'",
        value_name = "HEADER"
    )]
    pub headers: Vec<String>,

    /// Proxy URL (e.g., "http://proxy.example.com:8080")
    #[arg(
        long,
        help = "Proxy server URL for downloads (e.g., \"http://proxy.example.com:8080\")"
    )]
    pub proxy: Option<String>,

    /// Proxy type
    #[arg(long, value_enum, default_value_t = ProxyType::Http, help = "Proxy type")]
    pub proxy_type: ProxyType,

    /// Proxy username
    #[arg(long, help = "Username for proxy authentication")]
    pub proxy_user: Option<String>,

    /// Proxy password
    #[arg(long, help = "Password for proxy authentication")]
    pub proxy_pass: Option<String>,

    /// Disable all proxy settings for downloads
    #[arg(
        long,
        help = "Disable all proxy settings (including system proxy) for downloads"
    )]
    pub no_proxy: bool,

    /// Show a progress bar
    #[arg(
        short = 'P',
        long = "progress",
        help = "Show a progress bar while segments download"
    )]
    pub show_progress: bool,
}
