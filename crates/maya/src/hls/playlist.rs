// HLS Playlist Engine: fetches playlists and turns their text into a segment manifest.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::downloader::get_with_params;
use crate::hls::HlsDownloaderError;
use crate::hls::config::{HlsConfig, HlsVariantSelectionPolicy};
use crate::hls::manifest::{
    ByteRange, KeyRef, ParsedPlaylist, PlaylistRef, Resolution, Segment, SegmentManifest,
    VariantStream,
};
use crate::hls::retry::{RetryAction, RetryPolicy, is_retryable_reqwest_error, retry_with_backoff};

const EXTM3U: &str = "#EXTM3U";
const STREAM_INF: &str = "#EXT-X-STREAM-INF";
const I_FRAME_STREAM_INF: &str = "#EXT-X-I-FRAME-STREAM-INF";

/// Parse raw playlist text fetched from `base_url`.
///
/// Master playlists yield their variants (I-frame-only entries dropped), media
/// playlists yield an ordered manifest with every URI resolved against `base_url`.
pub fn parse_playlist(text: &str, base_url: &Url) -> Result<ParsedPlaylist, HlsDownloaderError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let first_line = text.lines().map(str::trim).find(|l| !l.is_empty());
    if !first_line.is_some_and(|l| l.starts_with(EXTM3U)) {
        return Err(HlsDownloaderError::MalformedPlaylist(
            "missing #EXTM3U header".to_string(),
        ));
    }

    let is_master = text.lines().map(str::trim_start).any(|l| {
        l.starts_with(STREAM_INF) || l.starts_with(I_FRAME_STREAM_INF)
    });

    if is_master {
        parse_master(text, base_url).map(ParsedPlaylist::Master)
    } else {
        parse_media(text, base_url).map(ParsedPlaylist::Media)
    }
}

fn parse_master(text: &str, base_url: &Url) -> Result<Vec<VariantStream>, HlsDownloaderError> {
    let master = m3u8_rs::parse_master_playlist_res(text.as_bytes()).map_err(|e| {
        HlsDownloaderError::MalformedPlaylist(format!("failed to parse master playlist: {e}"))
    })?;

    let variants = master
        .variants
        .iter()
        .filter(|v| !v.is_i_frame)
        .map(|v| {
            Ok(VariantStream {
                uri: base_url.join(v.uri.trim())?,
                bandwidth: v.bandwidth,
                resolution: v.resolution.map(|r| Resolution {
                    width: r.width,
                    height: r.height,
                }),
            })
        })
        .collect::<Result<Vec<_>, HlsDownloaderError>>()?;

    if variants.is_empty() {
        return Err(HlsDownloaderError::EmptyPlaylist);
    }
    Ok(variants)
}

/// Byte range as written in the playlist, before the implicit offset is resolved
struct PendingRange {
    length: u64,
    offset: Option<u64>,
}

fn parse_media(text: &str, base_url: &Url) -> Result<SegmentManifest, HlsDownloaderError> {
    let mut segments = Vec::new();
    let mut target_duration = 0u64;
    let mut media_sequence = 0u64;
    let mut end_of_stream = false;

    let mut pending_duration: Option<f64> = None;
    let mut pending_range: Option<PendingRange> = None;
    let mut current_key: Option<KeyRef> = None;
    // End of the previous sub-range, keyed by resource, for ranges with no offset
    let mut last_range_end: Option<(Url, u64)> = None;

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(tag) = line.strip_prefix('#') {
            let (name, value) = match tag.split_once(':') {
                Some((name, value)) => (name, value.trim()),
                None => (tag, ""),
            };
            match name {
                "EXTINF" => {
                    let raw = value.split(',').next().unwrap_or("").trim();
                    let duration = raw.parse::<f64>().ok().filter(|d| d.is_finite() && *d >= 0.0);
                    match duration {
                        Some(d) => pending_duration = Some(d),
                        None => {
                            return Err(malformed(line_no, format!("bad duration {raw:?}")));
                        }
                    }
                }
                "EXT-X-BYTERANGE" => {
                    pending_range = Some(parse_byte_range(value).ok_or_else(|| {
                        malformed(line_no, format!("bad byte range {value:?}"))
                    })?);
                }
                "EXT-X-KEY" => {
                    current_key = parse_key(value, base_url)
                        .map_err(|reason| malformed(line_no, reason))?;
                }
                "EXT-X-TARGETDURATION" => {
                    target_duration = value
                        .parse::<f64>()
                        .ok()
                        .filter(|d| d.is_finite() && *d >= 0.0)
                        .map(|d| d.ceil() as u64)
                        .ok_or_else(|| {
                            malformed(line_no, format!("bad target duration {value:?}"))
                        })?;
                }
                "EXT-X-MEDIA-SEQUENCE" => {
                    media_sequence = value.parse().map_err(|_| {
                        malformed(line_no, format!("bad media sequence {value:?}"))
                    })?;
                }
                "EXT-X-ENDLIST" => end_of_stream = true,
                "EXT-X-MAP" => {
                    return Err(HlsDownloaderError::UnsupportedPlaylist(
                        "fMP4 init sections (#EXT-X-MAP) are not supported".to_string(),
                    ));
                }
                _ => {}
            }
            continue;
        }

        let Some(duration_seconds) = pending_duration.take() else {
            return Err(malformed(
                line_no,
                format!("media URI {line:?} has no preceding #EXTINF"),
            ));
        };
        let uri = base_url.join(line)?;

        let byte_range = match pending_range.take() {
            Some(range) => {
                let offset = range.offset.unwrap_or_else(|| match &last_range_end {
                    Some((prev, end)) if *prev == uri => *end,
                    _ => 0,
                });
                let Some(end) = offset.checked_add(range.length) else {
                    return Err(malformed(
                        line_no,
                        format!("byte range {}@{offset} overflows", range.length),
                    ));
                };
                last_range_end = Some((uri.clone(), end));
                Some(ByteRange {
                    offset,
                    length: range.length,
                })
            }
            None => {
                last_range_end = None;
                None
            }
        };

        segments.push(Segment {
            index: segments.len(),
            uri,
            byte_range,
            duration_seconds,
            encryption_key: current_key.clone(),
        });
    }

    if pending_duration.is_some() {
        return Err(HlsDownloaderError::MalformedPlaylist(
            "trailing #EXTINF without a media URI".to_string(),
        ));
    }
    if segments.is_empty() {
        return Err(HlsDownloaderError::EmptyPlaylist);
    }
    if !end_of_stream {
        return Err(HlsDownloaderError::LiveStream);
    }

    Ok(SegmentManifest {
        segments,
        target_duration_seconds: target_duration,
        media_sequence,
        end_of_stream,
    })
}

fn malformed(line_index: usize, reason: String) -> HlsDownloaderError {
    HlsDownloaderError::MalformedPlaylist(format!("line {}: {reason}", line_index + 1))
}

/// `<length>[@<offset>]`
fn parse_byte_range(value: &str) -> Option<PendingRange> {
    let (length, offset) = match value.split_once('@') {
        Some((length, offset)) => (length, Some(offset.trim().parse().ok()?)),
        None => (value, None),
    };
    let length = length.trim().parse().ok().filter(|length: &u64| *length > 0)?;
    Some(PendingRange { length, offset })
}

/// `METHOD=NONE` yields `None`
fn parse_key(value: &str, base_url: &Url) -> Result<Option<KeyRef>, String> {
    let mut method = None;
    let mut uri = None;
    let mut iv = None;
    for (name, attr) in split_attributes(value) {
        match name {
            "METHOD" => method = Some(attr.to_string()),
            "URI" => {
                uri = Some(
                    base_url
                        .join(attr)
                        .map_err(|e| format!("bad key URI {attr:?}: {e}"))?,
                )
            }
            "IV" => iv = Some(attr.to_string()),
            _ => {}
        }
    }

    match method {
        None => Err("#EXT-X-KEY without METHOD".to_string()),
        Some(m) if m.eq_ignore_ascii_case("NONE") => Ok(None),
        Some(method) => Ok(Some(KeyRef { method, uri, iv })),
    }
}

/// Split an attribute list, honoring quoted values. Quotes are stripped.
fn split_attributes(list: &str) -> Vec<(&str, &str)> {
    let mut attributes = Vec::new();
    let mut rest = list.trim();
    while !rest.is_empty() {
        let Some((name, after)) = rest.split_once('=') else {
            break;
        };
        let (value, next) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.split_once('"') {
                Some((value, tail)) => (value, tail),
                None => (quoted, ""),
            }
        } else {
            match after.split_once(',') {
                Some((value, tail)) => (value, tail),
                None => (after, ""),
            }
        };
        attributes.push((name.trim(), value.trim()));
        rest = next.trim_start_matches(',').trim_start();
    }
    attributes
}

/// Pick one variant. Every policy keeps the first-listed variant on a tie.
pub fn select_variant<'a>(
    variants: &'a [VariantStream],
    policy: &HlsVariantSelectionPolicy,
) -> Option<&'a VariantStream> {
    match policy {
        HlsVariantSelectionPolicy::HighestBitrate => {
            first_best(variants, |v, best| v.bandwidth > best.bandwidth)
        }
        HlsVariantSelectionPolicy::LowestBitrate => {
            first_best(variants, |v, best| v.bandwidth < best.bandwidth)
        }
        HlsVariantSelectionPolicy::ClosestToBitrate(target) => first_best(variants, |v, best| {
            v.bandwidth.abs_diff(*target) < best.bandwidth.abs_diff(*target)
        }),
        HlsVariantSelectionPolicy::MatchingResolution { width, height } => variants
            .iter()
            .find(|v| {
                v.resolution
                    .is_some_and(|r| r.width == *width && r.height == *height)
            })
            .or_else(|| first_best(variants, |v, best| v.bandwidth > best.bandwidth)),
    }
}

/// A later variant only replaces the current pick when strictly better
fn first_best(
    variants: &[VariantStream],
    better: impl Fn(&VariantStream, &VariantStream) -> bool,
) -> Option<&VariantStream> {
    let mut best: Option<&VariantStream> = None;
    for v in variants {
        if best.is_none_or(|b| better(v, b)) {
            best = Some(v);
        }
    }
    best
}

/// Source of raw playlist text
#[async_trait]
pub trait PlaylistProvider: Send + Sync {
    async fn fetch_playlist(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<String, HlsDownloaderError>;
}

/// Resolve already-fetched playlist text down to a media manifest.
///
/// A master playlist costs one more fetch for the selected variant. A variant
/// that turns out to be another master playlist is rejected.
pub async fn resolve_manifest(
    provider: &dyn PlaylistProvider,
    playlist_url: &Url,
    text: &str,
    policy: &HlsVariantSelectionPolicy,
    token: &CancellationToken,
) -> Result<(PlaylistRef, SegmentManifest), HlsDownloaderError> {
    match parse_playlist(text, playlist_url)? {
        ParsedPlaylist::Media(manifest) => Ok((
            PlaylistRef {
                url: playlist_url.clone(),
                is_master: false,
            },
            manifest,
        )),
        ParsedPlaylist::Master(variants) => {
            let variant =
                select_variant(&variants, policy).ok_or(HlsDownloaderError::EmptyPlaylist)?;
            info!(
                bandwidth = variant.bandwidth,
                uri = %variant.uri,
                candidates = variants.len(),
                "Selected variant stream"
            );

            let media_text = provider.fetch_playlist(&variant.uri, token).await?;
            match parse_playlist(&media_text, &variant.uri)? {
                ParsedPlaylist::Media(manifest) => Ok((
                    PlaylistRef {
                        url: playlist_url.clone(),
                        is_master: true,
                    },
                    manifest,
                )),
                ParsedPlaylist::Master(_) => Err(HlsDownloaderError::MalformedPlaylist(format!(
                    "variant {} is itself a master playlist",
                    variant.uri
                ))),
            }
        }
    }
}

/// reqwest-backed [`PlaylistProvider`] with retry
pub struct PlaylistEngine {
    http_client: Client,
    config: Arc<HlsConfig>,
    retry_policy: RetryPolicy,
}

impl PlaylistEngine {
    pub fn new(http_client: Client, config: Arc<HlsConfig>) -> Self {
        let retry_policy =
            RetryPolicy::for_playlists(&config.playlist_config, &config.fetcher_config);
        Self {
            http_client,
            config,
            retry_policy,
        }
    }

    async fn fetch_once(&self, url: &Url) -> RetryAction<String> {
        let response = match get_with_params(&self.http_client, url, &self.config.base)
            .timeout(self.config.playlist_config.playlist_fetch_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if is_retryable_reqwest_error(&e) => return RetryAction::Retry(e.into()),
            Err(e) => return RetryAction::Fail(e.into()),
        };

        let status = response.status();
        if !status.is_success() {
            let err = HlsDownloaderError::PlaylistFetch(format!("HTTP {status} for {url}"));
            return if status.is_client_error() {
                RetryAction::Fail(err)
            } else {
                RetryAction::Retry(err)
            };
        }

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return RetryAction::Retry(e.into()),
        };
        match String::from_utf8(bytes.to_vec()) {
            Ok(text) => RetryAction::Success(text),
            Err(e) => RetryAction::Fail(HlsDownloaderError::MalformedPlaylist(format!(
                "playlist is not valid UTF-8: {e}"
            ))),
        }
    }
}

#[async_trait]
impl PlaylistProvider for PlaylistEngine {
    async fn fetch_playlist(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<String, HlsDownloaderError> {
        debug!(%url, "Fetching playlist");
        retry_with_backoff(&self.retry_policy, token, move |_| async move {
            tokio::select! {
                _ = token.cancelled() => RetryAction::Fail(HlsDownloaderError::Cancelled),
                action = self.fetch_once(url) => action,
            }
        })
        .await
    }
}
