//! Playlist data model: what a parsed playlist yields and what the ledger persists.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::hls::HlsDownloaderError;

/// The playlist a job was started from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistRef {
    pub url: Url,
    pub is_master: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u64,
    pub height: u64,
}

/// One entry of a master playlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantStream {
    pub uri: Url,
    pub bandwidth: u64,
    pub resolution: Option<Resolution>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    /// Value for an HTTP `Range` header
    pub fn to_header_value(&self) -> String {
        format!(
            "bytes={}-{}",
            self.offset,
            self.offset + self.length.saturating_sub(1)
        )
    }
}

/// Decryption metadata from `#EXT-X-KEY`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRef {
    pub method: String,
    pub uri: Option<Url>,
    pub iv: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// 0-based position in the manifest; the only valid merge order
    pub index: usize,
    pub uri: Url,
    pub byte_range: Option<ByteRange>,
    pub duration_seconds: f64,
    pub encryption_key: Option<KeyRef>,
}

impl Segment {
    /// Length in bytes when the playlist pins it down
    pub fn expected_len(&self) -> Option<u64> {
        self.byte_range.map(|r| r.length)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentManifest {
    pub segments: Vec<Segment>,
    pub target_duration_seconds: u64,
    pub media_sequence: u64,
    pub end_of_stream: bool,
}

impl SegmentManifest {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration_seconds).sum()
    }

    /// First key that actually encrypts something
    pub fn encryption(&self) -> Option<&KeyRef> {
        self.segments.iter().find_map(|s| s.encryption_key.as_ref())
    }

    /// Indices must run `0..len` with no gaps or duplicates
    pub fn check_indices(&self) -> Result<(), HlsDownloaderError> {
        match self
            .segments
            .iter()
            .enumerate()
            .find(|(position, segment)| segment.index != *position)
        {
            Some((position, segment)) => Err(HlsDownloaderError::MalformedPlaylist(format!(
                "segment at position {position} has index {}",
                segment.index
            ))),
            None => Ok(()),
        }
    }

    /// SHA-256 over segment URIs and byte ranges, hex encoded.
    /// Changes whenever the playlist would yield different bytes.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for segment in &self.segments {
            hasher.update(segment.uri.as_str().as_bytes());
            if let Some(range) = segment.byte_range {
                hasher.update(format!("@{}+{}", range.offset, range.length).as_bytes());
            }
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Serialize back to a media playlist.
    ///
    /// Segment URIs come out absolute. Keys are not written.
    /// `#EXTINF` durations are written at f32 precision.
    pub fn to_m3u8(&self) -> Result<String, HlsDownloaderError> {
        let playlist = m3u8_rs::MediaPlaylist {
            target_duration: self.target_duration_seconds,
            media_sequence: self.media_sequence,
            end_list: self.end_of_stream,
            segments: self
                .segments
                .iter()
                .map(|segment| m3u8_rs::MediaSegment {
                    uri: segment.uri.to_string(),
                    duration: segment.duration_seconds as f32,
                    byte_range: segment.byte_range.map(|r| m3u8_rs::ByteRange {
                        length: r.length,
                        offset: Some(r.offset),
                    }),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let mut out = Vec::new();
        playlist.write_to(&mut out)?;
        String::from_utf8(out)
            .map_err(|e| HlsDownloaderError::MalformedPlaylist(format!("non UTF-8 output: {e}")))
    }
}

/// Either side of a playlist parse
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedPlaylist {
    Master(Vec<VariantStream>),
    Media(SegmentManifest),
}

/// A segment whose file was verified complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub segment_index: usize,
    pub byte_size: u64,
    /// Hex SHA-256 of the file contents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// `<prefix><index>`, e.g. `segment-7`
pub fn segment_file_name(prefix: &str, index: usize) -> String {
    format!("{prefix}{index}")
}
