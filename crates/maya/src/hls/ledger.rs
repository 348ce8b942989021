//! Resume ledger: which segments already have a complete, verified local copy.
//!
//! Completed segments are recorded in `<temp dir>/<ledger file>` as JSON. The
//! record alone is never trusted: a segment only counts as done when its file
//! on disk still matches the recorded size and checksum.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::hls::HlsDownloaderError;
use crate::hls::config::HlsOutputConfig;
use crate::hls::manifest::{LedgerEntry, Segment, SegmentManifest, segment_file_name};

const LEDGER_VERSION: u32 = 1;
const PART_SUFFIX: &str = "part";

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    #[serde(default)]
    manifest_digest: Option<String>,
    #[serde(default)]
    entries: Vec<LedgerEntry>,
}

#[derive(Debug, Default)]
struct LedgerState {
    manifest_digest: Option<String>,
    entries: BTreeMap<usize, LedgerEntry>,
}

/// Outcome of matching the ledger against a manifest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumePlan {
    /// Indices still to download, ascending
    pub pending: Vec<usize>,
    /// Indices whose files verified complete
    pub completed: Vec<usize>,
    /// Bytes already on disk for `completed`
    pub completed_bytes: u64,
    /// Entries were dropped because the playlist changed since they were written
    pub manifest_changed: bool,
}

#[derive(Debug)]
pub struct ResumeLedger {
    dir: PathBuf,
    ledger_path: PathBuf,
    segment_prefix: String,
    state: Mutex<LedgerState>,
}

impl ResumeLedger {
    /// Open the ledger in `dir`, creating the directory if needed.
    ///
    /// Leftover `*.part` files from an interrupted run are deleted. An unreadable
    /// ledger file is logged and treated as empty.
    pub async fn load_state(
        dir: &Path,
        config: &HlsOutputConfig,
    ) -> Result<Self, HlsDownloaderError> {
        tokio::fs::create_dir_all(dir).await?;
        remove_partial_files(dir).await?;

        let ledger_path = dir.join(&config.ledger_file_name);
        let state = match tokio::fs::read(&ledger_path).await {
            Ok(bytes) => match serde_json::from_slice::<LedgerFile>(&bytes) {
                Ok(file) if file.version == LEDGER_VERSION => LedgerState {
                    manifest_digest: file.manifest_digest,
                    entries: file
                        .entries
                        .into_iter()
                        .map(|e| (e.segment_index, e))
                        .collect(),
                },
                Ok(file) => {
                    warn!(
                        path = %ledger_path.display(),
                        version = file.version,
                        "Ignoring ledger with unknown version"
                    );
                    LedgerState::default()
                }
                Err(e) => {
                    warn!(path = %ledger_path.display(), error = %e, "Ignoring unreadable ledger");
                    LedgerState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LedgerState::default(),
            Err(e) => return Err(e.into()),
        };

        debug!(
            dir = %dir.display(),
            entries = state.entries.len(),
            "Loaded resume ledger"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            ledger_path,
            segment_prefix: config.segment_file_prefix.clone(),
            state: Mutex::new(state),
        })
    }

    /// Clear `dir` completely and start an empty ledger in it
    pub async fn reset(dir: &Path, config: &HlsOutputConfig) -> Result<Self, HlsDownloaderError> {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Self::load_state(dir, config).await
    }

    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.dir.join(segment_file_name(&self.segment_prefix, index))
    }

    /// Snapshot of the recorded entries, ordered by index
    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.state.lock().await.entries.values().cloned().collect()
    }

    /// Record a verified segment and persist the ledger
    pub async fn record(&self, entry: LedgerEntry) -> Result<(), HlsDownloaderError> {
        let mut state = self.state.lock().await;
        state.entries.insert(entry.segment_index, entry);
        self.persist(&state).await
    }

    /// Bind the ledger to `manifest` and split its segments into done and pending.
    ///
    /// Entries recorded against a different manifest are discarded. Entries whose
    /// files fail verification are dropped so the segment is fetched again.
    pub async fn plan(&self, manifest: &SegmentManifest) -> Result<ResumePlan, HlsDownloaderError> {
        let digest = manifest.digest();
        let mut state = self.state.lock().await;
        let mut plan = ResumePlan::default();

        if state
            .manifest_digest
            .as_ref()
            .is_some_and(|recorded| *recorded != digest)
        {
            state.entries.clear();
            plan.manifest_changed = true;
        }
        state.manifest_digest = Some(digest);

        for segment in &manifest.segments {
            let verified = match state.entries.get(&segment.index) {
                Some(entry) => is_complete(&self.segment_path(segment.index), entry, segment).await,
                None => false,
            };
            if verified {
                plan.completed.push(segment.index);
                plan.completed_bytes += state.entries[&segment.index].byte_size;
            } else {
                state.entries.remove(&segment.index);
                plan.pending.push(segment.index);
            }
        }
        state.entries.retain(|index, _| *index < manifest.len());

        self.persist(&state).await?;
        Ok(plan)
    }

    // Written to a sibling file, then renamed into place.
    async fn persist(&self, state: &LedgerState) -> Result<(), HlsDownloaderError> {
        let file = LedgerFile {
            version: LEDGER_VERSION,
            manifest_digest: state.manifest_digest.clone(),
            entries: state.entries.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        let tmp = part_path(&self.ledger_path);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.ledger_path).await?;
        Ok(())
    }
}

/// `true` only when the file at `path` is a complete copy of `segment`:
/// it exists, is non-empty, matches the recorded size (and the byte range
/// length when the playlist gives one), and matches the recorded checksum.
pub async fn is_complete(path: &Path, entry: &LedgerEntry, segment: &Segment) -> bool {
    if entry.segment_index != segment.index {
        return false;
    }
    let len = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return false,
    };
    if len == 0 || len != entry.byte_size {
        return false;
    }
    if segment.expected_len().is_some_and(|expected| expected != len) {
        return false;
    }
    match &entry.checksum {
        Some(expected) => match file_sha256(path).await {
            Ok(actual) => actual.eq_ignore_ascii_case(expected),
            Err(_) => false,
        },
        None => true,
    }
}

/// Hex SHA-256 of a file's contents
pub async fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// `<path>.part`, the in-progress name for any file written by the pipeline
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PART_SUFFIX);
    path.with_file_name(name)
}

async fn remove_partial_files(dir: &Path) -> Result<(), HlsDownloaderError> {
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == PART_SUFFIX) {
            debug!(path = %path.display(), "Removing stale partial file");
            tokio::fs::remove_file(&path).await?;
        }
    }
    Ok(())
}
