use std::path::PathBuf;
use std::sync::Arc;

use crate::hls::state::JobState;

/// Progress notifications from a running acquisition
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    StateChanged(JobState),
    /// Emitted once the ledger has been matched against the manifest
    ResumePlanned {
        total_segments: usize,
        already_complete: usize,
        already_complete_bytes: u64,
    },
    SegmentCompleted {
        index: usize,
        byte_size: u64,
    },
    MergeCompleted {
        output: PathBuf,
        bytes: u64,
    },
}

pub type OnEvent = Arc<dyn Fn(AcquisitionEvent) + Send + Sync>;
