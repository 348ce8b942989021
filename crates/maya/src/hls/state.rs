//! Job lifecycle: `Idle → PlaylistFetched → ManifestReady → Downloading → Merging → Done`,
//! with `Failed(stage)` reachable from every non-terminal state.

use std::fmt;

use crate::hls::HlsDownloaderError;
use crate::hls::events::{AcquisitionEvent, OnEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStage {
    Idle,
    PlaylistFetched,
    ManifestReady,
    Downloading,
    Merging,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStage::Idle => "idle",
            JobStage::PlaylistFetched => "playlist-fetched",
            JobStage::ManifestReady => "manifest-ready",
            JobStage::Downloading => "downloading",
            JobStage::Merging => "merging",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    PlaylistFetched,
    ManifestReady,
    Downloading,
    Merging,
    Done,
    Failed(JobStage),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed(_))
    }

    /// The stage this state corresponds to, `None` once terminal
    pub fn stage(&self) -> Option<JobStage> {
        match self {
            JobState::Idle => Some(JobStage::Idle),
            JobState::PlaylistFetched => Some(JobStage::PlaylistFetched),
            JobState::ManifestReady => Some(JobStage::ManifestReady),
            JobState::Downloading => Some(JobStage::Downloading),
            JobState::Merging => Some(JobStage::Merging),
            JobState::Done | JobState::Failed(_) => None,
        }
    }

    fn successor(&self) -> Option<JobState> {
        match self {
            JobState::Idle => Some(JobState::PlaylistFetched),
            JobState::PlaylistFetched => Some(JobState::ManifestReady),
            JobState::ManifestReady => Some(JobState::Downloading),
            JobState::Downloading => Some(JobState::Merging),
            JobState::Merging => Some(JobState::Done),
            JobState::Done | JobState::Failed(_) => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Done => f.write_str("done"),
            JobState::Failed(stage) => write!(f, "failed({stage})"),
            other => match other.stage() {
                Some(stage) => write!(f, "{stage}"),
                None => Ok(()),
            },
        }
    }
}

/// The single job-level failure: what went wrong and how far the job got
#[derive(Debug, Clone, thiserror::Error)]
#[error("acquisition failed at stage {stage}: {source}")]
pub struct JobError {
    pub stage: JobStage,
    #[source]
    pub source: HlsDownloaderError,
}

impl JobError {
    /// Re-running with the same output path and temp directory makes progress
    pub fn is_resumable(&self) -> bool {
        matches!(self.stage, JobStage::Downloading | JobStage::Merging)
            || matches!(self.source, HlsDownloaderError::Cancelled)
    }

    /// A failed merge needs no re-download
    pub fn needs_download(&self) -> bool {
        self.stage != JobStage::Merging
    }

    pub fn segment_index(&self) -> Option<usize> {
        self.source.segment_index()
    }
}

/// Tracks the current state and reports every change
pub(crate) struct JobStateMachine {
    state: JobState,
    on_event: Option<OnEvent>,
}

impl JobStateMachine {
    pub(crate) fn new(on_event: Option<OnEvent>) -> Self {
        Self {
            state: JobState::Idle,
            on_event,
        }
    }

    pub(crate) fn state(&self) -> JobState {
        self.state
    }

    /// Move to `next`, which must be the direct successor of the current state
    pub(crate) fn advance(&mut self, next: JobState) -> Result<(), HlsDownloaderError> {
        if self.state.successor() != Some(next) {
            return Err(HlsDownloaderError::Configuration(format!(
                "invalid job transition {} -> {next}",
                self.state
            )));
        }
        self.set(next);
        Ok(())
    }

    /// Enter `Failed` at the current stage
    pub(crate) fn fail(&mut self, source: HlsDownloaderError) -> JobError {
        let stage = match self.state {
            JobState::Failed(stage) => stage,
            state => state.stage().unwrap_or(JobStage::Merging),
        };
        self.set(JobState::Failed(stage));
        JobError { stage, source }
    }

    pub(crate) fn emit(&self, event: AcquisitionEvent) {
        if let Some(on_event) = &self.on_event {
            on_event(event);
        }
    }

    fn set(&mut self, state: JobState) {
        self.state = state;
        self.emit(AcquisitionEvent::StateChanged(state));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn happy_path_runs_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut machine = JobStateMachine::new(Some(Arc::new(move |event: AcquisitionEvent| {
            if let AcquisitionEvent::StateChanged(state) = event {
                sink.lock().unwrap().push(state);
            }
        })));

        for next in [
            JobState::PlaylistFetched,
            JobState::ManifestReady,
            JobState::Downloading,
            JobState::Merging,
            JobState::Done,
        ] {
            machine.advance(next).unwrap();
        }

        assert_eq!(machine.state(), JobState::Done);
        assert!(machine.state().is_terminal());
        assert_eq!(seen.lock().unwrap().len(), 5);
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let mut machine = JobStateMachine::new(None);
        assert!(machine.advance(JobState::Downloading).is_err());
        assert_eq!(machine.state(), JobState::Idle);
    }

    #[test]
    fn failure_records_the_furthest_stage() {
        let mut machine = JobStateMachine::new(None);
        machine.advance(JobState::PlaylistFetched).unwrap();
        machine.advance(JobState::ManifestReady).unwrap();
        machine.advance(JobState::Downloading).unwrap();

        let err = machine.fail(HlsDownloaderError::SegmentRejected {
            index: 1,
            status: reqwest::StatusCode::NOT_FOUND,
            url: "http://h/seg1.ts".to_string(),
        });
        assert_eq!(machine.state(), JobState::Failed(JobStage::Downloading));
        assert_eq!(err.stage, JobStage::Downloading);
        assert_eq!(err.segment_index(), Some(1));
        assert!(err.is_resumable());
        assert!(err.needs_download());
        assert!(machine.advance(JobState::Merging).is_err());
        assert_eq!(machine.state().to_string(), "failed(downloading)");
    }

    #[test]
    fn resumability_by_stage() {
        let at = |stage, source| JobError { stage, source };
        assert!(!at(JobStage::Idle, HlsDownloaderError::LiveStream).is_resumable());
        assert!(!at(JobStage::PlaylistFetched, HlsDownloaderError::EmptyPlaylist).is_resumable());
        assert!(at(JobStage::Idle, HlsDownloaderError::Cancelled).is_resumable());

        let merge = at(JobStage::Merging, HlsDownloaderError::MergeFailed("disk full".into()));
        assert!(merge.is_resumable());
        assert!(!merge.needs_download());
    }
}
