use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use maya_engine::hls::{AcquisitionEvent, JobState};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

fn download_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {pos}/{len} segments, {bytes} @ {bytes_per_sec}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

struct BarState {
    bar: ProgressBar,
    bytes: u64,
}

/// Renders acquisition events as a single segment progress bar
#[derive(Clone)]
pub struct ProgressManager {
    multi: MultiProgress,
    state: Arc<Mutex<Option<BarState>>>,
    disabled: bool,
}

impl ProgressManager {
    pub fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            state: Arc::new(Mutex::new(None)),
            disabled: false,
        }
    }

    pub fn new_disabled(multi: MultiProgress) -> Self {
        Self {
            disabled: true,
            ..Self::new(multi)
        }
    }

    pub fn handle_event(&self, event: AcquisitionEvent) {
        if self.disabled {
            return;
        }

        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match event {
            AcquisitionEvent::ResumePlanned {
                total_segments,
                already_complete,
                already_complete_bytes,
            } => {
                let bar = self.multi.add(ProgressBar::new(total_segments as u64));
                bar.set_style(download_style());
                bar.set_message("Downloading segments");
                bar.set_position(already_complete as u64);
                bar.enable_steady_tick(Duration::from_millis(500));
                *state = Some(BarState {
                    bar,
                    bytes: already_complete_bytes,
                });
            }
            AcquisitionEvent::SegmentCompleted { byte_size, .. } => {
                if let Some(s) = state.as_mut() {
                    s.bytes += byte_size;
                    s.bar.inc(1);
                    s.bar.set_message(format!(
                        "Downloading segments ({})",
                        super::format_bytes(s.bytes)
                    ));
                }
            }
            AcquisitionEvent::StateChanged(JobState::Merging) => {
                if let Some(s) = state.as_ref() {
                    s.bar.set_message("Merging segments");
                }
            }
            AcquisitionEvent::MergeCompleted { output, .. } => {
                if let Some(s) = state.take() {
                    s.bar
                        .finish_with_message(format!("Finished {}", output.display()));
                }
            }
            AcquisitionEvent::StateChanged(JobState::Failed(stage)) => {
                if let Some(s) = state.take() {
                    s.bar.abandon_with_message(format!("Failed at stage {stage}"));
                }
            }
            AcquisitionEvent::StateChanged(_) => {}
        }
    }

    #[inline]
    #[allow(unused)]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }
}
