// HLS Segment Merger: concatenates verified segment files into the final artifact.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufWriter};

use crate::Logger;
use crate::hls::HlsDownloaderError;
use crate::hls::config::HlsConfig;
use crate::hls::ledger::{ResumeLedger, is_complete, part_path};
use crate::hls::manifest::SegmentManifest;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub segments: usize,
    pub bytes: u64,
}

pub struct SegmentMerger {
    config: Arc<HlsConfig>,
    log: Arc<dyn Logger>,
}

impl SegmentMerger {
    pub fn new(config: Arc<HlsConfig>, log: Arc<dyn Logger>) -> Self {
        Self { config, log }
    }

    /// Concatenate every segment of `manifest` from `temp_dir` into `output_path`.
    ///
    /// Each segment file is checked against the ledger again before anything is
    /// written. The output is assembled at `<output_path>.part` and renamed into
    /// place, so `output_path` never holds a partial file. `temp_dir` is removed
    /// only after the rename succeeded.
    pub async fn merge(
        &self,
        manifest: &SegmentManifest,
        temp_dir: &Path,
        output_path: &Path,
    ) -> Result<MergeReport, HlsDownloaderError> {
        let output_config = &self.config.output_config;
        let ledger = ResumeLedger::load_state(temp_dir, output_config).await?;
        let entries: HashMap<usize, _> = ledger
            .entries()
            .await
            .into_iter()
            .map(|e| (e.segment_index, e))
            .collect();

        for segment in &manifest.segments {
            let verified = match entries.get(&segment.index) {
                Some(entry) => is_complete(&ledger.segment_path(segment.index), entry, segment).await,
                None => false,
            };
            if !verified {
                return Err(HlsDownloaderError::IncompleteSegment {
                    index: segment.index,
                });
            }
        }

        let tmp_output = part_path(output_path);
        let bytes = match self.concatenate(manifest, &ledger, &tmp_output).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp_output).await;
                return Err(HlsDownloaderError::MergeFailed(format!(
                    "writing {}: {e}",
                    tmp_output.display()
                )));
            }
        };

        if let Err(e) = tokio::fs::rename(&tmp_output, output_path).await {
            let _ = tokio::fs::remove_file(&tmp_output).await;
            return Err(HlsDownloaderError::MergeFailed(format!(
                "renaming into {}: {e}",
                output_path.display()
            )));
        }

        self.log.debug(&format!(
            "Merged {} segment(s) into {} ({bytes} bytes)",
            manifest.len(),
            output_path.display()
        ));

        if output_config.remove_temp_dir_on_success {
            if let Err(e) = tokio::fs::remove_dir_all(temp_dir).await {
                self.log.warn(&format!(
                    "Could not remove temp directory {}: {e}",
                    temp_dir.display()
                ));
            }
        }

        Ok(MergeReport {
            segments: manifest.len(),
            bytes,
        })
    }

    async fn concatenate(
        &self,
        manifest: &SegmentManifest,
        ledger: &ResumeLedger,
        tmp_output: &Path,
    ) -> std::io::Result<u64> {
        if let Some(parent) = tmp_output.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = tokio::fs::File::create(tmp_output).await?;
        let mut writer = BufWriter::with_capacity(self.config.output_config.merge_buffer_size, file);
        let mut total = 0u64;

        // manifest order is ascending index order
        for segment in &manifest.segments {
            let mut source = tokio::fs::File::open(ledger.segment_path(segment.index)).await?;
            total += tokio::io::copy(&mut source, &mut writer).await?;
        }

        writer.flush().await?;
        let file = writer.into_inner();
        file.sync_all().await?;
        Ok(total)
    }
}
