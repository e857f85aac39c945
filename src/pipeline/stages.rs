// Stage runners: one input artifact in, one output artifact out

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::json;

use super::discover::{has_extension, video_stem};
use crate::activity::{load_activity_report, ActivityGate};
use crate::artifacts::write_json_atomic;
use crate::capability::Capabilities;
use crate::config::PipelineConfig;
use crate::constants::*;
use crate::error::{PipelineError, Result};
use crate::events::{load_events_summary, EventExtractor};
use crate::labeling::{export_yolo, load_proposals, BehaviorLabeler, FrameSize};
use crate::state::Stage;
use crate::timeline::{load_chunk_index, TimeIndexer};

/// What a finished stage hands to the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub output: PathBuf,
    pub metadata: serde_json::Value,
}

/// Per-video artifact directories under `data_processing/<stem>/`
#[derive(Debug, Clone, PartialEq)]
pub struct VideoLayout {
    pub root: PathBuf,
    pub chunks: PathBuf,
    pub active_chunks: PathBuf,
    pub events: PathBuf,
    pub proposals: PathBuf,
}

impl VideoLayout {
    pub fn new(data_processing: &Path, video: &str) -> Self {
        let root = data_processing.join(video_stem(video));
        Self {
            chunks: root.join(CHUNKS_FOLDER),
            active_chunks: root.join(ACTIVE_CHUNKS_FOLDER),
            events: root.join(EVENTS_FOLDER),
            proposals: root.join(PROPOSALS_FOLDER),
            root,
        }
    }
}

pub(crate) struct StageRunner<'a> {
    config: &'a PipelineConfig,
    caps: &'a Capabilities,
}

impl<'a> StageRunner<'a> {
    pub fn new(config: &'a PipelineConfig, caps: &'a Capabilities) -> Self {
        Self { config, caps }
    }

    pub fn run(&self, video: &str, stage: Stage, input: &Path) -> Result<StageOutcome> {
        let layout = VideoLayout::new(&self.config.directories.data_processing, video);
        match stage {
            Stage::Conversion => self.convert(video, input),
            Stage::Chunking => self.chunk(input, &layout),
            Stage::Filtering => self.filter(video, input, &layout),
            Stage::Detection => self.detect(video, input, &layout),
            Stage::Labeling => self.label(video, input, &layout),
            Stage::Review => self.review(video, input),
        }
    }

    fn convert(&self, video: &str, source: &Path) -> Result<StageOutcome> {
        if !source.is_file() {
            return Err(PipelineError::SourceUnreadable(format!(
                "{} does not exist",
                source.display()
            )));
        }

        if has_extension(source, &self.config.capabilities.passthrough_extensions) {
            log::info!("[{}] Conversion skipped, already a passthrough container", video);
            return Ok(StageOutcome {
                output: source.to_path_buf(),
                metadata: json!({ "conversion_skipped": true }),
            });
        }

        let out_dir = &self.config.directories.videos_converted;
        std::fs::create_dir_all(out_dir)?;
        let output = out_dir.join(format!("{}{}.mp4", video_stem(video), CONVERTED_SUFFIX));

        log::info!("[{}] Converting to {}", video, output.display());
        self.caps.encoder.transcode(source, &output)?;

        Ok(StageOutcome {
            output,
            metadata: json!({ "conversion_skipped": false, "source": source }),
        })
    }

    fn chunk(&self, input: &Path, layout: &VideoLayout) -> Result<StageOutcome> {
        let indexer = TimeIndexer::new(
            self.caps.prober.as_ref(),
            self.caps.encoder.as_ref(),
            &self.config.chunking,
        );
        let index = indexer.chunk_video(input, &layout.chunks)?;

        Ok(StageOutcome {
            output: TimeIndexer::index_path(&layout.chunks),
            metadata: json!({
                "total_chunks": index.total_chunks,
                "incomplete_chunks": index.incomplete_chunks,
                "fps": index.video_properties.fps,
                "total_frames": index.video_properties.total_frames,
            }),
        })
    }

    fn filter(&self, video: &str, input: &Path, layout: &VideoLayout) -> Result<StageOutcome> {
        let index = load_chunk_index(input)?;
        let gate = ActivityGate::new(
            self.caps.frames.as_ref(),
            self.caps.detector.as_ref(),
            &self.config.activity_filter,
        );
        let report = gate.filter_chunks(video, &index.chunks)?;

        let output = layout.active_chunks.join(ACTIVITY_REPORT_FILENAME);
        write_json_atomic(&output, &report)?;

        Ok(StageOutcome {
            output,
            metadata: json!({
                "active_chunks": report.statistics.active_chunks,
                "inactive_chunks": report.statistics.inactive_chunks,
            }),
        })
    }

    fn detect(&self, video: &str, input: &Path, layout: &VideoLayout) -> Result<StageOutcome> {
        let report = load_activity_report(input)?;
        let chunks: Vec<_> = report.active_chunks.into_iter().map(|a| a.chunk).collect();

        let extractor = EventExtractor::new(&self.config.event_detector);
        let summary = extractor.detect_events_batch(self.caps.tracker.as_ref(), video, &chunks)?;

        let output = layout.events.join(EVENTS_SUMMARY_FILENAME);
        write_json_atomic(&output, &summary)?;

        Ok(StageOutcome {
            output,
            metadata: json!({
                "total_events": summary.statistics.total_events,
                "chunks_with_events": summary.statistics.chunks_with_events,
            }),
        })
    }

    fn label(&self, video: &str, input: &Path, layout: &VideoLayout) -> Result<StageOutcome> {
        let summary = load_events_summary(input)?;
        let report = BehaviorLabeler::new(&self.config.auto_labeler)
            .generate_proposals_batch(video, &summary.events);

        let output = layout.proposals.join(PROPOSALS_FILENAME);
        write_json_atomic(&output, &report)?;

        // Boxes are normalized against the geometry of the chunk each event came from
        let chunk_of: HashMap<&str, &Path> = summary
            .events
            .iter()
            .map(|e| (e.event_id.as_str(), e.chunk_filepath.as_path()))
            .collect();
        let mut probed: HashMap<PathBuf, Option<FrameSize>> = HashMap::new();
        let yolo = export_yolo(&report.proposals, &layout.proposals.join(YOLO_FOLDER), |p| {
            let chunk = *chunk_of.get(p.event_id.as_str())?;
            *probed.entry(chunk.to_path_buf()).or_insert_with(|| {
                match self.caps.prober.probe(chunk) {
                    Ok(info) => FrameSize::new(info.width, info.height),
                    Err(e) => {
                        log::warn!("[{}] Cannot probe {}: {}", video, chunk.display(), e);
                        None
                    }
                }
            })
        })?;

        Ok(StageOutcome {
            output,
            metadata: json!({
                "total_proposals": report.proposals.len(),
                "needs_review": report.statistics.needs_review,
                "yolo_files": yolo.files_written,
                "yolo_skipped": yolo.proposals_skipped,
            }),
        })
    }

    /// Review is done by people elsewhere; the pipeline only records what awaits them.
    fn review(&self, video: &str, input: &Path) -> Result<StageOutcome> {
        let proposals = load_proposals(input)?;
        let pending = proposals.proposals.iter().filter(|p| p.needs_review).count();
        log::info!("[{}] {} proposals awaiting manual review", video, pending);

        Ok(StageOutcome {
            output: input.to_path_buf(),
            metadata: json!({ "review_skipped": true, "pending_review": pending }),
        })
    }
}
