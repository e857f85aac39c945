// Activity gate: cheap motion screening, then person confirmation, before tracking runs

pub mod motion;
pub mod person;

pub use person::PersonEvidence;

use std::path::Path;
use std::time::Instant;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::artifacts::read_json;
use crate::capability::{Detector, FrameSource, PixelFormat};
use crate::config::ActivityConfig;
use crate::constants::STAGE_FILTERING;
use crate::error::Result;
use crate::progress::StageProgress;
use crate::timeline::Chunk;

/// Why a chunk was dropped. Exactly one reason per rejected chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    Motion,
    Person,
    /// Listed in the chunk index but gone from disk
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChunkVerdict {
    Active(PersonEvidence),
    Rejected(Rejection, Option<PersonEvidence>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub person_frames: u64,
    pub total_sampled_frames: u64,
    pub activity_score: f64,
    pub filter_timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedChunk {
    pub chunk_id: String,
    pub reason: Rejection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_frames: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub total_chunks: usize,
    pub active_chunks: usize,
    pub inactive_chunks: usize,
    pub motion_rejected: usize,
    pub person_rejected: usize,
    #[serde(default)]
    pub missing_chunks: usize,
    pub processing_time_seconds: f64,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
}

/// `active_chunks_report.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityReport {
    pub statistics: FilterStats,
    pub active_chunks: Vec<ActiveChunk>,
    pub rejected_chunks: Vec<RejectedChunk>,
    pub filter_config: ActivityConfig,
}

pub fn load_activity_report(path: &Path) -> Result<ActivityReport> {
    read_json(path)
}

pub struct ActivityGate<'a> {
    frames: &'a dyn FrameSource,
    detector: &'a dyn Detector,
    config: &'a ActivityConfig,
}

impl<'a> ActivityGate<'a> {
    pub fn new(frames: &'a dyn FrameSource, detector: &'a dyn Detector, config: &'a ActivityConfig) -> Self {
        Self { frames, detector, config }
    }

    /// Screen one chunk. Phase B only runs when phase A found motion.
    pub fn evaluate(&self, chunk: &Chunk) -> Result<ChunkVerdict> {
        if chunk.incomplete && chunk.frames_written == 0 {
            log::warn!("{}: nothing was extracted, rejecting without decoding", chunk.chunk_id);
            return Ok(ChunkVerdict::Rejected(Rejection::Motion, None));
        }
        if !chunk.filepath.is_file() {
            log::warn!("{}: chunk file {} not found, skipping", chunk.chunk_id, chunk.filepath.display());
            return Ok(ChunkVerdict::Rejected(Rejection::Missing, None));
        }

        let gray = self
            .frames
            .frames(&chunk.filepath, self.config.sample_rate_motion, PixelFormat::Gray)?;
        let scan = motion::scan_for_motion(gray, self.config.motion_threshold, self.config.pixel_diff_threshold)?;
        if !scan.found {
            log::debug!(
                "{}: no motion over {} pairs (peak {:.4})",
                chunk.chunk_id,
                scan.pairs_compared,
                scan.peak_fraction
            );
            return Ok(ChunkVerdict::Rejected(Rejection::Motion, None));
        }

        let rgb = self
            .frames
            .frames(&chunk.filepath, self.config.sample_rate_person, PixelFormat::Rgb24)?;
        let evidence = person::count_person_frames(rgb, self.detector, &self.config.bbox)?;
        log::debug!(
            "{}: {} person frames of {} sampled",
            chunk.chunk_id,
            evidence.person_frames,
            evidence.total_sampled_frames
        );

        if evidence.person_frames >= self.config.min_person_frames {
            Ok(ChunkVerdict::Active(evidence))
        } else {
            Ok(ChunkVerdict::Rejected(Rejection::Person, Some(evidence)))
        }
    }

    /// Screen every chunk in index order and build the report
    pub fn filter_chunks(&self, label: &str, chunks: &[Chunk]) -> Result<ActivityReport> {
        let started = Instant::now();
        let mut stats = FilterStats {
            total_chunks: chunks.len(),
            start_time: Some(Local::now().naive_local()),
            ..FilterStats::default()
        };
        let mut active_chunks = Vec::new();
        let mut rejected_chunks = Vec::new();

        for (i, chunk) in chunks.iter().enumerate() {
            match self.evaluate(chunk)? {
                ChunkVerdict::Active(evidence) => {
                    active_chunks.push(ActiveChunk {
                        chunk: chunk.clone(),
                        person_frames: evidence.person_frames,
                        total_sampled_frames: evidence.total_sampled_frames,
                        activity_score: evidence.activity_score,
                        filter_timestamp: Local::now().naive_local(),
                    });
                }
                ChunkVerdict::Rejected(reason, evidence) => {
                    match reason {
                        Rejection::Motion => stats.motion_rejected += 1,
                        Rejection::Person => stats.person_rejected += 1,
                        Rejection::Missing => stats.missing_chunks += 1,
                    }
                    rejected_chunks.push(RejectedChunk {
                        chunk_id: chunk.chunk_id.clone(),
                        reason,
                        person_frames: evidence.map(|e| e.person_frames),
                    });
                }
            }

            let current = i as u64 + 1;
            if StageProgress::should_log(current, chunks.len() as u64) {
                StageProgress::new(label, STAGE_FILTERING, current, chunks.len() as u64)
                    .with_elapsed(started.elapsed())
                    .with_message(format!("{} active", active_chunks.len()))
                    .log();
            }
        }

        stats.active_chunks = active_chunks.len();
        stats.inactive_chunks = rejected_chunks.len();
        stats.processing_time_seconds = started.elapsed().as_secs_f64();
        stats.end_time = Some(Local::now().naive_local());

        log::info!(
            "[{}] Activity gate: {} active, {} rejected for motion, {} rejected for person",
            label,
            stats.active_chunks,
            stats.motion_rejected,
            stats.person_rejected
        );

        Ok(ActivityReport {
            statistics: stats,
            active_chunks,
            rejected_chunks,
            filter_config: self.config.clone(),
        })
    }
}
