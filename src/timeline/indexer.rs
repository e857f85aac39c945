// Chunk extraction driver and chunk index writer

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{Local, NaiveDateTime};

use super::{plan_chunks, Chunk, ChunkIndex, ChunkSpan, VideoProperties};
use crate::artifacts::write_json_atomic;
use crate::capability::{Encoder, VideoProber};
use crate::config::ChunkingConfig;
use crate::constants::{CHUNK_INDEX_FILENAME, STAGE_CHUNKING};
use crate::error::{PipelineError, Result};
use crate::progress::StageProgress;

/// Flag a chunk whose encoder output fell short of the expected frame count
pub fn check_completeness(chunk_id: &str, expected: u64, written: u64, min_ratio: f64) -> Result<()> {
    if (written as f64) < expected as f64 * min_ratio {
        return Err(PipelineError::IncompleteArtifact(format!(
            "{}: {} of {} frames written",
            chunk_id, written, expected
        )));
    }
    Ok(())
}

pub struct TimeIndexer<'a> {
    prober: &'a dyn VideoProber,
    encoder: &'a dyn Encoder,
    config: &'a ChunkingConfig,
}

impl<'a> TimeIndexer<'a> {
    pub fn new(prober: &'a dyn VideoProber, encoder: &'a dyn Encoder, config: &'a ChunkingConfig) -> Self {
        Self { prober, encoder, config }
    }

    pub fn index_path(output_dir: &Path) -> PathBuf {
        output_dir.join(CHUNK_INDEX_FILENAME)
    }

    /// Probe `source`, extract every planned chunk into `output_dir` and write `chunks_index.json`.
    /// Damaged chunks are kept in the index and flagged incomplete.
    pub fn chunk_video(&self, source: &Path, output_dir: &Path) -> Result<ChunkIndex> {
        let info = self.prober.probe(source)?;
        let start_time = self.start_time();
        let spans = plan_chunks(info.total_frames, info.fps, self.config.chunk_duration_seconds, start_time)?;
        let resolution = info.resolution();

        std::fs::create_dir_all(output_dir)?;

        let label = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        log::info!(
            "[{}] Chunking {} frames @ {:.2} fps into {} chunks of {}s",
            label,
            info.total_frames,
            info.fps,
            spans.len(),
            self.config.chunk_duration_seconds
        );

        let started = Instant::now();
        let total = spans.len() as u64;
        let mut chunks = Vec::with_capacity(spans.len());
        for (i, span) in spans.iter().enumerate() {
            let chunk = self.extract_chunk(source, span, info.fps, &resolution, output_dir);
            let current = i as u64 + 1;
            if StageProgress::should_log(current, total) {
                StageProgress::new(&label, STAGE_CHUNKING, current, total)
                    .with_elapsed(started.elapsed())
                    .with_message(&chunk.chunk_id)
                    .log();
            }
            chunks.push(chunk);
        }

        let incomplete_chunks = chunks.iter().filter(|c| c.incomplete).count();
        if incomplete_chunks > 0 {
            log::warn!("[{}] {} of {} chunks incomplete", label, incomplete_chunks, chunks.len());
        }

        let index = ChunkIndex {
            source_video: source.to_path_buf(),
            total_chunks: chunks.len(),
            chunk_duration_seconds: self.config.chunk_duration_seconds,
            start_time,
            video_properties: VideoProperties {
                total_frames: info.total_frames,
                fps: info.fps,
                resolution,
                duration_seconds: info.total_frames as f64 / info.fps,
            },
            incomplete_chunks,
            chunks,
        };

        write_json_atomic(&Self::index_path(output_dir), &index)?;
        Ok(index)
    }

    /// Extract one planned chunk. Never fails: encoder errors and short output mark the chunk incomplete.
    pub fn extract_chunk(
        &self,
        source: &Path,
        span: &ChunkSpan,
        fps: f64,
        resolution: &str,
        output_dir: &Path,
    ) -> Chunk {
        let filepath = output_dir.join(format!("{}.mp4", span.chunk_id()));
        let mut chunk = Chunk::from_span(span, filepath, fps, resolution.to_string());

        match self
            .encoder
            .extract_segment(source, span.start_frame, span.end_frame, fps, &chunk.filepath)
        {
            Ok(written) => {
                chunk.frames_written = written;
                if let Err(e) =
                    check_completeness(&chunk.chunk_id, span.frame_count(), written, self.config.min_complete_ratio)
                {
                    log::warn!("{}", e);
                    chunk.incomplete = true;
                }
            }
            Err(e) => {
                log::warn!("{}: extraction failed, keeping as incomplete: {}", chunk.chunk_id, e);
                chunk.incomplete = true;
            }
        }

        chunk
    }

    fn start_time(&self) -> NaiveDateTime {
        self.config
            .start_time
            .unwrap_or_else(|| Local::now().naive_local())
    }
}
