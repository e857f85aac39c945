// Time indexing: split a recording's frame timeline into fixed-duration, addressable chunks

mod indexer;

pub use indexer::TimeIndexer;

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::artifacts::read_json;
use crate::error::{PipelineError, Result};

/// Planned frame range and wall-clock span of one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub index: usize,
    pub start_frame: u64,
    pub end_frame: u64,
    pub start_ts: NaiveDateTime,
    pub end_ts: NaiveDateTime,
    pub duration_s: f64,
}

impl ChunkSpan {
    pub fn frame_count(&self) -> u64 {
        self.end_frame - self.start_frame
    }

    pub fn chunk_id(&self) -> String {
        chunk_id(self.index)
    }
}

pub fn chunk_id(index: usize) -> String {
    format!("chunk_{:04}", index)
}

/// Offset a timestamp by fractional seconds (microsecond precision)
pub fn offset_seconds(ts: NaiveDateTime, secs: f64) -> NaiveDateTime {
    ts + chrono::Duration::microseconds((secs * 1_000_000.0).round() as i64)
}

/// Plan chunk boundaries.
///
/// `frames_per_chunk = floor(fps * chunk_duration)`, every chunk but the last holds exactly
/// that many frames, and the frame ranges union to `[0, total_frames)`. Chunk `i` starts at
/// `start + i * chunk_duration` and lasts `frame_count / fps` seconds.
pub fn plan_chunks(
    total_frames: u64,
    fps: f64,
    chunk_duration_s: f64,
    start: NaiveDateTime,
) -> Result<Vec<ChunkSpan>> {
    if total_frames == 0 {
        return Err(PipelineError::SourceUnreadable("video reports zero frames".to_string()));
    }
    if fps.is_nan() || fps <= 0.0 {
        return Err(PipelineError::SourceUnreadable(format!("invalid frame rate {}", fps)));
    }
    if chunk_duration_s.is_nan() || chunk_duration_s <= 0.0 {
        return Err(PipelineError::Configuration(format!(
            "chunk duration must be positive, got {}",
            chunk_duration_s
        )));
    }

    let frames_per_chunk = (fps * chunk_duration_s).floor() as u64;
    if frames_per_chunk == 0 {
        return Err(PipelineError::SourceUnreadable(format!(
            "frame rate {} too low for {}s chunks",
            fps, chunk_duration_s
        )));
    }

    let num_chunks = total_frames.div_ceil(frames_per_chunk);
    let spans = (0..num_chunks)
        .map(|i| {
            let start_frame = i * frames_per_chunk;
            let end_frame = ((i + 1) * frames_per_chunk).min(total_frames);
            let duration_s = (end_frame - start_frame) as f64 / fps;
            let start_ts = offset_seconds(start, i as f64 * chunk_duration_s);
            ChunkSpan {
                index: i as usize,
                start_frame,
                end_frame,
                start_ts,
                end_ts: offset_seconds(start_ts, duration_s),
                duration_s,
            }
        })
        .collect();

    Ok(spans)
}

/// One extracted chunk as recorded in the chunk index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    #[serde(rename = "chunk_index")]
    pub index: usize,
    pub filepath: PathBuf,
    #[serde(rename = "start_timestamp")]
    pub start_ts: NaiveDateTime,
    #[serde(rename = "end_timestamp")]
    pub end_ts: NaiveDateTime,
    #[serde(rename = "duration_seconds")]
    pub duration_s: f64,
    pub frame_count: u64,
    pub start_frame: u64,
    pub end_frame: u64,
    pub fps: f64,
    pub resolution: String,
    #[serde(default)]
    pub incomplete: bool,
    #[serde(default)]
    pub frames_written: u64,
}

impl Chunk {
    pub fn from_span(span: &ChunkSpan, filepath: PathBuf, fps: f64, resolution: String) -> Self {
        Chunk {
            chunk_id: span.chunk_id(),
            index: span.index,
            filepath,
            start_ts: span.start_ts,
            end_ts: span.end_ts,
            duration_s: span.duration_s,
            frame_count: span.frame_count(),
            start_frame: span.start_frame,
            end_frame: span.end_frame,
            fps,
            resolution,
            incomplete: false,
            frames_written: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProperties {
    pub total_frames: u64,
    pub fps: f64,
    pub resolution: String,
    pub duration_seconds: f64,
}

/// `chunks_index.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkIndex {
    pub source_video: PathBuf,
    pub total_chunks: usize,
    pub chunk_duration_seconds: f64,
    pub start_time: NaiveDateTime,
    pub video_properties: VideoProperties,
    #[serde(default)]
    pub incomplete_chunks: usize,
    pub chunks: Vec<Chunk>,
}

pub fn load_chunk_index(path: &Path) -> Result<ChunkIndex> {
    read_json(path)
}
