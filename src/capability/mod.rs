// External capabilities: detection, tracking, encoding, probing, frame decoding
//
// The pipeline only sees these traits. Production implementations shell out to
// ffmpeg/ffprobe and to command-line detector/tracker programs; tests use fakes.

mod bbox;
mod command;
mod ffmpeg;
mod stream;
#[cfg(test)]
pub mod testing;

pub use bbox::{BBox, BBoxGate};
pub use command::{CommandDetector, CommandTracker};
pub use ffmpeg::{FfmpegEncoder, FfmpegFrameSource, FfprobeProber};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::Result;

/// Pixel layout of decoded frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Gray,
    Rgb24,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray => 1,
            PixelFormat::Rgb24 => 3,
        }
    }

    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Gray => "gray",
            PixelFormat::Rgb24 => "rgb24",
        }
    }
}

/// One decoded frame, `index` counted from the start of the file
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn byte_len(width: u32, height: u32, format: PixelFormat) -> usize {
        width as usize * height as usize * format.channels()
    }
}

/// Person detection on a single frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f64,
}

/// Tracker output for one person on one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedDetection {
    pub frame_index: u64,
    pub track_id: i64,
    pub bbox: BBox,
    pub confidence: f64,
}

/// Probe result for a video file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub total_frames: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl VideoInfo {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

pub type FrameStream<'a> = Box<dyn Iterator<Item = Result<Frame>> + 'a>;
pub type DetectionStream<'a> = Box<dyn Iterator<Item = Result<TrackedDetection>> + 'a>;

pub trait Detector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;
}

pub trait Tracker {
    /// Lazily stream tracked detections for one chunk file
    fn track(&self, chunk_path: &Path) -> Result<DetectionStream<'_>>;
}

pub trait Encoder {
    /// Write frames `[start_frame, end_frame)` of `source` to `out_path`.
    /// Returns the number of frames actually written.
    fn extract_segment(
        &self,
        source: &Path,
        start_frame: u64,
        end_frame: u64,
        fps: f64,
        out_path: &Path,
    ) -> Result<u64>;

    /// Re-encode a whole recording into a container the rest of the pipeline can read
    fn transcode(&self, source: &Path, out_path: &Path) -> Result<()>;
}

pub trait VideoProber {
    fn probe(&self, path: &Path) -> Result<VideoInfo>;
}

pub trait FrameSource {
    /// Decode every `every_nth` frame (0, N, 2N, ...) of `path`
    fn frames(&self, path: &Path, every_nth: u64, format: PixelFormat) -> Result<FrameStream<'_>>;
}

/// Everything the pipeline needs from the outside world, built once per run.
pub struct Capabilities {
    pub prober: Box<dyn VideoProber>,
    pub encoder: Box<dyn Encoder>,
    pub frames: Box<dyn FrameSource>,
    pub detector: Box<dyn Detector>,
    pub tracker: Box<dyn Tracker>,
}

impl Capabilities {
    /// Production wiring: ffmpeg for media, configured commands for vision
    pub fn from_config(config: &PipelineConfig) -> Self {
        let caps = &config.capabilities;
        let timeout = config.capability_timeout();
        let backend = caps.backend;

        log::info!(
            "Capabilities: backend={:?} device={} codec={}",
            backend,
            backend.device(),
            backend.video_codec()
        );

        Capabilities {
            prober: Box::new(FfprobeProber::new(timeout)),
            encoder: Box::new(FfmpegEncoder::new(backend, timeout)),
            frames: Box::new(FfmpegFrameSource::new(timeout)),
            detector: Box::new(CommandDetector::new(
                caps.detector.clone(),
                backend,
                config.activity_filter.person_conf_threshold,
                timeout,
            )),
            tracker: Box::new(CommandTracker::new(
                caps.tracker.clone(),
                backend,
                config.event_detector.conf_threshold,
                config.event_detector.iou_threshold,
                timeout,
            )),
        }
    }
}
