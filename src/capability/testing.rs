// In-process fakes for pipeline tests. Keys are path suffixes (`clip/chunks/chunk_0000.mp4`).

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::*;
use crate::error::PipelineError;

fn lookup<'a, V>(map: &'a HashMap<PathBuf, V>, path: &Path) -> Option<&'a V> {
    map.iter().find(|(suffix, _)| path.ends_with(suffix)).map(|(_, v)| v)
}

/// Reports the same geometry for every existing file unless overridden
pub struct FakeProber {
    pub default: VideoInfo,
    pub overrides: HashMap<PathBuf, VideoInfo>,
}

impl FakeProber {
    pub fn new(total_frames: u64, fps: f64) -> Self {
        Self {
            default: VideoInfo { total_frames, fps, width: 8, height: 8 },
            overrides: HashMap::new(),
        }
    }
}

impl VideoProber for FakeProber {
    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        if !path.is_file() {
            return Err(PipelineError::SourceUnreadable(format!("{} does not exist", path.display())));
        }
        Ok(*lookup(&self.overrides, path).unwrap_or(&self.default))
    }
}

/// Writes the frame count it "encoded" into the output file
#[derive(Default)]
pub struct FakeEncoder {
    pub fail_on: HashSet<PathBuf>,
    pub short_on: HashMap<PathBuf, f64>,
    pub extract_calls: Cell<usize>,
    pub transcodes: RefCell<Vec<PathBuf>>,
}

impl Encoder for FakeEncoder {
    fn extract_segment(&self, _source: &Path, start_frame: u64, end_frame: u64, _fps: f64, out_path: &Path) -> Result<u64> {
        self.extract_calls.set(self.extract_calls.get() + 1);
        if lookup_set(&self.fail_on, out_path) {
            return Err(PipelineError::Capability(format!("encoder crashed on {}", out_path.display())));
        }
        let expected = end_frame - start_frame;
        let ratio = lookup(&self.short_on, out_path).copied().unwrap_or(1.0);
        let written = (expected as f64 * ratio).floor() as u64;
        std::fs::write(out_path, written.to_string())?;
        Ok(written)
    }

    fn transcode(&self, source: &Path, out_path: &Path) -> Result<()> {
        std::fs::copy(source, out_path)?;
        self.transcodes.borrow_mut().push(source.to_path_buf());
        Ok(())
    }
}

fn lookup_set(set: &HashSet<PathBuf>, path: &Path) -> bool {
    set.iter().any(|suffix| path.ends_with(suffix))
}

/// What a fake chunk shows: motion toggles gray frames, a person tints rgb frames
#[derive(Debug, Clone, Copy, Default)]
pub struct Scene {
    pub motion: bool,
    pub person: bool,
}

pub const PERSON_PIXEL: u8 = 200;

/// Decodes chunk files written by `FakeEncoder` (their content is the frame count)
#[derive(Default)]
pub struct FakeFrameSource {
    pub scenes: HashMap<PathBuf, Scene>,
    pub decoded: Cell<usize>,
}

impl FrameSource for FakeFrameSource {
    fn frames(&self, path: &Path, every_nth: u64, format: PixelFormat) -> Result<FrameStream<'_>> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::SourceUnreadable(format!("{}: {}", path.display(), e)))?;
        let total: u64 = text.trim().parse().unwrap_or(0);
        let scene = lookup(&self.scenes, path).copied().unwrap_or_default();

        let every_nth = every_nth.max(1);
        let (width, height) = (8u32, 8u32);
        let len = Frame::byte_len(width, height, format);
        let frames = (0..total).step_by(every_nth as usize).enumerate().map(move |(k, index)| {
            let value = match format {
                PixelFormat::Gray if scene.motion => if k % 2 == 0 { 0 } else { 255 },
                PixelFormat::Gray => 0,
                PixelFormat::Rgb24 if scene.person => PERSON_PIXEL,
                PixelFormat::Rgb24 => 0,
            };
            self.decoded.set(self.decoded.get() + 1);
            Ok(Frame { index, width, height, format, data: vec![value; len] })
        });
        Ok(Box::new(frames))
    }
}

/// Sees a person on frames tinted by `FakeFrameSource`
#[derive(Default)]
pub struct FakeDetector {
    /// Report boxes that fail the default shape gate
    pub tiny_boxes: bool,
    pub fail: bool,
    pub calls: Cell<usize>,
}

impl Detector for FakeDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        self.calls.set(self.calls.get() + 1);
        if self.fail {
            return Err(PipelineError::Capability("detector timed out".to_string()));
        }
        if frame.data.first() != Some(&PERSON_PIXEL) {
            return Ok(Vec::new());
        }
        let bbox = if self.tiny_boxes {
            BBox::new(0.0, 0.0, 10.0, 20.0)
        } else {
            BBox::new(100.0, 100.0, 160.0, 250.0)
        };
        Ok(vec![Detection { bbox, confidence: 0.9 }])
    }
}

/// Replays canned detections per chunk
#[derive(Default)]
pub struct FakeTracker {
    pub tracks: HashMap<PathBuf, Vec<TrackedDetection>>,
    pub fail_on: HashSet<PathBuf>,
    pub panic_on: HashSet<PathBuf>,
}

impl Tracker for FakeTracker {
    fn track(&self, chunk_path: &Path) -> Result<DetectionStream<'_>> {
        if lookup_set(&self.panic_on, chunk_path) {
            panic!("tracker model crashed on {}", chunk_path.display());
        }
        if lookup_set(&self.fail_on, chunk_path) {
            return Err(PipelineError::Capability(format!("tracker timed out on {}", chunk_path.display())));
        }
        let dets = lookup(&self.tracks, chunk_path).cloned().unwrap_or_default();
        Ok(Box::new(dets.into_iter().map(Ok)))
    }
}

/// A person-shaped box (60x150) walking right by `step_px` per frame
pub fn walking_track(track_id: i64, start_frame: u64, len: u64, step_px: f64, confidence: f64) -> Vec<TrackedDetection> {
    (0..len)
        .map(|i| {
            let x = 100.0 + i as f64 * step_px;
            TrackedDetection {
                frame_index: start_frame + i,
                track_id,
                bbox: BBox::new(x, 100.0, x + 60.0, 250.0),
                confidence,
            }
        })
        .collect()
}

/// Bundle of fakes with sane defaults: one 8x8 recording of `total_frames` at `fps`
pub fn fake_capabilities(total_frames: u64, fps: f64) -> Capabilities {
    Capabilities {
        prober: Box::new(FakeProber::new(total_frames, fps)),
        encoder: Box::new(FakeEncoder::default()),
        frames: Box::new(FakeFrameSource::default()),
        detector: Box::new(FakeDetector::default()),
        tracker: Box::new(FakeTracker::default()),
    }
}
