// Pipeline configuration (JSON file, every section optional)

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::capability::BBoxGate;
use crate::constants::*;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub directories: DirectoriesConfig,
    pub chunking: ChunkingConfig,
    pub activity_filter: ActivityConfig,
    pub event_detector: ExtractorConfig,
    pub auto_labeler: LabelerConfig,
    pub state: StateConfig,
    pub capabilities: CapabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoriesConfig {
    pub videos_full: PathBuf,
    pub videos_converted: PathBuf,
    pub data_processing: PathBuf,
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            videos_full: PathBuf::from(DEFAULT_VIDEOS_FULL),
            videos_converted: PathBuf::from(DEFAULT_VIDEOS_CONVERTED),
            data_processing: PathBuf::from(DEFAULT_DATA_PROCESSING),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_duration_seconds: f64,
    /// Wall-clock time of the first frame. Falls back to the local clock when absent.
    pub start_time: Option<NaiveDateTime>,
    pub min_complete_ratio: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_duration_seconds: DEFAULT_CHUNK_DURATION_SECONDS,
            start_time: None,
            min_complete_ratio: CHUNK_MIN_COMPLETE_RATIO,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub motion_threshold: f64,
    pub pixel_diff_threshold: u8,
    pub min_person_frames: u64,
    pub sample_rate_motion: u64,
    pub sample_rate_person: u64,
    pub person_conf_threshold: f64,
    pub bbox: BBoxGate,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            motion_threshold: MOTION_THRESHOLD,
            pixel_diff_threshold: PIXEL_DIFF_THRESHOLD,
            min_person_frames: MIN_PERSON_FRAMES,
            sample_rate_motion: MOTION_SAMPLE_RATE,
            sample_rate_person: PERSON_SAMPLE_RATE,
            person_conf_threshold: PERSON_CONF_THRESHOLD,
            bbox: BBoxGate::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub min_track_length: usize,
    pub min_event_duration_seconds: f64,
    pub min_track_confidence_avg: f64,
    pub require_motion_for_event: bool,
    pub min_track_movement_pixels: f64,
    pub conf_threshold: f64,
    pub iou_threshold: f64,
    /// Only tracked frames whose index is a multiple of this are aggregated
    pub sample_rate: u64,
    pub bbox: BBoxGate,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_track_length: MIN_TRACK_LENGTH,
            min_event_duration_seconds: MIN_EVENT_DURATION_SECONDS,
            min_track_confidence_avg: MIN_TRACK_CONFIDENCE_AVG,
            require_motion_for_event: REQUIRE_MOTION_FOR_EVENT,
            min_track_movement_pixels: MIN_TRACK_MOVEMENT_PIXELS,
            conf_threshold: TRACKER_CONF_THRESHOLD,
            iou_threshold: TRACKER_IOU_THRESHOLD,
            sample_rate: EVENT_SAMPLE_RATE,
            bbox: BBoxGate::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelerConfig {
    pub normal_max_duration: f64,
    pub suspicious_min_duration: f64,
    pub suspicious_min_frames: usize,
    pub low_movement_pixels: f64,
    pub low_confidence: f64,
    pub high_confidence_threshold: f64,
}

impl Default for LabelerConfig {
    fn default() -> Self {
        Self {
            normal_max_duration: NORMAL_MAX_DURATION,
            suspicious_min_duration: SUSPICIOUS_MIN_DURATION,
            suspicious_min_frames: SUSPICIOUS_MIN_FRAMES,
            low_movement_pixels: LOW_MOVEMENT_PIXELS,
            low_confidence: LOW_CONFIDENCE,
            high_confidence_threshold: HIGH_CONFIDENCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Relative paths resolve against `directories.data_processing`.
    pub file: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { file: PathBuf::from(STATE_FILENAME) }
    }
}

/// Compute backend, resolved once at startup and handed to every capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Cpu,
    Gpu,
}

impl Backend {
    pub fn video_codec(self) -> &'static str {
        match self {
            Backend::Cpu => CPU_VIDEO_CODEC,
            Backend::Gpu => GPU_VIDEO_CODEC,
        }
    }

    /// Encoder tuning arguments that follow `-c:v <codec>`
    pub fn codec_args(self) -> &'static [&'static str] {
        match self {
            Backend::Cpu => &["-preset", "veryfast", "-crf", "23"],
            Backend::Gpu => &["-preset", "p1", "-cq", "23"],
        }
    }

    pub fn device(self) -> &'static str {
        match self {
            Backend::Cpu => CPU_DEVICE,
            Backend::Gpu => GPU_DEVICE,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn is_configured(&self) -> bool {
        !self.program.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    pub backend: Backend,
    pub detector: CommandSpec,
    pub tracker: CommandSpec,
    pub timeout_seconds: u64,
    pub source_extensions: Vec<String>,
    pub passthrough_extensions: Vec<String>,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            detector: CommandSpec::default(),
            tracker: CommandSpec::default(),
            timeout_seconds: DEFAULT_CAPABILITY_TIMEOUT_SECONDS,
            source_extensions: SOURCE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            passthrough_extensions: PASSTHROUGH_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: PipelineConfig = serde_json::from_str(&text).map_err(|e| {
            PipelineError::Configuration(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a path when given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Check thresholds and ranges. Does not require capability programs.
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        if chunking.chunk_duration_seconds.is_nan() || chunking.chunk_duration_seconds <= 0.0 {
            return Err(invalid("chunking.chunk_duration_seconds must be positive"));
        }
        check_ratio("chunking.min_complete_ratio", chunking.min_complete_ratio)?;

        let activity = &self.activity_filter;
        check_ratio("activity_filter.motion_threshold", activity.motion_threshold)?;
        check_ratio("activity_filter.person_conf_threshold", activity.person_conf_threshold)?;
        if activity.sample_rate_motion == 0 || activity.sample_rate_person == 0 {
            return Err(invalid("activity_filter sample rates must be at least 1"));
        }
        activity.bbox.validate("activity_filter.bbox")?;

        let extractor = &self.event_detector;
        check_ratio("event_detector.min_track_confidence_avg", extractor.min_track_confidence_avg)?;
        check_ratio("event_detector.conf_threshold", extractor.conf_threshold)?;
        check_ratio("event_detector.iou_threshold", extractor.iou_threshold)?;
        if extractor.min_event_duration_seconds < 0.0 || extractor.min_track_movement_pixels < 0.0 {
            return Err(invalid("event_detector duration and movement thresholds must not be negative"));
        }
        if extractor.sample_rate == 0 {
            return Err(invalid("event_detector.sample_rate must be at least 1"));
        }
        extractor.bbox.validate("event_detector.bbox")?;

        let labeler = &self.auto_labeler;
        check_ratio("auto_labeler.high_confidence_threshold", labeler.high_confidence_threshold)?;
        check_ratio("auto_labeler.low_confidence", labeler.low_confidence)?;
        if labeler.normal_max_duration > labeler.suspicious_min_duration {
            return Err(invalid(
                "auto_labeler.normal_max_duration must not exceed suspicious_min_duration",
            ));
        }

        if self.capabilities.timeout_seconds == 0 {
            return Err(invalid("capabilities.timeout_seconds must be at least 1"));
        }
        if self.capabilities.source_extensions.is_empty() {
            return Err(invalid("capabilities.source_extensions must not be empty"));
        }

        Ok(())
    }

    /// Full pipeline runs additionally need the external detector and tracker.
    pub fn validate_for_run(&self) -> Result<()> {
        self.validate()?;
        if !self.capabilities.detector.is_configured() {
            return Err(invalid("capabilities.detector.program is required"));
        }
        if !self.capabilities.tracker.is_configured() {
            return Err(invalid("capabilities.tracker.program is required"));
        }
        Ok(())
    }

    /// Location of the stage ledger
    pub fn state_path(&self) -> PathBuf {
        if self.state.file.is_absolute() {
            self.state.file.clone()
        } else {
            self.directories.data_processing.join(&self.state.file)
        }
    }

    pub fn capability_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.capabilities.timeout_seconds)
    }
}

fn invalid(msg: &str) -> PipelineError {
    PipelineError::Configuration(msg.to_string())
}

fn check_ratio(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PipelineError::Configuration(format!("{} must be within [0, 1], got {}", name, value)))
    }
}
