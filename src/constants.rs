// Surveil Constants
// Defaults mirror the thresholds the labeling team calibrated against. Config files override them.

pub const PIPELINE_VERSION: u32 = 1;            // Stamped into every stage record's metadata

// Stages (fixed pipeline order)
pub const STAGE_CONVERSION: &str = "conversion";
pub const STAGE_CHUNKING: &str = "chunking";
pub const STAGE_FILTERING: &str = "filtering";
pub const STAGE_DETECTION: &str = "detection";
pub const STAGE_LABELING: &str = "labeling";
pub const STAGE_REVIEW: &str = "review";

// Paths
pub const STATE_FILENAME: &str = "pipeline_state.db";
pub const DEFAULT_VIDEOS_FULL: &str = "data/videos_full";
pub const DEFAULT_VIDEOS_CONVERTED: &str = "data/videos_converted";
pub const DEFAULT_DATA_PROCESSING: &str = "data/processing";
pub const CHUNKS_FOLDER: &str = "chunks";
pub const ACTIVE_CHUNKS_FOLDER: &str = "active_chunks";
pub const EVENTS_FOLDER: &str = "events";
pub const PROPOSALS_FOLDER: &str = "proposals";
pub const YOLO_FOLDER: &str = "yolo_format";
pub const CONVERTED_SUFFIX: &str = "_converted";

// Ledger
pub const LEDGER_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

// Artifact documents
pub const CHUNK_INDEX_FILENAME: &str = "chunks_index.json";
pub const ACTIVITY_REPORT_FILENAME: &str = "active_chunks_report.json";
pub const EVENTS_SUMMARY_FILENAME: &str = "events_summary.json";
pub const PROPOSALS_FILENAME: &str = "proposals_metadata.json";

// Source formats
pub const SOURCE_EXTENSIONS: [&str; 5] = ["dav", "mp4", "avi", "mov", "mkv"];
pub const PASSTHROUGH_EXTENSIONS: [&str; 1] = ["mp4"];

// Chunking
pub const DEFAULT_CHUNK_DURATION_SECONDS: f64 = 180.0;
pub const CHUNK_MIN_COMPLETE_RATIO: f64 = 0.9;      // Below this the chunk is flagged incomplete

// Activity gate
pub const MOTION_THRESHOLD: f64 = 0.02;             // Fraction of changed pixels
pub const PIXEL_DIFF_THRESHOLD: u8 = 25;            // Per-pixel absolute difference
pub const MIN_PERSON_FRAMES: u64 = 30;
pub const MOTION_SAMPLE_RATE: u64 = 10;             // Every Nth frame
pub const PERSON_SAMPLE_RATE: u64 = 15;             // Every Mth frame
pub const PERSON_CONF_THRESHOLD: f64 = 0.5;         // Forwarded to the detector

// Bounding-box shape gate
pub const BBOX_MIN_AREA: f64 = 2000.0;
pub const BBOX_MAX_AREA: f64 = 500_000.0;
pub const BBOX_MIN_ASPECT: f64 = 0.3;               // height / width
pub const BBOX_MAX_ASPECT: f64 = 4.0;

// Event extraction
pub const MIN_TRACK_LENGTH: usize = 15;
pub const MIN_EVENT_DURATION_SECONDS: f64 = 1.0;
pub const MIN_TRACK_CONFIDENCE_AVG: f64 = 0.55;
pub const REQUIRE_MOTION_FOR_EVENT: bool = true;
pub const MIN_TRACK_MOVEMENT_PIXELS: f64 = 12.0;
pub const TRACKER_CONF_THRESHOLD: f64 = 0.5;        // Forwarded to the tracker
pub const TRACKER_IOU_THRESHOLD: f64 = 0.5;
pub const EVENT_SAMPLE_RATE: u64 = 1;              // Keep every Nth tracked frame

// Labeling
pub const NORMAL_MAX_DURATION: f64 = 2.0;
pub const SUSPICIOUS_MIN_DURATION: f64 = 10.0;
pub const SUSPICIOUS_MIN_FRAMES: usize = 150;
pub const LOW_MOVEMENT_PIXELS: f64 = 50.0;
pub const LOW_CONFIDENCE: f64 = 0.5;
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.7;
pub const MEDIUM_CONFIDENCE_THRESHOLD: f64 = 0.4;   // Distribution bucket only

pub const CONF_SHORT: f64 = 0.7;
pub const CONF_LINGER: f64 = 0.5;
pub const CONF_STATIC: f64 = 0.4;
pub const CONF_LOW_DETECTION: f64 = 0.3;
pub const CONF_DEFAULT: f64 = 0.6;

// Labeling rule tokens
pub const R_LABEL_SHORT: &str = "R_LABEL_SHORT";
pub const R_LABEL_LINGER: &str = "R_LABEL_LINGER";
pub const R_LABEL_STATIC: &str = "R_LABEL_STATIC";
pub const R_LABEL_LOW_CONF: &str = "R_LABEL_LOW_CONF";
pub const R_LABEL_DEFAULT: &str = "R_LABEL_DEFAULT";

// Capabilities
pub const DEFAULT_CAPABILITY_TIMEOUT_SECONDS: u64 = 600;
pub const CPU_VIDEO_CODEC: &str = "libx264";
pub const GPU_VIDEO_CODEC: &str = "h264_nvenc";
pub const CPU_DEVICE: &str = "cpu";
pub const GPU_DEVICE: &str = "cuda:0";

// Progress logging
pub const PROGRESS_LOG_EVERY: u64 = 10;
