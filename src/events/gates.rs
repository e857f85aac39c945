// Track quality gates: length, duration, mean confidence, movement

use serde::{Deserialize, Serialize};

use crate::capability::TrackedDetection;
use crate::config::ExtractorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRejection {
    TrackLength,
    Duration,
    Confidence,
    Movement,
}

/// Statistics over every surviving detection of one track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackSummary {
    pub start_frame: u64,
    pub end_frame: u64,
    pub duration_seconds: f64,
    pub frame_count: usize,
    pub confidence_avg: f64,
    pub confidence_min: f64,
    pub confidence_max: f64,
    /// Distance between first and last box centers, not path length
    pub movement_distance: f64,
}

/// Summarize a non-empty track
pub fn summarize(track: &[TrackedDetection], fps: f64) -> Option<TrackSummary> {
    let first = track.first()?;
    let last = track.last()?;

    let confidences = track.iter().map(|d| d.confidence);
    let sum: f64 = confidences.clone().sum();
    let min = confidences.clone().fold(f64::INFINITY, f64::min);
    let max = confidences.fold(f64::NEG_INFINITY, f64::max);

    Some(TrackSummary {
        start_frame: first.frame_index,
        end_frame: last.frame_index,
        duration_seconds: (last.frame_index - first.frame_index) as f64 / fps,
        frame_count: track.len(),
        confidence_avg: sum / track.len() as f64,
        confidence_min: min,
        confidence_max: max,
        movement_distance: first.bbox.center_distance(&last.bbox),
    })
}

/// Apply the gates in order; the first failure discards the whole track.
pub fn apply_gates(summary: &TrackSummary, config: &ExtractorConfig) -> Result<(), GateRejection> {
    if summary.frame_count < config.min_track_length {
        return Err(GateRejection::TrackLength);
    }
    if summary.duration_seconds < config.min_event_duration_seconds {
        return Err(GateRejection::Duration);
    }
    if summary.confidence_avg < config.min_track_confidence_avg {
        return Err(GateRejection::Confidence);
    }
    if config.require_motion_for_event && summary.movement_distance < config.min_track_movement_pixels {
        return Err(GateRejection::Movement);
    }
    Ok(())
}
