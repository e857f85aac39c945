// Detection stream ingestion: shape gate, per-track ordering check, grouping by track id

use std::collections::{BTreeMap, HashMap};

use crate::capability::{BBoxGate, TrackedDetection};
use crate::error::{PipelineError, Result};

/// Surviving detections keyed by track id, plus ingestion counters
#[derive(Debug, Default)]
pub struct Grouped {
    pub tracks: BTreeMap<i64, Vec<TrackedDetection>>,
    pub detections_total: u64,
    pub detections_rejected_bbox: u64,
}

/// Consume a tracker stream. Every detection must have a strictly larger `frame_index` than
/// the previous detection of the same track; detections failing `gate` never join a track.
pub fn group_tracks<I>(detections: I, gate: &BBoxGate) -> Result<Grouped>
where
    I: IntoIterator<Item = Result<TrackedDetection>>,
{
    let mut grouped = Grouped::default();
    let mut last_frame: HashMap<i64, u64> = HashMap::new();

    for det in detections {
        let det = det?;
        grouped.detections_total += 1;

        if let Some(prev) = last_frame.insert(det.track_id, det.frame_index) {
            if det.frame_index <= prev {
                return Err(PipelineError::Capability(format!(
                    "tracker broke frame order for track {}: frame {} after {}",
                    det.track_id, det.frame_index, prev
                )));
            }
        }

        if !gate.accepts(&det.bbox) {
            grouped.detections_rejected_bbox += 1;
            continue;
        }

        grouped.tracks.entry(det.track_id).or_default().push(det);
    }

    Ok(grouped)
}
