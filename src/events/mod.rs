// Event extraction: turn a chunk's tracked detections into quality-gated events
//
// `extract_chunk_events` is the one extraction primitive; `detect_events_batch` only loops
// it over active chunks and aggregates statistics.

pub mod gates;
pub mod grouping;

pub use gates::GateRejection;

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::artifacts::read_json;
use crate::capability::{BBox, TrackedDetection, Tracker};
use crate::config::ExtractorConfig;
use crate::constants::STAGE_DETECTION;
use crate::error::Result;
use crate::progress::StageProgress;
use crate::timeline::{offset_seconds, Chunk};

/// A track that passed every gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub track_id: i64,
    pub chunk_id: String,
    pub chunk_filepath: PathBuf,
    pub chunk_start_timestamp: NaiveDateTime,
    pub start_timestamp: NaiveDateTime,
    pub end_timestamp: NaiveDateTime,
    pub start_frame: u64,
    pub end_frame: u64,
    pub duration_seconds: f64,
    pub frame_count: usize,
    pub confidence_avg: f64,
    pub confidence_min: f64,
    pub confidence_max: f64,
    pub movement_distance: f64,
    pub bbox_sequence: Vec<BBox>,
}

pub fn event_id(chunk_id: &str, track_id: i64) -> String {
    format!("{}_event_{:04}", chunk_id, track_id)
}

/// Per-chunk diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub chunk_id: String,
    pub detections_total: u64,
    #[serde(default)]
    pub detections_skipped_sampling: u64,
    pub detections_rejected_bbox: u64,
    pub total_tracks: usize,
    pub rejected_track_length: usize,
    pub rejected_duration: usize,
    pub rejected_confidence: usize,
    pub rejected_movement: usize,
    pub accepted: usize,
}

impl ExtractionStats {
    fn record(&mut self, rejection: GateRejection) {
        match rejection {
            GateRejection::TrackLength => self.rejected_track_length += 1,
            GateRejection::Duration => self.rejected_duration += 1,
            GateRejection::Confidence => self.rejected_confidence += 1,
            GateRejection::Movement => self.rejected_movement += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkExtraction {
    pub events: Vec<Event>,
    pub stats: ExtractionStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DurationHistogram {
    #[serde(rename = "<1s")]
    pub under_1s: usize,
    #[serde(rename = "1-5s")]
    pub from_1_to_5s: usize,
    #[serde(rename = "5-15s")]
    pub from_5_to_15s: usize,
    #[serde(rename = "15-30s")]
    pub from_15_to_30s: usize,
    #[serde(rename = ">30s")]
    pub over_30s: usize,
}

impl DurationHistogram {
    pub fn add(&mut self, duration_seconds: f64) {
        let bucket = match duration_seconds {
            d if d < 1.0 => &mut self.under_1s,
            d if d < 5.0 => &mut self.from_1_to_5s,
            d if d < 15.0 => &mut self.from_5_to_15s,
            d if d < 30.0 => &mut self.from_15_to_30s,
            _ => &mut self.over_30s,
        };
        *bucket += 1;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionStats {
    pub total_chunks: usize,
    pub chunks_with_events: usize,
    pub total_events: usize,
    pub total_tracks: usize,
    pub events_by_duration: DurationHistogram,
    pub per_chunk: Vec<ExtractionStats>,
    pub processing_time_seconds: f64,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
}

/// `events_summary.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsSummary {
    pub statistics: DetectionStats,
    pub events: Vec<Event>,
    pub detector_config: ExtractorConfig,
}

pub fn load_events_summary(path: &Path) -> Result<EventsSummary> {
    read_json(path)
}

pub struct EventExtractor<'a> {
    config: &'a ExtractorConfig,
}

impl<'a> EventExtractor<'a> {
    pub fn new(config: &'a ExtractorConfig) -> Self {
        Self { config }
    }

    /// Aggregate one chunk's detection stream into events. Zero events is a normal outcome.
    /// With `sample_rate` N only frames 0, N, 2N, ... are kept; frame indices stay real.
    pub fn extract_chunk_events<I>(&self, chunk: &Chunk, detections: I) -> Result<ChunkExtraction>
    where
        I: IntoIterator<Item = Result<TrackedDetection>>,
    {
        let rate = self.config.sample_rate.max(1);
        let mut skipped = 0u64;
        let sampled = detections.into_iter().filter(|d| match d {
            Ok(det) if det.frame_index % rate != 0 => {
                skipped += 1;
                false
            }
            _ => true,
        });
        let grouped = grouping::group_tracks(sampled, &self.config.bbox)?;
        let mut stats = ExtractionStats {
            chunk_id: chunk.chunk_id.clone(),
            detections_total: grouped.detections_total + skipped,
            detections_skipped_sampling: skipped,
            detections_rejected_bbox: grouped.detections_rejected_bbox,
            total_tracks: grouped.tracks.len(),
            ..ExtractionStats::default()
        };

        let mut events = Vec::new();
        for (track_id, track) in &grouped.tracks {
            let Some(summary) = gates::summarize(track, chunk.fps) else {
                continue;
            };
            if let Err(rejection) = gates::apply_gates(&summary, self.config) {
                log::debug!("{}: track {} rejected ({:?})", chunk.chunk_id, track_id, rejection);
                stats.record(rejection);
                continue;
            }

            stats.accepted += 1;
            events.push(Event {
                event_id: event_id(&chunk.chunk_id, *track_id),
                track_id: *track_id,
                chunk_id: chunk.chunk_id.clone(),
                chunk_filepath: chunk.filepath.clone(),
                chunk_start_timestamp: chunk.start_ts,
                start_timestamp: offset_seconds(chunk.start_ts, summary.start_frame as f64 / chunk.fps),
                end_timestamp: offset_seconds(chunk.start_ts, summary.end_frame as f64 / chunk.fps),
                start_frame: summary.start_frame,
                end_frame: summary.end_frame,
                duration_seconds: summary.duration_seconds,
                frame_count: summary.frame_count,
                confidence_avg: summary.confidence_avg,
                confidence_min: summary.confidence_min,
                confidence_max: summary.confidence_max,
                movement_distance: summary.movement_distance,
                bbox_sequence: track.iter().map(|d| d.bbox).collect(),
            });
        }

        Ok(ChunkExtraction { events, stats })
    }

    /// Run the tracker over each chunk and extract its events
    pub fn detect_events_batch(&self, tracker: &dyn Tracker, label: &str, chunks: &[Chunk]) -> Result<EventsSummary> {
        let started = Instant::now();
        let mut stats = DetectionStats {
            total_chunks: chunks.len(),
            start_time: Some(Local::now().naive_local()),
            ..DetectionStats::default()
        };
        let mut events = Vec::new();

        for (i, chunk) in chunks.iter().enumerate() {
            let stream = tracker.track(&chunk.filepath)?;
            let extraction = self.extract_chunk_events(chunk, stream)?;

            if !extraction.events.is_empty() {
                stats.chunks_with_events += 1;
            }
            stats.total_tracks += extraction.stats.total_tracks;
            for event in &extraction.events {
                stats.events_by_duration.add(event.duration_seconds);
            }
            stats.per_chunk.push(extraction.stats);
            events.extend(extraction.events);

            let current = i as u64 + 1;
            if StageProgress::should_log(current, chunks.len() as u64) {
                StageProgress::new(label, STAGE_DETECTION, current, chunks.len() as u64)
                    .with_elapsed(started.elapsed())
                    .with_message(format!("{} events", events.len()))
                    .log();
            }
        }

        stats.total_events = events.len();
        stats.processing_time_seconds = started.elapsed().as_secs_f64();
        stats.end_time = Some(Local::now().naive_local());

        log::info!(
            "[{}] Event extraction: {} events from {} tracks in {} chunks",
            label,
            stats.total_events,
            stats.total_tracks,
            stats.total_chunks
        );

        Ok(EventsSummary {
            statistics: stats,
            events,
            detector_config: self.config.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::testing::{walking_track, FakeTracker};
    use crate::timeline::plan_chunks;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn chunks(n: u64) -> Vec<Chunk> {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(8, 0, 0).unwrap();
        plan_chunks(600 * n, 30.0, 20.0, start)
            .unwrap()
            .iter()
            .map(|s| Chunk::from_span(s, PathBuf::from(format!("/data/cam01/chunks/{}.mp4", s.chunk_id())), 30.0, "1920x1080".into()))
            .collect()
    }

    fn mixed_stream() -> Vec<TrackedDetection> {
        let mut dets = Vec::new();
        dets.extend(walking_track(4, 0, 60, 3.0, 0.85)); // accepted
        dets.extend(walking_track(9, 100, 10, 3.0, 0.9)); // too short
        dets.extend(walking_track(5, 200, 60, 0.0, 0.9)); // static
        dets.extend(walking_track(6, 300, 60, 3.0, 0.3)); // weak
        dets
    }

    #[test]
    fn test_one_event_per_passing_track() {
        let config = ExtractorConfig::default();
        let chunk = &chunks(1)[0];
        let out = EventExtractor::new(&config)
            .extract_chunk_events(chunk, mixed_stream().into_iter().map(Ok))
            .unwrap();

        assert_eq!(out.events.len(), 1);
        let event = &out.events[0];
        assert_eq!(event.event_id, "chunk_0000_event_0004");
        assert_eq!(event.frame_count, 60);
        assert_eq!(event.bbox_sequence.len(), 60);
        assert_eq!((event.start_frame, event.end_frame), (0, 59));
        assert!((event.duration_seconds - 59.0 / 30.0).abs() < 1e-9);
        assert!((event.movement_distance - 177.0).abs() < 1e-9);

        assert_eq!(out.stats.total_tracks, 4);
        assert_eq!(out.stats.accepted, 1);
        assert_eq!(out.stats.rejected_track_length, 1);
        assert_eq!(out.stats.rejected_movement, 1);
        assert_eq!(out.stats.rejected_confidence, 1);
    }

    #[test]
    fn test_frame_count_counts_surviving_detections() {
        let config = ExtractorConfig::default();
        let mut dets = walking_track(1, 0, 40, 3.0, 0.9);
        for d in dets.iter_mut().step_by(4) {
            d.bbox = BBox::new(0.0, 0.0, 2.0, 2.0);
        }
        let out = EventExtractor::new(&config)
            .extract_chunk_events(&chunks(1)[0], dets.into_iter().map(Ok))
            .unwrap();
        assert_eq!(out.stats.detections_rejected_bbox, 10);
        assert_eq!(out.events[0].frame_count, 30);
    }

    #[test]
    fn test_sample_rate_keeps_every_nth_frame() {
        let config = ExtractorConfig { sample_rate: 3, ..ExtractorConfig::default() };
        let out = EventExtractor::new(&config)
            .extract_chunk_events(&chunks(1)[0], walking_track(1, 10, 90, 3.0, 0.9).into_iter().map(Ok))
            .unwrap();

        // frames 10..=99; multiples of 3 are 12, 15, ..., 99
        assert_eq!(out.stats.detections_total, 90);
        assert_eq!(out.stats.detections_skipped_sampling, 60);
        let event = &out.events[0];
        assert_eq!(event.frame_count, 30);
        assert_eq!((event.start_frame, event.end_frame), (12, 99));
        assert!((event.duration_seconds - 87.0 / 30.0).abs() < 1e-9);
        assert!(event.start_timestamp > chunks(1)[0].start_ts);
    }

    #[test]
    fn test_replay_is_byte_identical_and_order_independent() {
        let config = ExtractorConfig::default();
        let extractor = EventExtractor::new(&config);
        let chunk = &chunks(1)[0];

        let forward = mixed_stream();
        // interleave tracks differently while keeping each track's own order
        let mut shuffled = forward.clone();
        shuffled.sort_by_key(|d| (d.frame_index, -d.track_id));

        let a = extractor.extract_chunk_events(chunk, forward.into_iter().map(Ok)).unwrap();
        let b = extractor.extract_chunk_events(chunk, shuffled.into_iter().map(Ok)).unwrap();
        assert_eq!(
            serde_json::to_string(&a.events).unwrap(),
            serde_json::to_string(&b.events).unwrap()
        );
        assert_eq!(a.stats, b.stats);
    }

    #[test]
    fn test_batch_aggregates_chunks() {
        let config = ExtractorConfig::default();
        let chunks = chunks(3);
        let tracker = FakeTracker {
            tracks: HashMap::from([
                (PathBuf::from("chunk_0000.mp4"), walking_track(1, 0, 60, 3.0, 0.9)),
                (PathBuf::from("chunk_0002.mp4"), {
                    let mut d = walking_track(2, 0, 400, 1.0, 0.9);
                    d.extend(walking_track(3, 0, 20, 0.0, 0.9));
                    d
                }),
            ]),
            ..FakeTracker::default()
        };

        let summary = EventExtractor::new(&config)
            .detect_events_batch(&tracker, "cam01.mp4", &chunks)
            .unwrap();

        let stats = &summary.statistics;
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.total_tracks, 3);
        assert_eq!(stats.chunks_with_events, 2);
        assert_eq!(stats.per_chunk.len(), 3);
        assert_eq!(stats.events_by_duration.from_1_to_5s, 1);
        assert_eq!(stats.events_by_duration.from_5_to_15s, 1);
        assert_eq!(summary.events[1].chunk_id, "chunk_0002");
        assert_eq!(
            summary.events[1].chunk_start_timestamp,
            chunks[2].start_ts
        );
    }

    #[test]
    fn test_batch_fails_on_tracker_failure() {
        let config = ExtractorConfig::default();
        let tracker = FakeTracker {
            fail_on: [PathBuf::from("chunk_0001.mp4")].into_iter().collect(),
            ..FakeTracker::default()
        };
        assert!(EventExtractor::new(&config)
            .detect_events_batch(&tracker, "cam01.mp4", &chunks(2))
            .is_err());
    }

    #[test]
    fn test_histogram_edges() {
        let mut h = DurationHistogram::default();
        for d in [0.5, 1.0, 4.99, 5.0, 29.9, 30.0, 300.0] {
            h.add(d);
        }
        assert_eq!(h, DurationHistogram { under_1s: 1, from_1_to_5s: 2, from_5_to_15s: 1, from_15_to_30s: 1, over_30s: 2 });
    }
}
