// Behavior labeling: heuristic class proposals for human review

pub mod rules;
pub mod yolo;

pub use rules::{classify, BehaviorClass, Classification};
pub use yolo::{export_yolo, FrameSize, YoloExport};

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::artifacts::read_json;
use crate::capability::BBox;
use crate::config::LabelerConfig;
use crate::constants::{HIGH_CONFIDENCE_THRESHOLD, MEDIUM_CONFIDENCE_THRESHOLD};
use crate::error::Result;
use crate::events::Event;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCharacteristics {
    pub duration_seconds: f64,
    pub frame_count: usize,
    pub movement_distance: f64,
    pub confidence_avg: f64,
}

/// Written by the review tool, never by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub status: String,
    pub final_class: BehaviorClass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub event_id: String,
    pub track_id: i64,
    pub chunk_id: String,
    pub start_frame: u64,
    pub end_frame: u64,
    pub start_timestamp: NaiveDateTime,
    pub end_timestamp: NaiveDateTime,
    pub suggested_class: BehaviorClass,
    pub category_id: u8,
    pub classification_confidence: f64,
    pub needs_review: bool,
    pub reasoning: String,
    pub rule: String,
    pub event_characteristics: EventCharacteristics,
    pub bbox_sequence: Vec<BBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewOutcome>,
}

impl Proposal {
    pub fn from_event(event: &Event, c: Classification) -> Self {
        Proposal {
            event_id: event.event_id.clone(),
            track_id: event.track_id,
            chunk_id: event.chunk_id.clone(),
            start_frame: event.start_frame,
            end_frame: event.end_frame,
            start_timestamp: event.start_timestamp,
            end_timestamp: event.end_timestamp,
            suggested_class: c.class,
            category_id: c.class.category_id(),
            classification_confidence: c.confidence,
            needs_review: c.needs_review,
            reasoning: c.reasoning,
            rule: c.rule.to_string(),
            event_characteristics: EventCharacteristics {
                duration_seconds: event.duration_seconds,
                frame_count: event.frame_count,
                movement_distance: event.movement_distance,
                confidence_avg: event.confidence_avg,
            },
            bbox_sequence: event.bbox_sequence.clone(),
            review: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl ConfidenceDistribution {
    pub fn add(&mut self, confidence: f64) {
        if confidence > HIGH_CONFIDENCE_THRESHOLD {
            self.high += 1;
        } else if confidence > MEDIUM_CONFIDENCE_THRESHOLD {
            self.medium += 1;
        } else {
            self.low += 1;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelingStats {
    pub total_events: usize,
    pub proposals_by_class: BTreeMap<BehaviorClass, usize>,
    pub confidence_distribution: ConfidenceDistribution,
    pub needs_review: usize,
    pub processing_time_seconds: f64,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
}

/// `proposals_metadata.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalsReport {
    pub statistics: LabelingStats,
    pub proposals: Vec<Proposal>,
    pub class_names: Vec<String>,
    pub labeler_config: LabelerConfig,
}

pub fn load_proposals(path: &Path) -> Result<ProposalsReport> {
    read_json(path)
}

pub struct BehaviorLabeler<'a> {
    config: &'a LabelerConfig,
}

impl<'a> BehaviorLabeler<'a> {
    pub fn new(config: &'a LabelerConfig) -> Self {
        Self { config }
    }

    pub fn propose(&self, event: &Event) -> Proposal {
        Proposal::from_event(event, classify(event, self.config))
    }

    pub fn generate_proposals_batch(&self, label: &str, events: &[Event]) -> ProposalsReport {
        let started = Instant::now();
        let mut stats = LabelingStats {
            total_events: events.len(),
            start_time: Some(Local::now().naive_local()),
            ..LabelingStats::default()
        };

        let proposals: Vec<Proposal> = events.iter().map(|e| self.propose(e)).collect();
        for p in &proposals {
            *stats.proposals_by_class.entry(p.suggested_class).or_default() += 1;
            stats.confidence_distribution.add(p.classification_confidence);
            if p.needs_review {
                stats.needs_review += 1;
            }
        }

        stats.processing_time_seconds = started.elapsed().as_secs_f64();
        stats.end_time = Some(Local::now().naive_local());
        log::info!(
            "[{}] Labeling: {} proposals, {} need review",
            label,
            proposals.len(),
            stats.needs_review
        );

        ProposalsReport {
            statistics: stats,
            proposals,
            class_names: BehaviorClass::ALL.iter().map(|c| c.name().to_string()).collect(),
            labeler_config: self.config.clone(),
        }
    }
}
