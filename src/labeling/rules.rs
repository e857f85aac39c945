// Heuristic rule cascade. First match wins.

use serde::{Deserialize, Serialize};

use crate::config::LabelerConfig;
use crate::constants::*;
use crate::events::Event;

/// Fixed behavior catalogue. Category ids are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorClass {
    NormalBehavior,
    DiscreetTheft,
    BagBackpackTheft,
    GroupCollaborativeTheft,
    AmbiguousSuspiciousActions,
    StaffRestocking,
}

impl BehaviorClass {
    pub const ALL: [BehaviorClass; 6] = [
        BehaviorClass::NormalBehavior,
        BehaviorClass::DiscreetTheft,
        BehaviorClass::BagBackpackTheft,
        BehaviorClass::GroupCollaborativeTheft,
        BehaviorClass::AmbiguousSuspiciousActions,
        BehaviorClass::StaffRestocking,
    ];

    pub fn category_id(self) -> u8 {
        match self {
            BehaviorClass::NormalBehavior => 0,
            BehaviorClass::DiscreetTheft => 1,
            BehaviorClass::BagBackpackTheft => 2,
            BehaviorClass::GroupCollaborativeTheft => 3,
            BehaviorClass::AmbiguousSuspiciousActions => 4,
            BehaviorClass::StaffRestocking => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BehaviorClass::NormalBehavior => "normal_behavior",
            BehaviorClass::DiscreetTheft => "discreet_theft",
            BehaviorClass::BagBackpackTheft => "bag_backpack_theft",
            BehaviorClass::GroupCollaborativeTheft => "group_collaborative_theft",
            BehaviorClass::AmbiguousSuspiciousActions => "ambiguous_suspicious_actions",
            BehaviorClass::StaffRestocking => "staff_restocking",
        }
    }

    pub fn is_ambiguous(self) -> bool {
        self == BehaviorClass::AmbiguousSuspiciousActions
    }
}

/// Outcome of the cascade for one event
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub class: BehaviorClass,
    pub confidence: f64,
    pub rule: &'static str,
    pub reasoning: String,
    pub needs_review: bool,
}

pub fn classify(event: &Event, config: &LabelerConfig) -> Classification {
    let (class, confidence, rule, reasoning) = if event.duration_seconds < config.normal_max_duration {
        (
            BehaviorClass::NormalBehavior,
            CONF_SHORT,
            R_LABEL_SHORT,
            format!("short presence ({:.1}s), likely passing by", event.duration_seconds),
        )
    } else if event.duration_seconds > config.suspicious_min_duration
        && event.frame_count > config.suspicious_min_frames
    {
        (
            BehaviorClass::AmbiguousSuspiciousActions,
            CONF_LINGER,
            R_LABEL_LINGER,
            format!(
                "long presence ({:.1}s, {} frames), may be interacting with products",
                event.duration_seconds, event.frame_count
            ),
        )
    } else if event.movement_distance < config.low_movement_pixels {
        (
            BehaviorClass::AmbiguousSuspiciousActions,
            CONF_STATIC,
            R_LABEL_STATIC,
            format!("little movement ({:.0}px), standing in place", event.movement_distance),
        )
    } else if event.confidence_avg < config.low_confidence {
        (
            BehaviorClass::AmbiguousSuspiciousActions,
            CONF_LOW_DETECTION,
            R_LABEL_LOW_CONF,
            format!("weak detections (avg confidence {:.2})", event.confidence_avg),
        )
    } else {
        (
            BehaviorClass::NormalBehavior,
            CONF_DEFAULT,
            R_LABEL_DEFAULT,
            "ordinary movement pattern".to_string(),
        )
    };

    Classification {
        class,
        confidence,
        rule,
        reasoning,
        needs_review: confidence < config.high_confidence_threshold || class.is_ambiguous(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn event(duration: f64, frames: usize, movement: f64, conf: f64) -> Event {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(8, 0, 0).unwrap();
        Event {
            event_id: "chunk_0000_event_0001".into(),
            track_id: 1,
            chunk_id: "chunk_0000".into(),
            chunk_filepath: PathBuf::from("chunk_0000.mp4"),
            chunk_start_timestamp: ts,
            start_timestamp: ts,
            end_timestamp: ts,
            start_frame: 0,
            end_frame: frames as u64,
            duration_seconds: duration,
            frame_count: frames,
            confidence_avg: conf,
            confidence_min: conf,
            confidence_max: conf,
            movement_distance: movement,
            bbox_sequence: Vec::new(),
        }
    }

    #[test]
    fn test_short_event_is_normal_but_reviewed_at_threshold() {
        let c = classify(&event(1.5, 45, 10.0, 0.2), &LabelerConfig::default());
        assert_eq!(c.class, BehaviorClass::NormalBehavior);
        assert_eq!(c.rule, R_LABEL_SHORT);
        assert_eq!(c.confidence, 0.7);
        // 0.7 is not below the 0.7 threshold
        assert!(!c.needs_review);
    }

    #[test]
    fn test_priority_order() {
        let config = LabelerConfig::default();
        // Long and many frames wins over low movement and low confidence
        let c = classify(&event(12.0, 300, 5.0, 0.2), &config);
        assert_eq!((c.rule, c.confidence), (R_LABEL_LINGER, 0.5));

        // Long but few frames falls through to movement
        let c = classify(&event(12.0, 100, 5.0, 0.2), &config);
        assert_eq!(c.rule, R_LABEL_STATIC);

        let c = classify(&event(5.0, 100, 80.0, 0.4), &config);
        assert_eq!((c.rule, c.confidence), (R_LABEL_LOW_CONF, 0.3));
        assert_eq!(c.class, BehaviorClass::AmbiguousSuspiciousActions);
        assert!(c.needs_review);

        let c = classify(&event(5.0, 100, 80.0, 0.9), &config);
        assert_eq!((c.class, c.rule, c.confidence), (BehaviorClass::NormalBehavior, R_LABEL_DEFAULT, 0.6));
        assert!(c.needs_review);
    }

    #[test]
    fn test_catalogue_ids() {
        let ids: Vec<u8> = BehaviorClass::ALL.iter().map(|c| c.category_id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(
            serde_json::to_string(&BehaviorClass::AmbiguousSuspiciousActions).unwrap(),
            "\"ambiguous_suspicious_actions\""
        );
        assert_eq!(BehaviorClass::StaffRestocking.name(), "staff_restocking");
    }
}
