// Phase B: person confirmation on sampled frames

use serde::{Deserialize, Serialize};

use crate::capability::{BBoxGate, Detector, Frame};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersonEvidence {
    pub person_frames: u64,
    pub total_sampled_frames: u64,
    pub activity_score: f64,
}

/// Run the detector on every sampled frame and count frames with at least one plausibly
/// person-shaped box.
pub fn count_person_frames<I>(frames: I, detector: &dyn Detector, gate: &BBoxGate) -> Result<PersonEvidence>
where
    I: Iterator<Item = Result<Frame>>,
{
    let mut person_frames = 0u64;
    let mut total_sampled_frames = 0u64;

    for frame in frames {
        let frame = frame?;
        total_sampled_frames += 1;
        let detections = detector.detect(&frame)?;
        if detections.iter().any(|d| gate.accepts(&d.bbox)) {
            person_frames += 1;
        }
    }

    let activity_score = if total_sampled_frames > 0 {
        person_frames as f64 / total_sampled_frames as f64
    } else {
        0.0
    };

    Ok(PersonEvidence { person_frames, total_sampled_frames, activity_score })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::testing::{FakeDetector, PERSON_PIXEL};
    use crate::capability::PixelFormat;

    fn rgb(index: u64, person: bool) -> Result<Frame> {
        let v = if person { PERSON_PIXEL } else { 0 };
        Ok(Frame { index, width: 2, height: 2, format: PixelFormat::Rgb24, data: vec![v; 12] })
    }

    #[test]
    fn test_counts_frames_with_gated_boxes() {
        let frames = (0..10u64).map(|i| rgb(i * 15, i < 4));
        let evidence = count_person_frames(frames, &FakeDetector::default(), &BBoxGate::default()).unwrap();
        assert_eq!(evidence.person_frames, 4);
        assert_eq!(evidence.total_sampled_frames, 10);
        assert_eq!(evidence.activity_score, 0.4);
    }

    #[test]
    fn test_implausible_boxes_do_not_count() {
        let detector = FakeDetector { tiny_boxes: true, ..FakeDetector::default() };
        let frames = (0..10u64).map(|i| rgb(i, true));
        let evidence = count_person_frames(frames, &detector, &BBoxGate::default()).unwrap();
        assert_eq!(evidence.person_frames, 0);
    }

    #[test]
    fn test_no_frames_scores_zero() {
        let evidence = count_person_frames(std::iter::empty(), &FakeDetector::default(), &BBoxGate::default()).unwrap();
        assert_eq!(evidence.activity_score, 0.0);
    }
}
