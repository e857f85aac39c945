// Phase A: frame differencing on sampled grayscale frames

use crate::capability::Frame;
use crate::error::{PipelineError, Result};

/// Result of scanning one chunk for motion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionScan {
    pub found: bool,
    pub pairs_compared: u64,
    pub peak_fraction: f64,
}

/// Fraction of pixels whose absolute difference exceeds `pixel_threshold`
pub fn changed_fraction(prev: &[u8], cur: &[u8], pixel_threshold: u8) -> f64 {
    if prev.is_empty() {
        return 0.0;
    }
    let changed = prev
        .iter()
        .zip(cur)
        .filter(|(a, b)| a.abs_diff(**b) > pixel_threshold)
        .count();
    changed as f64 / prev.len() as f64
}

/// Compare consecutive sampled frames; stop at the first pair whose changed fraction
/// exceeds `motion_threshold`. A single burst is enough.
pub fn scan_for_motion<I>(frames: I, motion_threshold: f64, pixel_threshold: u8) -> Result<MotionScan>
where
    I: Iterator<Item = Result<Frame>>,
{
    let mut scan = MotionScan { found: false, pairs_compared: 0, peak_fraction: 0.0 };
    let mut prev: Option<Frame> = None;

    for frame in frames {
        let frame = frame?;
        if let Some(p) = &prev {
            if p.data.len() != frame.data.len() {
                return Err(PipelineError::Capability(format!(
                    "frame {} size changed mid-stream ({} -> {} bytes)",
                    frame.index,
                    p.data.len(),
                    frame.data.len()
                )));
            }
            let fraction = changed_fraction(&p.data, &frame.data, pixel_threshold);
            scan.pairs_compared += 1;
            scan.peak_fraction = scan.peak_fraction.max(fraction);
            if fraction > motion_threshold {
                scan.found = true;
                return Ok(scan);
            }
        }
        prev = Some(frame);
    }

    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::PixelFormat;

    fn gray(index: u64, data: Vec<u8>) -> Result<Frame> {
        Ok(Frame { index, width: data.len() as u32, height: 1, format: PixelFormat::Gray, data })
    }

    #[test]
    fn test_changed_fraction_uses_strict_threshold() {
        let prev = vec![100u8; 4];
        let cur = vec![125, 126, 74, 100];
        // |diff| = 25, 26, 26, 0 -> two exceed 25
        assert_eq!(changed_fraction(&prev, &cur, 25), 0.5);
        assert_eq!(changed_fraction(&[], &[], 25), 0.0);
    }

    #[test]
    fn test_single_burst_is_enough() {
        let mut still = vec![0u8; 100];
        let frames = vec![
            gray(0, still.clone()),
            gray(10, still.clone()),
            {
                still[..5].copy_from_slice(&[255; 5]);
                gray(20, still.clone())
            },
            gray(30, vec![0u8; 100]),
        ];
        // The 0->10 pair has no change, the 10->20 pair changes 5% > 2%
        let scan = scan_for_motion(frames.into_iter(), 0.02, 25).unwrap();
        assert!(scan.found);
        assert_eq!(scan.pairs_compared, 2);
        assert_eq!(scan.peak_fraction, 0.05);
    }

    #[test]
    fn test_stops_at_first_success() {
        let mut pulled = 0;
        let frames = (0..50u64).map(|i| {
            pulled += 1;
            gray(i, vec![if i % 2 == 0 { 0 } else { 255 }; 16])
        });
        let scan = scan_for_motion(frames, 0.02, 25).unwrap();
        assert!(scan.found);
        assert_eq!(pulled, 2);
    }

    #[test]
    fn test_static_footage_and_threshold_equality() {
        let frames = (0..5u64).map(|i| gray(i, vec![7u8; 50]));
        let scan = scan_for_motion(frames, 0.02, 25).unwrap();
        assert!(!scan.found);
        assert_eq!(scan.pairs_compared, 4);

        // exactly 2% changed does not pass a 2% threshold
        let mut moved = vec![0u8; 50];
        moved[0] = 255;
        let frames = vec![gray(0, vec![0u8; 50]), gray(1, moved)];
        assert!(!scan_for_motion(frames.into_iter(), 0.02, 25).unwrap().found);
    }

    #[test]
    fn test_single_frame_has_no_motion() {
        let scan = scan_for_motion(std::iter::once(gray(0, vec![1, 2, 3])), 0.02, 25).unwrap();
        assert_eq!(scan, MotionScan { found: false, pairs_compared: 0, peak_fraction: 0.0 });
    }
}
