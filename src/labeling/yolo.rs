// YOLO label export: one text file per (proposal, box), coordinates normalized to the frame

use std::path::Path;

use super::Proposal;
use crate::artifacts::write_text_atomic;
use crate::capability::BBox;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    /// None for a zero dimension
    pub fn new(width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then_some(FrameSize { width, height })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct YoloExport {
    pub files_written: usize,
    pub proposals_skipped: usize,
}

/// `<event_id>_frame_<nnnn>.txt`, numbered by position in the box sequence
pub fn yolo_filename(event_id: &str, position: usize) -> String {
    format!("{}_frame_{:04}.txt", event_id, position)
}

/// `category x_center y_center width height`, normalized, 6 decimals
pub fn yolo_line(category_id: u8, bbox: &BBox, size: FrameSize) -> String {
    let (w, h) = (size.width as f64, size.height as f64);
    let (cx, cy) = bbox.center();
    format!(
        "{} {:.6} {:.6} {:.6} {:.6}\n",
        category_id,
        cx / w,
        cy / h,
        bbox.width() / w,
        bbox.height() / h
    )
}

/// Write the label files for every proposal into `dir`. `frame_size` resolves the frame
/// geometry of a proposal's chunk; proposals it cannot resolve are skipped with a warning.
pub fn export_yolo<F>(proposals: &[Proposal], dir: &Path, mut frame_size: F) -> Result<YoloExport>
where
    F: FnMut(&Proposal) -> Option<FrameSize>,
{
    std::fs::create_dir_all(dir)?;
    let mut export = YoloExport::default();

    for proposal in proposals {
        if proposal.bbox_sequence.is_empty() {
            continue;
        }
        let Some(size) = frame_size(proposal) else {
            log::warn!("{}: frame size unknown, no YOLO labels written", proposal.event_id);
            export.proposals_skipped += 1;
            continue;
        };

        for (position, bbox) in proposal.bbox_sequence.iter().enumerate() {
            let path = dir.join(yolo_filename(&proposal.event_id, position));
            write_text_atomic(&path, &yolo_line(proposal.category_id, bbox, size))?;
            export.files_written += 1;
        }
    }

    log::debug!("YOLO labels: {} files in {}", export.files_written, dir.display());
    Ok(export)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yolo_line_normalizes_to_frame() {
        let size = FrameSize::new(1280, 720).unwrap();
        let line = yolo_line(4, &BBox::new(100.0, 200.0, 300.0, 560.0), size);
        assert_eq!(line, "4 0.156250 0.527778 0.156250 0.500000\n");
    }

    #[test]
    fn test_zero_frame_size_rejected() {
        assert!(FrameSize::new(0, 720).is_none());
        assert!(FrameSize::new(704, 0).is_none());
    }

    #[test]
    fn test_filename() {
        assert_eq!(yolo_filename("chunk_0002_event_0007", 3), "chunk_0002_event_0007_frame_0003.txt");
    }
}
