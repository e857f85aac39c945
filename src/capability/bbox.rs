// Bounding boxes and the area/aspect shape gate shared by the activity gate and event extraction

use serde::{Deserialize, Serialize};

use crate::constants::{BBOX_MAX_AREA, BBOX_MAX_ASPECT, BBOX_MIN_AREA, BBOX_MIN_ASPECT};
use crate::error::{PipelineError, Result};

/// Axis-aligned box in pixel coordinates, serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl From<[f64; 4]> for BBox {
    fn from(v: [f64; 4]) -> Self {
        BBox { x1: v[0], y1: v[1], x2: v[2], y2: v[3] }
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl BBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        BBox { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// height / width, or 0 for a degenerate box
    pub fn aspect_ratio(&self) -> f64 {
        let w = self.width();
        if w <= 0.0 {
            0.0
        } else {
            self.height() / w
        }
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Euclidean distance between the two box centers
    pub fn center_distance(&self, other: &BBox) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt()
    }
}

/// Accepts boxes whose area and height/width ratio fall inside inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BBoxGate {
    pub min_area: f64,
    pub max_area: f64,
    pub min_aspect: f64,
    pub max_aspect: f64,
}

impl Default for BBoxGate {
    fn default() -> Self {
        Self {
            min_area: BBOX_MIN_AREA,
            max_area: BBOX_MAX_AREA,
            min_aspect: BBOX_MIN_ASPECT,
            max_aspect: BBOX_MAX_ASPECT,
        }
    }
}

impl BBoxGate {
    pub fn accepts(&self, bbox: &BBox) -> bool {
        let area = bbox.area();
        if area < self.min_area || area > self.max_area {
            return false;
        }
        let aspect = bbox.aspect_ratio();
        aspect >= self.min_aspect && aspect <= self.max_aspect
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if self.min_area < 0.0 || self.min_area > self.max_area {
            return Err(PipelineError::Configuration(format!(
                "{}: min_area {} must be within [0, max_area {}]",
                name, self.min_area, self.max_area
            )));
        }
        if self.min_aspect < 0.0 || self.min_aspect > self.max_aspect {
            return Err(PipelineError::Configuration(format!(
                "{}: min_aspect {} must be within [0, max_aspect {}]",
                name, self.min_aspect, self.max_aspect
            )));
        }
        Ok(())
    }
}
