//! Facial landmark sets

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Rect};

/// Landmark indices of the 478-point face mesh topology (with refined irises)
pub mod mesh {
    pub const LEFT_EYE_OUTER: usize = 33;
    pub const LEFT_EYE_INNER: usize = 133;
    pub const RIGHT_EYE_OUTER: usize = 362;
    pub const RIGHT_EYE_INNER: usize = 263;

    pub const LEFT_IRIS: usize = 468;
    pub const RIGHT_IRIS: usize = 473;

    pub const LEFT_EYELID_TOP: usize = 159;
    pub const LEFT_EYELID_BOTTOM: usize = 145;
    pub const RIGHT_EYELID_TOP: usize = 386;
    pub const RIGHT_EYELID_BOTTOM: usize = 374;

    /// Mesh size without iris refinement
    pub const BASE_POINTS: usize = 468;
    /// Mesh size with iris refinement
    pub const REFINED_POINTS: usize = 478;
}

/// Ordered landmark points for one face, in pixel coordinates
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub points: Vec<Point>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Build from points normalized to `[0, 1]` relative to the frame size
    pub fn from_normalized(points: &[(f32, f32)], width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self {
            points: points.iter().map(|&(x, y)| Point::new(x * w, y * h)).collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<Point> {
        self.points.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether iris centers are present
    pub fn has_iris(&self) -> bool {
        self.points.len() > mesh::RIGHT_IRIS
    }

    /// Bounding box of all points, used to match the set to a fused face box
    pub fn bounding_rect(&self) -> Option<Rect> {
        Rect::bounding(&self.points)
    }
}
