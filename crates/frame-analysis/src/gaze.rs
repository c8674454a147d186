//! Landmark-based gaze estimation
//!
//! The horizontal score is the iris position between the eye corners,
//! averaged over both eyes with the right eye mirrored: 0.5 is centred.
//! The vertical score is the iris position between the eyelids.

use detection_fusion::landmarks::mesh;
use detection_fusion::{LandmarkSet, Point};
use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;

/// Gaze estimate for one face
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeReading {
    /// Combined horizontal score (unclamped)
    pub horizontal: f32,
    /// Combined vertical score, 0.5 when eyelids are unavailable
    pub vertical: f32,
    /// Whether the face is looking away
    pub looking_away: bool,
}

impl GazeReading {
    /// Horizontal score clamped to [0, 1] for reporting
    pub fn score(&self) -> f32 {
        self.horizontal.clamp(0.0, 1.0)
    }
}

/// Gaze estimator
#[derive(Debug, Clone)]
pub struct GazeEstimator {
    horiz_low: f32,
    horiz_high: f32,
    vert_tolerance: f32,
}

impl Default for GazeEstimator {
    fn default() -> Self {
        Self::new(&AnalysisConfig::default())
    }
}

fn ratio(value: f32, from: f32, to: f32) -> f32 {
    let span = to - from;
    if span.abs() < f32::EPSILON {
        return 0.5;
    }
    (value - from) / span
}

impl GazeEstimator {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            horiz_low: config.horiz_low,
            horiz_high: config.horiz_high,
            vert_tolerance: config.vert_tolerance,
        }
    }

    /// Estimate gaze from a landmark set.
    ///
    /// Returns `None` when the eye corners are missing. Without iris points
    /// the iris is taken as the midpoint of the eye corners.
    pub fn estimate(&self, landmarks: &LandmarkSet) -> Option<GazeReading> {
        let left_outer = landmarks.get(mesh::LEFT_EYE_OUTER)?;
        let left_inner = landmarks.get(mesh::LEFT_EYE_INNER)?;
        let right_outer = landmarks.get(mesh::RIGHT_EYE_OUTER)?;
        let right_inner = landmarks.get(mesh::RIGHT_EYE_INNER)?;

        let (left_iris, right_iris) = if landmarks.has_iris() {
            (landmarks.get(mesh::LEFT_IRIS)?, landmarks.get(mesh::RIGHT_IRIS)?)
        } else {
            (
                Point::midpoint(left_outer, left_inner),
                Point::midpoint(right_outer, right_inner),
            )
        };

        let left_norm = ratio(left_iris.x, left_inner.x, left_outer.x);
        let right_norm = ratio(right_iris.x, right_inner.x, right_outer.x);
        let horizontal = (left_norm + (1.0 - right_norm)) / 2.0;

        let vertical = self.vertical_score(landmarks, left_iris, right_iris);

        Some(GazeReading {
            horizontal,
            vertical,
            looking_away: self.is_looking_away(horizontal, vertical),
        })
    }

    fn vertical_score(&self, landmarks: &LandmarkSet, left_iris: Point, right_iris: Point) -> f32 {
        let lids = (
            landmarks.get(mesh::LEFT_EYELID_TOP),
            landmarks.get(mesh::LEFT_EYELID_BOTTOM),
            landmarks.get(mesh::RIGHT_EYELID_TOP),
            landmarks.get(mesh::RIGHT_EYELID_BOTTOM),
        );
        match lids {
            (Some(lt), Some(lb), Some(rt), Some(rb)) => {
                let lv = ratio(left_iris.y, lt.y, lb.y);
                let rv = ratio(right_iris.y, rt.y, rb.y);
                (lv + rv) / 2.0
            }
            _ => 0.5,
        }
    }

    /// Horizontal deviation counts only while vertical gaze stays near centre
    pub fn is_looking_away(&self, horizontal: f32, vertical: f32) -> bool {
        let off_axis = horizontal < self.horiz_low || horizontal > self.horiz_high;
        off_axis && (vertical - 0.5).abs() < self.vert_tolerance
    }
}
