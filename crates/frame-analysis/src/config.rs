//! Frame analysis configuration

use serde::{Deserialize, Serialize};

use crate::AnalysisError;

/// Frame analysis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Allowed face region, as fractions of the frame size
    pub left_pct: f32,
    pub top_pct: f32,
    pub right_pct: f32,
    pub bottom_pct: f32,

    /// Horizontal gaze score below which the candidate is looking away
    pub horiz_low: f32,

    /// Horizontal gaze score above which the candidate is looking away
    pub horiz_high: f32,

    /// Maximum vertical deviation from 0.5 for a horizontal deviation to count
    pub vert_tolerance: f32,

    /// IoU above which two face boxes are merged
    pub face_iou_threshold: f32,

    /// Minimum IoU for a landmark set to be matched to a face
    pub min_landmark_iou: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            left_pct: 0.25,
            top_pct: 0.15,
            right_pct: 0.75,
            bottom_pct: 0.85,
            horiz_low: 0.20,
            horiz_high: 0.80,
            vert_tolerance: 0.30,
            face_iou_threshold: 0.3,
            min_landmark_iou: 0.05,
        }
    }
}

impl AnalysisConfig {
    /// Create strict config (smaller allowed region, tighter gaze band)
    pub fn strict() -> Self {
        Self {
            left_pct: 0.30,
            right_pct: 0.70,
            horiz_low: 0.30,
            horiz_high: 0.70,
            ..Default::default()
        }
    }

    /// Create lenient config (wider allowed region and gaze band)
    pub fn lenient() -> Self {
        Self {
            left_pct: 0.15,
            top_pct: 0.10,
            right_pct: 0.85,
            bottom_pct: 0.90,
            horiz_low: 0.10,
            horiz_high: 0.90,
            ..Default::default()
        }
    }

    /// Check that fractions are in range and bounds are ordered
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let fractions = [
            ("left_pct", self.left_pct),
            ("top_pct", self.top_pct),
            ("right_pct", self.right_pct),
            ("bottom_pct", self.bottom_pct),
            ("horiz_low", self.horiz_low),
            ("horiz_high", self.horiz_high),
            ("face_iou_threshold", self.face_iou_threshold),
            ("min_landmark_iou", self.min_landmark_iou),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(AnalysisError::Config(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }

        if self.left_pct >= self.right_pct || self.top_pct >= self.bottom_pct {
            return Err(AnalysisError::Config("allowed region is empty".into()));
        }
        if self.horiz_low >= self.horiz_high {
            return Err(AnalysisError::Config("horiz_low must be below horiz_high".into()));
        }
        if self.vert_tolerance.is_nan() || self.vert_tolerance <= 0.0 {
            return Err(AnalysisError::Config("vert_tolerance must be positive".into()));
        }
        Ok(())
    }
}
