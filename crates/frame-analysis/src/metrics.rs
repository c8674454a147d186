//! Frame integrity metrics

use detection_fusion::{FaceObservation, Rect};
use serde::{Deserialize, Serialize};

use crate::violation::{ViolationDetail, ViolationEvent};

/// Visibility below which a visible face is considered too small
const MIN_VISIBILITY_PCT: f32 = 5.0;

/// Per-frame summary scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameMetrics {
    /// 0..100, higher is better
    pub integrity_score: f32,
    /// Largest face area as a percentage of the frame area
    pub visibility_pct: f32,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for FrameMetrics {
    fn default() -> Self {
        Self {
            integrity_score: 100.0,
            visibility_pct: 0.0,
            frame_width: 0,
            frame_height: 0,
        }
    }
}

fn round2(v: f32) -> f32 {
    (v * 100.0).round() / 100.0
}

/// Score deduction for one violation
pub fn deduction(event: &ViolationEvent) -> f32 {
    match &event.detail {
        ViolationDetail::NoFace => 70.0,
        ViolationDetail::MultiplePersons { .. } => 45.0,
        ViolationDetail::ProhibitedItems { .. } => (55.0 * event.confidence.max(0.0)).min(55.0),
        ViolationDetail::LookingAway { .. } => (12.0 * event.count as f32).min(40.0),
        ViolationDetail::FaceOutOfBox { .. } => (10.0 * event.count as f32).min(30.0),
        ViolationDetail::TabSwitch { .. } => 0.0,
    }
}

impl FrameMetrics {
    /// Compute metrics from a frame's violations and fused faces.
    ///
    /// Visibility covers the fused faces and any face cited in a violation.
    /// The small-visibility deduction only applies when a face was seen.
    pub fn compute(violations: &[ViolationEvent], faces: &[FaceObservation], width: u32, height: u32) -> Self {
        let frame_area = (width as f32 * height as f32).max(1.0);

        let largest = faces
            .iter()
            .map(|f| f.rect)
            .chain(violations.iter().flat_map(|v| v.face_boxes()))
            .map(|r: Rect| r.area())
            .fold(None, |acc: Option<f32>, a| Some(acc.map_or(a, |m| m.max(a))));

        let visibility_pct = largest.map_or(0.0, |a| a / frame_area * 100.0);

        let mut integrity = 100.0 - violations.iter().map(deduction).sum::<f32>();
        if largest.is_some() && visibility_pct < MIN_VISIBILITY_PCT {
            integrity -= 10.0;
        }

        Self {
            integrity_score: round2(integrity.clamp(0.0, 100.0)),
            visibility_pct: round2(visibility_pct),
            frame_width: width,
            frame_height: height,
        }
    }
}
