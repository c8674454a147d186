//! Landmark-to-face matching

use crate::geometry::{iou, Rect};
use crate::landmarks::LandmarkSet;

/// Minimum IoU between a landmark set's bounding box and a face box
pub const MIN_MATCH_IOU: f32 = 0.05;

/// Assign each face box the landmark set whose bounding box overlaps it most.
///
/// The first set wins on equal IoU. A face gets `None` when no set exceeds
/// `min_iou`. One landmark set may match several faces.
pub fn match_landmarks(
    faces: &[Rect],
    landmark_sets: &[LandmarkSet],
    min_iou: f32,
) -> Vec<Option<LandmarkSet>> {
    let mesh_boxes: Vec<(Rect, &LandmarkSet)> = landmark_sets
        .iter()
        .filter_map(|lm| lm.bounding_rect().map(|r| (r, lm)))
        .collect();

    faces
        .iter()
        .map(|face| {
            let mut best: Option<(f32, &LandmarkSet)> = None;
            for (mesh_box, lm) in &mesh_boxes {
                let overlap = iou(face, mesh_box);
                if overlap > best.map_or(0.0, |(b, _)| b) {
                    best = Some((overlap, lm));
                }
            }
            best.filter(|(overlap, _)| *overlap > min_iou)
                .map(|(_, lm)| lm.clone())
        })
        .collect()
}
