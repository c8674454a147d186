//! Cross-backend duplicate suppression
//!
//! Greedy non-max suppression without class partitioning: every candidate
//! competes with every other, regardless of which backend produced it.

use tracing::debug;

use crate::geometry::iou;
use crate::types::DetectionCandidate;

/// Default IoU above which two face boxes are considered the same face
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.3;

fn rank_score(c: &DetectionCandidate) -> f32 {
    let s = c.score();
    if s.is_nan() {
        0.0
    } else {
        s
    }
}

/// Merge overlapping candidates, keeping the highest-confidence box of each cluster.
///
/// The result is ordered by descending confidence and no two kept boxes have
/// IoU above `iou_threshold`. Ties keep input (backend priority) order.
pub fn deduplicate(candidates: &[DetectionCandidate], iou_threshold: f32) -> Vec<DetectionCandidate> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<&DetectionCandidate> = candidates.iter().collect();
    sorted.sort_by(|a, b| rank_score(b).total_cmp(&rank_score(a)));

    let mut kept: Vec<DetectionCandidate> = Vec::with_capacity(sorted.len());
    for candidate in sorted {
        let duplicate = kept
            .iter()
            .any(|k| iou(&candidate.rect, &k.rect) > iou_threshold);
        if !duplicate {
            kept.push(candidate.clone());
        }
    }

    debug!(
        "Deduplicated {} candidates into {} boxes",
        candidates.len(),
        kept.len()
    );
    kept
}
