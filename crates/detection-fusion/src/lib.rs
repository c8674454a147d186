//! Detection Fusion
//!
//! Combines the output of several face, landmark and object detectors
//! into one view of a frame:
//! - Cross-backend duplicate suppression of face boxes
//! - Landmark-to-face matching by box overlap
//! - Pluggable detector backends with fallback tiers

pub mod backend;
pub mod dedup;
pub mod frame;
pub mod geometry;
pub mod landmarks;
pub mod matching;
pub mod stub;
pub mod types;

pub use backend::{BackendSet, BackendTier, DetectionCapability, DetectorBackend, FrameDetections};
pub use dedup::{deduplicate, DEFAULT_IOU_THRESHOLD};
pub use frame::Frame;
pub use geometry::{iou, Point, Rect};
pub use landmarks::{mesh, LandmarkSet};
pub use matching::{match_landmarks, MIN_MATCH_IOU};
pub use stub::StaticBackend;
pub use types::{DetectionCandidate, FaceObservation, ObjectProposal, DEFAULT_FACE_CONFIDENCE};

use thiserror::Error;

/// Detection fusion error types
#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Frame decoding failed: {0}")]
    Decode(String),

    #[error("Detector backend '{backend}' failed: {message}")]
    Backend { backend: String, message: String },
}

/// Fuse raw face candidates into face observations.
///
/// Deduplicates the candidates, then attaches the best-matching landmark set
/// to each surviving box. Candidates without a confidence are reported with
/// [`DEFAULT_FACE_CONFIDENCE`].
pub fn fuse_faces(
    candidates: &[DetectionCandidate],
    landmark_sets: &[LandmarkSet],
    iou_threshold: f32,
    min_landmark_iou: f32,
) -> Vec<FaceObservation> {
    let kept = deduplicate(candidates, iou_threshold);
    let rects: Vec<Rect> = kept.iter().map(|c| c.rect).collect();
    let matched = match_landmarks(&rects, landmark_sets, min_landmark_iou);

    kept.into_iter()
        .zip(matched)
        .map(|(c, lm)| {
            let face = FaceObservation::new(c.rect, c.confidence.unwrap_or(DEFAULT_FACE_CONFIDENCE));
            match lm {
                Some(lm) => face.with_landmarks(lm),
                None => face,
            }
        })
        .collect()
}
