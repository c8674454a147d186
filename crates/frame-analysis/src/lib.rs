//! Frame Analysis
//!
//! Per-frame proctoring analysis on top of fused detections:
//! - Gaze estimation from facial landmarks
//! - Violation classification (absence, extra faces, framing, gaze, objects)
//! - Integrity score and face visibility metrics

pub mod classifier;
pub mod config;
pub mod gaze;
pub mod metrics;
pub mod violation;

pub use classifier::{Classification, FrameClassifier};
pub use config::AnalysisConfig;
pub use gaze::{GazeEstimator, GazeReading};
pub use metrics::FrameMetrics;
pub use violation::{FaceEvidence, ItemEvidence, Severity, ViolationDetail, ViolationEvent, ViolationKind};

use detection_fusion::{fuse_faces, BackendSet, FaceObservation, Frame, FrameDetections, FusionError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Frame analysis error types
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Invalid frame: {0}")]
    Frame(#[from] FusionError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Complete analysis of one frame
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameAnalysis {
    pub violations: Vec<ViolationEvent>,
    pub metrics: FrameMetrics,
    /// Fused faces
    #[serde(skip)]
    pub faces: Vec<FaceObservation>,
    pub object_person_count: usize,
    pub sequence: u64,
}

impl FrameAnalysis {
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    pub fn kinds(&self) -> Vec<ViolationKind> {
        self.violations.iter().map(|v| v.kind()).collect()
    }
}

/// Detection-to-violation pipeline
pub struct FrameAnalyzer {
    backends: BackendSet,
}

impl FrameAnalyzer {
    pub fn new(backends: BackendSet) -> Self {
        Self { backends }
    }

    /// Registered detector backend names
    pub fn backends(&self) -> Vec<String> {
        self.backends.list()
    }

    /// Decode and analyze an encoded frame
    pub fn analyze_bytes(
        &self,
        bytes: &[u8],
        sequence: u64,
        config: &AnalysisConfig,
    ) -> Result<FrameAnalysis, AnalysisError> {
        let frame = Frame::decode(bytes, sequence)?;
        Ok(self.analyze(&frame, config))
    }

    /// Run all detector backends on a frame and analyze the result
    pub fn analyze(&self, frame: &Frame, config: &AnalysisConfig) -> FrameAnalysis {
        let detections = self.backends.collect(frame);
        let mut analysis = analyze_detections(&detections, frame, config);
        analysis.sequence = frame.sequence;
        analysis
    }
}

/// Fuse, classify and score raw detections for a frame
pub fn analyze_detections(detections: &FrameDetections, frame: &Frame, config: &AnalysisConfig) -> FrameAnalysis {
    let faces = fuse_faces(
        &detections.faces,
        &detections.landmarks,
        config.face_iou_threshold,
        config.min_landmark_iou,
    );

    let allowed = frame.fractional_rect(config.left_pct, config.top_pct, config.right_pct, config.bottom_pct);
    let classification = FrameClassifier::new(config).classify(&faces, &detections.objects, allowed);
    let metrics = FrameMetrics::compute(&classification.violations, &faces, frame.width, frame.height);

    debug!(
        "Frame {}: {} faces, integrity {:.2}, visibility {:.2}%",
        frame.sequence,
        faces.len(),
        metrics.integrity_score,
        metrics.visibility_pct
    );

    FrameAnalysis {
        violations: classification.violations,
        metrics,
        faces,
        object_person_count: classification.object_person_count,
        sequence: frame.sequence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use detection_fusion::{ObjectProposal, Rect, StaticBackend};

    fn analyzer(backend: StaticBackend) -> FrameAnalyzer {
        let mut set = BackendSet::new();
        set.register(backend);
        FrameAnalyzer::new(set)
    }

    fn frame() -> Frame {
        Frame::blank(640, 480)
    }

    #[test]
    fn test_centered_face_is_clean() {
        let a = analyzer(StaticBackend::centered_face("mock"));
        let result = a.analyze(&frame(), &AnalysisConfig::default());
        assert!(!result.has_violations());
        assert_eq!(result.metrics.integrity_score, 100.0);
        assert!(result.metrics.visibility_pct > 5.0);
    }

    #[test]
    fn test_zero_faces() {
        let a = analyzer(StaticBackend::new("empty"));
        let result = a.analyze(&frame(), &AnalysisConfig::default());
        assert_eq!(result.kinds(), vec![ViolationKind::NoFace]);
        assert_eq!(result.metrics.integrity_score, 30.0);
    }

    #[test]
    fn test_two_faces() {
        let a = analyzer(
            StaticBackend::new("retina")
                .with_face(Rect::new(170.0, 100.0, 310.0, 260.0), Some(0.9))
                .with_face(Rect::new(330.0, 100.0, 470.0, 260.0), Some(0.6)),
        );
        let result = a.analyze(&frame(), &AnalysisConfig::default());
        assert_eq!(result.kinds(), vec![ViolationKind::MultiplePersons]);
        assert_eq!(result.violations[0].confidence, 0.6);
        assert_eq!(result.metrics.integrity_score, 55.0);
    }

    #[test]
    fn test_cellphone() {
        let a = analyzer(StaticBackend::centered_face("mock").with_object(ObjectProposal::new(
            Some(67),
            Some("cell phone"),
            0.8,
            Rect::new(20.0, 20.0, 60.0, 100.0),
        )));
        let result = a.analyze(&frame(), &AnalysisConfig::default());
        assert_eq!(result.kinds(), vec![ViolationKind::ProhibitedItems]);
        assert_eq!(result.violations[0].severity, Severity::High);
        assert!(result.metrics.integrity_score >= 45.0);
    }

    #[test]
    fn test_overlapping_backends_count_one_face() {
        let mut set = BackendSet::new();
        set.register(StaticBackend::new("dnn").with_face(Rect::new(200.0, 120.0, 400.0, 360.0), Some(0.7)));
        set.register(StaticBackend::new("retina").with_face(Rect::new(205.0, 118.0, 402.0, 355.0), Some(0.95)));
        let result = FrameAnalyzer::new(set).analyze(&frame(), &AnalysisConfig::default());
        assert!(!result.has_violations());
        assert_eq!(result.faces.len(), 1);
        assert_eq!(result.faces[0].confidence, 0.95);
    }

    #[test]
    fn test_undecodable_bytes() {
        let a = analyzer(StaticBackend::centered_face("mock"));
        let err = a.analyze_bytes(b"garbage", 1, &AnalysisConfig::default());
        assert!(matches!(err, Err(AnalysisError::Frame(FusionError::Decode(_)))));
    }
}
