//! Frame violation classifier

use detection_fusion::{FaceObservation, ObjectProposal, Point, Rect};
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::gaze::GazeEstimator;
use crate::violation::{FaceEvidence, ItemEvidence, Severity, ViolationDetail, ViolationEvent};

/// Classifier output for one frame
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub violations: Vec<ViolationEvent>,
    pub face_count: usize,
    /// Persons seen by the object detector. Reported only; the fused face
    /// count decides `multiple_persons`.
    pub object_person_count: usize,
}

/// Turns fused detections into frame-level violation events
#[derive(Debug, Clone)]
pub struct FrameClassifier {
    gaze: GazeEstimator,
}

/// Face center on the integer pixel grid
fn pixel_center(rect: &Rect) -> Point {
    let (x1, y1, x2, y2) = (rect.x1.trunc(), rect.y1.trunc(), rect.x2.trunc(), rect.y2.trunc());
    Point::new(((x1 + x2) / 2.0).trunc(), ((y1 + y2) / 2.0).trunc())
}

impl FrameClassifier {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            gaze: GazeEstimator::new(config),
        }
    }

    /// Classify one frame. `allowed` is the allowed face region in pixels.
    pub fn classify(
        &self,
        faces: &[FaceObservation],
        objects: &[ObjectProposal],
        allowed: Rect,
    ) -> Classification {
        let mut violations = Vec::new();

        let mut out_of_box = Vec::new();
        let mut looking_away = Vec::new();
        for face in faces {
            let center = pixel_center(&face.rect);
            if !allowed.contains(center) {
                out_of_box.push(FaceEvidence {
                    center: Some(center),
                    ..FaceEvidence::new(face.rect)
                });
            }

            if let Some(reading) = face.landmarks.as_ref().and_then(|lm| self.gaze.estimate(lm)) {
                if reading.looking_away {
                    looking_away.push(FaceEvidence {
                        gaze_score: Some(reading.score()),
                        ..FaceEvidence::new(face.rect)
                    });
                }
            }
        }

        if !out_of_box.is_empty() {
            violations.push(ViolationEvent {
                severity: Severity::Medium,
                confidence: 0.85,
                count: out_of_box.len() as u32,
                detail: ViolationDetail::FaceOutOfBox { faces: out_of_box },
            });
        }

        if !looking_away.is_empty() {
            violations.push(ViolationEvent {
                severity: Severity::Medium,
                confidence: 0.75,
                count: looking_away.len() as u32,
                detail: ViolationDetail::LookingAway { faces: looking_away },
            });
        }

        if faces.is_empty() {
            violations.push(ViolationEvent::no_face());
        } else if faces.len() > 1 {
            let min_conf = faces.iter().map(|f| f.confidence).fold(f32::INFINITY, f32::min);
            violations.push(ViolationEvent {
                severity: Severity::High,
                confidence: min_conf,
                count: faces.len() as u32,
                detail: ViolationDetail::MultiplePersons {
                    faces: faces
                        .iter()
                        .map(|f| FaceEvidence {
                            confidence: Some(f.confidence),
                            ..FaceEvidence::new(f.rect)
                        })
                        .collect(),
                },
            });
        }

        let object_person_count = objects.iter().filter(|o| o.is_person()).count();
        let items: Vec<ItemEvidence> = objects
            .iter()
            .filter(|o| o.is_phone())
            .map(|o| ItemEvidence {
                class_id: o.class_id,
                class_name: o.class_name.clone().unwrap_or_else(|| "cellphone".to_string()),
                confidence: o.score(),
                bbox: o.rect,
            })
            .collect();

        if !items.is_empty() {
            let max_conf = items.iter().map(|i| i.confidence).fold(0.0, f32::max);
            let avg_conf = items.iter().map(|i| i.confidence).sum::<f32>() / items.len() as f32;
            violations.push(ViolationEvent {
                severity: if max_conf >= 0.5 { Severity::High } else { Severity::Medium },
                confidence: avg_conf,
                count: items.len() as u32,
                detail: ViolationDetail::ProhibitedItems { items },
            });
        }

        debug!(
            "Classified frame: {} faces, {} object persons, {} violations",
            faces.len(),
            object_person_count,
            violations.len()
        );

        Classification {
            violations,
            face_count: faces.len(),
            object_person_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gaze::tests::eye_mesh;
    use crate::violation::ViolationKind;

    fn allowed() -> Rect {
        Rect::new(160.0, 72.0, 480.0, 408.0)
    }

    fn classifier() -> FrameClassifier {
        FrameClassifier::new(&AnalysisConfig::default())
    }

    fn kinds(c: &Classification) -> Vec<ViolationKind> {
        c.violations.iter().map(|v| v.kind()).collect()
    }

    #[test]
    fn test_no_face() {
        let c = classifier().classify(&[], &[], allowed());
        assert_eq!(kinds(&c), vec![ViolationKind::NoFace]);
        assert_eq!(c.violations[0].severity, Severity::High);
        assert_eq!(c.violations[0].confidence, 0.9);
    }

    #[test]
    fn test_multiple_persons_uses_min_confidence() {
        let faces = [
            FaceObservation::new(Rect::new(170.0, 100.0, 310.0, 260.0), 0.9),
            FaceObservation::new(Rect::new(330.0, 100.0, 470.0, 260.0), 0.6),
        ];
        let c = classifier().classify(&faces, &[], allowed());
        assert_eq!(kinds(&c), vec![ViolationKind::MultiplePersons]);
        assert_eq!(c.violations[0].confidence, 0.6);
        assert_eq!(c.violations[0].count, 2);
        assert_eq!(c.violations[0].face_boxes().count(), 2);
    }

    #[test]
    fn test_face_out_of_box_reports_centers() {
        let faces = [FaceObservation::new(Rect::new(0.0, 0.0, 101.0, 101.0), 0.9)];
        let c = classifier().classify(&faces, &[], allowed());
        assert_eq!(kinds(&c), vec![ViolationKind::FaceOutOfBox]);
        match &c.violations[0].detail {
            ViolationDetail::FaceOutOfBox { faces } => {
                assert_eq!(faces[0].center, Some(Point::new(50.0, 50.0)));
            }
            other => panic!("unexpected detail {:?}", other),
        }
    }

    #[test]
    fn test_center_on_boundary_is_inside() {
        let faces = [FaceObservation::new(Rect::new(100.0, 100.0, 220.0, 200.0), 0.9)];
        let c = classifier().classify(&faces, &[], allowed());
        assert!(c.violations.is_empty());
    }

    #[test]
    fn test_looking_away_with_landmarks() {
        let lm = eye_mesh(Point::new(250.0, 150.0), -15.0, 0.0);
        let faces = [FaceObservation::new(Rect::new(250.0, 150.0, 390.0, 310.0), 0.9).with_landmarks(lm)];
        let c = classifier().classify(&faces, &[], allowed());
        assert_eq!(kinds(&c), vec![ViolationKind::LookingAway]);
        assert_eq!(c.violations[0].confidence, 0.75);
    }

    #[test]
    fn test_prohibited_items_severity() {
        let faces = [FaceObservation::new(Rect::new(250.0, 150.0, 390.0, 310.0), 0.9)];
        let phone = ObjectProposal::new(Some(67), Some("cell phone"), 0.8, Rect::new(0.0, 0.0, 30.0, 60.0));
        let c = classifier().classify(&faces, &[phone], allowed());
        assert_eq!(kinds(&c), vec![ViolationKind::ProhibitedItems]);
        assert_eq!(c.violations[0].severity, Severity::High);
        assert_eq!(c.violations[0].confidence, 0.8);

        let weak = [
            ObjectProposal::new(None, Some("Phone"), 0.3, Rect::default()),
            ObjectProposal::new(None, Some("cellphone"), 0.4, Rect::default()),
        ];
        let c = classifier().classify(&faces, &weak, allowed());
        assert_eq!(c.violations[0].severity, Severity::Medium);
        assert!((c.violations[0].confidence - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_object_persons_do_not_raise_multiple_persons() {
        let faces = [FaceObservation::new(Rect::new(250.0, 150.0, 390.0, 310.0), 0.9)];
        let people = [
            ObjectProposal::new(Some(0), Some("person"), 0.9, Rect::default()),
            ObjectProposal::new(Some(0), Some("person"), 0.8, Rect::default()),
        ];
        let c = classifier().classify(&faces, &people, allowed());
        assert!(c.violations.is_empty());
        assert_eq!(c.object_person_count, 2);
    }
}
