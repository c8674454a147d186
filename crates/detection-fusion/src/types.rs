//! Detector outputs and fused observations

use serde::{Deserialize, Serialize};

use crate::geometry::Rect;
use crate::landmarks::LandmarkSet;

/// Confidence reported for a fused face whose detector gave none
pub const DEFAULT_FACE_CONFIDENCE: f32 = 0.8;

/// COCO class id for "cell phone"
pub const COCO_CELL_PHONE: u32 = 67;

/// COCO class id for "person"
pub const COCO_PERSON: u32 = 0;

/// A single face proposal from one detector backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionCandidate {
    /// Face box in pixels
    pub rect: Rect,
    /// Detector score; some backends report none
    pub confidence: Option<f32>,
    /// Name of the backend that produced it
    pub source: String,
}

impl DetectionCandidate {
    pub fn new(rect: Rect, confidence: Option<f32>, source: impl Into<String>) -> Self {
        Self {
            rect,
            confidence,
            source: source.into(),
        }
    }

    /// Score used for ranking; missing confidence ranks lowest
    pub fn score(&self) -> f32 {
        self.confidence.unwrap_or(0.0)
    }
}

/// A face after cross-backend fusion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub rect: Rect,
    pub confidence: f32,
    /// Matched landmark set, if a mesh backend saw this face
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<LandmarkSet>,
}

impl FaceObservation {
    pub fn new(rect: Rect, confidence: f32) -> Self {
        Self {
            rect,
            confidence,
            landmarks: None,
        }
    }

    pub fn with_landmarks(mut self, landmarks: LandmarkSet) -> Self {
        self.landmarks = Some(landmarks);
        self
    }
}

/// An object proposal from an object detector
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectProposal {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rect: Option<Rect>,
}

impl ObjectProposal {
    pub fn new(class_id: Option<u32>, class_name: Option<&str>, confidence: f32, rect: Rect) -> Self {
        Self {
            class_id,
            class_name: class_name.map(str::to_string),
            confidence: Some(confidence),
            rect: Some(rect),
        }
    }

    /// Lowercased class name with spaces replaced by underscores
    pub fn normalized_name(&self) -> String {
        self.class_name
            .as_deref()
            .map(|n| n.to_lowercase().replace(' ', "_"))
            .unwrap_or_default()
    }

    pub fn is_person(&self) -> bool {
        self.class_id == Some(COCO_PERSON) || self.normalized_name() == "person"
    }

    /// Phone match by COCO id or by a class name containing "cell" or "phone".
    /// Persons never count as phones.
    pub fn is_phone(&self) -> bool {
        if self.is_person() {
            return false;
        }
        let name = self.normalized_name();
        self.class_id == Some(COCO_CELL_PHONE) || name.contains("cell") || name.contains("phone")
    }

    pub fn score(&self) -> f32 {
        self.confidence.unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_matching() {
        let by_id = ObjectProposal {
            class_id: Some(COCO_CELL_PHONE),
            ..Default::default()
        };
        assert!(by_id.is_phone());

        let by_name = ObjectProposal {
            class_id: Some(99),
            class_name: Some("Mobile Phone".to_string()),
            ..Default::default()
        };
        assert!(by_name.is_phone());

        let cellular = ObjectProposal {
            class_name: Some("CELLPHONE".to_string()),
            ..Default::default()
        };
        assert!(cellular.is_phone());

        let cup = ObjectProposal::new(Some(41), Some("cup"), 0.9, Rect::default());
        assert!(!cup.is_phone());
    }

    #[test]
    fn test_person_is_not_phone() {
        let person = ObjectProposal {
            class_id: Some(COCO_PERSON),
            class_name: Some("person".to_string()),
            confidence: Some(0.9),
            rect: None,
        };
        assert!(person.is_person());
        assert!(!person.is_phone());
    }

    #[test]
    fn test_missing_confidence_scores_zero() {
        let c = DetectionCandidate::new(Rect::default(), None, "mesh");
        assert_eq!(c.score(), 0.0);
        assert_eq!(ObjectProposal::default().score(), 0.0);
    }
}
