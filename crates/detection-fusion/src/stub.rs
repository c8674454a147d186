//! Deterministic backend returning preset detections.
//!
//! Used when no detector models are configured and in tests. Boxes given as
//! frame fractions are scaled to the size of each frame it sees.

use crate::backend::{DetectionCapability, DetectorBackend};
use crate::frame::Frame;
use crate::geometry::{Point, Rect};
use crate::landmarks::LandmarkSet;
use crate::types::{DetectionCandidate, ObjectProposal};
use crate::FusionError;

#[derive(Debug, Clone, Copy)]
enum Coords {
    Pixels,
    Fractions,
}

#[derive(Debug, Clone)]
pub struct StaticBackend {
    name: String,
    coords: Coords,
    faces: Vec<(Rect, Option<f32>)>,
    landmarks: Vec<Vec<Point>>,
    objects: Vec<ObjectProposal>,
}

impl StaticBackend {
    /// Backend with pixel-space presets
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            coords: Coords::Pixels,
            faces: Vec::new(),
            landmarks: Vec::new(),
            objects: Vec::new(),
        }
    }

    /// Backend whose presets are fractions of the frame size
    pub fn fractional(name: impl Into<String>) -> Self {
        Self {
            coords: Coords::Fractions,
            ..Self::new(name)
        }
    }

    /// Mock: one face centred in the frame
    pub fn centered_face(name: impl Into<String>) -> Self {
        Self::fractional(name).with_face(Rect::new(0.3, 0.2, 0.7, 0.7), Some(0.95))
    }

    pub fn with_face(mut self, rect: Rect, confidence: Option<f32>) -> Self {
        self.faces.push((rect, confidence));
        self
    }

    pub fn with_landmarks(mut self, points: Vec<Point>) -> Self {
        self.landmarks.push(points);
        self
    }

    pub fn with_object(mut self, object: ObjectProposal) -> Self {
        self.objects.push(object);
        self
    }

    fn scale_rect(&self, r: Rect, frame: &Frame) -> Rect {
        match self.coords {
            Coords::Pixels => r,
            Coords::Fractions => {
                let (w, h) = (frame.width as f32, frame.height as f32);
                Rect::new(r.x1 * w, r.y1 * h, r.x2 * w, r.y2 * h)
            }
        }
    }
}

impl DetectorBackend for StaticBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, _capability: DetectionCapability) -> bool {
        true
    }

    fn detect_faces(&self, frame: &Frame) -> Result<Vec<DetectionCandidate>, FusionError> {
        Ok(self
            .faces
            .iter()
            .map(|(r, c)| DetectionCandidate::new(self.scale_rect(*r, frame), *c, self.name.clone()))
            .collect())
    }

    fn detect_landmarks(&self, frame: &Frame) -> Result<Vec<LandmarkSet>, FusionError> {
        Ok(self
            .landmarks
            .iter()
            .map(|points| match self.coords {
                Coords::Pixels => LandmarkSet::new(points.clone()),
                Coords::Fractions => {
                    let raw: Vec<(f32, f32)> = points.iter().map(|p| (p.x, p.y)).collect();
                    LandmarkSet::from_normalized(&raw, frame.width, frame.height)
                }
            })
            .collect())
    }

    fn detect_objects(&self, frame: &Frame) -> Result<Vec<ObjectProposal>, FusionError> {
        Ok(self
            .objects
            .iter()
            .map(|o| ObjectProposal {
                rect: o.rect.map(|r| self.scale_rect(r, frame)),
                ..o.clone()
            })
            .collect())
    }
}
