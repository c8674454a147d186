//! Detector backend capability interface
//!
//! Face detectors, landmark meshes and object detectors are pluggable. A
//! backend advertises which capabilities it supports; the [`BackendSet`]
//! queries them in priority order and tolerates individual failures.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::frame::Frame;
use crate::landmarks::LandmarkSet;
use crate::types::{DetectionCandidate, ObjectProposal};
use crate::FusionError;

/// Detection capabilities a backend may provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionCapability {
    Faces,
    Landmarks,
    Objects,
}

/// Detector backend trait.
///
/// Methods for unsupported capabilities keep their empty default.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier, used as the candidate source tag
    fn name(&self) -> &str;

    /// Returns true when the backend supports a capability
    fn supports(&self, capability: DetectionCapability) -> bool;

    fn detect_faces(&self, _frame: &Frame) -> Result<Vec<DetectionCandidate>, FusionError> {
        Ok(Vec::new())
    }

    fn detect_landmarks(&self, _frame: &Frame) -> Result<Vec<LandmarkSet>, FusionError> {
        Ok(Vec::new())
    }

    fn detect_objects(&self, _frame: &Frame) -> Result<Vec<ObjectProposal>, FusionError> {
        Ok(Vec::new())
    }
}

/// When a backend is asked for faces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendTier {
    /// Queried on every frame
    Always,
    /// Queried only if no earlier backend returned a face candidate
    WhenEmpty,
}

/// Raw per-frame detector output from all backends
#[derive(Debug, Clone, Default)]
pub struct FrameDetections {
    pub faces: Vec<DetectionCandidate>,
    pub landmarks: Vec<LandmarkSet>,
    pub objects: Vec<ObjectProposal>,
}

struct Entry {
    backend: Arc<dyn DetectorBackend>,
    tier: BackendTier,
}

/// Ordered set of detector backends (registration order is priority)
#[derive(Default)]
pub struct BackendSet {
    entries: Vec<Entry>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend queried on every frame
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        self.register_with_tier(Arc::new(backend), BackendTier::Always);
    }

    /// Register a shared backend with an explicit tier
    pub fn register_with_tier(&mut self, backend: Arc<dyn DetectorBackend>, tier: BackendTier) {
        debug!("Registered detector backend '{}' ({:?})", backend.name(), tier);
        self.entries.push(Entry { backend, tier });
    }

    /// Registered backend names in priority order
    pub fn list(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.backend.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any backend supports a capability
    pub fn supports(&self, capability: DetectionCapability) -> bool {
        self.entries.iter().any(|e| e.backend.supports(capability))
    }

    /// Run every applicable backend on a frame.
    ///
    /// A failing backend contributes nothing; the others still run.
    pub fn collect(&self, frame: &Frame) -> FrameDetections {
        let mut out = FrameDetections::default();

        for entry in &self.entries {
            let backend = &entry.backend;

            if backend.supports(DetectionCapability::Faces)
                && (entry.tier == BackendTier::Always || out.faces.is_empty())
            {
                match backend.detect_faces(frame) {
                    Ok(faces) => {
                        debug!("{} detected {} face candidates", backend.name(), faces.len());
                        out.faces.extend(faces);
                    }
                    Err(e) => warn!("Face detection failed on {}: {}", backend.name(), e),
                }
            }

            if backend.supports(DetectionCapability::Landmarks) {
                match backend.detect_landmarks(frame) {
                    Ok(sets) => out.landmarks.extend(sets),
                    Err(e) => warn!("Landmark detection failed on {}: {}", backend.name(), e),
                }
            }

            if backend.supports(DetectionCapability::Objects) {
                match backend.detect_objects(frame) {
                    Ok(objects) => out.objects.extend(objects),
                    Err(e) => warn!("Object detection failed on {}: {}", backend.name(), e),
                }
            }
        }

        out
    }
}
