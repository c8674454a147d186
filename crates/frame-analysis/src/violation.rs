//! Frame-level violation events

use std::fmt;
use std::str::FromStr;

use detection_fusion::{Point, Rect};
use serde::{Deserialize, Serialize};

/// Violation types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    TabSwitch,
    NoFace,
    MultiplePersons,
    ProhibitedItems,
    FaceOutOfBox,
    LookingAway,
}

impl ViolationKind {
    /// Fixed evaluation order; the first kind to need a new warning in a
    /// frame consumes that frame's single warning increment.
    pub const PRIORITY: [ViolationKind; 6] = [
        ViolationKind::TabSwitch,
        ViolationKind::NoFace,
        ViolationKind::MultiplePersons,
        ViolationKind::ProhibitedItems,
        ViolationKind::FaceOutOfBox,
        ViolationKind::LookingAway,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::TabSwitch => "tab_switch",
            ViolationKind::NoFace => "no_face",
            ViolationKind::MultiplePersons => "multiple_persons",
            ViolationKind::ProhibitedItems => "prohibited_items",
            ViolationKind::FaceOutOfBox => "face_out_of_box",
            ViolationKind::LookingAway => "looking_away",
        }
    }

    /// Tab switches are reported immediately; everything else is debounced
    pub fn is_debounced(&self) -> bool {
        *self != ViolationKind::TabSwitch
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViolationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ViolationKind::PRIORITY
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown violation type: {}", s))
    }
}

/// Violation severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// A face cited as evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceEvidence {
    pub bbox: Rect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub center: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gaze_score: Option<f32>,
}

impl FaceEvidence {
    pub fn new(bbox: Rect) -> Self {
        Self {
            bbox,
            confidence: None,
            center: None,
            gaze_score: None,
        }
    }
}

/// A prohibited object cited as evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEvidence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<u32>,
    pub class_name: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Rect>,
}

/// Kind-specific violation payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViolationDetail {
    NoFace,
    MultiplePersons { faces: Vec<FaceEvidence> },
    FaceOutOfBox { faces: Vec<FaceEvidence> },
    LookingAway { faces: Vec<FaceEvidence> },
    ProhibitedItems { items: Vec<ItemEvidence> },
    TabSwitch { state: String },
}

/// A violation observed in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub severity: Severity,
    pub confidence: f32,
    pub count: u32,
    #[serde(flatten)]
    pub detail: ViolationDetail,
}

impl ViolationEvent {
    pub fn no_face() -> Self {
        Self {
            severity: Severity::High,
            confidence: 0.9,
            count: 0,
            detail: ViolationDetail::NoFace,
        }
    }

    pub fn tab_switch(state: impl Into<String>) -> Self {
        Self {
            severity: Severity::Medium,
            confidence: 1.0,
            count: 1,
            detail: ViolationDetail::TabSwitch { state: state.into() },
        }
    }

    pub fn kind(&self) -> ViolationKind {
        match self.detail {
            ViolationDetail::NoFace => ViolationKind::NoFace,
            ViolationDetail::MultiplePersons { .. } => ViolationKind::MultiplePersons,
            ViolationDetail::FaceOutOfBox { .. } => ViolationKind::FaceOutOfBox,
            ViolationDetail::LookingAway { .. } => ViolationKind::LookingAway,
            ViolationDetail::ProhibitedItems { .. } => ViolationKind::ProhibitedItems,
            ViolationDetail::TabSwitch { .. } => ViolationKind::TabSwitch,
        }
    }

    /// Face boxes cited by this event
    pub fn face_boxes(&self) -> impl Iterator<Item = Rect> + '_ {
        let faces: &[FaceEvidence] = match &self.detail {
            ViolationDetail::MultiplePersons { faces }
            | ViolationDetail::FaceOutOfBox { faces }
            | ViolationDetail::LookingAway { faces } => faces,
            _ => &[],
        };
        faces.iter().map(|f| f.bbox)
    }
}
