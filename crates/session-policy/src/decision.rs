//! Per-frame policy decisions

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use frame_analysis::{ViolationEvent, ViolationKind};
use serde::{Deserialize, Serialize};

/// What the policy decided for one violation type in a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not surfaced (debouncing, or session already ended)
    Suppress,
    /// Surfaced to the client
    Report {
        warning_issued: bool,
        warnings_remaining: u32,
    },
    /// Surfaced and ended the session
    Terminate,
}

/// Session status reported with every decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Ok,
    SessionEnded,
}

/// A violation surfaced to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedViolation {
    #[serde(flatten)]
    pub event: ViolationEvent,
    /// Set when this violation issued a warning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings_remaining: Option<u32>,
}

/// Warning count change to persist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarningUpdate {
    pub warning_count: u32,
    pub at: DateTime<Utc>,
    pub session_ended: bool,
}

/// Decision for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDecision {
    pub status: DecisionStatus,
    pub violations: Vec<ReportedViolation>,
    pub warning_count: u32,
    pub warnings_remaining: u32,
    /// Set only on the frame that ended the session
    pub terminated: bool,
    pub outcomes: BTreeMap<ViolationKind, Outcome>,
    pub warning_update: Option<WarningUpdate>,
}

impl FrameDecision {
    /// Decision for a session that had already ended
    pub fn ended(warning_count: u32) -> Self {
        Self {
            status: DecisionStatus::SessionEnded,
            violations: Vec::new(),
            warning_count,
            warnings_remaining: 0,
            terminated: false,
            outcomes: BTreeMap::new(),
            warning_update: None,
        }
    }

    pub fn outcome(&self, kind: ViolationKind) -> Option<Outcome> {
        self.outcomes.get(&kind).copied()
    }

    pub fn warning_issued(&self) -> bool {
        self.warning_update.is_some()
    }

    pub fn violations_detected(&self) -> usize {
        self.violations.len()
    }

    /// Kinds surfaced to the client this frame
    pub fn reported_kinds(&self) -> Vec<ViolationKind> {
        self.violations.iter().map(|v| v.event.kind()).collect()
    }
}
