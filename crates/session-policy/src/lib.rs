//! Session Policy
//!
//! Stateful per-client warning escalation for proctoring sessions:
//! consecutive-frame debouncing, grace-period warnings, and session
//! termination after the warning limit. The registry owns one policy per
//! live client.

pub mod config;
pub mod decision;
pub mod engine;
pub mod registry;
pub mod state;

pub use config::{ConfigOverride, SessionConfig};
pub use decision::{DecisionStatus, FrameDecision, Outcome, ReportedViolation, WarningUpdate};
pub use engine::{SessionPolicy, TabState};
pub use registry::{Rebind, SessionRegistry, SharedPolicy};
pub use state::ClientSessionState;

use frame_analysis::AnalysisError;
use thiserror::Error;

/// Session policy error types
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}
