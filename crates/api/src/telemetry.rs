//! Logging and metrics setup

use frame_analysis::ViolationKind;
use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::ApiError;

pub const FRAMES_TOTAL: &str = "proctor_frames_total";
pub const VIOLATIONS_TOTAL: &str = "proctor_violations_total";
pub const WARNINGS_TOTAL: &str = "proctor_warnings_total";
pub const SESSIONS_TERMINATED_TOTAL: &str = "proctor_sessions_terminated_total";
pub const PERSISTENCE_FAILURES_TOTAL: &str = "proctor_persistence_failures_total";

/// Initialize logging
pub fn init_logging(level: &str, json: bool) -> Result<(), ApiError> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);

    let result = if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    };

    result.map_err(|e| ApiError::Internal(format!("Failed to set tracing subscriber: {}", e)))
}

/// Install the Prometheus recorder; the handle renders `/metrics`
pub fn init_metrics() -> Result<PrometheusHandle, ApiError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ApiError::Internal(format!("Failed to install metrics recorder: {}", e)))
}

pub fn record_frame() {
    counter!(FRAMES_TOTAL).increment(1);
}

pub fn record_violation(kind: ViolationKind) {
    counter!(VIOLATIONS_TOTAL, "type" => kind.as_str()).increment(1);
}

pub fn record_warning() {
    counter!(WARNINGS_TOTAL).increment(1);
}

pub fn record_termination() {
    counter!(SESSIONS_TERMINATED_TOTAL).increment(1);
}

pub fn record_persistence_failure() {
    counter!(PERSISTENCE_FAILURES_TOTAL).increment(1);
}
