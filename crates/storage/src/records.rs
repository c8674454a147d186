//! Stored session and violation records

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Stored session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub client_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub warning_count: u32,
    pub last_warning_time: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn new(client_id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            client_id: client_id.into(),
            start_time,
            end_time: None,
            warning_count: 0,
            last_warning_time: None,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.end_time.is_some()
    }

    /// Session length, once ended
    pub fn duration(&self) -> Option<Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Violation to be stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewViolation {
    pub violation_type: String,
    pub severity: String,
    /// Full violation payload as sent to the client
    pub details: serde_json::Value,
    pub integrity_score: Option<f32>,
    pub visibility_pct: Option<f32>,
    /// Reference to stored evidence, if any
    pub evidence_ref: Option<String>,
}

/// Stored violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub id: i64,
    pub client_id: String,
    pub violation_type: String,
    pub timestamp: DateTime<Utc>,
    pub severity: String,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility_pct: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_ref: Option<String>,
}

impl ViolationRecord {
    pub fn from_new(id: i64, client_id: &str, v: NewViolation, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            client_id: client_id.to_string(),
            violation_type: v.violation_type,
            timestamp,
            severity: v.severity,
            details: v.details,
            integrity_score: v.integrity_score,
            visibility_pct: v.visibility_pct,
            evidence_ref: v.evidence_ref,
        }
    }

    /// Whether this record matches a type filter, by type or within its details
    pub fn matches_type(&self, v_type: &str) -> bool {
        self.violation_type == v_type || self.details.to_string().contains(v_type)
    }
}

/// Canonical type name for legacy aliases
fn canonical_type(v_type: &str) -> &str {
    match v_type {
        "phone" | "mobile" | "cellphone" => "prohibited_items",
        "multiple_people" | "multi_person" => "multiple_persons",
        other => other,
    }
}

/// Count violations per canonical type
pub fn summarize(violations: &[ViolationRecord]) -> BTreeMap<String, usize> {
    let mut summary = BTreeMap::new();
    for v in violations {
        *summary
            .entry(canonical_type(&v.violation_type).to_string())
            .or_insert(0) += 1;
    }
    summary
}

fn round2(v: f64) -> f32 {
    ((v * 100.0).round() / 100.0) as f32
}

fn average(values: impl Iterator<Item = f32>) -> Option<f32> {
    let (sum, n) = values.fold((0.0f64, 0usize), |(s, n), v| (s + v as f64, n + 1));
    (n > 0).then(|| round2(sum / n as f64))
}

/// `H:MM:SS`
pub fn format_duration(d: Duration) -> String {
    let secs = d.num_seconds().max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Violation report for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub client_id: String,
    /// `H:MM:SS`, or `N/A` while the session is open
    pub session_duration: String,
    pub warning_count: u32,
    pub violation_count: usize,
    pub severity_summary: BTreeMap<String, usize>,
    pub integrity_score_avg: Option<f32>,
    pub visibility_pct_avg: Option<f32>,
    pub violations: Vec<ViolationRecord>,
    pub generated_at: DateTime<Utc>,
}

impl SessionReport {
    pub fn build(session: &SessionRecord, violations: Vec<ViolationRecord>, now: DateTime<Utc>) -> Self {
        Self {
            client_id: session.client_id.clone(),
            session_duration: session
                .duration()
                .map(format_duration)
                .unwrap_or_else(|| "N/A".to_string()),
            warning_count: session.warning_count,
            violation_count: violations.len(),
            severity_summary: summarize(&violations),
            integrity_score_avg: average(violations.iter().filter_map(|v| v.integrity_score)),
            visibility_pct_avg: average(violations.iter().filter_map(|v| v.visibility_pct)),
            violations,
            generated_at: now,
        }
    }
}
