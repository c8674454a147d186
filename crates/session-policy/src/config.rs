//! Session policy configuration and per-session overrides

use std::collections::HashMap;

use chrono::Duration;
use frame_analysis::{AnalysisConfig, ViolationKind};
use serde::{Deserialize, Serialize};

use crate::PolicyError;

/// Session policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Frame analysis settings for this session
    pub analysis: AnalysisConfig,

    /// Consecutive frames before a debounced violation is reported (1 = immediately)
    pub persistence_threshold: u32,

    /// Per-type persistence, overriding `persistence_threshold`
    pub persistence_by_type: HashMap<ViolationKind, u32>,

    /// Grace period after a warning during which no new warning is issued
    pub warning_expiry_seconds: u64,

    /// Warnings that end the session
    pub max_warnings: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            analysis: AnalysisConfig::default(),
            persistence_threshold: 1,
            persistence_by_type: HashMap::new(),
            warning_expiry_seconds: 8,
            max_warnings: 3,
        }
    }
}

impl SessionConfig {
    /// Config for single-shot frame submissions: no debounce, longer grace period
    pub fn single_shot(warning_expiry_seconds: u64) -> Self {
        Self {
            warning_expiry_seconds,
            ..Default::default()
        }
    }

    /// Consecutive frames required before `kind` is reported
    pub fn persistence_for(&self, kind: ViolationKind) -> u32 {
        self.persistence_by_type
            .get(&kind)
            .copied()
            .unwrap_or(self.persistence_threshold)
    }

    pub fn warning_expiry(&self) -> Duration {
        Duration::seconds(self.warning_expiry_seconds.min(i64::MAX as u64 / 1000) as i64)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        self.analysis.validate()?;
        if self.max_warnings == 0 {
            return Err(PolicyError::Config("max_warnings must be at least 1".into()));
        }
        Ok(())
    }

    /// Apply an override on top of this config.
    ///
    /// The result is validated; an invalid override leaves nothing changed.
    pub fn merged(&self, o: &ConfigOverride) -> Result<SessionConfig, PolicyError> {
        let mut next = self.clone();
        let a = &mut next.analysis;
        set(&mut a.left_pct, o.left_pct);
        set(&mut a.top_pct, o.top_pct);
        set(&mut a.right_pct, o.right_pct);
        set(&mut a.bottom_pct, o.bottom_pct);
        set(&mut a.horiz_low, o.horiz_low);
        set(&mut a.horiz_high, o.horiz_high);
        set(&mut a.vert_tolerance, o.vert_tolerance);
        set(&mut next.persistence_threshold, o.persistence);
        set(&mut next.warning_expiry_seconds, o.warning_expiry_seconds);
        set(&mut next.max_warnings, o.max_warnings);
        if let Some(by_type) = &o.persistence_by_type {
            next.persistence_by_type.extend(by_type.iter().map(|(k, v)| (*k, *v)));
        }

        next.validate()?;
        Ok(next)
    }
}

fn set<T: Copy>(field: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *field = v;
    }
}

/// Per-session config override sent by the client; absent fields keep the
/// server defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverride {
    pub left_pct: Option<f32>,
    pub top_pct: Option<f32>,
    pub right_pct: Option<f32>,
    pub bottom_pct: Option<f32>,
    pub horiz_low: Option<f32>,
    pub horiz_high: Option<f32>,
    pub vert_tolerance: Option<f32>,
    pub persistence: Option<u32>,
    pub persistence_by_type: Option<HashMap<ViolationKind, u32>>,
    pub warning_expiry_seconds: Option<u64>,
    pub max_warnings: Option<u32>,
}
