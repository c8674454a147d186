//! Per-client session state

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use frame_analysis::ViolationKind;

use crate::config::SessionConfig;
use crate::decision::WarningUpdate;

/// Runtime state of one client's session
#[derive(Debug, Clone)]
pub struct ClientSessionState {
    /// Warnings issued, never above `config.max_warnings`
    pub warning_count: u32,

    /// Time of the last issued warning
    pub last_warning_time: Option<DateTime<Utc>>,

    /// Terminal; no further decisions once set
    pub session_ended: bool,

    /// Consecutive frames each debounced type has been present
    pub consecutive: HashMap<ViolationKind, u32>,

    pub config: SessionConfig,

    pub frames_received: u64,

    /// Violations surfaced to the client
    pub violations_reported: u64,

    pub tab_switch_count: u32,

    pub connected_at: DateTime<Utc>,

    /// Warning change not yet accepted by the store
    pub unsaved: Option<WarningUpdate>,
}

impl ClientSessionState {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            warning_count: 0,
            last_warning_time: None,
            session_ended: false,
            consecutive: HashMap::new(),
            config,
            frames_received: 0,
            violations_reported: 0,
            tab_switch_count: 0,
            connected_at: Utc::now(),
            unsaved: None,
        }
    }

    /// Restore from persisted warning state. A stored count at or above the
    /// limit yields an ended session.
    pub fn hydrate(config: SessionConfig, warning_count: u32, last_warning_time: Option<DateTime<Utc>>) -> Self {
        let mut state = Self::new(config);
        state.warning_count = warning_count;
        state.last_warning_time = last_warning_time;
        state.enforce_limit();
        state
    }

    /// Clamp the warning count to the limit, ending the session when reached
    pub fn enforce_limit(&mut self) {
        if self.warning_count >= self.config.max_warnings {
            self.warning_count = self.config.max_warnings;
            self.session_ended = true;
        }
    }

    pub fn counter(&self, kind: ViolationKind) -> u32 {
        self.consecutive.get(&kind).copied().unwrap_or(0)
    }

    pub fn warnings_remaining(&self) -> u32 {
        self.config.max_warnings.saturating_sub(self.warning_count)
    }

    /// Whether a reportable violation at `now` would issue a new warning
    pub fn grace_expired(&self, now: DateTime<Utc>) -> bool {
        match self.last_warning_time {
            None => true,
            Some(last) => now - last > self.config.warning_expiry(),
        }
    }

    /// Seconds left in the current grace period, if one is active
    pub fn grace_remaining(&self, now: DateTime<Utc>) -> Option<f64> {
        if self.grace_expired(now) {
            return None;
        }
        let last = self.last_warning_time?;
        let left = self.config.warning_expiry() - (now - last);
        Some((left.num_milliseconds() as f64 / 1000.0).max(0.0))
    }

    pub fn reset_counters(&mut self) {
        self.consecutive.clear();
    }
}
