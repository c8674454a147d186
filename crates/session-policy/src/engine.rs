//! Session policy engine
//!
//! Turns per-frame violation events into warnings. Debounced types must be
//! present for `persistence` consecutive frames before they are reported;
//! reported violations issue at most one warning per frame, and none while
//! the previous warning's grace period is running. Reaching `max_warnings`
//! ends the session for good.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use frame_analysis::{ViolationEvent, ViolationKind};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigOverride, SessionConfig};
use crate::decision::{DecisionStatus, FrameDecision, Outcome, ReportedViolation, WarningUpdate};
use crate::state::ClientSessionState;
use crate::PolicyError;

/// Page visibility change reported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabState {
    Hidden,
    Visible,
    Blur,
    Focus,
}

impl TabState {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hidden" => Some(TabState::Hidden),
            "visible" => Some(TabState::Visible),
            "blur" => Some(TabState::Blur),
            "focus" => Some(TabState::Focus),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TabState::Hidden => "hidden",
            TabState::Visible => "visible",
            TabState::Blur => "blur",
            TabState::Focus => "focus",
        }
    }

    /// Whether the candidate left the exam page
    pub fn is_away(&self) -> bool {
        matches!(self, TabState::Hidden | TabState::Blur)
    }
}

/// Policy engine for one client session
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    client_id: String,
    state: ClientSessionState,
}

impl SessionPolicy {
    pub fn new(client_id: impl Into<String>, config: SessionConfig) -> Self {
        Self::from_state(client_id, ClientSessionState::new(config))
    }

    pub fn from_state(client_id: impl Into<String>, state: ClientSessionState) -> Self {
        let client_id = client_id.into();
        debug!(client_id = %client_id, warnings = state.warning_count, "Session policy created");
        Self { client_id, state }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn rename(&mut self, client_id: &str) {
        self.client_id = client_id.to_string();
    }

    pub fn state(&self) -> &ClientSessionState {
        &self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.state.config
    }

    pub fn is_ended(&self) -> bool {
        self.state.session_ended
    }

    /// Merge a client override into this session's config
    pub fn update_config(&mut self, o: &ConfigOverride) -> Result<(), PolicyError> {
        self.state.config = self.state.config.merged(o)?;
        self.state.enforce_limit();
        info!(client_id = %self.client_id, "Session config updated: {:?}", o);
        Ok(())
    }

    /// Mark the session ended without a terminal decision (explicit end)
    pub fn end(&mut self) {
        self.state.session_ended = true;
    }

    /// Queue a warning change the store did not accept. A newer change
    /// replaces an older one, but a queued session end is kept.
    pub fn defer_update(&mut self, update: WarningUpdate) {
        let merged = match self.state.unsaved.take() {
            None => update,
            Some(prev) => WarningUpdate {
                warning_count: prev.warning_count.max(update.warning_count),
                at: prev.at.max(update.at),
                session_ended: prev.session_ended || update.session_ended,
            },
        };
        self.state.unsaved = Some(merged);
    }

    /// Take the queued warning change for another write attempt
    pub fn take_unsaved(&mut self) -> Option<WarningUpdate> {
        self.state.unsaved.take()
    }

    pub fn has_unsaved(&self) -> bool {
        self.state.unsaved.is_some()
    }

    /// Decide on one analyzed frame.
    ///
    /// Debounced types absent from `events` have their counters reset.
    pub fn evaluate_frame(&mut self, events: &[ViolationEvent], now: DateTime<Utc>) -> FrameDecision {
        if !self.state.session_ended {
            self.state.frames_received += 1;
        }
        self.evaluate(events, now, true)
    }

    /// Decide on a tab visibility change. Returns `None` for states that are
    /// not violations (`visible`, `focus`).
    pub fn evaluate_tab_switch(&mut self, tab: TabState, now: DateTime<Utc>) -> Option<FrameDecision> {
        if !tab.is_away() {
            return None;
        }
        if !self.state.session_ended {
            self.state.tab_switch_count += 1;
        }
        let event = ViolationEvent::tab_switch(tab.as_str());
        Some(self.evaluate(std::slice::from_ref(&event), now, false))
    }

    fn evaluate(&mut self, events: &[ViolationEvent], now: DateTime<Utc>, reset_absent: bool) -> FrameDecision {
        if self.state.session_ended {
            debug!(client_id = %self.client_id, "Session ended, suppressing {} events", events.len());
            let mut decision = FrameDecision::ended(self.state.warning_count);
            for e in events {
                decision.outcomes.insert(e.kind(), Outcome::Suppress);
            }
            return decision;
        }

        let present: HashSet<ViolationKind> = events.iter().map(|e| e.kind()).collect();
        if reset_absent {
            self.state.consecutive.retain(|kind, _| present.contains(kind));
        }

        let mut ordered: Vec<&ViolationEvent> = events.iter().collect();
        ordered.sort_by_key(|e| e.kind());

        let mut counted: HashSet<ViolationKind> = HashSet::new();
        let mut reported = Vec::new();
        let mut outcomes = BTreeMap::new();
        let mut warning_update = None;
        let mut terminated = false;

        for event in ordered {
            let kind = event.kind();

            if kind.is_debounced() {
                let counter = self.state.consecutive.entry(kind).or_insert(0);
                if counted.insert(kind) {
                    *counter += 1;
                }
                let needed = self.state.config.persistence_for(kind);
                if *counter < needed {
                    debug!(
                        client_id = %self.client_id,
                        "Suppressed transient {} ({}/{})", kind, *counter, needed
                    );
                    outcomes.entry(kind).or_insert(Outcome::Suppress);
                    continue;
                }
            }

            self.state.violations_reported += 1;

            if warning_update.is_none() && self.state.grace_expired(now) {
                self.state.warning_count += 1;
                self.state.last_warning_time = Some(now);
                let remaining = self.state.warnings_remaining();

                warn!(
                    client_id = %self.client_id,
                    "Violation {} issued warning {}/{}",
                    kind,
                    self.state.warning_count,
                    self.state.config.max_warnings
                );

                if remaining == 0 {
                    self.state.session_ended = true;
                    error!(client_id = %self.client_id, "Session ended: maximum warnings reached ({})", kind);
                    reported.push(ReportedViolation {
                        event: event.clone(),
                        warnings_remaining: Some(0),
                    });
                    outcomes.insert(kind, Outcome::Terminate);
                    warning_update = Some(WarningUpdate {
                        warning_count: self.state.warning_count,
                        at: now,
                        session_ended: true,
                    });
                    terminated = true;
                    break;
                }

                reported.push(ReportedViolation {
                    event: event.clone(),
                    warnings_remaining: Some(remaining),
                });
                outcomes.insert(
                    kind,
                    Outcome::Report {
                        warning_issued: true,
                        warnings_remaining: remaining,
                    },
                );
                warning_update = Some(WarningUpdate {
                    warning_count: self.state.warning_count,
                    at: now,
                    session_ended: false,
                });
            } else {
                if let Some(left) = self.state.grace_remaining(now) {
                    info!(
                        client_id = %self.client_id,
                        "Violation {} during active warning ({:.1}s grace remaining)", kind, left
                    );
                }
                reported.push(ReportedViolation {
                    event: event.clone(),
                    warnings_remaining: None,
                });
                outcomes.entry(kind).or_insert(Outcome::Report {
                    warning_issued: false,
                    warnings_remaining: self.state.warnings_remaining(),
                });
            }
        }

        FrameDecision {
            status: if terminated {
                DecisionStatus::SessionEnded
            } else {
                DecisionStatus::Ok
            },
            violations: reported,
            warning_count: self.state.warning_count,
            warnings_remaining: self.state.warnings_remaining(),
            terminated,
            outcomes,
            warning_update,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use frame_analysis::{FaceEvidence, Severity, ViolationDetail};
    use frame_analysis::ViolationKind::*;
    use proptest::prelude::*;

    fn event(kind: ViolationKind) -> ViolationEvent {
        let faces = vec![FaceEvidence::new(Default::default())];
        let detail = match kind {
            NoFace => ViolationDetail::NoFace,
            MultiplePersons => ViolationDetail::MultiplePersons { faces },
            FaceOutOfBox => ViolationDetail::FaceOutOfBox { faces },
            LookingAway => ViolationDetail::LookingAway { faces },
            ProhibitedItems => ViolationDetail::ProhibitedItems { items: vec![] },
            TabSwitch => ViolationDetail::TabSwitch { state: "hidden".into() },
        };
        ViolationEvent {
            severity: Severity::Medium,
            confidence: 0.8,
            count: 1,
            detail,
        }
    }

    fn policy(persistence: u32) -> SessionPolicy {
        SessionPolicy::new(
            "client-1",
            SessionConfig {
                persistence_threshold: persistence,
                ..Default::default()
            },
        )
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn secs(s: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(s)
    }

    #[test]
    fn test_debounce_two_frames_suppressed() {
        let mut p = policy(3);
        for i in 0..2 {
            let d = p.evaluate_frame(&[event(LookingAway)], secs(i));
            assert_eq!(d.outcome(LookingAway), Some(Outcome::Suppress));
            assert!(d.violations.is_empty());
        }
        let d = p.evaluate_frame(&[], secs(2));
        assert!(d.violations.is_empty());
        assert_eq!(p.state().counter(LookingAway), 0);
        assert_eq!(p.state().warning_count, 0);
    }

    #[test]
    fn test_debounce_reports_from_third_frame_and_sticks() {
        let mut p = policy(3);
        p.evaluate_frame(&[event(LookingAway)], secs(0));
        p.evaluate_frame(&[event(LookingAway)], secs(1));

        let d = p.evaluate_frame(&[event(LookingAway)], secs(2));
        assert!(matches!(d.outcome(LookingAway), Some(Outcome::Report { warning_issued: true, .. })));

        let d = p.evaluate_frame(&[event(LookingAway)], secs(3));
        assert!(matches!(d.outcome(LookingAway), Some(Outcome::Report { warning_issued: false, .. })));
        assert_eq!(d.violations_detected(), 1);
    }

    #[test]
    fn test_absence_resets_counter() {
        let mut p = policy(2);
        p.evaluate_frame(&[event(FaceOutOfBox)], secs(0));
        p.evaluate_frame(&[event(LookingAway)], secs(1));
        let d = p.evaluate_frame(&[event(FaceOutOfBox)], secs(2));
        assert_eq!(d.outcome(FaceOutOfBox), Some(Outcome::Suppress));
        assert_eq!(p.state().counter(FaceOutOfBox), 1);
    }

    #[test]
    fn test_per_type_persistence() {
        let mut config = SessionConfig::default();
        config.persistence_by_type.insert(LookingAway, 2);
        let mut p = SessionPolicy::new("c", config);
        let d = p.evaluate_frame(&[event(LookingAway), event(ProhibitedItems)], secs(0));
        assert_eq!(d.outcome(LookingAway), Some(Outcome::Suppress));
        assert!(matches!(d.outcome(ProhibitedItems), Some(Outcome::Report { .. })));
    }

    #[test]
    fn test_grace_period_within_expiry() {
        let mut p = policy(1);
        p.evaluate_frame(&[event(NoFace)], secs(0));
        p.evaluate_frame(&[], secs(1));
        let d = p.evaluate_frame(&[event(NoFace)], secs(5));
        assert!(!d.warning_issued());
        assert_eq!(d.violations_detected(), 1);
        assert_eq!(p.state().warning_count, 1);
    }

    #[test]
    fn test_grace_period_after_expiry() {
        let mut p = policy(1);
        p.evaluate_frame(&[event(NoFace)], secs(0));
        let d = p.evaluate_frame(&[event(NoFace)], secs(9));
        assert!(d.warning_issued());
        assert_eq!(d.warnings_remaining, 1);
        assert_eq!(p.state().warning_count, 2);
    }

    #[test]
    fn test_third_warning_terminates() {
        let mut p = policy(1);
        p.evaluate_frame(&[event(NoFace)], secs(0));
        p.evaluate_frame(&[event(NoFace)], secs(9));
        let d = p.evaluate_frame(&[event(MultiplePersons)], secs(18));
        assert!(d.terminated);
        assert_eq!(d.status, DecisionStatus::SessionEnded);
        assert_eq!(d.outcome(MultiplePersons), Some(Outcome::Terminate));
        assert_eq!(d.warning_update.map(|u| u.session_ended), Some(true));
        assert!(p.is_ended());

        let d = p.evaluate_frame(&[event(NoFace)], secs(30));
        assert!(!d.terminated);
        assert_eq!(d.status, DecisionStatus::SessionEnded);
        assert_eq!(d.outcome(NoFace), Some(Outcome::Suppress));
        assert!(d.violations.is_empty());
        assert_eq!(p.state().warning_count, 3);
        assert!(p.evaluate_tab_switch(TabState::Hidden, secs(40)).unwrap().violations.is_empty());
    }

    #[test]
    fn test_one_increment_per_frame_in_priority_order() {
        let mut p = policy(1);
        let d = p.evaluate_frame(
            &[event(LookingAway), event(ProhibitedItems), event(NoFace)],
            secs(0),
        );
        assert_eq!(p.state().warning_count, 1);
        assert!(matches!(d.outcome(NoFace), Some(Outcome::Report { warning_issued: true, .. })));
        assert!(matches!(d.outcome(ProhibitedItems), Some(Outcome::Report { warning_issued: false, .. })));
        assert!(matches!(d.outcome(LookingAway), Some(Outcome::Report { warning_issued: false, .. })));
        assert_eq!(d.reported_kinds(), vec![NoFace, ProhibitedItems, LookingAway]);
    }

    #[test]
    fn test_termination_stops_frame_evaluation() {
        let mut p = SessionPolicy::from_state(
            "c",
            ClientSessionState::hydrate(SessionConfig::default(), 2, Some(secs(-60))),
        );
        let d = p.evaluate_frame(&[event(LookingAway), event(MultiplePersons)], secs(0));
        assert!(d.terminated);
        assert_eq!(d.reported_kinds(), vec![MultiplePersons]);
        assert_eq!(d.outcome(LookingAway), None);
    }

    #[test]
    fn test_tab_switch_skips_debounce_and_keeps_counters() {
        let mut p = policy(3);
        p.evaluate_frame(&[event(LookingAway)], secs(0));

        let d = p.evaluate_tab_switch(TabState::Blur, secs(1)).unwrap();
        assert!(d.warning_issued());
        assert_eq!(d.reported_kinds(), vec![TabSwitch]);
        assert_eq!(p.state().counter(LookingAway), 1);
        assert_eq!(p.state().tab_switch_count, 1);

        assert!(p.evaluate_tab_switch(TabState::Visible, secs(2)).is_none());
        let d = p.evaluate_tab_switch(TabState::Hidden, secs(3)).unwrap();
        assert!(!d.warning_issued());
    }

    #[test]
    fn test_config_lowering_max_warnings_ends_session() {
        let mut p = policy(1);
        p.evaluate_frame(&[event(NoFace)], secs(0));
        p.evaluate_frame(&[event(NoFace)], secs(10));
        p.update_config(&ConfigOverride {
            max_warnings: Some(2),
            ..Default::default()
        })
        .unwrap();
        assert!(p.is_ended());
    }

    #[test]
    fn test_deferred_updates_merge_and_keep_end() {
        let mut p = policy(1);
        assert!(!p.has_unsaved());

        p.defer_update(WarningUpdate {
            warning_count: 3,
            at: secs(10),
            session_ended: true,
        });
        p.defer_update(WarningUpdate {
            warning_count: 2,
            at: secs(5),
            session_ended: false,
        });

        let merged = p.take_unsaved().unwrap();
        assert_eq!(merged.warning_count, 3);
        assert_eq!(merged.at, secs(10));
        assert!(merged.session_ended);
        assert!(p.take_unsaved().is_none());
    }

    #[test]
    fn test_tab_state_parse() {
        assert_eq!(TabState::parse("HIDDEN"), Some(TabState::Hidden));
        assert_eq!(TabState::parse("minimized"), None);
    }

    fn arb_frame() -> impl Strategy<Value = (Vec<ViolationKind>, i64)> {
        (prop::sample::subsequence(ViolationKind::PRIORITY.to_vec(), 0..=6), 0i64..20)
    }

    proptest! {
        #[test]
        fn prop_warning_count_bounded(
            frames in prop::collection::vec(arb_frame(), 1..40),
            persistence in 1u32..4,
            max_warnings in 1u32..5,
        ) {
            let mut p = SessionPolicy::new("prop", SessionConfig {
                persistence_threshold: persistence,
                max_warnings,
                ..Default::default()
            });
            let mut now = t0();
            let mut terminations = 0;
            for (kinds, step) in frames {
                now += Duration::seconds(step);
                let events: Vec<ViolationEvent> = kinds.into_iter().map(event).collect();
                let before = p.state().warning_count;
                let d = p.evaluate_frame(&events, now);
                prop_assert!(p.state().warning_count <= max_warnings);
                prop_assert!(p.state().warning_count <= before + 1);
                if d.terminated {
                    terminations += 1;
                }
            }
            prop_assert!(terminations <= 1);
            prop_assert_eq!(p.is_ended(), p.state().warning_count == max_warnings);
        }
    }
}
