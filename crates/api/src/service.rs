//! Proctoring service
//!
//! Wires the session registry, the frame analyzer and the session store.
//! Every frame for a client is processed under that client's policy lock;
//! persistence runs after the decision is made and its failures are only
//! logged. A warning change the store refused stays on the policy and is
//! written again on the client's next event.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use detection_fusion::{BackendSet, StaticBackend};
use frame_analysis::{AnalysisConfig, FrameAnalysis, FrameAnalyzer, FrameMetrics, ViolationEvent};
use serde::Serialize;
use session_policy::{
    ClientSessionState, ConfigOverride, DecisionStatus, FrameDecision, Rebind, ReportedViolation, SessionConfig,
    SessionPolicy, SessionRegistry, SharedPolicy, TabState, WarningUpdate,
};
use storage::{summarize, NewViolation, SessionReport, SessionStore, StorageError, ViolationRecord};
use tracing::{debug, error, info, warn};

use crate::telemetry;
use crate::ApiError;

/// Violations returned by the summary endpoint
const SUMMARY_LIMIT: usize = 50;

/// Mock detectors used when no models are configured
pub fn demo_backends() -> BackendSet {
    warn!("No detector models configured. Using mock implementation.");
    let mut set = BackendSet::new();
    set.register(StaticBackend::centered_face("mock-face"));
    set
}

/// Reply to one analyzed frame
#[derive(Debug, Clone, Serialize)]
pub struct FrameResponse {
    pub status: DecisionStatus,
    pub violations_detected: usize,
    pub violations: Vec<ReportedViolation>,
    pub warning_count: u32,
    pub warnings_remaining: u32,
    pub integrity_score: f32,
    pub visibility_pct: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FrameResponse {
    fn from_decision(decision: FrameDecision, metrics: &FrameMetrics, now: DateTime<Utc>) -> Self {
        let message = decision
            .terminated
            .then(|| "Session ended: maximum warnings reached".to_string());
        Self {
            status: decision.status,
            violations_detected: decision.violations_detected(),
            violations: decision.violations,
            warning_count: decision.warning_count,
            warnings_remaining: decision.warnings_remaining,
            integrity_score: metrics.integrity_score,
            visibility_pct: metrics.visibility_pct,
            message,
            timestamp: now,
        }
    }

    fn ended(warning_count: u32, now: DateTime<Utc>) -> Self {
        Self::from_decision(FrameDecision::ended(warning_count), &FrameMetrics::default(), now)
    }

    pub fn is_ended(&self) -> bool {
        self.status == DecisionStatus::SessionEnded
    }
}

/// Tab switch outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TabSwitchStatus {
    Ok,
    Warning,
    GracePeriod,
    SessionEnded,
}

#[derive(Debug, Clone, Serialize)]
pub struct TabSwitchResponse {
    pub status: TabSwitchStatus,
    pub state: String,
    pub warning_count: u32,
    pub warnings_remaining: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_remaining_seconds: Option<f64>,
    pub tab_switch_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebindResponse {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    /// Runtime state was carried over from `previous_id`
    pub moved: bool,
    pub warning_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartResponse {
    pub client_id: String,
    pub created: bool,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndResponse {
    pub client_id: String,
    pub ended: bool,
    pub violation_count: usize,
    pub summary: BTreeMap<String, usize>,
    pub violations: Vec<ViolationRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryResponse {
    pub client_id: String,
    pub total_violations: usize,
    pub summary: BTreeMap<String, usize>,
    pub violations: Vec<ViolationRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientsResponse {
    pub clients: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub active_sessions: usize,
    pub backends: Vec<String>,
    pub store: String,
}

/// Proctoring orchestration shared by HTTP and WebSocket handlers
pub struct ProctorService {
    registry: SessionRegistry,
    /// Per-client locks for the single-shot path
    single_shot_locks: SessionRegistry,
    store: Arc<dyn SessionStore>,
    analyzer: Arc<FrameAnalyzer>,
    defaults: SessionConfig,
    single_shot_expiry: u64,
    store_timeout: Duration,
}

impl ProctorService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        analyzer: FrameAnalyzer,
        defaults: SessionConfig,
        single_shot_expiry: u64,
        store_timeout: Duration,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            single_shot_locks: SessionRegistry::new(),
            store,
            analyzer: Arc::new(analyzer),
            defaults,
            single_shot_expiry,
            store_timeout,
        }
    }

    pub fn defaults(&self) -> &SessionConfig {
        &self.defaults
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    async fn with_store<T, F>(&self, op: &'static str, fut: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ApiError::Timeout(op)),
        }
    }

    /// Run a store call on the frame path: failures are logged and counted
    async fn persist<T, F>(&self, client_id: &str, op: &'static str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        match self.with_store(op, fut).await {
            Ok(v) => Some(v),
            Err(e) => {
                error!(client_id = %client_id, "Persistence call {} failed: {}", op, e);
                telemetry::record_persistence_failure();
                None
            }
        }
    }

    /// Get the runtime session, creating it from stored warning state
    pub async fn connect(&self, client_id: &str) -> SharedPolicy {
        if let Some(policy) = self.registry.get(client_id).await {
            return policy;
        }

        let stored = self
            .persist(client_id, "get_session", self.store.get_session(client_id))
            .await
            .flatten();
        if stored.is_none() {
            self.persist(client_id, "create_session", self.store.create_session(client_id, Utc::now()))
                .await;
        }

        let ended = stored.as_ref().map_or(false, |s| s.is_ended());
        let (count, last) = stored
            .map(|s| (s.warning_count, s.last_warning_time))
            .unwrap_or((0, None));
        let defaults = self.defaults.clone();
        let (policy, created) = self
            .registry
            .get_or_create(client_id, || {
                let mut policy =
                    SessionPolicy::from_state(client_id, ClientSessionState::hydrate(defaults, count, last));
                if ended {
                    policy.end();
                }
                policy
            })
            .await;

        if created {
            info!(client_id = %client_id, warnings = count, "Client connected");
        }
        policy
    }

    /// Drop runtime state; the stored session survives.
    ///
    /// State holding a warning change the store has not accepted is kept so
    /// a reconnect resumes from it.
    pub async fn disconnect(&self, client_id: &str) {
        let Some(policy) = self.registry.get(client_id).await else {
            return;
        };
        let mut policy = policy.lock().await;
        self.commit(client_id, &mut policy, None).await;
        if policy.has_unsaved() {
            warn!(client_id = %client_id, "Keeping runtime state until the store accepts its warning count");
            return;
        }
        self.registry.remove(client_id).await;
        info!(client_id = %client_id, "Client disconnected");
    }

    async fn analyze(
        &self,
        bytes: Vec<u8>,
        sequence: u64,
        config: AnalysisConfig,
    ) -> Result<FrameAnalysis, ApiError> {
        let analyzer = Arc::clone(&self.analyzer);
        let analysis = tokio::task::spawn_blocking(move || analyzer.analyze_bytes(&bytes, sequence, &config))
            .await
            .map_err(|e| ApiError::Internal(format!("analysis task failed: {}", e)))??;
        Ok(analysis)
    }

    fn new_violation(event: &ViolationEvent, metrics: Option<&FrameMetrics>) -> NewViolation {
        NewViolation {
            violation_type: event.kind().as_str().to_string(),
            severity: event.severity.as_str().to_string(),
            details: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
            integrity_score: metrics.map(|m| m.integrity_score),
            visibility_pct: metrics.map(|m| m.visibility_pct),
            evidence_ref: None,
        }
    }

    /// Store every detected violation, reported or not
    async fn store_violations(
        &self,
        client_id: &str,
        events: &[ViolationEvent],
        metrics: Option<&FrameMetrics>,
        now: DateTime<Utc>,
    ) {
        for event in events {
            telemetry::record_violation(event.kind());
            let record = Self::new_violation(event, metrics);
            self.persist(client_id, "store_violation", self.store.store_violation(client_id, record, now))
                .await;
        }
    }

    /// Persist `update` together with any change the store refused earlier.
    /// A failed write stays on the policy for the next call.
    async fn commit(&self, client_id: &str, policy: &mut SessionPolicy, update: Option<WarningUpdate>) {
        if let Some(update) = update {
            policy.defer_update(update);
        }
        let Some(pending) = policy.take_unsaved() else {
            return;
        };
        if !self.write_update(client_id, &pending).await {
            warn!(client_id = %client_id, "Warning count {} kept for retry", pending.warning_count);
            policy.defer_update(pending);
        }
    }

    async fn write_update(&self, client_id: &str, update: &WarningUpdate) -> bool {
        let saved = self
            .persist(
                client_id,
                "update_warning_count",
                self.store
                    .update_warning_count(client_id, update.warning_count, Some(update.at)),
            )
            .await
            .is_some();
        if !saved || !update.session_ended {
            return saved;
        }
        self.persist(client_id, "end_session", self.store.end_session(client_id, update.at))
            .await
            .is_some()
    }

    /// Analyze one streamed frame and decide on it.
    ///
    /// Undecodable frames fail without touching the session.
    pub async fn process_frame(&self, client_id: &str, bytes: Vec<u8>) -> Result<FrameResponse, ApiError> {
        let policy = self.connect(client_id).await;
        let mut policy = policy.lock().await;

        if policy.is_ended() {
            debug!(client_id = %client_id, "Frame after session end ignored");
            self.commit(client_id, &mut policy, None).await;
            return Ok(FrameResponse::ended(policy.state().warning_count, Utc::now()));
        }

        let sequence = policy.state().frames_received + 1;
        let analysis = self
            .analyze(bytes, sequence, policy.config().analysis.clone())
            .await?;
        telemetry::record_frame();

        let now = Utc::now();
        self.store_violations(client_id, &analysis.violations, Some(&analysis.metrics), now)
            .await;

        let decision = policy.evaluate_frame(&analysis.violations, now);
        record_decision(&decision);
        self.commit(client_id, &mut policy, decision.warning_update).await;

        Ok(FrameResponse::from_decision(decision, &analysis.metrics, now))
    }

    /// Handle a page visibility change
    pub async fn tab_switch(&self, client_id: &str, state: &str) -> Result<TabSwitchResponse, ApiError> {
        let tab = TabState::parse(state).ok_or_else(|| ApiError::BadRequest(format!("unknown tab state: {}", state)))?;
        let policy = self.connect(client_id).await;
        let mut policy = policy.lock().await;

        let now = Utc::now();
        let ended_before = policy.is_ended();
        let decision = policy.evaluate_tab_switch(tab, now);

        let status = match &decision {
            None => TabSwitchStatus::Ok,
            Some(_) if ended_before => TabSwitchStatus::SessionEnded,
            Some(d) => {
                let event = ViolationEvent::tab_switch(tab.as_str());
                self.store_violations(client_id, std::slice::from_ref(&event), None, now)
                    .await;
                record_decision(d);

                if d.status == DecisionStatus::SessionEnded {
                    TabSwitchStatus::SessionEnded
                } else if d.warning_issued() {
                    TabSwitchStatus::Warning
                } else {
                    TabSwitchStatus::GracePeriod
                }
            }
        };
        let update = decision.as_ref().and_then(|d| d.warning_update);
        self.commit(client_id, &mut policy, update).await;

        let state = policy.state();
        Ok(TabSwitchResponse {
            status,
            state: tab.as_str().to_string(),
            warning_count: state.warning_count,
            warnings_remaining: state.warnings_remaining(),
            grace_remaining_seconds: if status == TabSwitchStatus::GracePeriod {
                state.grace_remaining(now)
            } else {
                None
            },
            tab_switch_count: state.tab_switch_count,
        })
    }

    /// Apply a client config override to the live session
    pub async fn update_config(&self, client_id: &str, o: &ConfigOverride) -> Result<SessionConfig, ApiError> {
        let policy = self.connect(client_id).await;
        let mut policy = policy.lock().await;
        let was_ended = policy.is_ended();
        policy.update_config(o)?;

        let mut update = None;
        if policy.is_ended() && !was_ended {
            let warning_count = policy.state().warning_count;
            warn!(client_id = %client_id, "Config override ended the session at {} warnings", warning_count);
            telemetry::record_termination();
            update = Some(WarningUpdate {
                warning_count,
                at: Utc::now(),
                session_ended: true,
            });
        }
        self.commit(client_id, &mut policy, update).await;
        Ok(policy.config().clone())
    }

    /// Move runtime state to a new client id
    pub async fn rebind(&self, old_id: Option<&str>, new_id: &str) -> Result<RebindResponse, ApiError> {
        if new_id.is_empty() {
            return Err(ApiError::BadRequest("client_id must not be empty".into()));
        }

        let moved = match old_id {
            Some(old) => self.registry.rebind(old, new_id).await == Rebind::Moved,
            None => false,
        };

        let policy = self.connect(new_id).await;
        if moved {
            // connect() only creates the stored session for fresh state
            let exists = self
                .persist(new_id, "get_session", self.store.get_session(new_id))
                .await
                .flatten()
                .is_some();
            if !exists {
                self.persist(new_id, "create_session", self.store.create_session(new_id, Utc::now()))
                    .await;
            }
        }

        let warning_count = policy.lock().await.state().warning_count;
        info!("Registered client {} (previous: {:?}, moved: {})", new_id, old_id, moved);

        Ok(RebindResponse {
            client_id: new_id.to_string(),
            previous_id: old_id.map(str::to_string),
            moved,
            warning_count,
        })
    }

    pub async fn start_session(&self, client_id: &str) -> Result<StartResponse, ApiError> {
        let now = Utc::now();
        let created = self
            .with_store("create_session", self.store.create_session(client_id, now))
            .await?;
        let start_time = if created {
            now
        } else {
            self.with_store("get_session", self.store.get_session(client_id))
                .await?
                .map(|s| s.start_time)
                .unwrap_or(now)
        };

        info!(client_id = %client_id, created, "Session started");
        Ok(StartResponse {
            client_id: client_id.to_string(),
            created,
            start_time,
        })
    }

    /// End the session and return what was recorded
    pub async fn end_session(&self, client_id: &str) -> Result<EndResponse, ApiError> {
        if let Some(policy) = self.registry.remove(client_id).await {
            let mut policy = policy.lock().await;
            self.commit(client_id, &mut policy, None).await;
            policy.end();
        }
        self.single_shot_locks.remove(client_id).await;

        let ended = self
            .with_store("end_session", self.store.end_session(client_id, Utc::now()))
            .await?;
        let violations = self
            .with_store("get_violations", self.store.get_violations(client_id))
            .await?;

        info!(client_id = %client_id, "Session ended with {} violations", violations.len());
        Ok(EndResponse {
            client_id: client_id.to_string(),
            ended,
            violation_count: violations.len(),
            summary: summarize(&violations),
            violations,
        })
    }

    pub async fn delete_session(&self, client_id: &str) -> Result<(), ApiError> {
        self.registry.remove(client_id).await;
        self.single_shot_locks.remove(client_id).await;
        let deleted = self
            .with_store("delete_session", self.store.delete_session(client_id))
            .await?;
        if !deleted {
            return Err(ApiError::NotFound(format!("session {}", client_id)));
        }
        info!(client_id = %client_id, "Session deleted");
        Ok(())
    }

    pub async fn report(&self, client_id: &str) -> Result<SessionReport, ApiError> {
        let session = self
            .with_store("get_session", self.store.get_session(client_id))
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("session {}", client_id)))?;
        let violations = self
            .with_store("get_violations", self.store.get_violations(client_id))
            .await?;
        Ok(SessionReport::build(&session, violations, Utc::now()))
    }

    /// Stored violations, optionally filtered by type
    pub async fn violations(&self, client_id: &str, v_type: Option<&str>) -> Result<Vec<ViolationRecord>, ApiError> {
        let mut violations = self
            .with_store("get_violations", self.store.get_violations(client_id))
            .await?;
        if let Some(v_type) = v_type {
            violations.retain(|v| v.matches_type(v_type));
        }
        Ok(violations)
    }

    pub async fn summary(&self, client_id: &str) -> Result<SummaryResponse, ApiError> {
        let mut violations = self
            .with_store("get_violations", self.store.get_violations(client_id))
            .await?;
        let summary = summarize(&violations);
        let total_violations = violations.len();
        violations.truncate(SUMMARY_LIMIT);

        Ok(SummaryResponse {
            client_id: client_id.to_string(),
            total_violations,
            summary,
            violations,
        })
    }

    pub async fn list_clients(&self) -> ClientsResponse {
        let clients = self.registry.active_ids().await;
        ClientsResponse {
            count: clients.len(),
            clients,
        }
    }

    pub async fn health(&self) -> ServiceHealth {
        let store = match self.with_store("list_sessions", self.store.list_sessions()).await {
            Ok(_) => "ok".to_string(),
            Err(e) => {
                warn!("Store health check failed: {}", e);
                "unavailable".to_string()
            }
        };

        ServiceHealth {
            active_sessions: self.registry.len().await,
            backends: self.analyzer.backends(),
            store,
        }
    }

    /// Fallback path for clients posting single frames over HTTP.
    ///
    /// Warning state comes from the store on every call, with the longer
    /// single-shot grace period and no debounce.
    pub async fn process_single_shot(&self, client_id: &str, bytes: Vec<u8>) -> Result<FrameResponse, ApiError> {
        let config = SessionConfig {
            analysis: self.defaults.analysis.clone(),
            max_warnings: self.defaults.max_warnings,
            ..SessionConfig::single_shot(self.single_shot_expiry)
        };

        let (lock, _) = self
            .single_shot_locks
            .get_or_create(client_id, || SessionPolicy::new(client_id, config.clone()))
            .await;
        let response = {
            let mut policy = lock.lock().await;
            self.single_shot_locked(client_id, &mut policy, config, bytes).await
        };
        drop(lock);

        // the entry only outlives the request while it holds an unsaved change
        self.single_shot_locks
            .remove_idle(client_id, |p| !p.has_unsaved())
            .await;
        response
    }

    async fn single_shot_locked(
        &self,
        client_id: &str,
        policy: &mut SessionPolicy,
        config: SessionConfig,
        bytes: Vec<u8>,
    ) -> Result<FrameResponse, ApiError> {
        self.commit(client_id, policy, None).await;

        // stored state is stale while a change is still unsaved
        if !policy.has_unsaved() {
            let stored = self
                .persist(client_id, "get_session", self.store.get_session(client_id))
                .await
                .flatten();
            if let Some(session) = &stored {
                if session.is_ended() {
                    return Ok(FrameResponse::ended(session.warning_count, Utc::now()));
                }
            } else {
                self.persist(client_id, "create_session", self.store.create_session(client_id, Utc::now()))
                    .await;
            }

            let (count, last) = stored
                .map(|s| (s.warning_count, s.last_warning_time))
                .unwrap_or((0, None));
            *policy = SessionPolicy::from_state(client_id, ClientSessionState::hydrate(config.clone(), count, last));
        }
        if policy.is_ended() {
            return Ok(FrameResponse::ended(policy.state().warning_count, Utc::now()));
        }

        let analysis = self.analyze(bytes, 0, config.analysis).await?;
        telemetry::record_frame();

        let now = Utc::now();
        self.store_violations(client_id, &analysis.violations, Some(&analysis.metrics), now)
            .await;
        let decision = policy.evaluate_frame(&analysis.violations, now);
        record_decision(&decision);
        self.commit(client_id, policy, decision.warning_update).await;

        Ok(FrameResponse::from_decision(decision, &analysis.metrics, now))
    }
}

fn record_decision(decision: &FrameDecision) {
    if let Some(update) = decision.warning_update {
        telemetry::record_warning();
        if update.session_ended {
            telemetry::record_termination();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use detection_fusion::Rect;
    use frame_analysis::ViolationKind;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use storage::{MemoryStore, SessionRecord};

    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([90, 90, 90]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    pub(crate) fn service_with(backend: StaticBackend, store: Arc<dyn SessionStore>) -> ProctorService {
        service_with_config(backend, store, SessionConfig::default())
    }

    fn service_with_config(backend: StaticBackend, store: Arc<dyn SessionStore>, config: SessionConfig) -> ProctorService {
        let mut set = BackendSet::new();
        set.register(backend);
        ProctorService::new(store, FrameAnalyzer::new(set), config, 30, Duration::from_millis(500))
    }

    /// Memory store whose writes can be switched off
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn set_failing(&self, failing: bool) {
            self.fail_writes.store(failing, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), StorageError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                Err(StorageError::DatabaseError("disk I/O error".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SessionStore for FlakyStore {
        async fn create_session(&self, client_id: &str, start_time: DateTime<Utc>) -> Result<bool, StorageError> {
            self.check()?;
            self.inner.create_session(client_id, start_time).await
        }

        async fn end_session(&self, client_id: &str, end_time: DateTime<Utc>) -> Result<bool, StorageError> {
            self.check()?;
            self.inner.end_session(client_id, end_time).await
        }

        async fn get_session(&self, client_id: &str) -> Result<Option<SessionRecord>, StorageError> {
            self.inner.get_session(client_id).await
        }

        async fn update_warning_count(
            &self,
            client_id: &str,
            warning_count: u32,
            last_warning_time: Option<DateTime<Utc>>,
        ) -> Result<(), StorageError> {
            self.check()?;
            self.inner
                .update_warning_count(client_id, warning_count, last_warning_time)
                .await
        }

        async fn store_violation(
            &self,
            client_id: &str,
            violation: NewViolation,
            timestamp: DateTime<Utc>,
        ) -> Result<i64, StorageError> {
            self.check()?;
            self.inner.store_violation(client_id, violation, timestamp).await
        }

        async fn get_violations(&self, client_id: &str) -> Result<Vec<ViolationRecord>, StorageError> {
            self.inner.get_violations(client_id).await
        }

        async fn delete_session(&self, client_id: &str) -> Result<bool, StorageError> {
            self.check()?;
            self.inner.delete_session(client_id).await
        }

        async fn list_sessions(&self) -> Result<Vec<SessionRecord>, StorageError> {
            self.inner.list_sessions().await
        }
    }

    fn no_face_service() -> (ProctorService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (service_with(StaticBackend::new("empty"), store.clone()), store)
    }

    #[tokio::test]
    async fn test_clean_frame() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(StaticBackend::centered_face("mock"), store.clone());

        let resp = service.process_frame("alice", png(64, 48)).await.unwrap();
        assert_eq!(resp.status, DecisionStatus::Ok);
        assert_eq!(resp.violations_detected, 0);
        assert_eq!(resp.integrity_score, 100.0);
        assert_eq!(resp.warnings_remaining, 3);
        assert!(store.get_session("alice").await.unwrap().is_some());
        assert!(store.get_violations("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_face_warns_and_persists() {
        let (service, store) = no_face_service();

        let resp = service.process_frame("bob", png(64, 48)).await.unwrap();
        assert_eq!(resp.violations_detected, 1);
        assert_eq!(resp.warning_count, 1);
        assert_eq!(resp.violations[0].warnings_remaining, Some(2));
        assert_eq!(resp.integrity_score, 30.0);

        // second frame inside the grace period: reported, no new warning
        let resp = service.process_frame("bob", png(64, 48)).await.unwrap();
        assert_eq!(resp.warning_count, 1);
        assert_eq!(resp.violations[0].warnings_remaining, None);

        let session = store.get_session("bob").await.unwrap().unwrap();
        assert_eq!(session.warning_count, 1);
        let stored = store.get_violations("bob").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].violation_type, "no_face");
        assert_eq!(stored[0].integrity_score, Some(30.0));
    }

    #[tokio::test]
    async fn test_hydrated_session_terminates() {
        let (service, store) = no_face_service();
        store
            .update_warning_count("carol", 2, Some(Utc::now() - chrono::Duration::seconds(60)))
            .await
            .unwrap();

        let resp = service.process_frame("carol", png(64, 48)).await.unwrap();
        assert!(resp.is_ended());
        assert_eq!(resp.warning_count, 3);
        assert_eq!(resp.warnings_remaining, 0);
        assert!(resp.message.is_some());
        assert!(store.get_session("carol").await.unwrap().unwrap().is_ended());

        // later frames are no-ops
        let resp = service.process_frame("carol", png(64, 48)).await.unwrap();
        assert!(resp.is_ended());
        assert_eq!(resp.violations_detected, 0);
        assert_eq!(store.get_violations("carol").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_frame_leaves_state() {
        let (service, store) = no_face_service();

        let result = service.process_frame("dave", b"garbage".to_vec()).await;
        assert!(matches!(result, Err(ApiError::Analysis(_))));

        let policy = service.registry().get("dave").await.unwrap();
        let policy = policy.lock().await;
        assert_eq!(policy.state().frames_received, 0);
        assert_eq!(policy.state().warning_count, 0);
        assert!(store.get_violations("dave").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_frame_keeps_debounce_counters() {
        let store = Arc::new(MemoryStore::new());
        let backend = StaticBackend::fractional("corner").with_face(Rect::new(0.0, 0.0, 0.2, 0.2), Some(0.9));
        let config = SessionConfig {
            persistence_threshold: 3,
            ..Default::default()
        };
        let service = service_with_config(backend, store, config);

        let resp = service.process_frame("dee", png(32, 32)).await.unwrap();
        assert_eq!(resp.violations_detected, 0);
        assert!(service.process_frame("dee", b"garbage".to_vec()).await.is_err());
        let resp = service.process_frame("dee", png(32, 32)).await.unwrap();
        assert_eq!(resp.violations_detected, 0);

        let policy = service.registry().get("dee").await.unwrap();
        let policy = policy.lock().await;
        assert_eq!(policy.state().counter(ViolationKind::FaceOutOfBox), 2);
        assert_eq!(policy.state().frames_received, 2);
        assert_eq!(policy.state().warning_count, 0);
    }

    #[tokio::test]
    async fn test_failed_termination_write_is_retried() {
        let store = Arc::new(FlakyStore::default());
        store
            .inner
            .update_warning_count("kay", 2, Some(Utc::now() - chrono::Duration::seconds(60)))
            .await
            .unwrap();
        let service = service_with(StaticBackend::new("empty"), store.clone());

        store.set_failing(true);
        let resp = service.process_frame("kay", png(32, 32)).await.unwrap();
        assert!(resp.is_ended());
        assert!(resp.message.is_some());
        let stored = store.inner.get_session("kay").await.unwrap().unwrap();
        assert_eq!(stored.warning_count, 2);
        assert!(!stored.is_ended());

        // runtime state is the only record of the termination
        service.disconnect("kay").await;
        assert!(service.registry().get("kay").await.is_some());
        let resp = service.tab_switch("kay", "hidden").await.unwrap();
        assert_eq!(resp.status, TabSwitchStatus::SessionEnded);
        assert!(!store.inner.get_session("kay").await.unwrap().unwrap().is_ended());

        store.set_failing(false);
        let resp = service.process_frame("kay", png(32, 32)).await.unwrap();
        assert!(resp.is_ended());
        assert!(resp.message.is_none());
        let stored = store.inner.get_session("kay").await.unwrap().unwrap();
        assert_eq!(stored.warning_count, 3);
        assert!(stored.is_ended());

        service.disconnect("kay").await;
        assert!(service.registry().get("kay").await.is_none());
        let resp = service.process_frame("kay", png(32, 32)).await.unwrap();
        assert!(resp.is_ended());
        assert!(resp.message.is_none());
        assert_eq!(resp.violations_detected, 0);
        assert_eq!(resp.warning_count, 3);
    }

    #[tokio::test]
    async fn test_disconnect_flushes_unsaved_warning() {
        let store = Arc::new(FlakyStore::default());
        let service = service_with(StaticBackend::new("empty"), store.clone());

        store.set_failing(true);
        let resp = service.process_frame("lee", png(32, 32)).await.unwrap();
        assert_eq!(resp.warning_count, 1);

        store.set_failing(false);
        service.disconnect("lee").await;
        assert!(service.registry().get("lee").await.is_none());
        assert_eq!(store.inner.get_session("lee").await.unwrap().unwrap().warning_count, 1);
    }

    #[tokio::test]
    async fn test_tab_switch_statuses() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(StaticBackend::centered_face("mock"), store.clone());

        let resp = service.tab_switch("erin", "hidden").await.unwrap();
        assert_eq!(resp.status, TabSwitchStatus::Warning);
        assert_eq!(resp.warning_count, 1);

        let resp = service.tab_switch("erin", "blur").await.unwrap();
        assert_eq!(resp.status, TabSwitchStatus::GracePeriod);
        assert!(resp.grace_remaining_seconds.unwrap() > 0.0);
        assert_eq!(resp.tab_switch_count, 2);

        let resp = service.tab_switch("erin", "visible").await.unwrap();
        assert_eq!(resp.status, TabSwitchStatus::Ok);

        assert!(matches!(
            service.tab_switch("erin", "minimized").await,
            Err(ApiError::BadRequest(_))
        ));

        let stored = store.get_violations("erin").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|v| v.violation_type == "tab_switch"));
    }

    #[tokio::test]
    async fn test_config_override_lowering_limit_ends_session() {
        let (service, store) = no_face_service();
        service.process_frame("fay", png(32, 32)).await.unwrap();

        let o = ConfigOverride {
            max_warnings: Some(1),
            ..Default::default()
        };
        let config = service.update_config("fay", &o).await.unwrap();
        assert_eq!(config.max_warnings, 1);
        assert!(store.get_session("fay").await.unwrap().unwrap().is_ended());

        let bad = ConfigOverride {
            max_warnings: Some(0),
            ..Default::default()
        };
        assert!(matches!(service.update_config("fay", &bad).await, Err(ApiError::Policy(_))));
    }

    #[tokio::test]
    async fn test_rebind_moves_state() {
        let (service, store) = no_face_service();
        service.process_frame("temp-1", png(32, 32)).await.unwrap();

        let resp = service.rebind(Some("temp-1"), "gus").await.unwrap();
        assert!(resp.moved);
        assert_eq!(resp.warning_count, 1);
        assert!(service.registry().get("temp-1").await.is_none());
        assert!(store.get_session("gus").await.unwrap().is_some());

        let resp = service.rebind(Some("nobody"), "hal").await.unwrap();
        assert!(!resp.moved);
        assert_eq!(resp.warning_count, 0);
        assert_eq!(service.list_clients().await.clients, vec!["gus".to_string(), "hal".to_string()]);
    }

    #[tokio::test]
    async fn test_end_and_report() {
        let (service, _store) = no_face_service();
        assert!(matches!(service.report("ivy").await, Err(ApiError::NotFound(_))));

        service.process_frame("ivy", png(32, 32)).await.unwrap();
        service.tab_switch("ivy", "hidden").await.unwrap();

        let summary = service.summary("ivy").await.unwrap();
        assert_eq!(summary.total_violations, 2);

        let tabs = service.violations("ivy", Some("tab_switch")).await.unwrap();
        assert_eq!(tabs.len(), 1);

        let ended = service.end_session("ivy").await.unwrap();
        assert!(ended.ended);
        assert_eq!(ended.violation_count, 2);
        assert!(service.registry().get("ivy").await.is_none());

        let report = service.report("ivy").await.unwrap();
        assert_eq!(report.violation_count, 2);
        assert_eq!(report.warning_count, 1);

        service.delete_session("ivy").await.unwrap();
        assert!(matches!(service.delete_session("ivy").await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_single_shot_uses_stored_state() {
        let (service, store) = no_face_service();

        let resp = service.process_single_shot("jo", png(32, 32)).await.unwrap();
        assert_eq!(resp.warning_count, 1);
        assert!(service.registry().get("jo").await.is_none());

        // within the 30 s fallback grace period
        let resp = service.process_single_shot("jo", png(32, 32)).await.unwrap();
        assert_eq!(resp.warning_count, 1);
        assert_eq!(resp.violations[0].event.kind(), ViolationKind::NoFace);

        store
            .update_warning_count("jo", 2, Some(Utc::now() - chrono::Duration::seconds(31)))
            .await
            .unwrap();
        let resp = service.process_single_shot("jo", png(32, 32)).await.unwrap();
        assert!(resp.is_ended());
        assert!(store.get_session("jo").await.unwrap().unwrap().is_ended());

        let resp = service.process_single_shot("jo", png(32, 32)).await.unwrap();
        assert!(resp.is_ended());
        assert_eq!(resp.violations_detected, 0);
    }

    #[tokio::test]
    async fn test_single_shot_lock_table_is_pruned() {
        let (service, _store) = no_face_service();
        for i in 0..50 {
            let id = format!("student-{}", i);
            service.process_single_shot(&id, png(16, 16)).await.unwrap();
            assert!(service.single_shot_locks.is_empty().await);
        }
        for i in 0..50 {
            let id = format!("student-{}", i);
            service.end_session(&id).await.unwrap();
            service.delete_session(&id).await.unwrap();
        }
        assert_eq!(service.single_shot_locks.len().await, 0);
    }

    #[tokio::test]
    async fn test_single_shot_keeps_unsaved_warning() {
        let store = Arc::new(FlakyStore::default());
        let service = service_with(StaticBackend::new("empty"), store.clone());

        store.set_failing(true);
        let resp = service.process_single_shot("lou", png(16, 16)).await.unwrap();
        assert_eq!(resp.warning_count, 1);
        assert!(store.inner.get_session("lou").await.unwrap().is_none());
        assert!(service.single_shot_locks.get("lou").await.is_some());

        // within the grace period of the unsaved warning
        let resp = service.process_single_shot("lou", png(16, 16)).await.unwrap();
        assert_eq!(resp.warning_count, 1);

        store.set_failing(false);
        let resp = service.process_single_shot("lou", png(16, 16)).await.unwrap();
        assert_eq!(resp.warning_count, 1);
        assert_eq!(store.inner.get_session("lou").await.unwrap().unwrap().warning_count, 1);
        assert!(service.single_shot_locks.is_empty().await);
    }

    #[tokio::test]
    async fn test_health_lists_backends() {
        let (service, _) = no_face_service();
        let health = service.health().await;
        assert_eq!(health.store, "ok");
        assert_eq!(health.backends, vec!["empty".to_string()]);
    }
}
