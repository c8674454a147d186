//! Live Proctoring API Server
//!
//! REST API and WebSocket server for live exam proctoring.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use frame_analysis::FrameAnalyzer;
use metrics_exporter_prometheus::PrometheusHandle;
use storage::{MemoryStore, SessionStore, SqliteStore};
use tower_governor::GovernorLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

mod error;
pub mod rate_limit;
mod routes;
pub mod service;
pub mod settings;
pub mod telemetry;
pub mod ws;

pub use error::ApiError;
pub use rate_limit::{create_governor_config, RateLimitConfig};
pub use service::{demo_backends, ProctorService};
pub use settings::Settings;
pub use telemetry::{init_logging, init_metrics};

/// Largest accepted frame upload
const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Application state shared across handlers
pub struct AppState {
    pub service: ProctorService,
    /// Prometheus handle; `None` when no recorder is installed
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(service: ProctorService, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            service,
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }
}

/// Create the application router.
///
/// The frame upload route is rate limited per peer IP, so the router must be
/// served with connect info.
pub fn create_router(state: Arc<AppState>, rate_limit: &RateLimitConfig) -> Result<Router, ApiError> {
    let governor = create_governor_config(rate_limit)?;

    let uploads = Router::new()
        .route("/api/frame/:client_id", post(routes::frames::upload))
        .layer(GovernorLayer { config: governor })
        .layer(DefaultBodyLimit::max(MAX_FRAME_BYTES));

    let router = Router::new()
        .route("/api/health", get(routes::system::health))
        .route("/api/clients", get(routes::system::clients))
        .route("/api/session/start", post(routes::sessions::start))
        .route("/api/session/end", post(routes::sessions::end))
        .route("/api/session/rebind", post(routes::sessions::rebind))
        .route("/api/session/summary", get(routes::reports::summary))
        .route("/api/session/:client_id", delete(routes::sessions::delete))
        .route("/api/tab_switch", post(routes::sessions::tab_switch))
        .route("/api/report/:client_id", get(routes::reports::report))
        .route("/api/violations/:client_id", get(routes::reports::violations))
        .route("/metrics", get(routes::system::metrics))
        .route("/ws/:client_id", get(ws::handler))
        .merge(uploads)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    Ok(router)
}

/// Open the configured session store
pub async fn open_store(settings: &Settings) -> Result<Arc<dyn SessionStore>, ApiError> {
    match &settings.database_url {
        Some(url) => Ok(Arc::new(SqliteStore::connect(url).await?)),
        None => {
            info!("No database configured, sessions are kept in memory");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Run the server
pub async fn run_server(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let metrics = init_metrics()?;
    let store = open_store(&settings).await?;

    let service = ProctorService::new(
        store,
        FrameAnalyzer::new(demo_backends()),
        settings.session.clone(),
        settings.single_shot_expiry_seconds,
        Duration::from_millis(settings.store_timeout_ms),
    );
    let state = Arc::new(AppState::new(service, Some(metrics)));
    let app = create_router(state, &settings.rate_limit)?;

    info!("Starting API server on {}", settings.bind_addr);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
