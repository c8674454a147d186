//! Live Proctoring Server - Main Entry Point

use api::{init_logging, run_server, Settings};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;
    init_logging(&settings.log_level, settings.json_logs)?;

    info!("=== Live Proctoring Server v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Session defaults: max_warnings={}, warning_expiry={}s, persistence={}",
        settings.session.max_warnings, settings.session.warning_expiry_seconds, settings.session.persistence_threshold
    );

    run_server(settings).await?;

    Ok(())
}
