//! TTIScan - Freshness classification of time-temperature indicator labels.
//!
//! # API Endpoints
//!
//! - `POST /api/analyze` - Classify a base64 / data-URL image
//! - `POST /api/analyze/upload` - Classify a multipart image upload
//! - `POST /api/calibrate` - Build and activate a profile from labelled regions
//! - `POST /api/calibrate/extract-color` - Preview a region's color
//! - `GET /api/calibration/status` - Calibration status
//! - `POST /api/calibration/default` - Activate the builtin profile
//! - `POST /api/calibration/import` - Activate a profile from JSON
//! - `GET /api/calibration/profiles` - List retained profiles
//! - `POST /api/calibration/profiles/:id/activate` - Re-activate a profile
//! - `GET /api/history` - Recent analyses
//! - `GET /health` - Health check

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use ttiscan::api::{AppState, router};
use ttiscan::config::Config;
use ttiscan::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("ttiscan=info".parse()?))
        .init();

    let config = Config::from_env();

    info!(
        port = config.port,
        db_url = %config.database_url,
        metric = ?config.metric,
        "Starting TTIScan server"
    );

    // Initialize storage
    let storage = Storage::new(&config.database_url).await?;
    info!("Database initialized");

    // Restore the active calibration and build application state
    let state = AppState::new(storage, config.metric, config.history_limit).await?;

    let app = router(state, config.max_upload_bytes);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "TTIScan is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
