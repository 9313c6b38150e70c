//! HTTP API handlers for TTIScan.
//!
//! This layer is glue: it decodes request payloads into [`PixelBuffer`]s,
//! calls the calibration store and classifier, persists what they produce
//! and maps failures to JSON errors. Image decoding and classification run
//! on the blocking pool.
//!
//! Logs carry dimensions, states, confidences and profile names only; image
//! payloads are never logged.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::calibration::CalibrationStore;
use crate::classifier::{DistanceMetric, SensorClassifier, extract_color};
use crate::error::{ApiError, ApiResult, SensorError};
use crate::model::{
    AnalysisResult, AnalyzeRequest, CalibrateRequest, CalibrationProfile, CalibrationStatus,
    ExtractColorRequest, ExtractColorResponse, HistoryQuery, HistoryResponse, ProfileDocument,
    ProfileSource, ProfileSummary, Rect,
};
use crate::pixels::PixelBuffer;
use crate::storage::Storage;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CalibrationStore>,
    pub classifier: SensorClassifier,
    pub storage: Storage,
    pub history_limit: u32,
    /// Held across every profile swap and its database write, so the
    /// persisted active flag always follows the in-memory order.
    calibration_lock: Arc<Mutex<()>>,
}

impl AppState {
    /// Build the state and restore persisted profiles into the store.
    pub async fn new(
        storage: Storage,
        metric: DistanceMetric,
        history_limit: u32,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(CalibrationStore::new());

        for (profile, active) in storage.load_profiles().await? {
            if active {
                store.import_profile(profile);
            } else {
                store.retain(profile);
            }
        }

        let status = store.status();
        info!(
            calibrated = status.is_calibrated,
            source = status.source.map(|s| s.as_str()),
            "Calibration restored"
        );

        Ok(Self {
            classifier: SensorClassifier::new(Arc::clone(&store)).with_metric(metric),
            store,
            storage,
            history_limit,
            calibration_lock: Arc::new(Mutex::new(())),
        })
    }
}

/// Build the router with every endpoint.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/analyze", post(post_analyze))
        .route("/api/analyze/upload", post(post_analyze_upload))
        .route("/api/calibrate", post(post_calibrate))
        .route("/api/calibrate/extract-color", post(post_extract_color))
        .route("/api/calibration/status", get(get_calibration_status))
        .route("/api/calibration/default", post(post_default_calibration))
        .route("/api/calibration/import", post(post_import_profile))
        .route("/api/calibration/profiles", get(get_profiles))
        .route(
            "/api/calibration/profiles/:id/activate",
            post(post_activate_profile),
        )
        .route("/api/history", get(get_history))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .with_state(state)
}

/// Run CPU-bound core work off the async runtime.
async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SensorError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?
        .map_err(ApiError::from)
}

async fn classify_and_record(
    state: &AppState,
    image: PixelBuffer,
    region: Option<Rect>,
    source: String,
) -> ApiResult<AnalysisResult> {
    let classifier = state.classifier.clone();
    let result =
        blocking(move || classifier.classify(&image, region, &source, Utc::now())).await?;

    state.storage.append_result(&result).await?;

    info!(
        state = %result.state,
        confidence = result.confidence,
        estimated_days = result.estimated_days,
        profile = %result.profile_name,
        "Sensor analysed"
    );

    Ok(result)
}

/// POST /api/analyze - Classify a base64 image.
///
/// # Request Body
///
/// ```json
/// {
///     "image": "data:image/png;base64,iVBORw0...",
///     "region": { "x0": 10, "y0": 10, "x1": 60, "y1": 40 },
///     "source": "fridge-shelf-2.png"
/// }
/// ```
///
/// `region` and `source` are optional.
#[instrument(skip(state, request), fields(has_region = request.region.is_some()))]
pub async fn post_analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Json<AnalysisResult>> {
    let source = request
        .source
        .unwrap_or_else(|| format!("capture-{}.png", Uuid::new_v4().simple()));
    let encoded = request.image;
    let image = blocking(move || PixelBuffer::from_base64(&encoded)).await?;

    let result = classify_and_record(&state, image, request.region, source).await?;
    Ok(Json(result))
}

/// POST /api/analyze/upload - Classify an uploaded image file.
///
/// Multipart fields: `image` (the file) and optional `region` (JSON rect).
#[instrument(skip(state, multipart))]
pub async fn post_analyze_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<AnalysisResult>> {
    let mut upload = None;
    let mut region = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("image") => {
                let name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                upload = Some((name, bytes));
            }
            Some("region") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                let rect: Rect = serde_json::from_str(&text)
                    .map_err(|e| ApiError::BadRequest(format!("invalid region: {e}")))?;
                region = Some(rect);
            }
            _ => {}
        }
    }

    let (name, bytes) =
        upload.ok_or_else(|| ApiError::BadRequest("no image file provided".to_string()))?;
    let source = name.unwrap_or_else(|| format!("upload-{}", Uuid::new_v4().simple()));
    let image = blocking(move || PixelBuffer::decode(&bytes)).await?;

    let result = classify_and_record(&state, image, region, source).await?;
    Ok(Json(result))
}

/// POST /api/calibrate - Build a profile from labelled regions and activate it.
///
/// # Request Body
///
/// ```json
/// {
///     "name": "Bench lamp",
///     "image": "<base64>",
///     "regions": [
///         { "state": "fresh", "x0": 0, "y0": 0, "x1": 10, "y1": 10 },
///         { "state": "good", "x0": 10, "y0": 0, "x1": 20, "y1": 10 },
///         { "state": "warning", "x0": 20, "y0": 0, "x1": 30, "y1": 10 },
///         { "state": "expired", "x0": 30, "y0": 0, "x1": 40, "y1": 10 }
///     ]
/// }
/// ```
#[instrument(skip(state, request), fields(name = %request.name, regions = request.regions.len()))]
pub async fn post_calibrate(
    State(state): State<AppState>,
    Json(request): Json<CalibrateRequest>,
) -> ApiResult<Json<CalibrationProfile>> {
    let store = Arc::clone(&state.store);
    let CalibrateRequest {
        name,
        image,
        regions,
    } = request;

    let image = blocking(move || PixelBuffer::from_base64(&image)).await?;

    let _guard = state.calibration_lock.lock().await;
    let profile =
        blocking(move || store.save_profile(&name, &regions, &image, Utc::now())).await?;

    persist_active(&state, &profile).await?;
    Ok(Json((*profile).clone()))
}

/// POST /api/calibrate/extract-color - Preview the color of a selection.
#[instrument(skip(request))]
pub async fn post_extract_color(
    Json(request): Json<ExtractColorRequest>,
) -> ApiResult<Json<ExtractColorResponse>> {
    let ExtractColorRequest { image, region } = request;

    let (color, region) = blocking(move || {
        let image = PixelBuffer::from_base64(&image)?;
        extract_color(&image, region)
    })
    .await?;

    Ok(Json(ExtractColorResponse {
        color,
        hex: color.to_hex(),
        region,
    }))
}

/// GET /api/calibration/status - Whether classification is possible.
///
/// ```json
/// { "is_calibrated": true, "source": "default", "profile": { ... } }
/// ```
pub async fn get_calibration_status(State(state): State<AppState>) -> Json<CalibrationStatus> {
    Json(state.store.status())
}

/// POST /api/calibration/default - Activate the builtin profile.
#[instrument(skip(state))]
pub async fn post_default_calibration(
    State(state): State<AppState>,
) -> ApiResult<Json<CalibrationProfile>> {
    let _guard = state.calibration_lock.lock().await;
    let profile = state.store.load_default(Utc::now());
    persist_active(&state, &profile).await?;
    Ok(Json((*profile).clone()))
}

/// POST /api/calibration/import - Activate a profile supplied as JSON.
///
/// ```json
/// {
///     "name": "Lab batch 7",
///     "colors": {
///         "fresh": [34, 139, 34],
///         "good": [144, 238, 144],
///         "warning": [139, 90, 43],
///         "expired": [178, 34, 34]
///     },
///     "days": { "fresh": { "min": 30, "max": 40 } }
/// }
/// ```
///
/// Imported profiles are always recorded as user profiles, whatever
/// `source` the document claims.
#[instrument(skip(state, document), fields(name = %document.name))]
pub async fn post_import_profile(
    State(state): State<AppState>,
    Json(mut document): Json<ProfileDocument>,
) -> ApiResult<Json<CalibrationProfile>> {
    document.source = ProfileSource::User;
    let profile = CalibrationProfile::try_from(document)?;

    let _guard = state.calibration_lock.lock().await;
    let profile = state.store.import_profile(profile);
    persist_active(&state, &profile).await?;
    Ok(Json((*profile).clone()))
}

/// GET /api/calibration/profiles - All retained profiles, newest first.
pub async fn get_profiles(State(state): State<AppState>) -> Json<Vec<ProfileSummary>> {
    Json(state.store.list_profiles())
}

/// POST /api/calibration/profiles/:id/activate - Re-activate a retained profile.
#[instrument(skip(state))]
pub async fn post_activate_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CalibrationProfile>> {
    let _guard = state.calibration_lock.lock().await;
    let profile = state
        .store
        .activate(id)
        .ok_or_else(|| ApiError::NotFound(format!("calibration profile {id}")))?;

    if !state.storage.set_active(id).await? {
        // Known in memory but never persisted; store it now.
        state.storage.save_profile(&profile, true).await?;
    }

    Ok(Json((*profile).clone()))
}

/// GET /api/history - Recent analyses, newest first.
///
/// # Query Parameters
///
/// - `limit` (optional): capped at the configured history limit
#[instrument(skip(state))]
pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let limit = query
        .limit
        .unwrap_or(state.history_limit)
        .min(state.history_limit);

    let history = state.storage.list_results(limit).await?;
    let total = state.storage.count_results().await?;

    Ok(Json(HistoryResponse { history, total }))
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

async fn persist_active(state: &AppState, profile: &CalibrationProfile) -> ApiResult<()> {
    state
        .storage
        .save_profile(profile, true)
        .await
        .inspect_err(|e| {
            warn!(
                profile = %profile.name(),
                error = %e,
                "Profile active in memory but not persisted"
            );
        })?;
    Ok(())
}
