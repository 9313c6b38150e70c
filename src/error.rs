//! Error types for TTIScan.
//!
//! [`SensorError`] covers the four ways the calibration and classification
//! core can fail. They are all local, synchronous input problems: the core
//! never retries and never substitutes a default profile on its own.
//!
//! [`ApiError`] is the HTTP-facing wrapper that turns core and storage
//! failures into JSON error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::model::FreshnessState;

/// Failures of the calibration / classification core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    /// The image could not be decoded, is empty, or the sampling region
    /// falls outside it.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// A calibration region is degenerate or out of bounds.
    #[error("invalid calibration region #{index}: {reason}")]
    InvalidRegion { index: usize, reason: String },

    /// Calibration did not cover every freshness state.
    #[error("incomplete calibration: missing {}", format_states(.missing))]
    IncompleteCalibration { missing: Vec<FreshnessState> },

    /// No calibration profile is active.
    #[error("no calibration profile is active")]
    NoCalibration,
}

fn format_states(states: &[FreshnessState]) -> String {
    states
        .iter()
        .map(|s| s.label())
        .collect::<Vec<_>>()
        .join(", ")
}

impl SensorError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            SensorError::InvalidImage(_) => "invalid_image",
            SensorError::InvalidRegion { .. } => "invalid_region",
            SensorError::IncompleteCalibration { .. } => "incomplete_calibration",
            SensorError::NoCalibration => "no_calibration",
        }
    }
}

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

/// Error response body.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_index: Option<usize>,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Sensor(SensorError::NoCalibration) => StatusCode::CONFLICT,
            ApiError::Sensor(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Sensor(e) => e.code(),
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(e) = &self {
            tracing::error!(error = %e, "Request failed");
        }

        let region_index = match &self {
            ApiError::Sensor(SensorError::InvalidRegion { index, .. }) => Some(*index),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
                region_index,
            },
        };

        (self.status(), Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_message_lists_states() {
        let err = SensorError::IncompleteCalibration {
            missing: vec![FreshnessState::Good, FreshnessState::Warning],
        };
        assert_eq!(
            err.to_string(),
            "incomplete calibration: missing GOOD, WARNING"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(SensorError::NoCalibration).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(SensorError::InvalidImage("empty".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("disk")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
