//! Error types for mls-cxr
//!
//! Two reporting channels exist and never mix: the synchronous intake path
//! answers the sender with a transport status code, while the asynchronous
//! study pipeline only logs its failures with a distinguishing code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Transport-level status codes returned by the intake handlers
pub mod status {
    /// Object accepted / liveness confirmed
    pub const SUCCESS: u16 = 0x0000;
    /// Object could not be accepted (materialization failed)
    pub const STORE_FAILED: u16 = 0xA700;
    /// Liveness handler failed
    pub const ECHO_FAILED: u16 = 0xA701;
    /// No usable study key could be derived
    pub const RESOLUTION_FAILED: u16 = 0xA702;
    /// Persisting the study record failed
    pub const PERSIST_FAILED: u16 = 0xC2FE;
    /// Study processing (inference) failed
    pub const PROCESS_FAILED: u16 = 0xC2FF;
}

/// Failures of the study intake and processing path
#[derive(Debug, Error)]
pub enum StudyError {
    /// No usable key could be derived. The placeholder fallback means this is
    /// never produced by the resolver today.
    #[error("Key resolution failed: {0}")]
    Resolution(String),

    /// Missing or invalid pixel data, or the raster could not be written/read
    #[error("Materialization failed: {0}")]
    Materialization(String),

    /// The inference backend failed or returned malformed output
    #[error("Inference failed: {0}")]
    Inference(String),

    /// The study record store was unreachable or rejected the write
    #[error("Persistence failed: {0}")]
    Persistence(String),
}

impl StudyError {
    /// Numeric code logged with (and returned for) this failure
    pub fn code(&self) -> u16 {
        match self {
            StudyError::Resolution(_) => status::RESOLUTION_FAILED,
            StudyError::Materialization(_) => status::STORE_FAILED,
            StudyError::Inference(_) => status::PROCESS_FAILED,
            StudyError::Persistence(_) => status::PERSIST_FAILED,
        }
    }

    /// Short category name used in structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            StudyError::Resolution(_) => "ResolutionError",
            StudyError::Materialization(_) => "MaterializationError",
            StudyError::Inference(_) => "InferenceError",
            StudyError::Persistence(_) => "PersistenceError",
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// The dispatcher rejected the object (500, carries the transport status)
    #[error("Intake failed with status {status:#06X}: {message}")]
    Intake { status: u16, message: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (http_status, error_code, status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", None, msg),
            ApiError::Intake { status, message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTAKE_FAILED",
                Some(status),
                message,
            ),
        };

        let body = Json(json!({
            "status": status,
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (http_status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
