//! Object intake endpoints
//!
//! - `POST /store` accepts one object: metadata plus an optional pixel
//!   payload (`data` is base64 of little-endian 16-bit samples)
//! - `POST /echo` answers a liveness check
//! - `GET /pending` lists studies waiting for their quiet period

use crate::error::status;
use crate::services::StoreReply;
use crate::types::{PixelBuffer, RawImage, ReceivedObject};
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use mls_common::{StudyKey, StudyMetadata};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};
use uuid::Uuid;

/// POST /store request body
#[derive(Debug, Deserialize)]
pub struct StoreRequest {
    #[serde(default)]
    pub metadata: StudyMetadata,
    #[serde(default)]
    pub pixels: Option<PixelPayload>,
    #[serde(default)]
    pub largest_pixel_value: Option<u32>,
}

/// Pixel payload as transferred
#[derive(Debug, Deserialize)]
pub struct PixelPayload {
    pub rows: u32,
    pub columns: u32,
    /// Base64 of little-endian u16 samples, row-major
    pub data: String,
}

impl PixelPayload {
    /// Decode into a sample buffer
    ///
    /// Only the encoding is checked here; whether the samples fill the
    /// declared dimensions is the materializer's concern.
    pub fn decode(self) -> Result<PixelBuffer, String> {
        let bytes = BASE64
            .decode(self.data.as_bytes())
            .map_err(|e| format!("Pixel data is not valid base64: {}", e))?;
        if bytes.len() % 2 != 0 {
            return Err(format!(
                "Pixel data holds {} bytes, expected 16-bit samples",
                bytes.len()
            ));
        }

        let samples = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(PixelBuffer::new(self.rows, self.columns, samples))
    }
}

/// POST /echo response body
#[derive(Debug, Serialize)]
pub struct EchoResponse {
    pub status: u16,
    pub ae_title: String,
}

/// One entry of GET /pending
#[derive(Debug, Serialize)]
pub struct PendingStudy {
    pub study_key: StudyKey,
    pub idle_seconds: f64,
}

/// GET /pending response body
#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub count: usize,
    pub studies: Vec<PendingStudy>,
}

/// POST /store
///
/// **Errors:**
/// - 400 Bad Request: undecodable pixel payload
/// - 500 Internal Server Error: the dispatcher refused the object (body
///   carries the transport status code)
pub async fn store(
    State(state): State<AppState>,
    Json(request): Json<StoreRequest>,
) -> ApiResult<Json<StoreReply>> {
    let pixels = request
        .pixels
        .map(PixelPayload::decode)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let object = ReceivedObject {
        metadata: request.metadata,
        image: RawImage {
            pixels,
            largest_pixel_value: request.largest_pixel_value,
        },
    };

    let event_id = Uuid::new_v4();
    let reply = state
        .dispatcher
        .handle_store(object)
        .instrument(info_span!("store", %event_id))
        .await;

    if reply.status != status::SUCCESS {
        return Err(ApiError::Intake {
            status: reply.status,
            message: format!("Object refused (event {})", event_id),
        });
    }

    Ok(Json(reply))
}

/// POST /echo
pub async fn echo(State(state): State<AppState>) -> ApiResult<Json<EchoResponse>> {
    let code = state.dispatcher.handle_echo().await;
    if code != status::SUCCESS {
        return Err(ApiError::Intake {
            status: code,
            message: "Echo failed".to_string(),
        });
    }

    Ok(Json(EchoResponse {
        status: code,
        ae_title: state.ae_title.to_string(),
    }))
}

/// GET /pending
pub async fn pending(State(state): State<AppState>) -> Json<PendingResponse> {
    let mut studies: Vec<PendingStudy> = state
        .dispatcher
        .executor()
        .pending_keys()
        .into_iter()
        .map(|(study_key, idle)| PendingStudy {
            study_key,
            idle_seconds: idle.as_secs_f64(),
        })
        .collect();
    studies.sort_by(|a, b| a.study_key.as_str().cmp(b.study_key.as_str()));

    Json(PendingResponse {
        count: studies.len(),
        studies,
    })
}

/// Build intake routes
pub fn intake_routes() -> Router<AppState> {
    Router::new()
        .route("/store", post(store))
        .route("/echo", post(echo))
        .route("/pending", get(pending))
}
