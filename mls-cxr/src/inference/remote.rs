//! HTTP inference client
//!
//! Sends the raster path to a model server sharing the artifact volume:
//! `POST <endpoint>/infer {"raster_path": …}`. The server answers with the
//! severity, the result raster as base64 PNG and an optional activation map.

use super::{ExplanationMap, InferenceModel, InferenceOutput};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{ImageBuffer, ImageFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("mls-cxr/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct InferRequest<'a> {
    raster_path: &'a str,
}

/// Model server response body
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InferResponse {
    pub severity: u8,
    /// Result raster, base64-encoded PNG
    pub result_png: String,
    #[serde(default)]
    pub explanation: Option<RemoteExplanation>,
}

/// Activation map as transferred: row-major values
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteExplanation {
    pub width: u32,
    pub height: u32,
    pub values: Vec<f32>,
}

/// Client for a remote model server
pub struct RemoteModel {
    http_client: reqwest::Client,
    infer_url: String,
}

impl RemoteModel {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build inference HTTP client")?;

        Ok(Self {
            http_client,
            infer_url: format!("{}/infer", endpoint.trim_end_matches('/')),
        })
    }

    pub fn infer_url(&self) -> &str {
        &self.infer_url
    }
}

#[async_trait]
impl InferenceModel for RemoteModel {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn infer(&self, raster: &Path) -> anyhow::Result<InferenceOutput> {
        let raster_path = raster.to_string_lossy();
        debug!(url = %self.infer_url, raster = %raster_path, "Requesting inference");

        let response = self
            .http_client
            .post(&self.infer_url)
            .json(&InferRequest {
                raster_path: &raster_path,
            })
            .send()
            .await
            .context("Inference request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Inference server returned {}: {}", status, body));
        }

        let body: InferResponse = response
            .json()
            .await
            .context("Malformed inference response")?;

        decode_response(body)
    }
}

/// Turn a wire response into an [`InferenceOutput`]
pub fn decode_response(body: InferResponse) -> anyhow::Result<InferenceOutput> {
    let png = BASE64
        .decode(body.result_png.as_bytes())
        .context("result_png is not valid base64")?;
    let result = image::load_from_memory_with_format(&png, ImageFormat::Png)
        .context("result_png is not a PNG image")?;

    let explanation = match body.explanation {
        None => None,
        Some(remote) => {
            let (width, height) = (remote.width, remote.height);
            let map: ExplanationMap = ImageBuffer::from_raw(width, height, remote.values)
                .ok_or_else(|| anyhow!("Explanation values do not fill {}x{}", width, height))?;
            Some(map)
        }
    };

    Ok(InferenceOutput {
        severity: body.severity,
        result,
        explanation,
    })
}
