//! Inference backends
//!
//! The model is an external collaborator: given the path of a materialized
//! input raster it returns a severity grade, a result raster and optionally
//! an explanation map. The pipeline never looks inside it.

pub mod overlay;
pub mod pseudo;
pub mod remote;

pub use overlay::render_overlay;
pub use pseudo::PseudoModel;
pub use remote::RemoteModel;

use async_trait::async_trait;
use image::{DynamicImage, ImageBuffer, Luma};
use mls_common::config::InferenceConfig;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Per-pixel activation in `0.0..=1.0`, same size as the input raster
pub type ExplanationMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Output of one inference call
#[derive(Debug, Clone)]
pub struct InferenceOutput {
    /// Condition grade computed for the study
    pub severity: u8,
    /// Result raster written as `<key>_<severity>.png`
    pub result: DynamicImage,
    /// Activation map rendered as `<key>_<severity>_gcam.png`
    pub explanation: Option<ExplanationMap>,
}

/// Inference capability consumed by the study pipeline
#[async_trait]
pub trait InferenceModel: Send + Sync {
    /// Backend identifier for logs
    fn name(&self) -> &'static str;

    /// Run the model on the raster stored at `raster`
    async fn infer(&self, raster: &Path) -> anyhow::Result<InferenceOutput>;
}

/// Select the backend from configuration
///
/// A configured endpoint selects [`RemoteModel`]; otherwise the built-in
/// [`PseudoModel`] is used.
pub fn build_model(config: &InferenceConfig) -> anyhow::Result<Arc<dyn InferenceModel>> {
    match &config.endpoint {
        Some(endpoint) => {
            let model = RemoteModel::new(endpoint, Duration::from_secs(config.timeout_secs))?;
            info!("Inference backend: remote ({})", endpoint);
            Ok(Arc::new(model))
        }
        None => {
            info!("Inference backend: pseudo model");
            Ok(Arc::new(PseudoModel::new()))
        }
    }
}
