//! Built-in stand-in model
//!
//! Grades a study from the mean normalized intensity of its input raster.
//! Deterministic, so deployments without a model server still exercise the
//! whole pipeline.

use super::{ExplanationMap, InferenceModel, InferenceOutput};
use anyhow::Context;
use async_trait::async_trait;
use image::ImageBuffer;
use std::path::Path;

/// Highest grade the pseudo model emits
pub const MAX_SEVERITY: u8 = 3;

#[derive(Debug, Clone, Default)]
pub struct PseudoModel;

impl PseudoModel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InferenceModel for PseudoModel {
    fn name(&self) -> &'static str {
        "pseudo"
    }

    async fn infer(&self, raster: &Path) -> anyhow::Result<InferenceOutput> {
        let path = raster.to_path_buf();
        tokio::task::spawn_blocking(move || grade(&path))
            .await
            .context("Pseudo model task failed")?
    }
}

fn grade(path: &Path) -> anyhow::Result<InferenceOutput> {
    let input = image::open(path)
        .with_context(|| format!("Failed to read input raster {}", path.display()))?;
    let gray = input.to_luma16();
    let (width, height) = gray.dimensions();
    anyhow::ensure!(width > 0 && height > 0, "Input raster {} is empty", path.display());

    let activations: Vec<f32> = gray
        .pixels()
        .map(|p| p.0[0] as f32 / u16::MAX as f32)
        .collect();
    let mean = activations.iter().map(|&v| v as f64).sum::<f64>() / activations.len() as f64;
    let severity = ((mean * (MAX_SEVERITY as f64 + 1.0)) as u8).min(MAX_SEVERITY);

    let explanation: ExplanationMap = ImageBuffer::from_raw(width, height, activations)
        .context("Explanation map does not fit raster dimensions")?;

    Ok(InferenceOutput {
        severity,
        result: input,
        explanation: Some(explanation),
    })
}
