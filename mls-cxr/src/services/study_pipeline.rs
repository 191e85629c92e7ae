//! Per-study processing, run once a study has gone quiet
//!
//! Reads the materialized input raster, runs inference, writes the result
//! and overlay rasters and, when a store is configured, persists the study
//! record. Failures are contained per study: one failing study never affects
//! another key.

use crate::db::{StudyRecord, StudyStore};
use crate::error::{status, StudyError};
use crate::inference::{render_overlay, InferenceModel, InferenceOutput};
use crate::services::image_materializer::StagedPng;
use crate::utils::{guarded, timed};
use chrono::Utc;
use image::{DynamicImage, GenericImageView};
use mls_common::{ArtifactLayout, StudyKey, StudyMetadata};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Artifacts produced for one processed study
#[derive(Debug, Clone, PartialEq)]
pub struct StudyOutcome {
    pub study_key: StudyKey,
    pub severity: u8,
    pub result_path: PathBuf,
    pub overlay_path: Option<PathBuf>,
    /// Whether a study record was written
    pub persisted: bool,
}

/// Inference and artifact writing for quiet studies
pub struct StudyPipeline {
    layout: ArtifactLayout,
    model: Arc<dyn InferenceModel>,
    store: Option<Arc<dyn StudyStore>>,
}

impl StudyPipeline {
    pub fn new(layout: ArtifactLayout, model: Arc<dyn InferenceModel>) -> Self {
        Self {
            layout,
            model,
            store: None,
        }
    }

    /// Persist a record for every processed study into `store`
    pub fn with_store(mut self, store: Arc<dyn StudyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Process the study stored under `key`
    pub async fn process(
        &self,
        key: &StudyKey,
        metadata: &StudyMetadata,
    ) -> Result<StudyOutcome, StudyError> {
        let input_path = self.layout.input_png(key);
        let exists = tokio::fs::try_exists(&input_path)
            .await
            .map_err(|e| StudyError::Materialization(e.to_string()))?;
        if !exists {
            return Err(StudyError::Materialization(format!(
                "Input raster missing: {}",
                input_path.display()
            )));
        }

        let output = self
            .model
            .infer(&input_path)
            .await
            .map_err(|e| StudyError::Inference(format!("{} model: {:#}", self.model.name(), e)))?;
        let severity = output.severity;
        info!(study_key = %key, severity, "Study {} has severity {}", key, severity);

        let result_path = self.layout.result_png(key, severity);
        let overlay_path = output
            .explanation
            .is_some()
            .then(|| self.layout.overlay_png(key, severity));

        let artifacts = Artifacts {
            input_path,
            result_path: result_path.clone(),
            overlay_path: overlay_path.clone(),
        };
        tokio::task::spawn_blocking(move || artifacts.write(output))
            .await
            .map_err(|e| StudyError::Materialization(format!("Artifact task failed: {}", e)))??;

        let persisted = match &self.store {
            Some(store) => {
                let record = StudyRecord {
                    study_key: key.clone(),
                    metadata: metadata.clone(),
                    severity,
                    result_path: result_path.display().to_string(),
                    overlay_path: overlay_path.as_ref().map(|p| p.display().to_string()),
                    updated_at: Utc::now(),
                };
                store.persist(&record).await?;
                true
            }
            None => false,
        };

        Ok(StudyOutcome {
            study_key: key.clone(),
            severity,
            result_path,
            overlay_path,
            persisted,
        })
    }

    /// Boundary entry point used as the scheduler callback
    ///
    /// Never fails: errors and panics are logged and returned as a status
    /// code.
    pub async fn run(&self, key: StudyKey, metadata: StudyMetadata) -> u16 {
        let name = format!("process {}", key);
        let result = guarded(
            &name,
            status::PROCESS_FAILED,
            timed(&name, self.process(&key, &metadata)),
        )
        .await;

        match result {
            Ok(outcome) => {
                info!(
                    study_key = %outcome.study_key,
                    severity = outcome.severity,
                    overlay = outcome.overlay_path.is_some(),
                    persisted = outcome.persisted,
                    "Study processed"
                );
                status::SUCCESS
            }
            Err(code) => code,
        }
    }
}

/// Output paths of one study, written on the blocking pool
struct Artifacts {
    input_path: PathBuf,
    result_path: PathBuf,
    overlay_path: Option<PathBuf>,
}

impl Artifacts {
    /// Validate the model output, then write result and overlay
    ///
    /// Both rasters are encoded before either is renamed into place.
    /// Nothing is left behind when the output is malformed or a write
    /// fails.
    fn write(self, output: InferenceOutput) -> Result<(), StudyError> {
        let (width, height) = output.result.dimensions();
        if width == 0 || height == 0 {
            return Err(StudyError::Inference("Result raster is empty".to_string()));
        }

        let overlay = match (&output.explanation, &self.overlay_path) {
            (Some(map), Some(path)) => {
                let input = image::open(&self.input_path).map_err(|e| {
                    StudyError::Materialization(format!("Cannot read input raster: {}", e))
                })?;
                if map.dimensions() != input.dimensions() {
                    return Err(StudyError::Inference(format!(
                        "Explanation map is {}x{}, input raster is {}x{}",
                        map.width(),
                        map.height(),
                        input.width(),
                        input.height()
                    )));
                }
                Some((DynamicImage::ImageRgb8(render_overlay(&input, map)), path))
            }
            _ => None,
        };

        let staged_result = StagedPng::encode(&self.result_path, &output.result)
            .map_err(|e| StudyError::Materialization(format!("Cannot write result raster: {}", e)))?;
        let staged_overlay = match overlay {
            Some((image, path)) => Some(StagedPng::encode(path, &image).map_err(|e| {
                StudyError::Materialization(format!("Cannot write overlay: {}", e))
            })?),
            None => None,
        };

        // the result raster goes in last, so a failed study never leaves one
        let overlay_path = match staged_overlay {
            Some(staged) => Some(staged.commit().map_err(|e| {
                StudyError::Materialization(format!("Cannot write overlay: {}", e))
            })?),
            None => None,
        };
        if let Err(e) = staged_result.commit() {
            if let Some(path) = overlay_path {
                let _ = std::fs::remove_file(path);
            }
            return Err(StudyError::Materialization(format!(
                "Cannot write result raster: {}",
                e
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{ExplanationMap, PseudoModel};
    use async_trait::async_trait;
    use image::{ImageBuffer, Luma};
    use std::path::Path;
    use tempfile::TempDir;

    /// Returns a fixed output regardless of input
    struct FixedModel {
        output: InferenceOutput,
    }

    #[async_trait]
    impl InferenceModel for FixedModel {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn infer(&self, _raster: &Path) -> anyhow::Result<InferenceOutput> {
            Ok(self.output.clone())
        }
    }

    fn write_input(layout: &ArtifactLayout, key: &StudyKey, width: u32, height: u32) {
        let raster: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(width, height, |x, _| Luma([(x * 1000) as u16]));
        DynamicImage::ImageLuma16(raster)
            .save(layout.input_png(key))
            .unwrap();
    }

    fn count_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn pseudo_model_writes_result_and_overlay() {
        let temp_dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(temp_dir.path());
        let key = StudyKey::new("p1_A1_1");
        write_input(&layout, &key, 4, 3);

        let pipeline = StudyPipeline::new(layout.clone(), Arc::new(PseudoModel::new()));
        let outcome = pipeline.process(&key, &StudyMetadata::default()).await.unwrap();

        assert_eq!(outcome.result_path, layout.result_png(&key, outcome.severity));
        assert!(outcome.result_path.exists());
        let overlay = outcome.overlay_path.expect("pseudo model explains");
        assert!(overlay.exists());
        assert!(overlay.to_string_lossy().ends_with("_gcam.png"));
        assert!(!outcome.persisted);
    }

    #[tokio::test]
    async fn missing_input_is_a_materialization_error() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = StudyPipeline::new(
            ArtifactLayout::new(temp_dir.path()),
            Arc::new(PseudoModel::new()),
        );

        let result = pipeline
            .process(&StudyKey::new("absent_1"), &StudyMetadata::default())
            .await;
        assert!(matches!(result, Err(StudyError::Materialization(_))));
    }

    #[tokio::test]
    async fn mismatched_explanation_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(temp_dir.path());
        let key = StudyKey::new("k_1");
        write_input(&layout, &key, 4, 4);

        let map: ExplanationMap = ImageBuffer::from_pixel(2, 2, Luma([0.5]));
        let model = FixedModel {
            output: InferenceOutput {
                severity: 1,
                result: DynamicImage::ImageLuma8(ImageBuffer::from_pixel(4, 4, Luma([1u8]))),
                explanation: Some(map),
            },
        };
        let pipeline = StudyPipeline::new(layout.clone(), Arc::new(model));

        let result = pipeline.process(&key, &StudyMetadata::default()).await;

        assert!(matches!(result, Err(StudyError::Inference(_))));
        assert_eq!(count_files(temp_dir.path()), 1);
    }

    #[tokio::test]
    async fn empty_result_raster_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(temp_dir.path());
        let key = StudyKey::new("k_1");
        write_input(&layout, &key, 2, 2);

        let model = FixedModel {
            output: InferenceOutput {
                severity: 0,
                result: DynamicImage::new_luma8(0, 0),
                explanation: None,
            },
        };
        let pipeline = StudyPipeline::new(layout, Arc::new(model));

        let code = pipeline.run(key, StudyMetadata::default()).await;
        assert_eq!(code, status::PROCESS_FAILED);
        assert_eq!(count_files(temp_dir.path()), 1);
    }

    #[tokio::test]
    async fn result_without_explanation_has_no_overlay() {
        let temp_dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(temp_dir.path());
        let key = StudyKey::new("k_1");
        write_input(&layout, &key, 2, 2);

        let model = FixedModel {
            output: InferenceOutput {
                severity: 2,
                result: DynamicImage::new_luma8(2, 2),
                explanation: None,
            },
        };
        let pipeline = StudyPipeline::new(layout.clone(), Arc::new(model));

        let code = pipeline.run(key.clone(), StudyMetadata::default()).await;

        assert_eq!(code, status::SUCCESS);
        assert!(layout.result_png(&key, 2).exists());
        assert!(!layout.overlay_png(&key, 2).exists());
    }

    #[tokio::test]
    async fn failed_overlay_write_leaves_no_result() {
        let temp_dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(temp_dir.path());
        let key = StudyKey::new("k_1");
        write_input(&layout, &key, 2, 2);

        // a non-empty directory cannot be replaced by a rename
        let blocked = layout.overlay_png(&key, 0);
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("occupied"), b"x").unwrap();

        let model = FixedModel {
            output: InferenceOutput {
                severity: 0,
                result: DynamicImage::new_luma8(2, 2),
                explanation: Some(ImageBuffer::from_pixel(2, 2, Luma([0.0]))),
            },
        };
        let pipeline = StudyPipeline::new(layout.clone(), Arc::new(model));

        let code = pipeline.run(key.clone(), StudyMetadata::default()).await;

        assert_eq!(code, status::STORE_FAILED);
        assert!(!layout.result_png(&key, 0).exists());
        assert!(!layout.result_png(&key, 0).with_extension("png.partial").exists());
        assert!(!blocked.with_extension("png.partial").exists());
    }
}
