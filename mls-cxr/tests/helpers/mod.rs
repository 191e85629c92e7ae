//! Shared utilities for mls-cxr integration tests

#![allow(dead_code)]

pub mod log_capture;

use mls_common::{ArtifactLayout, StudyMetadata};
use mls_cxr::inference::{InferenceModel, PseudoModel};
use mls_cxr::services::{
    DelayedExecutor, EventDispatcher, ExecutorConfig, ImageMaterializer, KeyResolver,
    StudyPipeline,
};
use mls_cxr::types::{PixelBuffer, RawImage, ReceivedObject};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use log_capture::{capture_logs, LogCapture};

/// Dispatcher over `root` with a running scheduler
pub fn running_dispatcher(
    root: &Path,
    delay: Duration,
    model: Arc<dyn InferenceModel>,
) -> Arc<EventDispatcher> {
    let layout = ArtifactLayout::new(root);
    let executor = Arc::new(DelayedExecutor::new(ExecutorConfig::new(
        delay,
        Duration::from_millis(10),
    )));
    executor.start();

    Arc::new(EventDispatcher::new(
        KeyResolver::new(layout.clone()),
        ImageMaterializer::new(layout.clone()),
        executor,
        Arc::new(StudyPipeline::new(layout, model)),
    ))
}

pub fn pseudo_model() -> Arc<dyn InferenceModel> {
    Arc::new(PseudoModel::new())
}

/// A 4x4 object for `patient` / `accession`
pub fn chest_object(patient: &str, accession: &str) -> ReceivedObject {
    ReceivedObject {
        metadata: StudyMetadata {
            patient_id: Some(patient.to_string()),
            accession_number: Some(accession.to_string()),
            ..Default::default()
        },
        image: RawImage {
            pixels: Some(PixelBuffer::new(4, 4, (0..16).map(|v| v * 256).collect())),
            largest_pixel_value: Some(4095),
        },
    }
}

/// Poll `condition` until it holds, panicking after `timeout`
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "Condition not met within {:?}", timeout);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// File names under `dir` starting with `prefix`, sorted
pub fn files_with_prefix(dir: &Path, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(prefix))
        .collect();
    names.sort();
    names
}
