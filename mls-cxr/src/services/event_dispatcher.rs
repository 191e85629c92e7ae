//! Transport event handlers
//!
//! The accept path for received objects: resolve a key, materialize the
//! input raster and (re)schedule the study. Processing happens later, on
//! the scheduler's own tasks, so the sender is answered as soon as the
//! raster is on disk.

use crate::error::{status, StudyError};
use crate::services::{DelayedExecutor, ImageMaterializer, KeyResolver, StudyPipeline};
use crate::types::ReceivedObject;
use crate::utils::{guarded, timed};
use mls_common::StudyKey;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Answer to an "object received" event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreReply {
    /// Transport status code, `0x0000` on success
    pub status: u16,
    /// Key the object was stored under, absent on failure
    pub study_key: Option<StudyKey>,
}

/// Routes transport events to the study services
pub struct EventDispatcher {
    resolver: KeyResolver,
    materializer: ImageMaterializer,
    executor: Arc<DelayedExecutor<StudyKey>>,
    pipeline: Arc<StudyPipeline>,
}

impl EventDispatcher {
    pub fn new(
        resolver: KeyResolver,
        materializer: ImageMaterializer,
        executor: Arc<DelayedExecutor<StudyKey>>,
        pipeline: Arc<StudyPipeline>,
    ) -> Self {
        Self {
            resolver,
            materializer,
            executor,
            pipeline,
        }
    }

    pub fn executor(&self) -> &Arc<DelayedExecutor<StudyKey>> {
        &self.executor
    }

    /// Handle one received object
    ///
    /// Never panics: any failure is logged and returned as a status code.
    pub async fn handle_store(&self, object: ReceivedObject) -> StoreReply {
        let result = guarded(
            "c_store",
            status::STORE_FAILED,
            timed("c_store", self.accept(object)),
        )
        .await;

        match result {
            Ok(key) => StoreReply {
                status: status::SUCCESS,
                study_key: Some(key),
            },
            Err(code) => StoreReply {
                status: code,
                study_key: None,
            },
        }
    }

    /// Handle a liveness check
    pub async fn handle_echo(&self) -> u16 {
        let result = guarded(
            "c_echo",
            status::ECHO_FAILED,
            timed("c_echo", async {
                debug!("Echo received");
                Ok::<_, StudyError>(())
            }),
        )
        .await;

        match result {
            Ok(()) => status::SUCCESS,
            Err(code) => code,
        }
    }

    async fn accept(&self, object: ReceivedObject) -> Result<StudyKey, StudyError> {
        let ReceivedObject { metadata, image } = object;

        let reservation = self.resolver.reserve(&metadata);
        let key = reservation.key().clone();
        info!(
            study_key = %key,
            patient_id = metadata.patient_id().unwrap_or(""),
            accession_number = metadata.accession_number().unwrap_or(""),
            "Object received"
        );

        self.materializer.materialize(image, &key).await?;
        // the raster now exists on disk, so later probes skip this key
        drop(reservation);

        let pipeline = Arc::clone(&self.pipeline);
        let scheduled_key = key.clone();
        self.executor.touch(key.clone(), move || async move {
            pipeline.run(scheduled_key, metadata).await;
        });

        Ok(key)
    }
}
