//! mls-cxr library interface
//!
//! Chest radiograph intake: received objects are materialized as 16-bit
//! rasters, coalesced per study by the [`DelayedExecutor`], and processed
//! once their study has gone quiet.

pub mod api;
pub mod db;
pub mod error;
pub mod inference;
pub mod services;
pub mod types;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, StudyError};
pub use crate::services::{DelayedExecutor, EventDispatcher, StudyPipeline};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<EventDispatcher>,
    /// Application entity title announced to senders
    pub ae_title: String,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(dispatcher: Arc<EventDispatcher>, ae_title: impl Into<String>) -> Self {
        Self {
            dispatcher,
            ae_title: ae_title.into(),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::intake_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
