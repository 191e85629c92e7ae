//! # mlserver common library
//!
//! Shared code for the mlserver intake services:
//! - Error and result types
//! - TOML bootstrap configuration
//! - Study metadata and path-safe study keys
//! - Artifact filesystem layout
//! - SQLite initialization for study records

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod layout;
pub mod study;

pub use error::{Error, Result};
pub use layout::ArtifactLayout;
pub use study::{StudyKey, StudyMetadata};
