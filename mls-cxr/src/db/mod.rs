//! Study record persistence
//!
//! The store is optional: without it the pipeline still writes its raster
//! artifacts and only skips the record.

pub mod studies;

pub use studies::{SqliteStudyStore, StudyRecord, StudyStore};
