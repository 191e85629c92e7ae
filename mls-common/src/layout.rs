//! Artifact filesystem layout
//!
//! All study artifacts live flat under one output root:
//! - `<root>/<key>.png` materialized input raster
//! - `<root>/<key>_<severity>.png` result raster
//! - `<root>/<key>_<severity>_gcam.png` explanation overlay

use crate::study::StudyKey;
use crate::Result;
use std::fmt::Display;
use std::path::{Path, PathBuf};

/// Resolves artifact paths under the output root
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the output root if missing (idempotent)
    pub fn ensure_root(&self) -> Result<&Path> {
        std::fs::create_dir_all(&self.root)?;
        Ok(&self.root)
    }

    /// Path of the materialized input raster
    pub fn input_png(&self, key: &StudyKey) -> PathBuf {
        self.root.join(format!("{}.png", key))
    }

    /// Path of the result raster for a computed severity
    pub fn result_png(&self, key: &StudyKey, severity: impl Display) -> PathBuf {
        self.root.join(format!("{}_{}.png", key, severity))
    }

    /// Path of the explanation overlay for a computed severity
    pub fn overlay_png(&self, key: &StudyKey, severity: impl Display) -> PathBuf {
        self.root.join(format!("{}_{}_gcam.png", key, severity))
    }

    /// Stems of every PNG under the root, including ones still being written
    ///
    /// A missing root yields an empty list.
    pub fn artifact_stems(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_suffix(".png.partial")
                    .or_else(|| name.strip_suffix(".png"))
                    .map(str::to_string)
            })
            .collect()
    }
}

/// Whether artifacts named after `a` and `b` can collide
///
/// Either name equals the other, or one is a result or overlay name of the
/// other (`<key>_<severity>` / `<key>_<severity>_gcam`).
pub fn names_overlap(a: &str, b: &str) -> bool {
    a == b || is_derived_name(a, b) || is_derived_name(b, a)
}

fn is_derived_name(name: &str, key: &str) -> bool {
    let Some(rest) = name.strip_prefix(key).and_then(|r| r.strip_prefix('_')) else {
        return false;
    };
    let severity = rest.strip_suffix("_gcam").unwrap_or(rest);
    severity
        .parse::<u8>()
        .is_ok_and(|value| value.to_string() == severity)
}
