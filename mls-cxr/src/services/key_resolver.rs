//! Study key derivation and disambiguation
//!
//! A key is built from the identifying fields of a received object and then
//! suffixed with the first index `_1`, `_2`, … whose artifact names cannot
//! collide with anything already under the artifact root. Result rasters
//! extend a key by `_<severity>`, so while `p1_A_1` exists no key in
//! `p1_A_1_0..=p1_A_1_255` is handed out, and the other way round.

use mls_common::study::sanitize_segment;
use mls_common::layout::names_overlap;
use mls_common::{ArtifactLayout, StudyKey, StudyMetadata};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Base used when none of the identifying fields are present
pub const PLACEHOLDER_BASE: &str = "unknown";

/// Derives study keys from untrusted metadata
///
/// `resolve` is the plain existence probe. `reserve` additionally holds a
/// lock across the probe and remembers the chosen key until the returned
/// reservation is dropped, so concurrent intakes never pick the same index
/// while the first one is still writing its raster.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    layout: ArtifactLayout,
    reserved: Arc<Mutex<HashSet<StudyKey>>>,
}

impl KeyResolver {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self {
            layout,
            reserved: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Sanitized base name, before disambiguation
    ///
    /// `p<patient>` and the accession number (or, failing that, the study
    /// id) joined with `_`; [`PLACEHOLDER_BASE`] when all are absent.
    pub fn base_name(metadata: &StudyMetadata) -> String {
        let subject = metadata
            .patient_id()
            .map(|id| format!("p{}", sanitize_segment(id)));
        let study = metadata
            .accession_number()
            .or_else(|| metadata.study_id())
            .map(sanitize_segment);

        let parts: Vec<String> = [subject, study].into_iter().flatten().collect();
        if parts.is_empty() {
            PLACEHOLDER_BASE.to_string()
        } else {
            StudyKey::new(parts.join("_")).into_inner()
        }
    }

    /// First `base_N` whose artifacts would not collide with any on disk.
    /// Never fails.
    pub fn resolve(&self, metadata: &StudyMetadata) -> StudyKey {
        let base = Self::base_name(metadata);
        let stems = self.layout.artifact_stems();
        first_free(&base, |key| overlaps_any(key, &stems))
    }

    /// Like [`resolve`](Self::resolve), but also skips keys reserved by
    /// in-flight intakes and reserves the result until the guard drops.
    pub fn reserve(&self, metadata: &StudyMetadata) -> KeyReservation {
        let base = Self::base_name(metadata);

        let mut reserved = self.lock_reserved();
        let stems = self.layout.artifact_stems();
        let key = first_free(&base, |key| {
            overlaps_any(key, &stems)
                || reserved.iter().any(|held| names_overlap(held.as_str(), key.as_str()))
        });
        reserved.insert(key.clone());
        drop(reserved);

        debug!(study_key = %key, "Reserved study key");
        KeyReservation {
            key,
            reserved: Arc::clone(&self.reserved),
        }
    }

    /// Number of keys currently reserved by in-flight intakes
    pub fn reserved_count(&self) -> usize {
        self.lock_reserved().len()
    }

    fn lock_reserved(&self) -> MutexGuard<'_, HashSet<StudyKey>> {
        self.reserved.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn first_free(base: &str, taken: impl Fn(&StudyKey) -> bool) -> StudyKey {
    let mut index: u64 = 1;
    loop {
        let candidate = StudyKey::new(format!("{}_{}", base, index));
        if !taken(&candidate) {
            return candidate;
        }
        index += 1;
    }
}

fn overlaps_any(key: &StudyKey, stems: &[String]) -> bool {
    stems.iter().any(|stem| names_overlap(stem, key.as_str()))
}

/// A study key held back from other resolutions until dropped
#[derive(Debug)]
pub struct KeyReservation {
    key: StudyKey,
    reserved: Arc<Mutex<HashSet<StudyKey>>>,
}

impl KeyReservation {
    pub fn key(&self) -> &StudyKey {
        &self.key
    }
}

impl Drop for KeyReservation {
    fn drop(&mut self) {
        let mut reserved = self
            .reserved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        reserved.remove(&self.key);
    }
}
