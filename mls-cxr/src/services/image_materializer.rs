//! Input raster materialization
//!
//! Rescales a decoded pixel buffer to the full unsigned 16-bit range, using
//! the declared largest pixel value as the denominator, and stores it as a
//! grayscale PNG at `<root>/<key>.png`.

use crate::error::StudyError;
use crate::types::RawImage;
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma};
use mls_common::{ArtifactLayout, StudyKey};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 16-bit grayscale raster
pub type Raster16 = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Writes normalized input rasters under the artifact root
#[derive(Debug, Clone)]
pub struct ImageMaterializer {
    layout: ArtifactLayout,
}

impl ImageMaterializer {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self { layout }
    }

    /// Normalize `image` and write it as the input raster for `key`
    ///
    /// Encoding runs on the blocking pool. On error no file is left at the
    /// returned path.
    pub async fn materialize(&self, image: RawImage, key: &StudyKey) -> Result<PathBuf, StudyError> {
        let path = self.layout.input_png(key);
        let layout = self.layout.clone();
        let target = path.clone();

        tokio::task::spawn_blocking(move || -> Result<(), StudyError> {
            let raster = normalize(image)?;
            layout
                .ensure_root()
                .map_err(|e| StudyError::Materialization(format!("Output root not writable: {}", e)))?;
            write_png_atomic(&target, &DynamicImage::ImageLuma16(raster))
                .map_err(|e| StudyError::Materialization(e.to_string()))
        })
        .await
        .map_err(|e| StudyError::Materialization(format!("Materialization task failed: {}", e)))??;

        info!(study_key = %key, path = %path.display(), "PNG image stored");
        Ok(path)
    }
}

/// Rescale samples to `0..=65535` against the declared largest pixel value
///
/// Samples above the declared maximum saturate at 65535.
pub fn normalize(image: RawImage) -> Result<Raster16, StudyError> {
    let pixels = image
        .pixels
        .ok_or_else(|| StudyError::Materialization("Pixel buffer absent".to_string()))?;

    let max_value = match image.largest_pixel_value {
        None => {
            return Err(StudyError::Materialization(
                "Largest pixel value missing".to_string(),
            ))
        }
        Some(0) => {
            return Err(StudyError::Materialization(
                "Largest pixel value is zero".to_string(),
            ))
        }
        Some(value) => value as f64,
    };

    if pixels.rows == 0 || pixels.columns == 0 {
        return Err(StudyError::Materialization(format!(
            "Empty pixel buffer dimensions {}x{}",
            pixels.columns, pixels.rows
        )));
    }

    let expected = pixels.expected_len();
    if pixels.samples.len() != expected {
        return Err(StudyError::Materialization(format!(
            "Pixel buffer holds {} samples, expected {} ({}x{})",
            pixels.samples.len(),
            expected,
            pixels.columns,
            pixels.rows
        )));
    }

    // float-to-int `as` truncates toward zero and saturates at u16::MAX
    let data: Vec<u16> = pixels
        .samples
        .iter()
        .map(|&sample| (sample as f64 / max_value * 65535.0) as u16)
        .collect();

    ImageBuffer::from_raw(pixels.columns, pixels.rows, data).ok_or_else(|| {
        StudyError::Materialization("Pixel buffer does not fit declared dimensions".to_string())
    })
}

/// Encode `image` as PNG next to `path`, then rename into place
///
/// Readers never observe a partially written file.
pub(crate) fn write_png_atomic(path: &Path, image: &DynamicImage) -> Result<(), image::ImageError> {
    StagedPng::encode(path, image)?
        .commit()
        .map_err(image::ImageError::IoError)?;
    Ok(())
}

/// A fully encoded PNG waiting beside its final path
///
/// Dropping it without [`commit`](Self::commit) removes the temp file.
#[derive(Debug)]
pub(crate) struct StagedPng {
    temp_path: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedPng {
    pub(crate) fn encode(path: &Path, image: &DynamicImage) -> Result<Self, image::ImageError> {
        let staged = Self {
            temp_path: path.with_extension("png.partial"),
            target: path.to_path_buf(),
            committed: false,
        };
        image.save_with_format(&staged.temp_path, ImageFormat::Png)?;
        Ok(staged)
    }

    /// Rename into place, returning the final path
    pub(crate) fn commit(mut self) -> std::io::Result<PathBuf> {
        std::fs::rename(&self.temp_path, &self.target)?;
        self.committed = true;
        debug!(path = %self.target.display(), "PNG written");
        Ok(self.target.clone())
    }
}

impl Drop for StagedPng {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}
