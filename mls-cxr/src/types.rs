//! Received object types handed over by the transport layer
//!
//! The transport library negotiates the association and decodes pixel data;
//! what reaches the intake is the parsed metadata plus a plain sample buffer.

use mls_common::StudyMetadata;

/// Decoded grayscale pixel buffer, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub rows: u32,
    pub columns: u32,
    pub samples: Vec<u16>,
}

impl PixelBuffer {
    pub fn new(rows: u32, columns: u32, samples: Vec<u16>) -> Self {
        Self {
            rows,
            columns,
            samples,
        }
    }

    /// Number of samples implied by the declared dimensions
    pub fn expected_len(&self) -> usize {
        self.rows as usize * self.columns as usize
    }
}

/// Pixel payload of a received object, exactly as declared by the sender
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawImage {
    pub pixels: Option<PixelBuffer>,
    /// Declared largest pixel value, used as the normalization denominator
    pub largest_pixel_value: Option<u32>,
}

/// One object delivered by an "object received" event
#[derive(Debug, Clone, Default)]
pub struct ReceivedObject {
    pub metadata: StudyMetadata,
    pub image: RawImage,
}
