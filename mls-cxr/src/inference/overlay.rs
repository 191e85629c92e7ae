//! Explanation overlay rendering
//!
//! Colors the activation map with a jet palette and blends it half and half
//! over the grayscale input.

use super::ExplanationMap;
use image::{DynamicImage, Rgb, RgbImage};

/// Blend `map` over `input`; both must have the same dimensions
pub fn render_overlay(input: &DynamicImage, map: &ExplanationMap) -> RgbImage {
    let base = input.to_luma8();

    RgbImage::from_fn(base.width(), base.height(), |x, y| {
        let gray = base.get_pixel(x, y).0[0] as f32;
        let heat = map.get_pixel(x, y).0[0];
        let heat = if heat.is_finite() { heat.clamp(0.0, 1.0) } else { 0.0 };
        let color = jet(heat);

        Rgb([
            blend(gray, color[0]),
            blend(gray, color[1]),
            blend(gray, color[2]),
        ])
    })
}

fn blend(gray: f32, color: f32) -> u8 {
    (0.5 * gray + 0.5 * color).round().clamp(0.0, 255.0) as u8
}

/// Jet colormap: blue → cyan → yellow → red, channels in `0.0..=255.0`
fn jet(v: f32) -> [f32; 3] {
    let channel = |center: f32| (1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0) * 255.0;
    [channel(3.0), channel(2.0), channel(1.0)]
}
