//! Displacement mapping
//!
//! Builds a grayscale relief map from the garment photo and uses it to warp
//! the design so it follows fabric wrinkles and folds.

use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::filter::{box_filter, gaussian_blur_f32};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::round_half_up;

/// Gray level that produces no displacement
pub const NEUTRAL_GRAY: f64 = 128.0;

/// Largest meaningful strength magnitude: one gray level moves a full pixel
/// at 1.0, so anything beyond 255 only pushes every sample off the design
pub const MAX_STRENGTH: f64 = 255.0;

/// Smoothing applied to the relief map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlurKind {
    /// Gaussian with sigma equal to the radius, like a CSS `blur()` filter
    Gaussian,
    /// Box filter of the given radius
    Box,
}

impl Default for BlurKind {
    fn default() -> Self {
        BlurKind::Gaussian
    }
}

/// Grayscale relief map derived from a base garment image
///
/// The map always has the dimensions of the image it was built from.
/// Brighter pixels are raised or lit fabric, darker pixels are recessed.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplacementMap {
    luma: GrayImage,
    blur_radius: f32,
}

impl DisplacementMap {
    pub fn width(&self) -> u32 {
        self.luma.width()
    }

    pub fn height(&self) -> u32 {
        self.luma.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.luma.dimensions()
    }

    /// Blur radius the map was built with
    pub fn blur_radius(&self) -> f32 {
        self.blur_radius
    }

    /// Gray level at `(x, y)`, or `None` outside the map
    pub fn value_at(&self, x: i64, y: i64) -> Option<u8> {
        if x < 0 || y < 0 || x >= self.width() as i64 || y >= self.height() as i64 {
            return None;
        }
        Some(self.luma.get_pixel(x as u32, y as u32).0[0])
    }

    pub fn as_luma(&self) -> &GrayImage {
        &self.luma
    }

    /// RGBA view of the map, `(L, L, L, 255)` per pixel
    pub fn to_rgba(&self) -> RgbaImage {
        let (width, height) = self.dimensions();
        RgbaImage::from_fn(width, height, |x, y| {
            let Luma([l]) = *self.luma.get_pixel(x, y);
            Rgba([l, l, l, 255])
        })
    }
}

/// Perceptual luminance of an sRGB pixel, rounded to 8 bits
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    let l = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
    l.round().clamp(0.0, 255.0) as u8
}

/// Build the displacement map for `base`
///
/// A `blur_radius_px` of zero (or below) leaves the map unblurred.
pub fn build_displacement_map(base: &RgbaImage, blur_radius_px: f32, kind: BlurKind) -> DisplacementMap {
    let (width, height) = base.dimensions();
    let mut luma = GrayImage::new(width, height);

    let gray: &mut [u8] = &mut luma;
    gray.par_iter_mut()
        .zip(base.as_raw().par_chunks_exact(4))
        .for_each(|(out, px)| *out = luminance(px[0], px[1], px[2]));

    let blur_radius = if blur_radius_px.is_finite() { blur_radius_px.max(0.0) } else { 0.0 };
    let luma = if blur_radius > 0.0 && width > 0 && height > 0 {
        match kind {
            BlurKind::Gaussian => gaussian_blur_f32(&luma, blur_radius),
            BlurKind::Box => {
                let radius = blur_radius.round().max(1.0) as u32;
                box_filter(&luma, radius, radius)
            }
        }
    } else {
        luma
    };

    debug!(
        width = width,
        height = height,
        blur_radius = blur_radius,
        blur = ?kind,
        "Built displacement map"
    );

    DisplacementMap { luma, blur_radius }
}

/// Warp `design` by the displacement map
///
/// `origin` is the canvas position of the design's top-left pixel. Each
/// destination pixel samples the design at its own position shifted by
/// `round((gray - 128) * strength)` on both axes. When that sample falls
/// outside the design, or the map has no pixel under the destination, the
/// destination stays fully transparent.
pub fn warp_design(
    design: &RgbaImage,
    map: &DisplacementMap,
    origin: (i64, i64),
    strength: f64,
) -> RgbaImage {
    let (width, height) = design.dimensions();
    let mut output = RgbaImage::new(width, height);
    let row_len = width as usize * 4;
    if row_len == 0 {
        return output;
    }

    let (origin_x, origin_y) = origin;
    let strength = if strength.is_finite() { strength.clamp(-MAX_STRENGTH, MAX_STRENGTH) } else { 0.0 };
    let pixels: &mut [u8] = &mut output;

    // Process rows in parallel using Rayon
    pixels
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..width {
                let map_x = origin_x.saturating_add(x as i64);
                let map_y = origin_y.saturating_add(y as i64);
                let Some(gray) = map.value_at(map_x, map_y) else {
                    continue;
                };

                let offset = round_half_up((gray as f64 - NEUTRAL_GRAY) * strength);
                let src_x = (x as i64).saturating_add(offset);
                let src_y = (y as i64).saturating_add(offset);
                if src_x < 0 || src_y < 0 || src_x >= width as i64 || src_y >= height as i64 {
                    continue;
                }

                let i = x as usize * 4;
                row[i..i + 4].copy_from_slice(&design.get_pixel(src_x as u32, src_y as u32).0);
            }
        });

    output
}
