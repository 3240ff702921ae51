//! Image compositing pipeline
//!
//! Combines the garment photo, an optional recolor, the displaced design and
//! an optional shadow layer into the final preview frame.

use std::time::Instant;

use image::{imageops, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::{BlendMode, Color, DesignPlacement, PlacementError, PlacementRect};
use super::blend::{draw_layer, fill, mask_by_alpha};
use super::displacement::{warp_design, DisplacementMap};

/// Default displacement strength (pixels per gray level away from 128)
pub const DEFAULT_STRENGTH: f64 = 0.15;

/// Default design opacity
pub const DEFAULT_OPACITY: f32 = 0.95;

/// Compositing errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ComposeError {
    #[error("Displacement map is {actual:?} but base image is {expected:?}")]
    DisplacementMapUnavailable {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("Invalid placement: {0}")]
    InvalidPlacement(#[from] PlacementError),
}

/// Blend settings for the recolor and design layers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerStyle {
    pub color_blend: BlendMode,
    pub design_blend: BlendMode,
    pub opacity: f32,
}

impl Default for LayerStyle {
    fn default() -> Self {
        LayerStyle {
            color_blend: BlendMode::SourceOver,
            design_blend: BlendMode::SourceOver,
            opacity: DEFAULT_OPACITY,
        }
    }
}

/// Everything a single composite depends on
#[derive(Debug, Clone, Copy)]
pub struct CompositeInputs<'a> {
    pub base: &'a RgbaImage,
    pub displacement_map: &'a DisplacementMap,
    pub design: Option<&'a RgbaImage>,
    pub color: Option<Color>,
    pub shadow: Option<&'a RgbaImage>,
    pub placement: DesignPlacement,
    pub strength: f64,
    pub style: LayerStyle,
}

/// A rendered preview
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeFrame {
    image: RgbaImage,
    design_rect: Option<PlacementRect>,
}

impl CompositeFrame {
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Where the design layer was drawn, if one was
    pub fn design_rect(&self) -> Option<PlacementRect> {
        self.design_rect
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

/// Image compositor for garment previews
#[derive(Debug, Clone)]
pub struct Compositor {
    resample: imageops::FilterType,
}

impl Compositor {
    /// Create a compositor that resamples designs bilinearly
    pub fn new() -> Self {
        Compositor {
            resample: imageops::FilterType::Triangle,
        }
    }

    /// Use a different filter when scaling the design into place
    pub fn with_filter(resample: imageops::FilterType) -> Self {
        Compositor { resample }
    }

    /// Render a frame
    ///
    /// Deterministic: identical inputs give pixel-identical frames. Only
    /// a map that does not belong to `base` or an invalid placement is an
    /// error; every optional input may be absent.
    pub fn compose(&self, inputs: &CompositeInputs<'_>) -> Result<CompositeFrame, ComposeError> {
        let start = Instant::now();
        let base = inputs.base;
        let dimensions = base.dimensions();

        if inputs.displacement_map.dimensions() != dimensions {
            return Err(ComposeError::DisplacementMapUnavailable {
                expected: dimensions,
                actual: inputs.displacement_map.dimensions(),
            });
        }
        inputs.placement.validate()?;

        // 1. Garment layer
        let mut layer = self.garment_layer(base, inputs.color, inputs.style.color_blend);

        // 2. Design layer
        let design_rect = match inputs.design {
            Some(design) => self.draw_design(&mut layer, design, inputs),
            None => None,
        };

        // 3. Shadow layer
        if let Some(shadow) = inputs.shadow {
            draw_layer(&mut layer, shadow, 0, 0, BlendMode::Multiply, 1.0);
        }

        debug!(
            width = dimensions.0,
            height = dimensions.1,
            has_color = inputs.color.is_some(),
            design_rect = ?design_rect,
            has_shadow = inputs.shadow.is_some(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Composite complete"
        );

        Ok(CompositeFrame {
            image: layer,
            design_rect,
        })
    }

    /// Base texture, recolored and masked to the garment silhouette
    fn garment_layer(&self, base: &RgbaImage, color: Option<Color>, mode: BlendMode) -> RgbaImage {
        let mut layer = base.clone();
        if let Some(color) = color {
            fill(&mut layer, color.to_rgba(), mode);
            mask_by_alpha(&mut layer, base);
        }
        layer
    }

    /// Scale, warp and draw the design; returns the rectangle it occupies
    fn draw_design(
        &self,
        layer: &mut RgbaImage,
        design: &RgbaImage,
        inputs: &CompositeInputs<'_>,
    ) -> Option<PlacementRect> {
        let rect = inputs.placement.get_rect(layer.dimensions(), design.dimensions());
        if rect.is_empty() {
            debug!(rect = ?rect, "Design rectangle is empty, skipping design layer");
            return None;
        }

        let scaled = if design.dimensions() == (rect.width, rect.height) {
            design.clone()
        } else {
            imageops::resize(design, rect.width, rect.height, self.resample)
        };

        let warped = warp_design(&scaled, inputs.displacement_map, (rect.x, rect.y), inputs.strength);
        draw_layer(
            layer,
            &warped,
            rect.x,
            rect.y,
            inputs.style.design_blend,
            inputs.style.opacity,
        );

        Some(rect)
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::displacement::{build_displacement_map, BlurKind};
    use image::Rgba;

    fn photo(width: u32, height: u32) -> RgbaImage {
        // Opaque garment in the middle, transparent border
        RgbaImage::from_fn(width, height, |x, y| {
            let inside = x >= width / 5 && x < width * 4 / 5 && y >= height / 5 && y < height * 4 / 5;
            let shade = 60 + ((x * 3 + y * 5) % 140) as u8;
            Rgba([shade, shade, shade.saturating_add(10), if inside { 255 } else { 0 }])
        })
    }

    fn design(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([200, (x * 4) as u8, (y * 4) as u8, 255]))
    }

    fn inputs<'a>(
        base: &'a RgbaImage,
        map: &'a DisplacementMap,
        design: Option<&'a RgbaImage>,
    ) -> CompositeInputs<'a> {
        CompositeInputs {
            base,
            displacement_map: map,
            design,
            color: None,
            shadow: None,
            placement: DesignPlacement::new(0.5, 0.5, 0.4),
            strength: 0.3,
            style: LayerStyle::default(),
        }
    }

    #[test]
    fn test_compose_is_deterministic() {
        let base = photo(120, 100);
        let map = build_displacement_map(&base, 2.0, BlurKind::Gaussian);
        let art = design(40, 30);
        let shadow = RgbaImage::from_pixel(120, 100, Rgba([180, 180, 180, 255]));
        let mut request = inputs(&base, &map, Some(&art));
        request.color = Some(Color::rgb(10, 120, 200));
        request.shadow = Some(&shadow);

        let compositor = Compositor::new();
        let first = compositor.compose(&request).unwrap();
        let second = compositor.compose(&request).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_solid_recolor() {
        let base = RgbaImage::from_fn(500, 500, |x, _| {
            if x < 400 { Rgba([128, 128, 128, 255]) } else { Rgba([128, 128, 128, 0]) }
        });
        let map = build_displacement_map(&base, 0.0, BlurKind::Gaussian);
        let mut request = inputs(&base, &map, None);
        request.color = Some("#ff0000".parse().unwrap());

        let frame = Compositor::new().compose(&request).unwrap();
        assert_eq!(frame.dimensions(), (500, 500));
        assert!(frame.design_rect().is_none());
        for (x, _, px) in frame.image().enumerate_pixels() {
            if x < 400 {
                assert_eq!(*px, Rgba([255, 0, 0, 255]));
            } else {
                assert_eq!(*px, Rgba([0, 0, 0, 0]));
            }
        }
    }

    #[test]
    fn test_no_design_no_color_is_base() {
        let base = photo(60, 60);
        let map = build_displacement_map(&base, 4.0, BlurKind::Gaussian);
        let frame = Compositor::new().compose(&inputs(&base, &map, None)).unwrap();
        assert_eq!(frame.image(), &base);
    }

    #[test]
    fn test_color_never_bleeds_outside_silhouette() {
        let base = photo(80, 80);
        let map = build_displacement_map(&base, 0.0, BlurKind::Gaussian);
        let art = design(30, 30);
        let mut request = inputs(&base, &map, Some(&art));
        request.color = Some(Color::rgb(0, 200, 0));
        request.style.color_blend = BlendMode::Multiply;

        let frame = Compositor::new().compose(&request).unwrap();
        let rect = frame.design_rect().unwrap();
        for (x, y, px) in frame.image().enumerate_pixels() {
            if base.get_pixel(x, y).0[3] == 0 && !rect.contains(x as i64, y as i64) {
                assert_eq!(*px, Rgba([0, 0, 0, 0]), "pixel ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_design_contained_in_rect() {
        let base = RgbaImage::from_pixel(100, 100, Rgba([90, 90, 90, 255]));
        let map = build_displacement_map(&photo(100, 100), 1.0, BlurKind::Box);
        let art = design(50, 25);
        let request = inputs(&base, &map, Some(&art));

        let frame = Compositor::new().compose(&request).unwrap();
        let rect = frame.design_rect().unwrap();
        assert_eq!((rect.width, rect.height), (40, 20));
        for (x, y, px) in frame.image().enumerate_pixels() {
            if !rect.contains(x as i64, y as i64) {
                assert_eq!(px, base.get_pixel(x, y), "pixel ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_zero_strength_places_design_without_warp() {
        let base = photo(100, 100);
        let map = build_displacement_map(&base, 0.0, BlurKind::Gaussian);
        let art = design(40, 40);
        let mut request = inputs(&base, &map, Some(&art));
        request.strength = 0.0;
        request.style.opacity = 1.0;

        let frame = Compositor::new().compose(&request).unwrap();
        let rect = frame.design_rect().unwrap();
        assert_eq!(rect, PlacementRect { x: 30, y: 30, width: 40, height: 40 });
        for y in 0..40 {
            for x in 0..40 {
                let px = frame.image().get_pixel(30 + x, 30 + y);
                assert_eq!(px, art.get_pixel(x, y));
            }
        }
    }

    #[test]
    fn test_shadow_multiplies() {
        let base = RgbaImage::from_pixel(10, 10, Rgba([200, 200, 200, 255]));
        let map = build_displacement_map(&base, 0.0, BlurKind::Gaussian);
        let shadow = RgbaImage::from_pixel(10, 10, Rgba([128, 128, 128, 255]));
        let mut request = inputs(&base, &map, None);
        request.shadow = Some(&shadow);

        let frame = Compositor::new().compose(&request).unwrap();
        assert_eq!(*frame.image().get_pixel(5, 5), Rgba([100, 100, 100, 255]));
    }

    #[test]
    fn test_mismatched_map_is_rejected() {
        let base = photo(20, 20);
        let map = build_displacement_map(&photo(10, 10), 0.0, BlurKind::Gaussian);
        let err = Compositor::new().compose(&inputs(&base, &map, None)).unwrap_err();
        assert_eq!(
            err,
            ComposeError::DisplacementMapUnavailable { expected: (20, 20), actual: (10, 10) }
        );
    }

    #[test]
    fn test_invalid_placement_is_rejected() {
        let base = photo(20, 20);
        let map = build_displacement_map(&base, 0.0, BlurKind::Gaussian);
        let mut request = inputs(&base, &map, None);
        request.placement.width = -1.0;
        let err = Compositor::new().compose(&request).unwrap_err();
        assert_eq!(err, ComposeError::InvalidPlacement(PlacementError::InvalidWidth(-1.0)));

        let shared = err.clone();
        assert_eq!(shared, err);
    }
}
