//! Configuration record for a customizer session

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{BlendMode, Color, DesignPlacement, PlacementError};
use crate::engine::compositor::{DEFAULT_OPACITY, DEFAULT_STRENGTH};
use crate::engine::crop::DEFAULT_ASPECT_RATIO;
use crate::engine::displacement::MAX_STRENGTH;
use crate::engine::{BlurKind, CropConstraint, LayerStyle};

/// Default displacement map blur radius in pixels
pub const DEFAULT_BLUR_RADIUS: f32 = 4.0;

#[derive(Debug, Error, PartialEq)]
pub enum OptionsError {
    #[error("Base image source is required")]
    MissingBaseSource,
    #[error(transparent)]
    Placement(#[from] PlacementError),
    #[error("Opacity must be between 0 and 1, got {0}")]
    InvalidOpacity(f32),
    #[error("Displacement strength must be between -255 and 255, got {0}")]
    InvalidStrength(f64),
    #[error("Displacement blur must be finite and non-negative, got {0}")]
    InvalidBlur(f32),
    #[error("Crop aspect ratio must be finite and greater than 0, got {0}")]
    InvalidAspectRatio(f64),
}

/// Everything the customizer can be configured with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomizerOptions {
    /// Base garment image (http(s) URL, file path or `data:` URL)
    pub base_source: String,

    /// Pre-authored shadow/highlight layer, same dimensions as the base
    pub shadow_source: Option<String>,

    /// Garment recolor; `None` keeps the photographed color
    pub color: Option<Color>,

    pub color_blend: BlendMode,
    pub design_blend: BlendMode,

    /// Design opacity (0.0 to 1.0)
    pub opacity: f32,

    pub placement: DesignPlacement,

    /// Pixels of offset per gray level away from 128
    pub displacement_strength: f64,

    /// Displacement map blur radius in pixels (0 disables blurring)
    pub displacement_blur: f32,
    pub blur_kind: BlurKind,

    /// Crop box width / height
    pub crop_aspect_ratio: f64,
    pub crop_constraint: CropConstraint,
}

impl CustomizerOptions {
    pub fn new(base_source: impl Into<String>) -> Self {
        CustomizerOptions {
            base_source: base_source.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.base_source.trim().is_empty() {
            return Err(OptionsError::MissingBaseSource);
        }
        self.placement.validate()?;
        validate_opacity(self.opacity)?;
        validate_strength(self.displacement_strength)?;
        validate_blur(self.displacement_blur)?;

        if !self.crop_aspect_ratio.is_finite() || self.crop_aspect_ratio <= 0.0 {
            return Err(OptionsError::InvalidAspectRatio(self.crop_aspect_ratio));
        }

        Ok(())
    }

    pub fn layer_style(&self) -> LayerStyle {
        LayerStyle {
            color_blend: self.color_blend,
            design_blend: self.design_blend,
            opacity: self.opacity,
        }
    }

    /// Parse options from a JSON document
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for CustomizerOptions {
    fn default() -> Self {
        CustomizerOptions {
            base_source: String::new(),
            shadow_source: None,
            color: None,
            color_blend: BlendMode::SourceOver,
            design_blend: BlendMode::SourceOver,
            opacity: DEFAULT_OPACITY,
            placement: DesignPlacement::default(),
            displacement_strength: DEFAULT_STRENGTH,
            displacement_blur: DEFAULT_BLUR_RADIUS,
            blur_kind: BlurKind::Gaussian,
            crop_aspect_ratio: DEFAULT_ASPECT_RATIO,
            crop_constraint: CropConstraint::Unrestricted,
        }
    }
}

pub(crate) fn validate_opacity(opacity: f32) -> Result<(), OptionsError> {
    if !(0.0..=1.0).contains(&opacity) {
        return Err(OptionsError::InvalidOpacity(opacity));
    }
    Ok(())
}

pub(crate) fn validate_strength(strength: f64) -> Result<(), OptionsError> {
    if !strength.is_finite() || strength.abs() > MAX_STRENGTH {
        return Err(OptionsError::InvalidStrength(strength));
    }
    Ok(())
}

pub(crate) fn validate_blur(blur: f32) -> Result<(), OptionsError> {
    if !blur.is_finite() || blur < 0.0 {
        return Err(OptionsError::InvalidBlur(blur));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_storefront_widget() {
        let options = CustomizerOptions::new("tshirt.png");
        assert!(options.validate().is_ok());
        assert_eq!(options.displacement_strength, 0.15);
        assert_eq!(options.displacement_blur, 4.0);
        assert_eq!(options.opacity, 0.95);
        assert_eq!(options.placement, DesignPlacement::new(0.5, 0.47, 0.25));
    }

    #[test]
    fn test_validation() {
        assert_eq!(CustomizerOptions::default().validate(), Err(OptionsError::MissingBaseSource));

        let mut options = CustomizerOptions::new("tshirt.png");
        options.opacity = 1.5;
        assert_eq!(options.validate(), Err(OptionsError::InvalidOpacity(1.5)));

        let mut options = CustomizerOptions::new("tshirt.png");
        options.displacement_blur = -1.0;
        assert_eq!(options.validate(), Err(OptionsError::InvalidBlur(-1.0)));

        let mut options = CustomizerOptions::new("tshirt.png");
        options.displacement_strength = 1e300;
        assert_eq!(options.validate(), Err(OptionsError::InvalidStrength(1e300)));

        let mut options = CustomizerOptions::new("tshirt.png");
        options.placement.x = 1e300;
        assert!(matches!(options.validate(), Err(OptionsError::Placement(_))));

        let mut options = CustomizerOptions::new("tshirt.png");
        options.crop_aspect_ratio = 0.0;
        assert_eq!(options.validate(), Err(OptionsError::InvalidAspectRatio(0.0)));
    }

    #[test]
    fn test_from_json() {
        let options = CustomizerOptions::from_json(
            r##"{
                "base_source": "https://cdn.example.com/tshirt.png",
                "shadow_source": "/shadows.png",
                "color": "#ffffff",
                "color_blend": "color",
                "displacement_strength": 0.4,
                "placement": { "width": 0.35, "y": 0.5 }
            }"##,
        )
        .unwrap();

        assert_eq!(options.color, Some(Color::rgb(255, 255, 255)));
        assert_eq!(options.color_blend, BlendMode::Color);
        assert_eq!(options.placement, DesignPlacement::new(0.5, 0.5, 0.35));
        assert_eq!(options.displacement_strength, 0.4);
        assert_eq!(options.crop_aspect_ratio, 0.8);
        assert!(options.validate().is_ok());
    }
}
