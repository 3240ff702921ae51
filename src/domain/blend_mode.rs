//! Blend modes understood by the compositor
//!
//! Names follow the canvas `globalCompositeOperation` vocabulary so front-end
//! configuration can be passed through unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("Unknown blend mode: {0}")]
pub struct UnknownBlendMode(pub String);

/// Pixel-combination rule used when layering one raster atop another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    /// Plain paint-over
    #[serde(alias = "normal")]
    SourceOver,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    /// Hue and saturation of the source, luminosity of the backdrop
    Color,
}

impl BlendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlendMode::SourceOver => "source-over",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
            BlendMode::Darken => "darken",
            BlendMode::Lighten => "lighten",
            BlendMode::Color => "color",
        }
    }
}

impl Default for BlendMode {
    fn default() -> Self {
        BlendMode::SourceOver
    }
}

impl FromStr for BlendMode {
    type Err = UnknownBlendMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "source-over" | "normal" => Ok(BlendMode::SourceOver),
            "multiply" => Ok(BlendMode::Multiply),
            "screen" => Ok(BlendMode::Screen),
            "overlay" => Ok(BlendMode::Overlay),
            "darken" => Ok(BlendMode::Darken),
            "lighten" => Ok(BlendMode::Lighten),
            "color" => Ok(BlendMode::Color),
            _ => Err(UnknownBlendMode(s.to_string())),
        }
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canvas_names() {
        assert_eq!("source-over".parse::<BlendMode>().unwrap(), BlendMode::SourceOver);
        assert_eq!("Normal".parse::<BlendMode>().unwrap(), BlendMode::SourceOver);
        assert_eq!("multiply".parse::<BlendMode>().unwrap(), BlendMode::Multiply);
        assert!("xor".parse::<BlendMode>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let mode: BlendMode = serde_json::from_str("\"source-over\"").unwrap();
        assert_eq!(mode, BlendMode::SourceOver);
        assert_eq!(serde_json::to_string(&BlendMode::Multiply).unwrap(), "\"multiply\"");
    }
}
