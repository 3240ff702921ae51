//! Placement specification for the design layer
//!
//! Placement is expressed as fractions of the garment canvas so the same
//! settings work for any base image size. The design keeps its own aspect
//! ratio; only its width is configured.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default horizontal center (fraction of canvas width)
pub const DEFAULT_CENTER_X: f64 = 0.5;

/// Default vertical center, slightly above the middle for chest placement
pub const DEFAULT_CENTER_Y: f64 = 0.47;

/// Default design width (fraction of canvas width)
pub const DEFAULT_WIDTH: f64 = 0.25;

/// Center coordinates may leave the canvas by at most one canvas size
pub const CENTER_RANGE: (f64, f64) = (-1.0, 2.0);

/// Largest design width, as a fraction of canvas width
pub const MAX_WIDTH: f64 = 2.0;

/// Placement errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlacementError {
    #[error("Placement {field} must be finite, got {value}")]
    NotFinite { field: &'static str, value: f64 },
    #[error("Placement {field} must be between -1 and 2, got {value}")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("Placement width must be greater than 0 and at most 2, got {0}")]
    InvalidWidth(f64),
}

/// Where the design sits on the garment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignPlacement {
    /// Horizontal center as a fraction of canvas width
    pub x: f64,

    /// Vertical center as a fraction of canvas height
    pub y: f64,

    /// Design width as a fraction of canvas width
    pub width: f64,
}

/// Absolute pixel rectangle on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl PlacementRect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the canvas pixel `(px, py)` lies inside the rectangle
    pub fn contains(&self, px: i64, py: i64) -> bool {
        px >= self.x
            && py >= self.y
            && px < self.x.saturating_add(self.width as i64)
            && py < self.y.saturating_add(self.height as i64)
    }
}

impl DesignPlacement {
    pub fn new(x: f64, y: f64, width: f64) -> Self {
        DesignPlacement { x, y, width }
    }

    /// Validate the placement
    pub fn validate(&self) -> Result<(), PlacementError> {
        for (field, value) in [("x", self.x), ("y", self.y), ("width", self.width)] {
            if !value.is_finite() {
                return Err(PlacementError::NotFinite { field, value });
            }
        }

        for (field, value) in [("x", self.x), ("y", self.y)] {
            if !(CENTER_RANGE.0..=CENTER_RANGE.1).contains(&value) {
                return Err(PlacementError::OutOfRange { field, value });
            }
        }

        if self.width <= 0.0 || self.width > MAX_WIDTH {
            return Err(PlacementError::InvalidWidth(self.width));
        }

        Ok(())
    }

    /// Design dimensions on a canvas `canvas_width` pixels wide
    ///
    /// Width is truncated to whole pixels; height follows the design's own
    /// aspect ratio. A degenerate design yields `(0, 0)`.
    pub fn get_design_dimensions(&self, canvas_width: u32, design: (u32, u32)) -> (u32, u32) {
        let (design_width, design_height) = design;
        if design_width == 0 || design_height == 0 {
            return (0, 0);
        }

        let width = (canvas_width as f64 * self.width).floor().max(0.0);
        let aspect_ratio = design_width as f64 / design_height as f64;
        let height = (width / aspect_ratio).floor().max(0.0);

        (width as u32, height as u32)
    }

    /// Absolute rectangle of the design on the canvas
    pub fn get_rect(&self, canvas: (u32, u32), design: (u32, u32)) -> PlacementRect {
        let (canvas_width, canvas_height) = canvas;
        let (width, height) = self.get_design_dimensions(canvas_width, design);

        let center_x = canvas_width as f64 * self.x;
        let center_y = canvas_height as f64 * self.y;

        PlacementRect {
            x: round_half_up(center_x - width as f64 / 2.0),
            y: round_half_up(center_y - height as f64 / 2.0),
            width,
            height,
        }
    }
}

impl Default for DesignPlacement {
    fn default() -> Self {
        DesignPlacement {
            x: DEFAULT_CENTER_X,
            y: DEFAULT_CENTER_Y,
            width: DEFAULT_WIDTH,
        }
    }
}

/// Round to the nearest integer, ties toward positive infinity
pub fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_placement() {
        let placement = DesignPlacement::default();
        assert!(placement.validate().is_ok());
        assert_eq!(placement.x, 0.5);
        assert_eq!(placement.y, 0.47);
    }

    #[test]
    fn test_invalid_width() {
        let placement = DesignPlacement::new(0.5, 0.5, 0.0);
        assert_eq!(placement.validate(), Err(PlacementError::InvalidWidth(0.0)));

        let placement = DesignPlacement::new(f64::NAN, 0.5, 0.3);
        assert!(matches!(
            placement.validate(),
            Err(PlacementError::NotFinite { field: "x", .. })
        ));
    }

    #[test]
    fn test_far_off_canvas_placement_is_rejected() {
        assert_eq!(
            DesignPlacement::new(1e300, 0.5, 0.25).validate(),
            Err(PlacementError::OutOfRange { field: "x", value: 1e300 })
        );
        assert!(matches!(
            DesignPlacement::new(0.5, -3.0, 0.25).validate(),
            Err(PlacementError::OutOfRange { field: "y", .. })
        ));
        assert_eq!(
            DesignPlacement::new(0.5, 0.5, 1e9).validate(),
            Err(PlacementError::InvalidWidth(1e9))
        );
        assert!(DesignPlacement::new(-1.0, 2.0, 2.0).validate().is_ok());
    }

    #[test]
    fn test_rect_preserves_design_aspect() {
        let placement = DesignPlacement::new(0.5, 0.5, 0.25);
        // 400px canvas -> 100px wide design, 2:1 design -> 50px tall
        let rect = placement.get_rect((400, 400), (200, 100));
        assert_eq!(rect.width, 100);
        assert_eq!(rect.height, 50);
        assert_eq!(rect.x, 150);
        assert_eq!(rect.y, 175);
    }

    #[test]
    fn test_rect_contains() {
        let rect = PlacementRect { x: 10, y: 20, width: 5, height: 5 };
        assert!(rect.contains(10, 20));
        assert!(rect.contains(14, 24));
        assert!(!rect.contains(15, 24));
        assert!(!rect.contains(9, 20));

        let edge = PlacementRect { x: i64::MAX - 1, y: 0, width: 5, height: 5 };
        assert!(edge.contains(i64::MAX - 1, 0));
    }

    #[test]
    fn test_degenerate_design() {
        let placement = DesignPlacement::default();
        assert!(placement.get_rect((500, 500), (0, 10)).is_empty());
    }

    #[test]
    fn test_round_half_up() {
        assert_eq!(round_half_up(2.5), 3);
        assert_eq!(round_half_up(-2.5), -2);
        assert_eq!(round_half_up(-2.6), -3);
        assert_eq!(round_half_up(0.49), 0);
    }
}
