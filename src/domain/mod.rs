//! Domain types and models

mod blend_mode;
mod color;
mod placement;

pub use blend_mode::{BlendMode, UnknownBlendMode};
pub use color::{Color, ColorParseError};
pub use placement::{round_half_up, DesignPlacement, PlacementError, PlacementRect};
