//! Garment preview engine
//!
//! This module contains the pixel pipeline:
//! - Displacement map building and design warping
//! - Design acquisition and cropping
//! - Layer blending and compositing
//! - Frame export

pub mod blend;
pub mod compositor;
pub mod crop;
pub mod displacement;
pub mod export;

pub use compositor::{CompositeFrame, CompositeInputs, ComposeError, Compositor, LayerStyle};
pub use crop::{acquire, AcquireError, CropConstraint, CropError, CropRegion, CropSession, CroppedDesign, UploadedImage};
pub use displacement::{build_displacement_map, warp_design, BlurKind, DisplacementMap};
pub use export::{ExportError, ExportFormat};
