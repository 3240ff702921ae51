//! Garment Preview
//!
//! Interactive product-customizer engine: shows a user-supplied design on a
//! garment photo, following fabric folds through a displacement map, with
//! optional recolor and shadow layers.

pub mod config;
pub mod customizer;
pub mod domain;
pub mod engine;
pub mod storage;

pub use customizer::{Customizer, CustomizerError, CustomizerEvent, CustomizerOptions, CustomizerView};
pub use engine::{Compositor, ExportFormat};
