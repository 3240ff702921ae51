//! Encoding rendered frames for download or upload

use base64::Engine;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, ImageError, Rgb, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default JPEG quality
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to encode image: {0}")]
    Encode(#[from] ImageError),
    #[error("JPEG quality must be between 1 and 100, got {0}")]
    InvalidQuality(u8),
}

/// Output encoding for an exported frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "format")]
pub enum ExportFormat {
    /// Lossless, keeps transparency
    Png,
    /// Lossy, flattened onto white
    Jpeg { quality: u8 },
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Png => "image/png",
            ExportFormat::Jpeg { .. } => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg { .. } => "jpg",
        }
    }
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat::Png
    }
}

/// Encode `image` in the requested format
pub fn encode(image: &RgbaImage, format: ExportFormat) -> Result<Bytes, ExportError> {
    let (width, height) = image.dimensions();
    let mut buffer = Vec::new();

    match format {
        ExportFormat::Png => {
            PngEncoder::new(&mut buffer).write_image(image.as_raw(), width, height, ColorType::Rgba8)?;
        }
        ExportFormat::Jpeg { quality } => {
            if !(1..=100).contains(&quality) {
                return Err(ExportError::InvalidQuality(quality));
            }
            let flattened = flatten_onto_white(image);
            JpegEncoder::new_with_quality(&mut buffer, quality).write_image(
                flattened.as_raw(),
                width,
                height,
                ColorType::Rgb8,
            )?;
        }
    }

    debug!(
        width = width,
        height = height,
        format = format.extension(),
        bytes = buffer.len(),
        "Encoded frame"
    );

    Ok(Bytes::from(buffer))
}

/// Encode `image` as a `data:` URL
pub fn to_data_url(image: &RgbaImage, format: ExportFormat) -> Result<String, ExportError> {
    let bytes = encode(image, format)?;
    Ok(format!(
        "data:{};base64,{}",
        format.content_type(),
        base64::engine::general_purpose::STANDARD.encode(&bytes)
    ))
}

fn flatten_onto_white(image: &RgbaImage) -> RgbImage {
    let (width, height) = image.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let [r, g, b, a] = image.get_pixel(x, y).0;
        let alpha = a as u32;
        let over_white = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([over_white(r), over_white(g), over_white(b)])
    })
}
