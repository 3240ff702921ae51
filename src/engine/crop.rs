//! Design acquisition and cropping
//!
//! A user-selected file is decoded into an [`UploadedImage`], framed with an
//! aspect-locked [`CropSession`] and finally cut into a [`CroppedDesign`].

use image::{imageops, ImageError, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::round_half_up;

/// Default crop aspect ratio (width / height)
pub const DEFAULT_ASPECT_RATIO: f64 = 0.8;

/// Smallest crop box edge, in source pixels
const MIN_CROP_SIZE: f64 = 1.0;

/// Largest on-screen scale a session accepts
pub const MAX_ZOOM: f64 = 4.0;

/// Errors raised when decoding a user-selected file
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("File is not a supported image format")]
    UnsupportedFormat,
    #[error("Failed to decode image: {0}")]
    Decode(#[from] ImageError),
}

/// Errors raised while framing a crop
#[derive(Debug, Error, PartialEq)]
pub enum CropError {
    #[error("Aspect ratio must be finite and greater than 0, got {0}")]
    InvalidAspectRatio(f64),
    #[error("Zoom must be greater than 0 and at most 4, got {0}")]
    InvalidZoom(f64),
    #[error("Crop region must have a finite position and a size of at least one pixel")]
    InvalidRegion,
}

/// A decoded user upload, alive until its crop is confirmed or cancelled
#[derive(Debug, Clone)]
pub struct UploadedImage {
    image: RgbaImage,
    format: ImageFormat,
}

impl UploadedImage {
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Decode a user-selected file
pub fn acquire(bytes: &[u8]) -> Result<UploadedImage, AcquireError> {
    let format = image::guess_format(bytes).map_err(|_| AcquireError::UnsupportedFormat)?;
    let image = image::load_from_memory_with_format(bytes, format)?.to_rgba8();

    debug!(
        format = ?format,
        width = image.width(),
        height = image.height(),
        "Acquired uploaded image"
    );

    Ok(UploadedImage { image, format })
}

/// How far the crop box may travel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropConstraint {
    /// The box may be panned past the image edges
    Unrestricted,
    /// The box is kept inside the image
    WithinImage,
}

impl Default for CropConstraint {
    fn default() -> Self {
        CropConstraint::Unrestricted
    }
}

/// Crop box in source-image pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl CropRegion {
    fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// The user's chosen artwork
#[derive(Debug, Clone, PartialEq)]
pub struct CroppedDesign {
    image: RgbaImage,
}

impl CroppedDesign {
    pub fn new(image: RgbaImage) -> Self {
        CroppedDesign { image }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

/// Interactive, aspect-locked crop over an uploaded image
#[derive(Debug, Clone)]
pub struct CropSession {
    upload: UploadedImage,
    aspect_ratio: f64,
    constraint: CropConstraint,
    region: CropRegion,
    zoom: f64,
}

impl CropSession {
    /// Open a session with the box covering the largest area that fits
    pub fn open(
        upload: UploadedImage,
        aspect_ratio: f64,
        constraint: CropConstraint,
    ) -> Result<Self, CropError> {
        if !aspect_ratio.is_finite() || aspect_ratio <= 0.0 {
            return Err(CropError::InvalidAspectRatio(aspect_ratio));
        }

        let (width, height) = max_fit(upload.dimensions(), aspect_ratio);
        let (image_width, image_height) = upload.dimensions();
        let region = CropRegion {
            x: (image_width as f64 - width) / 2.0,
            y: (image_height as f64 - height) / 2.0,
            width,
            height,
        };

        Ok(CropSession {
            upload,
            aspect_ratio,
            constraint,
            region,
            zoom: 1.0,
        })
    }

    pub fn upload(&self) -> &UploadedImage {
        &self.upload
    }

    pub fn region(&self) -> CropRegion {
        self.region
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.aspect_ratio
    }

    pub fn constraint(&self) -> CropConstraint {
        self.constraint
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Drag the box by `(dx, dy)` source pixels
    pub fn move_by(&mut self, dx: f64, dy: f64) {
        if !dx.is_finite() || !dy.is_finite() {
            return;
        }
        self.region.x += dx;
        self.region.y += dy;
        self.constrain();
    }

    /// Resize the box to `width`, keeping its center and aspect ratio
    pub fn resize(&mut self, width: f64) {
        if !width.is_finite() {
            return;
        }

        let width = width
            .min(max_fit(self.upload.dimensions(), self.aspect_ratio).0)
            .max(MIN_CROP_SIZE);

        let (center_x, center_y) = self.region.center();
        let height = width / self.aspect_ratio;
        self.region = CropRegion {
            x: center_x - width / 2.0,
            y: center_y - height / 2.0,
            width,
            height,
        };
        self.constrain();
    }

    /// Replace the box; height is re-derived from width and the aspect ratio
    pub fn set_region(&mut self, region: CropRegion) -> Result<(), CropError> {
        if !region.x.is_finite() || !region.y.is_finite() || !region.width.is_finite() {
            return Err(CropError::InvalidRegion);
        }
        if region.width < MIN_CROP_SIZE || region.width / self.aspect_ratio < MIN_CROP_SIZE {
            return Err(CropError::InvalidRegion);
        }

        let width = region
            .width
            .min(max_fit(self.upload.dimensions(), self.aspect_ratio).0)
            .max(MIN_CROP_SIZE);
        self.region = CropRegion {
            width,
            height: width / self.aspect_ratio,
            ..region
        };
        self.constrain();
        Ok(())
    }

    /// Set the on-screen scale (display pixels per source pixel)
    pub fn set_zoom(&mut self, zoom: f64) -> Result<(), CropError> {
        if !zoom.is_finite() || zoom <= 0.0 || zoom > MAX_ZOOM {
            return Err(CropError::InvalidZoom(zoom));
        }
        self.zoom = zoom;
        Ok(())
    }

    /// Size of the cropped output: the crop box's on-screen dimensions
    pub fn output_dimensions(&self) -> (u32, u32) {
        let (width, height) = self.source_size();
        (
            scaled(width as f64, self.zoom),
            scaled(height as f64, self.zoom),
        )
    }

    /// Render the selected region
    ///
    /// Parts of the box outside the image stay fully transparent.
    pub fn crop(&self) -> CroppedDesign {
        let image = &self.upload.image;
        let (image_width, image_height) = image.dimensions();
        let (box_width, box_height) = self.source_size();
        let box_x = round_half_up(self.region.x);
        let box_y = round_half_up(self.region.y);

        let (out_width, out_height) = self.output_dimensions();
        let mut output = RgbaImage::new(out_width, out_height);

        // Overlap of the box with the image, in source pixels
        let left = box_x.max(0);
        let top = box_y.max(0);
        let right = box_x.saturating_add(box_width as i64).min(image_width as i64);
        let bottom = box_y.saturating_add(box_height as i64).min(image_height as i64);

        if left < right && top < bottom {
            let part = imageops::crop_imm(
                image,
                left as u32,
                top as u32,
                (right - left) as u32,
                (bottom - top) as u32,
            )
            .to_image();

            let offset_x = (left - box_x) as f64;
            let offset_y = (top - box_y) as f64;

            if (self.zoom - 1.0).abs() < f64::EPSILON {
                imageops::replace(&mut output, &part, offset_x as i64, offset_y as i64);
            } else {
                let scaled_part = imageops::resize(
                    &part,
                    scaled(part.width() as f64, self.zoom),
                    scaled(part.height() as f64, self.zoom),
                    imageops::FilterType::Triangle,
                );
                imageops::replace(
                    &mut output,
                    &scaled_part,
                    round_half_up(offset_x * self.zoom),
                    round_half_up(offset_y * self.zoom),
                );
            }
        }

        debug!(
            x = box_x,
            y = box_y,
            width = out_width,
            height = out_height,
            "Cropped design"
        );

        CroppedDesign::new(output)
    }

    fn source_size(&self) -> (u32, u32) {
        (
            self.region.width.round().max(MIN_CROP_SIZE) as u32,
            self.region.height.round().max(MIN_CROP_SIZE) as u32,
        )
    }

    /// Keep the box inside the image, or at least touching it when unrestricted
    fn constrain(&mut self) {
        let (image_width, image_height) = self.upload.dimensions();
        let (image_width, image_height) = (image_width as f64, image_height as f64);

        match self.constraint {
            CropConstraint::WithinImage => {
                let max_x = (image_width - self.region.width).max(0.0);
                let max_y = (image_height - self.region.height).max(0.0);
                self.region.x = self.region.x.clamp(0.0, max_x);
                self.region.y = self.region.y.clamp(0.0, max_y);
            }
            CropConstraint::Unrestricted => {
                self.region.x = self.region.x.clamp(-self.region.width, image_width);
                self.region.y = self.region.y.clamp(-self.region.height, image_height);
            }
        }
    }
}

/// Largest `(width, height)` with the given aspect ratio fitting in `bounds`
fn max_fit(bounds: (u32, u32), aspect_ratio: f64) -> (f64, f64) {
    let (width, height) = (bounds.0 as f64, bounds.1 as f64);
    if width / height.max(f64::MIN_POSITIVE) > aspect_ratio {
        (height * aspect_ratio, height)
    } else {
        (width, width / aspect_ratio)
    }
}

fn scaled(length: f64, zoom: f64) -> u32 {
    (length * zoom).round().max(1.0) as u32
}
