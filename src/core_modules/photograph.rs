use crate::core_modules::region::Rect;
use crate::error::{Result, ScreeningError};
use image::{GrayImage, RgbImage};
use std::path::Path;

/// An immutable RGB raster submitted for screening.
#[derive(Debug, Clone)]
pub struct Photograph {
    image: RgbImage,
}

impl Photograph {
    /// Wraps an already decoded raster. Zero-sized rasters are rejected.
    pub fn from_rgb(image: RgbImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ScreeningError::EmptyImage { width, height });
        }
        Ok(Self { image })
    }

    /// Decodes an encoded image (PNG, JPEG, ...) and converts it to RGB.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes)?;
        Self::from_rgb(decoded.to_rgb8())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let decoded = image::open(path)?;
        Self::from_rgb(decoded.to_rgb8())
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn bounds(&self) -> Rect {
        Rect::full(self.width(), self.height())
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.image
    }

    /// Grayscale view handed to the face and eye detectors.
    pub fn to_luma(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }

    /// Copies out the pixels under `rect`, clipped to the photograph.
    pub fn crop(&self, rect: Rect) -> RgbImage {
        let rect = rect.clip(self.width(), self.height());
        image::imageops::crop_imm(&self.image, rect.x1, rect.y1, rect.width(), rect.height())
            .to_image()
    }
}
