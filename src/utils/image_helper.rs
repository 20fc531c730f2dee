use image::{ImageEncoder, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use std::path::Path;

use crate::core_modules::region::Rect;

/// Writes an RGB raster as PNG.
pub fn save_png(path: impl AsRef<Path>, image: &RgbImage) -> Result<(), image::error::ImageError> {
    let output = std::io::BufWriter::new(std::fs::File::create(path)?);
    let encoder = image::codecs::png::PngEncoder::new(output);

    encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgb8,
    )?;

    Ok(())
}

/// Draws a `thickness`-pixel outline just inside `rect`, clipped to the raster.
/// Thickness is built from nested hollow rectangles stepping inward.
pub fn draw_outline(image: &mut RgbImage, rect: Rect, color: Rgb<u8>, thickness: u32) {
    let rect = rect.clip(image.width(), image.height());
    if rect.is_empty() {
        return;
    }

    for inset in 0..thickness.max(1) {
        if rect.width() <= inset * 2 || rect.height() <= inset * 2 {
            break;
        }
        let ring = imageproc::rect::Rect::at((rect.x1 + inset) as i32, (rect.y1 + inset) as i32)
            .of_size(rect.width() - inset * 2, rect.height() - inset * 2);
        draw_hollow_rect_mut(image, ring, color);
    }
}
