use cataract_screen::Rect;
use image::{GrayImage, RgbImage};
use opencv::{
    core::{self, Mat, Scalar},
    prelude::*,
};

/// Copies a grayscale raster into a single-channel 8-bit `Mat`.
pub fn gray_to_mat(image: &GrayImage) -> opencv::Result<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(
        image.height() as i32,
        image.width() as i32,
        core::CV_8UC1,
        Scalar::all(0.0),
    )?;
    mat.data_bytes_mut()?.copy_from_slice(image.as_raw());
    Ok(mat)
}

/// Copies an RGB raster into a three-channel 8-bit `Mat`. Channel order stays RGB.
pub fn rgb_to_mat(image: &RgbImage) -> opencv::Result<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(
        image.height() as i32,
        image.width() as i32,
        core::CV_8UC3,
        Scalar::all(0.0),
    )?;
    mat.data_bytes_mut()?.copy_from_slice(image.as_raw());
    Ok(mat)
}

/// Converts an OpenCV box to a pixel rectangle. Degenerate boxes become `None`.
pub fn from_cv_rect(rect: core::Rect) -> Option<Rect> {
    if rect.width <= 0 || rect.height <= 0 {
        return None;
    }
    let x1 = rect.x.max(0) as u32;
    let y1 = rect.y.max(0) as u32;
    let x2 = (rect.x + rect.width).max(0) as u32;
    let y2 = (rect.y + rect.height).max(0) as u32;
    let converted = Rect::new(x1, y1, x2, y2);
    (!converted.is_empty()).then_some(converted)
}

pub fn to_cv_rect(rect: Rect) -> core::Rect {
    core::Rect::new(rect.x1 as i32, rect.y1 as i32, rect.width() as i32, rect.height() as i32)
}
