// THEORY:
// The `region` module holds the geometry of the screening engine. Every detector,
// every localization tier and every crop speaks in terms of a `Rect`, and every
// crop handed downstream is wrapped in an `EyeRegion` that carries its `Side`.
//
// Key architectural principles:
// 1.  **Half-open Pixel Boxes**: A `Rect` is `[x1, x2) x [y1, y2)` in pixel space,
//     exactly the convention of `image::imageops::crop_imm`. Width and height are
//     simple differences and an empty box has zero area.
// 2.  **Clip Before Crop**: Padding is computed in signed space and then clamped
//     to the photograph, so no region can ever reach outside its source.
// 3.  **Dumb Data Containers**: `EyeRegion` does no analysis. It is produced once
//     by the localizer and read by everything after it.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which eye a region is presumed to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "Right Eye")]
    RightEye,
    #[serde(rename = "Left Eye")]
    LeftEye,
    /// A single eye whose side cannot be inferred from the photograph.
    #[serde(rename = "Detected Eye")]
    DetectedEye,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::RightEye => "Right Eye",
            Side::LeftEye => "Left Eye",
            Side::DetectedEye => "Detected Eye",
        }
    }

    /// Output ordering rank: right before left.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Side::RightEye => 0,
            Side::LeftEye => 1,
            Side::DetectedEye => 2,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An axis-aligned, half-open pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Rect {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Builds a rectangle from a top-left corner and a size, the form detectors report.
    pub fn from_xywh(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x1: x,
            y1: y,
            x2: x.saturating_add(width),
            y2: y.saturating_add(height),
        }
    }

    /// Covers an entire `width` x `height` raster.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Shifts the rectangle by a non-negative offset (sub-image to image coordinates).
    pub fn offset(&self, dx: u32, dy: u32) -> Self {
        Self {
            x1: self.x1.saturating_add(dx),
            y1: self.y1.saturating_add(dy),
            x2: self.x2.saturating_add(dx),
            y2: self.y2.saturating_add(dy),
        }
    }

    /// Clamps the rectangle into `[0, width] x [0, height]`.
    /// A box lying entirely outside collapses to an empty rectangle on the border.
    pub fn clip(&self, width: u32, height: u32) -> Self {
        let x1 = self.x1.min(width);
        let y1 = self.y1.min(height);
        Self {
            x1,
            y1,
            x2: self.x2.clamp(x1, width),
            y2: self.y2.clamp(y1, height),
        }
    }

    /// Grows the rectangle by `pad_x` / `pad_y` pixels on every side and clips it
    /// to the given bounds.
    pub fn pad_and_clip(&self, pad_x: u32, pad_y: u32, width: u32, height: u32) -> Self {
        let x1 = (self.x1 as i64 - pad_x as i64).max(0);
        let y1 = (self.y1 as i64 - pad_y as i64).max(0);
        let x2 = (self.x2 as i64 + pad_x as i64).min(width as i64);
        let y2 = (self.y2 as i64 + pad_y as i64).min(height as i64);
        Self {
            x1: x1 as u32,
            y1: y1 as u32,
            x2: x2.max(x1) as u32,
            y2: y2.max(y1) as u32,
        }
    }

    /// True when the rectangle lies fully inside a `width` x `height` raster.
    pub fn is_within(&self, width: u32, height: u32) -> bool {
        self.x1 <= self.x2 && self.y1 <= self.y2 && self.x2 <= width && self.y2 <= height
    }
}

/// A labeled sub-rectangle of the input photograph presumed to contain one eye.
#[derive(Debug, Clone)]
pub struct EyeRegion {
    pub side: Side,
    /// Location of the crop inside the source photograph.
    pub bounds: Rect,
    pub crop: RgbImage,
}

impl EyeRegion {
    pub fn new(side: Side, bounds: Rect, crop: RgbImage) -> Self {
        Self { side, bounds, crop }
    }
}
