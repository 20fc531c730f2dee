// THEORY:
// The `BlobDetector` is a dependency-free eye detector. It implements a "Heatmap
// Peak-Finding and Region Growing" algorithm over a `LumaGrid`, looking for compact
// regions that are markedly darker than their surroundings: pupils, irises and the
// shadowed socket around them.
//
// Algorithm steps:
// 1.  **Heatmap Generation**: Every chunk's heat is its relative darkness against
//     the raster's mean luminance, so the detector is insensitive to overall
//     exposure.
// 2.  **Peak Finding (Seeding)**: Chunks that are hot enough and not cooler than
//     any of their 8 neighbours become seeds.
// 3.  **Region Growing**: Each unvisited seed grows through 4-connected neighbours
//     whose heat stays above the growth threshold.
// 4.  **Filtering**: Blobs that are too small (speckle) or too large (hair,
//     background, a dark frame) are dropped. What remains is reported as pixel
//     boxes in discovery order.

use crate::core_modules::detector::ObjectDetector;
use crate::core_modules::luma_grid::LumaGrid;
use crate::core_modules::region::Rect;
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Tuning for the built-in dark-blob detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobDetectorConfig {
    /// Side length of a grid chunk in pixels.
    pub chunk_size: u32,
    /// Minimum darkness a chunk needs to seed a blob.
    pub seed_threshold: f64,
    /// Minimum darkness a neighbour needs to join a growing blob.
    pub grow_threshold: f64,
    /// Smallest blob, in chunks, that is reported.
    pub min_chunks: usize,
    /// Largest blob, as a fraction of all chunks, that is reported.
    pub max_coverage: f64,
}

impl Default for BlobDetectorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4,
            seed_threshold: 0.35,
            grow_threshold: 0.25,
            min_chunks: 2,
            max_coverage: 0.25,
        }
    }
}

/// A grid coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cell {
    x: u32,
    y: u32,
}

#[derive(Debug, Clone, Default)]
pub struct BlobDetector {
    config: BlobDetectorConfig,
}

impl BlobDetector {
    pub fn new(config: BlobDetectorConfig) -> Self {
        Self { config }
    }

    fn find_peaks(&self, grid: &LumaGrid) -> Vec<Cell> {
        let mut peaks = Vec::new();
        for y in 0..grid.grid_height {
            for x in 0..grid.grid_width {
                let heat = grid.darkness_at(x, y);
                if heat < self.config.seed_threshold {
                    continue;
                }

                let mut is_peak = true;
                'neighbours: for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = x as i64 + dx;
                        let ny = y as i64 + dy;
                        if nx >= 0
                            && ny >= 0
                            && nx < grid.grid_width as i64
                            && ny < grid.grid_height as i64
                            && grid.darkness_at(nx as u32, ny as u32) > heat
                        {
                            is_peak = false;
                            break 'neighbours;
                        }
                    }
                }

                if is_peak {
                    peaks.push(Cell { x, y });
                }
            }
        }
        peaks
    }

    fn grow_from_peak(&self, peak: Cell, grid: &LumaGrid, visited: &mut [bool]) -> Vec<Cell> {
        let index = |cell: Cell| (cell.y * grid.grid_width + cell.x) as usize;
        let mut blob = Vec::new();
        let mut stack = vec![peak];
        visited[index(peak)] = true;

        while let Some(current) = stack.pop() {
            blob.push(current);

            for (dx, dy) in [(0i64, 1i64), (0, -1), (1, 0), (-1, 0)] {
                let nx = current.x as i64 + dx;
                let ny = current.y as i64 + dy;
                if nx < 0 || ny < 0 || nx >= grid.grid_width as i64 || ny >= grid.grid_height as i64 {
                    continue;
                }
                let neighbour = Cell {
                    x: nx as u32,
                    y: ny as u32,
                };
                if !visited[index(neighbour)]
                    && grid.darkness_at(neighbour.x, neighbour.y) >= self.config.grow_threshold
                {
                    visited[index(neighbour)] = true;
                    stack.push(neighbour);
                }
            }
        }
        blob
    }

    fn to_pixel_box(blob: &[Cell], chunk_size: u32) -> Rect {
        let min_x = blob.iter().map(|c| c.x).min().unwrap_or(0);
        let min_y = blob.iter().map(|c| c.y).min().unwrap_or(0);
        let max_x = blob.iter().map(|c| c.x).max().unwrap_or(0);
        let max_y = blob.iter().map(|c| c.y).max().unwrap_or(0);
        Rect::new(
            min_x * chunk_size,
            min_y * chunk_size,
            (max_x + 1) * chunk_size,
            (max_y + 1) * chunk_size,
        )
    }
}

impl ObjectDetector for BlobDetector {
    fn detect(&self, image: &GrayImage) -> Vec<Rect> {
        let grid = LumaGrid::from_image(image, self.config.chunk_size);
        if grid.is_empty() {
            return Vec::new();
        }

        let total_chunks = grid.means.len();
        let max_chunks = (total_chunks as f64 * self.config.max_coverage).floor() as usize;
        let mut visited = vec![false; total_chunks];
        let mut boxes = Vec::new();

        for peak in self.find_peaks(&grid) {
            if visited[(peak.y * grid.grid_width + peak.x) as usize] {
                continue;
            }
            let blob = self.grow_from_peak(peak, &grid, &mut visited);
            if blob.len() < self.config.min_chunks || blob.len() > max_chunks {
                tracing::trace!(chunks = blob.len(), "Discarding blob outside size limits");
                continue;
            }
            boxes.push(Self::to_pixel_box(&blob, grid.chunk_size));
        }

        boxes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn paint(image: &mut GrayImage, rect: Rect, value: u8) {
        for y in rect.y1..rect.y2 {
            for x in rect.x1..rect.x2 {
                image.put_pixel(x, y, Luma([value]));
            }
        }
    }

    #[test]
    fn finds_single_dark_spot() {
        let mut image = GrayImage::from_pixel(64, 64, Luma([220]));
        paint(&mut image, Rect::new(16, 16, 24, 24), 10);

        let boxes = BlobDetector::default().detect(&image);
        assert_eq!(boxes, vec![Rect::new(16, 16, 24, 24)]);
    }

    #[test]
    fn finds_two_separated_spots_in_scan_order() {
        let mut image = GrayImage::from_pixel(96, 48, Luma([200]));
        paint(&mut image, Rect::new(64, 16, 76, 28), 20);
        paint(&mut image, Rect::new(16, 16, 28, 28), 20);

        let boxes = BlobDetector::default().detect(&image);
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0], Rect::new(16, 16, 28, 28));
        assert_eq!(boxes[1], Rect::new(64, 16, 76, 28));
    }

    #[test]
    fn uniform_image_has_no_blobs() {
        let image = GrayImage::from_pixel(40, 40, Luma([128]));
        assert!(BlobDetector::default().detect(&image).is_empty());
    }

    #[test]
    fn oversized_dark_region_is_ignored() {
        let mut image = GrayImage::from_pixel(40, 40, Luma([200]));
        paint(&mut image, Rect::new(0, 0, 40, 24), 5);
        assert!(BlobDetector::default().detect(&image).is_empty());
    }

    #[test]
    fn speckle_below_min_chunks_is_ignored() {
        let mut image = GrayImage::from_pixel(40, 40, Luma([200]));
        paint(&mut image, Rect::new(8, 8, 12, 12), 0);
        assert!(BlobDetector::default().detect(&image).is_empty());
    }
}
