// THEORY:
// The `LumaGrid` is the spatial pooling layer of the built-in detector. It slices a
// grayscale raster into square chunks and reduces every chunk to its mean
// luminance, turning hundreds of thousands of pixels into a small grid that the
// `BlobDetector` can scan for dark, compact structures such as pupils and irises.
//
// Key architectural principles:
// 1.  **Spatial Pooling**: Averaging a chunk cancels single-pixel sensor noise and
//     specular glints, so only coherent dark areas survive.
// 2.  **Whole Chunks Only**: Partial chunks at the right and bottom edges are
//     ignored. Every grid cell therefore maps back to a pixel box fully inside
//     the source raster.
// 3.  **Stateless**: A grid describes one raster; nothing is carried between calls.

use image::GrayImage;

/// Mean luminance per chunk of a grayscale raster.
#[derive(Debug, Clone)]
pub struct LumaGrid {
    /// Number of chunks per row.
    pub grid_width: u32,
    /// Number of chunk rows.
    pub grid_height: u32,
    /// Side length of one chunk in pixels.
    pub chunk_size: u32,
    /// Row-major chunk means, `grid_width * grid_height` entries.
    pub means: Vec<f64>,
    /// Mean luminance over all whole chunks.
    pub overall_mean: f64,
}

impl LumaGrid {
    pub fn from_image(image: &GrayImage, chunk_size: u32) -> Self {
        let chunk_size = chunk_size.max(1);
        let grid_width = image.width() / chunk_size;
        let grid_height = image.height() / chunk_size;
        let num_chunks = (grid_width * grid_height) as usize;
        let mut means = Vec::with_capacity(num_chunks);

        for chunk_index in 0..num_chunks {
            let chunk_x = chunk_index as u32 % grid_width;
            let chunk_y = chunk_index as u32 / grid_width;
            means.push(Self::chunk_mean(image, chunk_x * chunk_size, chunk_y * chunk_size, chunk_size));
        }

        let overall_mean = if means.is_empty() {
            0.0
        } else {
            means.iter().sum::<f64>() / means.len() as f64
        };

        Self {
            grid_width,
            grid_height,
            chunk_size,
            means,
            overall_mean,
        }
    }

    fn chunk_mean(image: &GrayImage, start_x: u32, start_y: u32, chunk_size: u32) -> f64 {
        let mut sum = 0u64;
        for y in start_y..start_y + chunk_size {
            for x in start_x..start_x + chunk_size {
                sum += image.get_pixel(x, y).0[0] as u64;
            }
        }
        sum as f64 / (chunk_size * chunk_size) as f64
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }

    pub fn mean_at(&self, x: u32, y: u32) -> f64 {
        self.means[(y * self.grid_width + x) as usize]
    }

    /// How much darker a chunk is than the raster as a whole, in `[0, 1]`.
    pub fn darkness_at(&self, x: u32, y: u32) -> f64 {
        if self.overall_mean <= 0.0 {
            return 0.0;
        }
        ((self.overall_mean - self.mean_at(x, y)) / self.overall_mean).clamp(0.0, 1.0)
    }
}
