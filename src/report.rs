use crate::core_modules::photograph::Photograph;
use crate::core_modules::region::Side;
use crate::error::{Result, ScreeningError};
use crate::pipeline::ScreeningResult;
use crate::utils::image_helper::{draw_outline, save_png};
use image::Rgb;
use std::fs;
use std::path::PathBuf;

/// Consumes a finished screening and stores whatever document it composes.
/// Returns a locator for the stored report.
pub trait ReportSink: Send + Sync {
    fn publish(&self, photo: &Photograph, result: &ScreeningResult) -> Result<String>;
}

/// Stores each report as a directory named after its report id:
/// the original photograph, an annotated copy, every eye crop and `summary.json`.
#[derive(Debug, Clone)]
pub struct CropArchive {
    root: PathBuf,
}

impl CropArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn crop_file_name(index: usize, side: Side) -> String {
        let slug = match side {
            Side::RightEye => "right_eye",
            Side::LeftEye => "left_eye",
            Side::DetectedEye => "detected_eye",
        };
        format!("{index}_{slug}.png")
    }
}

fn write_png(path: PathBuf, image: &image::RgbImage) -> Result<()> {
    save_png(&path, image).map_err(|e| ScreeningError::ReportError {
        message: format!("{}: {e}", path.display()),
    })
}

impl ReportSink for CropArchive {
    fn publish(&self, photo: &Photograph, result: &ScreeningResult) -> Result<String> {
        let dir = self.root.join(result.report_id.to_string());
        fs::create_dir_all(&dir)?;

        write_png(dir.join("original.png"), photo.as_rgb())?;

        let mut annotated = photo.as_rgb().clone();
        let thickness = (photo.width().min(photo.height()) / 200).max(1);
        for record in &result.records {
            draw_outline(&mut annotated, record.bounds, Rgb([0, 200, 255]), thickness);
        }
        write_png(dir.join("annotated.png"), &annotated)?;

        for (index, record) in result.records.iter().enumerate() {
            write_png(dir.join(Self::crop_file_name(index, record.side)), &record.crop)?;
        }

        let summary = serde_json::to_string_pretty(&result.summary())?;
        fs::write(dir.join("summary.json"), summary)?;

        tracing::info!(report_id = %result.report_id, "Report archived to {}", dir.display());
        Ok(dir.display().to_string())
    }
}
