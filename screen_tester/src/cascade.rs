use crate::convert::{from_cv_rect, gray_to_mat};
use anyhow::{Context, bail};
use cataract_screen::config::CascadeParams;
use cataract_screen::{ObjectDetector, Rect};
use image::GrayImage;
use opencv::{
    core::{self, Size, Vector},
    objdetect::CascadeClassifier,
    prelude::*,
};
use std::path::Path;
use std::sync::Mutex;

/// A Haar cascade (e.g. `haarcascade_frontalface_default.xml`) behind the detector port.
///
/// OpenCV's `detect_multi_scale` needs `&mut self`, so calls are serialized
/// through a mutex. The tuning parameters are fixed at load time.
pub struct HaarCascadeDetector {
    name: String,
    classifier: Mutex<CascadeClassifier>,
    params: CascadeParams,
}

impl HaarCascadeDetector {
    pub fn load(path: &Path, params: CascadeParams) -> anyhow::Result<Self> {
        let classifier = CascadeClassifier::new(&path.to_string_lossy())
            .with_context(|| format!("failed to load cascade {}", path.display()))?;
        if classifier.empty()? {
            bail!("cascade {} contains no stages", path.display());
        }

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cascade".to_string());
        tracing::info!("Loaded cascade {} ({:?})", name, params);

        Ok(Self {
            name,
            classifier: Mutex::new(classifier),
            params,
        })
    }

    fn run(&self, image: &GrayImage) -> opencv::Result<Vec<Rect>> {
        let mat = gray_to_mat(image)?;
        let mut objects = Vector::<core::Rect>::new();
        let min_side = self.params.min_size as i32;

        let mut classifier = self
            .classifier
            .lock()
            .map_err(|_| opencv::Error::new(core::StsError, "cascade lock poisoned"))?;
        classifier.detect_multi_scale(
            &mat,
            &mut objects,
            self.params.scale_factor,
            self.params.min_neighbors,
            0,
            Size::new(min_side, min_side),
            Size::default(),
        )?;

        Ok(objects.iter().filter_map(from_cv_rect).collect())
    }
}

impl ObjectDetector for HaarCascadeDetector {
    fn detect(&self, image: &GrayImage) -> Vec<Rect> {
        // Too small for the cascade window; OpenCV would only complain.
        if image.width() < self.params.min_size || image.height() < self.params.min_size {
            return Vec::new();
        }

        match self.run(image) {
            Ok(boxes) => {
                tracing::debug!(cascade = %self.name, hits = boxes.len(), "Cascade pass");
                boxes
            }
            Err(e) => {
                tracing::warn!(cascade = %self.name, "Cascade detection failed: {}", e);
                Vec::new()
            }
        }
    }
}
