// THEORY:
// The `detector` module is the seam between the localization policy and whatever
// actually finds faces and eyes. The localizer never knows whether boxes come from
// a Haar cascade, a neural network or the built-in `BlobDetector`; it only asks for
// a set of axis-aligned boxes over a grayscale raster.
//
// Key architectural principles:
// 1.  **Infallible Contract**: `detect` returns a possibly empty list and never an
//     error. Adapters that can fail internally log the failure and report nothing,
//     which the tiered localizer then absorbs as "no detection".
// 2.  **Shared, Read-only Handles**: Detectors are built once at start-up and
//     shared across requests through `Arc`, hence the `Send + Sync` bound.
// 3.  **Purpose-specific Slots**: The `Detectors` bundle distinguishes the eye
//     detector used inside a face from the one used on the whole image, because
//     the two passes are tuned differently.

use crate::core_modules::region::Rect;
use image::GrayImage;
use std::sync::Arc;

/// Finds objects in a grayscale raster and reports their bounding boxes
/// in that raster's pixel coordinates.
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, image: &GrayImage) -> Vec<Rect>;
}

impl<T: ObjectDetector + ?Sized> ObjectDetector for Arc<T> {
    fn detect(&self, image: &GrayImage) -> Vec<Rect> {
        (**self).detect(image)
    }
}

/// A detector that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDetector;

impl ObjectDetector for NullDetector {
    fn detect(&self, _image: &GrayImage) -> Vec<Rect> {
        Vec::new()
    }
}

/// The detector handles used by the localizer.
#[derive(Clone)]
pub struct Detectors {
    pub face: Arc<dyn ObjectDetector>,
    /// Runs on the upper part of a detected face.
    pub eye_in_face: Arc<dyn ObjectDetector>,
    /// Runs on the whole photograph when no face was found.
    pub eye: Arc<dyn ObjectDetector>,
}

impl Detectors {
    /// Uses the same eye detector for both eye passes.
    pub fn new(face: Arc<dyn ObjectDetector>, eye: Arc<dyn ObjectDetector>) -> Self {
        Self {
            face,
            eye_in_face: eye.clone(),
            eye,
        }
    }

    pub fn with_eye_in_face(mut self, eye_in_face: Arc<dyn ObjectDetector>) -> Self {
        self.eye_in_face = eye_in_face;
        self
    }

    /// No detection capability at all: every photograph takes the universal fallback.
    pub fn none() -> Self {
        Self::new(Arc::new(NullDetector), Arc::new(NullDetector))
    }
}

impl std::fmt::Debug for Detectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detectors").finish_non_exhaustive()
    }
}
