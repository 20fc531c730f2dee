// THEORY:
// The `Localizer` turns an arbitrary photograph (a full face, a close-up of both
// eyes, or a macro shot of one eye) into one or two labeled eye crops. It is the
// first stage of the screening engine and it is not allowed to fail: a medical
// screening tool must not reject an image outright.
//
// Key architectural principles:
// 1.  **Ordered Tiers**: Localization is an explicit, ordered list of `Tier`s, each
//     with a guard (does this tier apply to the scene?) and a producer (build the
//     regions, or decline). The first tier that produces regions wins. The guards
//     are mutually exclusive with everything before them, so exactly one tier
//     produces the output of a call.
// 2.  **Detect Once**: Face detection runs once per photograph and is shared by
//     every tier through the `Scene`, so tiers never disagree about whether a
//     face exists.
// 3.  **Guaranteed Output**: The last tier (`WholeImage`) has no precondition
//     beyond "no face" and always produces the full photograph, and the face
//     split tier always produces two halves once a face exists. Detector
//     weirdness (boxes outside the raster, empty boxes) is absorbed by clipping
//     and filtering, never propagated.
// 4.  **Explicit Orientation**: Which on-screen side is the patient's right eye is
//     a policy (`EyeOrientation`), not a detection fact.

use crate::core_modules::detector::Detectors;
use crate::core_modules::photograph::Photograph;
use crate::core_modules::region::{EyeRegion, Rect, Side};
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// How image-space left/right map onto the patient's eyes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EyeOrientation {
    /// Selfie-style: the leftmost region in the image is the patient's right eye.
    #[default]
    Mirrored,
    /// Photographed by someone else: the leftmost region is the patient's left eye.
    Direct,
}

impl EyeOrientation {
    /// Sides for the (leftmost, rightmost) regions in image space.
    pub fn sides(&self) -> (Side, Side) {
        match self {
            EyeOrientation::Mirrored => (Side::RightEye, Side::LeftEye),
            EyeOrientation::Direct => (Side::LeftEye, Side::RightEye),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizerConfig {
    /// Fraction of the face height, from the top, searched for eyes.
    pub upper_face_fraction: f64,
    /// Padding around each eye of a detected pair, as a fraction of the eye box.
    pub paired_eye_padding: f64,
    /// Padding around a lone eye, as a fraction of the eye box width.
    pub single_eye_padding: f64,
    pub orientation: EyeOrientation,
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            upper_face_fraction: 0.45,
            paired_eye_padding: 0.25,
            single_eye_padding: 0.30,
            orientation: EyeOrientation::Mirrored,
        }
    }
}

/// One strategy of the localization policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Two eyes detected inside the upper part of the largest face.
    FacePair,
    /// A face exists but its eyes could not be paired: split the upper face in two.
    FaceSplit,
    /// No face: the largest eye found anywhere in the photograph.
    SingleEye,
    /// Nothing found: the whole photograph.
    WholeImage,
}

impl Tier {
    /// Evaluation order.
    pub const ORDER: [Tier; 4] = [Tier::FacePair, Tier::FaceSplit, Tier::SingleEye, Tier::WholeImage];

    pub fn name(&self) -> &'static str {
        match self {
            Tier::FacePair => "face-pair",
            Tier::FaceSplit => "face-split",
            Tier::SingleEye => "single-eye",
            Tier::WholeImage => "whole-image",
        }
    }

    fn applies(&self, scene: &Scene<'_>) -> bool {
        match self {
            Tier::FacePair | Tier::FaceSplit => scene.face.is_some(),
            Tier::SingleEye | Tier::WholeImage => scene.face.is_none(),
        }
    }
}

/// Per-call detection state shared by all tiers.
struct Scene<'a> {
    photo: &'a Photograph,
    gray: GrayImage,
    /// The largest usable face, clipped to the photograph.
    face: Option<Rect>,
}

/// The outcome of one localization call.
#[derive(Debug, Clone)]
pub struct Localization {
    pub tier: Tier,
    pub regions: Vec<EyeRegion>,
}

#[derive(Clone)]
pub struct Localizer {
    detectors: Detectors,
    config: LocalizerConfig,
}

impl Localizer {
    pub fn new(detectors: Detectors, config: LocalizerConfig) -> Self {
        Self { detectors, config }
    }

    /// Produces one or two eye regions, right eye first when both exist.
    pub fn localize(&self, photo: &Photograph) -> Vec<EyeRegion> {
        self.localize_with_tier(photo).regions
    }

    pub fn localize_with_tier(&self, photo: &Photograph) -> Localization {
        let scene = self.build_scene(photo);

        for tier in Tier::ORDER {
            if let Some(regions) = self.attempt(tier, &scene) {
                tracing::debug!(tier = tier.name(), regions = regions.len(), "Localized eye regions");
                return Localization { tier, regions };
            }
        }

        // Unreachable while WholeImage closes the no-face branch and FaceSplit the face branch.
        Localization {
            tier: Tier::WholeImage,
            regions: vec![Self::whole_image(photo)],
        }
    }

    /// Runs a single tier in isolation. `None` when its guard fails or it declines.
    pub fn run_tier(&self, tier: Tier, photo: &Photograph) -> Option<Vec<EyeRegion>> {
        let scene = self.build_scene(photo);
        self.attempt(tier, &scene)
    }

    fn build_scene<'a>(&self, photo: &'a Photograph) -> Scene<'a> {
        let gray = photo.to_luma();
        let face = Self::select_face(&self.detectors.face.detect(&gray), photo.width(), photo.height());
        if let Some(face) = face {
            tracing::trace!(?face, "Selected largest face");
        }
        Scene { photo, gray, face }
    }

    fn attempt(&self, tier: Tier, scene: &Scene<'_>) -> Option<Vec<EyeRegion>> {
        if !tier.applies(scene) {
            return None;
        }
        match tier {
            Tier::FacePair => self.face_pair(scene),
            Tier::FaceSplit => self.face_split(scene),
            Tier::SingleEye => self.single_eye(scene),
            Tier::WholeImage => Some(vec![Self::whole_image(scene.photo)]),
        }
    }

    /// Largest face by area, first found on ties. Faces narrower than two pixels
    /// cannot be split into halves and are ignored.
    fn select_face(faces: &[Rect], width: u32, height: u32) -> Option<Rect> {
        faces
            .iter()
            .map(|face| face.clip(width, height))
            .filter(|face| face.width() >= 2 && face.height() >= 1)
            .fold(None, |best: Option<Rect>, face| match best {
                Some(current) if current.area() >= face.area() => Some(current),
                _ => Some(face),
            })
    }

    /// Largest box by area, first found on ties.
    fn largest(boxes: &[Rect]) -> Option<Rect> {
        boxes.iter().copied().fold(None, |best: Option<Rect>, candidate| match best {
            Some(current) if current.area() >= candidate.area() => Some(current),
            _ => Some(candidate),
        })
    }

    /// The upper band of a face where the eyes are searched for.
    fn eye_band(&self, face: Rect) -> Rect {
        let band_height = ((face.height() as f64 * self.config.upper_face_fraction).floor() as u32)
            .clamp(1, face.height());
        Rect::new(face.x1, face.y1, face.x2, face.y1 + band_height)
    }

    /// Runs a detector on a sub-rectangle of the grayscale scene and maps the
    /// surviving boxes back to photograph coordinates.
    fn detect_within(&self, scene: &Scene<'_>, area: Rect) -> Vec<Rect> {
        let sub = image::imageops::crop_imm(&scene.gray, area.x1, area.y1, area.width(), area.height())
            .to_image();
        self.detectors
            .eye_in_face
            .detect(&sub)
            .into_iter()
            .map(|eye| eye.clip(area.width(), area.height()))
            .filter(|eye| !eye.is_empty())
            .map(|eye| eye.offset(area.x1, area.y1))
            .collect()
    }

    fn region(photo: &Photograph, side: Side, bounds: Rect) -> EyeRegion {
        EyeRegion::new(side, bounds, photo.crop(bounds))
    }

    fn face_pair(&self, scene: &Scene<'_>) -> Option<Vec<EyeRegion>> {
        let face = scene.face?;
        let band = self.eye_band(face);
        let mut eyes = self.detect_within(scene, band);
        if eyes.len() < 2 {
            tracing::debug!(candidates = eyes.len(), "Too few eyes inside face");
            return None;
        }

        eyes.sort_by_key(|eye| eye.x1);
        let (left_side, right_side) = self.config.orientation.sides();
        let (width, height) = (scene.photo.width(), scene.photo.height());
        let padding = self.config.paired_eye_padding;

        let mut regions: Vec<EyeRegion> = eyes
            .iter()
            .take(2)
            .zip([left_side, right_side])
            .map(|(eye, side)| {
                let pad_x = (eye.width() as f64 * padding).floor() as u32;
                let pad_y = (eye.height() as f64 * padding).floor() as u32;
                Self::region(scene.photo, side, eye.pad_and_clip(pad_x, pad_y, width, height))
            })
            .collect();
        regions.sort_by_key(|region| region.side.rank());
        Some(regions)
    }

    fn face_split(&self, scene: &Scene<'_>) -> Option<Vec<EyeRegion>> {
        let face = scene.face?;
        let band = self.eye_band(face);
        let mid_x = face.x1 + face.width() / 2;
        let (left_side, right_side) = self.config.orientation.sides();

        let mut regions = vec![
            Self::region(scene.photo, left_side, Rect::new(band.x1, band.y1, mid_x, band.y2)),
            Self::region(scene.photo, right_side, Rect::new(mid_x, band.y1, band.x2, band.y2)),
        ];
        regions.sort_by_key(|region| region.side.rank());
        Some(regions)
    }

    fn single_eye(&self, scene: &Scene<'_>) -> Option<Vec<EyeRegion>> {
        let (width, height) = (scene.photo.width(), scene.photo.height());
        let eyes: Vec<Rect> = self
            .detectors
            .eye
            .detect(&scene.gray)
            .into_iter()
            .map(|eye| eye.clip(width, height))
            .filter(|eye| !eye.is_empty())
            .collect();

        let eye = Self::largest(&eyes)?;
        let pad = (eye.width() as f64 * self.config.single_eye_padding).floor() as u32;
        let bounds = eye.pad_and_clip(pad, pad, width, height);
        Some(vec![Self::region(scene.photo, Side::DetectedEye, bounds)])
    }

    fn whole_image(photo: &Photograph) -> EyeRegion {
        EyeRegion::new(Side::DetectedEye, photo.bounds(), photo.as_rgb().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::detector::{NullDetector, ObjectDetector};
    use image::{Rgb, RgbImage};
    use std::sync::Arc;

    /// Returns the same boxes for every raster.
    struct FixedDetector(Vec<Rect>);

    impl ObjectDetector for FixedDetector {
        fn detect(&self, _image: &GrayImage) -> Vec<Rect> {
            self.0.clone()
        }
    }

    fn photo(width: u32, height: u32) -> Photograph {
        let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 7]));
        Photograph::from_rgb(image).unwrap()
    }

    fn localizer(face: Vec<Rect>, eye_in_face: Vec<Rect>, eye: Vec<Rect>) -> Localizer {
        let detectors = Detectors::new(Arc::new(FixedDetector(face)), Arc::new(FixedDetector(eye)))
            .with_eye_in_face(Arc::new(FixedDetector(eye_in_face)));
        Localizer::new(detectors, LocalizerConfig::default())
    }

    #[test]
    fn face_pair_pads_and_labels_leftmost_as_right_eye() {
        let loc = localizer(
            vec![Rect::from_xywh(100, 100, 200, 200)],
            // Relative to the 200x90 eye band; reported right-to-left on purpose.
            vec![Rect::from_xywh(120, 30, 40, 20), Rect::from_xywh(40, 30, 40, 20)],
            vec![],
        );

        let result = loc.localize_with_tier(&photo(400, 400));
        assert_eq!(result.tier, Tier::FacePair);
        assert_eq!(result.regions.len(), 2);
        assert_eq!(result.regions[0].side, Side::RightEye);
        assert_eq!(result.regions[0].bounds, Rect::new(130, 125, 190, 155));
        assert_eq!(result.regions[1].side, Side::LeftEye);
        assert_eq!(result.regions[1].bounds, Rect::new(210, 125, 270, 155));
        assert_eq!(result.regions[0].crop.dimensions(), (60, 30));
    }

    #[test]
    fn face_pair_keeps_two_leftmost_of_many() {
        let loc = localizer(
            vec![Rect::from_xywh(0, 0, 300, 300)],
            vec![
                Rect::from_xywh(200, 10, 20, 20),
                Rect::from_xywh(10, 10, 20, 20),
                Rect::from_xywh(100, 10, 20, 20),
            ],
            vec![],
        );

        let regions = loc.localize(&photo(300, 300));
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].bounds.x1, 5);
        assert_eq!(regions[1].bounds.x1, 95);
    }

    #[test]
    fn direct_orientation_swaps_labels_but_keeps_right_first() {
        let detectors = Detectors::new(
            Arc::new(FixedDetector(vec![Rect::from_xywh(0, 0, 200, 200)])),
            Arc::new(NullDetector),
        )
        .with_eye_in_face(Arc::new(FixedDetector(vec![
            Rect::from_xywh(20, 20, 40, 40),
            Rect::from_xywh(120, 20, 40, 40),
        ])));
        let config = LocalizerConfig {
            orientation: EyeOrientation::Direct,
            ..LocalizerConfig::default()
        };

        let regions = Localizer::new(detectors, config).localize(&photo(200, 200));
        assert_eq!(regions[0].side, Side::RightEye);
        assert!(regions[0].bounds.x1 > regions[1].bounds.x1);
        assert_eq!(regions[1].side, Side::LeftEye);
    }

    #[test]
    fn face_with_one_eye_splits_upper_face() {
        let loc = localizer(
            vec![Rect::from_xywh(40, 20, 100, 120)],
            vec![Rect::from_xywh(10, 10, 20, 20)],
            vec![Rect::from_xywh(0, 0, 50, 50)],
        );

        let result = loc.localize_with_tier(&photo(200, 200));
        assert_eq!(result.tier, Tier::FaceSplit);
        assert_eq!(result.regions[0].side, Side::RightEye);
        assert_eq!(result.regions[0].bounds, Rect::new(40, 20, 90, 74));
        assert_eq!(result.regions[1].side, Side::LeftEye);
        assert_eq!(result.regions[1].bounds, Rect::new(90, 20, 140, 74));
    }

    #[test]
    fn largest_face_wins_first_on_ties() {
        let loc = localizer(
            vec![
                Rect::from_xywh(0, 0, 20, 20),
                Rect::from_xywh(50, 0, 40, 40),
                Rect::from_xywh(100, 0, 40, 40),
            ],
            vec![],
            vec![],
        );

        let regions = loc.localize(&photo(200, 100));
        assert_eq!(regions[0].bounds.x1, 50);
        assert_eq!(regions[1].bounds.x2, 90);
    }

    #[test]
    fn no_face_uses_largest_eye_with_width_padding() {
        let loc = localizer(
            vec![],
            vec![],
            vec![Rect::from_xywh(10, 10, 10, 10), Rect::from_xywh(50, 40, 40, 20)],
        );

        let result = loc.localize_with_tier(&photo(200, 200));
        assert_eq!(result.tier, Tier::SingleEye);
        assert_eq!(result.regions.len(), 1);
        assert_eq!(result.regions[0].side, Side::DetectedEye);
        assert_eq!(result.regions[0].bounds, Rect::new(38, 28, 102, 72));
    }

    #[test]
    fn nothing_detected_returns_whole_photograph() {
        let loc = Localizer::new(Detectors::none(), LocalizerConfig::default());
        let source = photo(37, 21);

        let result = loc.localize_with_tier(&source);
        assert_eq!(result.tier, Tier::WholeImage);
        assert_eq!(result.regions.len(), 1);
        assert_eq!(result.regions[0].side, Side::DetectedEye);
        assert_eq!(result.regions[0].bounds, Rect::full(37, 21));
        assert_eq!(&result.regions[0].crop, source.as_rgb());
    }

    #[test]
    fn out_of_range_detections_are_clipped() {
        let loc = localizer(vec![], vec![], vec![Rect::new(90, 90, 500, 500)]);
        let regions = loc.localize(&photo(100, 100));
        assert_eq!(regions.len(), 1);
        assert!(regions[0].bounds.is_within(100, 100));
        assert!(!regions[0].crop.is_empty());
    }

    #[test]
    fn degenerate_faces_fall_through_to_eye_tiers() {
        let loc = localizer(
            vec![Rect::new(500, 500, 600, 600), Rect::from_xywh(3, 3, 1, 50)],
            vec![],
            vec![],
        );
        let result = loc.localize_with_tier(&photo(64, 64));
        assert_eq!(result.tier, Tier::WholeImage);
    }

    #[test]
    fn tiny_photographs_still_localize() {
        let loc = localizer(vec![Rect::from_xywh(0, 0, 2, 1)], vec![], vec![]);
        let regions = loc.localize(&photo(2, 1));
        assert_eq!(regions.len(), 2);
        for region in &regions {
            assert!(region.bounds.is_within(2, 1));
            assert_eq!(region.crop.dimensions(), (1, 1));
        }
    }

    #[test]
    fn tier_guards_are_exclusive() {
        let with_face = localizer(vec![Rect::from_xywh(0, 0, 50, 50)], vec![], vec![]);
        let source = photo(50, 50);
        assert!(with_face.run_tier(Tier::SingleEye, &source).is_none());
        assert!(with_face.run_tier(Tier::WholeImage, &source).is_none());
        assert!(with_face.run_tier(Tier::FaceSplit, &source).is_some());

        let without_face = localizer(vec![], vec![], vec![]);
        assert!(without_face.run_tier(Tier::FacePair, &source).is_none());
        assert!(without_face.run_tier(Tier::FaceSplit, &source).is_none());
        assert!(without_face.run_tier(Tier::WholeImage, &source).is_some());
    }
}
