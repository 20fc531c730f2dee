use crate::convert::rgb_to_mat;
use anyhow::{Context, bail};
use cataract_screen::{Classifier, ClassifierError, ClassifierResult};
use image::RgbImage;
use opencv::{
    core::{self, Mat, Scalar, Size, Vector},
    dnn::{self, Net},
    imgproc,
    prelude::*,
};
use std::path::Path;
use std::sync::Mutex;

const INPUT_SIZE: i32 = 224;
const BEN_SIGMA: f64 = 10.0;
const CLAHE_CLIP_LIMIT: f64 = 2.0;
const CLAHE_TILES: i32 = 8;
const IMAGENET_MEAN: [f64; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f64; 3] = [0.229, 0.224, 0.225];

/// An ONNX eye classifier run through OpenCV's DNN module.
///
/// Crops go through the same enhancement the model was trained on: Ben Graham
/// local-contrast boost, CLAHE on the Lab lightness channel, a 224x224 resize and
/// ImageNet normalization. The network must emit one logit per label.
pub struct OnnxClassifier {
    net: Mutex<Net>,
    labels: Vec<String>,
}

impl OnnxClassifier {
    pub fn load(path: &Path, labels: Vec<String>) -> anyhow::Result<Self> {
        if labels.is_empty() {
            bail!("at least one class label is required");
        }
        let net = dnn::read_net_from_onnx(&path.to_string_lossy())
            .with_context(|| format!("failed to load model {}", path.display()))?;
        if net.empty()? {
            bail!("model {} has no layers", path.display());
        }
        tracing::info!("Loaded classifier {} with labels {:?}", path.display(), labels);

        Ok(Self {
            net: Mutex::new(net),
            labels,
        })
    }

    fn infer(&self, region: &RgbImage) -> opencv::Result<Vec<f32>> {
        let input = preprocess(region)?;
        let blob = dnn::blob_from_image(
            &input,
            1.0,
            Size::new(INPUT_SIZE, INPUT_SIZE),
            Scalar::default(),
            false,
            false,
            core::CV_32F,
        )?;

        let mut net = self
            .net
            .lock()
            .map_err(|_| opencv::Error::new(core::StsError, "network lock poisoned"))?;
        net.set_input(&blob, "", 1.0, Scalar::default())?;
        let output = net.forward_single("")?;
        Ok(output.data_typed::<f32>()?.to_vec())
    }
}

impl Classifier for OnnxClassifier {
    fn classify(&self, region: &RgbImage) -> Result<ClassifierResult, ClassifierError> {
        let logits = self
            .infer(region)
            .map_err(|e| ClassifierError::new(format!("inference failed: {e}")))?;
        ClassifierResult::from_logits(&logits, self.labels.as_slice())
    }
}

/// Ben Graham enhancement followed by CLAHE, resize and per-channel normalization.
fn preprocess(region: &RgbImage) -> opencv::Result<Mat> {
    let rgb = rgb_to_mat(region)?;

    // 4 * img - 4 * blur(img) + 128, saturated back to 8 bits.
    let mut blurred = Mat::default();
    imgproc::gaussian_blur(&rgb, &mut blurred, Size::new(0, 0), BEN_SIGMA, 0.0, core::BORDER_DEFAULT)?;
    let mut enhanced = Mat::default();
    core::add_weighted(&rgb, 4.0, &blurred, -4.0, 128.0, &mut enhanced, -1)?;

    let mut lab = Mat::default();
    imgproc::cvt_color(&enhanced, &mut lab, imgproc::COLOR_RGB2Lab, 0)?;
    let mut channels = Vector::<Mat>::new();
    core::split(&lab, &mut channels)?;
    let mut clahe = imgproc::create_clahe(CLAHE_CLIP_LIMIT, Size::new(CLAHE_TILES, CLAHE_TILES))?;
    let mut lightness = Mat::default();
    clahe.apply(&channels.get(0)?, &mut lightness)?;
    channels.set(0, lightness)?;
    let mut merged = Mat::default();
    core::merge(&channels, &mut merged)?;
    let mut equalized = Mat::default();
    imgproc::cvt_color(&merged, &mut equalized, imgproc::COLOR_Lab2RGB, 0)?;

    let mut resized = Mat::default();
    imgproc::resize(
        &equalized,
        &mut resized,
        Size::new(INPUT_SIZE, INPUT_SIZE),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;

    // (x / 255 - mean) / std, one plane at a time.
    let mut planes = Vector::<Mat>::new();
    core::split(&resized, &mut planes)?;
    let mut normalized = Vector::<Mat>::new();
    for (index, plane) in planes.iter().enumerate() {
        let mut scaled = Mat::default();
        plane.convert_to(
            &mut scaled,
            core::CV_32F,
            1.0 / (255.0 * IMAGENET_STD[index]),
            -IMAGENET_MEAN[index] / IMAGENET_STD[index],
        )?;
        normalized.push(scaled);
    }
    let mut input = Mat::default();
    core::merge(&normalized, &mut input)?;
    Ok(input)
}
