mod cascade;
mod convert;
mod dnn_classifier;

use anyhow::Context;
use cascade::HaarCascadeDetector;
use cataract_screen::utils::logger;
use cataract_screen::{
    BlobDetector, CropArchive, Detectors, Localizer, NullDetector, ObjectDetector, Photograph,
    Rect, ReportSink, ScreeningConfig, ScreeningPipeline, Validate,
};
use clap::Parser;
use dnn_classifier::OnnxClassifier;
use futures::StreamExt;
use opencv::{
    core::{self, Scalar, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "screen_tester")]
#[command(about = "Localizes eyes in photographs and screens them for cataract indicators")]
struct Cli {
    /// Photographs to screen.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Haar cascade used to find faces (e.g. haarcascade_frontalface_default.xml).
    #[arg(long)]
    face_cascade: Option<PathBuf>,

    /// Haar cascade used to find eyes (e.g. haarcascade_eye.xml).
    #[arg(long)]
    eye_cascade: Option<PathBuf>,

    #[arg(long, help = "Use the built-in dark-blob detector for eyes instead of a cascade")]
    blob_eyes: bool,

    /// ONNX classifier. Without it only localization runs.
    #[arg(long)]
    model: Option<PathBuf>,

    #[arg(long, value_delimiter = ',', default_value = "Normal,Cataract")]
    labels: Vec<String>,

    /// TOML file overriding thresholds and detector tuning.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where reports (and annotated copies) are written.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long, help = "Write a copy of each photograph with its eye regions drawn")]
    annotate: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    json_logs: bool,

    #[arg(short, long, help = "Enable verbose output")]
    verbose: bool,
}

enum Mode {
    Localize(Localizer),
    Screen(ScreeningPipeline),
}

struct Session {
    mode: Mode,
    archive: Option<CropArchive>,
    annotate_dir: Option<PathBuf>,
}

fn build_detectors(cli: &Cli, config: &ScreeningConfig) -> anyhow::Result<Detectors> {
    let face: Arc<dyn ObjectDetector> = match &cli.face_cascade {
        Some(path) => Arc::new(HaarCascadeDetector::load(path, config.detectors.face.clone())?),
        None => {
            tracing::warn!("No face cascade given; face tiers are disabled");
            Arc::new(NullDetector)
        }
    };

    let (eye_in_face, eye): (Arc<dyn ObjectDetector>, Arc<dyn ObjectDetector>) = if cli.blob_eyes {
        let blob: Arc<dyn ObjectDetector> = Arc::new(BlobDetector::new(config.blob.clone()));
        (blob.clone(), blob)
    } else if let Some(path) = &cli.eye_cascade {
        (
            Arc::new(HaarCascadeDetector::load(path, config.detectors.eye_in_face.clone())?),
            Arc::new(HaarCascadeDetector::load(path, config.detectors.eye.clone())?),
        )
    } else {
        tracing::warn!("No eye detector given; eye tiers are disabled");
        (Arc::new(NullDetector), Arc::new(NullDetector))
    };

    Ok(Detectors::new(face, eye).with_eye_in_face(eye_in_face))
}

fn annotate(photo: &Photograph, regions: &[(Rect, String)], path: &Path) -> opencv::Result<()> {
    let rgb = convert::rgb_to_mat(photo.as_rgb())?;
    let mut canvas = Mat::default();
    imgproc::cvt_color(&rgb, &mut canvas, imgproc::COLOR_RGB2BGR, 0)?;

    let thickness = ((photo.width().min(photo.height()) / 200).max(1)) as i32;
    for (bounds, caption) in regions {
        let rect = convert::to_cv_rect(*bounds);
        let color = Scalar::new(255.0, 200.0, 0.0, 0.0);
        imgproc::rectangle(&mut canvas, rect, color, thickness, imgproc::LINE_8, 0)?;
        imgproc::put_text(
            &mut canvas,
            caption,
            core::Point::new(rect.x, (rect.y - 4).max(12)),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.4,
            color,
            1,
            imgproc::LINE_AA,
            false,
        )?;
    }

    imgcodecs::imwrite(&path.to_string_lossy(), &canvas, &Vector::new())?;
    Ok(())
}

fn annotation_path(dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "photo".to_string());
    dir.join(format!("{stem}_regions.png"))
}

async fn process(session: Arc<Session>, input: PathBuf) -> anyhow::Result<serde_json::Value> {
    let path = input.clone();
    let photo = tokio::task::spawn_blocking(move || Photograph::open(&path))
        .await?
        .with_context(|| format!("cannot read {}", input.display()))?;

    match &session.mode {
        Mode::Localize(localizer) => {
            let localizer = localizer.clone();
            let source = photo.clone();
            let localization = tokio::task::spawn_blocking(move || localizer.localize_with_tier(&source)).await?;
            if let Some(dir) = &session.annotate_dir {
                let captioned: Vec<(Rect, String)> = localization
                    .regions
                    .iter()
                    .map(|region| (region.bounds, region.side.to_string()))
                    .collect();
                annotate(&photo, &captioned, &annotation_path(dir, &input))?;
            }

            let regions: Vec<serde_json::Value> = localization
                .regions
                .iter()
                .map(|region| json!({ "side": region.side, "bounds": region.bounds }))
                .collect();
            Ok(json!({
                "input": input.display().to_string(),
                "tier": localization.tier.name(),
                "regions": regions,
            }))
        }
        Mode::Screen(pipeline) => {
            let result = pipeline.screen_concurrent(&photo).await?;

            if let Some(dir) = &session.annotate_dir {
                let captioned: Vec<(Rect, String)> = result
                    .records
                    .iter()
                    .map(|record| {
                        (
                            record.bounds,
                            format!("{}: {} ({:.1}%)", record.side, record.final_label, record.confidence * 100.0),
                        )
                    })
                    .collect();
                annotate(&photo, &captioned, &annotation_path(dir, &input))?;
            }

            let report = match &session.archive {
                Some(archive) => Some(archive.publish(&photo, &result)?),
                None => None,
            };

            Ok(json!({
                "input": input.display().to_string(),
                "summary": result.summary(),
                "report": report,
            }))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_logger(cli.verbose);
    }

    let config = match &cli.config {
        Some(path) => ScreeningConfig::from_toml_file(path)?,
        None => ScreeningConfig::default(),
    };
    config.validate()?;
    if cli.verbose {
        tracing::debug!("Screening config: {:?}", config);
    }

    if cli.annotate && cli.output_dir.is_none() {
        anyhow::bail!("--annotate needs --output-dir");
    }
    if let Some(dir) = &cli.output_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    }

    let detectors = build_detectors(&cli, &config)?;
    let mode = match &cli.model {
        Some(model) => {
            let classifier = Arc::new(OnnxClassifier::load(model, cli.labels.clone())?);
            let pipeline = ScreeningPipeline::from_config(&config, detectors, classifier);
            tracing::info!("Verdicts below {:.2} confidence are reported as inconclusive", pipeline.threshold());
            Mode::Screen(pipeline)
        }
        None => {
            tracing::info!("No model given; running localization only");
            Mode::Localize(Localizer::new(detectors, config.localizer.clone()))
        }
    };

    let session = Arc::new(Session {
        mode,
        archive: match (&cli.model, &cli.output_dir) {
            (Some(_), Some(dir)) => Some(CropArchive::new(dir)),
            _ => None,
        },
        annotate_dir: cli.annotate.then(|| cli.output_dir.clone()).flatten(),
    });

    let workers = num_cpus::get().max(1);
    tracing::info!("Screening {} photograph(s) with {} workers", cli.inputs.len(), workers);

    let mut outcomes = futures::stream::iter(cli.inputs.clone())
        .map(|input| {
            let worker = tokio::spawn(process(session.clone(), input.clone()));
            async move {
                let outcome = match worker.await {
                    Ok(outcome) => outcome,
                    Err(e) => Err(anyhow::Error::from(e)),
                };
                (input, outcome)
            }
        })
        .buffered(workers);

    let mut failures = 0usize;
    while let Some((input, outcome)) = outcomes.next().await {
        match outcome {
            Ok(value) => println!("{}", serde_json::to_string(&value)?),
            Err(e) => {
                failures += 1;
                tracing::error!("❌ {}: {:#}", input.display(), e);
            }
        }
    }

    if failures > 0 {
        tracing::error!("{} of {} photograph(s) failed", failures, cli.inputs.len());
        std::process::exit(1);
    }

    tracing::info!("✅ Screening complete");
    Ok(())
}
