// THEORY:
// This file is the entry point of the `cataract_screen` library crate. It exposes the
// `ScreeningPipeline` and its data contracts (`Photograph`, `EyeRegion`,
// `DiagnosticRecord`, `ScreeningResult`) as the high-level interface of the
// screening engine, together with the two ports a host must supply: an
// `ObjectDetector` for faces and eyes and a `Classifier` for eye crops.
//
// The engine itself performs no network or model I/O. Hosts build detectors and a
// classifier once at start-up, wrap them in `Arc`, and share one pipeline across
// every request.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod utils;

pub use config::{ScreeningConfig, Validate};
pub use core_modules::blob_detector::{BlobDetector, BlobDetectorConfig};
pub use core_modules::classifier::{Classifier, ClassifierResult, EnsembleClassifier};
pub use core_modules::decision::{DEFAULT_CONFIDENCE_THRESHOLD, Verdict, decide};
pub use core_modules::detector::{Detectors, NullDetector, ObjectDetector};
pub use core_modules::localizer::{EyeOrientation, Localization, Localizer, LocalizerConfig, Tier};
pub use core_modules::photograph::Photograph;
pub use core_modules::region::{EyeRegion, Rect, Side};
pub use error::{ClassifierError, Result, ScreeningError};
pub use pipeline::{DiagnosticRecord, RecordSummary, ScreeningPipeline, ScreeningResult, ScreeningSummary};
pub use report::{CropArchive, ReportSink};
