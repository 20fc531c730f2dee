use crate::core_modules::blob_detector::BlobDetectorConfig;
use crate::core_modules::localizer::LocalizerConfig;
use crate::error::{Result, ScreeningError};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Tuning knobs of a sliding-window cascade detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeParams {
    /// Image pyramid step between scales; must be greater than 1.
    pub scale_factor: f64,
    /// Overlapping hits needed before a candidate is kept.
    pub min_neighbors: i32,
    /// Smallest object side, in pixels.
    pub min_size: u32,
}

impl CascadeParams {
    pub const fn new(scale_factor: f64, min_neighbors: i32, min_size: u32) -> Self {
        Self {
            scale_factor,
            min_neighbors,
            min_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorTuning {
    pub face: CascadeParams,
    pub eye_in_face: CascadeParams,
    pub eye: CascadeParams,
}

impl Default for DetectorTuning {
    fn default() -> Self {
        Self {
            face: CascadeParams::new(1.1, 5, 120),
            eye_in_face: CascadeParams::new(1.05, 5, 30),
            eye: CascadeParams::new(1.1, 3, 40),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningConfig {
    pub confidence_threshold: f64,
    /// Per-call classifier budget for concurrent screening. `None` waits forever.
    pub classifier_timeout_ms: Option<u64>,
    pub localizer: LocalizerConfig,
    pub detectors: DetectorTuning,
    pub blob: BlobDetectorConfig,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: crate::core_modules::decision::DEFAULT_CONFIDENCE_THRESHOLD,
            classifier_timeout_ms: None,
            localizer: LocalizerConfig::default(),
            detectors: DetectorTuning::default(),
            blob: BlobDetectorConfig::default(),
        }
    }
}

impl ScreeningConfig {
    /// Parses and validates a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ScreeningConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        tracing::debug!("Loading screening config from {}", path.display());
        Self::from_toml_str(&content)
    }
}

fn config_error(message: String) -> ScreeningError {
    ScreeningError::ConfigError { message }
}

fn validate_fraction(field: &str, value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(config_error(format!("{field} must be in (0, 1], got {value}")))
    }
}

fn validate_padding(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(config_error(format!("{field} must be a non-negative number, got {value}")))
    }
}

impl Validate for CascadeParams {
    fn validate(&self) -> Result<()> {
        if !(self.scale_factor > 1.0 && self.scale_factor.is_finite()) {
            return Err(config_error(format!(
                "scale_factor must be greater than 1, got {}",
                self.scale_factor
            )));
        }
        if self.min_neighbors < 0 {
            return Err(config_error(format!(
                "min_neighbors cannot be negative, got {}",
                self.min_neighbors
            )));
        }
        if self.min_size == 0 {
            return Err(config_error("min_size must be at least 1 pixel".to_string()));
        }
        Ok(())
    }
}

impl Validate for LocalizerConfig {
    fn validate(&self) -> Result<()> {
        validate_fraction("localizer.upper_face_fraction", self.upper_face_fraction)?;
        validate_padding("localizer.paired_eye_padding", self.paired_eye_padding)?;
        validate_padding("localizer.single_eye_padding", self.single_eye_padding)
    }
}

impl Validate for BlobDetectorConfig {
    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(config_error("blob.chunk_size must be at least 1".to_string()));
        }
        validate_fraction("blob.seed_threshold", self.seed_threshold)?;
        validate_fraction("blob.grow_threshold", self.grow_threshold)?;
        validate_fraction("blob.max_coverage", self.max_coverage)?;
        if self.grow_threshold > self.seed_threshold {
            return Err(config_error(
                "blob.grow_threshold cannot exceed blob.seed_threshold".to_string(),
            ));
        }
        Ok(())
    }
}

impl Validate for ScreeningConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(config_error(format!(
                "confidence_threshold must be in [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.classifier_timeout_ms == Some(0) {
            return Err(config_error("classifier_timeout_ms must be positive".to_string()));
        }
        self.localizer.validate()?;
        self.detectors.face.validate()?;
        self.detectors.eye_in_face.validate()?;
        self.detectors.eye.validate()?;
        self.blob.validate()
    }
}
