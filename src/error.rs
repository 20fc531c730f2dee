use crate::core_modules::region::Side;
use thiserror::Error;

/// Failure reported by a Classifier Port implementation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ClassifierError {
    pub message: String,
}

impl ClassifierError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ScreeningError {
    #[error("Image could not be decoded: {0}")]
    InputError(#[from] image::ImageError),

    #[error("Image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("Classifier failed on {side}: {source}")]
    ClassifierError {
        side: Side,
        #[source]
        source: ClassifierError,
    },

    #[error("Classifier timed out on {side} after {timeout_ms}ms")]
    ClassifierTimeout { side: Side, timeout_ms: u64 },

    #[error("Classification worker failed: {message}")]
    WorkerError { message: String },

    #[error("Report could not be written: {message}")]
    ReportError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ScreeningError {
    /// True for failures of the classifier boundary, which abort the whole request.
    pub fn is_classifier_failure(&self) -> bool {
        matches!(
            self,
            ScreeningError::ClassifierError { .. }
                | ScreeningError::ClassifierTimeout { .. }
                | ScreeningError::WorkerError { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ScreeningError>;
