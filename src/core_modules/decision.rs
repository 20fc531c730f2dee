// THEORY:
// The decision engine is the medical-safety gate of the screening engine. It turns a
// raw classifier output into one of three clinically meaningful verdicts and it
// enforces one absolute rule: an uncertain model never gets to assert a diagnosis.
//
// The confidence check is evaluated before the label is even looked at. Anything
// that is not a number at or above the threshold (NaN, negatives, values below the
// threshold) is `Inconclusive`. The function is total and cannot fail.

use crate::core_modules::classifier::ClassifierResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum confidence before a positive or negative label is trusted.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.85;

/// Label the classifier uses for a positive finding, compared case-insensitively.
pub const CATARACT_LABEL: &str = "cataract";

/// The clinically exposed outcome of one eye's screening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Cataract,
    Healthy,
    Inconclusive,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Cataract => "Cataract",
            Verdict::Healthy => "Healthy",
            Verdict::Inconclusive => "Inconclusive",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a classifier result to a verdict.
pub fn decide(result: &ClassifierResult, threshold: f64) -> Verdict {
    // Written as a negated `>=` so NaN lands on the inconclusive side.
    if !(result.confidence >= threshold) {
        return Verdict::Inconclusive;
    }

    if result.raw_label.eq_ignore_ascii_case(CATARACT_LABEL) {
        Verdict::Cataract
    } else {
        Verdict::Healthy
    }
}
