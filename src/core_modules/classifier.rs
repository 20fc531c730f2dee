use crate::error::ClassifierError;
use image::RgbImage;
use std::sync::Arc;

/// Labels of the two-class head the screening models are trained with.
pub const DEFAULT_LABELS: [&str; 2] = ["Normal", "Cataract"];

/// Raw output of a classifier for one eye region.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierResult {
    pub raw_label: String,
    /// Expected in `[0, 1]`; the decision engine copes with anything else.
    pub confidence: f64,
}

impl ClassifierResult {
    pub fn new(raw_label: impl Into<String>, confidence: f64) -> Self {
        Self {
            raw_label: raw_label.into(),
            confidence,
        }
    }

    /// Softmax over `logits`, then the most probable class and its probability.
    /// Fails when the logits are empty, non-finite, or longer than `labels`.
    pub fn from_logits(logits: &[f32], labels: &[impl AsRef<str>]) -> Result<Self, ClassifierError> {
        if logits.is_empty() {
            return Err(ClassifierError::new("model produced no logits"));
        }
        if logits.len() > labels.len() {
            return Err(ClassifierError::new(format!(
                "model produced {} logits but only {} labels are known",
                logits.len(),
                labels.len()
            )));
        }
        if logits.iter().any(|logit| !logit.is_finite()) {
            return Err(ClassifierError::new("model produced non-finite logits"));
        }

        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
        let exps: Vec<f64> = logits.iter().map(|&logit| (logit as f64 - max).exp()).collect();
        let sum: f64 = exps.iter().sum();

        let (best, best_exp) = exps
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(best, best_exp), (index, &exp)| {
                if exp > best_exp { (index, exp) } else { (best, best_exp) }
            });

        Ok(Self::new(labels[best].as_ref(), best_exp / sum))
    }
}

/// The Classifier Port: label and confidence for a single eye crop.
///
/// Implementations are loaded once and shared between requests, so they must be
/// safe to call from several threads at once.
pub trait Classifier: Send + Sync {
    fn classify(&self, region: &RgbImage) -> Result<ClassifierResult, ClassifierError>;
}

impl<T: Classifier + ?Sized> Classifier for Arc<T> {
    fn classify(&self, region: &RgbImage) -> Result<ClassifierResult, ClassifierError> {
        (**self).classify(region)
    }
}

/// Runs several classifiers and keeps the most confident answer.
/// Any member failure fails the whole call.
pub struct EnsembleClassifier {
    members: Vec<Arc<dyn Classifier>>,
}

impl EnsembleClassifier {
    pub fn new(members: Vec<Arc<dyn Classifier>>) -> Self {
        Self { members }
    }
}

impl Classifier for EnsembleClassifier {
    fn classify(&self, region: &RgbImage) -> Result<ClassifierResult, ClassifierError> {
        let mut best: Option<ClassifierResult> = None;
        for member in &self.members {
            let result = member.classify(region)?;
            match &best {
                // NaN never replaces a real score.
                Some(current) if !(result.confidence > current.confidence) => {}
                _ => best = Some(result),
            }
        }
        best.ok_or_else(|| ClassifierError::new("ensemble has no members"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, f64);

    impl Classifier for Fixed {
        fn classify(&self, _region: &RgbImage) -> Result<ClassifierResult, ClassifierError> {
            Ok(ClassifierResult::new(self.0, self.1))
        }
    }

    struct Broken;

    impl Classifier for Broken {
        fn classify(&self, _region: &RgbImage) -> Result<ClassifierResult, ClassifierError> {
            Err(ClassifierError::new("weights missing"))
        }
    }

    #[test]
    fn softmax_picks_most_probable_label() {
        let result = ClassifierResult::from_logits(&[0.0, 2.0], &DEFAULT_LABELS).unwrap();
        assert_eq!(result.raw_label, "Cataract");
        let expected = 1.0 / (1.0 + (-2.0f64).exp());
        assert!((result.confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn equal_logits_give_first_label_at_half_confidence() {
        let result = ClassifierResult::from_logits(&[1.5, 1.5], &DEFAULT_LABELS).unwrap();
        assert_eq!(result.raw_label, "Normal");
        assert!((result.confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn malformed_logits_are_errors() {
        assert!(ClassifierResult::from_logits(&[], &DEFAULT_LABELS).is_err());
        assert!(ClassifierResult::from_logits(&[0.1, 0.2, 0.3], &DEFAULT_LABELS).is_err());
        assert!(ClassifierResult::from_logits(&[f32::NAN, 0.2], &DEFAULT_LABELS).is_err());
    }

    #[test]
    fn ensemble_keeps_most_confident_member() {
        let ensemble = EnsembleClassifier::new(vec![
            Arc::new(Fixed("Normal", 0.7)),
            Arc::new(Fixed("Cataract", 0.93)),
            Arc::new(Fixed("Normal", 0.93)),
        ]);
        let result = ensemble.classify(&RgbImage::new(2, 2)).unwrap();
        assert_eq!(result, ClassifierResult::new("Cataract", 0.93));
    }

    #[test]
    fn ensemble_fails_when_any_member_fails() {
        let ensemble = EnsembleClassifier::new(vec![Arc::new(Fixed("Normal", 0.99)), Arc::new(Broken)]);
        let err = ensemble.classify(&RgbImage::new(2, 2)).unwrap_err();
        assert_eq!(err.message, "weights missing");
    }

    #[test]
    fn empty_ensemble_is_an_error() {
        assert!(EnsembleClassifier::new(Vec::new()).classify(&RgbImage::new(1, 1)).is_err());
    }
}
