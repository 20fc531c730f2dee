// THEORY:
// The `pipeline` module is the top-level API of the screening engine. It composes the
// `Localizer`, the Classifier Port and the decision engine into a single call:
// photograph in, one diagnostic record per eye out.
//
// Key architectural principles:
// 1.  **One-directional Flow**: Photograph -> regions -> classifier result per
//     region -> verdict -> record. No stage looks back at an earlier one.
// 2.  **All or Nothing**: A classifier failure aborts the whole request. A caller
//     either gets a record for every region or an error, never a partial list and
//     never a fabricated label.
// 3.  **Injected Collaborators**: Detectors and the classifier are handed in at
//     construction and only read afterwards, so one pipeline can serve many
//     requests at once.
// 4.  **No I/O**: The orchestrator performs no persistence and no network calls.
//     Crops are retained on the records for a `ReportSink`, never for the caller.

use crate::config::ScreeningConfig;
use crate::core_modules::classifier::{Classifier, ClassifierResult};
use crate::core_modules::decision::{DEFAULT_CONFIDENCE_THRESHOLD, Verdict, decide};
use crate::core_modules::detector::Detectors;
use crate::core_modules::localizer::Localizer;
use crate::core_modules::photograph::Photograph;
use crate::core_modules::region::{EyeRegion, Rect, Side};
use crate::error::{Result, ScreeningError};
use futures::future::try_join_all;
use image::RgbImage;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// The screening outcome for one eye.
#[derive(Debug, Clone)]
pub struct DiagnosticRecord {
    pub side: Side,
    pub final_label: Verdict,
    pub confidence: f64,
    /// Where the crop came from in the source photograph.
    pub bounds: Rect,
    /// Retained for report composition only.
    pub crop: RgbImage,
}

/// Everything produced for one photograph.
#[derive(Debug, Clone)]
pub struct ScreeningResult {
    pub report_id: Uuid,
    pub records: Vec<DiagnosticRecord>,
}

/// Caller-facing view of a `ScreeningResult`, without any image data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreeningSummary {
    pub report_id: Uuid,
    pub results: Vec<RecordSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSummary {
    pub side: Side,
    pub label: Verdict,
    pub confidence: f64,
}

impl ScreeningResult {
    pub fn summary(&self) -> ScreeningSummary {
        ScreeningSummary {
            report_id: self.report_id,
            results: self
                .records
                .iter()
                .map(|record| RecordSummary {
                    side: record.side,
                    label: record.final_label,
                    confidence: record.confidence,
                })
                .collect(),
        }
    }
}

/// The Screening Orchestrator.
pub struct ScreeningPipeline {
    localizer: Localizer,
    classifier: Arc<dyn Classifier>,
    threshold: f64,
    classifier_timeout: Option<Duration>,
}

impl ScreeningPipeline {
    pub fn new(localizer: Localizer, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            localizer,
            classifier,
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            classifier_timeout: None,
        }
    }

    /// Builds a pipeline from validated configuration and start-up handles.
    pub fn from_config(config: &ScreeningConfig, detectors: Detectors, classifier: Arc<dyn Classifier>) -> Self {
        Self::new(Localizer::new(detectors, config.localizer.clone()), classifier)
            .with_threshold(config.confidence_threshold)
            .with_classifier_timeout(config.classifier_timeout_ms.map(Duration::from_millis))
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Bounds each classifier call made by `screen_concurrent`.
    ///
    /// A timed-out call fails the request, but its blocking task cannot be
    /// cancelled and runs to completion in the background. A classifier that
    /// serializes inference behind a lock keeps holding it until then, so later
    /// requests wait on that call and may time out as well.
    pub fn with_classifier_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.classifier_timeout = timeout;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Screens one photograph, classifying its regions one after another.
    pub fn screen(&self, photo: &Photograph) -> Result<ScreeningResult> {
        let report_id = Uuid::new_v4();
        let regions = self.localizer.localize(photo);
        tracing::info!(%report_id, regions = regions.len(), "Screening photograph");

        let mut records = Vec::with_capacity(regions.len());
        for region in regions {
            let result = self
                .classifier
                .classify(&region.crop)
                .map_err(|source| ScreeningError::ClassifierError {
                    side: region.side,
                    source,
                })?;
            records.push(self.record(region, result));
        }

        Ok(ScreeningResult { report_id, records })
    }

    /// Screens one photograph on the blocking thread pool: localization first, then
    /// every region's classification in parallel. Output order matches `screen`.
    pub async fn screen_concurrent(&self, photo: &Photograph) -> Result<ScreeningResult> {
        let report_id = Uuid::new_v4();
        let localizer = self.localizer.clone();
        let source = photo.clone();
        let regions = tokio::task::spawn_blocking(move || localizer.localize(&source))
            .await
            .map_err(|e| ScreeningError::WorkerError {
                message: e.to_string(),
            })?;
        tracing::info!(%report_id, regions = regions.len(), "Screening photograph concurrently");

        let classifications = regions.iter().map(|region| {
            let side = region.side;
            let classifier = self.classifier.clone();
            let crop = region.crop.clone();
            let timeout = self.classifier_timeout;

            async move {
                let task = tokio::task::spawn_blocking(move || classifier.classify(&crop));
                let joined = match timeout {
                    Some(limit) => tokio::time::timeout(limit, task).await.map_err(|_| {
                        ScreeningError::ClassifierTimeout {
                            side,
                            timeout_ms: limit.as_millis() as u64,
                        }
                    })?,
                    None => task.await,
                };
                joined
                    .map_err(|e| ScreeningError::WorkerError {
                        message: e.to_string(),
                    })?
                    .map_err(|source| ScreeningError::ClassifierError { side, source })
            }
        });

        let results = try_join_all(classifications).await?;
        let records = regions
            .into_iter()
            .zip(results)
            .map(|(region, result)| self.record(region, result))
            .collect();

        Ok(ScreeningResult { report_id, records })
    }

    fn record(&self, region: EyeRegion, result: ClassifierResult) -> DiagnosticRecord {
        if !(0.0..=1.0).contains(&result.confidence) {
            tracing::warn!(
                side = %region.side,
                confidence = result.confidence,
                "Classifier confidence outside [0, 1]"
            );
        }

        let final_label = decide(&result, self.threshold);
        tracing::debug!(
            side = %region.side,
            raw_label = %result.raw_label,
            confidence = result.confidence,
            verdict = %final_label,
            "Eye screened"
        );

        DiagnosticRecord {
            side: region.side,
            final_label,
            confidence: result.confidence,
            bounds: region.bounds,
            crop: region.crop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::detector::ObjectDetector;
    use crate::core_modules::localizer::LocalizerConfig;
    use crate::error::ClassifierError;
    use image::{GrayImage, Rgb};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct FixedDetector(Vec<Rect>);

    impl ObjectDetector for FixedDetector {
        fn detect(&self, _image: &GrayImage) -> Vec<Rect> {
            self.0.clone()
        }
    }

    /// Replays scripted answers in call order and remembers crop sizes.
    struct Scripted {
        answers: Mutex<Vec<std::result::Result<ClassifierResult, ClassifierError>>>,
        seen: Mutex<Vec<(u32, u32)>>,
    }

    impl Scripted {
        fn new(answers: Vec<std::result::Result<ClassifierResult, ClassifierError>>) -> Self {
            Self {
                answers: Mutex::new(answers.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Classifier for Scripted {
        fn classify(&self, region: &RgbImage) -> std::result::Result<ClassifierResult, ClassifierError> {
            self.seen.lock().unwrap().push(region.dimensions());
            self.answers
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ClassifierError::new("no scripted answer")))
        }
    }

    /// Classifies by crop position so concurrent calls stay deterministic.
    struct ByWidth;

    impl Classifier for ByWidth {
        fn classify(&self, region: &RgbImage) -> std::result::Result<ClassifierResult, ClassifierError> {
            if region.width() % 2 == 0 {
                Ok(ClassifierResult::new("cataract", 0.97))
            } else {
                Ok(ClassifierResult::new("normal", 0.6))
            }
        }
    }

    struct Slow;

    impl Classifier for Slow {
        fn classify(&self, _region: &RgbImage) -> std::result::Result<ClassifierResult, ClassifierError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(ClassifierResult::new("normal", 0.99))
        }
    }

    /// Slow only on its first call.
    struct SlowOnce(AtomicUsize);

    impl Classifier for SlowOnce {
        fn classify(&self, _region: &RgbImage) -> std::result::Result<ClassifierResult, ClassifierError> {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                std::thread::sleep(Duration::from_millis(200));
            }
            Ok(ClassifierResult::new("normal", 0.99))
        }
    }

    /// A face detector that takes as long as a real cascade pass.
    struct SlowFace;

    impl ObjectDetector for SlowFace {
        fn detect(&self, _image: &GrayImage) -> Vec<Rect> {
            std::thread::sleep(Duration::from_millis(250));
            vec![Rect::from_xywh(40, 20, 101, 120)]
        }
    }

    fn photo() -> Photograph {
        Photograph::from_rgb(RgbImage::from_pixel(200, 200, Rgb([180, 150, 140]))).unwrap()
    }

    fn face_pipeline(classifier: Arc<dyn Classifier>) -> ScreeningPipeline {
        // Face split yields halves of 50 and 51 pixels.
        let detectors = Detectors::new(
            Arc::new(FixedDetector(vec![Rect::from_xywh(40, 20, 101, 120)])),
            Arc::new(FixedDetector(vec![])),
        );
        ScreeningPipeline::new(Localizer::new(detectors, LocalizerConfig::default()), classifier)
    }

    #[test]
    fn one_record_per_region_in_order() {
        let classifier = Arc::new(Scripted::new(vec![
            Ok(ClassifierResult::new("Cataract", 0.91)),
            Ok(ClassifierResult::new("Normal", 0.42)),
        ]));
        let pipeline = face_pipeline(classifier.clone());

        let result = pipeline.screen(&photo()).unwrap();
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.records[0].side, Side::RightEye);
        assert_eq!(result.records[0].final_label, Verdict::Cataract);
        assert_eq!(result.records[1].side, Side::LeftEye);
        assert_eq!(result.records[1].final_label, Verdict::Inconclusive);
        assert_eq!(result.records[1].confidence, 0.42);
        assert_eq!(*classifier.seen.lock().unwrap(), vec![(50, 54), (51, 54)]);
    }

    #[test]
    fn classifier_failure_aborts_request() {
        let classifier = Arc::new(Scripted::new(vec![
            Ok(ClassifierResult::new("Normal", 0.99)),
            Err(ClassifierError::new("gpu lost")),
        ]));
        let err = face_pipeline(classifier).screen(&photo()).unwrap_err();
        match err {
            ScreeningError::ClassifierError { side, source } => {
                assert_eq!(side, Side::LeftEye);
                assert_eq!(source.message, "gpu lost");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn report_ids_are_never_reused() {
        let pipeline = ScreeningPipeline::new(
            Localizer::new(Detectors::none(), LocalizerConfig::default()),
            Arc::new(ByWidth),
        );
        let first = pipeline.screen(&photo()).unwrap();
        let second = pipeline.screen(&photo()).unwrap();
        assert_ne!(first.report_id, second.report_id);
    }

    #[test]
    fn custom_threshold_is_applied() {
        let classifier = Arc::new(Scripted::new(vec![Ok(ClassifierResult::new("normal", 0.6))]));
        let pipeline = ScreeningPipeline::new(
            Localizer::new(Detectors::none(), LocalizerConfig::default()),
            classifier,
        )
        .with_threshold(0.5);
        let result = pipeline.screen(&photo()).unwrap();
        assert_eq!(result.records[0].final_label, Verdict::Healthy);
    }

    #[test]
    fn summary_strips_crops() {
        let pipeline = face_pipeline(Arc::new(ByWidth));
        let result = pipeline.screen(&photo()).unwrap();
        let json = serde_json::to_value(result.summary()).unwrap();

        assert_eq!(json["report_id"], result.report_id.to_string());
        assert_eq!(json["results"][0]["side"], "Right Eye");
        assert_eq!(json["results"][0]["label"], "Cataract");
        assert_eq!(json["results"][1]["side"], "Left Eye");
        assert_eq!(json["results"][1]["label"], "Inconclusive");
        assert!(json["results"][0].get("crop").is_none());
    }

    #[tokio::test]
    async fn concurrent_screening_preserves_order() {
        let pipeline = face_pipeline(Arc::new(ByWidth));
        let result = pipeline.screen_concurrent(&photo()).await.unwrap();
        let labels: Vec<(Side, Verdict)> = result.records.iter().map(|r| (r.side, r.final_label)).collect();
        assert_eq!(
            labels,
            vec![(Side::RightEye, Verdict::Cataract), (Side::LeftEye, Verdict::Inconclusive)]
        );
    }

    #[tokio::test]
    async fn concurrent_screening_times_out() {
        let pipeline = face_pipeline(Arc::new(Slow)).with_classifier_timeout(Some(Duration::from_millis(20)));
        let err = pipeline.screen_concurrent(&photo()).await.unwrap_err();
        assert!(matches!(err, ScreeningError::ClassifierTimeout { timeout_ms: 20, .. }));
        assert!(err.is_classifier_failure());
    }

    #[tokio::test]
    async fn concurrent_screening_is_all_or_nothing() {
        let classifier = Arc::new(Scripted::new(vec![
            Err(ClassifierError::new("first call fails")),
            Ok(ClassifierResult::new("Normal", 0.99)),
        ]));
        let result = face_pipeline(classifier).screen_concurrent(&photo()).await;
        assert!(matches!(result, Err(ScreeningError::ClassifierError { .. })));
    }

    #[tokio::test]
    async fn timed_out_call_does_not_poison_later_requests() {
        let pipeline = face_pipeline(Arc::new(SlowOnce(AtomicUsize::new(0))))
            .with_classifier_timeout(Some(Duration::from_millis(50)));

        let first = pipeline.screen_concurrent(&photo()).await;
        assert!(matches!(first, Err(ScreeningError::ClassifierTimeout { .. })));

        let second = pipeline.screen_concurrent(&photo()).await.unwrap();
        assert_eq!(second.records.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_requests_localize_in_parallel() {
        let detectors = Detectors::new(Arc::new(SlowFace), Arc::new(FixedDetector(vec![])));
        let pipeline = ScreeningPipeline::new(Localizer::new(detectors, LocalizerConfig::default()), Arc::new(ByWidth));
        let photos: Vec<Photograph> = (0..4).map(|_| photo()).collect();

        let started = Instant::now();
        let results = futures::future::join_all(photos.iter().map(|p| pipeline.screen_concurrent(p))).await;
        let elapsed = started.elapsed();

        assert!(results.iter().all(|r| r.as_ref().is_ok_and(|r| r.records.len() == 2)));
        // Four sequential passes would take a full second.
        assert!(elapsed < Duration::from_millis(750), "took {elapsed:?}");
    }
}
