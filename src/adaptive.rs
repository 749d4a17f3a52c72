//! Two-tier adaptive recognition.
//!
//! Every image is first recognized as-is under each candidate configuration.
//! Only when the best of those scores stays below the acceptance threshold is
//! the image preprocessed and recognized again; the preprocessed result is
//! used only if it scores strictly higher.

use std::sync::Arc;

use image::DynamicImage;

use crate::config::{normalize_acceptance_threshold, OcrSettings, EARLY_STOP_CONFIDENCE};
use crate::engine::{EngineError, Recognizer};
use crate::frame::{average_confidence, rescale};
use crate::preprocess::OcrPreProcess;
use crate::sanitize::EngineConfiguration;
use crate::types::{AdaptiveOcrResult, WordBox};

pub struct AdaptiveOcrEngine {
    recognizer: Arc<dyn Recognizer>,
    configs: EngineConfiguration,
    acceptance_threshold: f64,
    preprocess: OcrPreProcess,
}

impl AdaptiveOcrEngine {
    pub fn new(recognizer: Arc<dyn Recognizer>, settings: &OcrSettings) -> Self {
        Self {
            recognizer,
            configs: EngineConfiguration::build(&settings.base_config, &settings.psm_candidates),
            acceptance_threshold: normalize_acceptance_threshold(settings.acceptance_threshold),
            preprocess: OcrPreProcess::default(),
        }
    }

    pub fn with_configs(mut self, configs: EngineConfiguration) -> Self {
        self.configs = configs;
        self
    }

    pub fn recognizer(&self) -> &Arc<dyn Recognizer> {
        &self.recognizer
    }

    pub fn configs(&self) -> &EngineConfiguration {
        &self.configs
    }

    /// Best frame across the candidate configurations, stopping as soon as
    /// one reaches the early-stop confidence.
    pub fn run_best(&self, image: &DynamicImage) -> Result<(Vec<WordBox>, f64), EngineError> {
        let mut best_frame = Vec::new();
        let mut best_confidence = -1.0;

        for config in self.configs.candidates() {
            let frame = self.recognizer.recognize(image, config)?;
            let confidence = average_confidence(&frame);
            tracing::debug!("config `{}` scored {:.2}", config, confidence);

            if confidence > best_confidence {
                best_frame = frame;
                best_confidence = confidence;
            }
            if best_confidence >= EARLY_STOP_CONFIDENCE {
                break;
            }
        }

        Ok((best_frame, best_confidence.max(0.0)))
    }

    pub fn recognize(&self, image: &DynamicImage) -> Result<AdaptiveOcrResult, EngineError> {
        let baseline = DynamicImage::ImageRgb8(image.to_rgb8());
        let (frame, confidence) = self.run_best(&baseline)?;

        if confidence >= self.acceptance_threshold {
            return Ok(AdaptiveOcrResult {
                frame,
                average_confidence: confidence,
                image: Some(baseline),
                used_preprocessing: false,
            });
        }

        let (processed, scale) = self.preprocess.run(&baseline);
        let (mut processed_frame, processed_confidence) = self.run_best(&processed)?;
        tracing::debug!(
            "baseline {:.2} below {:.2}, preprocessed scored {:.2}",
            confidence,
            self.acceptance_threshold,
            processed_confidence
        );

        if processed_confidence > confidence {
            rescale(&mut processed_frame, scale);
            Ok(AdaptiveOcrResult {
                frame: processed_frame,
                average_confidence: processed_confidence,
                image: Some(processed),
                used_preprocessing: true,
            })
        } else {
            Ok(AdaptiveOcrResult {
                frame,
                average_confidence: confidence,
                image: Some(baseline),
                used_preprocessing: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Returns a scripted confidence per call and records the image sizes it saw.
    struct Scripted {
        confidences: Vec<f64>,
        calls: Mutex<Vec<(u32, u32, String)>>,
    }

    impl Scripted {
        fn new(confidences: &[f64]) -> Arc<Self> {
            Arc::new(Self {
                confidences: confidences.to_vec(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(u32, u32, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Recognizer for Scripted {
        fn is_available(&self) -> bool {
            true
        }

        fn recognize(&self, image: &DynamicImage, config: &str) -> Result<Vec<WordBox>, EngineError> {
            let mut calls = self.calls.lock().unwrap();
            let conf = self.confidences[calls.len().min(self.confidences.len() - 1)];
            calls.push((image.width(), image.height(), config.to_string()));
            Ok(vec![
                WordBox::new("", -1.0, [0.0, 0.0, 0.0, 0.0]),
                WordBox::new("word", conf, [30.0, 60.0, 15.0, 12.0]).at(1, 1, 1, 1),
            ])
        }
    }

    fn engine(recognizer: Arc<Scripted>, psms: &[u32]) -> AdaptiveOcrEngine {
        let settings = OcrSettings {
            psm_candidates: psms.to_vec(),
            ..OcrSettings::default()
        };
        AdaptiveOcrEngine::new(recognizer, &settings)
    }

    #[test]
    fn test_early_stop_calls_recognizer_once() {
        let rec = Scripted::new(&[95.0, 99.0]);
        let result = engine(rec.clone(), &[6, 11]).recognize(&DynamicImage::new_rgb8(20, 10)).unwrap();
        assert_eq!(rec.calls().len(), 1);
        assert_eq!(result.average_confidence, 95.0);
        assert!(!result.used_preprocessing);
    }

    #[test]
    fn test_best_candidate_wins() {
        let rec = Scripted::new(&[70.0, 80.0]);
        let (frame, confidence) = engine(rec.clone(), &[6, 11])
            .run_best(&DynamicImage::new_rgb8(20, 10))
            .unwrap();
        assert_eq!(confidence, 80.0);
        assert_eq!(frame[1].confidence, 80.0);
        let configs: Vec<String> = rec.calls().into_iter().map(|c| c.2).collect();
        assert_eq!(configs, vec!["--oem 1 --psm 6", "--oem 1 --psm 11"]);
    }

    #[test]
    fn test_accepted_baseline_skips_preprocessing() {
        let rec = Scripted::new(&[65.0]);
        let result = engine(rec.clone(), &[6]).recognize(&DynamicImage::new_rgb8(20, 10)).unwrap();
        assert_eq!(rec.calls().len(), 1);
        assert!(!result.used_preprocessing);
    }

    #[test]
    fn test_low_baseline_triggers_one_preprocessed_attempt() {
        let rec = Scripted::new(&[40.0, 75.0]);
        let result = engine(rec.clone(), &[6]).recognize(&DynamicImage::new_rgb8(20, 10)).unwrap();

        let calls = rec.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!((calls[0].0, calls[0].1), (20, 10));
        assert_eq!((calls[1].0, calls[1].1), (30, 15));

        assert!(result.used_preprocessing);
        assert_eq!(result.average_confidence, 75.0);
        let word = &result.frame[1];
        assert_eq!((word.left, word.top, word.width, word.height), (20.0, 40.0, 10.0, 8.0));
    }

    #[test]
    fn test_worse_preprocessing_keeps_baseline() {
        let rec = Scripted::new(&[40.0, 40.0]);
        let result = engine(rec.clone(), &[6]).recognize(&DynamicImage::new_rgb8(20, 10)).unwrap();
        assert_eq!(rec.calls().len(), 2);
        assert!(!result.used_preprocessing);
        assert_eq!(result.frame[1].left, 30.0);
        assert_eq!(result.image.map(|img| img.width()), Some(20));
    }

    #[test]
    fn test_non_finite_threshold_uses_default() {
        for threshold in [f64::NAN, f64::INFINITY] {
            let rec = Scripted::new(&[70.0, 99.0]);
            let settings = OcrSettings {
                psm_candidates: vec![6],
                acceptance_threshold: threshold,
                ..OcrSettings::default()
            };
            let result = AdaptiveOcrEngine::new(rec.clone(), &settings)
                .recognize(&DynamicImage::new_rgb8(20, 10))
                .unwrap();
            assert_eq!(rec.calls().len(), 1, "threshold {threshold}");
            assert!(!result.used_preprocessing);
        }
    }

    #[test]
    fn test_no_candidates_yields_empty_frame() {
        let rec = Scripted::new(&[99.0]);
        let engine = engine(rec.clone(), &[6]).with_configs(EngineConfiguration::default());
        let (frame, confidence) = engine.run_best(&DynamicImage::new_rgb8(4, 4)).unwrap();
        assert!(frame.is_empty());
        assert_eq!(confidence, 0.0);
        assert!(rec.calls().is_empty());
    }
}
