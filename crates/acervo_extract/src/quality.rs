//! Document quality classification.
//!
//! A fixed decision table over four signals: selectable-text ratio, probe
//! OCR confidence on sampled pages, skew estimate and binarization
//! contrast. Signals that were not measured are simply absent; the table
//! degrades to the signals it has.

use acervo_protocol::DocumentQuality;

use crate::document::DocumentRef;

/// Signals gathered before classification. `text_ratio` is always known;
/// the rest come from an OCR probe pass when an engine is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeReport {
    pub text_ratio: f64,
    pub ocr_confidence: Option<f64>,
    pub skew_degrees: Option<f64>,
    pub contrast: Option<f64>,
}

impl ProbeReport {
    pub fn from_document(doc: &DocumentRef) -> Self {
        Self {
            text_ratio: doc.text_ratio(),
            ..Default::default()
        }
    }
}

/// Stateless classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityDetector;

// Decision-table thresholds
const NATIVE_TEXT_RATIO: f64 = 0.8;
const EASY_CONFIDENCE: f64 = 0.85;
const MEDIUM_CONFIDENCE: f64 = 0.70;
const HARD_CONFIDENCE: f64 = 0.50;
const SKEW_HARD_DEGREES: f64 = 3.0;
const CONTRAST_LOW: f64 = 0.35;

impl QualityDetector {
    /// Classify a document; returns the tier and a confidence in [0, 1].
    pub fn assess(&self, report: &ProbeReport) -> (DocumentQuality, f64) {
        if report.text_ratio >= NATIVE_TEXT_RATIO {
            // confidence grows with how complete the layer is
            let confidence = 0.9 + 0.1 * (report.text_ratio - NATIVE_TEXT_RATIO) / 0.2;
            return (DocumentQuality::Native, confidence.min(1.0));
        }

        let skewed = report
            .skew_degrees
            .is_some_and(|deg| deg.abs() >= SKEW_HARD_DEGREES);
        let low_contrast = report.contrast.is_some_and(|c| c < CONTRAST_LOW);

        match report.ocr_confidence {
            Some(conf) if conf >= EASY_CONFIDENCE && !skewed && !low_contrast => {
                (DocumentQuality::Easy, conf)
            }
            Some(conf) if conf >= MEDIUM_CONFIDENCE && !low_contrast => {
                (DocumentQuality::Medium, conf)
            }
            Some(conf) if conf >= HARD_CONFIDENCE => (DocumentQuality::Hard, conf),
            Some(conf) => (DocumentQuality::VeryHard, 1.0 - conf),
            None => {
                // No probe available: skew/contrast decide, defaulting to a
                // cautious medium
                if low_contrast || skewed {
                    (DocumentQuality::Hard, 0.6)
                } else {
                    (DocumentQuality::Medium, 0.5)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(text_ratio: f64) -> ProbeReport {
        ProbeReport {
            text_ratio,
            ..Default::default()
        }
    }

    #[test]
    fn test_full_text_layer_is_native() {
        let detector = QualityDetector;
        let (quality, confidence) = detector.assess(&report(1.0));
        assert_eq!(quality, DocumentQuality::Native);
        assert!(confidence >= 0.9);
    }

    #[test]
    fn test_partial_layer_is_not_native() {
        let detector = QualityDetector;
        let (quality, _) = detector.assess(&report(0.5));
        assert_ne!(quality, DocumentQuality::Native);
    }

    #[test]
    fn test_probe_confidence_tiers() {
        let detector = QualityDetector;
        let mk = |conf| ProbeReport {
            text_ratio: 0.0,
            ocr_confidence: Some(conf),
            ..Default::default()
        };
        assert_eq!(detector.assess(&mk(0.9)).0, DocumentQuality::Easy);
        assert_eq!(detector.assess(&mk(0.75)).0, DocumentQuality::Medium);
        assert_eq!(detector.assess(&mk(0.6)).0, DocumentQuality::Hard);
        assert_eq!(detector.assess(&mk(0.2)).0, DocumentQuality::VeryHard);
    }

    #[test]
    fn test_low_contrast_demotes() {
        let detector = QualityDetector;
        let report = ProbeReport {
            text_ratio: 0.0,
            ocr_confidence: Some(0.9),
            skew_degrees: None,
            contrast: Some(0.2),
        };
        // high probe confidence but unusable contrast: not easy
        assert_eq!(detector.assess(&report).0, DocumentQuality::Hard);
    }

    #[test]
    fn test_no_probe_defaults_to_medium() {
        let detector = QualityDetector;
        assert_eq!(detector.assess(&report(0.0)).0, DocumentQuality::Medium);
    }
}
