//! Gallery matching: nearest known face under a distance threshold.

use crate::types::{Encoding, KnownFace};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default acceptance threshold. A match requires `distance < DEFAULT_TOLERANCE`.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Label shown for faces that match nobody in the gallery.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Distance between two encodings, as defined by the model that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Straight-line distance in embedding space.
    #[default]
    Euclidean,
    /// `1 - cosine_similarity`, in [0, 2].
    Cosine,
}

impl DistanceMetric {
    /// Encodings of different lengths come from different models and are
    /// infinitely far apart.
    pub fn distance(&self, a: &Encoding, b: &Encoding) -> f32 {
        if a.len() != b.len() {
            return f32::INFINITY;
        }
        match self {
            Self::Euclidean => a.euclidean_distance(b),
            Self::Cosine => 1.0 - a.cosine_similarity(b),
        }
    }
}

/// Who a face was matched to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Known(name) => Some(name),
            Self::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().unwrap_or(UNKNOWN_LABEL))
    }
}

/// Result of matching one probe encoding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub identity: Identity,
    /// Percentage in [0, 100]; always 0 for `Identity::Unknown`.
    pub confidence: f32,
    /// Distance to the nearest gallery entry, `None` for an empty gallery.
    pub distance: Option<f32>,
}

impl Recognition {
    pub fn unknown(distance: Option<f32>) -> Self {
        Self {
            identity: Identity::Unknown,
            confidence: 0.0,
            distance,
        }
    }
}

/// Confidence percentage for a distance: `max(0, 1 - distance) * 100`.
///
/// This is a display score, not a calibrated probability.
pub fn confidence_from_distance(distance: f32) -> f32 {
    ((1.0 - distance).max(0.0) * 100.0).min(100.0)
}

/// Coarse confidence buckets used for overlay colors and status markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
    Unknown,
}

impl ConfidenceBand {
    pub fn of(recognition: &Recognition) -> Self {
        Self::classify(&recognition.identity, recognition.confidence)
    }

    pub fn classify(identity: &Identity, confidence: f32) -> Self {
        if !identity.is_known() {
            Self::Unknown
        } else if confidence >= 70.0 {
            Self::High
        } else if confidence >= 50.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// RGB color for drawing.
    pub fn color(&self) -> [u8; 3] {
        match self {
            Self::High => [0, 255, 0],
            Self::Medium => [255, 165, 0],
            Self::Low => [255, 255, 0],
            Self::Unknown => [255, 0, 0],
        }
    }
}

/// Strategy for comparing a probe encoding against a gallery of known faces.
pub trait Matcher {
    fn compare(&self, probe: &Encoding, gallery: &[KnownFace]) -> Recognition;
}

/// Nearest-neighbour matcher with an exclusive distance threshold.
#[derive(Debug, Clone, Copy)]
pub struct DistanceMatcher {
    pub metric: DistanceMetric,
    pub tolerance: f32,
}

impl DistanceMatcher {
    pub fn new(metric: DistanceMetric, tolerance: f32) -> Self {
        Self { metric, tolerance }
    }
}

impl Default for DistanceMatcher {
    fn default() -> Self {
        Self::new(DistanceMetric::default(), DEFAULT_TOLERANCE)
    }
}

impl Matcher for DistanceMatcher {
    fn compare(&self, probe: &Encoding, gallery: &[KnownFace]) -> Recognition {
        let best = gallery
            .iter()
            .map(|face| (face, self.metric.distance(probe, &face.encoding)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((face, distance)) if distance < self.tolerance => Recognition {
                identity: Identity::Known(face.name.clone()),
                confidence: confidence_from_distance(distance),
                distance: Some(distance),
            },
            Some((_, distance)) => Recognition::unknown(Some(distance)),
            None => Recognition::unknown(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(name: &str, values: Vec<f32>) -> KnownFace {
        KnownFace {
            name: name.into(),
            encoding: Encoding::new(values),
        }
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let probe = Encoding::new(vec![0.1, 0.2]);
        let result = DistanceMatcher::default().compare(&probe, &[]);
        assert_eq!(result.identity, Identity::Unknown);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.distance, None);
        assert_eq!(result.identity.to_string(), "Unknown");
    }

    #[test]
    fn test_identical_encoding_full_confidence() {
        let e1 = vec![0.3, -0.2, 0.9];
        let gallery = vec![face("Alice", e1.clone())];
        let result = DistanceMatcher::default().compare(&Encoding::new(e1), &gallery);
        assert_eq!(result.identity, Identity::Known("Alice".into()));
        assert!((result.confidence - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        // Distance exactly 0.5 with tolerance 0.5 must be rejected.
        let gallery = vec![face("Alice", vec![0.0, 0.0])];
        let matcher = DistanceMatcher::new(DistanceMetric::Euclidean, 0.5);
        let result = matcher.compare(&Encoding::new(vec![0.5, 0.0]), &gallery);
        assert_eq!(result.identity, Identity::Unknown);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.distance, Some(0.5));
    }

    #[test]
    fn test_default_tolerance_boundary() {
        // 0.6 is not exactly representable; compare against the f32 value the
        // metric actually produces.
        let gallery = vec![face("Alice", vec![0.0])];
        let at = DistanceMatcher::default().compare(&Encoding::new(vec![DEFAULT_TOLERANCE]), &gallery);
        assert_eq!(at.identity, Identity::Unknown);

        let below = DistanceMatcher::default().compare(&Encoding::new(vec![0.59]), &gallery);
        assert_eq!(below.identity, Identity::Known("Alice".into()));
        assert!((below.confidence - 41.0).abs() < 1e-3);
    }

    #[test]
    fn test_low_confidence_forced_to_zero() {
        // Distance 0.75 -> raw confidence 25%, below the 40% floor.
        let gallery = vec![face("Bob", vec![0.0])];
        let result = DistanceMatcher::default().compare(&Encoding::new(vec![0.75]), &gallery);
        assert_eq!(result.identity, Identity::Unknown);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_picks_nearest_entry() {
        let gallery = vec![
            face("far", vec![1.0, 1.0]),
            face("near", vec![0.1, 0.0]),
            face("middle", vec![0.3, 0.0]),
        ];
        let result = DistanceMatcher::default().compare(&Encoding::new(vec![0.0, 0.0]), &gallery);
        assert_eq!(result.identity.name(), Some("near"));
        assert!((result.confidence - 90.0).abs() < 1e-3);
    }

    #[test]
    fn test_cosine_metric() {
        let gallery = vec![face("Alice", vec![1.0, 0.0])];
        let matcher = DistanceMatcher::new(DistanceMetric::Cosine, DEFAULT_TOLERANCE);
        let same_direction = matcher.compare(&Encoding::new(vec![2.0, 0.0]), &gallery);
        assert!(same_direction.identity.is_known());
        let orthogonal = matcher.compare(&Encoding::new(vec![0.0, 1.0]), &gallery);
        assert_eq!(orthogonal.identity, Identity::Unknown);
    }

    #[test]
    fn test_length_mismatch_never_matches() {
        let gallery = vec![face("Alice", vec![0.0])];
        let probe = Encoding::new(vec![0.0, 9.0, 9.0]);
        for metric in [DistanceMetric::Euclidean, DistanceMetric::Cosine] {
            let result = DistanceMatcher::new(metric, DEFAULT_TOLERANCE).compare(&probe, &gallery);
            assert_eq!(result.identity, Identity::Unknown);
            assert_eq!(result.confidence, 0.0);
            assert_eq!(result.distance, Some(f32::INFINITY));
        }
    }

    #[test]
    fn test_mismatched_entry_does_not_shadow_real_match() {
        let gallery = vec![face("stale", vec![0.0]), face("Bob", vec![0.1, 0.0])];
        let result = DistanceMatcher::default().compare(&Encoding::new(vec![0.0, 0.0]), &gallery);
        assert_eq!(result.identity.name(), Some("Bob"));
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(confidence_from_distance(1.7), 0.0);
        assert_eq!(confidence_from_distance(0.0), 100.0);
        assert_eq!(confidence_from_distance(-0.2), 100.0);
    }

    #[test]
    fn test_confidence_bands() {
        let known = Identity::Known("x".into());
        assert_eq!(ConfidenceBand::classify(&known, 85.0), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::classify(&known, 70.0), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::classify(&known, 55.0), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::classify(&known, 45.0), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::classify(&Identity::Unknown, 99.0), ConfidenceBand::Unknown);
    }
}
