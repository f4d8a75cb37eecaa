//! Detector + encoder pair, shared between the capture thread and gallery edits.

use crate::detector::{DetectorError, FaceDetector, ScrfdDetector};
use crate::matcher::DistanceMetric;
use crate::recognizer::{ArcFaceEncoder, FaceEncoder, RecognizerError};
use crate::types::{BoundingBox, Encoding};
use image::RgbImage;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("encoder returned {got} encodings for {expected} faces")]
    Misaligned { expected: usize, got: usize },
    #[error("face analyzer lock poisoned")]
    Poisoned,
}

/// A detected face together with its encoding.
#[derive(Debug, Clone)]
pub struct AnalyzedFace {
    pub location: BoundingBox,
    pub encoding: Encoding,
}

/// The external detection/encoding capability.
pub struct Analyzer {
    detector: Box<dyn FaceDetector>,
    encoder: Box<dyn FaceEncoder>,
}

/// Handle used by the capture thread and the session.
pub type SharedAnalyzer = Arc<Mutex<Analyzer>>;

impl Analyzer {
    pub fn new(detector: Box<dyn FaceDetector>, encoder: Box<dyn FaceEncoder>) -> Self {
        Self { detector, encoder }
    }

    /// Load the SCRFD + ArcFace ONNX models from `model_dir`.
    pub fn load_onnx(model_dir: &Path) -> Result<Self, AnalyzeError> {
        let detector = ScrfdDetector::load(&model_dir.join(SCRFD_MODEL_FILE))?;
        let encoder = ArcFaceEncoder::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        Ok(Self::new(Box::new(detector), Box::new(encoder)))
    }

    pub fn shared(self) -> SharedAnalyzer {
        Arc::new(Mutex::new(self))
    }

    pub fn metric(&self) -> DistanceMetric {
        self.encoder.metric()
    }

    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzeError> {
        Ok(self.detector.detect(image)?)
    }

    pub fn encode(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Encoding>, AnalyzeError> {
        if faces.is_empty() {
            return Ok(Vec::new());
        }
        let encodings = self.encoder.encode(image, faces)?;
        if encodings.len() != faces.len() {
            return Err(AnalyzeError::Misaligned {
                expected: faces.len(),
                got: encodings.len(),
            });
        }
        Ok(encodings)
    }

    /// Detect, then encode every detected face.
    pub fn analyze(&mut self, image: &RgbImage) -> Result<Vec<AnalyzedFace>, AnalyzeError> {
        let locations = self.detect(image)?;
        let encodings = self.encode(image, &locations)?;
        Ok(locations
            .into_iter()
            .zip(encodings)
            .map(|(location, encoding)| AnalyzedFace { location, encoding })
            .collect())
    }
}

/// Lock the shared analyzer, mapping poisoning to an error.
pub fn lock(analyzer: &SharedAnalyzer) -> Result<std::sync::MutexGuard<'_, Analyzer>, AnalyzeError> {
    analyzer.lock().map_err(|_| AnalyzeError::Poisoned)
}

/// Scriptable detector/encoder used by tests across the crate.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::VecDeque;

    /// Returns queued detections in order, then repeats the last one.
    pub struct ScriptedDetector {
        pub script: VecDeque<Vec<BoundingBox>>,
        pub last: Vec<BoundingBox>,
        pub calls: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl FaceDetector for ScriptedDetector {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(image.dimensions());
            }
            if let Some(next) = self.script.pop_front() {
                self.last = next;
            }
            Ok(self.last.clone())
        }
    }

    /// Encodes each face as `[x, y]` of its box, so tests can steer matches
    /// through box positions.
    pub struct PositionEncoder;

    impl FaceEncoder for PositionEncoder {
        fn encode(
            &mut self,
            _image: &RgbImage,
            faces: &[BoundingBox],
        ) -> Result<Vec<Encoding>, RecognizerError> {
            Ok(faces.iter().map(|f| Encoding::new(vec![f.x, f.y])).collect())
        }
    }

    pub fn analyzer(script: Vec<Vec<BoundingBox>>) -> (Analyzer, Arc<Mutex<Vec<(u32, u32)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let detector = ScriptedDetector {
            script: script.into(),
            last: Vec::new(),
            calls: Arc::clone(&calls),
        };
        (Analyzer::new(Box::new(detector), Box::new(PositionEncoder)), calls)
    }

    /// Always detects the given boxes.
    pub fn fixed(faces: Vec<BoundingBox>) -> Analyzer {
        analyzer(vec![faces]).0
    }
}
