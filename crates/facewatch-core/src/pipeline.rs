//! Per-frame recognition state.
//!
//! Every sampled frame is shrunk, analyzed and matched against the gallery;
//! the result is frozen into an immutable [`Detections`] that intermediate
//! frames reuse. Each call to [`Pipeline::process`] yields a [`Snapshot`]
//! that can be handed to another thread as-is.

use crate::analyzer::{self, AnalyzeError, SharedAnalyzer};
use crate::matcher::{DistanceMatcher, Identity, Matcher};
use crate::sampler::FrameSampler;
use crate::types::{BoundingBox, Encoding, KnownFace};
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;

/// One face in a processed frame, in full-resolution coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceResult {
    pub location: BoundingBox,
    pub encoding: Encoding,
    pub identity: Identity,
    pub confidence: f32,
}

/// Faces found in the most recently processed frame.
///
/// Stored as one record per face, so locations, encodings, names and
/// confidences cannot drift out of alignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detections {
    faces: Vec<FaceResult>,
}

impl Detections {
    pub fn new(faces: Vec<FaceResult>) -> Self {
        Self { faces }
    }

    pub fn faces(&self) -> &[FaceResult] {
        &self.faces
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn locations(&self) -> Vec<&BoundingBox> {
        self.faces.iter().map(|f| &f.location).collect()
    }

    pub fn encodings(&self) -> Vec<&Encoding> {
        self.faces.iter().map(|f| &f.encoding).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.faces.iter().map(|f| f.identity.to_string()).collect()
    }

    pub fn confidences(&self) -> Vec<f32> {
        self.faces.iter().map(|f| f.confidence).collect()
    }

    /// Mean confidence over recognized faces, `None` when nobody is recognized.
    pub fn average_confidence(&self) -> Option<f32> {
        let known: Vec<f32> = self
            .faces
            .iter()
            .filter(|f| f.confidence > 0.0)
            .map(|f| f.confidence)
            .collect();
        (!known.is_empty()).then(|| known.iter().sum::<f32>() / known.len() as f32)
    }
}

/// Immutable result of one capture iteration.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Frames seen by the pipeline, including this one.
    pub sequence: u64,
    /// Full-resolution frame, without overlay.
    pub frame: Arc<RgbImage>,
    pub detections: Arc<Detections>,
    /// True when `detections` was computed from this frame.
    pub fresh: bool,
    /// Frames per second since the pipeline started.
    pub fps: f32,
}

/// Rolling recognition state for one capture session.
pub struct Pipeline {
    analyzer: SharedAnalyzer,
    matcher: DistanceMatcher,
    sampler: FrameSampler,
    latest: Arc<Detections>,
    started: Option<Instant>,
}

impl Pipeline {
    pub fn new(analyzer: SharedAnalyzer, matcher: DistanceMatcher, sampler: FrameSampler) -> Self {
        Self {
            analyzer,
            matcher,
            sampler,
            latest: Arc::new(Detections::default()),
            started: None,
        }
    }

    pub fn latest(&self) -> Arc<Detections> {
        Arc::clone(&self.latest)
    }

    /// Feed one frame through the pipeline.
    ///
    /// Analysis failures on a sampled frame keep the previous detections and
    /// are reported through `tracing`; the capture loop carries on.
    pub fn process(&mut self, frame: Arc<RgbImage>, gallery: &[KnownFace]) -> Snapshot {
        let started = *self.started.get_or_insert_with(Instant::now);
        let fresh = self.sampler.tick();

        if fresh {
            match self.recompute(&frame, gallery) {
                Ok(detections) => self.latest = Arc::new(detections),
                Err(e) => {
                    tracing::warn!(error = %e, "face analysis failed; keeping previous detections")
                }
            }
        }

        let elapsed = started.elapsed().as_secs_f32();
        let sequence = self.sampler.frames_seen();
        Snapshot {
            sequence,
            frame,
            detections: self.latest(),
            fresh,
            fps: if elapsed > 0.0 { sequence as f32 / elapsed } else { 0.0 },
        }
    }

    fn recompute(&self, frame: &RgbImage, gallery: &[KnownFace]) -> Result<Detections, AnalyzeError> {
        let small = self.sampler.shrink(frame);
        let analyzed = analyzer::lock(&self.analyzer)?.analyze(&small)?;
        let factor = self.sampler.upscale_factor();

        let faces = analyzed
            .into_iter()
            .map(|face| {
                let recognition = self.matcher.compare(&face.encoding, gallery);
                FaceResult {
                    location: face.location.scaled(factor),
                    encoding: face.encoding,
                    identity: recognition.identity,
                    confidence: recognition.confidence,
                }
            })
            .collect();
        Ok(Detections::new(faces))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{fake, Analyzer};
    use crate::detector::{DetectorError, FaceDetector};
    use crate::matcher::DistanceMetric;

    fn pipeline(script: Vec<Vec<BoundingBox>>) -> (Pipeline, Arc<std::sync::Mutex<Vec<(u32, u32)>>>) {
        let (analyzer, calls) = fake::analyzer(script);
        let matcher = DistanceMatcher::new(DistanceMetric::Euclidean, 0.6);
        (Pipeline::new(analyzer.shared(), matcher, FrameSampler::new(3, 4)), calls)
    }

    fn alice_at(x: f32, y: f32) -> Vec<KnownFace> {
        vec![KnownFace {
            name: "Alice".into(),
            encoding: Encoding::new(vec![x, y]),
        }]
    }

    #[test]
    fn test_recomputes_every_third_frame_only() {
        let (mut p, calls) = pipeline(vec![vec![BoundingBox::new(5.0, 5.0, 10.0, 10.0)]]);
        let frame = Arc::new(RgbImage::new(160, 120));
        let fresh: Vec<bool> = (0..6).map(|_| p.process(Arc::clone(&frame), &[]).fresh).collect();
        assert_eq!(fresh, vec![false, false, true, false, false, true]);
        // Detection ran twice, each time on the quarter-size frame.
        assert_eq!(*calls.lock().unwrap(), vec![(40, 30), (40, 30)]);
    }

    #[test]
    fn test_intermediate_frames_reuse_detections() {
        let (mut p, _) = pipeline(vec![
            vec![BoundingBox::new(5.0, 5.0, 10.0, 10.0)],
            vec![],
        ]);
        let frame = Arc::new(RgbImage::new(160, 120));
        let gallery = alice_at(5.0, 5.0);

        p.process(Arc::clone(&frame), &gallery);
        p.process(Arc::clone(&frame), &gallery);
        let third = p.process(Arc::clone(&frame), &gallery);
        let fourth = p.process(Arc::clone(&frame), &gallery);

        assert_eq!(third.detections.len(), 1);
        assert!(Arc::ptr_eq(&third.detections, &fourth.detections));
        assert!(!fourth.fresh);

        p.process(Arc::clone(&frame), &gallery);
        let sixth = p.process(Arc::clone(&frame), &gallery);
        assert!(sixth.fresh);
        assert!(sixth.detections.is_empty());
    }

    #[test]
    fn test_locations_rescaled_and_matched() {
        let (mut p, _) = pipeline(vec![vec![
            BoundingBox::new(5.0, 5.0, 10.0, 10.0),
            BoundingBox::new(30.0, 20.0, 8.0, 8.0),
        ]]);
        let frame = Arc::new(RgbImage::new(160, 120));
        let gallery = alice_at(5.0, 5.0);

        let snap = (0..3).map(|_| p.process(Arc::clone(&frame), &gallery)).last().unwrap();
        let faces = snap.detections.faces();

        assert_eq!(faces[0].location, BoundingBox::new(20.0, 20.0, 40.0, 40.0));
        assert_eq!(faces[0].identity, Identity::Known("Alice".into()));
        assert!((faces[0].confidence - 100.0).abs() < 1e-4);

        assert_eq!(faces[1].identity, Identity::Unknown);
        assert_eq!(faces[1].confidence, 0.0);

        assert_eq!(snap.detections.names(), vec!["Alice".to_string(), "Unknown".to_string()]);
        assert_eq!(snap.detections.locations().len(), snap.detections.confidences().len());
        assert_eq!(snap.detections.encodings().len(), 2);
    }

    /// Detects one face, except on the listed (1-based) calls, which fail.
    struct FlakyDetector {
        calls: usize,
        fail_on: Vec<usize>,
    }

    impl FaceDetector for FlakyDetector {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            self.calls += 1;
            if self.fail_on.contains(&self.calls) {
                return Err(DetectorError::InferenceFailed("scripted failure".into()));
            }
            Ok(vec![BoundingBox::new(5.0, 5.0, 10.0, 10.0)])
        }
    }

    #[test]
    fn test_failed_analysis_keeps_previous_detections() {
        let detector = FlakyDetector {
            calls: 0,
            fail_on: vec![2],
        };
        let analyzer = Analyzer::new(Box::new(detector), Box::new(fake::PositionEncoder));
        let matcher = DistanceMatcher::new(DistanceMetric::Euclidean, 0.6);
        let mut p = Pipeline::new(analyzer.shared(), matcher, FrameSampler::new(1, 1));
        let frame = Arc::new(RgbImage::new(64, 48));
        let gallery = alice_at(5.0, 5.0);

        let first = p.process(Arc::clone(&frame), &gallery);
        assert_eq!(first.detections.len(), 1);

        let second = p.process(Arc::clone(&frame), &gallery);
        assert!(second.fresh);
        assert!(Arc::ptr_eq(&first.detections, &second.detections));

        let third = p.process(Arc::clone(&frame), &gallery);
        assert!(!Arc::ptr_eq(&second.detections, &third.detections));
        assert_eq!(third.detections.faces()[0].identity, Identity::Known("Alice".into()));
    }

    #[test]
    fn test_snapshot_carries_full_frame() {
        let (mut p, _) = pipeline(vec![]);
        let frame = Arc::new(RgbImage::new(64, 48));
        let snap = p.process(Arc::clone(&frame), &[]);
        assert!(Arc::ptr_eq(&snap.frame, &frame));
        assert_eq!(snap.sequence, 1);
    }

    #[test]
    fn test_average_confidence_ignores_unknown() {
        let face = |identity: Identity, confidence: f32| FaceResult {
            location: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            encoding: Encoding::new(vec![]),
            identity,
            confidence,
        };
        let detections = Detections::new(vec![
            face(Identity::Known("a".into()), 80.0),
            face(Identity::Unknown, 0.0),
            face(Identity::Known("b".into()), 60.0),
        ]);
        assert_eq!(detections.average_confidence(), Some(70.0));
        assert_eq!(Detections::default().average_confidence(), None);
    }
}
