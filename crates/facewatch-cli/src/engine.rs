use chrono::{Local, NaiveDateTime};
use facewatch_core::{BoundingBox, Identity, KnownFace, Pipeline, Snapshot};
use facewatch_hw::FrameSource;
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, watch};

/// Messages sent from the capture thread to the UI thread.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// A known face in a freshly analyzed frame.
    Recognized {
        name: String,
        confidence: f32,
        at: NaiveDateTime,
    },
    /// An unmatched face in a freshly analyzed frame.
    Unknown {
        frame: Arc<RgbImage>,
        location: BoundingBox,
        at: NaiveDateTime,
    },
    /// The source stopped producing frames; the loop has exited.
    Ended(String),
}

/// Handle to the capture thread.
///
/// The thread owns the frame source and the pipeline. It publishes one
/// [`Snapshot`] per frame through a single-slot watch channel and reports
/// recognitions over an unbounded mpsc channel.
pub struct CaptureEngine {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    snapshots: watch::Receiver<Option<Arc<Snapshot>>>,
    gallery: watch::Sender<Arc<[KnownFace]>>,
    source: String,
}

impl CaptureEngine {
    /// Spawn the capture loop on a dedicated OS thread. `Unknown` events are
    /// only sent when `report_unknown` is set.
    pub fn start(
        mut source: Box<dyn FrameSource>,
        mut pipeline: Pipeline,
        gallery: Arc<[KnownFace]>,
        report_unknown: bool,
    ) -> (Self, mpsc::UnboundedReceiver<CaptureEvent>) {
        let description = source.describe();
        let stop = Arc::new(AtomicBool::new(false));
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (gallery_tx, gallery_rx) = watch::channel(gallery);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("facewatch-capture".into())
            .spawn(move || {
                tracing::info!(source = %source.describe(), "capture thread started");
                while !thread_stop.load(Ordering::Acquire) {
                    let frame = match source.read() {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::warn!(error = %e, "frame source ended");
                            let _ = event_tx.send(CaptureEvent::Ended(e.to_string()));
                            break;
                        }
                    };

                    let gallery = Arc::clone(&gallery_rx.borrow());
                    let snapshot = Arc::new(pipeline.process(Arc::new(frame.image), &gallery));
                    if snapshot.fresh {
                        report(&snapshot, report_unknown, &event_tx);
                    }
                    snapshot_tx.send_replace(Some(snapshot));
                }
                // `source` drops here, releasing the device.
                tracing::info!("capture thread exiting");
            })
            .expect("failed to spawn capture thread");

        let engine = Self {
            stop,
            thread: Some(thread),
            snapshots: snapshot_rx,
            gallery: gallery_tx,
            source: description,
        };
        (engine, event_rx)
    }

    /// Most recent snapshot, if any frame has been processed yet.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.snapshots.borrow().clone()
    }

    /// Replace the gallery used for matching from the next frame on.
    pub fn update_gallery(&self, gallery: Arc<[KnownFace]>) {
        self.gallery.send_replace(gallery);
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the loop to exit and wait for it, so the device is released
    /// when this returns.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("capture thread panicked");
            }
            tracing::info!(source = %self.source, "capture stopped");
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn report(snapshot: &Snapshot, report_unknown: bool, events: &mpsc::UnboundedSender<CaptureEvent>) {
    let at = Local::now().naive_local();
    for face in snapshot.detections.faces() {
        let event = match &face.identity {
            Identity::Known(name) => CaptureEvent::Recognized {
                name: name.clone(),
                confidence: face.confidence,
                at,
            },
            Identity::Unknown if report_unknown => CaptureEvent::Unknown {
                frame: Arc::clone(&snapshot.frame),
                location: face.location.clone(),
                at,
            },
            Identity::Unknown => continue,
        };
        // The receiver is gone only while the engine is being torn down.
        let _ = events.send(event);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use facewatch_core::detector::{DetectorError, FaceDetector};
    use facewatch_core::recognizer::{FaceEncoder, RecognizerError};
    use facewatch_core::{Analyzer, Encoding};
    use facewatch_hw::{CameraError, Frame};

    /// Yields `remaining` blank frames, then reports end of stream.
    pub struct BlankFrames {
        pub remaining: usize,
        pub size: (u32, u32),
        pub sequence: u32,
    }

    impl BlankFrames {
        pub fn new(count: usize) -> Self {
            Self {
                remaining: count,
                size: (64, 48),
                sequence: 0,
            }
        }
    }

    impl FrameSource for BlankFrames {
        fn read(&mut self) -> Result<Frame, CameraError> {
            if self.remaining == 0 {
                return Err(CameraError::EndOfStream("blank".into()));
            }
            self.remaining -= 1;
            self.sequence += 1;
            Ok(Frame::new(RgbImage::new(self.size.0, self.size.1), self.sequence))
        }

        fn describe(&self) -> String {
            "blank frames".into()
        }
    }

    /// Always reports the same boxes.
    pub struct FixedDetector(pub Vec<BoundingBox>);

    impl FaceDetector for FixedDetector {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    /// Encodes a face as its box origin.
    pub struct OriginEncoder;

    impl FaceEncoder for OriginEncoder {
        fn encode(&mut self, _image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Encoding>, RecognizerError> {
            Ok(faces.iter().map(|f| Encoding::new(vec![f.x, f.y])).collect())
        }
    }

    pub fn analyzer(faces: Vec<BoundingBox>) -> Analyzer {
        Analyzer::new(Box::new(FixedDetector(faces)), Box::new(OriginEncoder))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use facewatch_core::{DistanceMatcher, DistanceMetric, Encoding, FrameSampler};
    use std::time::Duration;

    fn pipeline(faces: Vec<BoundingBox>) -> Pipeline {
        Pipeline::new(
            analyzer(faces).shared(),
            DistanceMatcher::new(DistanceMetric::Euclidean, 0.6),
            FrameSampler::new(1, 1),
        )
    }

    fn drain(mut rx: mpsc::UnboundedReceiver<CaptureEvent>) -> Vec<CaptureEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.blocking_recv() {
            let ended = matches!(event, CaptureEvent::Ended(_));
            events.push(event);
            if ended {
                break;
            }
        }
        events
    }

    #[test]
    fn test_reports_recognitions_then_end_of_stream() {
        let gallery: Arc<[KnownFace]> = Arc::from(vec![KnownFace {
            name: "Alice".into(),
            encoding: Encoding::new(vec![2.0, 3.0]),
        }]);
        let faces = vec![
            BoundingBox::new(2.0, 3.0, 10.0, 10.0),
            BoundingBox::new(30.0, 20.0, 10.0, 10.0),
        ];
        let (mut engine, rx) = CaptureEngine::start(Box::new(BlankFrames::new(2)), pipeline(faces), gallery, true);
        let events = drain(rx);
        engine.stop();

        let recognized = events
            .iter()
            .filter(|e| matches!(e, CaptureEvent::Recognized { name, .. } if name == "Alice"))
            .count();
        let unknown = events.iter().filter(|e| matches!(e, CaptureEvent::Unknown { .. })).count();
        assert_eq!(recognized, 2);
        assert_eq!(unknown, 2);
        assert!(matches!(events.last(), Some(CaptureEvent::Ended(_))));

        let latest = engine.latest().unwrap();
        assert_eq!(latest.sequence, 2);
        assert_eq!(latest.detections.len(), 2);
        assert!(!engine.is_running());
    }

    #[test]
    fn test_unknown_faces_not_sent_when_disabled() {
        let faces = vec![BoundingBox::new(30.0, 20.0, 10.0, 10.0)];
        let (mut engine, rx) =
            CaptureEngine::start(Box::new(BlankFrames::new(3)), pipeline(faces), Arc::from(Vec::new()), false);
        let events = drain(rx);
        engine.stop();

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], CaptureEvent::Ended(_)));
        assert_eq!(engine.latest().unwrap().detections.len(), 1);
    }

    #[test]
    fn test_stop_joins_running_thread() {
        let (mut engine, _rx) = CaptureEngine::start(
            Box::new(BlankFrames::new(usize::MAX)),
            pipeline(vec![]),
            Arc::from(Vec::new()),
            false,
        );
        std::thread::sleep(Duration::from_millis(20));
        engine.stop();
        assert!(!engine.is_running());
        engine.stop();
    }
}
