//! facewatch-core: face recognition engine.
//!
//! Gallery matching, frame sampling, cooldown-gated history and the
//! SCRFD/ArcFace backend running on ONNX Runtime.

pub mod analyzer;
pub mod detector;
pub mod gallery;
pub mod history;
pub mod matcher;
pub mod overlay;
pub mod persist;
pub mod pipeline;
pub mod recognizer;
pub mod sampler;
pub mod types;

use std::path::PathBuf;

pub use analyzer::{AnalyzeError, Analyzer, SharedAnalyzer};
pub use gallery::{GalleryError, GalleryStore, Registered};
pub use history::{HistoryError, HistoryRecord, HistoryRecorder, HistoryStats, RecordOutcome};
pub use matcher::{ConfidenceBand, DistanceMatcher, DistanceMetric, Identity, Matcher, Recognition};
pub use pipeline::{Detections, FaceResult, Pipeline, Snapshot};
pub use sampler::FrameSampler;
pub use types::{BoundingBox, Encoding, KnownFace};

/// Where the ONNX models live when not configured: `$XDG_DATA_HOME/facewatch/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facewatch/models")
}
