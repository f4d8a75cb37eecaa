//! Application state shared by the console loop and the GUI.

use crate::config::{clamp_cooldown, Config};
use crate::engine::{CaptureEngine, CaptureEvent};
use crate::store::{LogEntry, LogStore, Person, StoreError};
use chrono::{Local, NaiveDateTime};
use facewatch_core::analyzer::{self, AnalyzeError, Analyzer, SharedAnalyzer};
use facewatch_core::history::Cooldown;
use facewatch_core::matcher::UNKNOWN_LABEL;
use facewatch_core::{
    overlay, BoundingBox, DistanceMatcher, FrameSampler, GalleryError, GalleryStore, HistoryError,
    HistoryRecord, HistoryRecorder, HistoryStats, Pipeline, RecordOutcome, Snapshot,
};
use facewatch_hw::{CameraError, FrameSource};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("face models are not loaded; recognition is unavailable")]
    RecognitionUnavailable,
    #[error("database is unavailable")]
    DatabaseUnavailable,
    #[error("no frame captured yet")]
    NoFrame,
    #[error("capture is already running")]
    AlreadyRunning,
}

/// Something the front end may want to show after [`Session::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Logged(HistoryRecord),
    UnknownSaved(PathBuf),
    CaptureEnded(String),
}

pub struct Session {
    config: Config,
    gallery: GalleryStore,
    history: HistoryRecorder,
    store: Option<LogStore>,
    analyzer: Option<SharedAnalyzer>,
    engine: Option<CaptureEngine>,
    events: Option<mpsc::UnboundedReceiver<CaptureEvent>>,
    latest: Option<Arc<Snapshot>>,
    unknown_cooldown: Cooldown,
}

impl Session {
    /// Load models, gallery, history and database. Failures in any of them
    /// degrade the session rather than abort it.
    pub fn open(config: Config) -> Self {
        let model_dir = config.model_dir();
        let analyzer = match Analyzer::load_onnx(&model_dir) {
            Ok(analyzer) => {
                tracing::info!(dir = %model_dir.display(), metric = ?analyzer.metric(), "face models loaded");
                Some(analyzer.shared())
            }
            Err(e) => {
                tracing::warn!(dir = %model_dir.display(), error = %e, "face models unavailable; recognition disabled");
                None
            }
        };

        let store = match LogStore::open(&config.db_path()) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::error!(error = %e, "failed to open database; database features disabled");
                None
            }
        };

        Self::with_parts(config, analyzer, store)
    }

    pub fn with_parts(config: Config, analyzer: Option<SharedAnalyzer>, store: Option<LogStore>) -> Self {
        let mut gallery = match GalleryStore::open(config.gallery_path(), config.known_faces_dir()) {
            Ok(gallery) => gallery,
            Err(e) => {
                tracing::error!(error = %e, "failed to load face gallery; starting empty");
                GalleryStore::empty(config.gallery_path(), config.known_faces_dir())
            }
        };

        if let Some(analyzer) = &analyzer {
            let seeded = analyzer::lock(analyzer)
                .map_err(GalleryError::from)
                .and_then(|mut a| gallery.bootstrap_from_images(&mut a));
            if let Err(e) = seeded {
                tracing::warn!(error = %e, "could not seed gallery from images");
            }
        }

        let history = match HistoryRecorder::load(config.history_csv(), config.cooldown(), config.auto_save) {
            Ok(history) => history,
            Err(e) => {
                tracing::error!(error = %e, "failed to load recognition history; starting empty");
                HistoryRecorder::new(config.history_csv(), config.cooldown(), config.auto_save)
            }
        };

        if let Some(store) = &store {
            let now = Local::now().naive_local();
            for name in gallery.names() {
                if let Err(e) = store.add_person(name, Some(&gallery.image_path_for(name)), now) {
                    tracing::warn!(name, error = %e, "failed to register person in database");
                }
            }
        }

        let unknown_cooldown = Cooldown::new(config.cooldown());
        Self {
            config,
            gallery,
            history,
            store,
            analyzer,
            engine: None,
            events: None,
            latest: None,
            unknown_cooldown,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gallery(&self) -> &GalleryStore {
        &self.gallery
    }

    pub fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    pub fn recognition_available(&self) -> bool {
        self.analyzer.is_some()
    }

    pub fn is_capturing(&self) -> bool {
        self.engine.as_ref().is_some_and(CaptureEngine::is_running)
    }

    pub fn source(&self) -> Option<&str> {
        self.engine.as_ref().map(CaptureEngine::source)
    }

    /// Open `spec` (camera index, device path, image file or directory) and
    /// start recognizing.
    pub fn start_camera(&mut self, spec: &str) -> Result<(), SessionError> {
        if self.is_capturing() {
            return Err(SessionError::AlreadyRunning);
        }
        let source = facewatch_hw::open_source(spec, self.config.frame_width, self.config.frame_height)?;
        self.start_with_source(source)
    }

    pub fn start_with_source(&mut self, source: Box<dyn FrameSource>) -> Result<(), SessionError> {
        if self.is_capturing() {
            return Err(SessionError::AlreadyRunning);
        }
        let analyzer = self.analyzer.clone().ok_or(SessionError::RecognitionUnavailable)?;
        let metric = analyzer::lock(&analyzer)?.metric();
        let pipeline = Pipeline::new(
            analyzer,
            DistanceMatcher::new(metric, self.config.tolerance),
            FrameSampler::new(self.config.process_every, self.config.downscale),
        );

        self.stop_camera();
        let (engine, events) = CaptureEngine::start(source, pipeline, self.gallery.snapshot(), self.config.log_unknown);
        tracing::info!(source = %engine.source(), "capture started");
        self.engine = Some(engine);
        self.events = Some(events);
        Ok(())
    }

    /// Stop capture and wait for the device to be released.
    pub fn stop_camera(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.stop();
        }
        self.events = None;
        self.latest = None;
    }

    /// Latest processed frame and its detections.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest.clone()
    }

    /// Pick up the newest snapshot and handle pending capture events.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        if let Some(engine) = &self.engine {
            if let Some(snapshot) = engine.latest() {
                self.latest = Some(snapshot);
            }
        }

        let mut pending = Vec::new();
        if let Some(events) = &mut self.events {
            while let Ok(event) = events.try_recv() {
                pending.push(event);
            }
        }

        let mut out = Vec::new();
        for event in pending {
            match event {
                CaptureEvent::Recognized { name, confidence, at } => {
                    if let Some(record) = self.record_recognition(&name, confidence, at) {
                        out.push(SessionEvent::Logged(record));
                    }
                }
                CaptureEvent::Unknown { frame, location, at } => {
                    if let Some(path) = self.record_unknown(&frame, &location, at) {
                        out.push(SessionEvent::UnknownSaved(path));
                    }
                }
                CaptureEvent::Ended(reason) => {
                    if let Some(mut engine) = self.engine.take() {
                        engine.stop();
                        // The final frame may have landed after the read above.
                        if let Some(snapshot) = engine.latest() {
                            self.latest = Some(snapshot);
                        }
                    }
                    self.events = None;
                    out.push(SessionEvent::CaptureEnded(reason));
                    break;
                }
            }
        }
        out
    }

    fn record_recognition(&mut self, name: &str, confidence: f32, at: NaiveDateTime) -> Option<HistoryRecord> {
        let RecordOutcome::Logged(record) = self.history.record(name, confidence, at) else {
            return None;
        };
        if let Some(store) = &self.store {
            let fraction = f64::from(record.confidence) / 100.0;
            if let Err(e) = store.log_recognition(name, fraction, None, record.timestamp) {
                tracing::error!(name, error = %e, "failed to log recognition to database");
            }
        }
        Some(record)
    }

    fn record_unknown(&mut self, frame: &RgbImage, location: &BoundingBox, at: NaiveDateTime) -> Option<PathBuf> {
        if !self.config.log_unknown || !self.unknown_cooldown.admit(UNKNOWN_LABEL, at) {
            return None;
        }
        let (left, top, right, bottom) = location.pixel_rect(frame.width(), frame.height())?;
        let crop = image::imageops::crop_imm(frame, left, top, right - left, bottom - top).to_image();
        let path = self
            .config
            .unknown_dir()
            .join(format!("unknown_{}.jpg", at.format("%Y%m%d_%H%M%S_%3f")));

        let saved = std::fs::create_dir_all(self.config.unknown_dir())
            .map_err(SessionError::from)
            .and_then(|_| crop.save(&path).map_err(SessionError::from));
        if let Err(e) = saved {
            tracing::error!(path = %path.display(), error = %e, "failed to save unknown face");
            return None;
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.log_unknown_face(&path, None, at) {
                tracing::error!(error = %e, "failed to log unknown face to database");
            }
        }
        tracing::info!(path = %path.display(), "unknown face saved");
        Some(path)
    }

    /// Register the single face in the latest frame.
    pub fn add_face_from_frame(&mut self, name: &str) -> Result<PathBuf, SessionError> {
        let snapshot = self.latest.clone().ok_or(SessionError::NoFrame)?;
        self.add_face(name, &snapshot.frame)
    }

    pub fn add_face_from_file(&mut self, path: &Path, name: &str) -> Result<PathBuf, SessionError> {
        let image = image::open(path)?.to_rgb8();
        self.add_face(name, &image)
    }

    fn add_face(&mut self, name: &str, image: &RgbImage) -> Result<PathBuf, SessionError> {
        let analyzer = self.analyzer.clone().ok_or(SessionError::RecognitionUnavailable)?;
        let registered = {
            let mut analyzer = analyzer::lock(&analyzer)?;
            self.gallery.add(name, image, &mut analyzer)?
        };

        if let Some(store) = &self.store {
            let now = Local::now().naive_local();
            if let Err(e) = store.add_person(&registered.name, Some(&registered.image_path), now) {
                tracing::error!(name = %registered.name, error = %e, "failed to register person in database");
            }
        }
        self.publish_gallery();
        Ok(registered.image_path)
    }

    /// Remove a person from the gallery, their images, and the database.
    pub fn remove_face(&mut self, name: &str) -> Result<(), SessionError> {
        let removed = self.gallery.remove(name)?;
        if let Some(store) = &mut self.store {
            if let Err(e) = store.delete_person(&removed.name) {
                tracing::error!(name = %removed.name, error = %e, "failed to delete person from database");
            }
        }
        self.publish_gallery();
        Ok(())
    }

    fn publish_gallery(&self) {
        if let Some(engine) = &self.engine {
            engine.update_gallery(self.gallery.snapshot());
        }
    }

    /// Save the latest frame, with boxes drawn, into the captures directory.
    pub fn save_screenshot(&self) -> Result<PathBuf, SessionError> {
        let snapshot = self.latest.as_ref().ok_or(SessionError::NoFrame)?;
        let mut image = (*snapshot.frame).clone();
        overlay::draw_results(&mut image, &snapshot.detections, self.gallery.len());

        let dir = self.config.captures_dir();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("capture_{}.jpg", Local::now().format("%Y%m%d_%H%M%S")));
        image.save(&path)?;
        tracing::info!(path = %path.display(), "screenshot saved");
        Ok(path)
    }

    pub fn today(&self) -> Vec<&HistoryRecord> {
        self.history.on_date(Local::now().date_naive())
    }

    pub fn stats(&self) -> HistoryStats {
        self.history.stats()
    }

    pub fn export_history(&self, path: &Path) -> Result<usize, SessionError> {
        Ok(self.history.export_to(path)?)
    }

    pub fn clear_history(&mut self) -> Result<(), SessionError> {
        self.unknown_cooldown.reset();
        Ok(self.history.clear()?)
    }

    pub fn db_history(&self, name: Option<&str>, limit: Option<usize>) -> Result<Vec<LogEntry>, SessionError> {
        let store = self.store.as_ref().ok_or(SessionError::DatabaseUnavailable)?;
        Ok(store.recognition_history(name, limit)?)
    }

    /// Registered people and unknown-face count from the database.
    pub fn db_summary(&self) -> Result<(Vec<Person>, usize), SessionError> {
        let store = self.store.as_ref().ok_or(SessionError::DatabaseUnavailable)?;
        Ok((store.persons()?, store.unknown_face_count()?))
    }

    pub fn export_db(&self, path: &Path) -> Result<usize, SessionError> {
        let store = self.store.as_ref().ok_or(SessionError::DatabaseUnavailable)?;
        Ok(store.export_csv(path)?)
    }

    pub fn cooldown_secs(&self) -> u64 {
        self.history.cooldown().as_secs()
    }

    /// Set the recognition cooldown, clamped to 1..=60 seconds.
    pub fn set_cooldown(&mut self, secs: u64) {
        let window = Duration::from_secs(clamp_cooldown(secs));
        self.history.set_cooldown(window);
        self.unknown_cooldown.set_window(window);
    }

    pub fn set_auto_save(&mut self, enabled: bool) {
        self.history.set_auto_save(enabled);
    }

    /// Stop capture and write history to disk.
    pub fn shutdown(&mut self) {
        self.stop_camera();
        if let Err(e) = self.history.save() {
            tracing::error!(error = %e, "failed to save recognition history");
        }
        tracing::info!("session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_camera();
    }
}
