//! Cooldown-gated recognition history.
//!
//! A [`Cooldown`] rate-limits events per name; the [`HistoryRecorder`] keeps
//! the admitted events in memory (the session's source of truth) and mirrors
//! them to a CSV file on a best-effort basis.

use crate::persist;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("history I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("history CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Per-key rate limiter: remembers when each key was last admitted.
#[derive(Debug, Clone)]
pub struct Cooldown {
    window: TimeDelta,
    last: HashMap<String, NaiveDateTime>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window: to_delta(window),
            last: HashMap::new(),
        }
    }

    /// Admit `key` at `now` if it has never been admitted or its last
    /// admission is at least one window old. Rejections leave the stored
    /// instant untouched.
    pub fn admit(&mut self, key: &str, now: NaiveDateTime) -> bool {
        if let Some(last) = self.last.get(key) {
            if now.signed_duration_since(*last) < self.window {
                return false;
            }
        }
        self.last.insert(key.to_string(), now);
        true
    }

    pub fn last_admitted(&self, key: &str) -> Option<NaiveDateTime> {
        self.last.get(key).copied()
    }

    pub fn window(&self) -> Duration {
        self.window.to_std().unwrap_or_default()
    }

    pub fn set_window(&mut self, window: Duration) {
        self.window = to_delta(window);
    }

    pub fn reset(&mut self) {
        self.last.clear();
    }
}

fn to_delta(window: Duration) -> TimeDelta {
    TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX)
}

/// One logged recognition.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub timestamp: NaiveDateTime,
    pub name: String,
    /// Percentage in [0, 100].
    pub confidence: f32,
}

/// CSV row layout: `timestamp,name,confidence,date,time`.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    timestamp: String,
    name: String,
    confidence: String,
    date: String,
    time: String,
}

impl From<&HistoryRecord> for CsvRow {
    fn from(r: &HistoryRecord) -> Self {
        Self {
            timestamp: r.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            name: r.name.clone(),
            confidence: format!("{:.2}%", r.confidence),
            date: r.timestamp.format(DATE_FORMAT).to_string(),
            time: r.timestamp.format(TIME_FORMAT).to_string(),
        }
    }
}

impl CsvRow {
    fn into_record(self) -> Option<HistoryRecord> {
        let timestamp = NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).ok()?;
        let confidence = self.confidence.trim().trim_end_matches('%').parse().ok()?;
        Some(HistoryRecord {
            timestamp,
            name: self.name,
            confidence,
        })
    }
}

/// What happened to a recognition event.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Logged(HistoryRecord),
    /// Same name seen within the cooldown window.
    Suppressed,
}

/// Aggregate numbers for the history views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryStats {
    pub total: usize,
    pub unique_people: usize,
}

/// In-memory recognition log with CSV mirroring.
#[derive(Debug)]
pub struct HistoryRecorder {
    records: Vec<HistoryRecord>,
    cooldown: Cooldown,
    csv_path: PathBuf,
    auto_save: bool,
    /// Records `[..persisted]` are known to be on disk.
    persisted: usize,
}

impl HistoryRecorder {
    pub fn new(csv_path: impl Into<PathBuf>, cooldown: Duration, auto_save: bool) -> Self {
        Self {
            records: Vec::new(),
            cooldown: Cooldown::new(cooldown),
            csv_path: csv_path.into(),
            auto_save,
            persisted: 0,
        }
    }

    /// Open the recorder, reading any existing CSV history. Unparseable rows
    /// are skipped. Cooldown state always starts empty.
    pub fn load(
        csv_path: impl Into<PathBuf>,
        cooldown: Duration,
        auto_save: bool,
    ) -> Result<Self, HistoryError> {
        let mut recorder = Self::new(csv_path, cooldown, auto_save);
        if !recorder.csv_path.exists() {
            return Ok(recorder);
        }

        let mut reader = csv::Reader::from_path(&recorder.csv_path)?;
        for row in reader.deserialize::<CsvRow>() {
            match row.map(CsvRow::into_record) {
                Ok(Some(record)) => recorder.records.push(record),
                Ok(None) => tracing::warn!(path = %recorder.csv_path.display(), "skipping malformed history row"),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable history row"),
            }
        }
        recorder.persisted = recorder.records.len();
        tracing::info!(records = recorder.records.len(), "loaded recognition history");
        Ok(recorder)
    }

    /// Log a recognition of `name` at `now` unless the same name was logged
    /// less than one cooldown ago.
    ///
    /// With auto-save on, the new record is appended to the CSV; write
    /// failures are logged and the in-memory record is kept.
    pub fn record(&mut self, name: &str, confidence: f32, now: NaiveDateTime) -> RecordOutcome {
        if !self.cooldown.admit(name, now) {
            return RecordOutcome::Suppressed;
        }

        // Keep the log ordered even if the wall clock steps backwards.
        let timestamp = match self.records.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        let record = HistoryRecord {
            timestamp,
            name: name.to_string(),
            confidence: confidence.clamp(0.0, 100.0),
        };
        self.records.push(record.clone());
        tracing::info!(name, confidence, "recognition logged");

        if self.auto_save {
            if let Err(e) = self.flush() {
                tracing::error!(error = %e, path = %self.csv_path.display(), "failed to save recognition history");
            }
        }
        RecordOutcome::Logged(record)
    }

    /// Append records not yet on disk, writing the header if the file is new.
    pub fn flush(&mut self) -> Result<(), HistoryError> {
        if self.persisted >= self.records.len() {
            return Ok(());
        }
        if let Some(parent) = self.csv_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let needs_header = std::fs::metadata(&self.csv_path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.csv_path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        for record in &self.records[self.persisted..] {
            writer.serialize(CsvRow::from(record))?;
        }
        writer.flush()?;
        self.persisted = self.records.len();
        Ok(())
    }

    /// Rewrite the whole CSV from memory.
    pub fn save(&mut self) -> Result<(), HistoryError> {
        let path = self.csv_path.clone();
        write_csv(&path, &self.records)?;
        self.persisted = self.records.len();
        tracing::info!(records = self.records.len(), "saved recognition history");
        Ok(())
    }

    /// Write the current history to another file.
    pub fn export_to(&self, path: &Path) -> Result<usize, HistoryError> {
        write_csv(path, &self.records)?;
        Ok(self.records.len())
    }

    /// Drop all records and cooldown state, and truncate the CSV.
    pub fn clear(&mut self) -> Result<(), HistoryError> {
        self.records.clear();
        self.cooldown.reset();
        self.save()
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records logged on `date`.
    pub fn on_date(&self, date: NaiveDate) -> Vec<&HistoryRecord> {
        self.records
            .iter()
            .filter(|r| r.timestamp.date() == date)
            .collect()
    }

    pub fn stats(&self) -> HistoryStats {
        let unique: HashSet<&str> = self.records.iter().map(|r| r.name.as_str()).collect();
        HistoryStats {
            total: self.records.len(),
            unique_people: unique.len(),
        }
    }

    pub fn last_logged_at(&self, name: &str) -> Option<NaiveDateTime> {
        self.cooldown.last_admitted(name)
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown.window()
    }

    pub fn set_cooldown(&mut self, window: Duration) {
        self.cooldown.set_window(window);
        tracing::info!(secs = window.as_secs_f32(), "recognition cooldown set");
    }

    pub fn auto_save(&self) -> bool {
        self.auto_save
    }

    pub fn set_auto_save(&mut self, enabled: bool) {
        self.auto_save = enabled;
        tracing::info!(enabled, "history auto-save toggled");
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

fn write_csv(path: &Path, records: &[HistoryRecord]) -> Result<(), HistoryError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if records.is_empty() {
        writer.write_record(["timestamp", "name", "confidence", "date", "time"])?;
    }
    for record in records {
        writer.serialize(CsvRow::from(record))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| HistoryError::Io(e.into_error()))?;
    persist::write_atomic(path, &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            + TimeDelta::seconds(secs)
    }

    fn recorder(dir: &tempfile::TempDir) -> HistoryRecorder {
        HistoryRecorder::new(dir.path().join("history.csv"), DEFAULT_COOLDOWN, true)
    }

    #[test]
    fn test_second_sighting_within_cooldown_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = recorder(&dir);

        assert!(matches!(history.record("Alice", 85.0, at(0)), RecordOutcome::Logged(_)));
        assert_eq!(history.record("Alice", 85.0, at(3)), RecordOutcome::Suppressed);

        assert_eq!(history.len(), 1);
        assert_eq!(history.last_logged_at("Alice"), Some(at(0)));
    }

    #[test]
    fn test_cooldown_boundary_is_inclusive() {
        let mut cooldown = Cooldown::new(Duration::from_secs(5));
        assert!(cooldown.admit("Alice", at(0)));
        assert!(!cooldown.admit("Alice", at(4)));
        assert!(cooldown.admit("Alice", at(5)));
        assert_eq!(cooldown.last_admitted("Alice"), Some(at(5)));
    }

    #[test]
    fn test_cooldown_is_per_name() {
        let mut cooldown = Cooldown::new(Duration::from_secs(5));
        assert!(cooldown.admit("Alice", at(0)));
        assert!(cooldown.admit("Bob", at(1)));
        assert!(!cooldown.admit("Alice", at(2)));
    }

    #[test]
    fn test_clock_going_backwards_is_suppressed_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = recorder(&dir);
        history.record("Alice", 80.0, at(10));
        assert_eq!(history.record("Alice", 80.0, at(2)), RecordOutcome::Suppressed);

        // A different name at an earlier wall-clock time is clamped forward.
        history.record("Bob", 70.0, at(2));
        let stamps: Vec<_> = history.records().iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![at(10), at(10)]);
    }

    #[test]
    fn test_csv_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = recorder(&dir);
        history.record("Alice Smith", 85.0, at(0));
        history.record("Bob", 61.234, at(1));

        let text = std::fs::read_to_string(history.csv_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,name,confidence,date,time");
        assert_eq!(lines[1], "2025-03-14 09:00:00,Alice Smith,85.00%,2025-03-14,09:00:00");
        assert_eq!(lines[2], "2025-03-14 09:00:01,Bob,61.23%,2025-03-14,09:00:01");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_auto_save_off_defers_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = recorder(&dir);
        history.set_auto_save(false);
        history.record("Alice", 90.0, at(0));
        assert!(!history.csv_path().exists());

        history.set_auto_save(true);
        history.record("Bob", 90.0, at(1));
        let reloaded = HistoryRecorder::load(history.csv_path(), DEFAULT_COOLDOWN, true).unwrap();
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_reload_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = recorder(&dir);
        history.record("Alice", 85.0, at(0));
        history.record("Alice", 72.5, at(6));

        let reloaded = HistoryRecorder::load(history.csv_path(), DEFAULT_COOLDOWN, true).unwrap();
        assert_eq!(reloaded.records(), history.records());
        // Cooldown state is not persisted.
        assert_eq!(reloaded.last_logged_at("Alice"), None);
    }

    #[test]
    fn test_persistence_failure_keeps_memory() {
        let dir = tempfile::tempdir().unwrap();
        // The CSV path is a directory, so every write fails.
        let mut history = HistoryRecorder::new(dir.path(), DEFAULT_COOLDOWN, true);
        assert!(matches!(history.record("Alice", 85.0, at(0)), RecordOutcome::Logged(_)));
        assert_eq!(history.len(), 1);
        assert!(history.save().is_err());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_clear_resets_cooldown_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = recorder(&dir);
        history.record("Alice", 85.0, at(0));
        history.clear().unwrap();

        assert!(history.is_empty());
        assert!(matches!(history.record("Alice", 85.0, at(1)), RecordOutcome::Logged(_)));
        let reloaded = HistoryRecorder::load(history.csv_path(), DEFAULT_COOLDOWN, true).unwrap();
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_stats_today_and_export() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = recorder(&dir);
        history.record("Alice", 85.0, at(0));
        history.record("Bob", 75.0, at(1));
        history.record("Alice", 80.0, at(3600 * 24));

        assert_eq!(history.stats(), HistoryStats { total: 3, unique_people: 2 });
        let day = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert_eq!(history.on_date(day).len(), 2);

        let out = dir.path().join("export/copy.csv");
        assert_eq!(history.export_to(&out).unwrap(), 3);
        let copy = HistoryRecorder::load(&out, DEFAULT_COOLDOWN, false).unwrap();
        assert_eq!(copy.records(), history.records());
    }

    #[test]
    fn test_malformed_rows_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        std::fs::write(
            &path,
            "timestamp,name,confidence,date,time\n\
             2025-03-14 09:00:00,Alice,85.00%,2025-03-14,09:00:00\n\
             yesterday,Bob,??,x,y\n",
        )
        .unwrap();
        let history = HistoryRecorder::load(&path, DEFAULT_COOLDOWN, true).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.records()[0].name, "Alice");
    }

    #[test]
    fn test_set_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = recorder(&dir);
        history.set_cooldown(Duration::from_secs(1));
        assert_eq!(history.cooldown(), Duration::from_secs(1));
        history.record("Alice", 85.0, at(0));
        assert!(matches!(history.record("Alice", 85.0, at(1)), RecordOutcome::Logged(_)));
    }
}
