//! Relational log of people, recognitions and unknown faces (SQLite).

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS persons (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    name          TEXT NOT NULL UNIQUE,
    added_date    TEXT NOT NULL,
    image_path    TEXT,
    encoding_path TEXT
);

CREATE TABLE IF NOT EXISTS recognition_logs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id   INTEGER NOT NULL REFERENCES persons(id),
    timestamp   TEXT NOT NULL,
    confidence  REAL NOT NULL,
    image_path  TEXT
);

CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON recognition_logs(timestamp);

CREATE TABLE IF NOT EXISTS unknown_faces (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp     TEXT NOT NULL,
    image_path    TEXT NOT NULL,
    encoding_path TEXT
);
"#;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub name: String,
    pub added_date: String,
    pub image_path: Option<String>,
}

/// One row of `recognition_logs` joined with the person's name.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: i64,
    pub name: String,
    pub timestamp: String,
    /// Fraction in [0, 1].
    pub confidence: f64,
    pub image_path: Option<String>,
}

/// One connection for the lifetime of the session.
pub struct LogStore {
    conn: Connection,
}

impl LogStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self::init(Connection::open(path)?)?;
        tracing::info!(path = %path.display(), "recognition database opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert `name` if new and return its id. An existing person keeps its
    /// row; only a missing image path is filled in.
    pub fn add_person(&self, name: &str, image_path: Option<&Path>, at: NaiveDateTime) -> Result<i64, StoreError> {
        let image = image_path.map(|p| p.to_string_lossy().into_owned());
        self.conn.execute(
            "INSERT OR IGNORE INTO persons (name, added_date, image_path) VALUES (?1, ?2, ?3)",
            params![name, fmt(at), image],
        )?;
        self.conn.execute(
            "UPDATE persons SET image_path = ?2 WHERE name = ?1 AND image_path IS NULL",
            params![name, image],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM persons WHERE name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn person_id(&self, name: &str) -> Result<Option<i64>, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT id FROM persons WHERE name = ?1", [name], |row| row.get(0))
            .optional()?)
    }

    /// Append a recognition for a registered person. Returns false (and
    /// writes nothing) when `name` is not in `persons`.
    pub fn log_recognition(
        &self,
        name: &str,
        confidence: f64,
        image_path: Option<&Path>,
        at: NaiveDateTime,
    ) -> Result<bool, StoreError> {
        let Some(person_id) = self.person_id(name)? else {
            tracing::debug!(name, "recognition for unregistered person not logged");
            return Ok(false);
        };
        self.conn.execute(
            "INSERT INTO recognition_logs (person_id, timestamp, confidence, image_path) VALUES (?1, ?2, ?3, ?4)",
            params![
                person_id,
                fmt(at),
                confidence.clamp(0.0, 1.0),
                image_path.map(|p| p.to_string_lossy().into_owned())
            ],
        )?;
        Ok(true)
    }

    pub fn log_unknown_face(
        &self,
        image_path: &Path,
        encoding_path: Option<&Path>,
        at: NaiveDateTime,
    ) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO unknown_faces (timestamp, image_path, encoding_path) VALUES (?1, ?2, ?3)",
            params![
                fmt(at),
                image_path.to_string_lossy(),
                encoding_path.map(|p| p.to_string_lossy().into_owned())
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn unknown_face_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM unknown_faces", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Most recent first, optionally filtered by name and capped at `limit`.
    pub fn recognition_history(&self, name: Option<&str>, limit: Option<usize>) -> Result<Vec<LogEntry>, StoreError> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = self.conn.prepare(
            r#"
            SELECT l.id, p.name, l.timestamp, l.confidence, l.image_path
            FROM recognition_logs l
            JOIN persons p ON p.id = l.person_id
            WHERE ?1 IS NULL OR p.name = ?1
            ORDER BY l.timestamp DESC, l.id DESC
            LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(params![name, limit], |row| {
            Ok(LogEntry {
                id: row.get(0)?,
                name: row.get(1)?,
                timestamp: row.get(2)?,
                confidence: row.get(3)?,
                image_path: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, rusqlite::Error>>()?)
    }

    pub fn persons(&self) -> Result<Vec<Person>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, added_date, image_path FROM persons ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(Person {
                name: row.get(0)?,
                added_date: row.get(1)?,
                image_path: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, rusqlite::Error>>()?)
    }

    /// Remove a person and all of their recognition logs atomically.
    pub fn delete_person(&mut self, name: &str) -> Result<bool, StoreError> {
        let tx = self.conn.transaction()?;
        let id: Option<i64> = tx
            .query_row("SELECT id FROM persons WHERE name = ?1", [name], |row| row.get(0))
            .optional()?;
        let Some(id) = id else {
            return Ok(false);
        };
        let logs = tx.execute("DELETE FROM recognition_logs WHERE person_id = ?1", [id])?;
        tx.execute("DELETE FROM persons WHERE id = ?1", [id])?;
        tx.commit()?;
        tracing::info!(name, logs, "person deleted from database");
        Ok(true)
    }

    /// Write the full recognition log as `name,timestamp,confidence,image_path`.
    pub fn export_csv(&self, path: &Path) -> Result<usize, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let entries = self.recognition_history(None, None)?;
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["name", "timestamp", "confidence", "image_path"])?;
        for entry in &entries {
            let confidence = format!("{:.4}", entry.confidence);
            writer.write_record([
                entry.name.as_str(),
                entry.timestamp.as_str(),
                confidence.as_str(),
                entry.image_path.as_deref().unwrap_or(""),
            ])?;
        }
        writer.flush()?;
        tracing::info!(rows = entries.len(), path = %path.display(), "database history exported");
        Ok(entries.len())
    }
}

fn fmt(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}
