//! Known-face gallery: names paired with encodings, persisted as JSON, with
//! one reference image per person.

use crate::analyzer::{AnalyzeError, Analyzer};
use crate::persist;
use crate::types::{name_key, normalize_name, safe_file_stem, Encoding, KnownFace};
use facewatch_hw::source::is_image_file;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("no face found in image")]
    NoFace,
    #[error("{0} faces found, expected exactly one")]
    MultipleFaces(usize),
    #[error("{0} is not in the gallery")]
    NotFound(String),
    #[error("gallery file is corrupt: {0}")]
    Corrupt(String),
    #[error("face analysis failed: {0}")]
    Analyze(#[from] AnalyzeError),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("gallery I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// On-disk layout: two index-aligned lists.
#[derive(Serialize, Deserialize, Default)]
struct GalleryFile {
    names: Vec<String>,
    encodings: Vec<Encoding>,
}

/// Outcome of a successful [`GalleryStore::add`].
#[derive(Debug, Clone, PartialEq)]
pub struct Registered {
    /// Name as stored. Re-registering keeps the original spelling.
    pub name: String,
    pub image_path: PathBuf,
    /// False when an existing entry was replaced.
    pub is_new: bool,
}

pub struct GalleryStore {
    faces: Vec<KnownFace>,
    path: PathBuf,
    images_dir: PathBuf,
    /// True when the gallery file existed at open time.
    loaded: bool,
}

impl GalleryStore {
    /// Load the gallery at `path`. A missing file yields an empty gallery.
    pub fn open(path: impl Into<PathBuf>, images_dir: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let path = path.into();
        let images_dir = images_dir.into();

        let (faces, loaded) = match std::fs::read(&path) {
            Ok(bytes) => (decode(&bytes)?, true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Vec::new(), false),
            Err(e) => return Err(e.into()),
        };
        if loaded {
            tracing::info!(count = faces.len(), path = %path.display(), "loaded face gallery");
        }

        Ok(Self {
            faces,
            path,
            images_dir,
            loaded,
        })
    }

    /// An empty gallery that will persist to `path`, used when the existing
    /// file could not be read.
    pub fn empty(path: impl Into<PathBuf>, images_dir: impl Into<PathBuf>) -> Self {
        Self {
            faces: Vec::new(),
            path: path.into(),
            images_dir: images_dir.into(),
            loaded: false,
        }
    }

    /// Seed an unsaved gallery from the photos in the images directory.
    ///
    /// Each file's stem (underscores read as spaces) names the person; the
    /// first detected face is encoded. Unreadable or faceless images are
    /// skipped. Returns how many people were added.
    pub fn bootstrap_from_images(&mut self, analyzer: &mut Analyzer) -> Result<usize, GalleryError> {
        if self.loaded {
            return Ok(0);
        }
        let entries = match std::fs::read_dir(&self.images_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| is_image_file(p))
            .collect();
        paths.sort();

        let mut added = 0;
        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let name = normalize_name(&stem.replace('_', " "));
            if name.is_empty() {
                continue;
            }
            let image = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable image");
                    continue;
                }
            };
            match analyzer.analyze(&image) {
                Ok(faces) => match faces.into_iter().next() {
                    Some(face) => {
                        tracing::debug!(name = %name, "encoded known face");
                        self.upsert(name, face.encoding);
                        added += 1;
                    }
                    None => tracing::warn!(path = %path.display(), "no face found, skipping"),
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "face analysis failed, skipping")
                }
            }
        }

        if added > 0 {
            tracing::info!(count = added, dir = %self.images_dir.display(), "seeded gallery from images");
            self.persist();
        }
        Ok(added)
    }

    /// Register the single face in `image` under `name`, replacing any
    /// existing entry with the same name.
    ///
    /// Nothing changes unless exactly one face is found.
    pub fn add(&mut self, name: &str, image: &RgbImage, analyzer: &mut Analyzer) -> Result<Registered, GalleryError> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Err(GalleryError::EmptyName);
        }

        let mut faces = analyzer.analyze(image)?;
        let face = match faces.len() {
            0 => return Err(GalleryError::NoFace),
            1 => faces.remove(0),
            n => return Err(GalleryError::MultipleFaces(n)),
        };

        let (name, is_new) = self.upsert(name, face.encoding);
        let image_path = self.image_path_for(&name);
        if let Err(e) = save_image(image, &image_path) {
            tracing::error!(path = %image_path.display(), error = %e, "failed to store face image");
        }

        tracing::info!(name = %name, new = is_new, total = self.faces.len(), "face registered");
        self.persist();
        Ok(Registered {
            name,
            image_path,
            is_new,
        })
    }

    /// Forget `name` and delete its stored images.
    pub fn remove(&mut self, name: &str) -> Result<KnownFace, GalleryError> {
        let key = name_key(name);
        let idx = self
            .faces
            .iter()
            .position(|f| name_key(&f.name) == key)
            .ok_or_else(|| GalleryError::NotFound(normalize_name(name)))?;
        let removed = self.faces.remove(idx);

        for file in [
            self.images_dir.join(format!("{}.jpg", removed.name)),
            self.image_path_for(&removed.name),
        ] {
            match std::fs::remove_file(&file) {
                Ok(()) => tracing::debug!(path = %file.display(), "deleted face image"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %file.display(), error = %e, "failed to delete face image"),
            }
        }

        tracing::info!(name = %removed.name, total = self.faces.len(), "face removed");
        self.persist();
        Ok(removed)
    }

    pub fn faces(&self) -> &[KnownFace] {
        &self.faces
    }

    pub fn names(&self) -> Vec<&str> {
        self.faces.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        let key = name_key(name);
        self.faces.iter().any(|f| name_key(&f.name) == key)
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Immutable copy for the capture thread.
    pub fn snapshot(&self) -> Arc<[KnownFace]> {
        Arc::from(self.faces.as_slice())
    }

    pub fn image_path_for(&self, name: &str) -> PathBuf {
        self.images_dir.join(format!("{}.jpg", safe_file_stem(name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the gallery file.
    pub fn save(&self) -> Result<(), GalleryError> {
        let file = GalleryFile {
            names: self.faces.iter().map(|f| f.name.clone()).collect(),
            encodings: self.faces.iter().map(|f| f.encoding.clone()).collect(),
        };
        let bytes = serde_json::to_vec(&file).map_err(|e| GalleryError::Io(e.into()))?;
        persist::write_atomic(&self.path, &bytes)?;
        Ok(())
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            tracing::error!(path = %self.path.display(), error = %e, "failed to save face gallery");
        }
    }

    /// Returns the stored name and whether it was newly inserted.
    fn upsert(&mut self, name: String, encoding: Encoding) -> (String, bool) {
        let key = name_key(&name);
        match self.faces.iter_mut().find(|f| name_key(&f.name) == key) {
            Some(existing) => {
                existing.encoding = encoding;
                (existing.name.clone(), false)
            }
            None => {
                self.faces.push(KnownFace {
                    name: name.clone(),
                    encoding,
                });
                (name, true)
            }
        }
    }
}

fn decode(bytes: &[u8]) -> Result<Vec<KnownFace>, GalleryError> {
    let file: GalleryFile =
        serde_json::from_slice(bytes).map_err(|e| GalleryError::Corrupt(e.to_string()))?;
    if file.names.len() != file.encodings.len() {
        return Err(GalleryError::Corrupt(format!(
            "{} names but {} encodings",
            file.names.len(),
            file.encodings.len()
        )));
    }
    if let Some(first) = file.encodings.first() {
        if let Some(bad) = file.encodings.iter().position(|e| e.len() != first.len()) {
            return Err(GalleryError::Corrupt(format!(
                "encoding for {} has {} values, expected {}",
                file.names[bad],
                file.encodings[bad].len(),
                first.len()
            )));
        }
    }
    Ok(file
        .names
        .into_iter()
        .zip(file.encodings)
        .map(|(name, encoding)| KnownFace { name, encoding })
        .collect())
}

fn save_image(image: &RgbImage, path: &Path) -> Result<(), GalleryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    image.save(path)?;
    Ok(())
}
