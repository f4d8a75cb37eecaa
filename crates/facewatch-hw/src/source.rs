//! Frame sources and `--video` argument resolution.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;
use std::path::{Path, PathBuf};

/// File extensions accepted as still images.
pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "tiff", "webp", "bmp"];

/// Anything that yields frames for the capture loop.
///
/// A read error ends the capture loop; sources release their device on drop.
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<Frame, CameraError>;

    /// Human-readable description for logs and status lines.
    fn describe(&self) -> String;
}

impl FrameSource for Camera {
    fn read(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }

    fn describe(&self) -> String {
        format!("{} ({}x{})", self.device_path, self.width, self.height)
    }
}

/// Plays back still images from disk, one per read, in file-name order.
pub struct ImageSequence {
    origin: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageSequence {
    /// Build a sequence from a single image file or a directory of images.
    pub fn open(path: &Path) -> Result<Self, CameraError> {
        let files = if path.is_dir() {
            let entries = std::fs::read_dir(path)
                .map_err(|e| CameraError::DeviceNotFound(format!("{}: {e}", path.display())))?;
            let mut files: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_image_file(p))
                .collect();
            files.sort();
            files
        } else if is_image_file(path) {
            vec![path.to_path_buf()]
        } else {
            return Err(CameraError::Unsupported(path.display().to_string()));
        };

        if files.is_empty() {
            return Err(CameraError::DeviceNotFound(format!(
                "{}: no images found",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), images = files.len(), "opened image sequence");

        Ok(Self {
            origin: path.to_path_buf(),
            files,
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn read(&mut self) -> Result<Frame, CameraError> {
        let Some(path) = self.files.get(self.next) else {
            return Err(CameraError::EndOfStream(self.origin.display().to_string()));
        };
        let image = image::open(path)
            .map_err(|e| CameraError::CaptureFailed(format!("{}: {e}", path.display())))?
            .to_rgb8();
        let frame = Frame::new(image, self.next as u32);
        self.next += 1;
        Ok(frame)
    }

    fn describe(&self) -> String {
        format!("{} ({} images)", self.origin.display(), self.files.len())
    }
}

/// Where a `--video` argument points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Device(String),
    Images(PathBuf),
}

impl SourceSpec {
    /// Resolve a `--video` value: a bare index maps to `/dev/video<N>`,
    /// existing image files and directories become image sequences, and
    /// anything else is treated as a device path.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if !spec.is_empty() && spec.chars().all(|c| c.is_ascii_digit()) {
            return Self::Device(format!("/dev/video{spec}"));
        }
        let path = Path::new(spec);
        if path.is_dir() || (path.is_file() && is_image_file(path)) {
            Self::Images(path.to_path_buf())
        } else {
            Self::Device(spec.to_string())
        }
    }
}

/// Open the source described by a `--video` value.
pub fn open_source(spec: &str, width: u32, height: u32) -> Result<Box<dyn FrameSource>, CameraError> {
    match SourceSpec::parse(spec) {
        SourceSpec::Device(path) => Ok(Box::new(Camera::open(&path, width, height)?)),
        SourceSpec::Images(path) => Ok(Box::new(ImageSequence::open(&path)?)),
    }
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_parse_device_index() {
        assert_eq!(SourceSpec::parse("0"), SourceSpec::Device("/dev/video0".into()));
        assert_eq!(SourceSpec::parse(" 2 "), SourceSpec::Device("/dev/video2".into()));
    }

    #[test]
    fn test_parse_device_path() {
        assert_eq!(
            SourceSpec::parse("/dev/video4"),
            SourceSpec::Device("/dev/video4".into())
        );
    }

    #[test]
    fn test_parse_image_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            SourceSpec::parse(dir.path().to_str().unwrap()),
            SourceSpec::Images(dir.path().to_path_buf())
        );
    }

    #[test]
    fn test_is_image_file_case_insensitive() {
        assert!(is_image_file(Path::new("a/Alice_Smith.JPG")));
        assert!(is_image_file(Path::new("bob.webp")));
        assert!(!is_image_file(Path::new("notes.txt")));
        assert!(!is_image_file(Path::new("noext")));
    }

    #[test]
    fn test_image_sequence_plays_in_order_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(4, 4).save(dir.path().join("b.png")).unwrap();
        RgbImage::new(2, 2).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("readme.txt"), "skip me").unwrap();

        let mut seq = ImageSequence::open(dir.path()).unwrap();
        assert_eq!(seq.len(), 2);

        let first = seq.read().unwrap();
        assert_eq!(first.image.dimensions(), (2, 2));
        assert_eq!(first.sequence, 0);
        let second = seq.read().unwrap();
        assert_eq!(second.image.dimensions(), (4, 4));

        assert!(matches!(seq.read(), Err(CameraError::EndOfStream(_))));
    }

    #[test]
    fn test_image_sequence_empty_dir_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageSequence::open(dir.path()).is_err());
    }

    #[test]
    fn test_open_missing_device() {
        let result = open_source("/dev/definitely-not-a-camera", 640, 480);
        assert!(matches!(result, Err(CameraError::DeviceNotFound(_))));
    }
}
