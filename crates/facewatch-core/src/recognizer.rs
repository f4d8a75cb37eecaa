//! Face encoding capability and its ArcFace implementation.
//!
//! Each detected face is cropped to a square around its box, resized to the
//! 112x112 model input and turned into an L2-normalized 512-d embedding.

use crate::matcher::DistanceMetric;
use crate::types::{BoundingBox, Encoding};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the image")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns detected faces into encodings.
pub trait FaceEncoder: Send {
    /// One encoding per box, in the same order.
    fn encode(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Encoding>, RecognizerError>;

    /// How encodings from this model are compared.
    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Euclidean
    }
}

/// ArcFace (w600k_r50) encoder.
pub struct ArcFaceEncoder {
    session: Session,
}

impl ArcFaceEncoder {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");

        Ok(Self { session })
    }

    fn embed(&mut self, crop: &RgbImage) -> Result<Encoding, RecognizerError> {
        let input = preprocess(crop);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Encoding::new(l2_normalize(raw)))
    }
}

impl FaceEncoder for ArcFaceEncoder {
    fn encode(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Encoding>, RecognizerError> {
        faces
            .iter()
            .map(|face| {
                let crop = face_crop(image, face).ok_or(RecognizerError::EmptyCrop)?;
                self.embed(&crop)
            })
            .collect()
    }

    /// ArcFace embeddings compare by angle; `1 - cos` puts the usual
    /// 0.4 similarity cut at the 0.6 distance tolerance.
    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Cosine
    }
}

/// Square crop centred on the box, resized to the model input.
fn face_crop(image: &RgbImage, face: &BoundingBox) -> Option<RgbImage> {
    let side = face.width.max(face.height);
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;
    let square = BoundingBox::new(cx - side / 2.0, cy - side / 2.0, side, side);
    let (left, top, right, bottom) = square.pixel_rect(image.width(), image.height())?;

    let view = imageops::crop_imm(image, left, top, right - left, bottom - top).to_image();
    Some(imageops::resize(
        &view,
        ARCFACE_INPUT_SIZE,
        ARCFACE_INPUT_SIZE,
        FilterType::Triangle,
    ))
}

/// 112x112 RGB crop into a normalized NCHW tensor.
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in crop.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        if x >= size || y >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, y, x]] = (pixel.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape_and_range() {
        let crop = RgbImage::from_pixel(112, 112, image::Rgb([255, 0, 128]));
        let tensor = preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] - 0.5 / ARCFACE_STD).abs() < 1e-6);
    }

    #[test]
    fn test_face_crop_is_model_sized() {
        let image = RgbImage::new(640, 480);
        let crop = face_crop(&image, &BoundingBox::new(100.0, 100.0, 80.0, 120.0)).unwrap();
        assert_eq!(crop.dimensions(), (ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE));
    }

    #[test]
    fn test_face_crop_outside_image() {
        let image = RgbImage::new(64, 64);
        assert!(face_crop(&image, &BoundingBox::new(200.0, 200.0, 10.0, 10.0)).is_none());
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
