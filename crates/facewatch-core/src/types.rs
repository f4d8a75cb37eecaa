use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
            landmarks: None,
        }
    }

    /// Multiply every coordinate (box and landmarks) by `factor`.
    ///
    /// Used to map detections from a downscaled frame back to full resolution.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * factor, ly * factor))),
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.right().min(other.right()) - self.x.max(other.x)).max(0.0);
        let iy = (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Integer pixel rectangle `(left, top, right, bottom)` clipped to a
    /// `width` x `height` image. `None` when nothing of the box is visible.
    pub fn pixel_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let left = self.x.floor().max(0.0) as u32;
        let top = self.y.floor().max(0.0) as u32;
        let right = (self.right().ceil().max(0.0) as u32).min(width);
        let bottom = (self.bottom().ceil().max(0.0) as u32).min(height);
        (right > left && bottom > top).then_some((left, top, right, bottom))
    }
}

/// Face encoding: a fixed-length vector produced by the embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding {
    pub values: Vec<f32>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn cosine_similarity(&self, other: &Encoding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Euclidean distance between two encodings.
    pub fn euclidean_distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A registered identity in the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownFace {
    pub name: String,
    pub encoding: Encoding,
}

/// Trim and collapse internal whitespace: `"  Ada   Lovelace "` -> `"Ada Lovelace"`.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Key used for name uniqueness: normalized and lowercased.
pub fn name_key(name: &str) -> String {
    normalize_name(name).to_lowercase()
}

/// File stem used for a person's stored image: spaces become underscores.
pub fn safe_file_stem(name: &str) -> String {
    name.replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_box_and_landmarks() {
        let mut bbox = BoundingBox::new(10.0, 20.0, 30.0, 40.0);
        bbox.landmarks = Some([(1.0, 2.0); 5]);
        let big = bbox.scaled(4.0);
        assert_eq!((big.x, big.y, big.width, big.height), (40.0, 80.0, 120.0, 160.0));
        assert_eq!(big.landmarks.unwrap()[0], (4.0, 8.0));
        assert_eq!(big.confidence, bbox.confidence);
    }

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(50.0, 50.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_pixel_rect_clipped() {
        let bbox = BoundingBox::new(-5.0, 10.0, 20.0, 100.0);
        assert_eq!(bbox.pixel_rect(64, 48), Some((0, 10, 15, 48)));
        let outside = BoundingBox::new(100.0, 100.0, 5.0, 5.0);
        assert_eq!(outside.pixel_rect(64, 48), None);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Encoding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.cosine_similarity(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Encoding::new(vec![0.0, 0.0]);
        let b = Encoding::new(vec![1.0, 0.0]);
        assert_eq!(a.cosine_similarity(&b), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Encoding::new(vec![0.0, 0.0]);
        let b = Encoding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_encoding_serializes_as_plain_array() {
        let json = serde_json::to_string(&Encoding::new(vec![0.5, -1.0])).unwrap();
        assert_eq!(json, "[0.5,-1.0]");
    }

    #[test]
    fn test_name_normalization() {
        assert_eq!(normalize_name("  Ada   Lovelace "), "Ada Lovelace");
        assert_eq!(name_key("ADA  lovelace"), name_key("ada Lovelace"));
        assert_eq!(safe_file_stem("Ada Lovelace"), "Ada_Lovelace");
    }
}
