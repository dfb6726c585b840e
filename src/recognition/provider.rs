//! Embedding provider interface
//!
//! Face detection and embedding extraction live outside this service; the
//! engine only sees the provider's output: per-face bounding box, embedding
//! vector, detection score, and the quality measurements the enrollment
//! gates threshold against. The model is loaded once at startup and treated
//! as read-only afterwards.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Fixed embedding dimensionality the engine stores and compares.
pub const EMBEDDING_DIM: usize = 512;

/// Quality measurements for one detected face, computed by the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceQuality {
    /// Sharpness metric (Laplacian-variance style; higher = sharper)
    pub sharpness: f32,
    /// Head pose angles in degrees
    pub yaw_deg: f32,
    pub pitch_deg: f32,
    pub roll_deg: f32,
}

/// One face detected in an image.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    /// Bounding box as [x, y, width, height] in pixels
    pub bbox: [f32; 4],
    /// Raw embedding vector (normalized by the engine before use)
    pub embedding: Vec<f32>,
    /// Detector confidence (0..1)
    pub detection_score: f32,
    pub quality: FaceQuality,
}

impl DetectedFace {
    /// Smaller of the face box's width and height.
    pub fn face_size(&self) -> f32 {
        self.bbox[2].min(self.bbox[3])
    }
}

/// External face detection + embedding extraction backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Detect faces in an encoded image and return their embeddings.
    /// An empty vec means no face was found.
    async fn embed(&self, image: &[u8]) -> Result<Vec<DetectedFace>>;
}

/// Normalize a vector to unit length.
///
/// Rejects vectors of the wrong dimension and degenerate (zero or
/// non-finite) vectors, which cannot be compared by cosine similarity.
pub fn normalize(vector: &[f32]) -> Result<Vec<f32>> {
    if vector.len() != EMBEDDING_DIM {
        return Err(Error::InvalidImage(format!(
            "Embedding has dimension {}, expected {}",
            vector.len(),
            EMBEDDING_DIM
        )));
    }

    let norm_sq: f32 = vector.iter().map(|v| v * v).sum();
    if !norm_sq.is_finite() || norm_sq <= f32::EPSILON {
        return Err(Error::InvalidImage(
            "Embedding vector is zero or non-finite".to_string(),
        ));
    }

    let norm = norm_sq.sqrt();
    Ok(vector.iter().map(|v| v / norm).collect())
}

/// Cosine similarity between two unit-normalized vectors (their dot
/// product).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_produces_unit_length() {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[0] = 3.0;
        v[1] = 4.0;

        let unit = normalize(&v).unwrap();
        let norm: f32 = unit.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((unit[0] - 0.6).abs() < 1e-6);
        assert!((unit[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_rejects_bad_vectors() {
        assert!(normalize(&[1.0, 2.0]).is_err());
        assert!(normalize(&vec![0.0f32; EMBEDDING_DIM]).is_err());

        let mut nan = vec![0.0f32; EMBEDDING_DIM];
        nan[0] = f32::NAN;
        assert!(normalize(&nan).is_err());
    }

    #[test]
    fn test_cosine_of_identical_unit_vectors_is_one() {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[7] = 1.0;
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);

        let mut w = vec![0.0f32; EMBEDDING_DIM];
        w[8] = 1.0;
        assert!(cosine_similarity(&v, &w).abs() < 1e-6);
    }
}
