//! Enrollment service
//!
//! Turns a burst of captured frames into a small set of high-quality
//! reference embeddings for one student. Frames with zero or multiple faces
//! are dropped, quality gates filter the rest, survivors are scored and
//! deduplicated, and the top K are attached to the student atomically.

use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db;
use crate::error::{Error, Result};
use crate::recognition::provider::{cosine_similarity, normalize, DetectedFace, EmbeddingProvider};

/// Two embeddings closer than this cosine similarity are near-duplicates;
/// only the higher-scored one is kept.
const DEDUP_SIMILARITY: f32 = 0.995;

/// Composite quality score weights: detection confidence, sharpness,
/// frontality.
const W_DETECTION: f64 = 0.5;
const W_SHARPNESS: f64 = 0.3;
const W_FRONTALITY: f64 = 0.2;

/// Sharpness saturates at this value when normalized into [0, 1].
const SHARPNESS_SCALE: f64 = 200.0;

/// A surviving enrollment candidate: unit-normalized vector plus its score.
#[derive(Debug, Clone)]
pub struct ScoredEmbedding {
    pub vector: Vec<f32>,
    pub quality_score: f64,
}

/// Outcome summary of one enrollment run.
#[derive(Debug, Clone)]
pub struct EnrollmentSummary {
    pub total_frames: usize,
    pub valid_frames: usize,
    pub embeddings_saved: usize,
}

pub struct EnrollmentService {
    db: SqlitePool,
    provider: Arc<dyn EmbeddingProvider>,
}

impl EnrollmentService {
    pub fn new(db: SqlitePool, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { db, provider }
    }

    /// Run the full enrollment pipeline for a student and attach the
    /// selected embeddings. `max_embeddings` further caps the configured
    /// K maximum when provided.
    pub async fn enroll_frames(
        &self,
        student_id: Uuid,
        frames: &[Vec<u8>],
        max_embeddings: Option<usize>,
        config: &EngineConfig,
        now: NaiveDateTime,
    ) -> Result<EnrollmentSummary> {
        let student = db::students::get_by_id(&self.db, student_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Student {}", student_id)))?;

        let mut detections = Vec::with_capacity(frames.len());
        for frame in frames {
            detections.push(self.provider.embed(frame).await?);
        }

        let k_max = max_embeddings
            .unwrap_or(config.enrollment_k_max)
            .min(config.enrollment_k_max);
        let selected = select_embeddings(&detections, config, k_max)?;
        let valid_frames = selected.valid_frames;
        let kept = selected.kept;

        let mut tx = self.db.begin().await?;

        if config.enrollment_replace_existing {
            let replaced =
                db::students::soft_delete_embeddings(&mut tx, student_id, now).await?;
            if replaced > 0 {
                debug!("Replaced {} prior embeddings for {}", replaced, student.external_id);
            }
        }

        for embedding in &kept {
            db::students::insert_embedding(
                &mut tx,
                student_id,
                &embedding.vector,
                embedding.quality_score,
                now,
            )
            .await?;
        }

        tx.commit().await?;

        info!(
            "Enrolled {} embeddings for student {} ({} of {} frames usable)",
            kept.len(),
            student.external_id,
            valid_frames,
            frames.len()
        );

        Ok(EnrollmentSummary {
            total_frames: frames.len(),
            valid_frames,
            embeddings_saved: kept.len(),
        })
    }
}

/// Selection result before persistence.
pub struct Selection {
    pub valid_frames: usize,
    pub kept: Vec<ScoredEmbedding>,
}

/// Pure selection core: filter to single-face frames, apply quality gates,
/// score, dedup near-duplicates, keep the top `k_max`. Fails with
/// InsufficientQuality when fewer than `enrollment_k_min` survive.
pub fn select_embeddings(
    detections: &[Vec<DetectedFace>],
    config: &EngineConfig,
    k_max: usize,
) -> Result<Selection> {
    let mut scored: Vec<ScoredEmbedding> = Vec::new();

    for faces in detections {
        // Enrollment frames must contain exactly one face
        let face = match faces.as_slice() {
            [face] => face,
            _ => continue,
        };

        if !passes_quality_gates(face, config) {
            continue;
        }

        let vector = match normalize(&face.embedding) {
            Ok(v) => v,
            Err(_) => continue,
        };

        scored.push(ScoredEmbedding {
            vector,
            quality_score: quality_score(face),
        });
    }

    let valid_frames = scored.len();

    // Best first, then drop near-duplicates of anything already kept
    scored.sort_by(|a, b| {
        b.quality_score
            .partial_cmp(&a.quality_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<ScoredEmbedding> = Vec::new();
    for candidate in scored {
        if kept.len() >= k_max {
            break;
        }
        let duplicate = kept
            .iter()
            .any(|k| cosine_similarity(&k.vector, &candidate.vector) > DEDUP_SIMILARITY);
        if !duplicate {
            kept.push(candidate);
        }
    }

    if kept.len() < config.enrollment_k_min {
        return Err(Error::InsufficientQuality {
            kept: kept.len(),
            min: config.enrollment_k_min,
        });
    }

    Ok(Selection { valid_frames, kept })
}

/// Quality gates: minimum face size, sharpness, head-pose bounds.
fn passes_quality_gates(face: &DetectedFace, config: &EngineConfig) -> bool {
    face.face_size() >= config.min_face_size_px
        && face.quality.sharpness >= config.blur_threshold
        && face.quality.yaw_deg.abs() <= config.yaw_max_degrees
        && face.quality.pitch_deg.abs() <= config.pitch_max_degrees
        && face.quality.roll_deg.abs() <= config.roll_max_degrees
}

/// Composite frame score: detection confidence, normalized sharpness, and
/// frontality (yaw falloff).
fn quality_score(face: &DetectedFace) -> f64 {
    let detection = face.detection_score as f64;
    let sharpness = (face.quality.sharpness as f64 / SHARPNESS_SCALE).min(1.0);
    let frontality = (1.0 - face.quality.yaw_deg.abs() as f64 / 30.0).max(0.0);

    W_DETECTION * detection + W_SHARPNESS * sharpness + W_FRONTALITY * frontality
}
