//! Shared test infrastructure for faceattend integration tests
//!
//! Provides an in-memory database with the production schema, a manual
//! clock, a scripted embedding provider, and seeding helpers for the
//! course/student/timetable fixtures the scenarios need.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use faceattend::clock::ManualClock;
use faceattend::db;
use faceattend::db::models::Weekday;
use faceattend::error::Result;
use faceattend::recognition::{DetectedFace, EmbeddingProvider, FaceQuality, EMBEDDING_DIM};

/// Fresh in-memory database with the full production schema and default
/// settings.
pub async fn setup_pool() -> SqlitePool {
    // A single connection: every pooled connection of an in-memory SQLite
    // database would otherwise be its own empty database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    db::init_schema(&pool).await.expect("schema init");
    pool
}

/// A Friday in the test calendar.
pub const TEST_DATE: (i32, u32, u32) = (2025, 12, 19);

/// Timestamp on the test Friday.
pub fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(TEST_DATE.0, TEST_DATE.1, TEST_DATE.2)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

pub fn tod(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

pub fn clock_at(h: u32, m: u32, s: u32) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(at(h, m, s)))
}

/// Unit vector along one axis in embedding space.
pub fn unit(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[axis % EMBEDDING_DIM] = 1.0;
    v
}

/// Vector whose cosine similarity against `unit(axis)` is exactly `cos`.
pub fn toward(axis: usize, cos: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[axis % EMBEDDING_DIM] = cos;
    v[(axis + 1) % EMBEDDING_DIM] = (1.0 - cos * cos).sqrt();
    v
}

/// Detected face with passing quality gates around the given embedding.
pub fn face_with(embedding: Vec<f32>) -> DetectedFace {
    DetectedFace {
        bbox: [0.0, 0.0, 160.0, 160.0],
        embedding,
        detection_score: 0.95,
        quality: FaceQuality {
            sharpness: 180.0,
            yaw_deg: 2.0,
            pitch_deg: 1.0,
            roll_deg: 0.5,
        },
    }
}

/// Scripted embedding provider: each image payload maps to a fixed list of
/// detected faces.
#[derive(Default)]
pub struct StubProvider {
    responses: Mutex<HashMap<Vec<u8>, Vec<DetectedFace>>>,
}

impl StubProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the provider's response for an image payload.
    pub fn script(&self, image: &[u8], faces: Vec<DetectedFace>) {
        self.responses
            .lock()
            .unwrap()
            .insert(image.to_vec(), faces);
    }
}

#[async_trait]
impl EmbeddingProvider for StubProvider {
    async fn embed(&self, image: &[u8]) -> Result<Vec<DetectedFace>> {
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(image)
            .cloned()
            .unwrap_or_default())
    }
}

/// A seeded course with a Friday 10:00-11:00 slot (late threshold 5 min).
pub struct Fixture {
    pub course_id: Uuid,
    pub slot_id: Uuid,
}

pub async fn seed_course_with_slot(pool: &SqlitePool) -> Fixture {
    let course = db::courses::insert(pool, "CS101", "Intro to CS", Some("Dr. Grace"))
        .await
        .unwrap();
    let slot = db::timetable::upsert(pool, Weekday::Friday, 1, course.id, tod(10, 0), tod(11, 0), 5)
        .await
        .unwrap();
    Fixture {
        course_id: course.id,
        slot_id: slot.id,
    }
}

/// Create a student enrolled in `course_ids` with one stored embedding
/// along `axis`.
pub async fn seed_student(
    pool: &SqlitePool,
    external_id: &str,
    name: &str,
    axis: usize,
    course_ids: &[Uuid],
) -> Uuid {
    let now = at(8, 0, 0);
    let mut tx = pool.begin().await.unwrap();
    let student = db::students::insert(&mut tx, external_id, name, "SE", now)
        .await
        .unwrap();
    db::students::insert_embedding(&mut tx, student.id, &unit(axis), 0.9, now)
        .await
        .unwrap();
    for course_id in course_ids {
        db::courses::enroll(&mut tx, student.id, *course_id, now)
            .await
            .unwrap();
    }
    tx.commit().await.unwrap();
    student.id
}
