//! Integration tests for the enrollment pipeline

mod common;

use common::*;
use faceattend::config::EngineConfig;
use faceattend::db;
use faceattend::error::Error;
use faceattend::recognition::EnrollmentService;

#[tokio::test]
async fn enrollment_keeps_top_quality_embeddings() {
    let pool = setup_pool().await;
    let fixture = seed_course_with_slot(&pool).await;
    let student = seed_student(&pool, "SP21-BCS-001", "Alice", 0, &[fixture.course_id]).await;

    let provider = StubProvider::new();
    // Ten usable frames along distinct directions; two junk frames
    let mut frames: Vec<Vec<u8>> = Vec::new();
    for i in 0..10u8 {
        let image = vec![i];
        provider.script(&image, vec![face_with(unit(i as usize + 1))]);
        frames.push(image);
    }
    provider.script(b"no-face", vec![]);
    frames.push(b"no-face".to_vec());
    provider.script(b"two-faces", vec![face_with(unit(20)), face_with(unit(21))]);
    frames.push(b"two-faces".to_vec());

    let service = EnrollmentService::new(pool.clone(), provider);
    let config = EngineConfig::default();

    let summary = service
        .enroll_frames(student, &frames, None, &config, at(9, 0, 0))
        .await
        .unwrap();

    assert_eq!(summary.total_frames, 12);
    assert_eq!(summary.valid_frames, 10);
    assert_eq!(summary.embeddings_saved, 10);

    // Replacement: the seeded embedding is gone, only the new set remains
    let embeddings = db::students::embeddings_for_student(&pool, student).await.unwrap();
    assert_eq!(embeddings.len(), 10);

    // Every stored vector is unit length
    for e in &embeddings {
        let norm: f32 = e.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}

#[tokio::test]
async fn enrollment_respects_max_embeddings_cap() {
    let pool = setup_pool().await;
    let fixture = seed_course_with_slot(&pool).await;
    let student = seed_student(&pool, "SP21-BCS-001", "Alice", 0, &[fixture.course_id]).await;

    let provider = StubProvider::new();
    let mut frames: Vec<Vec<u8>> = Vec::new();
    for i in 0..10u8 {
        let image = vec![i];
        provider.script(&image, vec![face_with(unit(i as usize + 1))]);
        frames.push(image);
    }

    let service = EnrollmentService::new(pool.clone(), provider);
    let config = EngineConfig::default();

    let summary = service
        .enroll_frames(student, &frames, Some(6), &config, at(9, 0, 0))
        .await
        .unwrap();

    assert_eq!(summary.embeddings_saved, 6);
}

#[tokio::test]
async fn enrollment_fails_closed_on_insufficient_quality() {
    let pool = setup_pool().await;
    let fixture = seed_course_with_slot(&pool).await;
    let student = seed_student(&pool, "SP21-BCS-001", "Alice", 0, &[fixture.course_id]).await;

    let provider = StubProvider::new();
    // Only three usable frames; k_min is 5
    let mut frames: Vec<Vec<u8>> = Vec::new();
    for i in 0..3u8 {
        let image = vec![i];
        provider.script(&image, vec![face_with(unit(i as usize + 1))]);
        frames.push(image);
    }

    let service = EnrollmentService::new(pool.clone(), provider);
    let config = EngineConfig::default();

    let result = service
        .enroll_frames(student, &frames, None, &config, at(9, 0, 0))
        .await;
    assert!(matches!(result, Err(Error::InsufficientQuality { kept: 3, min: 5 })));

    // Failed enrollment must not have replaced the prior embedding
    let embeddings = db::students::embeddings_for_student(&pool, student).await.unwrap();
    assert_eq!(embeddings.len(), 1);
}

#[tokio::test]
async fn near_duplicate_frames_collapse() {
    let pool = setup_pool().await;
    let fixture = seed_course_with_slot(&pool).await;
    let student = seed_student(&pool, "SP21-BCS-001", "Alice", 0, &[fixture.course_id]).await;

    let provider = StubProvider::new();
    let mut frames: Vec<Vec<u8>> = Vec::new();
    // Eight frames, but only five distinct directions
    for i in 0..8u8 {
        let image = vec![i];
        provider.script(&image, vec![face_with(unit((i as usize % 5) + 1))]);
        frames.push(image);
    }

    let service = EnrollmentService::new(pool.clone(), provider);
    let config = EngineConfig::default();

    let summary = service
        .enroll_frames(student, &frames, None, &config, at(9, 0, 0))
        .await
        .unwrap();

    assert_eq!(summary.valid_frames, 8);
    assert_eq!(summary.embeddings_saved, 5);
}
