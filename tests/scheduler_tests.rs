//! Integration tests for the session scheduler
//!
//! Drives scheduler ticks against an in-memory database with a manual
//! clock: materialization from timetable slots, activation, finalization,
//! expiry, and catch-up after downtime.

mod common;

use std::sync::Arc;

use common::*;
use faceattend::db;
use faceattend::db::models::{AttendanceStatus, SessionStatus};
use faceattend::scheduler::SessionScheduler;

fn scheduler(pool: &sqlx::SqlitePool, clock: Arc<faceattend::clock::ManualClock>) -> SessionScheduler {
    SessionScheduler::new(pool.clone(), clock)
}

#[tokio::test]
async fn tick_materializes_active_session_at_slot_start() {
    let pool = setup_pool().await;
    let fixture = seed_course_with_slot(&pool).await;
    let clock = clock_at(10, 0, 30);

    scheduler(&pool, clock).tick().await.unwrap();

    let sessions = db::sessions::list_filtered(&pool, Some(at(10, 0, 0).date()), None)
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);

    let session = &sessions[0];
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.timetable_slot_id, Some(fixture.slot_id));
    assert_eq!(session.starts_at, at(10, 0, 0));
    assert_eq!(session.ends_at, at(11, 0, 0));
    assert!(session.auto_created);

    // Finalization job registered at starts_at + late threshold + buffer
    let job = db::sessions::get_finalize_job(&pool, session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.run_at, at(10, 10, 0));
    assert!(job.executed_at.is_none());
}

#[tokio::test]
async fn repeated_ticks_do_not_duplicate_sessions() {
    let pool = setup_pool().await;
    seed_course_with_slot(&pool).await;
    let clock = clock_at(10, 0, 30);

    let scheduler = scheduler(&pool, clock.clone());
    scheduler.tick().await.unwrap();
    clock.advance(chrono::Duration::seconds(60));
    scheduler.tick().await.unwrap();
    clock.advance(chrono::Duration::seconds(60));
    scheduler.tick().await.unwrap();

    let sessions = db::sessions::list_filtered(&pool, Some(at(10, 0, 0).date()), None)
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);
}

#[tokio::test]
async fn tick_before_materialize_window_creates_nothing() {
    let pool = setup_pool().await;
    seed_course_with_slot(&pool).await;
    let clock = clock_at(9, 50, 0);

    scheduler(&pool, clock).tick().await.unwrap();

    let sessions = db::sessions::list_filtered(&pool, None, None).await.unwrap();
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn inactive_slot_is_ignored() {
    let pool = setup_pool().await;
    let fixture = seed_course_with_slot(&pool).await;

    sqlx::query("UPDATE timetable_slots SET active = 0 WHERE id = ?")
        .bind(fixture.slot_id.to_string())
        .execute(&pool)
        .await
        .unwrap();

    scheduler(&pool, clock_at(10, 0, 30)).tick().await.unwrap();

    let sessions = db::sessions::list_filtered(&pool, None, None).await.unwrap();
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn finalizer_marks_absentees_and_completes_session() {
    let pool = setup_pool().await;
    let fixture = seed_course_with_slot(&pool).await;
    let clock = clock_at(10, 0, 30);

    let a = seed_student(&pool, "SP21-BCS-001", "Alice", 0, &[fixture.course_id]).await;
    let b = seed_student(&pool, "SP21-BCS-002", "Bob", 1, &[fixture.course_id]).await;
    let c = seed_student(&pool, "SP21-BCS-003", "Carol", 2, &[fixture.course_id]).await;

    let scheduler = scheduler(&pool, clock.clone());
    scheduler.tick().await.unwrap();

    let active = db::sessions::list_active(&pool, at(10, 0, 30)).await.unwrap();
    let session = &active[0];

    // Alice and Bob check in by direct insert; Carol never shows
    let mut conn = pool.acquire().await.unwrap();
    for (student, status, minute) in [(a, AttendanceStatus::Present, 2), (b, AttendanceStatus::Late, 7)] {
        db::attendance::insert(
            &mut conn,
            session.id,
            student,
            status,
            Some(at(10, minute, 0)),
            Some(0.8),
            faceattend::db::models::AttendanceMethod::Auto,
            None,
            at(10, minute, 0),
        )
        .await
        .unwrap();
    }
    drop(conn);

    // Finalize time (10:00 + 5 late + 5 buffer = 10:10)
    clock.set(at(10, 10, 5));
    scheduler.tick().await.unwrap();

    let session = db::sessions::get_by_id(&pool, session.id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    let attendance = db::attendance::list_for_session(&pool, session.id).await.unwrap();
    assert_eq!(attendance.len(), 3);

    let carol = attendance.iter().find(|r| r.student_id == c).unwrap();
    assert_eq!(carol.status, AttendanceStatus::Absent);
    assert!(carol.check_in_time.is_none());
    assert!(carol.confidence.is_none());

    // Running again is a no-op
    clock.set(at(10, 11, 0));
    scheduler.tick().await.unwrap();
    let again = db::attendance::list_for_session(&pool, session.id).await.unwrap();
    assert_eq!(again.len(), 3);
}

#[tokio::test]
async fn catch_up_tick_creates_activates_and_finalizes_in_one_pass() {
    // Scheduler was down across the slot start; the first tick at 10:30
    // creates the session, activates it, and immediately runs the overdue
    // finalization.
    let pool = setup_pool().await;
    let fixture = seed_course_with_slot(&pool).await;
    let c = seed_student(&pool, "SP21-BCS-003", "Carol", 2, &[fixture.course_id]).await;

    let clock = clock_at(10, 30, 0);
    scheduler(&pool, clock).tick().await.unwrap();

    let sessions = db::sessions::list_filtered(&pool, None, None).await.unwrap();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(session.status, SessionStatus::Completed);

    let attendance = db::attendance::list_for_session(&pool, session.id).await.unwrap();
    assert_eq!(attendance.len(), 1);
    assert_eq!(attendance[0].student_id, c);
    assert_eq!(attendance[0].status, AttendanceStatus::Absent);
}

#[tokio::test]
async fn expired_session_without_finalization_gets_finalized_on_close() {
    // A manual ACTIVE session with no finalize job: the close pass finalizes
    // it when its end passes.
    let pool = setup_pool().await;
    let fixture = seed_course_with_slot(&pool).await;
    let student = seed_student(&pool, "SP21-BCS-004", "Dave", 3, &[fixture.course_id]).await;

    let session = db::sessions::insert_manual(
        &pool,
        fixture.course_id,
        None,
        at(12, 0, 0),
        at(13, 0, 0),
        5,
        SessionStatus::Active,
        None,
        at(12, 0, 0),
    )
    .await
    .unwrap();

    let clock = clock_at(13, 0, 30);
    scheduler(&pool, clock).tick().await.unwrap();

    let session = db::sessions::get_by_id(&pool, session.id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    let attendance = db::attendance::list_for_session(&pool, session.id).await.unwrap();
    assert_eq!(attendance.len(), 1);
    assert_eq!(attendance[0].student_id, student);
    assert_eq!(attendance[0].status, AttendanceStatus::Absent);
}

#[tokio::test]
async fn expired_session_already_finalized_just_completes() {
    let pool = setup_pool().await;
    let fixture = seed_course_with_slot(&pool).await;
    let clock = clock_at(10, 0, 30);

    let scheduler = scheduler(&pool, clock.clone());
    scheduler.tick().await.unwrap();
    let session = db::sessions::list_active(&pool, at(10, 0, 30)).await.unwrap()[0].clone();

    // Finalizer runs at 10:10 (no enrolled students, so only the status
    // moves)
    clock.set(at(10, 10, 30));
    scheduler.tick().await.unwrap();
    let session = db::sessions::get_by_id(&pool, session.id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    // The close pass after 11:00 finds nothing ACTIVE and changes nothing
    clock.set(at(11, 1, 0));
    scheduler.tick().await.unwrap();
    let session = db::sessions::get_by_id(&pool, session.id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn weekend_has_no_timetable() {
    let pool = setup_pool().await;
    seed_course_with_slot(&pool).await;

    // Saturday 2025-12-20, same time of day
    let clock = Arc::new(faceattend::clock::ManualClock::new(
        chrono::NaiveDate::from_ymd_opt(2025, 12, 20)
            .unwrap()
            .and_hms_opt(10, 0, 30)
            .unwrap(),
    ));
    scheduler(&pool, clock).tick().await.unwrap();

    let sessions = db::sessions::list_filtered(&pool, None, None).await.unwrap();
    assert!(sessions.is_empty());
}
