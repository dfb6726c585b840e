//! Session finalizer
//!
//! Marks enrolled-but-unseen students ABSENT and completes the session, all
//! in one transaction. Safe to run any number of times: terminal sessions
//! are skipped, and the attendance uniqueness constraint stops duplicate
//! ABSENT rows.

use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::db::models::{AttendanceMethod, AttendanceStatus, SessionStatus};
use crate::error::Result;

/// Finalize one session: absentees, then COMPLETED.
pub async fn finalize_session(pool: &SqlitePool, session_id: Uuid, now: NaiveDateTime) -> Result<()> {
    let mut tx = pool.begin().await?;

    let Some(session) = db::sessions::get_by_id_tx(&mut tx, session_id).await? else {
        warn!("Finalizer: session {} not found", session_id);
        return Ok(());
    };

    if session.status.is_terminal() {
        // Already finalized or cancelled; make sure the job won't fire again.
        db::sessions::mark_finalize_job_executed(&mut tx, session_id, now).await?;
        tx.commit().await?;
        return Ok(());
    }

    let enrolled = db::courses::enrolled_students(&mut tx, session.course_id).await?;
    let attendance = db::attendance::list_for_session_tx(&mut tx, session_id).await?;

    // Students with any row already have their outcome; INTRUDER rows and
    // re-entries never turn into ABSENT here.
    let seen: HashSet<Uuid> = attendance.iter().map(|a| a.student_id).collect();

    let mut marked_absent = 0usize;
    for student in &enrolled {
        if seen.contains(&student.id) {
            continue;
        }

        let inserted = db::attendance::insert(
            &mut tx,
            session_id,
            student.id,
            AttendanceStatus::Absent,
            None,
            None,
            AttendanceMethod::Auto,
            Some("Not detected during session"),
            now,
        )
        .await;

        match inserted {
            Ok(_) => marked_absent += 1,
            // A recognize commit can slip in between our read and write;
            // that student attended after all.
            Err(e) if db::is_unique_violation(&e) => {}
            Err(e) => return Err(e.into()),
        }
    }

    db::sessions::transition(&mut tx, session_id, SessionStatus::Active, SessionStatus::Completed)
        .await?;
    db::sessions::mark_finalize_job_executed(&mut tx, session_id, now).await?;

    tx.commit().await?;

    info!(
        "Finalized session {}: {} of {} enrolled marked absent",
        session_id,
        marked_absent,
        enrolled.len()
    );

    Ok(())
}
