//! Attendance and re-entry database access
//!
//! One attendance row per (session, student), enforced by a unique index.
//! Status and check_in_time are immutable once written; re-sightings only
//! touch last_seen_time and may raise confidence. Corrections are not done
//! in place.

use chrono::NaiveDateTime;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::models::{fmt_ts, Attendance, AttendanceMethod, AttendanceStatus, ReentryAction, ReentryEvent};
use crate::error::Result;

/// Attendance row for (session, student) inside the caller's transaction.
pub async fn get(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    student_id: Uuid,
) -> Result<Option<Attendance>> {
    let row = sqlx::query("SELECT * FROM attendance WHERE session_id = ? AND student_id = ?")
        .bind(session_id.to_string())
        .bind(student_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(Attendance::from_row).transpose()
}

/// Insert a fresh attendance row (first sighting, manual mark, intruder, or
/// absentee). Returns the raw sqlx error so callers can resolve
/// unique-constraint races themselves.
#[allow(clippy::too_many_arguments)]
pub async fn insert(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    student_id: Uuid,
    status: AttendanceStatus,
    check_in_time: Option<NaiveDateTime>,
    confidence: Option<f64>,
    method: AttendanceMethod,
    notes: Option<&str>,
    now: NaiveDateTime,
) -> std::result::Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO attendance
            (id, session_id, student_id, status, check_in_time, last_seen_time,
             confidence, method, notes, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(session_id.to_string())
    .bind(student_id.to_string())
    .bind(status.to_string())
    .bind(check_in_time.map(fmt_ts))
    .bind(check_in_time.map(|_| fmt_ts(now)))
    .bind(confidence)
    .bind(method.to_string())
    .bind(notes)
    .bind(fmt_ts(now))
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

/// Re-sighting of an already-recorded student: refresh last_seen_time, keep
/// the higher confidence. Status and check_in_time stay as written.
pub async fn touch_last_seen(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    student_id: Uuid,
    confidence: Option<f64>,
    now: NaiveDateTime,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE attendance
        SET last_seen_time = ?,
            confidence = CASE
                WHEN ? IS NOT NULL AND (confidence IS NULL OR ? > confidence) THEN ?
                ELSE confidence
            END
        WHERE session_id = ? AND student_id = ?
        "#,
    )
    .bind(fmt_ts(now))
    .bind(confidence)
    .bind(confidence)
    .bind(confidence)
    .bind(session_id.to_string())
    .bind(student_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// All attendance rows for a session.
pub async fn list_for_session(pool: &SqlitePool, session_id: Uuid) -> Result<Vec<Attendance>> {
    let rows = sqlx::query("SELECT * FROM attendance WHERE session_id = ? ORDER BY created_at")
        .bind(session_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(Attendance::from_row).collect()
}

/// Same, inside a transaction (finalizer).
pub async fn list_for_session_tx(
    conn: &mut SqliteConnection,
    session_id: Uuid,
) -> Result<Vec<Attendance>> {
    let rows = sqlx::query("SELECT * FROM attendance WHERE session_id = ? ORDER BY created_at")
        .bind(session_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(Attendance::from_row).collect()
}

/// Record a re-entry/intruder/first-in event.
pub async fn log_reentry(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    student_id: Uuid,
    action: ReentryAction,
    suspicious: bool,
    now: NaiveDateTime,
) -> Result<Uuid> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO reentry_events (id, session_id, student_id, action, suspicious, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(session_id.to_string())
    .bind(student_id.to_string())
    .bind(action.to_string())
    .bind(suspicious as i64)
    .bind(fmt_ts(now))
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

/// Re-entry events for a session, oldest first.
pub async fn list_reentry_events(pool: &SqlitePool, session_id: Uuid) -> Result<Vec<ReentryEvent>> {
    let rows = sqlx::query("SELECT * FROM reentry_events WHERE session_id = ? ORDER BY created_at")
        .bind(session_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(ReentryEvent::from_row).collect()
}
