//! Session and finalization-job database access
//!
//! Sessions move SCHEDULED → ACTIVE → COMPLETED (or → CANCELLED from any
//! non-terminal state) and never move backwards; every transition here is a
//! guarded UPDATE whose WHERE clause names the expected current status, so a
//! lost race simply affects zero rows.

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::models::{fmt_ts, FinalizeJob, Session, SessionStatus};
use crate::error::{Error, Result};

/// Idempotent session materialization for a timetable slot: at most one
/// non-cancelled session exists per (slot, day). A concurrent creator losing
/// the race on the unique index re-reads the winner.
pub async fn find_or_create_for_slot(
    pool: &SqlitePool,
    slot_id: Uuid,
    course_id: Uuid,
    starts_at: NaiveDateTime,
    ends_at: NaiveDateTime,
    late_threshold_minutes: i64,
    status: SessionStatus,
    now: NaiveDateTime,
) -> Result<(Session, bool)> {
    if let Some(existing) = get_for_slot_on_date(pool, slot_id, starts_at.date()).await? {
        return Ok((existing, false));
    }

    let id = Uuid::new_v4();
    let result = sqlx::query(
        r#"
        INSERT INTO sessions
            (id, course_id, timetable_slot_id, starts_at, ends_at, late_threshold_minutes,
             status, auto_created, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(course_id.to_string())
    .bind(slot_id.to_string())
    .bind(fmt_ts(starts_at))
    .bind(fmt_ts(ends_at))
    .bind(late_threshold_minutes)
    .bind(status.to_string())
    .bind(fmt_ts(now))
    .execute(pool)
    .await;

    match result {
        Ok(_) => {
            let session = get_by_id(pool, id)
                .await?
                .ok_or_else(|| Error::Internal("Session vanished after insert".into()))?;
            Ok((session, true))
        }
        Err(e) if crate::db::is_unique_violation(&e) => {
            let winner = get_for_slot_on_date(pool, slot_id, starts_at.date())
                .await?
                .ok_or_else(|| Error::Internal("Unique violation without surviving session".into()))?;
            Ok((winner, false))
        }
        Err(e) => Err(e.into()),
    }
}

/// Insert a manually created session (auto_created = 0).
pub async fn insert_manual(
    pool: &SqlitePool,
    course_id: Uuid,
    slot_id: Option<Uuid>,
    starts_at: NaiveDateTime,
    ends_at: NaiveDateTime,
    late_threshold_minutes: i64,
    status: SessionStatus,
    notes: Option<&str>,
    now: NaiveDateTime,
) -> Result<Session> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO sessions
            (id, course_id, timetable_slot_id, starts_at, ends_at, late_threshold_minutes,
             status, auto_created, notes, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(course_id.to_string())
    .bind(slot_id.map(|s| s.to_string()))
    .bind(fmt_ts(starts_at))
    .bind(fmt_ts(ends_at))
    .bind(late_threshold_minutes)
    .bind(status.to_string())
    .bind(notes)
    .bind(fmt_ts(now))
    .execute(pool)
    .await?;

    get_by_id(pool, id)
        .await?
        .ok_or_else(|| Error::Internal("Session vanished after insert".into()))
}

/// Non-cancelled session for (slot, day), if any.
pub async fn get_for_slot_on_date(
    pool: &SqlitePool,
    slot_id: Uuid,
    date: NaiveDate,
) -> Result<Option<Session>> {
    let row = sqlx::query(
        r#"
        SELECT * FROM sessions
        WHERE timetable_slot_id = ? AND date(starts_at) = ? AND status != 'CANCELLED'
        "#,
    )
    .bind(slot_id.to_string())
    .bind(date.format("%Y-%m-%d").to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(Session::from_row).transpose()
}

pub async fn get_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Session>> {
    let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(Session::from_row).transpose()
}

/// Re-read a session inside the caller's transaction (row-lock point for the
/// recognize/finalize serialization).
pub async fn get_by_id_tx(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Session>> {
    let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(Session::from_row).transpose()
}

/// ACTIVE sessions whose window contains `now`, ordered by start.
pub async fn list_active(pool: &SqlitePool, now: NaiveDateTime) -> Result<Vec<Session>> {
    let ts = fmt_ts(now);
    let rows = sqlx::query(
        r#"
        SELECT * FROM sessions
        WHERE status = 'ACTIVE' AND starts_at <= ? AND ends_at > ?
        ORDER BY starts_at
        "#,
    )
    .bind(&ts)
    .bind(&ts)
    .fetch_all(pool)
    .await?;

    rows.iter().map(Session::from_row).collect()
}

/// SCHEDULED sessions whose start has arrived and end has not passed.
pub async fn list_due_to_activate(pool: &SqlitePool, now: NaiveDateTime) -> Result<Vec<Session>> {
    let ts = fmt_ts(now);
    let rows = sqlx::query(
        r#"
        SELECT * FROM sessions
        WHERE status = 'SCHEDULED' AND starts_at <= ? AND ends_at > ?
        ORDER BY starts_at
        "#,
    )
    .bind(&ts)
    .bind(&ts)
    .fetch_all(pool)
    .await?;

    rows.iter().map(Session::from_row).collect()
}

/// ACTIVE sessions whose end has passed.
pub async fn list_due_to_close(pool: &SqlitePool, now: NaiveDateTime) -> Result<Vec<Session>> {
    let rows = sqlx::query("SELECT * FROM sessions WHERE status = 'ACTIVE' AND ends_at <= ? ORDER BY ends_at")
        .bind(fmt_ts(now))
        .fetch_all(pool)
        .await?;

    rows.iter().map(Session::from_row).collect()
}

/// Sessions filtered by calendar day and/or status, newest first.
pub async fn list_filtered(
    pool: &SqlitePool,
    date: Option<NaiveDate>,
    status: Option<SessionStatus>,
) -> Result<Vec<Session>> {
    let mut sql = String::from("SELECT * FROM sessions WHERE 1=1");
    if date.is_some() {
        sql.push_str(" AND date(starts_at) = ?");
    }
    if status.is_some() {
        sql.push_str(" AND status = ?");
    }
    sql.push_str(" ORDER BY starts_at DESC");

    let mut query = sqlx::query(&sql);
    if let Some(d) = date {
        query = query.bind(d.format("%Y-%m-%d").to_string());
    }
    if let Some(s) = status {
        query = query.bind(s.to_string());
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(Session::from_row).collect()
}

/// Manual sessions overlapping [starts_at, ends_at) that are still open
/// (ACTIVE or SCHEDULED). Used to reject conflicting manual creations.
pub async fn find_overlapping_open(
    pool: &SqlitePool,
    starts_at: NaiveDateTime,
    ends_at: NaiveDateTime,
) -> Result<Option<Session>> {
    let row = sqlx::query(
        r#"
        SELECT * FROM sessions
        WHERE status IN ('ACTIVE', 'SCHEDULED') AND starts_at < ? AND ends_at > ?
        LIMIT 1
        "#,
    )
    .bind(fmt_ts(ends_at))
    .bind(fmt_ts(starts_at))
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(Session::from_row).transpose()
}

/// Guarded status transition; returns true when the row actually moved.
pub async fn transition(
    conn: &mut SqliteConnection,
    id: Uuid,
    from: SessionStatus,
    to: SessionStatus,
) -> Result<bool> {
    let result = sqlx::query("UPDATE sessions SET status = ? WHERE id = ? AND status = ?")
        .bind(to.to_string())
        .bind(id.to_string())
        .bind(from.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Finalization jobs
// ============================================================================

/// Register a one-shot finalization job for a session. Idempotent: a second
/// registration for the same session is a no-op.
pub async fn register_finalize_job(
    pool: &SqlitePool,
    session_id: Uuid,
    run_at: NaiveDateTime,
) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO finalize_jobs (session_id, run_at) VALUES (?, ?)")
        .bind(session_id.to_string())
        .bind(fmt_ts(run_at))
        .execute(pool)
        .await?;

    Ok(())
}

/// Unexecuted jobs whose run time has arrived (includes catch-up after
/// downtime).
pub async fn due_finalize_jobs(pool: &SqlitePool, now: NaiveDateTime) -> Result<Vec<FinalizeJob>> {
    let rows = sqlx::query(
        "SELECT * FROM finalize_jobs WHERE executed_at IS NULL AND run_at <= ? ORDER BY run_at",
    )
    .bind(fmt_ts(now))
    .fetch_all(pool)
    .await?;

    rows.iter().map(FinalizeJob::from_row).collect()
}

pub async fn get_finalize_job(pool: &SqlitePool, session_id: Uuid) -> Result<Option<FinalizeJob>> {
    let row = sqlx::query("SELECT * FROM finalize_jobs WHERE session_id = ?")
        .bind(session_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(FinalizeJob::from_row).transpose()
}

/// Mark a job executed inside the finalization transaction.
pub async fn mark_finalize_job_executed(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    now: NaiveDateTime,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO finalize_jobs (session_id, run_at, executed_at) VALUES (?, ?, ?)
        ON CONFLICT(session_id) DO UPDATE SET executed_at = excluded.executed_at
        "#,
    )
    .bind(session_id.to_string())
    .bind(fmt_ts(now))
    .bind(fmt_ts(now))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> (SqlitePool, Uuid, Uuid) {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_schema(&pool).await.unwrap();
        let course = crate::db::courses::insert(&pool, "CS101", "Intro to CS", None)
            .await
            .unwrap();
        let slot = crate::db::timetable::upsert(
            &pool,
            crate::db::models::Weekday::Friday,
            1,
            course.id,
            chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            chrono::NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            5,
        )
        .await
        .unwrap();
        (pool, course.id, slot.id)
    }

    fn t(h: u32, m: u32) -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2025, 12, 19)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_find_or_create_is_idempotent_per_slot_day() {
        let (pool, course_id, slot_id) = setup().await;

        let (first, created) = find_or_create_for_slot(
            &pool, slot_id, course_id, t(10, 0), t(11, 0), 5, SessionStatus::Active, t(10, 0),
        )
        .await
        .unwrap();
        assert!(created);

        let (second, created) = find_or_create_for_slot(
            &pool, slot_id, course_id, t(10, 0), t(11, 0), 5, SessionStatus::Active, t(10, 1),
        )
        .await
        .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_cancelled_session_does_not_block_recreation() {
        let (pool, course_id, slot_id) = setup().await;

        let (first, _) = find_or_create_for_slot(
            &pool, slot_id, course_id, t(10, 0), t(11, 0), 5, SessionStatus::Active, t(10, 0),
        )
        .await
        .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert!(transition(&mut conn, first.id, SessionStatus::Active, SessionStatus::Cancelled)
            .await
            .unwrap());
        drop(conn);

        let (second, created) = find_or_create_for_slot(
            &pool, slot_id, course_id, t(10, 0), t(11, 0), 5, SessionStatus::Active, t(10, 2),
        )
        .await
        .unwrap();
        assert!(created);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_transition_is_guarded() {
        let (pool, course_id, slot_id) = setup().await;
        let (session, _) = find_or_create_for_slot(
            &pool, slot_id, course_id, t(10, 0), t(11, 0), 5, SessionStatus::Scheduled, t(9, 58),
        )
        .await
        .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        // COMPLETED requires ACTIVE; from SCHEDULED nothing moves
        assert!(!transition(&mut conn, session.id, SessionStatus::Active, SessionStatus::Completed)
            .await
            .unwrap());
        assert!(transition(&mut conn, session.id, SessionStatus::Scheduled, SessionStatus::Active)
            .await
            .unwrap());
        assert!(transition(&mut conn, session.id, SessionStatus::Active, SessionStatus::Completed)
            .await
            .unwrap());

        let reread = get_by_id(&pool, session.id).await.unwrap().unwrap();
        assert_eq!(reread.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_due_queries_use_window_bounds() {
        let (pool, course_id, slot_id) = setup().await;
        let (session, _) = find_or_create_for_slot(
            &pool, slot_id, course_id, t(10, 0), t(11, 0), 5, SessionStatus::Scheduled, t(9, 58),
        )
        .await
        .unwrap();

        assert!(list_due_to_activate(&pool, t(9, 59)).await.unwrap().is_empty());
        assert_eq!(list_due_to_activate(&pool, t(10, 0)).await.unwrap().len(), 1);

        let mut conn = pool.acquire().await.unwrap();
        transition(&mut conn, session.id, SessionStatus::Scheduled, SessionStatus::Active)
            .await
            .unwrap();
        drop(conn);

        assert!(list_due_to_close(&pool, t(10, 59)).await.unwrap().is_empty());
        assert_eq!(list_due_to_close(&pool, t(11, 0)).await.unwrap().len(), 1);
        assert!(list_active(&pool, t(11, 0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finalize_job_registration_idempotent() {
        let (pool, course_id, slot_id) = setup().await;
        let (session, _) = find_or_create_for_slot(
            &pool, slot_id, course_id, t(10, 0), t(11, 0), 5, SessionStatus::Active, t(10, 0),
        )
        .await
        .unwrap();

        register_finalize_job(&pool, session.id, t(10, 10)).await.unwrap();
        // Second registration with a different time must not move the job
        register_finalize_job(&pool, session.id, t(10, 30)).await.unwrap();

        let job = get_finalize_job(&pool, session.id).await.unwrap().unwrap();
        assert_eq!(job.run_at, t(10, 10));
        assert!(job.executed_at.is_none());

        assert!(due_finalize_jobs(&pool, t(10, 9)).await.unwrap().is_empty());
        assert_eq!(due_finalize_jobs(&pool, t(10, 10)).await.unwrap().len(), 1);
    }
}
