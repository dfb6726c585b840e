//! Database layer
//!
//! All persistence flows through this module: schema initialization, typed
//! queries, and the transactional operations the attendance pipeline relies
//! on. Uniqueness constraints live in the schema (unique indexes) and
//! fail-closed; application code treats constraint violations as
//! authoritative.

use crate::error::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

pub mod attendance;
pub mod courses;
pub mod models;
pub mod sessions;
pub mod settings;
pub mod students;
pub mod timetable;

/// Initialize database connection and create the schema if needed.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());

    // Bounded pool: twice the core count
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let pool = SqlitePoolOptions::new()
        .max_connections((cores * 2) as u32)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create tables, indexes, and default settings (idempotent). Also used by
/// tests against `sqlite::memory:` pools.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // Set busy timeout to 5 seconds
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    create_students_table(pool).await?;
    create_embeddings_table(pool).await?;
    create_courses_table(pool).await?;
    create_enrollments_table(pool).await?;
    create_timetable_slots_table(pool).await?;
    create_sessions_table(pool).await?;
    create_attendance_table(pool).await?;
    create_reentry_events_table(pool).await?;
    create_finalize_jobs_table(pool).await?;
    create_settings_table(pool).await?;

    settings::init_default_settings(pool).await?;

    Ok(())
}

async fn create_students_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS students (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL,
            name TEXT NOT NULL,
            department TEXT NOT NULL DEFAULT 'General',
            status TEXT NOT NULL DEFAULT 'Active',
            created_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // External ids are unique among live students only, so an id can be
    // reissued after a soft delete.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_students_external_id
         ON students(external_id) WHERE deleted_at IS NULL",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_students_deleted_at ON students(deleted_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_embeddings_table(pool: &SqlitePool) -> Result<()> {
    // Integer ids: the matcher breaks similarity ties toward the oldest
    // enrollment, which is the smallest id.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id TEXT NOT NULL REFERENCES students(id),
            vector TEXT NOT NULL,
            quality_score REAL NOT NULL DEFAULT 0.0,
            created_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_embeddings_student_id ON embeddings(student_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_courses_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS courses (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            instructor TEXT,
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_enrollments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enrollments (
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL REFERENCES students(id),
            course_id TEXT NOT NULL REFERENCES courses(id),
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollments_student_course
         ON enrollments(student_id, course_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_timetable_slots_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS timetable_slots (
            id TEXT PRIMARY KEY,
            weekday TEXT NOT NULL CHECK (weekday IN ('MONDAY', 'TUESDAY', 'WEDNESDAY', 'THURSDAY', 'FRIDAY')),
            slot_index INTEGER NOT NULL CHECK (slot_index >= 1),
            course_id TEXT NOT NULL REFERENCES courses(id),
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            late_threshold_minutes INTEGER NOT NULL DEFAULT 5,
            active INTEGER NOT NULL DEFAULT 1,
            CHECK (end_time > start_time)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_timetable_slots_day_slot
         ON timetable_slots(weekday, slot_index)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL REFERENCES courses(id),
            timetable_slot_id TEXT,
            starts_at TEXT NOT NULL,
            ends_at TEXT NOT NULL,
            late_threshold_minutes INTEGER NOT NULL DEFAULT 5,
            status TEXT NOT NULL DEFAULT 'SCHEDULED' CHECK (status IN ('SCHEDULED', 'ACTIVE', 'COMPLETED', 'CANCELLED')),
            auto_created INTEGER NOT NULL DEFAULT 0,
            notes TEXT,
            created_at TEXT NOT NULL,
            CHECK (ends_at > starts_at)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one non-cancelled session per (slot, day). The timetable slot
    // reference is informational for manual sessions, hence the partial
    // index.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_slot_date
         ON sessions(timetable_slot_id, date(starts_at))
         WHERE timetable_slot_id IS NOT NULL AND status != 'CANCELLED'",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sessions_status_starts_at ON sessions(status, starts_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_attendance_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attendance (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES sessions(id),
            student_id TEXT NOT NULL REFERENCES students(id),
            status TEXT NOT NULL CHECK (status IN ('PRESENT', 'LATE', 'ABSENT', 'INTRUDER')),
            check_in_time TEXT,
            last_seen_time TEXT,
            confidence REAL,
            method TEXT NOT NULL DEFAULT 'AUTO' CHECK (method IN ('AUTO', 'MANUAL')),
            notes TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One attendance row per student per session.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_session_student
         ON attendance(session_id, student_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_attendance_session_id ON attendance(session_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_reentry_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reentry_events (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES sessions(id),
            student_id TEXT NOT NULL REFERENCES students(id),
            action TEXT NOT NULL CHECK (action IN ('FIRST_IN', 'REENTRY', 'INTRUDER')),
            suspicious INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_reentry_events_session_id ON reentry_events(session_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_finalize_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS finalize_jobs (
            session_id TEXT PRIMARY KEY REFERENCES sessions(id),
            run_at TEXT NOT NULL,
            executed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_finalize_jobs_run_at ON finalize_jobs(run_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// True when a sqlx error is a unique-constraint violation. Callers use this
/// to resolve insert races against the schema's unique indexes.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|c| c == "2067" || c == "1555")
            .unwrap_or(false),
        _ => false,
    }
}
