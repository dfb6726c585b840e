//! Student and embedding database access
//!
//! Students are soft-deleted: `deleted_at` is set, historical attendance
//! stays joinable, and every live-student query filters `deleted_at IS
//! NULL`. Embeddings are owned by their student and are soft-deleted along
//! with them.

use chrono::NaiveDateTime;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::models::{fmt_ts, Embedding, Student};
use crate::error::Result;

/// Insert a new student. Runs inside the caller's transaction so that
/// registration (student + embeddings + enrollments) commits atomically.
pub async fn insert(
    conn: &mut SqliteConnection,
    external_id: &str,
    name: &str,
    department: &str,
    now: NaiveDateTime,
) -> Result<Student> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO students (id, external_id, name, department, status, created_at)
        VALUES (?, ?, ?, ?, 'Active', ?)
        "#,
    )
    .bind(id.to_string())
    .bind(external_id)
    .bind(name)
    .bind(department)
    .bind(fmt_ts(now))
    .execute(&mut *conn)
    .await?;

    Ok(Student {
        id,
        external_id: external_id.to_string(),
        name: name.to_string(),
        department: department.to_string(),
        status: "Active".to_string(),
        created_at: now,
        deleted_at: None,
    })
}

/// Get a live student by id.
pub async fn get_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Student>> {
    let row = sqlx::query("SELECT * FROM students WHERE id = ? AND deleted_at IS NULL")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(Student::from_row).transpose()
}

/// Get a live student by external id.
pub async fn get_by_external_id(pool: &SqlitePool, external_id: &str) -> Result<Option<Student>> {
    let row = sqlx::query("SELECT * FROM students WHERE external_id = ? AND deleted_at IS NULL")
        .bind(external_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(Student::from_row).transpose()
}

/// List all live students, newest first.
pub async fn list(pool: &SqlitePool) -> Result<Vec<Student>> {
    let rows =
        sqlx::query("SELECT * FROM students WHERE deleted_at IS NULL ORDER BY created_at DESC")
            .fetch_all(pool)
            .await?;

    rows.iter().map(Student::from_row).collect()
}

/// Soft-delete a student and their embeddings. The external id becomes
/// reusable; attendance history is retained. Returns false when no live
/// student matched.
pub async fn soft_delete(pool: &SqlitePool, id: Uuid, now: NaiveDateTime) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let ts = fmt_ts(now);

    let updated = sqlx::query("UPDATE students SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(&ts)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if updated == 0 {
        return Ok(false);
    }

    sqlx::query("UPDATE embeddings SET deleted_at = ? WHERE student_id = ? AND deleted_at IS NULL")
        .bind(&ts)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(true)
}

/// Insert one embedding for a student. The vector must already be
/// unit-normalized.
pub async fn insert_embedding(
    conn: &mut SqliteConnection,
    student_id: Uuid,
    vector: &[f32],
    quality_score: f64,
    now: NaiveDateTime,
) -> Result<i64> {
    let vector_json = serde_json::to_string(vector)
        .map_err(|e| crate::error::Error::Internal(format!("Vector serialization: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO embeddings (student_id, vector, quality_score, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(student_id.to_string())
    .bind(vector_json)
    .bind(quality_score)
    .bind(fmt_ts(now))
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Soft-delete all live embeddings of a student (re-enrollment with
/// replacement).
pub async fn soft_delete_embeddings(
    conn: &mut SqliteConnection,
    student_id: Uuid,
    now: NaiveDateTime,
) -> Result<u64> {
    let result =
        sqlx::query("UPDATE embeddings SET deleted_at = ? WHERE student_id = ? AND deleted_at IS NULL")
            .bind(fmt_ts(now))
            .bind(student_id.to_string())
            .execute(&mut *conn)
            .await?;

    Ok(result.rows_affected())
}

/// Live embeddings of one student, oldest first.
pub async fn embeddings_for_student(pool: &SqlitePool, student_id: Uuid) -> Result<Vec<Embedding>> {
    let rows = sqlx::query(
        "SELECT * FROM embeddings WHERE student_id = ? AND deleted_at IS NULL ORDER BY id",
    )
    .bind(student_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(Embedding::from_row).collect()
}
