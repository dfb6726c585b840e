//! Course and enrollment database access

use chrono::NaiveDateTime;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::models::{fmt_ts, CandidateEmbedding, Course, Student};
use crate::error::{Error, Result};

/// Insert a new course. The code is unique; a duplicate fails on the
/// constraint.
pub async fn insert(
    pool: &SqlitePool,
    code: &str,
    name: &str,
    instructor: Option<&str>,
) -> Result<Course> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO courses (id, code, name, instructor, active)
        VALUES (?, ?, ?, ?, 1)
        "#,
    )
    .bind(id.to_string())
    .bind(code)
    .bind(name)
    .bind(instructor)
    .execute(pool)
    .await?;

    Ok(Course {
        id,
        code: code.to_string(),
        name: name.to_string(),
        instructor: instructor.map(String::from),
        active: true,
    })
}

pub async fn get_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Course>> {
    let row = sqlx::query("SELECT * FROM courses WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(Course::from_row).transpose()
}

pub async fn get_by_code(pool: &SqlitePool, code: &str) -> Result<Option<Course>> {
    let row = sqlx::query("SELECT * FROM courses WHERE code = ?")
        .bind(code)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(Course::from_row).transpose()
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<Course>> {
    let rows = sqlx::query("SELECT * FROM courses ORDER BY code")
        .fetch_all(pool)
        .await?;

    rows.iter().map(Course::from_row).collect()
}

/// Enroll a student in a course. The (student, course) pair is unique; a
/// duplicate surfaces as EnrollmentConflict.
pub async fn enroll(
    conn: &mut SqliteConnection,
    student_id: Uuid,
    course_id: Uuid,
    now: NaiveDateTime,
) -> Result<Uuid> {
    let id = Uuid::new_v4();

    let result = sqlx::query(
        r#"
        INSERT INTO enrollments (id, student_id, course_id, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(student_id.to_string())
    .bind(course_id.to_string())
    .bind(fmt_ts(now))
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(id),
        Err(e) if crate::db::is_unique_violation(&e) => Err(Error::EnrollmentConflict(format!(
            "student {} already enrolled in course {}",
            student_id, course_id
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Whether a live student is enrolled in a course.
pub async fn is_enrolled(
    conn: &mut SqliteConnection,
    student_id: Uuid,
    course_id: Uuid,
) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM enrollments WHERE student_id = ? AND course_id = ?)",
    )
    .bind(student_id.to_string())
    .bind(course_id.to_string())
    .fetch_one(&mut *conn)
    .await?;

    Ok(exists)
}

/// Live students enrolled in a course.
pub async fn enrolled_students(conn: &mut SqliteConnection, course_id: Uuid) -> Result<Vec<Student>> {
    let rows = sqlx::query(
        r#"
        SELECT s.* FROM students s
        JOIN enrollments e ON e.student_id = s.id
        WHERE e.course_id = ? AND s.deleted_at IS NULL
        ORDER BY s.external_id
        "#,
    )
    .bind(course_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(Student::from_row).collect()
}

/// Dense candidate view for the matcher: every live embedding of every live
/// student enrolled in the course, ordered by embedding id so that the
/// oldest-enrollment tie-break falls out of iteration order.
pub async fn enrolled_students_with_embeddings(
    pool: &SqlitePool,
    course_id: Uuid,
) -> Result<Vec<CandidateEmbedding>> {
    let rows = sqlx::query(
        r#"
        SELECT s.id AS student_id, s.name AS student_name, m.id AS embedding_id, m.vector
        FROM students s
        JOIN enrollments e ON e.student_id = s.id
        JOIN embeddings m ON m.student_id = s.id
        WHERE e.course_id = ? AND s.deleted_at IS NULL AND m.deleted_at IS NULL
        ORDER BY m.id
        "#,
    )
    .bind(course_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            use sqlx::Row;
            let vector_json: String = row.get("vector");
            let vector: Vec<f32> = serde_json::from_str(&vector_json)
                .map_err(|e| Error::Internal(format!("Malformed embedding vector: {}", e)))?;
            Ok(CandidateEmbedding {
                student_id: Uuid::parse_str(row.get("student_id"))
                    .map_err(|e| Error::Internal(format!("Malformed UUID: {}", e)))?,
                student_name: row.get("student_name"),
                embedding_id: row.get("embedding_id"),
                vector,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_schema(&pool).await.unwrap();
        pool
    }

    fn now() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2025, 12, 19)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_enrollment_rejected() {
        let pool = setup().await;
        let course = insert(&pool, "CS101", "Intro to CS", Some("Dr. Grace")).await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        let student = crate::db::students::insert(&mut tx, "SP21-BCS-010", "Dana", "CS", now())
            .await
            .unwrap();
        enroll(&mut tx, student.id, course.id, now()).await.unwrap();
        tx.commit().await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let dup = enroll(&mut conn, student.id, course.id, now()).await;
        assert!(matches!(dup, Err(Error::EnrollmentConflict(_))));
    }

    #[tokio::test]
    async fn test_candidate_view_excludes_soft_deleted() {
        let pool = setup().await;
        let course = insert(&pool, "CS102", "Data Structures", None).await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        let kept = crate::db::students::insert(&mut tx, "SP21-BCS-011", "Eve", "CS", now())
            .await
            .unwrap();
        let gone = crate::db::students::insert(&mut tx, "SP21-BCS-012", "Frank", "CS", now())
            .await
            .unwrap();
        for s in [&kept, &gone] {
            enroll(&mut tx, s.id, course.id, now()).await.unwrap();
            crate::db::students::insert_embedding(&mut tx, s.id, &[1.0, 0.0], 0.9, now())
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        crate::db::students::soft_delete(&pool, gone.id, now()).await.unwrap();

        let candidates = enrolled_students_with_embeddings(&pool, course.id).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].student_id, kept.id);
    }
}
