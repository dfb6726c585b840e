//! Student registration and enrollment endpoints
//!
//! Registration is the whole intake flow in one transaction-backed request:
//! validate the external id, run the enrollment frames through the quality
//! pipeline, create the student, attach embeddings, and enroll in the
//! selected courses. Students are never hard-deleted.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use regex::Regex;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::attendance::decode_image;
use crate::api::types::{EnrollFramesRequest, RegisterStudentRequest, StudentDto};
use crate::api::{ApiError, ApiResult};
use crate::config::EngineConfig;
use crate::db;
use crate::error::Error;
use crate::server::AppState;

fn validate_external_id(external_id: &str, pattern: &str) -> Result<(), Error> {
    let re = Regex::new(pattern)
        .map_err(|e| Error::Config(format!("Invalid external_id_pattern: {}", e)))?;

    if re.is_match(external_id) {
        Ok(())
    } else {
        Err(Error::InvalidIdFormat(format!(
            "'{}' does not match the required format",
            external_id
        )))
    }
}

fn decode_frames(frames: &[String]) -> Result<Vec<Vec<u8>>, Error> {
    frames.iter().map(|f| decode_image(f)).collect()
}

/// GET /students
async fn list_students(State(state): State<AppState>) -> ApiResult<Json<Vec<StudentDto>>> {
    let students = db::students::list(&state.db).await?;
    Ok(Json(students.iter().map(StudentDto::from).collect()))
}

/// POST /students - register a student with facial enrollment and course
/// selection
async fn register_student(
    State(state): State<AppState>,
    Json(req): Json<RegisterStudentRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let now = state.clock.now();
    let config = EngineConfig::from_database(&state.db).await?;

    if req.name.trim().is_empty() {
        return Err(ApiError(Error::InvalidInput("Name is required".to_string())));
    }
    validate_external_id(&req.external_id, &config.external_id_pattern).map_err(ApiError)?;

    if db::students::get_by_external_id(&state.db, &req.external_id)
        .await?
        .is_some()
    {
        return Err(ApiError(Error::DuplicateStudentId(req.external_id.clone())));
    }

    let frames = decode_frames(&req.frames).map_err(ApiError)?;
    if frames.len() < config.enrollment_k_min {
        return Err(ApiError(Error::InvalidInput(format!(
            "At least {} capture frames are required for enrollment",
            config.enrollment_k_min
        ))));
    }

    let department = req.department.as_deref().unwrap_or("General");

    // Create the student first so the enrollment pipeline has a target; the
    // student row is only reachable once this handler returns success, and
    // a failed enrollment rolls the whole registration back below.
    let mut tx = state.db.begin().await?;
    let student =
        db::students::insert(&mut tx, &req.external_id, &req.name, department, now).await?;

    let mut enrolled_courses = 0usize;
    for course_id in &req.course_ids {
        db::courses::get_by_id(&state.db, *course_id)
            .await?
            .ok_or_else(|| ApiError(Error::NotFound(format!("Course {}", course_id))))?;
        db::courses::enroll(&mut tx, student.id, *course_id, now).await?;
        enrolled_courses += 1;
    }
    tx.commit().await?;

    // Embedding extraction happens outside the transaction (provider calls
    // must not hold connections); a quality failure removes the student
    // again so the external id stays free.
    let summary = state
        .enrollment
        .enroll_frames(student.id, &frames, None, &config, now)
        .await;

    let summary = match summary {
        Ok(summary) => summary,
        Err(e) => {
            db::students::soft_delete(&state.db, student.id, now).await?;
            return Err(ApiError(e));
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "student": StudentDto::from(&student),
            "coursesEnrolled": enrolled_courses,
            "embeddingsSaved": summary.embeddings_saved,
            "totalFrames": summary.total_frames,
            "validFrames": summary.valid_frames,
        })),
    ))
}

/// POST /students/:id/enroll-frames - re-run facial enrollment for an
/// existing student
async fn enroll_frames(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<EnrollFramesRequest>,
) -> ApiResult<Json<Value>> {
    let now = state.clock.now();
    let config = EngineConfig::from_database(&state.db).await?;

    let frames = decode_frames(&req.frames).map_err(ApiError)?;

    let summary = state
        .enrollment
        .enroll_frames(id, &frames, req.max_embeddings, &config, now)
        .await?;

    Ok(Json(json!({
        "studentId": id,
        "embeddingsSaved": summary.embeddings_saved,
        "totalFrames": summary.total_frames,
        "validFrames": summary.valid_frames,
    })))
}

/// DELETE /students/:id - soft delete
async fn delete_student(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let now = state.clock.now();

    if db::students::soft_delete(&state.db, id, now).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(Error::NotFound(format!("Student {}", id))))
    }
}

/// GET /students/validate-id/:external_id
async fn validate_id(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let config = EngineConfig::from_database(&state.db).await?;

    let valid_format = validate_external_id(&external_id, &config.external_id_pattern).is_ok();
    let available = db::students::get_by_external_id(&state.db, &external_id)
        .await?
        .is_none();

    Ok(Json(json!({
        "validFormat": valid_format,
        "available": available,
    })))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/students", get(list_students))
        .route("/students", post(register_student))
        .route("/students/:id", delete(delete_student))
        .route("/students/:id/enroll-frames", post(enroll_frames))
        .route("/students/validate-id/:external_id", get(validate_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_id_pattern() {
        let pattern = r"^SP\d{2}-BCS-\d{3}$";
        assert!(validate_external_id("SP21-BCS-001", pattern).is_ok());
        assert!(validate_external_id("SP21-BCS-1", pattern).is_err());
        assert!(validate_external_id("XX21-BCS-001", pattern).is_err());
        assert!(validate_external_id("", pattern).is_err());
    }
}
