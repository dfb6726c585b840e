//! Course endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::types::CreateCourseRequest;
use crate::api::{ApiError, ApiResult};
use crate::db;
use crate::error::Error;
use crate::server::AppState;

/// GET /courses
async fn list_courses(State(state): State<AppState>) -> ApiResult<Json<Vec<db::models::Course>>> {
    Ok(Json(db::courses::list(&state.db).await?))
}

/// POST /courses
async fn create_course(
    State(state): State<AppState>,
    Json(req): Json<CreateCourseRequest>,
) -> ApiResult<(StatusCode, Json<db::models::Course>)> {
    if req.code.trim().is_empty() || req.name.trim().is_empty() {
        return Err(ApiError(Error::InvalidInput(
            "Course code and name are required".to_string(),
        )));
    }

    if db::courses::get_by_code(&state.db, &req.code).await?.is_some() {
        return Err(ApiError(Error::InvalidState(format!(
            "Course code '{}' already exists",
            req.code
        ))));
    }

    let course =
        db::courses::insert(&state.db, &req.code, &req.name, req.instructor.as_deref()).await?;

    Ok((StatusCode::CREATED, Json(course)))
}

/// GET /courses/:id/students - enrolled live students
async fn course_students(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    db::courses::get_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError(Error::NotFound(format!("Course {}", id))))?;

    let mut conn = state.db.acquire().await.map_err(Error::from)?;
    let students = db::courses::enrolled_students(&mut conn, id).await?;

    Ok(Json(json!({
        "courseId": id,
        "students": students
            .iter()
            .map(crate::api::types::StudentDto::from)
            .collect::<Vec<_>>(),
    })))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/courses", get(list_courses))
        .route("/courses", post(create_course))
        .route("/courses/:id/students", get(course_students))
}
