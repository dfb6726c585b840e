//! Timetable endpoints

use axum::extract::{Path, State};
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use uuid::Uuid;

use crate::api::types::UpsertSlotRequest;
use crate::api::{ApiError, ApiResult};
use crate::config::EngineConfig;
use crate::db;
use crate::db::models::{parse_tod, TimetableSlot, Weekday};
use crate::error::Error;
use crate::server::AppState;

/// GET /timetable - the whole weekly grid
async fn get_timetable(State(state): State<AppState>) -> ApiResult<Json<Vec<TimetableSlot>>> {
    Ok(Json(db::timetable::list(&state.db).await?))
}

/// PUT /timetable/slot - create or replace one (weekday, slot) cell
async fn upsert_slot(
    State(state): State<AppState>,
    Json(req): Json<UpsertSlotRequest>,
) -> ApiResult<Json<TimetableSlot>> {
    let config = EngineConfig::from_database(&state.db).await?;

    let weekday: Weekday = req
        .weekday
        .to_uppercase()
        .parse()
        .map_err(|_| ApiError(Error::InvalidInput(format!("Unknown weekday '{}'", req.weekday))))?;

    let start_time = parse_tod(&req.start_time)
        .map_err(|_| ApiError(Error::InvalidInput(format!("Invalid time '{}', use HH:MM", req.start_time))))?;
    let end_time = parse_tod(&req.end_time)
        .map_err(|_| ApiError(Error::InvalidInput(format!("Invalid time '{}', use HH:MM", req.end_time))))?;

    if end_time <= start_time {
        return Err(ApiError(Error::InvalidInput(
            "Slot end time must be after start time".to_string(),
        )));
    }

    db::courses::get_by_id(&state.db, req.course_id)
        .await?
        .ok_or_else(|| ApiError(Error::NotFound(format!("Course {}", req.course_id))))?;

    let slot = db::timetable::upsert(
        &state.db,
        weekday,
        req.slot_index,
        req.course_id,
        start_time,
        end_time,
        req.late_threshold_minutes
            .unwrap_or(config.late_threshold_default_minutes),
    )
    .await?;

    Ok(Json(slot))
}

/// DELETE /timetable/slot/:id - existing sessions keep their dangling slot
/// reference
async fn delete_slot(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<axum::http::StatusCode> {
    if db::timetable::delete(&state.db, id).await? {
        Ok(axum::http::StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(Error::NotFound(format!("Timetable slot {}", id))))
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/timetable", get(get_timetable))
        .route("/timetable/slot", put(upsert_slot))
        .route("/timetable/slot/:id", delete(delete_slot))
}
