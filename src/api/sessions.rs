//! Session management endpoints
//!
//! Manual creation, listing, lifecycle transitions, and per-session
//! attendance views. Automatic creation belongs to the scheduler; manual
//! sessions enforce slot uniqueness only when a slot id is supplied.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, NaiveDate};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::types::{
    parse_wire_ts, AttendanceDto, CreateSessionRequest, ReentryEventDto, SessionDto, SessionQuery,
};
use crate::api::{ApiError, ApiResult};
use crate::config::EngineConfig;
use crate::db;
use crate::db::models::SessionStatus;
use crate::error::Error;
use crate::scheduler::finalizer;
use crate::server::AppState;

/// GET /sessions?date=YYYY-MM-DD&status=...
async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Json<Vec<SessionDto>>> {
    let date = query
        .date
        .as_deref()
        .map(|d| {
            NaiveDate::parse_from_str(d, "%Y-%m-%d")
                .map_err(|_| Error::InvalidInput(format!("Invalid date '{}', use YYYY-MM-DD", d)))
        })
        .transpose()
        .map_err(ApiError)?;

    let status = query
        .status
        .as_deref()
        .map(|s| {
            s.parse::<SessionStatus>()
                .map_err(|_| Error::InvalidInput(format!("Unknown session status '{}'", s)))
        })
        .transpose()
        .map_err(ApiError)?;

    let sessions = db::sessions::list_filtered(&state.db, date, status).await?;
    Ok(Json(sessions.iter().map(SessionDto::from).collect()))
}

/// GET /sessions/active
async fn list_active(State(state): State<AppState>) -> ApiResult<Json<Vec<SessionDto>>> {
    let now = state.clock.now();
    let sessions = db::sessions::list_active(&state.db, now).await?;
    Ok(Json(sessions.iter().map(SessionDto::from).collect()))
}

/// GET /sessions/:id
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionDto>> {
    let session = db::sessions::get_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError(Error::NotFound(format!("Session {}", id))))?;
    Ok(Json(SessionDto::from(&session)))
}

/// POST /sessions - manual session creation
async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionDto>)> {
    let now = state.clock.now();
    let config = EngineConfig::from_database(&state.db).await?;

    let starts_at = parse_wire_ts(&req.starts_at).map_err(ApiError)?;
    let ends_at = parse_wire_ts(&req.ends_at).map_err(ApiError)?;

    if ends_at <= starts_at {
        return Err(ApiError(Error::InvalidInput(
            "End time must be after start time".to_string(),
        )));
    }
    if ends_at <= now {
        return Err(ApiError(Error::InvalidInput(
            "End time cannot be in the past".to_string(),
        )));
    }

    let course = db::courses::get_by_id(&state.db, req.course_id)
        .await?
        .ok_or_else(|| ApiError(Error::NotFound(format!("Course {}", req.course_id))))?;

    let late_threshold = req
        .late_threshold_minutes
        .unwrap_or(config.late_threshold_default_minutes);

    // ACTIVE when the start is now, recently past, or imminent
    let activation_window = ChronoDuration::minutes(config.activation_window_minutes);
    let status = if starts_at <= now + activation_window && now < ends_at {
        SessionStatus::Active
    } else {
        SessionStatus::Scheduled
    };

    if let Some(conflict) = db::sessions::find_overlapping_open(&state.db, starts_at, ends_at).await? {
        return Err(ApiError(Error::InvalidState(format!(
            "Conflicting session {} ({}) overlaps the requested window",
            conflict.id, conflict.status
        ))));
    }

    let session = match req.timetable_slot_id {
        // With a slot reference the (slot, day) uniqueness applies
        Some(slot_id) => {
            let (session, created) = db::sessions::find_or_create_for_slot(
                &state.db, slot_id, course.id, starts_at, ends_at, late_threshold, status, now,
            )
            .await?;
            if !created {
                return Err(ApiError(Error::InvalidState(format!(
                    "Session {} already exists for this slot today",
                    session.id
                ))));
            }
            session
        }
        None => {
            db::sessions::insert_manual(
                &state.db,
                course.id,
                None,
                starts_at,
                ends_at,
                late_threshold,
                status,
                req.notes.as_deref(),
                now,
            )
            .await?
        }
    };

    let run_at = starts_at
        + ChronoDuration::minutes(late_threshold)
        + ChronoDuration::minutes(config.finalizer_buffer_minutes);
    db::sessions::register_finalize_job(&state.db, session.id, run_at).await?;

    Ok((StatusCode::CREATED, Json(SessionDto::from(&session))))
}

/// PUT /sessions/:id/activate
async fn activate_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionDto>> {
    let session = require_session(&state, id).await?;

    match session.status {
        SessionStatus::Active => {}
        SessionStatus::Scheduled => {
            let mut conn = state.db.acquire().await.map_err(Error::from)?;
            db::sessions::transition(&mut conn, id, SessionStatus::Scheduled, SessionStatus::Active)
                .await?;
        }
        status => {
            return Err(ApiError(Error::InvalidState(format!(
                "Cannot activate a {} session",
                status
            ))))
        }
    }

    reread(&state, id).await
}

/// PUT /sessions/:id/end - finalize immediately
async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionDto>> {
    let session = require_session(&state, id).await?;

    match session.status {
        SessionStatus::Completed => {}
        SessionStatus::Active | SessionStatus::Scheduled => {
            // Ending a session runs the finalizer: absentees get marked and
            // the status moves to COMPLETED.
            let now = state.clock.now();
            if session.status == SessionStatus::Scheduled {
                let mut conn = state.db.acquire().await.map_err(Error::from)?;
                db::sessions::transition(&mut conn, id, SessionStatus::Scheduled, SessionStatus::Active)
                    .await?;
            }
            finalizer::finalize_session(&state.db, id, now).await?;
        }
        SessionStatus::Cancelled => {
            return Err(ApiError(Error::InvalidState(
                "Cannot end a cancelled session".to_string(),
            )))
        }
    }

    reread(&state, id).await
}

/// PUT /sessions/:id/cancel - terminal; attendance retained, finalizer
/// never runs
async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionDto>> {
    let session = require_session(&state, id).await?;

    match session.status {
        SessionStatus::Cancelled => {}
        SessionStatus::Scheduled | SessionStatus::Active => {
            let mut conn = state.db.acquire().await.map_err(Error::from)?;
            db::sessions::transition(&mut conn, id, session.status, SessionStatus::Cancelled).await?;
        }
        SessionStatus::Completed => {
            return Err(ApiError(Error::InvalidState(
                "Cannot cancel a completed session".to_string(),
            )))
        }
    }

    reread(&state, id).await
}

/// GET /sessions/:id/attendance
async fn session_attendance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    require_session(&state, id).await?;

    let attendance = db::attendance::list_for_session(&state.db, id).await?;
    let events = db::attendance::list_reentry_events(&state.db, id).await?;

    Ok(Json(json!({
        "sessionId": id,
        "records": attendance.iter().map(AttendanceDto::from).collect::<Vec<_>>(),
        "reentryEvents": events.iter().map(ReentryEventDto::from).collect::<Vec<_>>(),
    })))
}

async fn require_session(state: &AppState, id: Uuid) -> ApiResult<crate::db::models::Session> {
    db::sessions::get_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError(Error::NotFound(format!("Session {}", id))))
}

async fn reread(state: &AppState, id: Uuid) -> ApiResult<Json<SessionDto>> {
    let session = require_session(state, id).await?;
    Ok(Json(SessionDto::from(&session)))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions", post(create_session))
        .route("/sessions/active", get(list_active))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/activate", put(activate_session))
        .route("/sessions/:id/end", put(end_session))
        .route("/sessions/:id/cancel", put(cancel_session))
        .route("/sessions/:id/attendance", get(session_attendance))
}
