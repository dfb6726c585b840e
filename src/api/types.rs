//! API request/response types
//!
//! Payload fields are camelCase for compatibility with existing clients.
//! Timestamps cross the wire as `YYYY-MM-DDTHH:MM:SS` local wall-clock
//! strings.

use axum::http::StatusCode;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::attendance::RecognizeOutcome;
use crate::db::models::{Attendance, ReentryEvent, Session};
use crate::error::Error;

/// Parse a wire timestamp (ISO `T` separator, space accepted).
pub fn parse_wire_ts(s: &str) -> Result<NaiveDateTime, Error> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map_err(|_| Error::InvalidInput(format!("Invalid datetime '{}', use YYYY-MM-DDTHH:MM:SS", s)))
}

fn fmt_wire_ts(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S").to_string()
}

// ============================================================================
// Recognition
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizeRequest {
    /// Base64-encoded image
    pub image: String,
    /// Optional course scope (course code or id) to disambiguate parallel
    /// sessions
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRequest {
    pub session_id: Uuid,
    pub student_id: Uuid,
    /// Explicit status for the mark; omitted means classify PRESENT/LATE
    /// from the session's late cutoff
    #[serde(default)]
    pub status: Option<crate::db::models::AttendanceStatus>,
}

/// Serialize a pipeline outcome with its HTTP status.
pub fn outcome_response(outcome: &RecognizeOutcome) -> (StatusCode, Value) {
    let body = match outcome {
        RecognizeOutcome::Marked { student, status, confidence, session_id } => json!({
            "result": outcome.code(),
            "student": student,
            "status": status,
            "confidence": confidence,
            "sessionId": session_id,
        }),
        RecognizeOutcome::ReEntry { student, session_id }
        | RecognizeOutcome::Intruder { student, session_id } => json!({
            "result": outcome.code(),
            "student": student,
            "sessionId": session_id,
        }),
        _ => json!({ "result": outcome.code() }),
    };

    let status = match outcome {
        RecognizeOutcome::Marked { .. }
        | RecognizeOutcome::Intruder { .. }
        | RecognizeOutcome::UnknownFace => StatusCode::OK,
        RecognizeOutcome::NoFace | RecognizeOutcome::MultipleFaces => StatusCode::BAD_REQUEST,
        RecognizeOutcome::NoActiveSession | RecognizeOutcome::NoEnrolled => StatusCode::NOT_FOUND,
        RecognizeOutcome::ReEntry { .. }
        | RecognizeOutcome::SessionClosed
        | RecognizeOutcome::AmbiguousSession => StatusCode::CONFLICT,
        RecognizeOutcome::Timeout => StatusCode::GATEWAY_TIMEOUT,
    };

    (status, body)
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub course_id: Uuid,
    pub starts_at: String,
    pub ends_at: String,
    pub late_threshold_minutes: Option<i64>,
    pub timetable_slot_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    /// YYYY-MM-DD
    pub date: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDto {
    pub id: Uuid,
    pub course_id: Uuid,
    pub timetable_slot_id: Option<Uuid>,
    pub starts_at: String,
    pub ends_at: String,
    pub late_threshold_minutes: i64,
    pub status: String,
    pub auto_created: bool,
    pub notes: Option<String>,
}

impl From<&Session> for SessionDto {
    fn from(s: &Session) -> Self {
        Self {
            id: s.id,
            course_id: s.course_id,
            timetable_slot_id: s.timetable_slot_id,
            starts_at: fmt_wire_ts(s.starts_at),
            ends_at: fmt_wire_ts(s.ends_at),
            late_threshold_minutes: s.late_threshold_minutes,
            status: s.status.to_string(),
            auto_created: s.auto_created,
            notes: s.notes.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceDto {
    pub id: Uuid,
    pub session_id: Uuid,
    pub student_id: Uuid,
    pub status: String,
    pub check_in_time: Option<String>,
    pub last_seen_time: Option<String>,
    pub confidence: Option<f64>,
    pub method: String,
    pub notes: Option<String>,
}

impl From<&Attendance> for AttendanceDto {
    fn from(a: &Attendance) -> Self {
        Self {
            id: a.id,
            session_id: a.session_id,
            student_id: a.student_id,
            status: a.status.to_string(),
            check_in_time: a.check_in_time.map(fmt_wire_ts),
            last_seen_time: a.last_seen_time.map(fmt_wire_ts),
            confidence: a.confidence,
            method: a.method.to_string(),
            notes: a.notes.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReentryEventDto {
    pub id: Uuid,
    pub student_id: Uuid,
    pub action: String,
    pub suspicious: bool,
    pub created_at: String,
}

impl From<&ReentryEvent> for ReentryEventDto {
    fn from(e: &ReentryEvent) -> Self {
        Self {
            id: e.id,
            student_id: e.student_id,
            action: e.action.to_string(),
            suspicious: e.suspicious,
            created_at: fmt_wire_ts(e.created_at),
        }
    }
}

// ============================================================================
// Students / enrollment
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterStudentRequest {
    pub name: String,
    pub external_id: String,
    #[serde(default)]
    pub department: Option<String>,
    /// Base64-encoded capture frames
    pub frames: Vec<String>,
    #[serde(default)]
    pub course_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollFramesRequest {
    pub frames: Vec<String>,
    pub max_embeddings: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDto {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub department: String,
    pub status: String,
    pub created_at: String,
}

impl From<&crate::db::models::Student> for StudentDto {
    fn from(s: &crate::db::models::Student) -> Self {
        Self {
            id: s.id,
            external_id: s.external_id.clone(),
            name: s.name.clone(),
            department: s.department.clone(),
            status: s.status.clone(),
            created_at: fmt_wire_ts(s.created_at),
        }
    }
}

// ============================================================================
// Courses / timetable
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCourseRequest {
    pub code: String,
    pub name: String,
    pub instructor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertSlotRequest {
    pub weekday: String,
    pub slot_index: i64,
    pub course_id: Uuid,
    /// HH:MM
    pub start_time: String,
    pub end_time: String,
    pub late_threshold_minutes: Option<i64>,
}
