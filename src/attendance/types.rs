//! Attendance pipeline outcome types
//!
//! Every way a recognition request can end is a value here, not an error:
//! the HTTP layer maps each variant onto a status code, and nothing in this
//! family aborts the request pipeline.

use serde::Serialize;
use uuid::Uuid;

use crate::db::models::AttendanceStatus;

/// The student a recognition or manual mark resolved to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedStudent {
    pub id: Uuid,
    pub name: String,
}

/// Outcome of `recognize` / `mark`.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizeOutcome {
    /// First sighting committed with PRESENT or LATE
    Marked {
        student: MatchedStudent,
        status: AttendanceStatus,
        confidence: Option<f64>,
        session_id: Uuid,
    },
    /// Student already has an attendance row for this session
    ReEntry {
        student: MatchedStudent,
        session_id: Uuid,
    },
    /// Known student, but not enrolled in the session's course
    Intruder {
        student: MatchedStudent,
        session_id: Uuid,
    },
    /// Best similarity fell below the confidence threshold
    UnknownFace,
    /// No session is currently active
    NoActiveSession,
    /// Several sessions active and no scope narrowed them to one
    AmbiguousSession,
    /// The image contained no face
    NoFace,
    /// The image contained more than one face
    MultipleFaces,
    /// The session's course has no enrolled students with embeddings
    NoEnrolled,
    /// The session was finalized or cancelled before the commit
    SessionClosed,
    /// The embedding provider exceeded the request deadline
    Timeout,
}

impl RecognizeOutcome {
    /// Wire name of the outcome (the `result` field of API responses).
    pub fn code(&self) -> &'static str {
        match self {
            RecognizeOutcome::Marked { .. } => "MARKED",
            RecognizeOutcome::ReEntry { .. } => "RE_ENTRY",
            RecognizeOutcome::Intruder { .. } => "INTRUDER",
            RecognizeOutcome::UnknownFace => "UNKNOWN_FACE",
            RecognizeOutcome::NoActiveSession => "NO_ACTIVE_SESSION",
            RecognizeOutcome::AmbiguousSession => "AMBIGUOUS_SESSION",
            RecognizeOutcome::NoFace => "NO_FACE",
            RecognizeOutcome::MultipleFaces => "MULTIPLE_FACES",
            RecognizeOutcome::NoEnrolled => "NO_ENROLLED",
            RecognizeOutcome::SessionClosed => "SESSION_CLOSED",
            RecognizeOutcome::Timeout => "TIMEOUT",
        }
    }
}
