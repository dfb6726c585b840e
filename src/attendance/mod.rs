//! Attendance pipeline
//!
//! Entry point for recognition requests and manual marks: active-session
//! lookup, embedding extraction, matching, and the transactional attendance
//! commit.

pub mod service;
pub mod types;

pub use service::AttendanceService;
pub use types::{MatchedStudent, RecognizeOutcome};
