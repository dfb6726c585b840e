//! Database models
//!
//! Row types and enum codecs for the attendance schema. Enums are stored as
//! TEXT and round-trip through `Display`/`FromStr`; timestamps are local
//! wall-clock instants stored in SQLite's `YYYY-MM-DD HH:MM:SS` format so
//! that `date(...)` and lexicographic comparisons work in SQL.

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Timestamp storage format (SQLite-native, sorts lexicographically).
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Time-of-day storage format for timetable slots.
pub const TOD_FORMAT: &str = "%H:%M";

/// Format a timestamp for storage.
pub fn fmt_ts(ts: NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// Parse a stored timestamp.
pub fn parse_ts(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .map_err(|e| Error::Internal(format!("Malformed timestamp '{}': {}", s, e)))
}

/// Format a time-of-day for storage.
pub fn fmt_tod(t: NaiveTime) -> String {
    t.format(TOD_FORMAT).to_string()
}

/// Parse a stored time-of-day.
pub fn parse_tod(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, TOD_FORMAT)
        .map_err(|e| Error::Internal(format!("Malformed time-of-day '{}': {}", s, e)))
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Internal(format!("Malformed UUID '{}': {}", s, e)))
}

// ============================================================================
// Enums
// ============================================================================

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let s = match self { $($name::$variant => $text),+ };
                f.write_str(s)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::Internal(format!(
                        concat!("Unknown ", stringify!($name), " value: {}"),
                        other
                    ))),
                }
            }
        }
    };
}

text_enum!(SessionStatus {
    Scheduled => "SCHEDULED",
    Active => "ACTIVE",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
});

impl SessionStatus {
    /// COMPLETED and CANCELLED are terminal; no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

text_enum!(AttendanceStatus {
    Present => "PRESENT",
    Late => "LATE",
    Absent => "ABSENT",
    Intruder => "INTRUDER",
});

impl AttendanceStatus {
    /// True for the statuses that count as having attended the session.
    pub fn attended(&self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late)
    }
}

text_enum!(AttendanceMethod {
    Auto => "AUTO",
    Manual => "MANUAL",
});

text_enum!(ReentryAction {
    FirstIn => "FIRST_IN",
    Reentry => "REENTRY",
    Intruder => "INTRUDER",
});

text_enum!(Weekday {
    Monday => "MONDAY",
    Tuesday => "TUESDAY",
    Wednesday => "WEDNESDAY",
    Thursday => "THURSDAY",
    Friday => "FRIDAY",
});

impl Weekday {
    /// Map a calendar weekday onto a timetable weekday. Weekend days have no
    /// timetable slots and return None.
    pub fn from_chrono(day: chrono::Weekday) -> Option<Self> {
        match day {
            chrono::Weekday::Mon => Some(Weekday::Monday),
            chrono::Weekday::Tue => Some(Weekday::Tuesday),
            chrono::Weekday::Wed => Some(Weekday::Wednesday),
            chrono::Weekday::Thu => Some(Weekday::Thursday),
            chrono::Weekday::Fri => Some(Weekday::Friday),
            chrono::Weekday::Sat | chrono::Weekday::Sun => None,
        }
    }
}

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Student {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub department: String,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
}

impl Student {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(row.get("id"))?,
            external_id: row.get("external_id"),
            name: row.get("name"),
            department: row.get("department"),
            status: row.get("status"),
            created_at: parse_ts(row.get("created_at"))?,
            deleted_at: row
                .get::<Option<String>, _>("deleted_at")
                .as_deref()
                .map(parse_ts)
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Embedding {
    pub id: i64,
    pub student_id: Uuid,
    pub vector: Vec<f32>,
    pub quality_score: f64,
    pub created_at: NaiveDateTime,
}

impl Embedding {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let vector_json: String = row.get("vector");
        let vector: Vec<f32> = serde_json::from_str(&vector_json)
            .map_err(|e| Error::Internal(format!("Malformed embedding vector: {}", e)))?;
        Ok(Self {
            id: row.get("id"),
            student_id: parse_uuid(row.get("student_id"))?,
            vector,
            quality_score: row.get("quality_score"),
            created_at: parse_ts(row.get("created_at"))?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub instructor: Option<String>,
    pub active: bool,
}

impl Course {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(row.get("id"))?,
            code: row.get("code"),
            name: row.get("name"),
            instructor: row.get("instructor"),
            active: row.get::<i64, _>("active") != 0,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Enrollment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub created_at: NaiveDateTime,
}

impl Enrollment {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(row.get("id"))?,
            student_id: parse_uuid(row.get("student_id"))?,
            course_id: parse_uuid(row.get("course_id"))?,
            created_at: parse_ts(row.get("created_at"))?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableSlot {
    pub id: Uuid,
    pub weekday: Weekday,
    pub slot_index: i64,
    pub course_id: Uuid,
    #[serde(with = "tod_serde")]
    pub start_time: NaiveTime,
    #[serde(with = "tod_serde")]
    pub end_time: NaiveTime,
    pub late_threshold_minutes: i64,
    pub active: bool,
}

impl TimetableSlot {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(row.get("id"))?,
            weekday: row.get::<String, _>("weekday").parse()?,
            slot_index: row.get("slot_index"),
            course_id: parse_uuid(row.get("course_id"))?,
            start_time: parse_tod(row.get("start_time"))?,
            end_time: parse_tod(row.get("end_time"))?,
            late_threshold_minutes: row.get("late_threshold_minutes"),
            active: row.get::<i64, _>("active") != 0,
        })
    }
}

mod tod_serde {
    use super::{fmt_tod, TOD_FORMAT};
    use chrono::NaiveTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&fmt_tod(*t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<NaiveTime, D::Error> {
        let s = String::deserialize(d)?;
        NaiveTime::parse_from_str(&s, TOD_FORMAT).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub course_id: Uuid,
    pub timetable_slot_id: Option<Uuid>,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub late_threshold_minutes: i64,
    pub status: SessionStatus,
    pub auto_created: bool,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Session {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(row.get("id"))?,
            course_id: parse_uuid(row.get("course_id"))?,
            timetable_slot_id: row
                .get::<Option<String>, _>("timetable_slot_id")
                .as_deref()
                .map(parse_uuid)
                .transpose()?,
            starts_at: parse_ts(row.get("starts_at"))?,
            ends_at: parse_ts(row.get("ends_at"))?,
            late_threshold_minutes: row.get("late_threshold_minutes"),
            status: row.get::<String, _>("status").parse()?,
            auto_created: row.get::<i64, _>("auto_created") != 0,
            notes: row.get("notes"),
            created_at: parse_ts(row.get("created_at"))?,
        })
    }

    /// Moment after which a first check-in is classified LATE.
    pub fn late_cutoff(&self) -> NaiveDateTime {
        self.starts_at + chrono::Duration::minutes(self.late_threshold_minutes)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Attendance {
    pub id: Uuid,
    pub session_id: Uuid,
    pub student_id: Uuid,
    pub status: AttendanceStatus,
    pub check_in_time: Option<NaiveDateTime>,
    pub last_seen_time: Option<NaiveDateTime>,
    pub confidence: Option<f64>,
    pub method: AttendanceMethod,
    pub notes: Option<String>,
}

impl Attendance {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(row.get("id"))?,
            session_id: parse_uuid(row.get("session_id"))?,
            student_id: parse_uuid(row.get("student_id"))?,
            status: row.get::<String, _>("status").parse()?,
            check_in_time: row
                .get::<Option<String>, _>("check_in_time")
                .as_deref()
                .map(parse_ts)
                .transpose()?,
            last_seen_time: row
                .get::<Option<String>, _>("last_seen_time")
                .as_deref()
                .map(parse_ts)
                .transpose()?,
            confidence: row.get("confidence"),
            method: row.get::<String, _>("method").parse()?,
            notes: row.get("notes"),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReentryEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub student_id: Uuid,
    pub action: ReentryAction,
    pub suspicious: bool,
    pub created_at: NaiveDateTime,
}

impl ReentryEvent {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(row.get("id"))?,
            session_id: parse_uuid(row.get("session_id"))?,
            student_id: parse_uuid(row.get("student_id"))?,
            action: row.get::<String, _>("action").parse()?,
            suspicious: row.get::<i64, _>("suspicious") != 0,
            created_at: parse_ts(row.get("created_at"))?,
        })
    }
}

/// One-shot finalization job for a session.
#[derive(Debug, Clone)]
pub struct FinalizeJob {
    pub session_id: Uuid,
    pub run_at: NaiveDateTime,
    pub executed_at: Option<NaiveDateTime>,
}

impl FinalizeJob {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            session_id: parse_uuid(row.get("session_id"))?,
            run_at: parse_ts(row.get("run_at"))?,
            executed_at: row
                .get::<Option<String>, _>("executed_at")
                .as_deref()
                .map(parse_ts)
                .transpose()?,
        })
    }
}

/// Candidate row for the recognition matcher: one enrolled student's
/// embedding, flattened for dense iteration.
#[derive(Debug, Clone)]
pub struct CandidateEmbedding {
    pub student_id: Uuid,
    pub student_name: String,
    pub embedding_id: i64,
    pub vector: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_round_trips() {
        for s in [
            SessionStatus::Scheduled,
            SessionStatus::Active,
            SessionStatus::Completed,
            SessionStatus::Cancelled,
        ] {
            assert_eq!(s.to_string().parse::<SessionStatus>().unwrap(), s);
        }
        assert_eq!("LATE".parse::<AttendanceStatus>().unwrap(), AttendanceStatus::Late);
        assert_eq!("FIRST_IN".parse::<ReentryAction>().unwrap(), ReentryAction::FirstIn);
        assert!("BOGUS".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn timestamp_format_round_trips() {
        let ts = chrono::NaiveDate::from_ymd_opt(2025, 12, 19)
            .unwrap()
            .and_hms_opt(10, 2, 30)
            .unwrap();
        assert_eq!(parse_ts(&fmt_ts(ts)).unwrap(), ts);
        assert_eq!(fmt_ts(ts), "2025-12-19 10:02:30");
    }

    #[test]
    fn weekday_mapping_skips_weekends() {
        assert_eq!(Weekday::from_chrono(chrono::Weekday::Fri), Some(Weekday::Friday));
        assert_eq!(Weekday::from_chrono(chrono::Weekday::Sat), None);
    }

    #[test]
    fn late_cutoff_offsets_start() {
        let starts_at = chrono::NaiveDate::from_ymd_opt(2025, 12, 19)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let session = Session {
            id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            timetable_slot_id: None,
            starts_at,
            ends_at: starts_at + chrono::Duration::hours(1),
            late_threshold_minutes: 5,
            status: SessionStatus::Active,
            auto_created: true,
            notes: None,
            created_at: starts_at,
        };
        assert_eq!(session.late_cutoff(), starts_at + chrono::Duration::minutes(5));
    }
}
