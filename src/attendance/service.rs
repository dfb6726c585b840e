//! Attendance service
//!
//! Orchestrates one recognition request end to end: a single `now` for the
//! whole request, active-session resolution, provider call under a
//! deadline, candidate assembly scoped to the session's enrollments, and
//! the attendance commit in one transaction. The provider is never called
//! while a transaction is open.

use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::attendance::types::{MatchedStudent, RecognizeOutcome};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::db;
use crate::db::models::{
    AttendanceMethod, AttendanceStatus, ReentryAction, Session, SessionStatus,
};
use crate::error::{Error, Result};
use crate::recognition::matcher::best_match;
use crate::recognition::provider::{normalize, EmbeddingProvider};

pub struct AttendanceService {
    db: SqlitePool,
    provider: Arc<dyn EmbeddingProvider>,
    clock: Arc<dyn Clock>,
}

impl AttendanceService {
    pub fn new(db: SqlitePool, provider: Arc<dyn EmbeddingProvider>, clock: Arc<dyn Clock>) -> Self {
        Self { db, provider, clock }
    }

    /// Recognize a face and commit attendance against the active session.
    ///
    /// `scope` narrows the target session by course (code or id) when more
    /// than one session is active.
    pub async fn recognize(&self, image: &[u8], scope: Option<&str>) -> Result<RecognizeOutcome> {
        let now = self.clock.now();
        let config = EngineConfig::from_database(&self.db).await?;

        let session = match self.resolve_active_session(now, scope).await? {
            Ok(session) => session,
            Err(outcome) => return Ok(outcome),
        };

        // Inference runs outside any transaction, under the soft deadline.
        let deadline = Duration::from_secs(config.recognize_timeout_seconds);
        let faces = match tokio::time::timeout(deadline, self.provider.embed(image)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Embedding provider exceeded {}s deadline, request dropped",
                    config.recognize_timeout_seconds
                );
                return Ok(RecognizeOutcome::Timeout);
            }
        };

        let face = match faces.as_slice() {
            [] => return Ok(RecognizeOutcome::NoFace),
            [face] => face,
            _ => return Ok(RecognizeOutcome::MultipleFaces),
        };

        let query = normalize(&face.embedding)?;

        let candidates =
            db::courses::enrolled_students_with_embeddings(&self.db, session.course_id).await?;
        if candidates.is_empty() {
            return Ok(RecognizeOutcome::NoEnrolled);
        }

        let matched = match best_match(&query, &candidates, config.confidence_threshold as f32) {
            Some(m) if m.matched => m,
            _ => return Ok(RecognizeOutcome::UnknownFace),
        };

        let student = MatchedStudent {
            id: matched.student_id,
            name: matched.student_name.clone(),
        };

        self.commit(
            session.id,
            student,
            Some(matched.similarity as f64),
            AttendanceMethod::Auto,
            None,
            now,
        )
        .await
    }

    /// Manually mark a student for a session. Same commit rules as
    /// `recognize`, including the intruder check, with `method=MANUAL`.
    /// An explicit `status` overrides the late-cutoff classification;
    /// omitted means classify from the check-in time like the automatic
    /// path.
    pub async fn mark(
        &self,
        session_id: Uuid,
        student_id: Uuid,
        status: Option<AttendanceStatus>,
    ) -> Result<RecognizeOutcome> {
        let now = self.clock.now();

        // INTRUDER is decided by the enrollment check, never requested
        if status == Some(AttendanceStatus::Intruder) {
            return Err(Error::InvalidInput(
                "INTRUDER cannot be assigned manually".to_string(),
            ));
        }

        let session = db::sessions::get_by_id(&self.db, session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session {}", session_id)))?;
        if session.status != SessionStatus::Active {
            return Ok(RecognizeOutcome::SessionClosed);
        }

        let student = db::students::get_by_id(&self.db, student_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Student {}", student_id)))?;

        self.commit(
            session.id,
            MatchedStudent { id: student.id, name: student.name },
            None,
            AttendanceMethod::Manual,
            status,
            now,
        )
        .await
    }

    /// Resolve the unique active session for a request.
    async fn resolve_active_session(
        &self,
        now: NaiveDateTime,
        scope: Option<&str>,
    ) -> Result<std::result::Result<Session, RecognizeOutcome>> {
        let active = db::sessions::list_active(&self.db, now).await?;

        if active.is_empty() {
            return Ok(Err(RecognizeOutcome::NoActiveSession));
        }

        let Some(scope) = scope else {
            return Ok(match active.as_slice() {
                [only] => Ok(only.clone()),
                _ => Err(RecognizeOutcome::AmbiguousSession),
            });
        };

        // Scope is a course id or a course code
        let course_id = match Uuid::parse_str(scope) {
            Ok(id) => Some(id),
            Err(_) => db::courses::get_by_code(&self.db, scope).await?.map(|c| c.id),
        };
        let Some(course_id) = course_id else {
            return Ok(Err(RecognizeOutcome::NoActiveSession));
        };

        let mut scoped: Vec<Session> =
            active.into_iter().filter(|s| s.course_id == course_id).collect();
        Ok(match scoped.len() {
            0 => Err(RecognizeOutcome::NoActiveSession),
            1 => Ok(scoped.remove(0)),
            _ => Err(RecognizeOutcome::AmbiguousSession),
        })
    }

    /// The attendance commit: re-read the session, classify the sighting,
    /// and write attendance plus the re-entry event in one transaction.
    /// `requested_status` is the manual path's explicit status; it replaces
    /// the late-cutoff classification but never the enrollment check.
    async fn commit(
        &self,
        session_id: Uuid,
        student: MatchedStudent,
        confidence: Option<f64>,
        method: AttendanceMethod,
        requested_status: Option<AttendanceStatus>,
        now: NaiveDateTime,
    ) -> Result<RecognizeOutcome> {
        let mut tx = self.db.begin().await?;

        // The session may have been finalized or cancelled since the lookup.
        let session = db::sessions::get_by_id_tx(&mut tx, session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session {}", session_id)))?;
        if session.status != SessionStatus::Active {
            return Ok(RecognizeOutcome::SessionClosed);
        }

        if let Some(existing) = db::attendance::get(&mut tx, session_id, student.id).await? {
            if existing.status == AttendanceStatus::Absent {
                // The finalizer already decided this student's outcome.
                return Ok(RecognizeOutcome::SessionClosed);
            }

            db::attendance::touch_last_seen(&mut tx, session_id, student.id, confidence, now)
                .await?;
            db::attendance::log_reentry(
                &mut tx,
                session_id,
                student.id,
                ReentryAction::Reentry,
                true,
                now,
            )
            .await?;
            tx.commit().await?;

            return Ok(RecognizeOutcome::ReEntry { student, session_id });
        }

        let enrolled = db::courses::is_enrolled(&mut tx, student.id, session.course_id).await?;

        let (status, action, suspicious, check_in) = if !enrolled {
            (AttendanceStatus::Intruder, ReentryAction::Intruder, true, Some(now))
        } else if let (AttendanceMethod::Manual, Some(requested)) = (method, requested_status) {
            // Explicit manual status: an admin marking ABSENT or overriding
            // the computed classification. ABSENT rows carry no check-in.
            let check_in = (requested != AttendanceStatus::Absent).then_some(now);
            (requested, ReentryAction::FirstIn, false, check_in)
        } else if now <= session.late_cutoff() {
            (AttendanceStatus::Present, ReentryAction::FirstIn, false, Some(now))
        } else {
            (AttendanceStatus::Late, ReentryAction::FirstIn, false, Some(now))
        };

        let inserted = db::attendance::insert(
            &mut tx,
            session_id,
            student.id,
            status,
            check_in,
            confidence,
            method,
            None,
            now,
        )
        .await;

        if let Err(e) = inserted {
            // Lost an insert race: the unique index is authoritative.
            if db::is_unique_violation(&e) {
                drop(tx);
                return self.resolve_insert_race(session_id, student, confidence, now).await;
            }
            return Err(e.into());
        }

        db::attendance::log_reentry(&mut tx, session_id, student.id, action, suspicious, now)
            .await?;
        tx.commit().await?;

        info!(
            "Attendance {} for {} in session {} ({:?})",
            status, student.name, session_id, method
        );

        Ok(match status {
            AttendanceStatus::Intruder => RecognizeOutcome::Intruder { student, session_id },
            _ => RecognizeOutcome::Marked { student, status, confidence, session_id },
        })
    }

    /// A concurrent writer got there first. Re-read and report what they
    /// decided: an ABSENT row (or a closed session) means the finalizer won.
    async fn resolve_insert_race(
        &self,
        session_id: Uuid,
        student: MatchedStudent,
        confidence: Option<f64>,
        now: NaiveDateTime,
    ) -> Result<RecognizeOutcome> {
        let mut tx = self.db.begin().await?;

        let session = db::sessions::get_by_id_tx(&mut tx, session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session {}", session_id)))?;
        let existing = db::attendance::get(&mut tx, session_id, student.id)
            .await?
            .ok_or_else(|| Error::Internal("Attendance row vanished after conflict".into()))?;

        if session.status != SessionStatus::Active || existing.status == AttendanceStatus::Absent {
            return Ok(RecognizeOutcome::SessionClosed);
        }

        db::attendance::touch_last_seen(&mut tx, session_id, student.id, confidence, now).await?;
        db::attendance::log_reentry(&mut tx, session_id, student.id, ReentryAction::Reentry, true, now)
            .await?;
        tx.commit().await?;

        Ok(RecognizeOutcome::ReEntry { student, session_id })
    }
}
