//! Session scheduler
//!
//! Background task that drives the session lifecycle from the weekly
//! timetable: materializes today's sessions, activates due ones, runs
//! finalization jobs, and closes expired sessions. Each tick derives
//! everything from a single `now`, so a restart after downtime catches up
//! in one pass: missed sessions (bounded to today) are created, overdue
//! activations happen, and overdue finalizations run immediately.

pub mod finalizer;

use chrono::{Datelike, Duration as ChronoDuration, NaiveDateTime};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::db;
use crate::db::models::{SessionStatus, TimetableSlot, Weekday};
use crate::error::Result;

/// Sessions are materialized starting this many minutes before the slot's
/// start.
const MATERIALIZE_LEAD_MINUTES: i64 = 2;

pub struct SessionScheduler {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
    /// Guards tick execution; overlapping ticks are forbidden.
    tick_guard: tokio::sync::Mutex<()>,
}

impl SessionScheduler {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            tick_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Spawn the periodic scheduler task.
    pub fn spawn(self: Arc<Self>, tick_seconds: u64) {
        info!("Starting session scheduler (tick: {}s)", tick_seconds);

        tokio::spawn(async move {
            let mut timer = interval(Duration::from_secs(tick_seconds));
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                timer.tick().await;
                if let Err(e) = self.tick().await {
                    error!("Scheduler tick failed: {}", e);
                }
            }
        });
    }

    /// Run one scheduler tick: materialize, activate, finalize, close.
    pub async fn tick(&self) -> Result<()> {
        let _guard = self.tick_guard.lock().await;
        let started = std::time::Instant::now();

        let config = EngineConfig::from_database(&self.db).await?;
        let now = self.clock.now();

        self.materialize_today(&config, now).await;
        self.activate_due(now).await;
        self.run_due_finalizations(now).await;
        self.close_expired(now).await;

        let elapsed = started.elapsed();
        if elapsed > Duration::from_secs(config.scheduler_tick_seconds / 2) {
            warn!(
                "Scheduler tick took {:?} (more than half the {}s tick interval)",
                elapsed, config.scheduler_tick_seconds
            );
        }

        Ok(())
    }

    /// Pass (a): create sessions for today's active timetable slots whose
    /// window has opened. One slot failing does not stop the others.
    async fn materialize_today(&self, config: &EngineConfig, now: NaiveDateTime) {
        let Some(weekday) = Weekday::from_chrono(now.date().weekday()) else {
            debug!("No timetable on weekends");
            return;
        };

        let slots = match db::timetable::active_slots_for_day(&self.db, weekday).await {
            Ok(slots) => slots,
            Err(e) => {
                error!("Failed to load timetable slots for {}: {}", weekday, e);
                return;
            }
        };

        for slot in slots {
            if let Err(e) = self.materialize_slot(&slot, config, now).await {
                error!("Failed to materialize session for slot {}: {}", slot.id, e);
            }
        }
    }

    async fn materialize_slot(
        &self,
        slot: &TimetableSlot,
        config: &EngineConfig,
        now: NaiveDateTime,
    ) -> Result<()> {
        let starts_at = now.date().and_time(slot.start_time);
        let ends_at = now.date().and_time(slot.end_time);

        if now < starts_at - ChronoDuration::minutes(MATERIALIZE_LEAD_MINUTES) || now >= ends_at {
            return Ok(());
        }

        let activation_window = ChronoDuration::minutes(config.activation_window_minutes);
        let status = if (now - starts_at).abs() <= activation_window && now < ends_at {
            SessionStatus::Active
        } else {
            SessionStatus::Scheduled
        };

        let (session, created) = db::sessions::find_or_create_for_slot(
            &self.db,
            slot.id,
            slot.course_id,
            starts_at,
            ends_at,
            slot.late_threshold_minutes,
            status,
            now,
        )
        .await?;

        if created {
            info!(
                "Auto-created session {} for course {} ({} slot {}, {})",
                session.id, slot.course_id, slot.weekday, slot.slot_index, session.status
            );
        }

        // Idempotent: re-registration after a crash between create and
        // register is a no-op.
        let run_at = starts_at
            + ChronoDuration::minutes(slot.late_threshold_minutes)
            + ChronoDuration::minutes(config.finalizer_buffer_minutes);
        db::sessions::register_finalize_job(&self.db, session.id, run_at).await?;

        Ok(())
    }

    /// Pass (b): SCHEDULED sessions whose start moment has arrived become
    /// ACTIVE.
    async fn activate_due(&self, now: NaiveDateTime) {
        let due = match db::sessions::list_due_to_activate(&self.db, now).await {
            Ok(due) => due,
            Err(e) => {
                error!("Failed to list sessions due to activate: {}", e);
                return;
            }
        };

        for session in due {
            let mut conn = match self.db.acquire().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to acquire connection: {}", e);
                    return;
                }
            };
            match db::sessions::transition(
                &mut conn,
                session.id,
                SessionStatus::Scheduled,
                SessionStatus::Active,
            )
            .await
            {
                Ok(true) => info!("Activated session {} (course {})", session.id, session.course_id),
                Ok(false) => {}
                Err(e) => error!("Failed to activate session {}: {}", session.id, e),
            }
        }
    }

    /// Pass (c), first half: execute every finalization job whose run time
    /// has arrived, including jobs that became overdue while the process
    /// was down.
    async fn run_due_finalizations(&self, now: NaiveDateTime) {
        let due = match db::sessions::due_finalize_jobs(&self.db, now).await {
            Ok(due) => due,
            Err(e) => {
                error!("Failed to list due finalize jobs: {}", e);
                return;
            }
        };

        for job in due {
            if let Err(e) = finalizer::finalize_session(&self.db, job.session_id, now).await {
                error!("Finalization of session {} failed: {}", job.session_id, e);
            }
        }
    }

    /// Pass (c), second half: ACTIVE sessions past their end either complete
    /// (finalizer already ran) or get finalized now.
    async fn close_expired(&self, now: NaiveDateTime) {
        let expired = match db::sessions::list_due_to_close(&self.db, now).await {
            Ok(expired) => expired,
            Err(e) => {
                error!("Failed to list expired sessions: {}", e);
                return;
            }
        };

        for session in expired {
            let finalized = match db::sessions::get_finalize_job(&self.db, session.id).await {
                Ok(job) => job.map(|j| j.executed_at.is_some()).unwrap_or(false),
                Err(e) => {
                    error!("Failed to read finalize job for {}: {}", session.id, e);
                    continue;
                }
            };

            let result = if finalized {
                let mut conn = match self.db.acquire().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to acquire connection: {}", e);
                        return;
                    }
                };
                db::sessions::transition(
                    &mut conn,
                    session.id,
                    SessionStatus::Active,
                    SessionStatus::Completed,
                )
                .await
                .map(|moved| {
                    if moved {
                        info!("Closed expired session {}", session.id);
                    }
                })
            } else {
                // End passed before the finalize time (or the job never ran);
                // finalizing also completes the session.
                finalizer::finalize_session(&self.db, session.id, now).await
            };

            if let Err(e) = result {
                error!("Failed to close session {}: {}", session.id, e);
            }
        }
    }
}
