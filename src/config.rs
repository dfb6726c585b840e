//! Runtime configuration
//!
//! Database-first configuration: every knob lives in the settings table and
//! is re-read at the start of each scheduler tick (and per recognize
//! request for the recognition thresholds), so admin changes take effect
//! without a restart.

use crate::db::settings::get_setting;
use crate::error::Result;
use sqlx::SqlitePool;

/// Engine configuration snapshot, loaded from the settings table.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum cosine similarity for a recognition match (0..1)
    pub confidence_threshold: f64,

    /// Soft deadline for one recognize request, seconds
    pub recognize_timeout_seconds: u64,

    /// Late threshold applied to manual sessions that don't specify one
    pub late_threshold_default_minutes: i64,

    /// Extra minutes after the late threshold before absentees are marked
    pub finalizer_buffer_minutes: i64,

    /// Scheduler tick interval, seconds
    pub scheduler_tick_seconds: u64,

    /// Window around a slot's start inside which a new session starts ACTIVE
    pub activation_window_minutes: i64,

    /// Minimum embeddings that must survive enrollment quality gates
    pub enrollment_k_min: usize,

    /// Maximum embeddings kept per student
    pub enrollment_k_max: usize,

    /// Replace a student's prior embeddings on re-enrollment
    pub enrollment_replace_existing: bool,

    /// Regex an external student id must match
    pub external_id_pattern: String,

    /// Quality gates applied to enrollment frames
    pub min_face_size_px: f32,
    pub blur_threshold: f32,
    pub yaw_max_degrees: f32,
    pub pitch_max_degrees: f32,
    pub roll_max_degrees: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.60,
            recognize_timeout_seconds: 5,
            late_threshold_default_minutes: 5,
            finalizer_buffer_minutes: 5,
            scheduler_tick_seconds: 60,
            activation_window_minutes: 5,
            enrollment_k_min: 5,
            enrollment_k_max: 15,
            enrollment_replace_existing: true,
            external_id_pattern: r"^SP\d{2}-BCS-\d{3}$".to_string(),
            min_face_size_px: 80.0,
            blur_threshold: 100.0,
            yaw_max_degrees: 25.0,
            pitch_max_degrees: 20.0,
            roll_max_degrees: 30.0,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the settings table, falling back to defaults
    /// for missing or unparsable keys.
    pub async fn from_database(pool: &SqlitePool) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = get_setting::<f64>(pool, "confidence_threshold").await? {
            config.confidence_threshold = v.clamp(0.0, 1.0);
        }
        if let Some(v) = get_setting::<u64>(pool, "recognize_timeout_seconds").await? {
            config.recognize_timeout_seconds = v.max(1);
        }
        if let Some(v) = get_setting::<i64>(pool, "late_threshold_default_minutes").await? {
            config.late_threshold_default_minutes = v.max(0);
        }
        if let Some(v) = get_setting::<i64>(pool, "finalizer_buffer_minutes").await? {
            config.finalizer_buffer_minutes = v.max(0);
        }
        if let Some(v) = get_setting::<u64>(pool, "scheduler_tick_seconds").await? {
            config.scheduler_tick_seconds = v.max(1);
        }
        if let Some(v) = get_setting::<i64>(pool, "activation_window_minutes").await? {
            config.activation_window_minutes = v.max(0);
        }
        if let Some(v) = get_setting::<usize>(pool, "enrollment_k_min").await? {
            config.enrollment_k_min = v.max(1);
        }
        if let Some(v) = get_setting::<usize>(pool, "enrollment_k_max").await? {
            config.enrollment_k_max = v.max(config.enrollment_k_min);
        }
        if let Some(v) = get_setting::<bool>(pool, "enrollment_replace_existing").await? {
            config.enrollment_replace_existing = v;
        }
        if let Some(v) = get_setting::<String>(pool, "external_id_pattern").await? {
            config.external_id_pattern = v;
        }
        if let Some(v) = get_setting::<f32>(pool, "min_face_size_px").await? {
            config.min_face_size_px = v;
        }
        if let Some(v) = get_setting::<f32>(pool, "blur_threshold").await? {
            config.blur_threshold = v;
        }
        if let Some(v) = get_setting::<f32>(pool, "yaw_max_degrees").await? {
            config.yaw_max_degrees = v;
        }
        if let Some(v) = get_setting::<f32>(pool, "pitch_max_degrees").await? {
            config.pitch_max_degrees = v;
        }
        if let Some(v) = get_setting::<f32>(pool, "roll_max_degrees").await? {
            config.roll_max_degrees = v;
        }

        Ok(config)
    }
}
