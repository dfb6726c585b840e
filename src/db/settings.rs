//! Settings database access
//!
//! Read/write settings from the settings table (key-value store). All
//! settings are global/system-wide. Writers bump `settings_version` so
//! readers that cache per tick can detect staleness.

use crate::error::{Error, Result};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{info, warn};

/// Monotonic counter bumped on every settings write.
pub const SETTINGS_VERSION_KEY: &str = "settings_version";

/// Initialize or update default settings.
///
/// Ensures all required settings exist; NULL values are reset to defaults.
pub async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Recognition
    ensure_setting(pool, "confidence_threshold", "0.60").await?;
    ensure_setting(pool, "recognize_timeout_seconds", "5").await?;

    // Session timing
    ensure_setting(pool, "late_threshold_default_minutes", "5").await?;
    ensure_setting(pool, "finalizer_buffer_minutes", "5").await?;
    ensure_setting(pool, "scheduler_tick_seconds", "60").await?;
    ensure_setting(pool, "activation_window_minutes", "5").await?;

    // Enrollment
    ensure_setting(pool, "enrollment_k_min", "5").await?;
    ensure_setting(pool, "enrollment_k_max", "15").await?;
    ensure_setting(pool, "enrollment_replace_existing", "true").await?;
    ensure_setting(pool, "external_id_pattern", r"^SP\d{2}-BCS-\d{3}$").await?;

    // Quality gates
    ensure_setting(pool, "min_face_size_px", "80").await?;
    ensure_setting(pool, "blur_threshold", "100.0").await?;
    ensure_setting(pool, "yaw_max_degrees", "25").await?;
    ensure_setting(pool, "pitch_max_degrees", "20").await?;
    ensure_setting(pool, "roll_max_degrees", "30").await?;

    ensure_setting(pool, SETTINGS_VERSION_KEY, "0").await?;

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value.
///
/// If the setting doesn't exist it is created with the default; a NULL value
/// is reset to the default.
async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if !exists {
        sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(default_value)
            .execute(pool)
            .await?;
        return Ok(());
    }

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if value.is_none() {
        sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;
        warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
    }

    Ok(())
}

/// Generic setting getter.
///
/// Returns None if the key doesn't exist. Parses the stored string using
/// FromStr.
pub async fn get_setting<T: FromStr>(pool: &SqlitePool, key: &str) -> Result<Option<T>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    match value {
        Some(s) => match s.parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Generic setting setter. Bumps the settings version counter.
pub async fn set_setting<T: ToString>(pool: &SqlitePool, key: &str, value: T) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES (?, ?, datetime('now', 'localtime'))
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(pool)
    .await?;

    if key != SETTINGS_VERSION_KEY {
        sqlx::query(
            r#"
            UPDATE settings
            SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT)
            WHERE key = ?
            "#,
        )
        .bind(SETTINGS_VERSION_KEY)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Current settings version, 0 when never written.
pub async fn settings_version(pool: &SqlitePool) -> Result<i64> {
    Ok(get_setting::<i64>(pool, SETTINGS_VERSION_KEY)
        .await?
        .unwrap_or(0))
}

/// All settings as (key, value) pairs for the admin surface.
pub async fn all_settings(pool: &SqlitePool) -> Result<Vec<(String, String)>> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT key, value FROM settings WHERE value IS NOT NULL ORDER BY key")
            .fetch_all(pool)
            .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_defaults_initialized() {
        let db = setup_test_db().await;

        let threshold: Option<f64> = get_setting(&db, "confidence_threshold").await.unwrap();
        assert_eq!(threshold, Some(0.60));

        let tick: Option<u64> = get_setting(&db, "scheduler_tick_seconds").await.unwrap();
        assert_eq!(tick, Some(60));
    }

    #[tokio::test]
    async fn test_generic_setting_get_set() {
        let db = setup_test_db().await;

        set_setting(&db, "test_int", 42).await.unwrap();
        let value: Option<i32> = get_setting(&db, "test_int").await.unwrap();
        assert_eq!(value, Some(42));

        let value: Option<String> = get_setting(&db, "nonexistent").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_version_bumps_on_write() {
        let db = setup_test_db().await;

        let v0 = settings_version(&db).await.unwrap();
        set_setting(&db, "confidence_threshold", 0.7).await.unwrap();
        let v1 = settings_version(&db).await.unwrap();
        assert_eq!(v1, v0 + 1);
    }
}
