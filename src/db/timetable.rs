//! Timetable slot database access
//!
//! A slot is a recurring weekly cell keyed by (weekday, slot_index).
//! Deleting a slot leaves existing sessions' slot references dangling; the
//! reference is informational only.

use chrono::NaiveTime;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{fmt_tod, TimetableSlot, Weekday};
use crate::error::Result;

/// Create or update the slot at (weekday, slot_index).
pub async fn upsert(
    pool: &SqlitePool,
    weekday: Weekday,
    slot_index: i64,
    course_id: Uuid,
    start_time: NaiveTime,
    end_time: NaiveTime,
    late_threshold_minutes: i64,
) -> Result<TimetableSlot> {
    if let Some(existing) = get_by_day_slot(pool, weekday, slot_index).await? {
        sqlx::query(
            r#"
            UPDATE timetable_slots
            SET course_id = ?, start_time = ?, end_time = ?, late_threshold_minutes = ?, active = 1
            WHERE id = ?
            "#,
        )
        .bind(course_id.to_string())
        .bind(fmt_tod(start_time))
        .bind(fmt_tod(end_time))
        .bind(late_threshold_minutes)
        .bind(existing.id.to_string())
        .execute(pool)
        .await?;

        return Ok(TimetableSlot {
            course_id,
            start_time,
            end_time,
            late_threshold_minutes,
            active: true,
            ..existing
        });
    }

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO timetable_slots
            (id, weekday, slot_index, course_id, start_time, end_time, late_threshold_minutes, active)
        VALUES (?, ?, ?, ?, ?, ?, ?, 1)
        "#,
    )
    .bind(id.to_string())
    .bind(weekday.to_string())
    .bind(slot_index)
    .bind(course_id.to_string())
    .bind(fmt_tod(start_time))
    .bind(fmt_tod(end_time))
    .bind(late_threshold_minutes)
    .execute(pool)
    .await?;

    Ok(TimetableSlot {
        id,
        weekday,
        slot_index,
        course_id,
        start_time,
        end_time,
        late_threshold_minutes,
        active: true,
    })
}

pub async fn get_by_day_slot(
    pool: &SqlitePool,
    weekday: Weekday,
    slot_index: i64,
) -> Result<Option<TimetableSlot>> {
    let row = sqlx::query("SELECT * FROM timetable_slots WHERE weekday = ? AND slot_index = ?")
        .bind(weekday.to_string())
        .bind(slot_index)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(TimetableSlot::from_row).transpose()
}

/// Active slots for one weekday, ordered by slot index. This is what the
/// scheduler materializes sessions from.
pub async fn active_slots_for_day(pool: &SqlitePool, weekday: Weekday) -> Result<Vec<TimetableSlot>> {
    let rows = sqlx::query(
        "SELECT * FROM timetable_slots WHERE weekday = ? AND active = 1 ORDER BY slot_index",
    )
    .bind(weekday.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(TimetableSlot::from_row).collect()
}

/// Full weekly timetable, ordered by day then slot.
pub async fn list(pool: &SqlitePool) -> Result<Vec<TimetableSlot>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM timetable_slots
        ORDER BY CASE weekday
            WHEN 'MONDAY' THEN 1
            WHEN 'TUESDAY' THEN 2
            WHEN 'WEDNESDAY' THEN 3
            WHEN 'THURSDAY' THEN 4
            WHEN 'FRIDAY' THEN 5
        END, slot_index
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(TimetableSlot::from_row).collect()
}

/// Delete a slot. Existing sessions keep their (now dangling) reference.
pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM timetable_slots WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> (SqlitePool, Uuid) {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_schema(&pool).await.unwrap();
        let course = crate::db::courses::insert(&pool, "CS101", "Intro to CS", None)
            .await
            .unwrap();
        (pool, course.id)
    }

    fn tod(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_cell() {
        let (pool, course_id) = setup().await;

        let first = upsert(&pool, Weekday::Friday, 1, course_id, tod(10, 0), tod(11, 0), 5)
            .await
            .unwrap();
        let second = upsert(&pool, Weekday::Friday, 1, course_id, tod(10, 30), tod(11, 30), 10)
            .await
            .unwrap();

        // Same cell, same row id, updated window
        assert_eq!(first.id, second.id);

        let slots = active_slots_for_day(&pool, Weekday::Friday).await.unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].start_time, tod(10, 30));
        assert_eq!(slots[0].late_threshold_minutes, 10);
    }

    #[tokio::test]
    async fn test_active_slots_ordered_by_index() {
        let (pool, course_id) = setup().await;

        upsert(&pool, Weekday::Monday, 2, course_id, tod(9, 50), tod(11, 10), 5)
            .await
            .unwrap();
        upsert(&pool, Weekday::Monday, 1, course_id, tod(8, 30), tod(9, 50), 5)
            .await
            .unwrap();

        let slots = active_slots_for_day(&pool, Weekday::Monday).await.unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].slot_index, 1);
        assert_eq!(slots[1].slot_index, 2);
    }
}
