use chrono::{DateTime, Utc};
use progress_core::model::{
    CourseId, CourseProgress, LessonId, LessonProgress, ProgressStatus, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn db(e: sqlx::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

fn percent_from_i64(field: &'static str, v: i64) -> Result<u8, StorageError> {
    u8::try_from(v)
        .ok()
        .filter(|p| *p <= 100)
        .ok_or_else(|| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn user_id_from_i64(v: i64) -> Result<UserId, StorageError> {
    Ok(UserId::new(i64_to_u64("user_id", v)?))
}

pub(crate) fn course_id_from_i64(v: i64) -> Result<CourseId, StorageError> {
    Ok(CourseId::new(i64_to_u64("course_id", v)?))
}

pub(crate) fn lesson_id_from_i64(v: i64) -> Result<LessonId, StorageError> {
    Ok(LessonId::new(i64_to_u64("lesson_id", v)?))
}

fn parse_status(s: &str) -> Result<ProgressStatus, StorageError> {
    s.parse().map_err(ser)
}

/// Maps a `lesson_progress` row to its owning user and the entry.
pub(crate) fn map_lesson_row(row: &SqliteRow) -> Result<(UserId, LessonProgress), StorageError> {
    let user_id = user_id_from_i64(row.try_get::<i64, _>("user_id").map_err(ser)?)?;
    let status: String = row.try_get("status").map_err(ser)?;
    let entry = LessonProgress::from_persisted(
        lesson_id_from_i64(row.try_get::<i64, _>("lesson_id").map_err(ser)?)?,
        parse_status(&status)?,
        percent_from_i64("progress", row.try_get::<i64, _>("progress").map_err(ser)?)?,
        i64_to_u64(
            "time_spent_secs",
            row.try_get::<i64, _>("time_spent_secs").map_err(ser)?,
        )?,
        row.try_get::<DateTime<Utc>, _>("last_accessed")
            .map_err(ser)?,
        row.try_get::<Option<DateTime<Utc>>, _>("completed_at")
            .map_err(ser)?,
        row.try_get::<Option<String>, _>("notes").map_err(ser)?,
    )
    .map_err(ser)?;
    Ok((user_id, entry))
}

/// Maps a `course_progress` row plus its already-loaded entries.
pub(crate) fn map_progress_row(
    row: &SqliteRow,
    lessons: Vec<LessonProgress>,
) -> Result<CourseProgress, StorageError> {
    let status: String = row.try_get("status").map_err(ser)?;
    CourseProgress::from_persisted(
        user_id_from_i64(row.try_get::<i64, _>("user_id").map_err(ser)?)?,
        course_id_from_i64(row.try_get::<i64, _>("course_id").map_err(ser)?)?,
        lessons,
        percent_from_i64("progress", row.try_get::<i64, _>("progress").map_err(ser)?)?,
        parse_status(&status)?,
        u32_from_i64(
            "total_lessons",
            row.try_get::<i64, _>("total_lessons").map_err(ser)?,
        )?,
        row.try_get("started_at").map_err(ser)?,
        row.try_get("last_accessed").map_err(ser)?,
        row.try_get("completed_at").map_err(ser)?,
        i64_to_u64("version", row.try_get::<i64, _>("version").map_err(ser)?)?,
    )
    .map_err(ser)
}
