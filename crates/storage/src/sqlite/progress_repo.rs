use std::collections::HashMap;

use chrono::{DateTime, Utc};
use progress_core::model::{CourseId, CourseProgress, LessonId, LessonProgress, UserId};
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use super::SqliteRepository;
use super::mapping::{
    db, id_i64, map_lesson_row, map_progress_row, ser, user_id_from_i64,
};
use crate::repository::{ProgressRepository, StorageError};

const PROGRESS_COLUMNS: &str = r"
    user_id, course_id, progress, status, total_lessons, completed_lessons,
    started_at, last_accessed, completed_at, version
";

const LESSON_COLUMNS: &str = r"
    user_id, lesson_id, status, progress, time_spent_secs,
    last_accessed, completed_at, notes
";

// Aggregate and entry reads share one transaction so both see the same snapshot.
async fn load_lessons(
    conn: &mut SqliteConnection,
    user: i64,
    course: i64,
) -> Result<Vec<LessonProgress>, StorageError> {
    let sql = format!(
        "SELECT {LESSON_COLUMNS} FROM lesson_progress
         WHERE user_id = ?1 AND course_id = ?2
         ORDER BY position ASC"
    );
    let rows = sqlx::query(&sql)
        .bind(user)
        .bind(course)
        .fetch_all(&mut *conn)
        .await
        .map_err(db)?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let (_, entry) = map_lesson_row(&row)?;
        out.push(entry);
    }
    Ok(out)
}

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<CourseProgress>, StorageError> {
        let user = id_i64("user_id", user_id.value())?;
        let course = id_i64("course_id", course_id.value())?;

        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM course_progress
             WHERE user_id = ?1 AND course_id = ?2"
        );
        let mut tx = self.pool.begin().await.map_err(db)?;
        let Some(row) = sqlx::query(&sql)
            .bind(user)
            .bind(course)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?
        else {
            tx.commit().await.map_err(db)?;
            return Ok(None);
        };

        let lessons = load_lessons(&mut tx, user, course).await?;
        tx.commit().await.map_err(db)?;
        map_progress_row(&row, lessons).map(Some)
    }

    async fn get_or_create_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
        total_lessons: u32,
        now: DateTime<Utc>,
    ) -> Result<CourseProgress, StorageError> {
        // The primary key arbitrates racing creators; losers fall through to the re-read.
        let res = sqlx::query(
            r"
            INSERT INTO course_progress (
                user_id, course_id, progress, status, total_lessons, completed_lessons,
                started_at, last_accessed, completed_at, version
            )
            VALUES (?1, ?2, 0, 'not_started', ?3, 0, ?4, ?4, NULL, 1)
            ON CONFLICT(user_id, course_id) DO NOTHING
            ",
        )
        .bind(id_i64("user_id", user_id.value())?)
        .bind(id_i64("course_id", course_id.value())?)
        .bind(i64::from(total_lessons))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        if res.rows_affected() == 1 {
            debug!(user = %user_id, course = %course_id, total_lessons, "progress record created");
        }

        self.get_progress(user_id, course_id)
            .await?
            .ok_or(StorageError::NotFound)
    }

    async fn save_progress(
        &self,
        record: &CourseProgress,
        changed: &[LessonId],
    ) -> Result<(), StorageError> {
        let user = id_i64("user_id", record.user_id().value())?;
        let course = id_i64("course_id", record.course_id().value())?;
        let version = id_i64("version", record.version())?;

        let mut tx = self.pool.begin().await.map_err(db)?;

        let res = sqlx::query(
            r"
            UPDATE course_progress SET
                progress = ?1,
                status = ?2,
                total_lessons = ?3,
                completed_lessons = ?4,
                last_accessed = ?5,
                completed_at = COALESCE(completed_at, ?6),
                version = version + 1
            WHERE user_id = ?7 AND course_id = ?8 AND version = ?9
            ",
        )
        .bind(i64::from(record.progress()))
        .bind(record.status().as_str())
        .bind(i64::from(record.total_lessons()))
        .bind(i64::from(record.completed_lessons()))
        .bind(record.last_accessed())
        .bind(record.completed_at())
        .bind(user)
        .bind(course)
        .bind(version)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        if res.rows_affected() == 0 {
            let exists = sqlx::query(
                "SELECT 1 FROM course_progress WHERE user_id = ?1 AND course_id = ?2",
            )
            .bind(user)
            .bind(course)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?
            .is_some();
            tx.rollback().await.map_err(db)?;
            return Err(if exists {
                StorageError::Conflict
            } else {
                StorageError::NotFound
            });
        }

        for lesson_id in changed {
            let Some(position) = record
                .lessons()
                .iter()
                .position(|e| e.lesson_id() == *lesson_id)
            else {
                return Err(StorageError::Serialization(format!(
                    "lesson {lesson_id} missing from record"
                )));
            };
            let entry = &record.lessons()[position];
            let time_spent = id_i64("time_spent_secs", entry.time_spent_secs())?;
            let position = i64::try_from(position)
                .map_err(|_| StorageError::Serialization("position overflow".into()))?;

            sqlx::query(
                r"
                INSERT INTO lesson_progress (
                    user_id, course_id, lesson_id, position, status, progress,
                    time_spent_secs, last_accessed, completed_at, notes
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(user_id, course_id, lesson_id) DO UPDATE SET
                    -- position and the first completion time are fixed once written
                    status = excluded.status,
                    progress = excluded.progress,
                    time_spent_secs = excluded.time_spent_secs,
                    last_accessed = excluded.last_accessed,
                    completed_at = COALESCE(lesson_progress.completed_at, excluded.completed_at),
                    notes = excluded.notes
                ",
            )
            .bind(user)
            .bind(course)
            .bind(id_i64("lesson_id", lesson_id.value())?)
            .bind(position)
            .bind(entry.status().as_str())
            .bind(i64::from(entry.progress()))
            .bind(time_spent)
            .bind(entry.last_accessed())
            .bind(entry.completed_at())
            .bind(entry.notes())
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        }

        tx.commit().await.map_err(db)?;
        Ok(())
    }

    async fn list_user_progress(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CourseProgress>, StorageError> {
        let user = id_i64("user_id", user_id.value())?;
        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM course_progress
             WHERE user_id = ?1
             ORDER BY course_id ASC"
        );
        let mut tx = self.pool.begin().await.map_err(db)?;
        let rows = sqlx::query(&sql)
            .bind(user)
            .fetch_all(&mut *tx)
            .await
            .map_err(db)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let course: i64 = row.try_get("course_id").map_err(ser)?;
            let lessons = load_lessons(&mut tx, user, course).await?;
            out.push(map_progress_row(&row, lessons)?);
        }
        tx.commit().await.map_err(db)?;
        Ok(out)
    }

    async fn list_course_page(
        &self,
        course_id: CourseId,
        after: Option<UserId>,
        limit: u32,
    ) -> Result<Vec<CourseProgress>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let course = id_i64("course_id", course_id.value())?;
        let after = match after {
            Some(user) => id_i64("user_id", user.value())?,
            None => -1,
        };

        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM course_progress
             WHERE course_id = ?1 AND user_id > ?2
             ORDER BY user_id ASC
             LIMIT ?3"
        );
        let mut tx = self.pool.begin().await.map_err(db)?;
        let rows = sqlx::query(&sql)
            .bind(course)
            .bind(after)
            .bind(i64::from(limit))
            .fetch_all(&mut *tx)
            .await
            .map_err(db)?;

        let Some(last) = rows.last() else {
            tx.commit().await.map_err(db)?;
            return Ok(Vec::new());
        };
        let last_user: i64 = last.try_get("user_id").map_err(ser)?;

        // One range scan for the whole page's lesson entries.
        let sql = format!(
            "SELECT {LESSON_COLUMNS} FROM lesson_progress
             WHERE course_id = ?1 AND user_id > ?2 AND user_id <= ?3
             ORDER BY user_id ASC, position ASC"
        );
        let lesson_rows = sqlx::query(&sql)
            .bind(course)
            .bind(after)
            .bind(last_user)
            .fetch_all(&mut *tx)
            .await
            .map_err(db)?;
        tx.commit().await.map_err(db)?;

        let mut by_user: HashMap<UserId, Vec<LessonProgress>> = HashMap::new();
        for row in &lesson_rows {
            let (user, entry) = map_lesson_row(row)?;
            by_user.entry(user).or_default().push(entry);
        }

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let user = user_id_from_i64(row.try_get::<i64, _>("user_id").map_err(ser)?)?;
            let lessons = by_user.remove(&user).unwrap_or_default();
            out.push(map_progress_row(row, lessons)?);
        }
        debug!(course = %course_id, records = out.len(), "course progress page loaded");
        Ok(out)
    }
}
