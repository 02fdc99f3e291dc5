use progress_core::model::{CourseId, LessonId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{db, id_i64, lesson_id_from_i64, ser};
use crate::repository::{LessonCatalog, StorageError};

impl SqliteRepository {
    /// Register a lesson in the catalog table.
    ///
    /// The catalog is owned by course management; this exists for seeding and tests.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the insert fails.
    pub async fn add_lesson(
        &self,
        course_id: CourseId,
        lesson_id: LessonId,
        position: u32,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO lessons (id, course_id, position)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                course_id = excluded.course_id,
                position = excluded.position
            ",
        )
        .bind(id_i64("lesson_id", lesson_id.value())?)
        .bind(id_i64("course_id", course_id.value())?)
        .bind(i64::from(position))
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LessonCatalog for SqliteRepository {
    async fn lesson_count_for_course(&self, course_id: CourseId) -> Result<u32, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM lessons WHERE course_id = ?1")
            .bind(id_i64("course_id", course_id.value())?)
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;
        let n: i64 = row.try_get("n").map_err(ser)?;
        u32::try_from(n).map_err(|_| StorageError::Serialization(format!("invalid count: {n}")))
    }

    async fn lessons_for_course(&self, course_id: CourseId) -> Result<Vec<LessonId>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id FROM lessons
            WHERE course_id = ?1
            ORDER BY position ASC, id ASC
            ",
        )
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(lesson_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?);
        }
        Ok(out)
    }
}
