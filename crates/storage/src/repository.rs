use async_trait::async_trait;
use chrono::{DateTime, Utc};
use progress_core::model::{CourseId, CourseProgress, LessonId, UserId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// The record changed since it was read (optimistic version mismatch).
    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Progress Store contract: one `CourseProgress` per (user, course).
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch a record without creating it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<CourseProgress>, StorageError>;

    /// Fetch the record, creating an empty one seeded with `total_lessons` if absent.
    ///
    /// Concurrent callers for the same key all observe the same single record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_or_create_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
        total_lessons: u32,
        now: DateTime<Utc>,
    ) -> Result<CourseProgress, StorageError>;

    /// Persist aggregate fields plus the `changed` lesson entries.
    ///
    /// The write only applies if the stored version still equals `record.version()`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` on a version mismatch, `StorageError::NotFound`
    /// if the record was never created, or other storage errors.
    async fn save_progress(
        &self,
        record: &CourseProgress,
        changed: &[LessonId],
    ) -> Result<(), StorageError>;

    /// All records for a learner, ordered by course id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_user_progress(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CourseProgress>, StorageError>;

    /// One page of a course's records ordered by user id, starting after `after`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_course_page(
        &self,
        course_id: CourseId,
        after: Option<UserId>,
        limit: u32,
    ) -> Result<Vec<CourseProgress>, StorageError>;
}

/// Read side of the external lesson catalog.
#[async_trait]
pub trait LessonCatalog: Send + Sync {
    /// Current number of lessons in a course.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be read.
    async fn lesson_count_for_course(&self, course_id: CourseId) -> Result<u32, StorageError>;

    /// Lesson ids of a course in syllabus order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be read.
    async fn lessons_for_course(&self, course_id: CourseId) -> Result<Vec<LessonId>, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    progress: Arc<Mutex<BTreeMap<(CourseId, UserId), CourseProgress>>>,
    lessons: Arc<Mutex<HashMap<CourseId, Vec<LessonId>>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the catalog's lesson list for a course.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn set_course_lessons(
        &self,
        course_id: CourseId,
        lessons: Vec<LessonId>,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .lessons
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(course_id, lessons);
        Ok(())
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<CourseProgress>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(course_id, user_id)).cloned())
    }

    async fn get_or_create_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
        total_lessons: u32,
        now: DateTime<Utc>,
    ) -> Result<CourseProgress, StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let record = guard.entry((course_id, user_id)).or_insert_with(|| {
            CourseProgress::new(user_id, course_id, total_lessons, now).with_version(1)
        });
        Ok(record.clone())
    }

    async fn save_progress(
        &self,
        record: &CourseProgress,
        _changed: &[LessonId],
    ) -> Result<(), StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let stored = guard
            .get_mut(&(record.course_id(), record.user_id()))
            .ok_or(StorageError::NotFound)?;
        if stored.version() != record.version() {
            return Err(StorageError::Conflict);
        }
        *stored = record.clone().with_version(record.version() + 1);
        Ok(())
    }

    async fn list_user_progress(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CourseProgress>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .values()
            .filter(|r| r.user_id() == user_id)
            .cloned()
            .collect())
    }

    async fn list_course_page(
        &self,
        course_id: CourseId,
        after: Option<UserId>,
        limit: u32,
    ) -> Result<Vec<CourseProgress>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(guard
            .range((course_id, UserId::new(0))..=(course_id, UserId::new(u64::MAX)))
            .filter(|((_, user), _)| after.is_none_or(|a| *user > a))
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }
}

#[async_trait]
impl LessonCatalog for InMemoryRepository {
    async fn lesson_count_for_course(&self, course_id: CourseId) -> Result<u32, StorageError> {
        let lessons = self.lessons_for_course(course_id).await?;
        u32::try_from(lessons.len())
            .map_err(|_| StorageError::Serialization("lesson count overflow".into()))
    }

    async fn lessons_for_course(&self, course_id: CourseId) -> Result<Vec<LessonId>, StorageError> {
        let guard = self
            .lessons
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&course_id).cloned().unwrap_or_default())
    }
}

/// Aggregates the progress store and catalog behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
    pub catalog: Arc<dyn LessonCatalog>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use progress_core::time::fixed_now;

    #[tokio::test]
    async fn get_or_create_returns_same_record() {
        let repo = InMemoryRepository::new();
        let (user, course) = (UserId::new(1), CourseId::new(2));

        let first = repo
            .get_or_create_progress(user, course, 4, fixed_now())
            .await
            .unwrap();
        let second = repo
            .get_or_create_progress(user, course, 9, fixed_now())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(second.total_lessons(), 4);
        assert_eq!(repo.list_user_progress(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let repo = InMemoryRepository::new();
        let (user, course) = (UserId::new(1), CourseId::new(2));
        let now = fixed_now();

        let mut a = repo.get_or_create_progress(user, course, 2, now).await.unwrap();
        let mut b = a.clone();

        a.complete_lesson(LessonId::new(1), None, now);
        repo.save_progress(&a, &[LessonId::new(1)]).await.unwrap();

        b.complete_lesson(LessonId::new(2), None, now);
        let err = repo.save_progress(&b, &[LessonId::new(2)]).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));

        let stored = repo.get_progress(user, course).await.unwrap().unwrap();
        assert_eq!(stored.completed_lessons(), 1);
        assert_eq!(stored.version(), a.version() + 1);
    }

    #[tokio::test]
    async fn course_pages_are_keyset_ordered() {
        let repo = InMemoryRepository::new();
        let course = CourseId::new(5);
        for user in [3, 1, 2] {
            repo.get_or_create_progress(UserId::new(user), course, 1, fixed_now())
                .await
                .unwrap();
        }
        repo.get_or_create_progress(UserId::new(1), CourseId::new(6), 1, fixed_now())
            .await
            .unwrap();

        let first = repo.list_course_page(course, None, 2).await.unwrap();
        let users: Vec<_> = first.iter().map(|r| r.user_id().value()).collect();
        assert_eq!(users, vec![1, 2]);

        let rest = repo
            .list_course_page(course, Some(UserId::new(2)), 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].user_id(), UserId::new(3));
    }

    #[tokio::test]
    async fn catalog_counts_lessons() {
        let repo = InMemoryRepository::new();
        let course = CourseId::new(1);
        assert_eq!(repo.lesson_count_for_course(course).await.unwrap(), 0);

        repo.set_course_lessons(course, vec![LessonId::new(1), LessonId::new(2)])
            .unwrap();
        assert_eq!(repo.lesson_count_for_course(course).await.unwrap(), 2);
    }
}
