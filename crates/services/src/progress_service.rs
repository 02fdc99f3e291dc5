use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use progress_core::ProgressError;
use progress_core::model::{
    CourseId, CourseProgress, LessonId, LessonPercent, ProgressSummary, UserId,
};
use rand::Rng;
use storage::repository::{LessonCatalog, ProgressRepository, StorageError};
use tracing::{debug, warn};

use crate::Clock;
use crate::config::ProgressConfig;
use crate::error::ProgressServiceError;

/// Applies learner events to per-course progress records.
///
/// Every mutation is a load, mutate, versioned save cycle. A save that loses the
/// version race is retried from a fresh read up to `ProgressConfig::max_attempts`.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    config: ProgressConfig,
    progress: Arc<dyn ProgressRepository>,
    catalog: Arc<dyn LessonCatalog>,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        clock: Clock,
        progress: Arc<dyn ProgressRepository>,
        catalog: Arc<dyn LessonCatalog>,
    ) -> Self {
        Self {
            clock,
            config: ProgressConfig::default(),
            progress,
            catalog,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ProgressConfig) -> Self {
        self.config = config;
        self
    }

    /// Summary of a learner's progress in a course.
    ///
    /// A learner with no record gets the zero-value summary with the catalog's
    /// current lesson count.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if the record cannot be read.
    pub async fn get_course_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<ProgressSummary, ProgressServiceError> {
        if let Some(record) = self.progress.get_progress(user_id, course_id).await? {
            return Ok(record.summary());
        }
        let total = self.live_total(course_id).await.unwrap_or(0);
        Ok(ProgressSummary::empty(course_id, total))
    }

    /// Record a viewing percent for a lesson. At 90% or more the lesson completes.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Progress` for a percent outside `0..=100`
    /// before anything is read or written.
    /// Returns `ProgressServiceError::ConcurrencyConflict` if every attempt conflicted.
    /// Returns `ProgressServiceError::Storage` for other storage failures.
    pub async fn track_lesson_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
        lesson_id: LessonId,
        percent: f64,
    ) -> Result<ProgressSummary, ProgressServiceError> {
        let percent = LessonPercent::new(percent)?;
        let record = self
            .mutate(user_id, course_id, lesson_id, |record, live_total, now| {
                record.update_lesson_progress(lesson_id, percent, live_total, now);
                Ok(())
            })
            .await?;
        Ok(record.summary())
    }

    /// Mark a lesson completed. Repeating the call changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::ConcurrencyConflict` if every attempt conflicted.
    /// Returns `ProgressServiceError::Storage` for other storage failures.
    pub async fn complete_lesson(
        &self,
        user_id: UserId,
        course_id: CourseId,
        lesson_id: LessonId,
    ) -> Result<ProgressSummary, ProgressServiceError> {
        let record = self
            .mutate(user_id, course_id, lesson_id, |record, live_total, now| {
                if !record.complete_lesson(lesson_id, live_total, now) {
                    debug!(user = %user_id, course = %course_id, lesson = %lesson_id, "lesson already completed");
                }
                Ok(())
            })
            .await?;
        Ok(record.summary())
    }

    /// Add watched seconds to a lesson.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Progress` if the lesson's counter would overflow.
    /// Returns `ProgressServiceError::ConcurrencyConflict` if every attempt conflicted.
    /// Returns `ProgressServiceError::Storage` for other storage failures.
    pub async fn record_time_spent(
        &self,
        user_id: UserId,
        course_id: CourseId,
        lesson_id: LessonId,
        secs: u64,
    ) -> Result<ProgressSummary, ProgressServiceError> {
        let record = self
            .mutate(user_id, course_id, lesson_id, |record, live_total, now| {
                record.record_time_spent(lesson_id, secs, live_total, now)
            })
            .await?;
        Ok(record.summary())
    }

    /// Set or clear a learner's notes on a lesson.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::ConcurrencyConflict` if every attempt conflicted.
    /// Returns `ProgressServiceError::Storage` for other storage failures.
    pub async fn update_lesson_notes(
        &self,
        user_id: UserId,
        course_id: CourseId,
        lesson_id: LessonId,
        notes: Option<String>,
    ) -> Result<ProgressSummary, ProgressServiceError> {
        let record = self
            .mutate(user_id, course_id, lesson_id, |record, live_total, now| {
                record.set_lesson_notes(lesson_id, notes.clone(), live_total, now);
                Ok(())
            })
            .await?;
        Ok(record.summary())
    }

    /// First lesson in syllabus order the learner has not completed.
    ///
    /// Returns `Ok(None)` once every catalog lesson is completed or the course is empty.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if the catalog or record cannot be read.
    pub async fn next_lesson(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<LessonId>, ProgressServiceError> {
        let lessons = self.catalog.lessons_for_course(course_id).await?;
        let record = self.progress.get_progress(user_id, course_id).await?;
        let next = lessons.into_iter().find(|lesson| {
            record
                .as_ref()
                .and_then(|r| r.entry(*lesson))
                .is_none_or(|e| !e.status().is_completed())
        });
        Ok(next)
    }

    /// Summaries for every course a learner has touched, ordered by course id.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if records cannot be read.
    pub async fn list_user_progress(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ProgressSummary>, ProgressServiceError> {
        let records = self.progress.list_user_progress(user_id).await?;
        Ok(records.iter().map(CourseProgress::summary).collect())
    }

    async fn live_total(&self, course_id: CourseId) -> Option<u32> {
        match self.catalog.lesson_count_for_course(course_id).await {
            Ok(total) => Some(total),
            Err(err) => {
                warn!(course = %course_id, error = %err, "lesson catalog unavailable, keeping cached lesson count");
                None
            }
        }
    }

    async fn mutate<F>(
        &self,
        user_id: UserId,
        course_id: CourseId,
        lesson_id: LessonId,
        apply: F,
    ) -> Result<CourseProgress, ProgressServiceError>
    where
        F: Fn(&mut CourseProgress, Option<u32>, DateTime<Utc>) -> Result<(), ProgressError>,
    {
        let live_total = self.live_total(course_id).await;
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            let now = self.clock.now();
            let mut record = self
                .progress
                .get_or_create_progress(user_id, course_id, live_total.unwrap_or(0), now)
                .await?;
            apply(&mut record, live_total, now)?;

            match self.progress.save_progress(&record, &[lesson_id]).await {
                Ok(()) => {
                    let version = record.version() + 1;
                    return Ok(record.with_version(version));
                }
                Err(StorageError::Conflict) => {
                    debug!(user = %user_id, course = %course_id, attempt, "progress save conflicted, retrying");
                    if attempt < attempts {
                        tokio::time::sleep(self.backoff()).await;
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(user = %user_id, course = %course_id, attempts, "progress save kept conflicting");
        Err(ProgressServiceError::ConcurrencyConflict { attempts })
    }

    fn backoff(&self) -> Duration {
        let base = self.config.retry_backoff;
        if base.is_zero() {
            return base;
        }
        let jitter = rand::rng().random_range(0..=base.as_micros());
        base + Duration::from_micros(u64::try_from(jitter).unwrap_or(u64::MAX))
    }
}
