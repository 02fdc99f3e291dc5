use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

use crate::calculator;
use crate::error::ProgressError;
use crate::model::ids::{CourseId, LessonId, UserId};
use crate::model::lesson::{LessonPercent, LessonProgress, ProgressStatus, checked_time_spent};

/// Per-(user, course) progress aggregate.
///
/// The aggregate fields (`progress`, `status`, `completed_lessons`) are derived
/// from the lesson entries by [`calculator::recalculate`]; every mutating method
/// here finishes by calling it, so callers can persist the record directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseProgress {
    pub(crate) user_id: UserId,
    pub(crate) course_id: CourseId,
    pub(crate) lessons: Vec<LessonProgress>,
    pub(crate) progress: u8,
    pub(crate) status: ProgressStatus,
    pub(crate) total_lessons: u32,
    pub(crate) completed_lessons: u32,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) last_accessed: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) version: u64,
}

impl CourseProgress {
    /// A new, empty record as created on first access.
    #[must_use]
    pub fn new(
        user_id: UserId,
        course_id: CourseId,
        total_lessons: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            course_id,
            lessons: Vec::new(),
            progress: 0,
            status: ProgressStatus::NotStarted,
            total_lessons,
            completed_lessons: 0,
            started_at: now,
            last_accessed: now,
            completed_at: None,
            version: 0,
        }
    }

    /// Rehydrate a record from storage.
    ///
    /// `completed_lessons` is always recomputed from the entries; the stored
    /// aggregate must still agree with the status rule.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidPersistedState` for duplicate lesson entries,
    /// an out-of-range percent, or a status that disagrees with the percent.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        user_id: UserId,
        course_id: CourseId,
        lessons: Vec<LessonProgress>,
        progress: u8,
        status: ProgressStatus,
        total_lessons: u32,
        started_at: DateTime<Utc>,
        last_accessed: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        version: u64,
    ) -> Result<Self, ProgressError> {
        if progress > 100 {
            return Err(ProgressError::InvalidPersistedState(format!(
                "course progress {progress} exceeds 100"
            )));
        }
        if status != calculator::status_for(progress, total_lessons) {
            return Err(ProgressError::InvalidPersistedState(format!(
                "status {status} does not match progress {progress}"
            )));
        }
        let mut seen = HashSet::with_capacity(lessons.len());
        for entry in &lessons {
            if !seen.insert(entry.lesson_id()) {
                return Err(ProgressError::InvalidPersistedState(format!(
                    "duplicate lesson entry {}",
                    entry.lesson_id()
                )));
            }
        }
        let completed_lessons = calculator::count_completed(&lessons);

        Ok(Self {
            user_id,
            course_id,
            lessons,
            progress,
            status,
            total_lessons,
            completed_lessons,
            started_at,
            last_accessed,
            completed_at,
            version,
        })
    }

    //
    // ─── MUTATIONS ─────────────────────────────────────────────────────────────
    //

    /// Record a viewing percent for a lesson, appending the entry if needed.
    ///
    /// `live_total` is a fresh catalog read, or `None` to keep the cached count.
    pub fn update_lesson_progress(
        &mut self,
        lesson_id: LessonId,
        percent: LessonPercent,
        live_total: Option<u32>,
        now: DateTime<Utc>,
    ) {
        self.entry_mut(lesson_id, now).apply_percent(percent, now);
        self.touch(now);
        calculator::recalculate(self, live_total, now);
    }

    /// Mark a lesson completed at 100%. Returns `false` if it already was.
    pub fn complete_lesson(
        &mut self,
        lesson_id: LessonId,
        live_total: Option<u32>,
        now: DateTime<Utc>,
    ) -> bool {
        let changed = self.entry_mut(lesson_id, now).complete(now);
        self.touch(now);
        calculator::recalculate(self, live_total, now);
        changed
    }

    /// Add watched seconds to a lesson.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::TimeSpentOverflow` if the counter would overflow; the
    /// record is left untouched in that case.
    pub fn record_time_spent(
        &mut self,
        lesson_id: LessonId,
        secs: u64,
        live_total: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<(), ProgressError> {
        let current = self.entry(lesson_id).map_or(0, LessonProgress::time_spent_secs);
        checked_time_spent(current, secs)?;
        self.entry_mut(lesson_id, now).add_time_spent(secs, now)?;
        self.touch(now);
        calculator::recalculate(self, live_total, now);
        Ok(())
    }

    /// Set or clear free-text notes on a lesson.
    pub fn set_lesson_notes(
        &mut self,
        lesson_id: LessonId,
        notes: Option<String>,
        live_total: Option<u32>,
        now: DateTime<Utc>,
    ) {
        self.entry_mut(lesson_id, now).set_notes(notes, now);
        self.touch(now);
        calculator::recalculate(self, live_total, now);
    }

    fn entry_mut(&mut self, lesson_id: LessonId, now: DateTime<Utc>) -> &mut LessonProgress {
        let idx = match self.lessons.iter().position(|e| e.lesson_id() == lesson_id) {
            Some(idx) => idx,
            None => {
                self.lessons.push(LessonProgress::new(lesson_id, now));
                self.lessons.len() - 1
            }
        };
        &mut self.lessons[idx]
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_accessed {
            self.last_accessed = now;
        }
    }

    //
    // ─── ACCESSORS ─────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    /// Lesson entries in insertion order.
    #[must_use]
    pub fn lessons(&self) -> &[LessonProgress] {
        &self.lessons
    }

    #[must_use]
    pub fn entry(&self, lesson_id: LessonId) -> Option<&LessonProgress> {
        self.lessons.iter().find(|e| e.lesson_id() == lesson_id)
    }

    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    #[must_use]
    pub fn status(&self) -> ProgressStatus {
        self.status
    }

    #[must_use]
    pub fn total_lessons(&self) -> u32 {
        self.total_lessons
    }

    #[must_use]
    pub fn completed_lessons(&self) -> u32 {
        self.completed_lessons
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn last_accessed(&self) -> DateTime<Utc> {
        self.last_accessed
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Optimistic concurrency token assigned by the store.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Copy of this record stamped with the version a store just wrote.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Total seconds spent across all lesson entries.
    #[must_use]
    pub fn time_spent_secs(&self) -> u64 {
        self.lessons
            .iter()
            .fold(0_u64, |acc, e| acc.saturating_add(e.time_spent_secs()))
    }

    #[must_use]
    pub fn summary(&self) -> ProgressSummary {
        ProgressSummary {
            course_id: self.course_id,
            progress: self.progress,
            completed_lessons: self.completed_lessons,
            total_lessons: self.total_lessons,
            status: self.status,
            started_at: Some(self.started_at),
            last_accessed: Some(self.last_accessed),
            time_spent_secs: self.time_spent_secs(),
        }
    }
}

/// Read-only view returned to callers of `getCourseProgress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub course_id: CourseId,
    pub progress: u8,
    pub completed_lessons: u32,
    pub total_lessons: u32,
    pub status: ProgressStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub time_spent_secs: u64,
}

impl ProgressSummary {
    /// Summary for a learner with no record yet.
    #[must_use]
    pub fn empty(course_id: CourseId, total_lessons: u32) -> Self {
        Self {
            course_id,
            progress: 0,
            completed_lessons: 0,
            total_lessons,
            status: ProgressStatus::NotStarted,
            started_at: None,
            last_accessed: None,
            time_spent_secs: 0,
        }
    }
}
