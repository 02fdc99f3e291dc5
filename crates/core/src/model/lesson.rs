use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProgressError;
use crate::model::ids::LessonId;

/// Percent at or above which a partially viewed lesson counts as completed.
pub const COMPLETION_THRESHOLD: u8 = 90;

/// Largest per-lesson watch time; persisted as a signed 64-bit integer.
pub const MAX_TIME_SPENT_SECS: u64 = i64::MAX.unsigned_abs();

/// Sum of two watch times, rejected past `MAX_TIME_SPENT_SECS`.
pub(crate) fn checked_time_spent(current: u64, secs: u64) -> Result<u64, ProgressError> {
    current
        .checked_add(secs)
        .filter(|total| *total <= MAX_TIME_SPENT_SECS)
        .ok_or(ProgressError::TimeSpentOverflow)
}

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Lifecycle status shared by lesson entries and course aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

impl ProgressStatus {
    /// Storage and wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "not_started",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
        }
    }

    #[must_use]
    pub fn is_completed(self) -> bool {
        matches!(self, ProgressStatus::Completed)
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgressStatus {
    type Err = ProgressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(ProgressError::InvalidPersistedState(format!(
                "unknown status: {other}"
            ))),
        }
    }
}

//
// ─── PERCENT ───────────────────────────────────────────────────────────────────
//

/// A lesson progress percent validated to lie within `[0, 100]`.
///
/// Fractional input is rounded to the nearest whole percent after the range
/// check, so `99.6` becomes `100` but `100.4` is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LessonPercent(u8);

impl LessonPercent {
    pub const FULL: Self = Self(100);

    /// Validate a numeric percent.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidProgressValue` for NaN, infinities, or values
    /// outside `[0, 100]`.
    pub fn new(value: f64) -> Result<Self, ProgressError> {
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(ProgressError::InvalidProgressValue {
                raw: value.to_string(),
            });
        }
        // Range checked above, so the rounded value fits in u8.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let rounded = value.round() as u8;
        Ok(Self(rounded))
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    /// Whether this percent crosses the implicit completion threshold.
    #[must_use]
    pub fn reaches_completion(self) -> bool {
        self.0 >= COMPLETION_THRESHOLD
    }
}

impl TryFrom<f64> for LessonPercent {
    type Error = ProgressError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<i64> for LessonPercent {
    type Error = ProgressError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .filter(|v| *v <= 100)
            .map(Self)
            .ok_or_else(|| ProgressError::InvalidProgressValue {
                raw: value.to_string(),
            })
    }
}

impl FromStr for LessonPercent {
    type Err = ProgressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed: f64 = s
            .trim()
            .parse()
            .map_err(|_| ProgressError::InvalidProgressValue { raw: s.to_owned() })?;
        Self::new(parsed)
    }
}

//
// ─── LESSON ENTRY ──────────────────────────────────────────────────────────────
//

/// Per-lesson progress held inside a `CourseProgress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LessonProgress {
    lesson_id: LessonId,
    status: ProgressStatus,
    progress: u8,
    time_spent_secs: u64,
    last_accessed: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    notes: Option<String>,
}

impl LessonProgress {
    /// A fresh entry with no progress.
    #[must_use]
    pub fn new(lesson_id: LessonId, now: DateTime<Utc>) -> Self {
        Self {
            lesson_id,
            status: ProgressStatus::NotStarted,
            progress: 0,
            time_spent_secs: 0,
            last_accessed: now,
            completed_at: None,
            notes: None,
        }
    }

    /// Rehydrate an entry from storage.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidPersistedState` if the percent is out of range
    /// or a completed entry has no completion timestamp.
    pub fn from_persisted(
        lesson_id: LessonId,
        status: ProgressStatus,
        progress: u8,
        time_spent_secs: u64,
        last_accessed: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) -> Result<Self, ProgressError> {
        if progress > 100 {
            return Err(ProgressError::InvalidPersistedState(format!(
                "lesson {lesson_id} progress {progress} exceeds 100"
            )));
        }
        if status.is_completed() && completed_at.is_none() {
            return Err(ProgressError::InvalidPersistedState(format!(
                "lesson {lesson_id} is completed without completed_at"
            )));
        }
        Ok(Self {
            lesson_id,
            status,
            progress,
            time_spent_secs,
            last_accessed,
            completed_at,
            notes,
        })
    }

    /// Apply a viewing percent.
    ///
    /// Completion is sticky: a lower percent after completion updates `progress`
    /// but never reverts the status, and `completed_at` is only set once.
    pub(crate) fn apply_percent(&mut self, percent: LessonPercent, now: DateTime<Utc>) {
        self.progress = percent.value();
        self.last_accessed = now;
        if self.status.is_completed() {
            return;
        }
        if percent.reaches_completion() {
            self.mark_completed(now);
        } else {
            self.status = ProgressStatus::InProgress;
        }
    }

    /// Explicit completion. Returns `false` if the entry was already completed.
    pub(crate) fn complete(&mut self, now: DateTime<Utc>) -> bool {
        self.last_accessed = now;
        if self.status.is_completed() {
            return false;
        }
        self.progress = 100;
        self.mark_completed(now);
        true
    }

    pub(crate) fn add_time_spent(
        &mut self,
        secs: u64,
        now: DateTime<Utc>,
    ) -> Result<(), ProgressError> {
        self.time_spent_secs = checked_time_spent(self.time_spent_secs, secs)?;
        self.last_accessed = now;
        if self.status == ProgressStatus::NotStarted {
            self.status = ProgressStatus::InProgress;
        }
        Ok(())
    }

    pub(crate) fn set_notes(&mut self, notes: Option<String>, now: DateTime<Utc>) {
        self.notes = notes.filter(|n| !n.trim().is_empty());
        self.last_accessed = now;
    }

    fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = ProgressStatus::Completed;
        if self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
    }

    #[must_use]
    pub fn lesson_id(&self) -> LessonId {
        self.lesson_id
    }

    #[must_use]
    pub fn status(&self) -> ProgressStatus {
        self.status
    }

    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    #[must_use]
    pub fn time_spent_secs(&self) -> u64 {
        self.time_spent_secs
    }

    #[must_use]
    pub fn last_accessed(&self) -> DateTime<Utc> {
        self.last_accessed
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    #[test]
    fn percent_rejects_out_of_range_and_nan() {
        assert!(LessonPercent::new(-0.1).is_err());
        assert!(LessonPercent::new(100.5).is_err());
        assert!(LessonPercent::new(f64::NAN).is_err());
        assert!(LessonPercent::new(f64::INFINITY).is_err());
        assert!(LessonPercent::try_from(101_i64).is_err());
        assert!(LessonPercent::try_from(-1_i64).is_err());
    }

    #[test]
    fn percent_parses_numbers_and_rounds() {
        assert_eq!("42".parse::<LessonPercent>().unwrap().value(), 42);
        assert_eq!(LessonPercent::new(89.6).unwrap().value(), 90);
        let err = "lots".parse::<LessonPercent>().unwrap_err();
        assert_eq!(
            err,
            ProgressError::InvalidProgressValue {
                raw: "lots".into()
            }
        );
    }

    #[test]
    fn threshold_marks_entry_completed_once() {
        let now = fixed_now();
        let mut entry = LessonProgress::new(LessonId::new(1), now);

        entry.apply_percent(LessonPercent::new(50.0).unwrap(), now);
        assert_eq!(entry.status(), ProgressStatus::InProgress);
        assert_eq!(entry.completed_at(), None);

        entry.apply_percent(LessonPercent::new(92.0).unwrap(), now);
        assert_eq!(entry.status(), ProgressStatus::Completed);
        assert_eq!(entry.completed_at(), Some(now));

        let later = now + Duration::minutes(5);
        entry.apply_percent(LessonPercent::new(95.0).unwrap(), later);
        assert_eq!(entry.completed_at(), Some(now));
    }

    #[test]
    fn lower_percent_after_completion_keeps_status() {
        let now = fixed_now();
        let mut entry = LessonProgress::new(LessonId::new(1), now);
        entry.apply_percent(LessonPercent::FULL, now);
        entry.apply_percent(LessonPercent::new(10.0).unwrap(), now);

        assert_eq!(entry.status(), ProgressStatus::Completed);
        assert_eq!(entry.progress(), 10);
    }

    #[test]
    fn complete_is_idempotent() {
        let now = fixed_now();
        let mut entry = LessonProgress::new(LessonId::new(3), now);
        assert!(entry.complete(now));
        assert!(!entry.complete(now + Duration::hours(1)));
        assert_eq!(entry.completed_at(), Some(now));
        assert_eq!(entry.progress(), 100);
    }

    #[test]
    fn blank_notes_are_cleared() {
        let now = fixed_now();
        let mut entry = LessonProgress::new(LessonId::new(3), now);
        entry.set_notes(Some("recap chapter 2".into()), now);
        assert_eq!(entry.notes(), Some("recap chapter 2"));
        entry.set_notes(Some("   ".into()), now);
        assert_eq!(entry.notes(), None);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ProgressStatus::NotStarted,
            ProgressStatus::InProgress,
            ProgressStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<ProgressStatus>().unwrap(), status);
        }
        assert!("paused".parse::<ProgressStatus>().is_err());
    }
}
