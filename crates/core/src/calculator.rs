//! Course-level aggregate derived from lesson entries.

use chrono::{DateTime, Utc};

use crate::model::{CourseProgress, LessonProgress, ProgressStatus};

/// Status implied by a course percent.
///
/// A course with no lessons is never in progress, whatever entries it holds.
#[must_use]
pub fn status_for(progress: u8, total_lessons: u32) -> ProgressStatus {
    if total_lessons == 0 {
        return ProgressStatus::NotStarted;
    }
    match progress {
        0 => ProgressStatus::NotStarted,
        100.. => ProgressStatus::Completed,
        _ => ProgressStatus::InProgress,
    }
}

/// `round(completed / total * 100)`, clamped to 100 when the catalog shrank
/// below the number of completed entries.
#[must_use]
pub fn course_percent(completed: u32, total_lessons: u32) -> u8 {
    if total_lessons == 0 {
        return 0;
    }
    let total = u64::from(total_lessons);
    let scaled = (u64::from(completed) * 200 + total) / (2 * total);
    u8::try_from(scaled.min(100)).unwrap_or(100)
}

/// Number of completed lesson entries.
#[must_use]
pub fn count_completed(lessons: &[LessonProgress]) -> u32 {
    let n = lessons.iter().filter(|e| e.status().is_completed()).count();
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Recompute `progress`, `status` and `completed_lessons` for a record.
///
/// `live_total` is the catalog's current lesson count; when it differs from the
/// cached `total_lessons` the cache is refreshed first. Returns the new percent.
pub fn recalculate(
    record: &mut CourseProgress,
    live_total: Option<u32>,
    now: DateTime<Utc>,
) -> u8 {
    if let Some(total) = live_total {
        record.total_lessons = total;
    }

    record.completed_lessons = count_completed(&record.lessons);
    record.progress = course_percent(record.completed_lessons, record.total_lessons);
    record.status = status_for(record.progress, record.total_lessons);

    if record.status.is_completed() && record.completed_at.is_none() {
        record.completed_at = Some(now);
    }

    record.progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CourseId, LessonId, UserId};
    use crate::time::fixed_now;

    #[test]
    fn percent_rounds_half_up() {
        assert_eq!(course_percent(1, 3), 33);
        assert_eq!(course_percent(2, 3), 67);
        assert_eq!(course_percent(1, 8), 13);
        assert_eq!(course_percent(1, 200), 1);
        assert_eq!(course_percent(1, 201), 0);
        assert_eq!(course_percent(4, 4), 100);
    }

    #[test]
    fn percent_clamps_when_catalog_shrinks() {
        assert_eq!(course_percent(6, 4), 100);
    }

    #[test]
    fn status_rule_is_total() {
        assert_eq!(status_for(0, 4), ProgressStatus::NotStarted);
        assert_eq!(status_for(1, 4), ProgressStatus::InProgress);
        assert_eq!(status_for(99, 4), ProgressStatus::InProgress);
        assert_eq!(status_for(100, 4), ProgressStatus::Completed);
        assert_eq!(status_for(100, 0), ProgressStatus::NotStarted);
    }

    #[test]
    fn zero_lesson_course_ignores_entries() {
        let now = fixed_now();
        let mut rec = CourseProgress::new(UserId::new(1), CourseId::new(1), 0, now);
        rec.complete_lesson(LessonId::new(1), None, now);
        rec.complete_lesson(LessonId::new(2), None, now);

        assert_eq!(rec.progress(), 0);
        assert_eq!(rec.status(), ProgressStatus::NotStarted);
        assert_eq!(rec.completed_lessons(), 2);
        assert_eq!(rec.completed_at(), None);
    }

    #[test]
    fn stale_total_is_refreshed() {
        let now = fixed_now();
        let mut rec = CourseProgress::new(UserId::new(1), CourseId::new(1), 2, now);
        rec.complete_lesson(LessonId::new(1), None, now);
        assert_eq!(rec.progress(), 50);

        let pct = recalculate(&mut rec, Some(4), now);
        assert_eq!(pct, 25);
        assert_eq!(rec.total_lessons(), 4);
    }

    #[test]
    fn completed_at_survives_course_growth() {
        let now = fixed_now();
        let mut rec = CourseProgress::new(UserId::new(1), CourseId::new(1), 1, now);
        rec.complete_lesson(LessonId::new(1), None, now);
        assert_eq!(rec.status(), ProgressStatus::Completed);

        recalculate(&mut rec, Some(2), now);
        assert_eq!(rec.status(), ProgressStatus::InProgress);
        assert_eq!(rec.completed_at(), Some(now));
    }
}
