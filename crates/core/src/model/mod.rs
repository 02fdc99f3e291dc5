mod course_progress;
mod ids;
mod lesson;

pub use course_progress::{CourseProgress, ProgressSummary};
pub use ids::{CourseId, LessonId, ParseIdError, UserId};
pub use lesson::{
    COMPLETION_THRESHOLD, LessonPercent, LessonProgress, MAX_TIME_SPENT_SECS, ProgressStatus,
};
