use std::sync::Arc;

use progress_core::model::CourseId;
use progress_core::stats::{CourseStats, CourseStatsBuilder};
use storage::repository::ProgressRepository;
use tracing::debug;

use crate::config::ProgressConfig;
use crate::error::ProgressServiceError;

/// Read-only course statistics over every learner's record.
#[derive(Clone)]
pub struct CourseStatsService {
    batch_size: u32,
    progress: Arc<dyn ProgressRepository>,
}

impl CourseStatsService {
    #[must_use]
    pub fn new(progress: Arc<dyn ProgressRepository>) -> Self {
        Self {
            batch_size: ProgressConfig::default().stats_batch_size,
            progress,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: &ProgressConfig) -> Self {
        self.batch_size = config.stats_batch_size.max(1);
        self
    }

    /// Aggregate a course's records page by page. A course nobody has started
    /// yields all-zero stats.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if a page cannot be read.
    pub async fn get_course_stats(
        &self,
        course_id: CourseId,
    ) -> Result<CourseStats, ProgressServiceError> {
        let mut builder = CourseStatsBuilder::new();
        let mut after = None;
        let mut pages = 0_u32;

        loop {
            let page = self
                .progress
                .list_course_page(course_id, after, self.batch_size)
                .await?;
            let Some(last) = page.last() else { break };
            after = Some(last.user_id());
            pages += 1;
            builder.extend(&page);
            if page.len() < usize::try_from(self.batch_size).unwrap_or(usize::MAX) {
                break;
            }
        }

        debug!(course = %course_id, pages, students = builder.students(), "course stats scanned");
        Ok(builder.finish(course_id))
    }
}
