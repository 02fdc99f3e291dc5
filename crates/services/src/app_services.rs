use std::sync::Arc;

use storage::repository::Storage;
use storage::sqlite::SqliteRepository;

use crate::Clock;
use crate::config::ProgressConfig;
use crate::error::AppServicesError;
use crate::progress_service::ProgressService;
use crate::stats_service::CourseStatsService;

/// Assembles the progress and statistics services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    progress: Arc<ProgressService>,
    stats: Arc<CourseStatsService>,
}

impl AppServices {
    /// Build services over a connected `SQLite` repository, migrating it first.
    ///
    /// The services reuse the repository's pool, so callers can keep using
    /// `repo` (for example to seed the lesson catalog) without a second pool.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the schema cannot be migrated.
    pub async fn new_sqlite(
        repo: &SqliteRepository,
        clock: Clock,
        config: ProgressConfig,
    ) -> Result<Self, AppServicesError> {
        repo.migrate().await?;
        Ok(Self::from_storage(&Storage::from_sqlite(repo), clock, config))
    }

    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock, config: ProgressConfig) -> Self {
        let stats = Arc::new(
            CourseStatsService::new(Arc::clone(&storage.progress)).with_config(&config),
        );
        let progress = Arc::new(
            ProgressService::new(
                clock,
                Arc::clone(&storage.progress),
                Arc::clone(&storage.catalog),
            )
            .with_config(config),
        );
        Self { progress, stats }
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn stats(&self) -> Arc<CourseStatsService> {
        Arc::clone(&self.stats)
    }
}
