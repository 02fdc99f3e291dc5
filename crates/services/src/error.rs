//! Shared error types for the services crate.

use thiserror::Error;

use progress_core::ProgressError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `ProgressService` and `CourseStatsService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressServiceError {
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Every attempt lost an optimistic-version race.
    #[error("progress update kept conflicting after {attempts} attempts")]
    ConcurrencyConflict { attempts: u32 },
}

impl ProgressServiceError {
    /// Whether a caller may reasonably retry the whole request.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProgressServiceError::ConcurrencyConflict { .. }
                | ProgressServiceError::Storage(StorageError::Connection(_))
        )
    }
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
}
