use thiserror::Error;

/// Errors raised by progress mutations and by rehydrating persisted progress.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    /// The percent was non-numeric, non-finite, or outside `[0, 100]`.
    #[error("invalid progress value: {raw}")]
    InvalidProgressValue { raw: String },

    #[error("time spent would overflow")]
    TimeSpentOverflow,

    #[error("invalid persisted progress state: {0}")]
    InvalidPersistedState(String),
}
