use std::env;
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(10);
const DEFAULT_STATS_BATCH_SIZE: u32 = 500;

/// Tuning knobs for the progress engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressConfig {
    /// Attempts per mutation before an optimistic conflict is surfaced.
    pub max_attempts: u32,
    /// Base delay between conflicting attempts; jittered up to twice this.
    pub retry_backoff: Duration,
    /// Records fetched per page while aggregating course statistics.
    pub stats_batch_size: u32,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            stats_batch_size: DEFAULT_STATS_BATCH_SIZE,
        }
    }
}

impl ProgressConfig {
    /// Read overrides from `PROGRESS_MAX_ATTEMPTS`, `PROGRESS_RETRY_BACKOFF_MS`
    /// and `PROGRESS_STATS_BATCH_SIZE`. Missing, unparsable or zero values keep
    /// the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let positive = |key: &str| {
            lookup(key)
                .and_then(|raw| raw.trim().parse::<u32>().ok())
                .filter(|v| *v > 0)
        };
        let defaults = Self::default();
        Self {
            max_attempts: positive("PROGRESS_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            retry_backoff: positive("PROGRESS_RETRY_BACKOFF_MS")
                .map_or(defaults.retry_backoff, |ms| Duration::from_millis(u64::from(ms))),
            stats_batch_size: positive("PROGRESS_STATS_BATCH_SIZE")
                .unwrap_or(defaults.stats_batch_size),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_stats_batch_size(mut self, size: u32) -> Self {
        self.stats_batch_size = size.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lookup_overrides_and_ignores_bad_values() {
        let vars: HashMap<&str, &str> = [
            ("PROGRESS_MAX_ATTEMPTS", "5"),
            ("PROGRESS_RETRY_BACKOFF_MS", "abc"),
            ("PROGRESS_STATS_BATCH_SIZE", "0"),
        ]
        .into_iter()
        .collect();

        let config = ProgressConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_backoff, DEFAULT_RETRY_BACKOFF);
        assert_eq!(config.stats_batch_size, DEFAULT_STATS_BATCH_SIZE);
    }

    #[test]
    fn builders_clamp_to_one() {
        let config = ProgressConfig::default()
            .with_max_attempts(0)
            .with_stats_batch_size(0);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.stats_batch_size, 1);
    }
}
