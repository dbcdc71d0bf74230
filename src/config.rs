use std::time::Duration;

/// Tunables for the carpool engine and its background sweep.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Extra attempts for a store read that failed with a transient error.
    pub read_retries: u32,
    /// Delay before the first read retry; doubles on each further attempt.
    pub retry_backoff: Duration,
    /// How often the waiting-list sweep runs.
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_retries: 3,
            retry_backoff: Duration::from_millis(25),
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}
