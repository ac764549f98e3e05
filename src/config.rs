use std::env;
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_BATCH_DELAY_MS: u64 = 100;
pub const DEFAULT_HISTORY_LIMIT: usize = 20;
pub const DEFAULT_RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Rows processed between two yields of the batch loop.
    pub batch_size: usize,
    /// Pause awaited after each full batch.
    pub batch_delay: Duration,
    /// Number of finished jobs kept in the history.
    pub history_limit: usize,
    pub recent_default_limit: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: Duration::from_millis(DEFAULT_BATCH_DELAY_MS),
            history_limit: DEFAULT_HISTORY_LIMIT,
            recent_default_limit: DEFAULT_RECENT_LIMIT,
        }
    }
}

impl UploadConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_usize("UPLOAD_BATCH_SIZE", defaults.batch_size),
            batch_delay: Duration::from_millis(env_u64(
                "UPLOAD_BATCH_DELAY_MS",
                DEFAULT_BATCH_DELAY_MS,
            )),
            history_limit: env_usize("UPLOAD_HISTORY_LIMIT", defaults.history_limit),
            recent_default_limit: defaults.recent_default_limit,
        }
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

// Zero would stall the batch loop or disable the history, so it counts as invalid.
fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
