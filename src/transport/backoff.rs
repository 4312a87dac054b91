use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

/// How the delay grows between retries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

/// Reconnection policy
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before each retry (base delay for exponential backoff)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Retries allowed after a failure before giving up; resets on connect
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub backoff: BackoffKind,

    /// Upper bound for exponential backoff
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Randomize each delay within [delay/2, delay]
    #[serde(default)]
    pub jitter: bool,
}

fn default_interval_ms() -> u64 {
    3000
}

fn default_max_retries() -> u32 {
    5
}

fn default_max_interval_ms() -> u64 {
    30_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_retries: default_max_retries(),
            backoff: BackoffKind::default(),
            max_interval_ms: default_max_interval_ms(),
            jitter: false,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = match self.backoff {
            BackoffKind::Fixed => self.interval_ms,
            BackoffKind::Exponential => {
                let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
                self.interval_ms
                    .saturating_mul(factor)
                    .min(self.max_interval_ms.max(self.interval_ms))
            }
        };

        let millis = if self.jitter && base > 1 {
            rand::thread_rng().gen_range(base / 2..=base)
        } else {
            base
        };

        Duration::from_millis(millis)
    }

    /// True once `attempt` exceeds the retry cap
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_retries
    }
}
