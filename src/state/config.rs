use serde::Deserialize;

/// World store configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Capacity of the change broadcast channel
    #[serde(default = "default_change_channel_capacity")]
    pub change_channel_capacity: usize,

    /// Ended incidents remembered to reject late starts (oldest evicted first)
    #[serde(default = "default_tombstone_capacity")]
    pub tombstone_capacity: usize,

    /// Drop all entities when the transport reconnects after a gap
    #[serde(default)]
    pub clear_on_resync: bool,

    /// Expire units/signals not refreshed for this many seconds (off when unset)
    #[serde(default)]
    pub stale_after_secs: Option<u64>,

    /// How often the expiry sweep runs
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_change_channel_capacity() -> usize {
    1000
}

fn default_tombstone_capacity() -> usize {
    1024
}

fn default_sweep_interval() -> u64 {
    5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            change_channel_capacity: default_change_channel_capacity(),
            tombstone_capacity: default_tombstone_capacity(),
            clear_on_resync: false,
            stale_after_secs: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}
