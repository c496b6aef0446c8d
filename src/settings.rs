#![deny(missing_docs)]

use std::time::Duration;
use structopt::StructOpt;

/// Settings consumed by the membership core.
#[derive(StructOpt, Debug, Clone)]
pub struct GossipSettings {
    /// Milliseconds after which a live member without a heartbeat update is declared dead.
    #[structopt(long = "cleanup-interval", default_value = "10000")]
    pub cleanup_interval: u64,

    /// Milliseconds between two gossip rounds of the active side.
    ///
    /// Must be significantly smaller than `cleanup_interval`, otherwise healthy members time out.
    #[structopt(long = "gossip-interval", default_value = "1000")]
    pub gossip_interval: u64,

    /// Resolution of the timeout timer in milliseconds.
    #[structopt(long = "timer-tick", default_value = "100")]
    pub timer_tick: u64,
}

impl GossipSettings {
    /// Cleanup interval as a duration.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval)
    }

    /// Gossip interval as a duration.
    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval)
    }

    /// Timer resolution as a duration.
    pub fn timer_tick(&self) -> Duration {
        Duration::from_millis(self.timer_tick.max(1))
    }
}

impl Default for GossipSettings {
    fn default() -> Self {
        Self {
            cleanup_interval: 10_000,
            gossip_interval: 1_000,
            timer_tick: 100,
        }
    }
}
