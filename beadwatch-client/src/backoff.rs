use std::time::Duration;

use beadwatch_config::ClientConfig;

/// Bounded exponential delay between reconnection attempts. Retries never
/// stop; only the spacing grows, doubling from `floor` up to `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub floor: Duration,
    pub ceiling: Duration,
}

impl ReconnectPolicy {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling: ceiling.max(floor),
        }
    }

    /// Delay before the next attempt after `failures` consecutive failed
    /// attempts. Zero and one failures both wait `floor`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.floor
            .checked_mul(1u32 << exponent)
            .map_or(self.ceiling, |delay| delay.min(self.ceiling))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1_000), Duration::from_millis(5_000))
    }
}

impl From<&ClientConfig> for ReconnectPolicy {
    fn from(cfg: &ClientConfig) -> Self {
        Self::new(cfg.reconnect_floor(), cfg.reconnect_ceiling())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_then_caps() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u128> = (0..6)
            .map(|n| policy.delay_for(n).as_millis())
            .collect();
        assert_eq!(delays, vec![1_000, 1_000, 2_000, 4_000, 5_000, 5_000]);
    }

    #[test]
    fn huge_failure_counts_stay_at_ceiling() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(5_000));
    }

    #[test]
    fn ceiling_never_below_floor() {
        let policy =
            ReconnectPolicy::new(Duration::from_secs(3), Duration::from_secs(1));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
    }
}
