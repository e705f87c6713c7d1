use crate::config::SchedulerConfig;
use rand::Rng;
use std::time::Duration;

/// Receipt delay: a fixed `min_delay` plus uniform jitter of up to `delta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayPolicy {
    pub min_delay: Duration,
    pub delta: Duration,
}

impl DelayPolicy {
    pub fn new(min_delay: Duration, delta: Duration) -> Self {
        DelayPolicy { min_delay, delta }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.min_delay, config.delta)
    }

    pub fn next_delay(&self) -> Duration {
        self.min_delay + random_up_to(self.delta)
    }
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/// Uniform in `0..=max`, at millisecond resolution.
pub fn random_up_to(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_stays_within_bounds() {
        let policy = DelayPolicy::new(Duration::from_millis(100), Duration::from_millis(50));
        for _ in 0..200 {
            let delay = policy.next_delay();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn zero_delta_is_exact() {
        let policy = DelayPolicy::new(Duration::from_millis(100), Duration::ZERO);
        assert_eq!(policy.next_delay(), Duration::from_millis(100));
        assert_eq!(random_up_to(Duration::ZERO), Duration::ZERO);
    }
}
