//! Commit cooldown with optional jitter.
//!
//! Jitter spreads deferred commits from many workers so they do not all
//! hit the search engine at the same moment.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use reindex_types::CommitSettings;

/// Delay applied before a deferred or failed commit runs again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CooldownPolicy {
    pub cooldown_secs: u64,
    /// Maximum extra random delay (0 = none)
    pub max_jitter_secs: u64,
}

impl CooldownPolicy {
    pub fn new(cooldown_secs: u64) -> Self {
        Self {
            cooldown_secs,
            max_jitter_secs: 0,
        }
    }

    pub fn with_jitter(mut self, max_jitter_secs: u64) -> Self {
        self.max_jitter_secs = max_jitter_secs;
        self
    }

    /// No delay at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Cooldown plus a random jitter in `0..max_jitter_secs`.
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs) + self.generate_jitter()
    }

    pub fn generate_jitter(&self) -> Duration {
        if self.max_jitter_secs == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..self.max_jitter_secs * 1000);
        Duration::from_millis(jitter_ms)
    }
}

impl From<&CommitSettings> for CooldownPolicy {
    fn from(settings: &CommitSettings) -> Self {
        CooldownPolicy::new(settings.cooldown_secs).with_jitter(settings.cooldown_jitter_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_jitter_is_exact() {
        let policy = CooldownPolicy::new(300);
        assert_eq!(policy.delay(), Duration::from_secs(300));
        assert_eq!(CooldownPolicy::none().delay(), Duration::ZERO);
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = CooldownPolicy::new(10).with_jitter(5);
        for _ in 0..100 {
            let delay = policy.delay();
            assert!(delay >= Duration::from_secs(10));
            assert!(delay < Duration::from_secs(15));
        }
    }

    #[test]
    fn test_from_settings() {
        let settings = CommitSettings {
            cooldown_secs: 60,
            cooldown_jitter_secs: 3,
        };
        let policy = CooldownPolicy::from(&settings);
        assert_eq!(policy.cooldown_secs, 60);
        assert_eq!(policy.max_jitter_secs, 3);
    }
}
