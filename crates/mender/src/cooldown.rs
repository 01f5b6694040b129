//! Per-locator cool-down after repeated healing failures.

use std::fmt;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::warn;

/// Key for per-locator state: `(script_id, locator)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocatorKey {
    /// Script identifier
    pub script_id: String,
    /// Original locator expression
    pub locator: String,
}

impl LocatorKey {
    /// Create a key
    #[must_use]
    pub fn new(script_id: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            script_id: script_id.into(),
            locator: locator.into(),
        }
    }
}

impl fmt::Display for LocatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.script_id, self.locator)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    consecutive_failures: u32,
    until: Option<Instant>,
}

/// Consecutive-failure counters and cool-down deadlines
#[derive(Debug)]
pub struct CooldownList {
    threshold: u32,
    duration: Duration,
    entries: DashMap<LocatorKey, Entry>,
}

impl CooldownList {
    /// Engage cool-down for `duration` after `threshold` consecutive failures
    #[must_use]
    pub fn new(threshold: u32, duration: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            duration,
            entries: DashMap::new(),
        }
    }

    /// Whether the locator is cooling down; an expired cool-down is cleared
    pub fn is_cooling_down(&self, key: &LocatorKey) -> bool {
        self.remaining(key).is_some()
    }

    /// Time left on the cool-down
    pub fn remaining(&self, key: &LocatorKey) -> Option<Duration> {
        let until = self.entries.get(key)?.until?;
        let now = Instant::now();
        if now >= until {
            self.entries.remove(key);
            return None;
        }
        Some(until - now)
    }

    /// Count a failure; returns `true` when this failure engages the cool-down
    pub fn record_failure(&self, key: &LocatorKey) -> bool {
        self.record_failures(key, 1)
    }

    /// Count `count` consecutive failures at once
    ///
    /// Used when a session gives up after exhausting its acquisition
    /// retries: each retry counts towards the threshold.
    pub fn record_failures(&self, key: &LocatorKey, count: u32) -> bool {
        if count == 0 {
            return false;
        }
        let engaged = {
            let mut entry = self.entries.entry(key.clone()).or_default();
            entry.consecutive_failures = entry.consecutive_failures.saturating_add(count);
            if entry.consecutive_failures >= self.threshold && entry.until.is_none() {
                entry.until = Some(Instant::now() + self.duration);
                true
            } else {
                false
            }
        };
        if engaged {
            warn!(locator = %key, cooldown_secs = self.duration.as_secs(), "locator disabled after repeated failures");
        }
        engaged
    }

    /// Reset the counter after a success
    pub fn record_success(&self, key: &LocatorKey) {
        self.entries.remove(key);
    }

    /// Consecutive failures recorded
    pub fn failures(&self, key: &LocatorKey) -> u32 {
        self.entries.get(key).map_or(0, |e| e.consecutive_failures)
    }

    /// Clear one locator
    pub fn clear(&self, key: &LocatorKey) {
        self.entries.remove(key);
    }

    /// Clear everything
    pub fn clear_all(&self) {
        self.entries.clear();
    }
}
