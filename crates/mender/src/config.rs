//! Engine configuration.
//!
//! Durations are serialized as whole milliseconds so configuration files stay
//! readable (`session_timeout: 10000`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::result::{HealError, HealResult};

/// Configuration for the healing engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    /// Master switch
    pub enabled: bool,
    /// Transient-retry limit per session and cool-down threshold
    pub max_attempts_per_locator: u32,
    /// Session acquisition timeout
    #[serde(with = "duration_ms")]
    pub session_timeout: Duration,
    /// Deadline for each healing phase
    #[serde(with = "duration_ms")]
    pub healing_timeout: Duration,
    /// Deadline for one candidate evaluation
    #[serde(with = "duration_ms")]
    pub evaluation_timeout: Duration,
    /// Maximum number of live browser sessions
    pub max_concurrent_sessions: usize,
    /// Minimum confidence for a validated candidate to be applied
    pub confidence_threshold: f64,
    /// Candidate cap
    pub max_alternatives: usize,
    /// Minimum similarity when re-identifying the element in the live DOM
    pub min_fingerprint_score: f64,
    /// How long a locator stays disabled after repeated failures
    #[serde(with = "duration_ms")]
    pub cooldown: Duration,
    /// First retry delay
    #[serde(with = "duration_ms")]
    pub backoff_base: Duration,
    /// Retry delay ceiling
    #[serde(with = "duration_ms")]
    pub backoff_max: Duration,
    /// Idle sessions older than this are torn down
    #[serde(with = "duration_ms")]
    pub session_idle_ttl: Duration,
    /// Evaluations before a session is recycled
    pub max_session_uses: u32,
    /// Live DOM node count that forces recycling
    pub max_open_handles: u64,
    /// Heap threshold (bytes) that forces recycling
    pub max_heap_bytes: u64,
    /// Allowed distance between bounding-box centres, in pixels
    pub position_tolerance_px: f32,
    /// Runs whose reports and session statuses are kept; older runs are evicted
    pub max_retained_runs: usize,
    /// Backup directory (next to the script when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
    /// Fingerprint directory (in-memory only when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint_dir: Option<PathBuf>,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts_per_locator: 3,
            session_timeout: Duration::from_secs(10),
            healing_timeout: Duration::from_secs(60),
            evaluation_timeout: Duration::from_secs(5),
            max_concurrent_sessions: 3,
            confidence_threshold: 0.3,
            max_alternatives: 8,
            min_fingerprint_score: 0.45,
            cooldown: Duration::from_secs(15 * 60),
            backoff_base: Duration::from_millis(250),
            backoff_max: Duration::from_secs(4),
            session_idle_ttl: Duration::from_secs(5 * 60),
            max_session_uses: 50,
            max_open_handles: 25_000,
            max_heap_bytes: 512 * 1024 * 1024,
            position_tolerance_px: 24.0,
            max_retained_runs: 256,
            backup_dir: None,
            fingerprint_dir: None,
        }
    }
}

impl HealingConfig {
    /// Create config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a YAML or JSON file, chosen by extension
    pub fn from_file(path: impl AsRef<Path>) -> HealResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text)?,
            Some("yaml" | "yml") | None => serde_yaml_ng::from_str(&text)?,
            Some(other) => {
                return Err(HealError::config(format!(
                    "unsupported config format `.{other}` (expected .yaml, .yml or .json)"
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> HealResult<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> HealResult<()> {
        if self.max_attempts_per_locator == 0 {
            return Err(HealError::config("max_attempts_per_locator must be at least 1"));
        }
        if self.max_concurrent_sessions == 0 {
            return Err(HealError::config("max_concurrent_sessions must be at least 1"));
        }
        if self.max_alternatives == 0 {
            return Err(HealError::config("max_alternatives must be at least 1"));
        }
        if self.max_retained_runs == 0 {
            return Err(HealError::config("max_retained_runs must be at least 1"));
        }
        if self.max_session_uses == 0 {
            return Err(HealError::config("max_session_uses must be at least 1"));
        }
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("min_fingerprint_score", self.min_fingerprint_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(HealError::config(format!("{name} must be within [0, 1], got {value}")));
            }
        }
        for (name, value) in [
            ("session_timeout", self.session_timeout),
            ("healing_timeout", self.healing_timeout),
            ("evaluation_timeout", self.evaluation_timeout),
        ] {
            if value.is_zero() {
                return Err(HealError::config(format!("{name} must be greater than zero")));
            }
        }
        if self.backoff_base > self.backoff_max {
            return Err(HealError::config("backoff_base must not exceed backoff_max"));
        }
        if self.position_tolerance_px < 0.0 {
            return Err(HealError::config("position_tolerance_px must not be negative"));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }

    /// Enable or disable healing
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the per-locator attempt limit
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts_per_locator = attempts;
        self
    }

    /// Set the session acquisition timeout
    #[must_use]
    pub const fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the per-phase deadline
    #[must_use]
    pub const fn with_healing_timeout(mut self, timeout: Duration) -> Self {
        self.healing_timeout = timeout;
        self
    }

    /// Set the per-candidate deadline
    #[must_use]
    pub const fn with_evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.evaluation_timeout = timeout;
        self
    }

    /// Set the pool bound
    #[must_use]
    pub const fn with_max_sessions(mut self, sessions: usize) -> Self {
        self.max_concurrent_sessions = sessions;
        self
    }

    /// Set the confidence threshold
    #[must_use]
    pub const fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Set the candidate cap
    #[must_use]
    pub const fn with_max_alternatives(mut self, max: usize) -> Self {
        self.max_alternatives = max;
        self
    }

    /// Set the cool-down duration
    #[must_use]
    pub const fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Set the retry backoff bounds
    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    /// Set the idle TTL for pooled sessions
    #[must_use]
    pub const fn with_session_idle_ttl(mut self, ttl: Duration) -> Self {
        self.session_idle_ttl = ttl;
        self
    }

    /// Set the evaluation count after which a session is recycled
    #[must_use]
    pub const fn with_max_session_uses(mut self, uses: u32) -> Self {
        self.max_session_uses = uses;
        self
    }

    /// Set the resource thresholds that force recycling
    #[must_use]
    pub const fn with_resource_limits(mut self, open_handles: u64, heap_bytes: u64) -> Self {
        self.max_open_handles = open_handles;
        self.max_heap_bytes = heap_bytes;
        self
    }

    /// Set how many runs keep their reports
    #[must_use]
    pub const fn with_max_retained_runs(mut self, runs: usize) -> Self {
        self.max_retained_runs = runs;
        self
    }

    /// Set the backup directory
    #[must_use]
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// Set the fingerprint directory
    #[must_use]
    pub fn with_fingerprint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fingerprint_dir = Some(dir.into());
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
