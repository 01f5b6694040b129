//! Live validation of locator candidates.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::candidate::LocatorCandidate;
use crate::config::HealingConfig;
use crate::element::ElementInfo;
use crate::fingerprint::{ElementFingerprint, FingerprintStore};
use crate::locator::BoundingBox;
use crate::pool::PooledSession;

/// Outcome of evaluating one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Candidate that was evaluated
    pub candidate: LocatorCandidate,
    /// Matches at evaluation time
    pub match_count: usize,
    /// `match_count == 1`
    pub unique: bool,
    /// Whether the unique match is visible
    pub visible: bool,
    /// Whether the match sits where the original element was (`None` if unknown)
    pub position_match: Option<bool>,
    /// Similarity of the match to the fingerprint, when one was supplied
    pub fingerprint_score: Option<f64>,
    /// Derived confidence in `[0, 1]`
    pub confidence: f64,
    /// Query error, if the evaluation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Evaluation time
    pub elapsed_ms: u64,
    /// The matched node, when the match was unique
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<ElementInfo>,
}

impl ValidationResult {
    /// Unique and visible
    #[must_use]
    pub const fn is_acceptable(&self) -> bool {
        self.unique && self.visible
    }
}

/// Confidence for a candidate: tier sets the base, visibility and position scale it
///
/// Strictly zero unless the match is unique.
#[must_use]
pub fn confidence(tier: u8, unique: bool, visible: bool, position_match: Option<bool>) -> f64 {
    if !unique {
        return 0.0;
    }
    let base = match tier {
        0 | 1 => 1.0,
        2 => 0.85,
        3 => 0.7,
        _ => 0.5,
    };
    let visibility = if visible { 1.0 } else { 0.5 };
    let position = match position_match {
        Some(true) => 1.0,
        None => 0.8,
        Some(false) => 0.6,
    };
    base * visibility * position
}

/// Evaluates candidates against pooled browser sessions
#[derive(Debug, Clone)]
pub struct LiveValidator {
    evaluation_timeout: Duration,
    position_tolerance: f32,
}

impl Default for LiveValidator {
    fn default() -> Self {
        Self::from(&HealingConfig::default())
    }
}

impl From<&HealingConfig> for LiveValidator {
    fn from(config: &HealingConfig) -> Self {
        Self::new(config.evaluation_timeout, config.position_tolerance_px)
    }
}

impl LiveValidator {
    /// Create a validator
    #[must_use]
    pub const fn new(evaluation_timeout: Duration, position_tolerance: f32) -> Self {
        Self {
            evaluation_timeout,
            position_tolerance,
        }
    }

    /// Validate a candidate, optionally against the original screen position
    pub async fn validate(
        &self,
        session: &mut PooledSession,
        candidate: &LocatorCandidate,
        expected_position: Option<&BoundingBox>,
    ) -> ValidationResult {
        self.run(session, candidate, expected_position, None).await
    }

    /// Validate a candidate against a fingerprint (position and similarity)
    pub async fn validate_against(
        &self,
        session: &mut PooledSession,
        candidate: &LocatorCandidate,
        fingerprint: &ElementFingerprint,
    ) -> ValidationResult {
        self.run(
            session,
            candidate,
            fingerprint.bounding_box.as_ref(),
            Some(fingerprint),
        )
        .await
    }

    async fn run(
        &self,
        session: &mut PooledSession,
        candidate: &LocatorCandidate,
        expected_position: Option<&BoundingBox>,
        fingerprint: Option<&ElementFingerprint>,
    ) -> ValidationResult {
        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.evaluation_timeout, session.evaluate(&candidate.locator)).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let raw = match outcome {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(locator = %candidate.locator, error = %e, "candidate query failed; counting as no match");
                return Self::failed(candidate, e.to_string(), elapsed_ms);
            }
            Err(_) => {
                warn!(locator = %candidate.locator, "candidate evaluation timed out");
                // A timed-out session may be wedged
                session.mark_for_recycle();
                return Self::failed(candidate, "evaluation timed out".to_string(), elapsed_ms);
            }
        };

        let unique = raw.count == 1;
        let visible = unique && raw.visible;
        let position_match = match (unique, expected_position, raw.bounding_box) {
            (true, Some(expected), Some(actual)) => {
                Some(expected.near(&actual, self.position_tolerance))
            }
            _ => None,
        };
        let fingerprint_score = match (unique, fingerprint, raw.element.as_ref()) {
            (true, Some(fp), Some(node)) => Some(FingerprintStore::match_score(node, fp)),
            _ => None,
        };
        let confidence = confidence(candidate.tier, unique, visible, position_match);

        debug!(
            locator = %candidate.locator,
            tier = candidate.tier,
            match_count = raw.count,
            visible,
            ?position_match,
            ?fingerprint_score,
            confidence,
            "candidate evaluated"
        );

        ValidationResult {
            candidate: candidate.clone(),
            match_count: raw.count,
            unique,
            visible,
            position_match,
            fingerprint_score,
            confidence,
            error: None,
            elapsed_ms,
            element: if unique { raw.element } else { None },
        }
    }

    fn failed(candidate: &LocatorCandidate, error: String, elapsed_ms: u64) -> ValidationResult {
        ValidationResult {
            candidate: candidate.clone(),
            match_count: 0,
            unique: false,
            visible: false,
            position_match: None,
            fingerprint_score: None,
            confidence: 0.0,
            error: Some(error),
            elapsed_ms,
            element: None,
        }
    }
}
