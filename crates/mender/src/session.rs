//! Healing session state machine.
//!
//! ```text
//! PENDING -> ANALYZING -> GENERATING -> VALIDATING -> UPDATING -> SUCCESS
//!    \___________\____________\____________\____________\--> FAILED | TIMEOUT | CANCELLED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::failure::FailureContext;
use crate::locator::Locator;
use crate::validator::ValidationResult;

/// Phase of a healing session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealingPhase {
    /// Created, not started
    Pending,
    /// Obtaining the fingerprint and current element attributes
    Analyzing,
    /// Producing candidates
    Generating,
    /// Trying candidates against the live page
    Validating,
    /// Rewriting the script
    Updating,
    /// Script healed
    Success,
    /// Gave up
    Failed,
    /// A phase exceeded its deadline
    Timeout,
    /// Cancelled by request
    Cancelled,
}

impl HealingPhase {
    /// Whether the phase ends the session
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Timeout | Self::Cancelled)
    }

    /// Whether `next` is a legal successor
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed | Self::Timeout | Self::Cancelled => true,
            Self::Analyzing => matches!(self, Self::Pending),
            Self::Generating => matches!(self, Self::Analyzing),
            Self::Validating => matches!(self, Self::Generating),
            Self::Updating => matches!(self, Self::Validating),
            Self::Success => matches!(self, Self::Updating),
            Self::Pending => false,
        }
    }

    /// Rough completion fraction for progress displays
    #[must_use]
    pub const fn progress(self) -> f32 {
        match self {
            Self::Pending => 0.0,
            Self::Analyzing => 0.15,
            Self::Generating => 0.3,
            Self::Validating => 0.5,
            Self::Updating => 0.85,
            Self::Success | Self::Failed | Self::Timeout | Self::Cancelled => 1.0,
        }
    }
}

impl fmt::Display for HealingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Analyzing => write!(f, "ANALYZING"),
            Self::Generating => write!(f, "GENERATING"),
            Self::Validating => write!(f, "VALIDATING"),
            Self::Updating => write!(f, "UPDATING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Why a candidate attempt ended the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Accepted and applied
    Accepted,
    /// Zero or several matches
    NotUnique,
    /// Unique but hidden
    NotVisible,
    /// Unique and visible, but confidence or similarity too low
    BelowThreshold,
    /// The query failed or timed out
    QueryError,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::NotUnique => write!(f, "not_unique"),
            Self::NotVisible => write!(f, "not_visible"),
            Self::BelowThreshold => write!(f, "below_threshold"),
            Self::QueryError => write!(f, "query_error"),
        }
    }
}

/// One candidate attempt, kept for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    /// Candidate locator
    pub locator: Locator,
    /// Candidate tier
    pub tier: u8,
    /// Matches found
    pub match_count: usize,
    /// Whether the match was visible
    pub visible: bool,
    /// Confidence
    pub confidence: f64,
    /// Similarity to the fingerprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint_score: Option<f64>,
    /// Outcome
    pub outcome: AttemptOutcome,
    /// Query error, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AttemptRecord {
    /// Record a validation result
    #[must_use]
    pub fn new(attempt: u32, result: &ValidationResult, outcome: AttemptOutcome) -> Self {
        Self {
            attempt,
            locator: result.candidate.locator.clone(),
            tier: result.candidate.tier,
            match_count: result.match_count,
            visible: result.visible,
            confidence: result.confidence,
            fingerprint_score: result.fingerprint_score,
            outcome,
            error: result.error.clone(),
        }
    }
}

/// Point-in-time view of a session for status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Session id
    pub session_id: Uuid,
    /// Current phase
    pub phase: HealingPhase,
    /// Candidate attempts so far
    pub attempts_count: u32,
    /// Completion fraction
    pub progress: f32,
    /// Terminal reason, once terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Mutable state of one healing attempt, owned by the orchestrator
#[derive(Debug, Clone)]
pub struct HealingSession {
    /// Session id
    pub id: Uuid,
    /// The failure being healed
    pub context: FailureContext,
    /// Current phase
    pub phase: HealingPhase,
    /// Failed candidate attempts
    pub attempts_count: u32,
    /// Session-acquisition timeouts absorbed by retries
    pub acquisition_failures: u32,
    /// Validation results in evaluation order
    pub results: Vec<ValidationResult>,
    /// Audit trail
    pub attempts: Vec<AttemptRecord>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub ended_at: Option<DateTime<Utc>>,
    /// Human-readable terminal reason
    pub reason: Option<String>,
}

impl HealingSession {
    /// Create a pending session
    #[must_use]
    pub fn new(context: FailureContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            context,
            phase: HealingPhase::Pending,
            attempts_count: 0,
            acquisition_failures: 0,
            results: Vec::new(),
            attempts: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            reason: None,
        }
    }

    /// Move to `next`; illegal transitions are refused and return `false`
    pub fn transition(&mut self, next: HealingPhase) -> bool {
        if !self.phase.can_transition_to(next) {
            tracing::warn!(session = %self.id, from = %self.phase, to = %next, "illegal phase transition refused");
            return false;
        }
        tracing::info!(session = %self.id, from = %self.phase, to = %next, "phase transition");
        self.phase = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        true
    }

    /// Enter a terminal phase with a reason
    pub fn finish(&mut self, terminal: HealingPhase, reason: impl Into<String>) -> bool {
        debug_assert!(terminal.is_terminal());
        let changed = self.transition(terminal);
        if changed {
            self.reason = Some(reason.into());
        }
        changed
    }

    /// Record a candidate evaluation
    pub fn record(&mut self, result: ValidationResult, outcome: AttemptOutcome) {
        let attempt = u32::try_from(self.attempts.len() + 1).unwrap_or(u32::MAX);
        if outcome != AttemptOutcome::Accepted {
            self.attempts_count += 1;
        }
        self.attempts.push(AttemptRecord::new(attempt, &result, outcome));
        self.results.push(result);
    }

    /// Elapsed time in milliseconds
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        u64::try_from((end - self.started_at).num_milliseconds()).unwrap_or(0)
    }

    /// Status snapshot
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id,
            phase: self.phase,
            attempts_count: self.attempts_count,
            progress: self.phase.progress(),
            reason: self.reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::FailureKind;

    fn session() -> HealingSession {
        HealingSession::new(FailureContext::new(
            "login.spec.ts",
            Locator::id("old-login-btn"),
            "http://localhost/login",
            FailureKind::ElementNotFound,
        ))
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut s = session();
        for phase in [
            HealingPhase::Analyzing,
            HealingPhase::Generating,
            HealingPhase::Validating,
            HealingPhase::Updating,
            HealingPhase::Success,
        ] {
            assert!(s.transition(phase), "{phase}");
        }
        assert!(s.ended_at.is_some());
        assert!((s.status().progress - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_skipping_phases_refused() {
        let mut s = session();
        assert!(!s.transition(HealingPhase::Validating));
        assert_eq!(s.phase, HealingPhase::Pending);
    }

    #[test]
    fn test_terminal_reachable_from_any_non_terminal() {
        for from in [
            HealingPhase::Pending,
            HealingPhase::Analyzing,
            HealingPhase::Generating,
            HealingPhase::Validating,
            HealingPhase::Updating,
        ] {
            for to in [HealingPhase::Failed, HealingPhase::Timeout, HealingPhase::Cancelled] {
                assert!(from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_terminal_is_final() {
        let mut s = session();
        assert!(s.finish(HealingPhase::Failed, "disabled"));
        assert!(!s.finish(HealingPhase::Cancelled, "late cancel"));
        assert_eq!(s.reason.as_deref(), Some("disabled"));
        assert_eq!(s.phase, HealingPhase::Failed);
    }

    #[test]
    fn test_phase_display_and_serde() {
        assert_eq!(HealingPhase::Validating.to_string(), "VALIDATING");
        assert_eq!(
            serde_json::to_string(&HealingPhase::Timeout).unwrap(),
            "\"TIMEOUT\""
        );
    }
}
