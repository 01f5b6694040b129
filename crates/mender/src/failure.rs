//! Failure records and classification of runner output.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::locator::Locator;
use crate::result::{HealError, HealResult};

/// Kind of locator-related failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No element matched the locator
    ElementNotFound,
    /// Waiting for the locator timed out
    SelectorTimeout,
    /// The locator matched more than one element
    MultipleMatches,
    /// The element was detached from the DOM mid-action
    Detached,
    /// The element exists but is hidden or not interactable
    NotInteractable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ElementNotFound => "element_not_found",
            Self::SelectorTimeout => "selector_timeout",
            Self::MultipleMatches => "multiple_matches",
            Self::Detached => "detached",
            Self::NotInteractable => "not_interactable",
        };
        f.write_str(s)
    }
}

/// Immutable record of one failing step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    /// Script identifier (usually its path)
    pub script_id: String,
    /// Test case identifier
    #[serde(default)]
    pub test_case_id: String,
    /// Step identifier, used as the fingerprint key
    #[serde(default)]
    pub step_id: String,
    /// Failing step text
    #[serde(default)]
    pub step: String,
    /// Locator that no longer resolves
    pub original_locator: Locator,
    /// Page the step runs against
    pub target_url: String,
    /// Failure kind
    pub failure_kind: FailureKind,
    /// When the failure was observed
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Run the failure belongs to
    #[serde(default = "new_run_id")]
    pub run_id: String,
}

fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl FailureContext {
    /// Create a failure record with a fresh run id
    #[must_use]
    pub fn new(
        script_id: impl Into<String>,
        original_locator: Locator,
        target_url: impl Into<String>,
        failure_kind: FailureKind,
    ) -> Self {
        Self {
            script_id: script_id.into(),
            test_case_id: String::new(),
            step_id: String::new(),
            step: String::new(),
            original_locator,
            target_url: target_url.into(),
            failure_kind,
            timestamp: Utc::now(),
            run_id: new_run_id(),
        }
    }

    /// Set the test case id
    #[must_use]
    pub fn with_test_case(mut self, id: impl Into<String>) -> Self {
        self.test_case_id = id.into();
        self
    }

    /// Set the step id and text
    #[must_use]
    pub fn with_step(mut self, step_id: impl Into<String>, step: impl Into<String>) -> Self {
        self.step_id = step_id.into();
        self.step = step.into();
        self
    }

    /// Set the run id
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Step key for fingerprint storage; falls back to the locator when no step id is set
    #[must_use]
    pub fn step_key(&self) -> String {
        if self.step_id.is_empty() {
            self.original_locator.to_string()
        } else {
            self.step_id.clone()
        }
    }
}

/// Recognizes locator-related failures in test-runner output
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    patterns: Vec<(FailureKind, Regex)>,
    rejections: Vec<(&'static str, Regex)>,
    locator_patterns: Vec<Regex>,
}

impl FailureClassifier {
    /// Build the classifier with the standard pattern set
    pub fn new() -> HealResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| HealError::config(format!("bad pattern {pattern}: {e}")))
        };
        Ok(Self {
            patterns: vec![
                (
                    FailureKind::MultipleMatches,
                    compile(r"(?i)strict mode violation|resolved to \d+ elements|matched (?:multiple|\d+) elements")?,
                ),
                (
                    FailureKind::Detached,
                    compile(r"(?i)stale element reference|element is not attached|detached from (?:the )?dom")?,
                ),
                (
                    FailureKind::NotInteractable,
                    compile(r"(?i)element (?:is )?not (?:visible|interactable|clickable)|element click intercepted")?,
                ),
                (
                    FailureKind::SelectorTimeout,
                    compile(r"(?i)timeout \d+\s*ms exceeded.*waiting for|waiting for (?:locator|selector)|timed out waiting for")?,
                ),
                (
                    FailureKind::ElementNotFound,
                    compile(r"(?i)no such element|unable to locate element|element not found|could not find element|no element matches")?,
                ),
            ],
            rejections: vec![
                ("assertion mismatch", compile(r"(?i)assertion ?error|expected .* (?:to|but) |expect\(.*\)\.to")?),
                ("network error", compile(r"(?i)net::err_|econnrefused|connection refused|dns")?),
                ("script syntax error", compile(r"(?i)syntaxerror|unexpected token")?),
            ],
            locator_patterns: vec![
                compile(r#"(?i)(?:locator|selector)\s*\(\s*['"`]([^'"`]+)['"`]"#)?,
                compile(r#""selector"\s*:\s*"((?:[^"\\]|\\.)+)""#)?,
                compile(r#"(?i)(?:locator|selector)\s*:?\s*['"`]([^'"`]+)['"`]"#)?,
            ],
        })
    }

    /// Classify runner output; non-locator failures are [`HealError::Classification`]
    pub fn classify(&self, output: &str) -> HealResult<FailureKind> {
        if let Some((kind, _)) = self.patterns.iter().find(|(_, re)| re.is_match(output)) {
            tracing::debug!(kind = %kind, "failure classified as locator-related");
            return Ok(*kind);
        }
        let reason = self
            .rejections
            .iter()
            .find(|(_, re)| re.is_match(output))
            .map_or("no locator-related pattern", |(reason, _)| *reason);
        Err(HealError::Classification {
            reason: reason.to_string(),
        })
    }

    /// Failing locator quoted in the output, if any
    #[must_use]
    pub fn extract_locator(&self, output: &str) -> Option<String> {
        self.locator_patterns.iter().find_map(|re| {
            re.captures(output)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().replace("\\\"", "\""))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> FailureClassifier {
        FailureClassifier::new().unwrap()
    }

    #[test]
    fn test_playwright_timeout() {
        let out = "TimeoutError: locator.click: Timeout 30000ms exceeded.\n\
                   Call log:\n  - waiting for locator('#old-login-btn')";
        assert_eq!(classifier().classify(out).unwrap(), FailureKind::SelectorTimeout);
        assert_eq!(
            classifier().extract_locator(out).as_deref(),
            Some("#old-login-btn")
        );
    }

    #[test]
    fn test_selenium_no_such_element() {
        let out = r##"NoSuchElementException: Message: no such element: Unable to locate element: {"method":"css selector","selector":"#old-login-btn"}"##;
        assert_eq!(classifier().classify(out).unwrap(), FailureKind::ElementNotFound);
        assert_eq!(
            classifier().extract_locator(out).as_deref(),
            Some("#old-login-btn")
        );
    }

    #[test]
    fn test_strict_mode_is_multiple_matches() {
        let out = "Error: strict mode violation: locator('button') resolved to 2 elements";
        assert_eq!(classifier().classify(out).unwrap(), FailureKind::MultipleMatches);
    }

    #[test]
    fn test_stale_and_hidden() {
        let c = classifier();
        assert_eq!(
            c.classify("StaleElementReferenceException: stale element reference").unwrap(),
            FailureKind::Detached
        );
        assert_eq!(
            c.classify("ElementNotInteractableException: element not interactable").unwrap(),
            FailureKind::NotInteractable
        );
    }

    #[test]
    fn test_non_locator_failures_rejected() {
        let c = classifier();
        let err = c
            .classify("AssertionError: expected 'Welcome' to equal 'Hello'")
            .unwrap_err();
        assert!(matches!(err, HealError::Classification { ref reason } if reason == "assertion mismatch"));
        assert!(c.classify("page.goto: net::ERR_CONNECTION_REFUSED").is_err());
        assert!(c.classify("all good").is_err());
    }

    #[test]
    fn test_context_builder_and_step_key() {
        let ctx = FailureContext::new(
            "tests/login.spec.ts",
            Locator::id("old-login-btn"),
            "http://localhost:3000/login",
            FailureKind::ElementNotFound,
        );
        assert_eq!(ctx.step_key(), "id=old-login-btn");
        assert!(!ctx.run_id.is_empty());
        let ctx = ctx.with_step("step-3", "click the login button").with_run_id("run-1");
        assert_eq!(ctx.step_key(), "step-3");
        assert_eq!(ctx.run_id, "run-1");
    }

    #[test]
    fn test_context_deserializes_with_defaults() {
        let json = r#"{
            "script_id": "login.spec.ts",
            "original_locator": "id=old-login-btn",
            "target_url": "http://localhost/login",
            "failure_kind": "element_not_found"
        }"#;
        let ctx: FailureContext = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.original_locator, Locator::id("old-login-btn"));
        assert!(!ctx.run_id.is_empty());
    }
}
