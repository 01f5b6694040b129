//! Mender: self-healing locators for generated browser test scripts.
//!
//! When a test step fails because its element can no longer be found, Mender
//! fingerprints the element the step used to target, generates ranked
//! alternative locators, validates them against live browser sessions and
//! rewrites the script (with a backup) once a unique, visible match is found.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌─────────────┐   ┌───────────┐
//! │ Fingerprint  │──►│ Candidate   │──►│ Live        │──►│ Script    │
//! │ Store        │   │ Generator   │   │ Validator   │   │ Updater   │
//! └──────────────┘   └─────────────┘   └──────┬──────┘   └───────────┘
//!        ▲                                    │
//!        │           ┌─────────────┐   ┌──────▼──────┐
//!        └───────────│ Healing     │   │ Session     │
//!                    │ Orchestrator│──►│ Pool        │
//!                    └─────────────┘   └─────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use mender::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> HealResult<()> {
//! let dom = MockDom::page(vec![
//!     DomNode::new("button").attr("id", "new-login-btn").text("Log in"),
//! ]);
//! let engine = HealingOrchestrator::new(
//!     HealingConfig::default(),
//!     Arc::new(MockDriverFactory::new(dom)),
//! )?;
//! let failure = FailureContext::new(
//!     "login.spec.ts",
//!     Locator::id("old-login-btn"),
//!     "http://localhost/login",
//!     FailureKind::ElementNotFound,
//! );
//! let request = HealRequest::new(failure)
//!     .with_element(ElementInfo::new("button").with_attr("id", "old-login-btn").with_text("Log in"))
//!     .with_script("tests/login.spec.ts");
//! let result = engine.heal(request).await?;
//! println!("{:?} -> {:?}", result.original_locator, result.healed_locator);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp))]

#[cfg(feature = "browser")]
pub mod browser;
pub mod candidate;
pub mod config;
pub mod cooldown;
pub mod dom;
pub mod driver;
pub mod element;
pub mod events;
pub mod failure;
pub mod fingerprint;
pub mod hint;
mod keyed;
pub mod locator;
pub mod orchestrator;
pub mod pool;
pub mod report;
pub mod result;
pub mod session;
pub mod updater;
pub mod validator;

pub use candidate::{CandidateGenerator, LocatorCandidate, Strategy};
pub use config::HealingConfig;
pub use cooldown::{CooldownList, LocatorKey};
pub use dom::{DomNode, MockDom, MockDriver, MockDriverFactory};
pub use driver::{BrowserDriver, DriverFactory, RawQueryResult, ResourceUsage};
pub use element::{ElementInfo, NodeDescriptor};
pub use events::{EventBus, ProgressEvent};
pub use failure::{FailureClassifier, FailureContext, FailureKind};
pub use fingerprint::{ElementFingerprint, FingerprintKey, FingerprintStore};
pub use hint::ElementHint;
pub use locator::{BoundingBox, Locator, Point};
pub use orchestrator::{HealHandle, HealRequest, HealingOrchestrator};
pub use pool::{PoolConfig, PoolStats, PooledSession, SessionPool};
pub use report::{HealingReport, HealingResult, ReportStore};
pub use result::{HealError, HealResult};
pub use session::{AttemptOutcome, AttemptRecord, HealingPhase, HealingSession, SessionStatus};
pub use updater::{ScriptFormat, ScriptUpdater, UpdateResult};
pub use validator::{LiveValidator, ValidationResult};

#[cfg(feature = "browser")]
pub use browser::{ChromiumConfig, ChromiumDriver, ChromiumFactory};

/// Everything needed to drive a healing session
pub mod prelude {
    #[cfg(feature = "browser")]
    pub use super::browser::{ChromiumConfig, ChromiumFactory};
    pub use super::{
        AttemptOutcome, BoundingBox, CandidateGenerator, DomNode, DriverFactory, ElementHint,
        ElementInfo, FailureClassifier, FailureContext, FailureKind, FingerprintKey,
        FingerprintStore, HealError, HealRequest, HealResult, HealingConfig, HealingOrchestrator,
        HealingPhase, HealingReport, HealingResult, Locator, LocatorCandidate, MockDom,
        MockDriverFactory, ProgressEvent, ScriptUpdater,
    };
}
