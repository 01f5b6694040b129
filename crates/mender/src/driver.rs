//! Browser driver seam.
//!
//! The pool and validator depend only on this narrow primitive set, so a
//! CDP-backed driver and the in-memory [`MockDriver`](crate::dom::MockDriver)
//! are interchangeable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::element::ElementInfo;
use crate::locator::{BoundingBox, Locator};
use crate::result::HealResult;

/// Resource accounting for one browser session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Live DOM nodes reported by the page
    pub open_handles: u64,
    /// Used JavaScript heap in bytes
    pub heap_bytes: u64,
}

impl ResourceUsage {
    /// Whether either figure exceeds its limit
    #[must_use]
    pub const fn exceeds(&self, max_open_handles: u64, max_heap_bytes: u64) -> bool {
        self.open_handles > max_open_handles || self.heap_bytes > max_heap_bytes
    }
}

/// Raw outcome of evaluating one locator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawQueryResult {
    /// Number of matching elements
    pub count: usize,
    /// Whether the first match is visible
    pub visible: bool,
    /// Bounding box of the first match
    pub bounding_box: Option<BoundingBox>,
    /// Description of the first match
    pub element: Option<ElementInfo>,
}

/// Abstract browser primitives used by the healing engine
///
/// # Implementations
///
/// - `ChromiumDriver` - real Chromium over CDP (feature `browser`)
/// - `MockDriver` - in-memory DOM for tests and replays
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigate to URL (full reload)
    async fn navigate(&mut self, url: &str) -> HealResult<()>;

    /// Number of elements matching the locator
    async fn count(&self, locator: &Locator) -> HealResult<usize>;

    /// Whether the first match is rendered and visible
    async fn visible(&self, locator: &Locator) -> HealResult<bool>;

    /// Bounding box of the first match
    async fn bounding_box(&self, locator: &Locator) -> HealResult<Option<BoundingBox>>;

    /// Describe every match
    async fn describe_all(&self, locator: &Locator) -> HealResult<Vec<ElementInfo>>;

    /// Current resource usage
    async fn resource_usage(&self) -> HealResult<ResourceUsage>;

    /// Close the session
    async fn close(&mut self) -> HealResult<()>;

    /// Evaluate a locator: count, then visibility and position of a unique match
    async fn evaluate(&self, locator: &Locator) -> HealResult<RawQueryResult> {
        let count = self.count(locator).await?;
        if count != 1 {
            return Ok(RawQueryResult {
                count,
                ..RawQueryResult::default()
            });
        }
        let visible = self.visible(locator).await?;
        let bounding_box = self.bounding_box(locator).await?;
        let element = self.describe_all(locator).await?.into_iter().next();
        Ok(RawQueryResult {
            count,
            visible,
            bounding_box,
            element,
        })
    }
}

/// Creates fresh driver sessions for the pool
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Launch a new session
    async fn create(&self) -> HealResult<Box<dyn BrowserDriver>>;
}
