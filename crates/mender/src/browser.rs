//! Real browser sessions over the Chrome `DevTools` Protocol.
//!
//! One Chromium process is shared by a [`ChromiumFactory`]; every pooled
//! session is a separate page (tab). Locator queries run as JavaScript
//! generated by [`Locator`].

use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
use chromiumoxide::page::Page as CdpPage;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::driver::{BrowserDriver, DriverFactory, ResourceUsage};
use crate::element::ElementInfo;
use crate::locator::{BoundingBox, Locator};
use crate::result::{HealError, HealResult};

/// Chromium launch options
#[derive(Debug, Clone)]
pub struct ChromiumConfig {
    /// Run without a window
    pub headless: bool,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
    /// Path to the chromium binary (None = auto-detect)
    pub chromium_path: Option<String>,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
}

impl Default for ChromiumConfig {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: true,
            chromium_path: None,
            viewport_width: 1280,
            viewport_height: 800,
        }
    }
}

impl ChromiumConfig {
    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Disable sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }

    /// Set chromium path
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<String>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }
}

/// Launches pages on a shared Chromium process
#[derive(Debug)]
pub struct ChromiumFactory {
    browser: Arc<Mutex<CdpBrowser>>,
    handler: tokio::task::JoinHandle<()>,
}

impl ChromiumFactory {
    /// Launch Chromium
    pub async fn launch(config: ChromiumConfig) -> HealResult<Self> {
        let mut builder = CdpConfig::builder().window_size(config.viewport_width, config.viewport_height);
        if !config.headless {
            builder = builder.with_head();
        }
        if !config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(ref path) = config.chromium_path {
            builder = builder.chrome_executable(path);
        }
        let cdp_config = builder
            .build()
            .map_err(|message| HealError::BrowserLaunch { message })?;

        let (browser, mut handler) = CdpBrowser::launch(cdp_config)
            .await
            .map_err(|e| HealError::BrowserLaunch {
                message: e.to_string(),
            })?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            handler,
        })
    }

    /// Close the browser process
    pub async fn close(self) -> HealResult<()> {
        let mut browser = self.browser.lock().await;
        browser.close().await.map_err(|e| HealError::BrowserLaunch {
            message: e.to_string(),
        })?;
        self.handler.abort();
        Ok(())
    }
}

#[async_trait]
impl DriverFactory for ChromiumFactory {
    async fn create(&self) -> HealResult<Box<dyn BrowserDriver>> {
        let browser = self.browser.lock().await;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| HealError::BrowserLaunch {
                message: e.to_string(),
            })?;
        debug!("opened chromium page");
        Ok(Box::new(ChromiumDriver { page: Some(page) }))
    }
}

/// One Chromium page
#[derive(Debug)]
pub struct ChromiumDriver {
    page: Option<CdpPage>,
}

impl ChromiumDriver {
    fn page(&self) -> HealResult<&CdpPage> {
        self.page.as_ref().ok_or_else(|| HealError::page("page already closed"))
    }

    async fn eval<T: DeserializeOwned>(&self, locator: &Locator, expr: String) -> HealResult<T> {
        let query_error = |message: String| HealError::ValidationQuery {
            locator: locator.to_string(),
            message,
        };
        let result = self
            .page()?
            .evaluate(expr)
            .await
            .map_err(|e| query_error(e.to_string()))?;
        result.into_value().map_err(|e| query_error(e.to_string()))
    }
}

/// Describes each element of `__COLLECT__` in the shape of [`ElementInfo`]
const DESCRIBE_JS: &str = r"(() => {
  const desc = el => ({ tag: el.tagName.toLowerCase(), id: el.id || null, classes: Array.from(el.classList) });
  const nth = el => { let i = 1; for (let s = el.previousElementSibling; s; s = s.previousElementSibling) if (s.tagName === el.tagName) i++; return i; };
  const seg = el => {
    const p = el.parentElement;
    const same = p ? Array.from(p.children).filter(c => c.tagName === el.tagName).length : 1;
    return el.tagName.toLowerCase() + (same > 1 ? ':nth-of-type(' + nth(el) + ')' : '');
  };
  return __COLLECT__.map(el => {
    const ancestors = [];
    const path = [seg(el)];
    for (let a = el.parentElement; a; a = a.parentElement) { ancestors.push(desc(a)); path.unshift(seg(a)); }
    const r = el.getBoundingClientRect();
    const s = window.getComputedStyle(el);
    return {
      tag: el.tagName.toLowerCase(),
      attributes: Object.fromEntries(Array.from(el.attributes).map(a => [a.name, a.value])),
      text: (el.innerText || el.textContent || '').replace(/\s+/g, ' ').trim(),
      ancestors,
      siblings: el.parentElement ? Array.from(el.parentElement.children).filter(c => c !== el).map(desc) : [],
      nth_of_type: nth(el),
      path: path.join(' > '),
      bounding_box: { x: r.x, y: r.y, width: r.width, height: r.height },
      visible: s.visibility !== 'hidden' && s.display !== 'none' && r.width > 0 && r.height > 0,
      visual_hash: null,
    };
  });
})()";

const RESOURCE_JS: &str = r"(() => ({
  open_handles: document.getElementsByTagName('*').length,
  heap_bytes: (performance.memory && performance.memory.usedJSHeapSize) || 0,
}))()";

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn navigate(&mut self, url: &str) -> HealResult<()> {
        self.page()?
            .goto(url)
            .await
            .map_err(|e| HealError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn count(&self, locator: &Locator) -> HealResult<usize> {
        self.eval(locator, locator.to_count_query()).await
    }

    async fn visible(&self, locator: &Locator) -> HealResult<bool> {
        self.eval(locator, locator.to_visible_query()).await
    }

    async fn bounding_box(&self, locator: &Locator) -> HealResult<Option<BoundingBox>> {
        self.eval(locator, locator.to_bounding_box_query()).await
    }

    async fn describe_all(&self, locator: &Locator) -> HealResult<Vec<ElementInfo>> {
        let expr = DESCRIBE_JS.replace("__COLLECT__", &locator.to_collect_query());
        self.eval(locator, expr).await
    }

    async fn resource_usage(&self) -> HealResult<ResourceUsage> {
        let page = self.page()?;
        let result = page
            .evaluate(RESOURCE_JS)
            .await
            .map_err(|e| HealError::page(e.to_string()))?;
        result.into_value().map_err(|e| HealError::page(e.to_string()))
    }

    async fn close(&mut self) -> HealResult<()> {
        if let Some(page) = self.page.take() {
            page.close().await.map_err(|e| HealError::page(e.to_string()))?;
        }
        Ok(())
    }
}
