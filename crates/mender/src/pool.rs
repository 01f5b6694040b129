//! Bounded pool of reusable browser sessions.
//!
//! At most `max_sessions` sessions are checked out at once; the bound is a
//! semaphore, so every browser interaction in the engine is serialized through
//! it. Idle sessions past their TTL, sessions over their use budget and
//! sessions whose page reports excessive resource usage are closed and
//! replaced. A session bound to a different URL is re-navigated (full reload)
//! before it is handed out.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::HealingConfig;
use crate::driver::{BrowserDriver, DriverFactory, RawQueryResult};
use crate::element::ElementInfo;
use crate::locator::Locator;
use crate::result::{HealError, HealResult};

/// Pool limits
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum live sessions checked out at once
    pub max_sessions: usize,
    /// Idle sessions older than this are torn down
    pub idle_ttl: Duration,
    /// Evaluations before a session is recycled
    pub max_uses: u32,
    /// Open-handle threshold
    pub max_open_handles: u64,
    /// Heap threshold in bytes
    pub max_heap_bytes: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&HealingConfig::default())
    }
}

impl From<&HealingConfig> for PoolConfig {
    fn from(config: &HealingConfig) -> Self {
        Self {
            max_sessions: config.max_concurrent_sessions,
            idle_ttl: config.session_idle_ttl,
            max_uses: config.max_session_uses,
            max_open_handles: config.max_open_handles,
            max_heap_bytes: config.max_heap_bytes,
        }
    }
}

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Sessions launched
    pub created: usize,
    /// Sessions closed for TTL, use budget, resources or errors
    pub recycled: usize,
    /// Sessions currently idle
    pub idle: usize,
    /// Sessions currently checked out
    pub checked_out: usize,
    /// Highest number of sessions checked out at once
    pub peak_checked_out: usize,
    /// Highest number of sessions querying the browser at once
    pub peak_in_query: usize,
}

struct Session {
    id: Uuid,
    driver: Box<dyn BrowserDriver>,
    url: Option<String>,
    uses: u32,
    last_used: Instant,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("uses", &self.uses)
            .finish_non_exhaustive()
    }
}

struct PoolInner {
    factory: Arc<dyn DriverFactory>,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Session>>,
    created: AtomicUsize,
    recycled: AtomicUsize,
    checked_out: AtomicUsize,
    peak_checked_out: AtomicUsize,
    in_query: AtomicUsize,
    peak_in_query: AtomicUsize,
}

impl PoolInner {
    fn dispose(&self, session: Session, reason: &str) {
        self.recycled.fetch_add(1, Ordering::SeqCst);
        debug!(session = %session.id, reason, "recycling browser session");
        let mut driver = session.driver;
        // Closing needs the runtime; without one the driver is simply dropped.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = driver.close().await {
                    debug!(error = %e, "closing recycled session failed");
                }
            });
        }
    }
}

/// Handle to a shared session pool
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl SessionPool {
    /// Create a pool over a driver factory
    #[must_use]
    pub fn new(factory: Arc<dyn DriverFactory>, config: PoolConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_sessions.max(1)));
        Self {
            inner: Arc::new(PoolInner {
                factory,
                config,
                permits,
                idle: Mutex::new(Vec::new()),
                created: AtomicUsize::new(0),
                recycled: AtomicUsize::new(0),
                checked_out: AtomicUsize::new(0),
                peak_checked_out: AtomicUsize::new(0),
                in_query: AtomicUsize::new(0),
                peak_in_query: AtomicUsize::new(0),
            }),
        }
    }

    /// Pool limits
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Borrow a session bound to `target_url`, waiting up to `timeout`
    pub async fn acquire(&self, target_url: &str, timeout: Duration) -> HealResult<PooledSession> {
        match tokio::time::timeout(timeout, self.acquire_inner(target_url)).await {
            Ok(result) => result,
            Err(_) => {
                let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(url = target_url, ms, "session acquisition timed out");
                Err(HealError::SessionAcquisitionTimeout { ms })
            }
        }
    }

    /// Return a session to the pool
    pub fn release(&self, session: PooledSession) {
        drop(session);
    }

    async fn acquire_inner(&self, target_url: &str) -> HealResult<PooledSession> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| HealError::page("session pool is closed"))?;

        let mut session = match self.take_idle(target_url) {
            Some(session) => self.vet_idle(session).await?,
            None => self.launch().await?,
        };

        if session.url.as_deref() != Some(target_url) {
            if let Err(e) = session.driver.navigate(target_url).await {
                self.inner.dispose(session, "navigation failed");
                return Err(e);
            }
            session.url = Some(target_url.to_string());
        }

        let now = self.inner.checked_out.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_checked_out.fetch_max(now, Ordering::SeqCst);
        Ok(PooledSession {
            session: Some(session),
            pool: Arc::clone(&self.inner),
            recycle: false,
            _permit: permit,
        })
    }

    /// Keep an idle session within its resource limits, otherwise replace it
    async fn vet_idle(&self, session: Session) -> HealResult<Session> {
        let limits = &self.inner.config;
        match session.driver.resource_usage().await {
            Ok(usage) if !usage.exceeds(limits.max_open_handles, limits.max_heap_bytes) => {
                return Ok(session);
            }
            Ok(usage) => {
                warn!(
                    session = %session.id,
                    open_handles = usage.open_handles,
                    heap_bytes = usage.heap_bytes,
                    "session over resource limits"
                );
                self.inner.dispose(session, "resource limits");
            }
            Err(e) => {
                warn!(session = %session.id, error = %e, "resource probe failed");
                self.inner.dispose(session, "resource probe failed");
            }
        }
        self.launch().await
    }

    fn take_idle(&self, target_url: &str) -> Option<Session> {
        let ttl = self.inner.config.idle_ttl;
        let mut idle = self.inner.idle.lock().unwrap_or_else(|e| e.into_inner());
        let (fresh, expired): (Vec<Session>, Vec<Session>) = idle
            .drain(..)
            .partition(|s| s.last_used.elapsed() <= ttl);
        *idle = fresh;
        let same_url = idle
            .iter()
            .position(|s| s.url.as_deref() == Some(target_url));
        let taken = match same_url {
            Some(i) => Some(idle.swap_remove(i)),
            None => idle.pop(),
        };
        drop(idle);
        for session in expired {
            self.inner.dispose(session, "idle ttl");
        }
        taken
    }

    async fn launch(&self) -> HealResult<Session> {
        let driver = self.inner.factory.create().await?;
        self.inner.created.fetch_add(1, Ordering::SeqCst);
        let session = Session {
            id: Uuid::new_v4(),
            driver,
            url: None,
            uses: 0,
            last_used: Instant::now(),
        };
        debug!(session = %session.id, "launched browser session");
        Ok(session)
    }

    /// Close idle sessions past their TTL
    pub fn reap_idle(&self) -> usize {
        let ttl = self.inner.config.idle_ttl;
        let mut idle = self.inner.idle.lock().unwrap_or_else(|e| e.into_inner());
        let (fresh, expired): (Vec<Session>, Vec<Session>) = idle
            .drain(..)
            .partition(|s| s.last_used.elapsed() <= ttl);
        *idle = fresh;
        drop(idle);
        let reaped = expired.len();
        for session in expired {
            self.inner.dispose(session, "idle ttl");
        }
        reaped
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.inner.created.load(Ordering::SeqCst),
            recycled: self.inner.recycled.load(Ordering::SeqCst),
            idle: self.inner.idle.lock().map_or_else(|e| e.into_inner().len(), |i| i.len()),
            checked_out: self.inner.checked_out.load(Ordering::SeqCst),
            peak_checked_out: self.inner.peak_checked_out.load(Ordering::SeqCst),
            peak_in_query: self.inner.peak_in_query.load(Ordering::SeqCst),
        }
    }
}

struct QueryGuard<'a>(&'a AtomicUsize);

impl<'a> QueryGuard<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for QueryGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A session checked out of the pool; returned on drop
pub struct PooledSession {
    session: Option<Session>,
    pool: Arc<PoolInner>,
    recycle: bool,
    _permit: OwnedSemaphorePermit,
}

impl fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("session", &self.session)
            .field("recycle", &self.recycle)
            .finish_non_exhaustive()
    }
}

impl PooledSession {
    /// Session identifier
    #[must_use]
    pub fn id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    /// URL the session is bound to
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.url.as_deref())
    }

    /// Evaluations performed on this session
    #[must_use]
    pub fn uses(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.uses)
    }

    /// Close this session instead of returning it to the pool
    pub fn mark_for_recycle(&mut self) {
        self.recycle = true;
    }

    fn session_mut(&mut self) -> HealResult<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| HealError::page("session already released"))
    }

    /// Evaluate a locator against the live page
    pub async fn evaluate(&mut self, locator: &Locator) -> HealResult<RawQueryResult> {
        let pool = Arc::clone(&self.pool);
        let session = self.session_mut()?;
        session.uses += 1;
        session.last_used = Instant::now();
        let _query = QueryGuard::enter(&pool.in_query, &pool.peak_in_query);
        session.driver.evaluate(locator).await
    }

    /// Describe every node matching a locator
    pub async fn describe_all(&mut self, locator: &Locator) -> HealResult<Vec<ElementInfo>> {
        let pool = Arc::clone(&self.pool);
        let session = self.session_mut()?;
        session.uses += 1;
        session.last_used = Instant::now();
        let _query = QueryGuard::enter(&pool.in_query, &pool.peak_in_query);
        session.driver.describe_all(locator).await
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        self.pool.checked_out.fetch_sub(1, Ordering::SeqCst);
        let Some(mut session) = self.session.take() else {
            return;
        };
        if self.recycle {
            self.pool.dispose(session, "marked for recycle");
        } else if session.uses >= self.pool.config.max_uses {
            self.pool.dispose(session, "use budget");
        } else {
            session.last_used = Instant::now();
            self.pool
                .idle
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(session);
        }
    }
}
