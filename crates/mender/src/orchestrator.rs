//! Healing orchestrator.
//!
//! Drives one [`HealingSession`] per failing locator through
//! `PENDING -> ANALYZING -> GENERATING -> VALIDATING -> UPDATING -> SUCCESS`.
//! Every phase runs under `healing_timeout`. Cancellation is cooperative: it
//! is checked between phases, before each candidate evaluation, and while
//! waiting out a retry backoff. In-flight acquisitions and evaluations finish
//! under their own timeouts.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::candidate::{CandidateGenerator, LocatorCandidate};
use crate::config::HealingConfig;
use crate::cooldown::{CooldownList, LocatorKey};
use crate::driver::DriverFactory;
use crate::element::ElementInfo;
use crate::events::{EventBus, ProgressEvent};
use crate::failure::FailureContext;
use crate::fingerprint::{ElementFingerprint, FingerprintKey, FingerprintStore};
use crate::hint::ElementHint;
use crate::locator::{BoundingBox, Locator};
use crate::pool::{PoolConfig, PooledSession, SessionPool};
use crate::report::{HealingReport, HealingResult, ReportStore};
use crate::result::{HealError, HealResult};
use crate::session::{AttemptOutcome, HealingPhase, HealingSession, SessionStatus};
use crate::updater::ScriptUpdater;
use crate::validator::{LiveValidator, ValidationResult};

/// Everything needed to heal one failing locator
#[derive(Debug, Clone)]
pub struct HealRequest {
    /// The failure
    pub context: FailureContext,
    /// Element information captured when the step last passed
    pub element: Option<ElementInfo>,
    /// Untrusted free-text description of the element
    pub hint: Option<String>,
    /// Script to rewrite on success
    pub script_path: Option<PathBuf>,
}

impl HealRequest {
    /// Create a request for a failure
    #[must_use]
    pub const fn new(context: FailureContext) -> Self {
        Self {
            context,
            element: None,
            hint: None,
            script_path: None,
        }
    }

    /// Attach captured element information
    #[must_use]
    pub fn with_element(mut self, element: ElementInfo) -> Self {
        self.element = Some(element);
        self
    }

    /// Attach a free-text hint
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Rewrite this script on success
    #[must_use]
    pub fn with_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.script_path = Some(path.into());
        self
    }
}

/// Handle to a session running on its own task
#[derive(Debug)]
pub struct HealHandle {
    session_id: Uuid,
    task: JoinHandle<HealResult<HealingResult>>,
}

impl HealHandle {
    /// Session id, usable with [`HealingOrchestrator::status`] and
    /// [`HealingOrchestrator::cancel`]
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Wait for the session to finish
    pub async fn join(self) -> HealResult<HealingResult> {
        self.task
            .await
            .map_err(|e| HealError::page(format!("healing task failed: {e}")))?
    }
}

/// Why a session stopped before `SUCCESS`
#[derive(Debug)]
enum Halt {
    Failed(String),
    Timeout(HealingPhase),
    Cancelled,
    Rollback(HealError),
}

impl Halt {
    /// Only a failed rollback escapes as an error; other update errors fail the session
    fn from_update_error(e: HealError) -> Self {
        if e.is_fatal() {
            Self::Rollback(e)
        } else {
            Self::Failed(e.to_string())
        }
    }
}

/// What `ANALYZING` found
struct Analysis {
    fingerprint: Option<Arc<ElementFingerprint>>,
    element: Option<ElementInfo>,
    live: PooledSession,
}

struct Inner {
    config: HealingConfig,
    pool: SessionPool,
    fingerprints: FingerprintStore,
    generator: CandidateGenerator,
    validator: LiveValidator,
    updater: ScriptUpdater,
    cooldown: CooldownList,
    events: EventBus,
    reports: ReportStore,
    active: DashMap<LocatorKey, Uuid>,
    statuses: DashMap<Uuid, SessionStatus>,
    cancels: DashMap<Uuid, watch::Sender<bool>>,
}

/// Removes the active-session entry when a session ends, however it ends
struct ActiveGuard {
    inner: Arc<Inner>,
    key: LocatorKey,
    session_id: Uuid,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let id = self.session_id;
        self.inner.active.remove_if(&self.key, |_, owner| *owner == id);
        self.inner.cancels.remove(&id);
    }
}

/// A registered session that has not started running
struct Prepared {
    session: HealingSession,
    request: HealRequest,
    key: LocatorKey,
    cancel: watch::Receiver<bool>,
    guard: ActiveGuard,
}

/// Sequences fingerprinting, generation, validation and rewriting
#[derive(Clone)]
pub struct HealingOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for HealingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealingOrchestrator")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .finish_non_exhaustive()
    }
}

impl HealingOrchestrator {
    /// Create an orchestrator with its own session pool
    pub fn new(config: HealingConfig, factory: Arc<dyn DriverFactory>) -> HealResult<Self> {
        let pool = SessionPool::new(factory, PoolConfig::from(&config));
        Self::with_pool(config, pool)
    }

    /// Create an orchestrator over an existing pool
    pub fn with_pool(config: HealingConfig, pool: SessionPool) -> HealResult<Self> {
        config.validate()?;
        let fingerprints = match &config.fingerprint_dir {
            Some(dir) => FingerprintStore::with_dir(dir)?,
            None => FingerprintStore::new(),
        };
        let updater = match &config.backup_dir {
            Some(dir) => ScriptUpdater::with_backup_dir(dir),
            None => ScriptUpdater::new(),
        };
        Ok(Self {
            inner: Arc::new(Inner {
                generator: CandidateGenerator::new(config.max_alternatives),
                validator: LiveValidator::from(&config),
                cooldown: CooldownList::new(config.max_attempts_per_locator, config.cooldown),
                fingerprints,
                updater,
                pool,
                events: EventBus::default(),
                reports: ReportStore::with_capacity(config.max_retained_runs),
                active: DashMap::new(),
                statuses: DashMap::new(),
                cancels: DashMap::new(),
                config,
            }),
        })
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &HealingConfig {
        &self.inner.config
    }

    /// The session pool
    #[must_use]
    pub fn pool(&self) -> &SessionPool {
        &self.inner.pool
    }

    /// The fingerprint store
    #[must_use]
    pub fn fingerprints(&self) -> &FingerprintStore {
        &self.inner.fingerprints
    }

    /// Per-locator cool-down state
    #[must_use]
    pub fn cooldown(&self) -> &CooldownList {
        &self.inner.cooldown
    }

    /// Subscribe to progress events
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProgressEvent> {
        self.inner.events.subscribe()
    }

    /// Phase and progress of a session
    #[must_use]
    pub fn status(&self, session_id: Uuid) -> Option<SessionStatus> {
        self.inner
            .statuses
            .get(&session_id)
            .map(|status| status.value().clone())
    }

    /// Request cancellation; `true` if the session was still running
    pub fn cancel(&self, session_id: Uuid) -> bool {
        match self.inner.cancels.get(&session_id) {
            Some(sender) => {
                info!(session = %session_id, "cancellation requested");
                sender.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Report of every finished session in a run
    #[must_use]
    pub fn report(&self, run_id: &str) -> Option<Arc<HealingReport>> {
        self.inner.reports.get(run_id)
    }

    /// Drop a run's report and the statuses of its finished sessions
    pub fn forget_run(&self, run_id: &str) -> Option<Arc<HealingReport>> {
        let report = self.inner.reports.remove(run_id)?;
        self.forget_statuses(&report);
        Some(report)
    }

    fn forget_statuses(&self, report: &HealingReport) {
        for result in &report.results {
            self.inner.statuses.remove(&result.session_id);
        }
    }

    /// Heal one failing locator
    ///
    /// Terminal outcomes (`FAILED`, `TIMEOUT`, `CANCELLED`) are `Ok` results
    /// with `success == false`. Errors are reserved for a second session on a
    /// locator that is already being healed and for a failed rollback.
    pub async fn heal(&self, request: HealRequest) -> HealResult<HealingResult> {
        let prepared = self.prepare(request)?;
        self.clone().run(prepared).await
    }

    /// Start healing on a new task
    pub fn spawn(&self, request: HealRequest) -> HealResult<HealHandle> {
        let prepared = self.prepare(request)?;
        let session_id = prepared.session.id;
        let task = tokio::spawn(self.clone().run(prepared));
        Ok(HealHandle { session_id, task })
    }

    /// Heal many locators concurrently; browser work is bounded by the pool
    ///
    /// Results are returned in request order.
    pub async fn heal_all(&self, requests: Vec<HealRequest>) -> Vec<HealResult<HealingResult>> {
        let handles: Vec<HealResult<HealHandle>> =
            requests.into_iter().map(|r| self.spawn(r)).collect();
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle {
                Ok(handle) => handle.join().await,
                Err(e) => Err(e),
            });
        }
        results
    }

    fn prepare(&self, request: HealRequest) -> HealResult<Prepared> {
        let ctx = &request.context;
        let key = LocatorKey::new(ctx.script_id.clone(), ctx.original_locator.to_string());
        let session = HealingSession::new(request.context.clone());
        let id = session.id;

        let claimed = match self.inner.active.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(id);
                true
            }
        };
        if !claimed {
            return Err(HealError::AlreadyActive {
                script_id: key.script_id,
                locator: key.locator,
            });
        }

        let (sender, cancel) = watch::channel(false);
        self.inner.cancels.insert(id, sender);
        self.inner.statuses.insert(id, session.status());
        let guard = ActiveGuard {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            session_id: id,
        };
        Ok(Prepared {
            session,
            request,
            key,
            cancel,
            guard,
        })
    }

    async fn run(self, prepared: Prepared) -> HealResult<HealingResult> {
        let span = info_span!(
            "heal",
            session_id = %prepared.session.id,
            script_id = %prepared.key.script_id,
            locator = %prepared.key.locator,
        );
        self.drive(prepared).instrument(span).await
    }

    async fn drive(&self, prepared: Prepared) -> HealResult<HealingResult> {
        let Prepared {
            mut session,
            request,
            key,
            mut cancel,
            guard,
        } = prepared;
        self.publish(&session, "session created");

        let mut snapshot = None;
        let outcome = if !self.inner.config.enabled {
            Err(Halt::Failed("healing disabled".to_string()))
        } else if let Some(left) = self.inner.cooldown.remaining(&key) {
            debug!(remaining_secs = left.as_secs(), "locator is cooling down");
            Err(Halt::Failed("disabled".to_string()))
        } else {
            self.phases(&mut session, &request, &key, &mut cancel, &mut snapshot)
                .await
        };

        let (healed, backup, fatal) = match outcome {
            Ok((healed, backup)) => {
                self.inner.cooldown.record_success(&key);
                self.advance(&mut session, HealingPhase::Success, "script healed");
                (Some(healed), backup, None)
            }
            Err(halt) => (None, snapshot, self.halt(&mut session, halt)),
        };
        let result = self.finalize(&session, healed, backup);
        drop(guard);
        match fatal {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }

    async fn phases(
        &self,
        session: &mut HealingSession,
        request: &HealRequest,
        key: &LocatorKey,
        cancel: &mut watch::Receiver<bool>,
        snapshot: &mut Option<PathBuf>,
    ) -> Result<(Locator, Option<PathBuf>), Halt> {
        checkpoint(cancel)?;
        self.advance(session, HealingPhase::Analyzing, "obtaining fingerprint");
        if let Some(path) = &request.script_path {
            let taken = self
                .inner
                .updater
                .backup(path)
                .map_err(|e| Halt::Failed(format!("cannot back up script: {e}")))?;
            *snapshot = Some(taken);
        }
        let Analysis {
            fingerprint,
            element,
            mut live,
        } = self
            .bounded(HealingPhase::Analyzing, self.analyze(session, request, key, cancel))
            .await?;

        checkpoint(cancel)?;
        self.advance(session, HealingPhase::Generating, "generating candidates");
        let original = &request.context.original_locator;
        let generator = &self.inner.generator;
        let candidates = match (fingerprint.as_deref(), element.as_ref()) {
            (Some(fp), Some(el)) => generator.generate(Some(fp), el, Some(original)),
            (None, Some(el)) => generator.generate_structural(el, Some(original)),
            _ => Vec::new(),
        };
        if candidates.is_empty() {
            return Err(Halt::Failed("no candidates".to_string()));
        }
        info!(count = candidates.len(), "candidates generated");

        checkpoint(cancel)?;
        self.advance(
            session,
            HealingPhase::Validating,
            format!("validating {} candidate(s)", candidates.len()),
        );
        let expected = element.as_ref().and_then(|e| e.bounding_box);
        let winner = self
            .bounded(
                HealingPhase::Validating,
                self.validate_all(session, &mut live, &candidates, fingerprint.as_deref(), expected, cancel),
            )
            .await?;
        drop(live);
        let Some(winner) = winner else {
            self.inner.cooldown.record_failure(key);
            return Err(Halt::Failed("no alternative validated".to_string()));
        };

        checkpoint(cancel)?;
        let healed = winner.candidate.locator.clone();
        self.advance(session, HealingPhase::Updating, format!("applying {healed}"));
        let backup = match &request.script_path {
            Some(path) => Some(
                self.bounded(
                    HealingPhase::Updating,
                    self.update(path, original, &healed, snapshot.as_deref()),
                )
                .await?,
            ),
            None => None,
        };

        self.refresh_fingerprint(request, winner.element.as_ref().or(element.as_ref()))
            .await;
        Ok((healed, backup))
    }

    async fn analyze(
        &self,
        session: &mut HealingSession,
        request: &HealRequest,
        key: &LocatorKey,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Analysis, Halt> {
        let ctx = &request.context;
        let fp_key = FingerprintKey::new(ctx.script_id.clone(), ctx.step_key());
        let fingerprint = match self
            .inner
            .fingerprints
            .get_or_create(&fp_key, request.element.as_ref())
            .await
        {
            Ok(fp) => Some(fp),
            Err(e) => {
                warn!(key = %fp_key, error = %e, "no fingerprint; falling back to structural candidates");
                None
            }
        };

        let mut live = self.acquire(session, key, &ctx.target_url, cancel).await?;

        let element = match &fingerprint {
            Some(fp) => Some(self.reidentify(&mut live, fp).await),
            None => self.probe_hint(&mut live, request.hint.as_deref()).await,
        };
        Ok(Analysis {
            fingerprint,
            element,
            live,
        })
    }

    /// Find the fingerprinted element in the live page, or fall back to its
    /// recorded attributes
    async fn reidentify(&self, live: &mut PooledSession, fp: &ElementFingerprint) -> ElementInfo {
        let nodes = match live.describe_all(&Locator::css(fp.tag.clone())).await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(tag = %fp.tag, error = %e, "live re-identification query failed");
                Vec::new()
            }
        };
        match FingerprintStore::best_match(&nodes, fp, self.inner.config.min_fingerprint_score) {
            Some((node, score)) => {
                info!(score, path = %node.path, "element re-identified in live page");
                node.clone()
            }
            None => {
                debug!(candidates = nodes.len(), "no live node close enough; using recorded attributes");
                fp.to_element_info()
            }
        }
    }

    /// Resolve a sanitized hint to a single live node
    async fn probe_hint(&self, live: &mut PooledSession, hint: Option<&str>) -> Option<ElementInfo> {
        let hint = ElementHint::sanitize(hint?);
        if hint.is_empty() {
            return None;
        }
        for probe in hint.probes() {
            match live.describe_all(&probe).await {
                Ok(mut nodes) if nodes.len() == 1 => {
                    info!(probe = %probe, "hint resolved to a live node");
                    return nodes.pop();
                }
                Ok(nodes) => debug!(probe = %probe, matches = nodes.len(), "hint probe not unique"),
                Err(e) => debug!(probe = %probe, error = %e, "hint probe failed"),
            }
        }
        None
    }

    /// Borrow a session, retrying acquisition timeouts with backoff
    async fn acquire(
        &self,
        session: &mut HealingSession,
        key: &LocatorKey,
        url: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<PooledSession, Halt> {
        let config = &self.inner.config;
        let attempts = config.max_attempts_per_locator;
        for attempt in 1..=attempts {
            checkpoint(cancel)?;
            match self.inner.pool.acquire(url, config.session_timeout).await {
                Ok(live) => return Ok(live),
                Err(e) if e.is_transient() => {
                    session.acquisition_failures += 1;
                    warn!(attempt, max = attempts, error = %e, "session acquisition failed");
                    if attempt < attempts {
                        let delay = config.backoff(attempt);
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            _ = cancel.changed() => {}
                        }
                    }
                }
                Err(e) => return Err(Halt::Failed(e.to_string())),
            }
        }
        // A session that never got a browser counts every retry towards the cool-down
        self.inner
            .cooldown
            .record_failures(key, session.acquisition_failures);
        Err(Halt::Failed(format!(
            "no browser session after {attempts} attempt(s)"
        )))
    }

    /// Try candidates strictly in order; the first acceptable one wins
    async fn validate_all(
        &self,
        session: &mut HealingSession,
        live: &mut PooledSession,
        candidates: &[LocatorCandidate],
        fingerprint: Option<&ElementFingerprint>,
        expected: Option<BoundingBox>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Option<ValidationResult>, Halt> {
        let validator = &self.inner.validator;
        for candidate in candidates {
            checkpoint(cancel)?;
            let result = match fingerprint {
                Some(fp) => validator.validate_against(live, candidate, fp).await,
                None => validator.validate(live, candidate, expected.as_ref()).await,
            };
            let outcome = self.judge(&result);
            let message = format!("{} -> {outcome}", candidate.locator);
            if outcome == AttemptOutcome::Accepted {
                session.record(result.clone(), outcome);
                self.publish(session, message);
                return Ok(Some(result));
            }
            debug!(locator = %candidate.locator, tier = candidate.tier, %outcome, "candidate rejected");
            session.record(result, outcome);
            self.publish(session, message);
        }
        Ok(None)
    }

    fn judge(&self, result: &ValidationResult) -> AttemptOutcome {
        let config = &self.inner.config;
        if result.error.is_some() {
            AttemptOutcome::QueryError
        } else if !result.unique {
            AttemptOutcome::NotUnique
        } else if !result.visible {
            AttemptOutcome::NotVisible
        } else if result.confidence < config.confidence_threshold
            || result
                .fingerprint_score
                .is_some_and(|s| s < config.min_fingerprint_score)
        {
            AttemptOutcome::BelowThreshold
        } else {
            AttemptOutcome::Accepted
        }
    }

    async fn update(
        &self,
        path: &Path,
        original: &Locator,
        healed: &Locator,
        snapshot: Option<&Path>,
    ) -> Result<PathBuf, Halt> {
        let replacements = BTreeMap::from([(original.to_string(), healed.to_string())]);
        let result = self
            .inner
            .updater
            .apply_with_snapshot(path, &replacements, snapshot)
            .await
            .map_err(Halt::from_update_error)?;
        if result.success {
            Ok(result.backup_path)
        } else {
            Err(Halt::Failed(format!(
                "script update failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            )))
        }
    }

    /// Replace the stored fingerprint with the element as it looks now
    async fn refresh_fingerprint(&self, request: &HealRequest, element: Option<&ElementInfo>) {
        let Some(element) = element.filter(|e| !e.is_empty()) else {
            return;
        };
        let store = &self.inner.fingerprints;
        let key = FingerprintKey::new(
            request.context.script_id.clone(),
            request.context.step_key(),
        );
        let refreshed = match store.create(element) {
            Ok(fp) => store.store(key, fp).await.map(drop),
            Err(e) => Err(e),
        };
        if let Err(e) = refreshed {
            warn!(error = %e, "could not refresh fingerprint");
        }
    }

    async fn bounded<T>(
        &self,
        phase: HealingPhase,
        work: impl Future<Output = Result<T, Halt>>,
    ) -> Result<T, Halt> {
        tokio::time::timeout(self.inner.config.healing_timeout, work)
            .await
            .unwrap_or(Err(Halt::Timeout(phase)))
    }

    /// Move the session to its terminal phase; returns the error to surface, if any
    fn halt(&self, session: &mut HealingSession, halt: Halt) -> Option<HealError> {
        match halt {
            Halt::Failed(reason) => {
                self.finish(session, HealingPhase::Failed, reason);
                None
            }
            Halt::Timeout(phase) => {
                let ms = self.inner.config.healing_timeout.as_millis();
                self.finish(session, HealingPhase::Timeout, format!("{phase} exceeded {ms}ms"));
                None
            }
            Halt::Cancelled => {
                self.finish(session, HealingPhase::Cancelled, "cancelled");
                None
            }
            Halt::Rollback(e) => {
                self.finish(session, HealingPhase::Failed, e.to_string());
                Some(e)
            }
        }
    }

    fn advance(&self, session: &mut HealingSession, next: HealingPhase, message: impl Into<String>) {
        if session.transition(next) {
            self.publish(session, message);
        }
    }

    fn finish(&self, session: &mut HealingSession, terminal: HealingPhase, reason: impl Into<String>) {
        let reason = reason.into();
        if session.finish(terminal, reason.clone()) {
            info!(phase = %terminal, %reason, attempts = session.attempts_count, "healing finished");
            self.publish(session, reason);
        }
    }

    fn publish(&self, session: &HealingSession, message: impl Into<String>) {
        self.inner.statuses.insert(session.id, session.status());
        self.inner
            .events
            .emit(session.id, session.phase, session.attempts_count, message);
    }

    fn finalize(
        &self,
        session: &HealingSession,
        healed: Option<Locator>,
        backup: Option<PathBuf>,
    ) -> HealingResult {
        let result = HealingResult::from_session(session, healed, backup);
        if let Some(evicted) = self.inner.reports.record(result.clone()) {
            self.forget_statuses(&evicted);
        }
        result
    }
}

fn checkpoint(cancel: &watch::Receiver<bool>) -> Result<(), Halt> {
    if *cancel.borrow() {
        Err(Halt::Cancelled)
    } else {
        Ok(())
    }
}
