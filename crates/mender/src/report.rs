//! Healing results and per-run reports.
//!
//! Produces JSON and Markdown output. One [`HealingResult`] is recorded per
//! session; results are grouped by run id.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::locator::Locator;
use crate::session::{AttemptRecord, HealingPhase, HealingSession};

/// Terminal summary of one healing session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingResult {
    /// Session id
    pub session_id: Uuid,
    /// Run the failure belonged to
    pub run_id: String,
    /// Script identifier
    pub script_id: String,
    /// Step identifier
    pub step_id: String,
    /// The broken locator
    pub original_locator: Locator,
    /// The applied replacement, on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healed_locator: Option<Locator>,
    /// Whether the script was healed
    pub success: bool,
    /// Terminal phase
    pub phase: HealingPhase,
    /// Human-readable terminal reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Every candidate attempt in evaluation order
    pub attempts: Vec<AttemptRecord>,
    /// Failed candidate attempts
    pub attempts_count: u32,
    /// Wall-clock duration
    pub elapsed_ms: u64,
    /// Confidence of the winning candidate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Backup taken before the rewrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    /// Completion time
    pub finished_at: DateTime<Utc>,
}

impl HealingResult {
    /// Summarize a terminal session
    #[must_use]
    pub fn from_session(
        session: &HealingSession,
        healed_locator: Option<Locator>,
        backup_path: Option<PathBuf>,
    ) -> Self {
        let confidence = healed_locator.as_ref().and_then(|healed| {
            session
                .results
                .iter()
                .rev()
                .find(|r| &r.candidate.locator == healed)
                .map(|r| r.confidence)
        });
        Self {
            session_id: session.id,
            run_id: session.context.run_id.clone(),
            script_id: session.context.script_id.clone(),
            step_id: session.context.step_key(),
            original_locator: session.context.original_locator.clone(),
            success: session.phase == HealingPhase::Success,
            healed_locator,
            phase: session.phase,
            reason: session.reason.clone(),
            attempts: session.attempts.clone(),
            attempts_count: session.attempts_count,
            elapsed_ms: session.elapsed_ms(),
            confidence,
            backup_path,
            finished_at: session.ended_at.unwrap_or_else(Utc::now),
        }
    }

    /// One Markdown table row
    #[must_use]
    pub fn to_markdown_row(&self) -> String {
        format!(
            "| {} | `{}` | {} | {} | {} | {} | {} |",
            escape_cell(&self.script_id),
            escape_cell(&self.original_locator.to_string()),
            self.healed_locator
                .as_ref()
                .map_or_else(|| "-".to_string(), |l| format!("`{}`", escape_cell(&l.to_string()))),
            self.phase,
            self.attempts.len(),
            self.confidence.map_or_else(|| "-".to_string(), |c| format!("{c:.2}")),
            self.elapsed_ms,
        )
    }
}

const TABLE_HEADER: &str = "\
| Script | Original | Healed | Outcome | Attempts | Confidence | Elapsed (ms) |
|--------|----------|--------|---------|----------|------------|--------------|";

/// All results of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealingReport {
    /// Run id
    pub run_id: String,
    /// Results in completion order
    pub results: Vec<HealingResult>,
}

impl HealingReport {
    /// Create an empty report
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            results: Vec::new(),
        }
    }

    /// Sessions that healed their locator
    #[must_use]
    pub fn healed(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    /// Sessions that did not
    #[must_use]
    pub fn unhealed(&self) -> usize {
        self.results.len() - self.healed()
    }

    /// Pretty-printed JSON
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Markdown summary with a table of sessions and a per-attempt section
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            format!("## Healing Report `{}`", self.run_id),
            String::new(),
            format!(
                "{} session(s): {} healed, {} not healed",
                self.results.len(),
                self.healed(),
                self.unhealed()
            ),
            String::new(),
            TABLE_HEADER.to_string(),
        ];
        lines.extend(self.results.iter().map(HealingResult::to_markdown_row));

        for result in self.results.iter().filter(|r| !r.attempts.is_empty()) {
            lines.push(String::new());
            lines.push(format!(
                "### `{}` ({})",
                escape_cell(&result.original_locator.to_string()),
                result.reason.as_deref().unwrap_or("no reason recorded")
            ));
            lines.push(String::new());
            lines.push("| # | Candidate | Tier | Matches | Confidence | Outcome |".to_string());
            lines.push("|---|-----------|------|---------|------------|---------|".to_string());
            for a in &result.attempts {
                lines.push(format!(
                    "| {} | `{}` | {} | {} | {:.2} | {} |",
                    a.attempt,
                    escape_cell(&a.locator.to_string()),
                    a.tier,
                    a.match_count,
                    a.confidence,
                    a.outcome
                ));
            }
        }
        lines.push(String::new());
        lines.join("\n")
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

/// Runs kept by [`ReportStore::default`]
pub const DEFAULT_RETAINED_RUNS: usize = 256;

/// Reports keyed by run id
///
/// Holds at most `max_runs` runs; opening a run beyond that evicts the run
/// whose latest result is oldest.
#[derive(Debug)]
pub struct ReportStore {
    reports: DashMap<String, Arc<HealingReport>>,
    max_runs: usize,
}

impl Default for ReportStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RETAINED_RUNS)
    }
}

impl ReportStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that keeps at most `max_runs` runs
    #[must_use]
    pub fn with_capacity(max_runs: usize) -> Self {
        Self {
            reports: DashMap::new(),
            max_runs: max_runs.max(1),
        }
    }

    /// Append a result to its run's report; returns the run evicted to make room
    pub fn record(&self, result: HealingResult) -> Option<Arc<HealingReport>> {
        let run_id = result.run_id.clone();
        let opened = match self.reports.entry(run_id.clone()) {
            Entry::Occupied(mut entry) => {
                Arc::make_mut(entry.get_mut()).results.push(result);
                false
            }
            Entry::Vacant(entry) => {
                let mut report = HealingReport::new(run_id.clone());
                report.results.push(result);
                entry.insert(Arc::new(report));
                true
            }
        };
        if opened && self.reports.len() > self.max_runs {
            self.evict_oldest(&run_id)
        } else {
            None
        }
    }

    fn evict_oldest(&self, keep: &str) -> Option<Arc<HealingReport>> {
        let oldest = self
            .reports
            .iter()
            .filter(|entry| entry.key() != keep)
            .min_by_key(|entry| entry.value().results.last().map(|r| r.finished_at))
            .map(|entry| entry.key().clone())?;
        let (_, evicted) = self.reports.remove(&oldest)?;
        tracing::debug!(run_id = %oldest, results = evicted.results.len(), "evicted run report");
        Some(evicted)
    }

    /// Report for a run
    pub fn get(&self, run_id: &str) -> Option<Arc<HealingReport>> {
        self.reports.get(run_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop a run's report
    pub fn remove(&self, run_id: &str) -> Option<Arc<HealingReport>> {
        self.reports.remove(run_id).map(|(_, report)| report)
    }

    /// Number of runs with a report
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    /// Whether no report exists
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}
