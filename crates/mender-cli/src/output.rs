//! Terminal rendering of engine results

use console::style;
use mender::{HealingResult, LocatorCandidate, ProgressEvent};

use crate::commands::OutputFormat;
use crate::error::CliResult;

/// Render a finished healing session
pub fn render_result(result: &HealingResult, format: OutputFormat) -> CliResult<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(result)?);
    }

    let mut out = String::new();
    if result.success {
        let healed = result
            .healed_locator
            .as_ref()
            .map_or_else(String::new, ToString::to_string);
        out.push_str(&format!(
            "{} {} {} {}\n",
            style("✓").green().bold(),
            style(&result.original_locator).dim(),
            style("→").dim(),
            style(healed).green()
        ));
        if let Some(confidence) = result.confidence {
            out.push_str(&format!("  confidence {confidence:.2}\n"));
        }
    } else {
        out.push_str(&format!(
            "{} {} {}\n",
            style("✗").red().bold(),
            style(result.phase).red(),
            result.reason.as_deref().unwrap_or_default()
        ));
    }
    for attempt in &result.attempts {
        out.push_str(&format!(
            "  {:>2}. [tier {}] {:<40} matches={} visible={} confidence={:.2} {}\n",
            attempt.attempt,
            attempt.tier,
            attempt.locator.to_string(),
            attempt.match_count,
            attempt.visible,
            attempt.confidence,
            attempt.outcome
        ));
    }
    if let Some(ref backup) = result.backup_path {
        out.push_str(&format!("  backup {}\n", backup.display()));
    }
    out.push_str(&format!("  {} ms\n", result.elapsed_ms));
    Ok(out)
}

/// Render an offline candidate list
pub fn render_candidates(candidates: &[LocatorCandidate], format: OutputFormat) -> CliResult<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(candidates)?);
    }
    if candidates.is_empty() {
        return Ok(format!("{}\n", style("no candidates").yellow()));
    }
    let mut out = String::new();
    for (i, candidate) in candidates.iter().enumerate() {
        out.push_str(&format!(
            "{:>2}. [tier {}] {}  {}\n",
            i + 1,
            candidate.tier,
            style(&candidate.locator).cyan(),
            style(candidate.derived_from.join(", ")).dim()
        ));
    }
    Ok(out)
}

/// One progress line for `heal --progress`
#[must_use]
pub fn render_progress(event: &ProgressEvent) -> String {
    format!(
        "{} {:>3.0}% {:<10} {}",
        style("•").cyan(),
        event.progress * 100.0,
        event.phase.to_string(),
        style(&event.message).dim()
    )
}
