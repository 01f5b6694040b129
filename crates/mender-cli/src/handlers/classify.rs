//! Classify command handler

use mender::{FailureClassifier, FailureKind, HealError};
use serde::Serialize;

use crate::commands::{ClassifyArgs, OutputFormat};
use crate::error::CliResult;

/// Outcome of classifying runner output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Failure kind, when locator-related
    pub kind: Option<FailureKind>,
    /// Locator quoted in the output
    pub locator: Option<String>,
    /// Why the output was rejected
    pub reason: Option<String>,
}

/// Classify the output text
pub fn classify_output(output: &str) -> CliResult<Classification> {
    let classifier = FailureClassifier::new()?;
    match classifier.classify(output) {
        Ok(kind) => Ok(Classification {
            kind: Some(kind),
            locator: classifier.extract_locator(output),
            reason: None,
        }),
        Err(HealError::Classification { reason }) => Ok(Classification {
            kind: None,
            locator: None,
            reason: Some(reason),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Execute the classify command
pub fn execute_classify(args: &ClassifyArgs) -> CliResult<()> {
    let output = std::fs::read_to_string(&args.output)?;
    let classification = classify_output(&output)?;
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&classification)?),
        OutputFormat::Text => match (classification.kind, classification.reason) {
            (Some(kind), _) => match classification.locator {
                Some(locator) => println!("{kind} {locator}"),
                None => println!("{kind}"),
            },
            (None, reason) => println!(
                "not locator-related ({})",
                reason.as_deref().unwrap_or("unknown")
            ),
        },
    }
    Ok(())
}
