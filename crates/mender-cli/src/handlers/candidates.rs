//! Candidates command handler

use mender::{CandidateGenerator, ElementInfo, Locator};

use crate::commands::CandidatesArgs;
use crate::error::{CliError, CliResult};
use crate::handlers::read_json;
use crate::output::render_candidates;

/// Execute the candidates command
pub fn execute_candidates(args: &CandidatesArgs) -> CliResult<()> {
    if args.max == 0 {
        return Err(CliError::invalid_argument("--max must be at least 1"));
    }
    let element: ElementInfo = read_json(&args.element)?;
    let exclude = args.exclude.as_deref().map(Locator::parse).transpose()?;
    let candidates = CandidateGenerator::new(args.max).generate(None, &element, exclude.as_ref());
    print!("{}", render_candidates(&candidates, args.format)?);
    Ok(())
}
