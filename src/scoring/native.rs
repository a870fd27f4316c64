//! Native test-runner oracle: run the language's own test command and read
//! pass/fail counts from its summary output.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use super::parsers::parse_summary;
use super::{keep_tail_lines, ScoreResult, MAX_OUTPUT_CHARS};
use crate::error::ScoringError;
use crate::workspace::run_shell;

/// Runs `test_command` and parses its combined output.
///
/// A non-zero exit is expected when tests fail and is not an error. Output
/// that no parser recognizes yields the indeterminate `(0, 0)`.
pub async fn score_native(
    workspace: &Path,
    test_command: &str,
    timeout: Duration,
) -> Result<ScoreResult, ScoringError> {
    let output = run_shell(test_command, workspace, None, timeout).await?;
    let combined = output.combined();
    debug!(exit_code = output.code(), bytes = combined.len(), "Test command finished");

    let (passed, total, summary) = match parse_summary(&combined) {
        Some((parser, passed, total)) => {
            info!(parser, passed, total, "Parsed test summary");
            (passed, total, format!("{}/{} tests passed", passed, total))
        }
        None => (
            0,
            0,
            "could not determine test counts from test output".to_string(),
        ),
    };

    let budget = MAX_OUTPUT_CHARS.saturating_sub(summary.chars().count() + 1);
    let tail = keep_tail_lines(&combined, budget);
    Ok(ScoreResult {
        passed,
        total,
        output: format!("{}\n{}", summary, tail),
    })
}
