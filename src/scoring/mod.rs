//! Test oracle scoring.
//!
//! A finished workspace is scored in one of two mutually exclusive modes:
//!
//! - **I/O oracle** ([`io_oracle`]): each [`TestCase`] is fed to the
//!   language's run command on stdin and the printed output is compared with
//!   the expected value.
//! - **Native oracle** ([`native`]): the language's own test command is run
//!   and its summary output is parsed by the [`parsers`] chain.
//!
//! Either mode may be preceded by a pre-scoring (build) command. A failing
//! test is a normal result; only infrastructure failures surface as
//! [`ScoringError`].

pub mod io_oracle;
pub mod native;
pub mod parsers;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::LanguageProfile;
use crate::error::ScoringError;
use crate::workspace::{run_shell, truncate_chars, CASE_TIMEOUT, COMMAND_TIMEOUT};

pub use io_oracle::{compare_output, score_io, FLOAT_EPSILON};
pub use native::score_native;
pub use parsers::parse_summary;

/// Maximum characters of scoring output kept on a trial.
pub const MAX_OUTPUT_CHARS: usize = 5000;

/// Maximum characters of pre-scoring failure text kept.
pub const MAX_SETUP_FAILURE_CHARS: usize = 2000;

/// One input/output test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected: String,
    #[serde(default)]
    pub approx: bool,
}

/// Ordered test cases for one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestBank {
    pub tests: Vec<TestCase>,
}

impl TestBank {
    /// Loads a test bank from a `tests.json` file.
    pub fn load(path: &Path) -> Result<Self, ScoringError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ScoringError::TestBank {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ScoringError::TestBank {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

/// Pass/fail counts and human-readable output of one scoring run.
///
/// `passed <= total` always holds; `(0, 0)` means the native oracle could
/// not determine the counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub passed: usize,
    pub total: usize,
    pub output: String,
}

/// Which oracle scores a task.
#[derive(Debug, Clone)]
pub enum Oracle {
    Io(TestBank),
    Native {
        /// Size of the task's test bank, reported when the build step fails.
        declared_total: usize,
    },
}

impl Oracle {
    /// Total reported when scoring is short-circuited before any test runs.
    pub fn declared_total(&self) -> usize {
        match self {
            Oracle::Io(bank) => bank.len(),
            Oracle::Native { declared_total } => *declared_total,
        }
    }

    /// Converts an infrastructure failure into a zero score.
    ///
    /// The I/O oracle still reports its bank size; the native oracle reports
    /// the indeterminate `(0, 0)`.
    pub fn fault_result(&self, err: &ScoringError) -> ScoreResult {
        let total = match self {
            Oracle::Io(bank) => bank.len(),
            Oracle::Native { .. } => 0,
        };
        ScoreResult {
            passed: 0,
            total,
            output: format!("scoring failed: {}", err),
        }
    }
}

/// Timeouts applied while scoring.
#[derive(Debug, Clone)]
pub struct ScorerConfig {
    /// Per-case timeout for the I/O oracle.
    pub case_timeout: Duration,
    /// Timeout for the pre-scoring and test commands.
    pub command_timeout: Duration,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            case_timeout: CASE_TIMEOUT,
            command_timeout: COMMAND_TIMEOUT,
        }
    }
}

impl ScorerConfig {
    pub fn with_case_timeout(mut self, timeout: Duration) -> Self {
        self.case_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// Scores finished workspaces.
#[derive(Debug, Clone, Default)]
pub struct Scorer {
    config: ScorerConfig,
}

impl Scorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    /// Scores `workspace` with the given oracle.
    pub async fn score(
        &self,
        workspace: &Path,
        profile: &LanguageProfile,
        oracle: &Oracle,
    ) -> Result<ScoreResult, ScoringError> {
        if !workspace.is_dir() {
            return Err(ScoringError::MissingWorkspace(workspace.to_path_buf()));
        }

        if let Some(command) = &profile.pre_scoring_command {
            if let Some(failure) = self.run_pre_scoring(workspace, command).await {
                warn!(language = %profile.id, "Pre-scoring command failed");
                return Ok(ScoreResult {
                    passed: 0,
                    total: oracle.declared_total(),
                    output: format!(
                        "Setup failed: {}",
                        truncate_chars(&failure, MAX_SETUP_FAILURE_CHARS)
                    ),
                });
            }
        }

        let result = match oracle {
            Oracle::Io(bank) => {
                score_io(workspace, &profile.run_command, bank, self.config.case_timeout).await
            }
            Oracle::Native { .. } => {
                score_native(workspace, &profile.test_command, self.config.command_timeout).await?
            }
        };

        info!(
            language = %profile.id,
            passed = result.passed,
            total = result.total,
            "Scoring complete"
        );
        Ok(result)
    }

    /// Like [`Scorer::score`], but records an infrastructure failure as a
    /// zero score instead of returning it.
    pub async fn score_or_fault(
        &self,
        workspace: &Path,
        profile: &LanguageProfile,
        oracle: &Oracle,
    ) -> ScoreResult {
        match self.score(workspace, profile, oracle).await {
            Ok(result) => result,
            Err(e) => {
                warn!(language = %profile.id, error = %e, "Scoring failed");
                oracle.fault_result(&e)
            }
        }
    }

    /// Returns the failure text if the pre-scoring command did not succeed.
    async fn run_pre_scoring(&self, workspace: &Path, command: &str) -> Option<String> {
        match run_shell(command, workspace, None, self.config.command_timeout).await {
            Ok(output) if output.success() => None,
            Ok(output) => {
                let diagnostic = output.diagnostic().trim();
                Some(if diagnostic.is_empty() {
                    format!("`{}` exited with code {}", command, output.code())
                } else {
                    diagnostic.to_string()
                })
            }
            Err(e) => Some(e.to_string()),
        }
    }
}

/// Keeps the last `max_chars` characters of `text`, dropping whole lines
/// from the front first.
///
/// When no line boundary leaves a non-empty tail inside the budget, the
/// plain character tail is kept instead.
pub fn keep_tail_lines(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let start = match text.char_indices().rev().nth(max_chars - 1) {
        Some((idx, _)) if idx > 0 => idx,
        _ => return text.to_string(),
    };
    if text.as_bytes()[start - 1] == b'\n' {
        return text[start..].to_string();
    }

    let window = &text[start..];
    match window.find('\n') {
        Some(offset) if !window[offset + 1..].trim_end_matches('\n').is_empty() => {
            window[offset + 1..].to_string()
        }
        _ => window.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn profile(run: &str, pre: Option<&str>) -> LanguageProfile {
        LanguageProfile {
            id: "sh".to_string(),
            run_command: run.to_string(),
            test_command: "true".to_string(),
            pre_trial_command: None,
            pre_scoring_command: pre.map(str::to_string),
            test_framework: None,
        }
    }

    fn bank(n: usize) -> TestBank {
        TestBank {
            tests: (0..n)
                .map(|i| TestCase {
                    input: format!("{} 1\n", i),
                    expected: format!("{}", i + 1),
                    approx: false,
                })
                .collect(),
        }
    }

    #[test]
    fn test_bank_parses_optional_approx() {
        let bank: TestBank = serde_json::from_str(
            r#"{"tests":[{"input":"1 2\n","expected":"3"},{"input":"","expected":"0.5","approx":true}]}"#,
        )
        .unwrap();
        assert_eq!(bank.len(), 2);
        assert!(!bank.tests[0].approx);
        assert!(bank.tests[1].approx);
    }

    #[test]
    fn test_bank_load_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tests.json");
        assert!(matches!(TestBank::load(&path), Err(ScoringError::TestBank { .. })));
        std::fs::write(&path, "{\"tests\": 3}").unwrap();
        assert!(matches!(TestBank::load(&path), Err(ScoringError::TestBank { .. })));
    }

    #[test]
    fn test_keep_tail_drops_oldest_lines() {
        let text = "summary\nline one\nline two";
        assert_eq!(keep_tail_lines(text, 100), text);
        assert_eq!(keep_tail_lines(text, 17), "line one\nline two");
        assert_eq!(keep_tail_lines(text, 8), "line two");
        assert_eq!(keep_tail_lines(text, 3), "two");
        assert_eq!(keep_tail_lines("abcdef", 2), "ef");
    }

    #[test]
    fn test_keep_tail_bounds_length() {
        let text: String = (0..2000).map(|i| format!("  PASS [{}]: ok\n", i)).collect();
        let kept = keep_tail_lines(&text, MAX_OUTPUT_CHARS);
        assert!(kept.chars().count() <= MAX_OUTPUT_CHARS);
        assert!(kept.ends_with("  PASS [1999]: ok\n"));
    }

    #[test]
    fn test_keep_tail_long_last_line_with_trailing_newline() {
        let text = format!("a\n{}\n", "y".repeat(6000));
        let kept = keep_tail_lines(&text, MAX_OUTPUT_CHARS);
        assert_eq!(kept.chars().count(), MAX_OUTPUT_CHARS);
        assert_eq!(kept, format!("{}\n", "y".repeat(MAX_OUTPUT_CHARS - 1)));
    }

    #[test]
    fn test_keep_tail_large_output_is_linear() {
        let text: String = (0..200_000).map(|i| format!("line {:>14}\n", i)).collect();
        let started = std::time::Instant::now();
        let kept = keep_tail_lines(&text, MAX_OUTPUT_CHARS);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert!(kept.chars().count() <= MAX_OUTPUT_CHARS);
        assert!(kept.starts_with("line "));
        assert!(kept.ends_with(&format!("line {:>14}\n", 199_999)));
    }

    #[test]
    fn test_keep_tail_unicode_boundaries() {
        let text = "ééé\nüüüü";
        assert_eq!(keep_tail_lines(text, 5), "üüüü");
        assert_eq!(keep_tail_lines(text, 2), "üü");
    }

    #[test]
    fn test_fault_result_by_mode() {
        let err = ScoringError::UnknownLanguage("cobol".into());
        let io = Oracle::Io(bank(4)).fault_result(&err);
        assert_eq!((io.passed, io.total), (0, 4));
        assert!(io.output.starts_with("scoring failed: "));

        let native = Oracle::Native { declared_total: 4 }.fault_result(&err);
        assert_eq!((native.passed, native.total), (0, 0));
    }

    #[tokio::test]
    async fn test_pre_scoring_failure_short_circuits() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let run = format!("touch {}; cat", marker.display());
        let scorer = Scorer::default();
        let result = scorer
            .score(
                dir.path(),
                &profile(&run, Some("echo 'compile error' >&2; exit 1")),
                &Oracle::Io(bank(3)),
            )
            .await
            .unwrap();
        assert_eq!((result.passed, result.total), (0, 3));
        assert_eq!(result.output, "Setup failed: compile error");
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_pre_scoring_success_then_cases() {
        let dir = TempDir::new().unwrap();
        let scorer = Scorer::new(ScorerConfig::default().with_case_timeout(Duration::from_secs(10)));
        let result = scorer
            .score(
                dir.path(),
                &profile("read a b; echo $((a + b))", Some("true")),
                &Oracle::Io(bank(2)),
            )
            .await
            .unwrap();
        assert_eq!((result.passed, result.total), (2, 2));
    }

    #[tokio::test]
    async fn test_missing_workspace_is_fault() {
        let err = Scorer::default()
            .score(Path::new("/no/such/ws"), &profile("cat", None), &Oracle::Io(bank(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ScoringError::MissingWorkspace(_)));
    }

    #[tokio::test]
    async fn test_score_or_fault_records_text() {
        let result = Scorer::default()
            .score_or_fault(Path::new("/no/such/ws"), &profile("cat", None), &Oracle::Io(bank(2)))
            .await;
        assert_eq!((result.passed, result.total), (0, 2));
        assert!(result.output.starts_with("scoring failed: workspace not available"));
    }
}
