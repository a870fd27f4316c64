//! Input/output oracle: pipe each case's input to the run command and
//! compare what it prints with the expected output.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use super::{keep_tail_lines, ScoreResult, TestBank, TestCase, MAX_OUTPUT_CHARS};
use crate::workspace::{run_shell, truncate_chars};

/// Absolute tolerance for `approx` comparisons.
pub const FLOAT_EPSILON: f64 = 1e-9;

/// Maximum characters of error text kept per failed case.
pub const MAX_CASE_ERROR_CHARS: usize = 500;

/// Compares actual and expected output.
///
/// Leading and trailing whitespace is ignored; internal whitespace is
/// significant. Under `approx` both sides must parse as floats and differ by
/// less than [`FLOAT_EPSILON`].
pub fn compare_output(actual: &str, expected: &str, approx: bool) -> bool {
    let actual = actual.trim();
    let expected = expected.trim();
    if approx {
        match (actual.parse::<f64>(), expected.parse::<f64>()) {
            (Ok(a), Ok(e)) => (a - e).abs() < FLOAT_EPSILON,
            _ => false,
        }
    } else {
        actual == expected
    }
}

#[derive(Debug)]
enum CaseOutcome {
    Pass(String),
    Mismatch(String),
    Error(String),
}

async fn run_case(workspace: &Path, run_command: &str, case: &TestCase, timeout: Duration) -> CaseOutcome {
    match run_shell(run_command, workspace, Some(&case.input), timeout).await {
        Ok(output) if output.success() => {
            let actual = output.stdout.trim().to_string();
            if compare_output(&output.stdout, &case.expected, case.approx) {
                CaseOutcome::Pass(actual)
            } else {
                CaseOutcome::Mismatch(actual)
            }
        }
        Ok(output) => {
            let diagnostic = output.diagnostic().trim();
            let message = if diagnostic.is_empty() {
                format!("exited with code {}", output.code())
            } else {
                diagnostic.to_string()
            };
            CaseOutcome::Error(truncate_chars(&message, MAX_CASE_ERROR_CHARS))
        }
        Err(e) => CaseOutcome::Error(truncate_chars(&e.to_string(), MAX_CASE_ERROR_CHARS)),
    }
}

fn json_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("{:?}", s))
}

/// Runs every case in `bank` sequentially.
pub async fn score_io(
    workspace: &Path,
    run_command: &str,
    bank: &TestBank,
    case_timeout: Duration,
) -> ScoreResult {
    let total = bank.len();
    let mut passed = 0;
    let mut lines = Vec::with_capacity(total);

    for (idx, case) in bank.tests.iter().enumerate() {
        let n = idx + 1;
        let prefix = format!(
            "input={} expected={}",
            json_str(&case.input),
            json_str(&case.expected)
        );
        let line = match run_case(workspace, run_command, case, case_timeout).await {
            CaseOutcome::Pass(actual) => {
                passed += 1;
                format!("  PASS [{}]: {} got={}", n, prefix, json_str(&actual))
            }
            CaseOutcome::Mismatch(actual) => {
                format!("  FAIL [{}]: {} got={}", n, prefix, json_str(&actual))
            }
            CaseOutcome::Error(error) => format!("  FAIL [{}]: {} error={}", n, prefix, error),
        };
        debug!(case = n, "{}", line.trim_start());
        lines.push(line);
    }

    let mut trace = format!("{}/{} tests passed", passed, total);
    for line in &lines {
        trace.push('\n');
        trace.push_str(line);
    }

    ScoreResult {
        passed,
        total,
        output: keep_tail_lines(&trace, MAX_OUTPUT_CHARS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SUM: &str = "read a b; echo $((a + b))";

    fn case(input: &str, expected: &str) -> TestCase {
        TestCase {
            input: input.to_string(),
            expected: expected.to_string(),
            approx: false,
        }
    }

    #[test]
    fn test_exact_comparison_trims_outer_whitespace_only() {
        assert!(compare_output(" 3 \n", "3", false));
        assert!(!compare_output("3 4", "34", false));
        assert!(compare_output("a\n b", "a\n b\n", false));
    }

    #[test]
    fn test_approx_comparison() {
        assert!(compare_output("1.0000000005", "1.0", true));
        assert!(!compare_output("1.00000005", "1.0", true));
        assert!(compare_output(" 2.5\n", "2.5", true));
        assert!(!compare_output("abc", "1.0", true));
        assert!(!compare_output("1.0", "", true));
    }

    #[tokio::test]
    async fn test_sum_oracle_passes() {
        let dir = TempDir::new().unwrap();
        let bank = TestBank {
            tests: vec![case("1 2\n", "3"), case("10 -4\n", "6")],
        };
        let result = score_io(dir.path(), SUM, &bank, Duration::from_secs(10)).await;
        assert_eq!((result.passed, result.total), (2, 2));
        assert!(result.output.starts_with("2/2 tests passed\n  PASS [1]: input=\"1 2\\n\" expected=\"3\" got=\"3\""));
    }

    #[tokio::test]
    async fn test_mismatch_and_error_are_failures() {
        let dir = TempDir::new().unwrap();
        let bank = TestBank {
            tests: vec![case("1 2\n", "4")],
        };
        let result = score_io(dir.path(), SUM, &bank, Duration::from_secs(10)).await;
        assert_eq!((result.passed, result.total), (0, 1));
        assert!(result.output.contains("FAIL [1]") && result.output.contains("got=\"3\""));

        let result = score_io(dir.path(), "echo kaboom >&2; exit 2", &bank, Duration::from_secs(10)).await;
        assert_eq!(result.passed, 0);
        assert!(result.output.contains("error=kaboom"));
    }

    #[tokio::test]
    async fn test_case_timeout_is_failure() {
        let dir = TempDir::new().unwrap();
        let bank = TestBank {
            tests: vec![case("", "")],
        };
        let result = score_io(dir.path(), "sleep 5", &bank, Duration::from_millis(200)).await;
        assert_eq!((result.passed, result.total), (0, 1));
        assert!(result.output.contains("error=timed out"));
    }

    #[tokio::test]
    async fn test_long_errors_are_truncated() {
        let dir = TempDir::new().unwrap();
        let bank = TestBank {
            tests: vec![case("", "x")],
        };
        let cmd = "printf 'e%.0s' $(seq 1 2000) >&2; exit 1";
        let result = score_io(dir.path(), cmd, &bank, Duration::from_secs(10)).await;
        let error = result.output.split("error=").nth(1).unwrap();
        assert_eq!(error.chars().count(), MAX_CASE_ERROR_CHARS);
    }
}
