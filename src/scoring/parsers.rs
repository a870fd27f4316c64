//! Test-runner summary parsers.
//!
//! Each parser is a pure function from captured test output to
//! `(passed, total)`. They are tried in [`PARSER_CHAIN`] order and the first
//! one that recognizes the text wins.

use std::sync::OnceLock;

use regex::Regex;

/// A named summary parser.
pub type SummaryParser = fn(&str) -> Option<(usize, usize)>;

/// Parsers in priority order.
pub const PARSER_CHAIN: &[(&str, SummaryParser)] = &[
    ("passed-total", parse_passed_total),
    ("passed-failed", parse_passed_failed),
    ("pass-fail-markers", parse_markers),
    ("test-result", parse_test_result),
    ("tests-run", parse_tests_run),
    ("examples-failures", parse_examples),
];

/// Runs the chain and returns the first match with the parser's name.
pub fn parse_summary(text: &str) -> Option<(&'static str, usize, usize)> {
    PARSER_CHAIN
        .iter()
        .find_map(|(name, parser)| parser(text).map(|(p, t)| (*name, p, t)))
}

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn capture_num(caps: &regex::Captures<'_>, idx: usize) -> usize {
    caps.get(idx)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// `Tests: 1 failed, 3 passed, 4 total`
pub fn parse_passed_total(text: &str) -> Option<(usize, usize)> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = cached(&RE, r"(\d+) passed, (\d+) total")?;
    let caps = re.captures_iter(text).last()?;
    Some((capture_num(&caps, 1), capture_num(&caps, 2)))
}

/// `=== 2 failed, 3 passed, 1 error in 0.12s ===`
///
/// Uses the last line mentioning passed or failed counts. `test result:`
/// lines are left to [`parse_test_result`].
pub fn parse_passed_failed(text: &str) -> Option<(usize, usize)> {
    static PASSED: OnceLock<Option<Regex>> = OnceLock::new();
    static FAILED: OnceLock<Option<Regex>> = OnceLock::new();
    static ERRORS: OnceLock<Option<Regex>> = OnceLock::new();
    let passed_re = cached(&PASSED, r"(\d+) passed")?;
    let failed_re = cached(&FAILED, r"(\d+) failed")?;
    let errors_re = cached(&ERRORS, r"(\d+) errors?\b")?;

    let line = text.lines().rev().find(|line| {
        !line.contains("test result:") && (passed_re.is_match(line) || failed_re.is_match(line))
    })?;

    let count = |re: &Regex| {
        re.captures(line)
            .map(|caps| capture_num(&caps, 1))
            .unwrap_or(0)
    };
    let passed = count(passed_re);
    let failed = count(failed_re);
    let errors = count(errors_re);
    Some((passed, passed + failed + errors))
}

/// Per-test `--- PASS:` / `--- FAIL:` markers, falling back to an aggregate
/// `ok` / `PASS` / `FAIL` line.
pub fn parse_markers(text: &str) -> Option<(usize, usize)> {
    static OK_LINE: OnceLock<Option<Regex>> = OnceLock::new();
    let ok_re = cached(&OK_LINE, r"^ok\s")?;

    let mut pass = 0;
    let mut fail = 0;
    let mut aggregate_ok = false;
    let mut aggregate_fail = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("--- PASS:") {
            pass += 1;
        } else if trimmed.starts_with("--- FAIL:") {
            fail += 1;
        } else if line.starts_with("FAIL") {
            aggregate_fail = true;
        } else if line == "PASS" || ok_re.is_match(line) {
            aggregate_ok = true;
        }
    }

    if pass + fail > 0 {
        Some((pass, pass + fail))
    } else if aggregate_fail {
        Some((0, 1))
    } else if aggregate_ok {
        Some((1, 1))
    } else {
        None
    }
}

/// `test result: ok. 4 passed; 1 failed;`, summed over every test binary.
pub fn parse_test_result(text: &str) -> Option<(usize, usize)> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = cached(&RE, r"test result: (?:ok|FAILED)\. (\d+) passed; (\d+) failed;")?;

    let mut matched = false;
    let (mut passed, mut failed) = (0, 0);
    for caps in re.captures_iter(text) {
        matched = true;
        passed += capture_num(&caps, 1);
        failed += capture_num(&caps, 2);
    }
    matched.then_some((passed, passed + failed))
}

/// `Tests run: 5, Failures: 1, Errors: 0`, using the last (aggregate) line.
pub fn parse_tests_run(text: &str) -> Option<(usize, usize)> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = cached(&RE, r"Tests run: (\d+), Failures: (\d+), Errors: (\d+)")?;
    let caps = re.captures_iter(text).last()?;
    let total = capture_num(&caps, 1);
    let failed = capture_num(&caps, 2) + capture_num(&caps, 3);
    Some((total.saturating_sub(failed), total))
}

/// `12 examples, 2 failures`
pub fn parse_examples(text: &str) -> Option<(usize, usize)> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = cached(&RE, r"(\d+) examples?, (\d+) failures?")?;
    let caps = re.captures_iter(text).last()?;
    let total = capture_num(&caps, 1);
    Some((total.saturating_sub(capture_num(&caps, 2)), total))
}
