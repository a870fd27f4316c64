//! Run ledger: the persisted collection of trial results for one run.
//!
//! A ledger is built either fresh, by appending one [`TrialResult`] per
//! completed trial, or by [`reconstruct`]ing it from the transcripts left in
//! a run directory and merging with a previously persisted ledger.

pub mod reconstruct;

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::LedgerError;
use crate::scoring::ScoreResult;
use crate::session::{Outcome, TrialStatus, DEFAULT_ALLOWED_TOOLS};

pub use reconstruct::{discover_trials, reconstruct, DiscoveredTrial, ReconstructContext, ReconstructOptions};

/// File name of the persisted ledger inside a run directory.
pub const LEDGER_FILE: &str = "run.json";

/// Unique identity of a trial within a ledger.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrialKey {
    pub task_id: String,
    pub language: String,
    pub trial: u32,
}

impl TrialKey {
    pub fn new(task_id: impl Into<String>, language: impl Into<String>, trial: u32) -> Self {
        Self {
            task_id: task_id.into(),
            language: language.into(),
            trial,
        }
    }

    /// Relative directory of this trial inside a run directory.
    pub fn relative_dir(&self) -> std::path::PathBuf {
        Path::new(&self.task_id)
            .join(&self.language)
            .join(format!("trial-{}", self.trial))
    }
}

impl fmt::Display for TrialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/trial-{}", self.task_id, self.language, self.trial)
    }
}

/// Benchmark settings shared by every trial of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub model: String,
    pub max_turns: u32,
    pub max_budget_usd: f64,
    pub trials: u32,
    pub allowed_tools: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            max_turns: 60,
            max_budget_usd: 5.0,
            trials: 3,
            allowed_tools: DEFAULT_ALLOWED_TOOLS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl RunConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_max_budget_usd(mut self, budget: f64) -> Self {
        self.max_budget_usd = budget;
        self
    }

    pub fn with_trials(mut self, trials: u32) -> Self {
        self.trials = trials;
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }
}

/// The recorded result of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialResult {
    pub task_id: String,
    pub language: String,
    pub trial: u32,
    pub status: TrialStatus,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub turns: u64,
    pub duration_ms: u64,
    pub tests_passed: usize,
    pub tests_total: usize,
    pub test_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_text: Option<String>,
}

impl TrialResult {
    /// Composes a result from its parts.
    pub fn new(key: &TrialKey, outcome: &Outcome, score: ScoreResult) -> Self {
        Self {
            task_id: key.task_id.clone(),
            language: key.language.clone(),
            trial: key.trial,
            status: outcome.status,
            cost_usd: outcome.cost_usd,
            input_tokens: outcome.input_tokens,
            output_tokens: outcome.output_tokens,
            turns: outcome.turns,
            duration_ms: outcome.duration_ms,
            tests_passed: score.passed,
            tests_total: score.total,
            test_output: score.output,
            review_score: None,
            review_text: None,
        }
    }

    pub fn with_review(mut self, score: Option<u8>, text: Option<String>) -> Self {
        self.review_score = score;
        self.review_text = text;
        self
    }

    pub fn key(&self) -> TrialKey {
        TrialKey::new(&self.task_id, &self.language, self.trial)
    }

    /// One-line summary printed after each trial.
    pub fn summary_line(&self) -> String {
        let review = match self.review_score {
            Some(score) => format!("{}/100", score),
            None => "n/a".to_string(),
        };
        format!(
            "-> {}/{} tests passed | ${:.4} | {} turns | {:.1}s | review: {}",
            self.tests_passed,
            self.tests_total,
            self.cost_usd,
            self.turns,
            self.duration_ms as f64 / 1000.0,
            review
        )
    }
}

/// Aggregates for one language across a ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageSummary {
    pub language: String,
    pub trials: usize,
    pub successes: usize,
    pub tests_passed: usize,
    pub tests_total: usize,
    pub mean_cost_usd: f64,
}

/// All trial results of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLedger {
    pub id: String,
    pub timestamp: String,
    pub config: RunConfig,
    pub results: Vec<TrialResult>,
}

impl RunLedger {
    /// Creates an empty ledger stamped with the current time.
    pub fn new(id: impl Into<String>, config: RunConfig) -> Self {
        Self {
            id: id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            config,
            results: Vec::new(),
        }
    }

    /// Appends a result, rejecting a duplicate identity.
    pub fn append(&mut self, result: TrialResult) -> Result<(), LedgerError> {
        let key = result.key();
        if self.results.iter().any(|r| r.key() == key) {
            return Err(LedgerError::DuplicateTrial(key.to_string()));
        }
        self.results.push(result);
        Ok(())
    }

    pub fn get(&self, key: &TrialKey) -> Option<&TrialResult> {
        self.results.iter().find(|r| &r.key() == key)
    }

    /// Results indexed by identity.
    pub fn index(&self) -> BTreeMap<TrialKey, &TrialResult> {
        self.results.iter().map(|r| (r.key(), r)).collect()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Per-language aggregates, ordered by language id.
    pub fn summary_by_language(&self) -> Vec<LanguageSummary> {
        let mut groups: BTreeMap<&str, Vec<&TrialResult>> = BTreeMap::new();
        for result in &self.results {
            groups.entry(result.language.as_str()).or_default().push(result);
        }
        groups
            .into_iter()
            .map(|(language, results)| {
                let trials = results.len();
                let total_cost: f64 = results.iter().map(|r| r.cost_usd).sum();
                LanguageSummary {
                    language: language.to_string(),
                    trials,
                    successes: results
                        .iter()
                        .filter(|r| r.status == TrialStatus::Success)
                        .count(),
                    tests_passed: results.iter().map(|r| r.tests_passed).sum(),
                    tests_total: results.iter().map(|r| r.tests_total).sum(),
                    mean_cost_usd: if trials == 0 { 0.0 } else { total_cost / trials as f64 },
                }
            })
            .collect()
    }

    /// Reads a ledger from disk.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Loads the ledger if the file exists.
    pub fn load_if_exists(path: &Path) -> Result<Option<Self>, LedgerError> {
        if path.is_file() {
            Self::load(path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Writes the ledger atomically: a temporary file in the same directory
    /// is renamed over `path`.
    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        let persist_err = |reason: String| LedgerError::Persist {
            path: path.to_path_buf(),
            reason,
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| persist_err(e.error.to_string()))?;

        info!(path = %path.display(), results = self.results.len(), "Ledger saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(task: &str, lang: &str, trial: u32) -> TrialResult {
        TrialResult {
            task_id: task.into(),
            language: lang.into(),
            trial,
            status: TrialStatus::Success,
            cost_usd: 0.25,
            input_tokens: 100,
            output_tokens: 20,
            turns: 4,
            duration_ms: 1500,
            tests_passed: 2,
            tests_total: 3,
            test_output: "2/3 tests passed".into(),
            review_score: None,
            review_text: None,
        }
    }

    #[test]
    fn test_append_rejects_duplicates() {
        let mut ledger = RunLedger::new("r1", RunConfig::default());
        ledger.append(sample("add", "rust", 1)).unwrap();
        ledger.append(sample("add", "rust", 2)).unwrap();
        let err = ledger.append(sample("add", "rust", 1)).unwrap_err();
        assert_eq!(err.to_string(), "duplicate trial add/rust/trial-1 in ledger");
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_serialized_field_names() {
        let mut ledger = RunLedger::new("r1", RunConfig::default());
        ledger.append(sample("add", "rust", 1)).unwrap();
        let value = serde_json::to_value(&ledger).unwrap();
        let result = &value["results"][0];
        assert_eq!(result["taskId"], "add");
        assert_eq!(result["testsPassed"], 2);
        assert_eq!(result["status"], "success");
        assert!(result.get("reviewScore").is_none());
        assert_eq!(value["config"]["maxBudgetUsd"], 5.0);
        assert_eq!(value["config"]["allowedTools"][0], "Read");
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(LEDGER_FILE);
        let mut ledger = RunLedger::new("r1", RunConfig::default().with_trials(1));
        ledger
            .append(sample("add", "go", 1).with_review(Some(80), Some("tidy".into())))
            .unwrap();
        ledger.save(&path).unwrap();

        let loaded = RunLedger::load(&path).unwrap();
        assert_eq!(loaded, ledger);
        assert!(RunLedger::load_if_exists(&dir.path().join("none.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_summary_line() {
        let line = sample("add", "go", 1).summary_line();
        assert_eq!(line, "-> 2/3 tests passed | $0.2500 | 4 turns | 1.5s | review: n/a");
        let line = sample("add", "go", 1)
            .with_review(Some(72), None)
            .summary_line();
        assert!(line.ends_with("review: 72/100"));
    }

    #[test]
    fn test_summary_by_language() {
        let mut ledger = RunLedger::new("r1", RunConfig::default());
        ledger.append(sample("add", "go", 1)).unwrap();
        let mut failed = sample("add", "go", 2);
        failed.status = TrialStatus::Error;
        failed.cost_usd = 0.75;
        ledger.append(failed).unwrap();
        ledger.append(sample("add", "python", 1)).unwrap();

        let summary = ledger.summary_by_language();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].language, "go");
        assert_eq!(summary[0].trials, 2);
        assert_eq!(summary[0].successes, 1);
        assert_eq!(summary[0].tests_passed, 4);
        assert!((summary[0].mean_cost_usd - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_trial_key_layout() {
        let key = TrialKey::new("add", "rust", 3);
        assert_eq!(key.relative_dir(), Path::new("add/rust/trial-3"));
    }
}
