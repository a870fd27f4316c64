//! Rebuilding a ledger from the transcripts left in a run directory.
//!
//! Trial identities come from the directory layout
//! `<run dir>/<task>/<language>/trial-<n>/transcript.jsonl`; only trials
//! found there survive. Outcome fields are always recomputed from the
//! transcript. Scoring, review and duration are each either recomputed or
//! copied forward from the prior ledger, so rebuilding is idempotent aside
//! from the timestamp.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{RunConfig, RunLedger, TrialKey, TrialResult};
use crate::catalog::{Catalog, TaskConfig, TaskLanguage};
use crate::error::{LedgerError, ReviewError, ScoringError};
use crate::review::{review_fields, ReviewRequest, Reviewer};
use crate::scoring::{ScoreResult, Scorer};
use crate::session::{replay_transcript, DurationFallback, Outcome, TRANSCRIPT_FILE};
use crate::workspace::RETAINED_WORKSPACE_DIR;

/// Which steps are recomputed during reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconstructOptions {
    pub score: bool,
    pub review: bool,
    /// Recompute durations from the transcripts instead of keeping prior values.
    pub duration: bool,
    /// Skip an enabled step for entries that already have a value.
    pub only_missing: bool,
}

impl Default for ReconstructOptions {
    fn default() -> Self {
        Self {
            score: true,
            review: true,
            duration: true,
            only_missing: false,
        }
    }
}

impl ReconstructOptions {
    pub fn with_score(mut self, enabled: bool) -> Self {
        self.score = enabled;
        self
    }

    pub fn with_review(mut self, enabled: bool) -> Self {
        self.review = enabled;
        self
    }

    pub fn with_duration(mut self, enabled: bool) -> Self {
        self.duration = enabled;
        self
    }

    pub fn with_only_missing(mut self, only_missing: bool) -> Self {
        self.only_missing = only_missing;
        self
    }
}

/// Collaborators used while reconstructing.
#[derive(Default)]
pub struct ReconstructContext {
    catalog: Option<Catalog>,
    scorer: Scorer,
    reviewer: Option<Arc<dyn Reviewer>>,
    options: ReconstructOptions,
}

impl ReconstructContext {
    pub fn new(options: ReconstructOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_scorer(mut self, scorer: Scorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_reviewer(mut self, reviewer: Arc<dyn Reviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    pub fn options(&self) -> ReconstructOptions {
        self.options
    }

    fn resolve(&self, key: &TrialKey) -> Result<(&TaskConfig, &TaskLanguage), ScoringError> {
        let task = self
            .catalog
            .as_ref()
            .and_then(|c| c.task(&key.task_id))
            .ok_or_else(|| ScoringError::UnknownTask(key.task_id.clone()))?;
        let language = task
            .language(&key.language)
            .ok_or_else(|| ScoringError::UnknownLanguage(key.language.clone()))?;
        Ok((task, language))
    }

    async fn score(&self, key: &TrialKey, workspace: &Path) -> ScoreResult {
        let resolved = self.resolve(key).and_then(|(task, language)| {
            task.oracle().map(|oracle| (language, oracle))
        });
        match resolved {
            Ok((language, oracle)) => {
                self.scorer
                    .score_or_fault(workspace, &language.profile, &oracle)
                    .await
            }
            Err(e) => {
                warn!(trial = %key, error = %e, "Cannot score trial");
                ScoreResult {
                    passed: 0,
                    total: 0,
                    output: format!("scoring failed: {}", e),
                }
            }
        }
    }

    async fn review(
        &self,
        reviewer: &dyn Reviewer,
        key: &TrialKey,
        workspace: &Path,
        prior_score: Option<u8>,
    ) -> (Option<u8>, Option<String>) {
        let request = match self.resolve(key) {
            Ok((task, language)) => {
                if workspace.is_dir() {
                    ReviewRequest::for_task(task, language, workspace)
                } else {
                    Err(ReviewError::MissingContext(format!(
                        "workspace {} not found",
                        workspace.display()
                    )))
                }
            }
            Err(e) => Err(ReviewError::MissingContext(e.to_string())),
        };
        review_fields(reviewer, request, prior_score).await
    }
}

/// A trial found in a run directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredTrial {
    pub key: TrialKey,
    pub trial_dir: PathBuf,
    pub transcript: PathBuf,
}

/// Finds every `<task>/<language>/trial-<n>` directory holding a transcript,
/// ordered by task, language and numeric trial index.
pub fn discover_trials(run_dir: &Path) -> Result<Vec<DiscoveredTrial>, LedgerError> {
    if !run_dir.is_dir() {
        return Err(LedgerError::RunDirMissing(run_dir.to_path_buf()));
    }

    let mut trials = Vec::new();
    for entry in WalkDir::new(run_dir).min_depth(3).max_depth(3) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Unreadable entry in run directory, skipping");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let Some(key) = trial_key(run_dir, entry.path()) else {
            continue;
        };
        let transcript = entry.path().join(TRANSCRIPT_FILE);
        if !transcript.is_file() {
            debug!(trial = %key, "No transcript, skipping");
            continue;
        }
        trials.push(DiscoveredTrial {
            key,
            trial_dir: entry.path().to_path_buf(),
            transcript,
        });
    }
    // `trial-01` and `trial-1` name the same trial; the canonical spelling wins.
    trials.sort_by_cached_key(|t| {
        let canonical = t.trial_dir == run_dir.join(t.key.relative_dir());
        (t.key.clone(), !canonical, t.trial_dir.clone())
    });
    trials.dedup_by(|later, kept| {
        let duplicate = later.key == kept.key;
        if duplicate {
            warn!(
                trial = %kept.key,
                ignored = %later.trial_dir.display(),
                "Duplicate trial directory, skipping"
            );
        }
        duplicate
    });
    Ok(trials)
}

fn trial_key(run_dir: &Path, trial_dir: &Path) -> Option<TrialKey> {
    let rel = trial_dir.strip_prefix(run_dir).ok()?;
    let mut parts = rel.iter().filter_map(|p| p.to_str());
    let task = parts.next()?;
    let language = parts.next()?;
    let trial = parts.next()?.strip_prefix("trial-")?.parse().ok()?;
    Some(TrialKey::new(task, language, trial))
}

/// Rebuilds the ledger for `run_dir`, merging with `prior` when given.
pub async fn reconstruct(
    run_dir: &Path,
    prior: Option<&RunLedger>,
    ctx: &ReconstructContext,
) -> Result<RunLedger, LedgerError> {
    let trials = discover_trials(run_dir)?;
    let options = ctx.options;
    let prior_index = prior.map(RunLedger::index).unwrap_or_default();

    let id = match prior {
        Some(ledger) => ledger.id.clone(),
        None => run_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("run")
            .to_string(),
    };
    let config = prior.map(|l| l.config.clone()).unwrap_or_else(RunConfig::default);
    let mut ledger = RunLedger::new(id, config);

    info!(
        run_dir = %run_dir.display(),
        trials = trials.len(),
        prior = prior.map_or(0, RunLedger::len),
        "Reconstructing ledger"
    );

    for trial in trials {
        let key = &trial.key;
        let previous = prior_index.get(key).copied();
        let workspace = trial.trial_dir.join(RETAINED_WORKSPACE_DIR);

        let mut outcome = match replay_transcript(&trial.transcript) {
            Ok(replay) => replay.outcome,
            Err(e) => {
                warn!(trial = %key, error = %e, "Failed to read transcript");
                None
            }
        }
        .unwrap_or_else(|| {
            Outcome::error(DurationFallback::FileTimes(trial.transcript.clone()).resolve())
        });

        if !options.duration {
            outcome.duration_ms = previous.map_or(0, |p| p.duration_ms);
        }

        let has_score = previous.map_or(false, |p| p.tests_total > 0);
        let score = if options.score && !(options.only_missing && has_score) {
            ctx.score(key, &workspace).await
        } else {
            previous.map(prior_score).unwrap_or_default()
        };

        let prior_review = previous.map_or((None, None), |p| (p.review_score, p.review_text.clone()));
        let has_review = prior_review.0.is_some();
        let (review_score, review_text) = match &ctx.reviewer {
            Some(reviewer) if options.review && !(options.only_missing && has_review) => {
                ctx.review(reviewer.as_ref(), key, &workspace, prior_review.0)
                    .await
            }
            _ => prior_review,
        };

        let result =
            TrialResult::new(key, &outcome, score).with_review(review_score, review_text);
        debug!(trial = %key, "{}", result.summary_line());
        if let Err(e) = ledger.append(result) {
            warn!(trial = %key, error = %e, "Skipping trial");
        }
    }

    if let Some(prior) = prior {
        let dropped = prior.results.iter().filter(|r| ledger.get(&r.key()).is_none()).count();
        if dropped > 0 {
            info!(dropped, "Dropped ledger entries without a transcript");
        }
    }

    Ok(ledger)
}

fn prior_score(result: &TrialResult) -> ScoreResult {
    ScoreResult {
        passed: result.tests_passed,
        total: result.tests_total,
        output: result.test_output.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TrialStatus;
    use std::fs;
    use tempfile::TempDir;

    const TRANSCRIPT: &str = concat!(
        r#"{"type":"system","subtype":"init","session_id":"s1","tools":["Bash"]}"#,
        "\n",
        r#"{"type":"assistant","message":{"content":[{"type":"text","text":"working"}]}}"#,
        "\n",
        r#"{"type":"result","subtype":"success","num_turns":4,"total_cost_usd":0.5,"duration_ms":9000,"modelUsage":{"m":{"inputTokens":100,"outputTokens":40}}}"#,
        "\n",
    );

    fn write_trial(run_dir: &Path, rel: &str, transcript: &str) {
        let dir = run_dir.join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(TRANSCRIPT_FILE), transcript).unwrap();
    }

    fn transcript_only() -> ReconstructContext {
        ReconstructContext::new(ReconstructOptions::default().with_score(false).with_review(false))
    }

    fn prior_entry(key: &TrialKey) -> TrialResult {
        TrialResult {
            task_id: key.task_id.clone(),
            language: key.language.clone(),
            trial: key.trial,
            status: TrialStatus::Error,
            cost_usd: 9.0,
            input_tokens: 1,
            output_tokens: 1,
            turns: 1,
            duration_ms: 1234,
            tests_passed: 2,
            tests_total: 3,
            test_output: "2/3 tests passed".into(),
            review_score: Some(80),
            review_text: Some("tidy".into()),
        }
    }

    #[test]
    fn test_discover_orders_trials_numerically() {
        let run = TempDir::new().unwrap();
        write_trial(run.path(), "add/rust/trial-10", TRANSCRIPT);
        write_trial(run.path(), "add/rust/trial-2", TRANSCRIPT);
        write_trial(run.path(), "add/go/trial-1", TRANSCRIPT);
        fs::create_dir_all(run.path().join("add/go/trial-2")).unwrap();
        fs::create_dir_all(run.path().join("add/go/notes")).unwrap();

        let keys: Vec<String> = discover_trials(run.path())
            .unwrap()
            .iter()
            .map(|t| t.key.to_string())
            .collect();
        assert_eq!(keys, vec!["add/go/trial-1", "add/rust/trial-2", "add/rust/trial-10"]);
    }

    #[test]
    fn test_discover_skips_duplicate_trial_spellings() {
        let run = TempDir::new().unwrap();
        write_trial(run.path(), "add/rust/trial-01", TRANSCRIPT);
        write_trial(run.path(), "add/rust/trial-1", TRANSCRIPT);
        write_trial(run.path(), "add/rust/trial-002", TRANSCRIPT);

        let trials = discover_trials(run.path()).unwrap();
        assert_eq!(trials.len(), 2);
        assert_eq!(trials[0].trial_dir, run.path().join("add/rust/trial-1"));
        assert_eq!(trials[1].key, TrialKey::new("add", "rust", 2));
    }

    #[tokio::test]
    async fn test_duplicate_trial_spellings_do_not_abort_rebuild() {
        let run = TempDir::new().unwrap();
        write_trial(run.path(), "add/rust/trial-1", TRANSCRIPT);
        write_trial(run.path(), "add/rust/trial-01", "not json\n");
        write_trial(run.path(), "add/go/trial-1", TRANSCRIPT);

        let ledger = reconstruct(run.path(), None, &transcript_only()).await.unwrap();
        assert_eq!(ledger.len(), 2);
        let rust = ledger.get(&TrialKey::new("add", "rust", 1)).unwrap();
        assert_eq!(rust.status, TrialStatus::Success);
    }

    #[test]
    fn test_missing_run_dir() {
        assert!(matches!(
            discover_trials(Path::new("/no/such/run")),
            Err(LedgerError::RunDirMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_transcript_only_rebuild() {
        let run = TempDir::new().unwrap();
        write_trial(run.path(), "add/rust/trial-1", TRANSCRIPT);

        let ledger = reconstruct(run.path(), None, &transcript_only()).await.unwrap();
        assert_eq!(ledger.len(), 1);
        let r = &ledger.results[0];
        assert_eq!(r.status, TrialStatus::Success);
        assert_eq!((r.turns, r.input_tokens, r.output_tokens), (4, 100, 40));
        assert_eq!(r.duration_ms, 9000);
        assert_eq!((r.tests_passed, r.tests_total), (0, 0));
        assert!(r.review_score.is_none());
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let run = TempDir::new().unwrap();
        write_trial(run.path(), "add/rust/trial-1", TRANSCRIPT);
        write_trial(run.path(), "add/go/trial-1", "not json\n");

        let ctx = transcript_only();
        let first = reconstruct(run.path(), None, &ctx).await.unwrap();
        let second = reconstruct(run.path(), Some(&first), &ctx).await.unwrap();
        assert_eq!(first.results, second.results);
        assert_eq!(first.id, second.id);
        assert_eq!(first.config, second.config);
    }

    #[tokio::test]
    async fn test_merge_preserves_skipped_steps() {
        let run = TempDir::new().unwrap();
        write_trial(run.path(), "add/rust/trial-1", TRANSCRIPT);
        write_trial(run.path(), "add/rust/trial-2", TRANSCRIPT);

        let kept = TrialKey::new("add", "rust", 1);
        let gone = TrialKey::new("add", "python", 1);
        let mut prior = RunLedger::new("prior-run", RunConfig::default().with_trials(2));
        prior.append(prior_entry(&kept)).unwrap();
        prior.append(prior_entry(&gone)).unwrap();

        let ctx = ReconstructContext::new(
            ReconstructOptions::default()
                .with_score(false)
                .with_review(false)
                .with_duration(false),
        );
        let ledger = reconstruct(run.path(), Some(&prior), &ctx).await.unwrap();

        assert_eq!(ledger.id, "prior-run");
        assert_eq!(ledger.config.trials, 2);
        assert_eq!(ledger.len(), 2);
        assert!(ledger.get(&gone).is_none());

        let merged = ledger.get(&kept).unwrap();
        assert_eq!((merged.tests_passed, merged.tests_total), (2, 3));
        assert_eq!(merged.test_output, "2/3 tests passed");
        assert_eq!(merged.review_score, Some(80));
        assert_eq!(merged.duration_ms, 1234);
        // Outcome fields always come from the transcript.
        assert_eq!(merged.status, TrialStatus::Success);
        assert_eq!(merged.turns, 4);
        assert_eq!(merged.cost_usd, 0.5);
        assert_eq!((merged.input_tokens, merged.output_tokens), (100, 40));

        let fresh = ledger.get(&TrialKey::new("add", "rust", 2)).unwrap();
        assert_eq!((fresh.tests_passed, fresh.tests_total), (0, 0));
        assert_eq!(fresh.duration_ms, 0);
        assert!(fresh.review_text.is_none());
    }

    #[tokio::test]
    async fn test_only_missing_rescoring() {
        let run = TempDir::new().unwrap();
        write_trial(run.path(), "add/rust/trial-1", TRANSCRIPT);
        write_trial(run.path(), "add/rust/trial-2", TRANSCRIPT);

        let kept = TrialKey::new("add", "rust", 1);
        let mut prior = RunLedger::new("r", RunConfig::default());
        prior.append(prior_entry(&kept)).unwrap();

        let ctx = ReconstructContext::new(
            ReconstructOptions::default()
                .with_review(false)
                .with_only_missing(true),
        );
        let ledger = reconstruct(run.path(), Some(&prior), &ctx).await.unwrap();

        let kept = ledger.get(&kept).unwrap();
        assert_eq!((kept.tests_passed, kept.tests_total), (2, 3));

        // No catalog: the missing entry is a recorded scoring fault.
        let rescored = ledger.get(&TrialKey::new("add", "rust", 2)).unwrap();
        assert_eq!((rescored.tests_passed, rescored.tests_total), (0, 0));
        assert_eq!(rescored.test_output, "scoring failed: task 'add' not found in catalog");
    }
}
