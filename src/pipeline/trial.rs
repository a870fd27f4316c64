//! Execution of a single trial.
//!
//! A trial provisions a workspace from the language scaffold, runs the
//! optional pre-trial setup, drives one agent session, scores the workspace,
//! optionally reviews it, and tears the workspace down. Every failure along
//! the way is recorded on the returned [`TrialResult`]; nothing here aborts
//! the surrounding run.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::catalog::{TaskConfig, TaskLanguage};
use crate::ledger::{RunConfig, TrialKey, TrialResult};
use crate::review::{review_fields, ReviewRequest, Reviewer};
use crate::scoring::{Oracle, ScoreResult, Scorer};
use crate::session::{
    build_task_prompt, AgentEngine, Outcome, SessionDriver, SessionRequest, APPEND_SYSTEM_PROMPT,
    TRANSCRIPT_FILE,
};
use crate::workspace::{TrialWorkspace, WorkspacePolicy, COMMAND_TIMEOUT, RETAINED_WORKSPACE_DIR};

/// Runs individual trials.
pub struct TrialRunner {
    driver: SessionDriver,
    scorer: Scorer,
    reviewer: Option<Arc<dyn Reviewer>>,
    run_config: RunConfig,
    keep_workspaces: bool,
    setup_timeout: Duration,
}

impl TrialRunner {
    pub fn new(engine: Arc<dyn AgentEngine>, run_config: RunConfig) -> Self {
        Self {
            driver: SessionDriver::new(engine),
            scorer: Scorer::default(),
            reviewer: None,
            run_config,
            keep_workspaces: false,
            setup_timeout: COMMAND_TIMEOUT,
        }
    }

    pub fn with_scorer(mut self, scorer: Scorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_reviewer(mut self, reviewer: Option<Arc<dyn Reviewer>>) -> Self {
        self.reviewer = reviewer;
        self
    }

    pub fn with_run_config(mut self, run_config: RunConfig) -> Self {
        self.run_config = run_config;
        self
    }

    pub fn with_keep_workspaces(mut self, keep: bool) -> Self {
        self.keep_workspaces = keep;
        self
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.run_config
    }

    /// Runs trial number `trial` of `task` in `language`, writing its
    /// transcript under `trial_dir`.
    pub async fn run(
        &self,
        task: &TaskConfig,
        language: &TaskLanguage,
        trial: u32,
        trial_dir: &Path,
    ) -> TrialResult {
        let started = Instant::now();
        let key = TrialKey::new(&task.id, language.id(), trial);

        let oracle = task.oracle();
        if let Err(e) = &oracle {
            warn!(trial = %key, error = %e, "Test oracle unavailable");
        }
        let declared_total = oracle.as_ref().map_or(0, Oracle::declared_total);
        let aborted = |text: String| {
            warn!(trial = %key, "{}", text);
            TrialResult::new(
                &key,
                &Outcome::error(started.elapsed().as_millis() as u64),
                ScoreResult {
                    passed: 0,
                    total: declared_total,
                    output: text,
                },
            )
        };

        let spec = match task.read_spec() {
            Ok(spec) => spec,
            Err(e) => return aborted(format!("failed to read task spec: {}", e)),
        };

        let policy = if self.keep_workspaces {
            WorkspacePolicy::Retain(trial_dir.join(RETAINED_WORKSPACE_DIR))
        } else {
            WorkspacePolicy::Ephemeral
        };
        let label = format!("{}-{}-{}", task.id, language.id(), trial);
        let workspace = match TrialWorkspace::prepare(&language.scaffold_dir, &policy, &label) {
            Ok(workspace) => workspace,
            Err(e) => return aborted(format!("workspace error: {}", e)),
        };

        if let Some(command) = &language.profile.pre_trial_command {
            if let Err(e) = workspace.run_setup(command, self.setup_timeout).await {
                let result = aborted(format!("pre-trial setup failed: {}", e));
                teardown(workspace, &key);
                return result;
            }
        }

        let request = SessionRequest {
            prompt: build_task_prompt(
                workspace.path(),
                language.id(),
                &spec,
                &language.profile.test_command,
            ),
            working_dir: workspace.path().to_path_buf(),
            allowed_tools: self.run_config.allowed_tools.clone(),
            max_turns: self.run_config.max_turns,
            max_budget_usd: self.run_config.max_budget_usd,
            model: self.run_config.model.clone(),
            append_system_prompt: Some(APPEND_SYSTEM_PROMPT.to_string()),
        };
        let report = self
            .driver
            .run(&request, &trial_dir.join(TRANSCRIPT_FILE))
            .await;

        let mut result = match &report.fault {
            None => {
                let score = match &oracle {
                    Ok(oracle) => {
                        self.scorer
                            .score_or_fault(workspace.path(), &language.profile, oracle)
                            .await
                    }
                    Err(e) => ScoreResult {
                        passed: 0,
                        total: 0,
                        output: format!("scoring failed: {}", e),
                    },
                };
                TrialResult::new(&key, &report.outcome, score)
            }
            Some(fault) => TrialResult::new(
                &key,
                &report.outcome,
                ScoreResult {
                    passed: 0,
                    total: 0,
                    output: format!("session error: {}", fault),
                },
            ),
        };

        if let (Some(reviewer), None) = (&self.reviewer, &report.fault) {
            let request = ReviewRequest::for_task(task, language, workspace.path());
            let (score, text) = review_fields(reviewer.as_ref(), request, None).await;
            result = result.with_review(score, text);
        }

        teardown(workspace, &key);
        info!(
            trial = %key,
            engine = self.driver.engine_name(),
            status = %result.status,
            passed = result.tests_passed,
            total = result.tests_total,
            "Trial finished"
        );
        result
    }
}

fn teardown(workspace: TrialWorkspace, key: &TrialKey) {
    if let Err(e) = workspace.teardown() {
        warn!(trial = %key, error = %e, "Workspace teardown failed");
    }
}
