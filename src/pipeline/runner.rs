//! Sequential benchmark runner.
//!
//! Iterates every selected (task, language, trial) combination in order,
//! appends each result to an in-memory [`RunLedger`] and persists the ledger
//! once at the end.

use std::path::PathBuf;

use tracing::info;

use super::config::BenchmarkConfig;
use super::trial::TrialRunner;
use crate::catalog::Catalog;
use crate::error::PipelineError;
use crate::ledger::{RunLedger, TrialKey, LEDGER_FILE};

/// A finished run.
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub run_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub ledger: RunLedger,
}

/// Runs a benchmark over a catalog.
pub struct BenchmarkRunner {
    config: BenchmarkConfig,
    trials: TrialRunner,
}

impl BenchmarkRunner {
    /// Creates a runner. The run settings, workspace policy and setup timeout
    /// of `config` are applied to `trials`.
    pub fn new(config: BenchmarkConfig, trials: TrialRunner) -> Self {
        let trials = trials
            .with_run_config(config.run.clone())
            .with_keep_workspaces(config.keep_workspaces)
            .with_setup_timeout(config.setup_timeout);
        Self { config, trials }
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Runs every selected combination and writes `<results>/<run-id>/run.json`.
    pub async fn run(&self, catalog: &Catalog) -> Result<CompletedRun, PipelineError> {
        let selected = catalog.select(
            self.config.task_filter.as_deref(),
            self.config.language_filter.as_deref(),
        );
        if selected.is_empty() {
            let filter = match (&self.config.task_filter, &self.config.language_filter) {
                (None, None) => "no tasks discovered".to_string(),
                (task, language) => format!(
                    "no match for task={} language={}",
                    task.as_deref().unwrap_or("*"),
                    language.as_deref().unwrap_or("*")
                ),
            };
            return Err(PipelineError::NoTasks(filter));
        }

        let run_id = self.config.resolve_run_id();
        let run_dir = self.config.results_dir.join(&run_id);
        std::fs::create_dir_all(&run_dir)?;

        let trials = self.config.run.trials;
        let mut ledger = RunLedger::new(&run_id, self.config.run.clone());

        println!("starting benchmark run: {}", run_id);
        println!("model: {}", self.config.run.model);
        println!("combinations: {}", selected.len());
        println!("trials per combination: {}\n", trials);
        info!(run_id = %run_id, combinations = selected.len(), trials, "Benchmark run started");

        for (task, language) in selected {
            for trial in 1..=trials {
                println!(
                    "running: {} / {} (trial {}/{})",
                    task.id,
                    language.id(),
                    trial,
                    trials
                );
                let trial_dir = run_dir.join(TrialKey::new(&task.id, language.id(), trial).relative_dir());
                let result = self.trials.run(task, language, trial, &trial_dir).await;
                println!("  {}", result.summary_line());
                ledger.append(result)?;
            }
        }

        let ledger_path = run_dir.join(LEDGER_FILE);
        ledger.save(&ledger_path)?;
        println!("\nresults written to: {}", ledger_path.display());

        Ok(CompletedRun {
            run_dir,
            ledger_path,
            ledger,
        })
    }
}
