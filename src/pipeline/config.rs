//! Benchmark run configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::ledger::RunConfig;
use crate::workspace::COMMAND_TIMEOUT;

/// Configuration for one benchmark run.
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Directory under which `<run-id>/` is created.
    pub results_dir: PathBuf,
    /// Settings recorded in the ledger.
    pub run: RunConfig,
    /// Keep each workspace at `<trial dir>/workspace` for audit and re-scoring.
    pub keep_workspaces: bool,
    /// Timeout for the pre-trial setup command.
    pub setup_timeout: Duration,
    /// Only run this task.
    pub task_filter: Option<String>,
    /// Only run this language.
    pub language_filter: Option<String>,
    /// Run id; generated from the start time when unset.
    pub run_id: Option<String>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            run: RunConfig::default(),
            keep_workspaces: false,
            setup_timeout: COMMAND_TIMEOUT,
            task_filter: None,
            language_filter: None,
            run_id: None,
        }
    }
}

impl BenchmarkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    pub fn with_run_config(mut self, run: RunConfig) -> Self {
        self.run = run;
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

    pub fn with_task_filter(mut self, task: Option<String>) -> Self {
        self.task_filter = task;
        self
    }

    pub fn with_language_filter(mut self, language: Option<String>) -> Self {
        self.language_filter = language;
        self
    }

    pub fn with_run_id(mut self, id: impl Into<String>) -> Self {
        self.run_id = Some(id.into());
        self
    }

    /// The configured run id, or one derived from the current UTC time
    /// (`2025-01-31T09-15-02-123Z`).
    pub fn resolve_run_id(&self) -> String {
        self.run_id
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string())
    }
}
