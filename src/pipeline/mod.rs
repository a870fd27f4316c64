//! Benchmark pipeline.
//!
//! Composes the workspace, session, scoring and review components into
//! trials, and trials into a run:
//!
//! 1. **Workspace**: the language scaffold is copied into an isolated
//!    directory and the optional pre-trial setup command runs there
//! 2. **Session**: the agent works on the task; its event stream is written
//!    to `transcript.jsonl` and reconciled into one outcome
//! 3. **Scoring**: the workspace is scored against the task's oracle
//! 4. **Review**: an optional reviewer grades the changed source files
//! 5. **Ledger**: the result is appended; `run.json` is written at the end
//!
//! Trials run strictly one after another.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use langbench::catalog::Catalog;
//! use langbench::pipeline::{BenchmarkConfig, BenchmarkRunner, TrialRunner};
//! use langbench::session::CliEngine;
//!
//! let catalog = Catalog::load("tasks".as_ref(), "languages.json".as_ref())?;
//! let config = BenchmarkConfig::new().with_results_dir("results");
//! let trials = TrialRunner::new(Arc::new(CliEngine::default()), config.run.clone());
//! let run = BenchmarkRunner::new(config, trials).run(&catalog).await?;
//! println!("{} results in {}", run.ledger.len(), run.ledger_path.display());
//! ```

pub mod config;
pub mod runner;
pub mod trial;

pub use config::BenchmarkConfig;
pub use runner::{BenchmarkRunner, CompletedRun};
pub use trial::TrialRunner;
