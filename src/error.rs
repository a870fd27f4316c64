//! Error types for langbench operations.
//!
//! Defines error types for each subsystem of the trial pipeline:
//! - Shell command execution with timeouts
//! - Workspace provisioning and setup
//! - Agent engine sessions
//! - Oracle scoring
//! - Code review
//! - Ledger persistence
//! - Task/language catalog loading
//! - Benchmark runs
//!
//! Apart from [`PipelineError`], none of these abort a benchmark run; the
//! pipeline converts each of them into explanatory text on the affected
//! trial.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while executing a shell command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while provisioning a trial workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("scaffold directory not found: {0}")]
    ScaffoldMissing(PathBuf),

    #[error("failed to copy scaffold into {dest}: {reason}")]
    CopyFailed { dest: PathBuf, reason: String },

    #[error("setup command exited with code {code}: {output}")]
    SetupExit { code: i32, output: String },

    #[error("setup command failed: {0}")]
    SetupCommand(#[from] CommandError),

    #[error("failed to remove workspace {path}: {source}")]
    Teardown {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by an agent engine or while streaming its events.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start agent engine: {0}")]
    Spawn(String),

    #[error("agent engine exited with code {code}: {stderr}")]
    Exited { code: i32, stderr: String },

    #[error("agent engine stream failed: {0}")]
    Stream(String),

    #[error("transcript write failed: {0}")]
    Transcript(#[from] std::io::Error),
}

/// Infrastructure failures while scoring a workspace.
///
/// A failing test is never a `ScoringError`; this type covers the cases
/// where the oracle itself could not be executed.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("failed to load test bank {path}: {reason}")]
    TestBank { path: PathBuf, reason: String },

    #[error("workspace not available for scoring: {0}")]
    MissingWorkspace(PathBuf),

    #[error("task '{0}' not found in catalog")]
    UnknownTask(String),

    #[error("no language profile for '{0}'")]
    UnknownLanguage(String),

    #[error("test command failed to run: {0}")]
    TestCommand(#[from] CommandError),
}

/// Errors that can occur during code review.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("failed to read review input {path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("review context unavailable: {0}")]
    MissingContext(String),

    #[error("review request failed: {0}")]
    RequestFailed(String),

    #[error("review API returned {code}: {message}")]
    Api { code: u16, message: String },

    #[error("could not parse review response: {0}")]
    Parse(String),
}

/// Errors that can occur while building or persisting a run ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("duplicate trial {0} in ledger")]
    DuplicateTrial(String),

    #[error("failed to persist ledger to {path}: {reason}")]
    Persist { path: PathBuf, reason: String },

    #[error("run directory not found: {0}")]
    RunDirMissing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while loading tasks and language profiles.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("tasks directory not found: {0}")]
    TasksDirMissing(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid languages file {path}: {reason}")]
    InvalidLanguages { path: PathBuf, reason: String },

    #[error("invalid task config {path}: {reason}")]
    InvalidTask { path: PathBuf, reason: String },
}

/// Errors that stop a whole benchmark run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no tasks selected: {0}")]
    NoTasks(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
