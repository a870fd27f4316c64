//! langbench: benchmark coding agents across programming languages.
//!
//! This library runs an agent against benchmark tasks in isolated
//! workspaces, reconciles its event stream into one outcome per session,
//! scores the produced code against the task's oracle and records
//! everything in a mergeable run ledger.

pub mod catalog;
pub mod cli;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod review;
pub mod scoring;
pub mod session;
pub mod workspace;

// Re-export commonly used error types
pub use error::{
    CatalogError, CommandError, EngineError, LedgerError, PipelineError, ReviewError, ScoringError,
    WorkspaceError,
};
