//! Workspace management for trials.
//!
//! Provisions an isolated directory per trial from a scaffold template,
//! runs setup commands inside it, and guarantees cleanup on every exit
//! path.

pub mod command;
pub mod sandbox;

pub use command::{run_shell, truncate_chars, CommandOutput, CASE_TIMEOUT, COMMAND_TIMEOUT};
pub use sandbox::{copy_scaffold, TrialWorkspace, WorkspacePolicy, RETAINED_WORKSPACE_DIR};
