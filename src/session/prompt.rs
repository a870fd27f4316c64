//! Prompt construction for agent sessions.

use std::path::Path;

/// Extra system guidance appended to the engine's default system prompt.
pub const APPEND_SYSTEM_PROMPT: &str =
    "Focus on implementing the solution and making all tests pass. Be efficient.";

/// Builds the task prompt: environment description, task specification and
/// instructions.
pub fn build_task_prompt(workspace: &Path, language: &str, spec: &str, test_command: &str) -> String {
    format!(
        r#"You are working in {workspace}.
Your task is to implement a solution in {language}.

## Task Specification

{spec}

## Instructions

1. Read the existing files in the working directory to understand the scaffold and test suite.
2. Implement the solution so that all tests pass.
3. Run the tests with: {test_command}
4. Fix any failures until all tests pass."#,
        workspace = workspace.display(),
        language = language,
        spec = spec.trim_end(),
        test_command = test_command,
    )
}
