//! Task and language catalog.
//!
//! A benchmark is a directory of tasks plus a languages file. Each task
//! directory holds a specification, an optional test bank and rubric, and one
//! scaffold subdirectory per supported language:
//!
//! ```text
//! tasks/
//!   add-two-numbers/
//!     spec.md
//!     tests.json
//!     rubric.md
//!     task.yaml        # optional, `oracle: io | native`
//!     python/          # scaffold for the `python` language
//!     rust/
//! languages.json
//! ```

mod loader;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, ScoringError};
use crate::scoring::{Oracle, TestBank};

pub use loader::{discover_tasks, interpolate, load_languages, Catalog};

/// Commands used to build, run and test code in one language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageProfile {
    /// Language identifier; the key in the languages file.
    #[serde(skip)]
    pub id: String,
    /// Reads a test case from stdin and prints the answer.
    pub run_command: String,
    /// Runs the scaffold's native test suite.
    pub test_command: String,
    /// Runs in the fresh workspace before the agent starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_trial_command: Option<String>,
    /// Runs before scoring, typically a build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_scoring_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_framework: Option<String>,
}

impl LanguageProfile {
    /// Returns a copy with `{taskId}` replaced in every command.
    pub fn for_task(&self, task_id: &str) -> Self {
        Self {
            id: self.id.clone(),
            run_command: interpolate(&self.run_command, task_id),
            test_command: interpolate(&self.test_command, task_id),
            pre_trial_command: self.pre_trial_command.as_deref().map(|c| interpolate(c, task_id)),
            pre_scoring_command: self
                .pre_scoring_command
                .as_deref()
                .map(|c| interpolate(c, task_id)),
            test_framework: self.test_framework.clone(),
        }
    }
}

/// How a task's produced code is judged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleMode {
    #[default]
    Io,
    Native,
}

/// Optional per-task settings from `task.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskManifest {
    #[serde(default)]
    pub oracle: OracleMode,
}

/// A language a task supports, with its scaffold.
#[derive(Debug, Clone)]
pub struct TaskLanguage {
    pub profile: LanguageProfile,
    pub scaffold_dir: PathBuf,
}

impl TaskLanguage {
    pub fn id(&self) -> &str {
        &self.profile.id
    }
}

/// One benchmark task.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub id: String,
    pub dir: PathBuf,
    pub spec_path: PathBuf,
    pub tests_path: Option<PathBuf>,
    pub rubric_path: Option<PathBuf>,
    pub oracle_mode: OracleMode,
    pub languages: Vec<TaskLanguage>,
}

impl TaskConfig {
    pub fn language(&self, id: &str) -> Option<&TaskLanguage> {
        self.languages.iter().find(|l| l.id() == id)
    }

    pub fn read_spec(&self) -> Result<String, CatalogError> {
        read_text(&self.spec_path)
    }

    /// Rubric text, or `None` when the task has no rubric.
    pub fn read_rubric(&self) -> Result<Option<String>, CatalogError> {
        self.rubric_path.as_deref().map(read_text).transpose()
    }

    /// Builds the task's oracle, loading its test bank.
    pub fn oracle(&self) -> Result<Oracle, ScoringError> {
        match self.oracle_mode {
            OracleMode::Io => {
                let path = self.tests_path.clone().unwrap_or_else(|| self.dir.join("tests.json"));
                Ok(Oracle::Io(TestBank::load(&path)?))
            }
            OracleMode::Native => {
                let declared_total = match &self.tests_path {
                    Some(path) => TestBank::load(path)?.len(),
                    None => 0,
                };
                Ok(Oracle::Native { declared_total })
            }
        }
    }
}

fn read_text(path: &Path) -> Result<String, CatalogError> {
    std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> LanguageProfile {
        LanguageProfile {
            id: "go".into(),
            run_command: "go run ./cmd/{taskId}".into(),
            test_command: "go test ./...".into(),
            pre_trial_command: Some("go mod download".into()),
            pre_scoring_command: Some("go build -o {taskId} ./cmd".into()),
            test_framework: Some("go".into()),
        }
    }

    #[test]
    fn test_for_task_interpolates_all_commands() {
        let p = profile().for_task("sudoku");
        assert_eq!(p.run_command, "go run ./cmd/sudoku");
        assert_eq!(p.pre_scoring_command.as_deref(), Some("go build -o sudoku ./cmd"));
        assert_eq!(p.pre_trial_command.as_deref(), Some("go mod download"));
    }

    #[test]
    fn test_profile_deserializes_camel_case() {
        let p: LanguageProfile = serde_json::from_str(
            r#"{"runCommand":"python run.py","testCommand":"pytest","preScoringCommand":"true"}"#,
        )
        .unwrap();
        assert_eq!(p.run_command, "python run.py");
        assert_eq!(p.pre_scoring_command.as_deref(), Some("true"));
        assert!(p.pre_trial_command.is_none());
    }

    #[test]
    fn test_manifest_oracle_mode() {
        let m: TaskManifest = serde_yaml::from_str("oracle: native").unwrap();
        assert_eq!(m.oracle, OracleMode::Native);
        let m: TaskManifest = serde_yaml::from_str("{}").unwrap();
        assert_eq!(m.oracle, OracleMode::Io);
    }
}
