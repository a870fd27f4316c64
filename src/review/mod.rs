//! Qualitative code review of a finished workspace.
//!
//! Review is best-effort: a [`Reviewer`] failure never fails a trial, it is
//! recorded as `review failed: ...` text instead. The scoring and ledger
//! code only see the narrow [`Reviewer`] trait, so they can be tested
//! without network access.

pub mod llm;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::catalog::{TaskConfig, TaskLanguage};
use crate::error::ReviewError;

pub use llm::LlmReviewer;

/// Directories never included in a review.
const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    ".mypy_cache",
    "target",
    ".stack-work",
    "dist",
    "build",
    ".gradle",
    "gradle",
    ".git",
    "vendor",
];

/// Build artifacts and lock files.
const SKIP_EXTENSIONS: &[&str] = &["jar", "class", "o", "so", "dylib", "exe", "pyc", "lock"];

/// Text recorded when the agent changed nothing reviewable.
pub const NO_SOURCE_FILES: &str = "No source files found in trial directory.";

/// A review verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    /// 0 to 100.
    pub score: u8,
    pub review: String,
}

/// Inputs for one review.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub workspace: PathBuf,
    pub spec: String,
    pub rubric: String,
    /// Scaffold the workspace started from; unchanged files are not reviewed.
    pub scaffold: Option<PathBuf>,
}

impl ReviewRequest {
    /// Builds a request from a task's spec and rubric.
    pub fn for_task(
        task: &TaskConfig,
        language: &TaskLanguage,
        workspace: &Path,
    ) -> Result<Self, ReviewError> {
        let read = |path: &Path| {
            fs::read_to_string(path).map_err(|source| ReviewError::Input {
                path: path.to_path_buf(),
                source,
            })
        };
        let spec = read(&task.spec_path)?;
        let rubric = match &task.rubric_path {
            Some(path) => read(path)?,
            None => String::new(),
        };
        Ok(Self {
            workspace: workspace.to_path_buf(),
            spec,
            rubric,
            scaffold: Some(language.scaffold_dir.clone()),
        })
    }
}

/// A service that grades the code in a workspace.
#[async_trait]
pub trait Reviewer: Send + Sync {
    /// Model or service identifier, for logs.
    fn model(&self) -> &str;

    async fn review(&self, request: &ReviewRequest) -> Result<Review, ReviewError>;
}

/// Reviews one trial workspace and converts the result into ledger fields.
///
/// On failure the previous score (if any) is kept and the text explains the
/// failure.
pub async fn review_fields(
    reviewer: &dyn Reviewer,
    request: Result<ReviewRequest, ReviewError>,
    prior_score: Option<u8>,
) -> (Option<u8>, Option<String>) {
    let result = match request {
        Ok(request) => reviewer.review(&request).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(review) => {
            info!(model = reviewer.model(), score = review.score, "Review complete");
            (Some(review.score), Some(review.review))
        }
        Err(e) => {
            warn!(model = reviewer.model(), error = %e, "Review failed");
            (prior_score, Some(format!("review failed: {}", e)))
        }
    }
}

/// Collects reviewable UTF-8 source files under `dir`, keyed by relative
/// path with `/` separators.
pub fn collect_source_files(dir: &Path) -> BTreeMap<String, String> {
    let walker = WalkDir::new(dir).min_depth(1).into_iter().filter_entry(|entry| {
        if !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !name.starts_with('.') && !SKIP_DIRS.contains(&name.as_ref())
    });

    let mut files = BTreeMap::new();
    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with("run.") {
            continue;
        }
        let skipped_ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |ext| SKIP_EXTENSIONS.contains(&ext));
        if skipped_ext {
            continue;
        }
        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };
        let Ok(rel) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.insert(key, content);
    }
    files
}

/// Source files in `workspace` that are new or differ from `scaffold`.
pub fn changed_source_files(workspace: &Path, scaffold: Option<&Path>) -> BTreeMap<String, String> {
    let files = collect_source_files(workspace);
    let Some(scaffold) = scaffold else {
        return files;
    };
    let original = collect_source_files(scaffold);
    files
        .into_iter()
        .filter(|(path, content)| original.get(path) != Some(content))
        .collect()
}

/// Builds the review prompt.
pub fn build_review_prompt(spec: &str, rubric: &str, files: &BTreeMap<String, String>) -> String {
    let files_section = files
        .iter()
        .map(|(path, content)| format!("### {}\n```\n{}\n```", path, content))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"You are reviewing code written to satisfy the following specification.

## Task Specification

{spec}

## Review Rubric

{rubric}

## Source Files

{files_section}

## Instructions

Evaluate the code against the rubric and specification. Respond with a JSON object containing:
- "score": a number from 0 to 100 (0 = terrible, 100 = perfect)
- "review": a brief written review (1-2 paragraphs) explaining the score

Respond ONLY with the JSON object, no other text."#
    )
}

#[derive(Debug, Deserialize)]
struct RawReview {
    score: f64,
    review: String,
}

/// Parses a `{score, review}` object, optionally wrapped in a code fence.
/// The score is clamped to 0..=100.
pub fn parse_review_response(raw: &str) -> Result<Review, ReviewError> {
    let body = extract_fenced(raw).unwrap_or(raw).trim();
    let parsed: RawReview =
        serde_json::from_str(body).map_err(|e| ReviewError::Parse(e.to_string()))?;
    Ok(Review {
        score: parsed.score.round().clamp(0.0, 100.0) as u8,
        review: parsed.review,
    })
}

fn extract_fenced(raw: &str) -> Option<&str> {
    let start = raw.find("```")?;
    let after = &raw[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    let end = after.find("```")?;
    Some(&after[..end])
}
