//! Loading the languages file and discovering tasks on disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{LanguageProfile, OracleMode, TaskConfig, TaskLanguage, TaskManifest};
use crate::error::CatalogError;

/// Replaces every `{taskId}` placeholder in a command template.
pub fn interpolate(template: &str, task_id: &str) -> String {
    template.replace("{taskId}", task_id)
}

/// Loads language profiles from a JSON or YAML file, keyed by language id.
pub fn load_languages(path: &Path) -> Result<BTreeMap<String, LanguageProfile>, CatalogError> {
    let content = fs::read_to_string(path).map_err(|source| CatalogError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let mut languages: BTreeMap<String, LanguageProfile> = if is_yaml {
        serde_yaml::from_str(&content).map_err(|e| CatalogError::InvalidLanguages {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    } else {
        serde_json::from_str(&content).map_err(|e| CatalogError::InvalidLanguages {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    };

    for (id, profile) in languages.iter_mut() {
        profile.id = id.clone();
    }
    Ok(languages)
}

/// Discovers tasks under `tasks_dir`.
///
/// Directories whose name starts with `_` are ignored, as are tasks without a
/// `spec.md` and I/O-oracle tasks without a `tests.json`. A task supports
/// every language that has both a profile and a scaffold subdirectory.
pub fn discover_tasks(
    tasks_dir: &Path,
    languages: &BTreeMap<String, LanguageProfile>,
) -> Result<Vec<TaskConfig>, CatalogError> {
    if !tasks_dir.is_dir() {
        return Err(CatalogError::TasksDirMissing(tasks_dir.to_path_buf()));
    }
    let read_err = |source| CatalogError::Read {
        path: tasks_dir.to_path_buf(),
        source,
    };

    let mut task_dirs: Vec<PathBuf> = fs::read_dir(tasks_dir)
        .map_err(read_err)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    task_dirs.sort();

    let mut tasks = Vec::new();
    for dir in task_dirs {
        let Some(id) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if id.starts_with('_') {
            debug!(task_id = %id, "Skipping disabled task");
            continue;
        }
        if let Some(task) = load_task(&dir, &id, languages)? {
            tasks.push(task);
        }
    }
    Ok(tasks)
}

fn load_task(
    dir: &Path,
    id: &str,
    languages: &BTreeMap<String, LanguageProfile>,
) -> Result<Option<TaskConfig>, CatalogError> {
    let spec_path = dir.join("spec.md");
    if !spec_path.is_file() {
        warn!(task_id = %id, "Task has no spec.md, skipping");
        return Ok(None);
    }

    let manifest_path = dir.join("task.yaml");
    let manifest = if manifest_path.is_file() {
        let content = fs::read_to_string(&manifest_path).map_err(|source| CatalogError::Read {
            path: manifest_path.clone(),
            source,
        })?;
        serde_yaml::from_str::<TaskManifest>(&content).map_err(|e| CatalogError::InvalidTask {
            path: manifest_path.clone(),
            reason: e.to_string(),
        })?
    } else {
        TaskManifest::default()
    };

    let tests_path = Some(dir.join("tests.json")).filter(|p| p.is_file());
    if tests_path.is_none() && manifest.oracle == OracleMode::Io {
        warn!(task_id = %id, "Task has no tests.json, skipping");
        return Ok(None);
    }
    let rubric_path = Some(dir.join("rubric.md")).filter(|p| p.is_file());

    let task_languages: Vec<TaskLanguage> = languages
        .iter()
        .filter_map(|(lang_id, profile)| {
            let scaffold_dir = dir.join(lang_id);
            scaffold_dir.is_dir().then(|| TaskLanguage {
                profile: profile.for_task(id),
                scaffold_dir,
            })
        })
        .collect();

    debug!(
        task_id = %id,
        oracle = ?manifest.oracle,
        languages = task_languages.len(),
        "Discovered task"
    );

    Ok(Some(TaskConfig {
        id: id.to_string(),
        dir: dir.to_path_buf(),
        spec_path,
        tests_path,
        rubric_path,
        oracle_mode: manifest.oracle,
        languages: task_languages,
    }))
}

/// Loaded tasks and language profiles.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub tasks: Vec<TaskConfig>,
    pub languages: BTreeMap<String, LanguageProfile>,
}

impl Catalog {
    pub fn load(tasks_dir: &Path, languages_path: &Path) -> Result<Self, CatalogError> {
        let languages = load_languages(languages_path)?;
        let tasks = discover_tasks(tasks_dir, &languages)?;
        Ok(Self { tasks, languages })
    }

    pub fn task(&self, id: &str) -> Option<&TaskConfig> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Every (task, language) pair matching the optional filters.
    pub fn select(
        &self,
        task: Option<&str>,
        language: Option<&str>,
    ) -> Vec<(&TaskConfig, &TaskLanguage)> {
        self.tasks
            .iter()
            .filter(|t| task.map_or(true, |id| t.id == id))
            .flat_map(|t| {
                t.languages
                    .iter()
                    .filter(move |l| language.map_or(true, |id| l.id() == id))
                    .map(move |l| (t, l))
            })
            .collect()
    }
}
