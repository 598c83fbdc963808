//! Context gathering for each iteration prompt.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::state::IterationState;
use crate::io::git::Git;

/// Repository snapshot shown to the model for one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBundle {
    pub readme: String,
    /// `git status --short`
    pub status: String,
    /// `git ls-tree -r --name-only HEAD`
    pub tree: String,
    /// Previous iteration's command outputs, already rendered.
    pub command_output: String,
    pub working_file: Option<WorkingFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingFile {
    pub path: PathBuf,
    pub contents: String,
}

/// Collect the context for `state` from the repository at `root`.
///
/// A missing README or a missing working file is an error.
pub fn gather_context(root: &Path, readme_path: &str, state: &IterationState) -> Result<ContextBundle> {
    let readme_full = resolve_in_repo(root, Path::new(readme_path))?;
    let readme = fs::read_to_string(&readme_full)
        .with_context(|| format!("read README {}", readme_full.display()))?;

    let git = Git::new(root);
    let status = git.status_short().context("git status for context")?;
    let tree = git.tracked_tree().context("git ls-tree for context")?;

    let working_file = match &state.working_file {
        Some(path) => Some(read_working_file(root, path)?),
        None => None,
    };

    debug!(
        iter = state.iter,
        readme_bytes = readme.len(),
        has_working_file = working_file.is_some(),
        commands = state.outputs.len(),
        "context gathered"
    );
    Ok(ContextBundle {
        readme,
        status,
        tree,
        command_output: state.outputs.render(),
        working_file,
    })
}

fn read_working_file(root: &Path, path: &Path) -> Result<WorkingFile> {
    let full = resolve_in_repo(root, path)?;
    let contents = fs::read_to_string(&full)
        .with_context(|| format!("read working file {}", full.display()))?;
    Ok(WorkingFile {
        path: path.to_path_buf(),
        contents,
    })
}

/// Join a model-supplied relative path onto `root`, refusing anything that
/// could leave the repository.
pub fn resolve_in_repo(root: &Path, path: &Path) -> Result<PathBuf> {
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| anyhow!("path {} escapes the repository", path.display()))?;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(anyhow!("path {} must be relative", path.display()));
            }
        }
    }
    if depth == 0 {
        return Err(anyhow!("path '{}' does not name a file", path.display()));
    }
    Ok(root.join(path))
}
