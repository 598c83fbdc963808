//! `.patchloop/` paths and scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::branch::branch_dir_name;
use crate::io::config::{LoopConfig, write_config};

/// Everything under `.patchloop/` is local state; never commit it.
pub const PATCHLOOP_GITIGNORE: &str = "*\n";

/// All canonical paths within `.patchloop/` for a project root.
#[derive(Debug, Clone)]
pub struct PatchloopPaths {
    pub root: PathBuf,
    pub dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub runs_dir: PathBuf,
}

impl PatchloopPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let dir = root.join(".patchloop");
        Self {
            root,
            gitignore_path: dir.join(".gitignore"),
            config_path: dir.join("config.toml"),
            runs_dir: dir.join("runs"),
            dir,
        }
    }

    /// `.patchloop/runs/<branch-dir>/`
    pub fn run_dir(&self, branch: &str) -> PathBuf {
        self.runs_dir.join(branch_dir_name(branch))
    }

    pub fn change_log_path(&self, branch: &str) -> PathBuf {
        self.run_dir(branch).join("CHANGE_LOG.md")
    }
}

/// Options for [`init`].
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Overwrite an existing `config.toml`.
    pub force: bool,
}

/// Create `.patchloop/` with its `.gitignore` if either is missing.
pub fn ensure_layout(root: &Path) -> Result<PatchloopPaths> {
    let paths = PatchloopPaths::new(root);
    if paths.dir.exists() && !paths.dir.is_dir() {
        return Err(anyhow!("{} exists but is not a directory", paths.dir.display()));
    }
    fs::create_dir_all(&paths.runs_dir)
        .with_context(|| format!("create directory {}", paths.runs_dir.display()))?;
    if !paths.gitignore_path.exists() {
        debug!(path = %paths.gitignore_path.display(), "writing gitignore");
        fs::write(&paths.gitignore_path, PATCHLOOP_GITIGNORE)
            .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    }
    Ok(paths)
}

/// Scaffold `.patchloop/` and write the default config.
///
/// Fails if `config.toml` already exists unless `options.force` is set.
pub fn init(root: &Path, options: &InitOptions) -> Result<PatchloopPaths> {
    let paths = PatchloopPaths::new(root);
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "patchloop init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }
    let paths = ensure_layout(root)?;
    fs::write(&paths.gitignore_path, PATCHLOOP_GITIGNORE)
        .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &LoopConfig::default())?;
    Ok(paths)
}
