//! Git adapter.
//!
//! Every repository mutation the loop performs (branching, patch application,
//! staging, committing, pushing) goes through this small wrapper around `git`
//! subprocess calls.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Result of trying to apply a patch file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The patch did not apply cleanly; the working tree was left untouched.
    Rejected { stderr: String },
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// `git status --short`, as shown to the model.
    pub fn status_short(&self) -> Result<String> {
        self.run_capture(&["status", "--short"])
    }

    /// Every tracked path at HEAD, one per line.
    pub fn tracked_tree(&self) -> Result<String> {
        self.run_capture(&["ls-tree", "-r", "--name-only", "HEAD"])
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Ensure the worktree is fully clean (including untracked files).
    #[instrument(skip_all)]
    pub fn ensure_clean(&self) -> Result<()> {
        let entries = self.status_porcelain()?;
        if entries.is_empty() {
            debug!("worktree is clean");
            return Ok(());
        }
        warn!(dirty_count = entries.len(), "worktree not clean");
        let mut msg = String::new();
        msg.push_str("working tree not clean (commit or stash these first):\n");
        for entry in entries {
            msg.push_str(&format!("{} {}\n", entry.code, entry.path));
        }
        Err(anyhow!(msg.trim_end().to_string()))
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Apply a patch file all-or-nothing.
    ///
    /// `git apply --check` runs first so a patch that only partly applies never
    /// touches the tree; only then is `--reject --whitespace=fix` used for real.
    #[instrument(skip_all, fields(patch = %patch_path.display()))]
    pub fn apply_patch(&self, patch_path: &Path) -> Result<ApplyOutcome> {
        let patch = patch_path
            .to_str()
            .ok_or_else(|| anyhow!("non UTF-8 patch path {}", patch_path.display()))?;

        let check = self.run(&["apply", "--check", "--whitespace=fix", patch])?;
        if !check.status.success() {
            let stderr = String::from_utf8_lossy(&check.stderr).trim().to_string();
            warn!(%stderr, "patch does not apply");
            return Ok(ApplyOutcome::Rejected { stderr });
        }

        let applied = self.run(&["apply", "--reject", "--whitespace=fix", patch])?;
        if !applied.status.success() {
            let stderr = String::from_utf8_lossy(&applied.stderr).trim().to_string();
            warn!(%stderr, "patch apply failed after a clean check");
            return Ok(ApplyOutcome::Rejected { stderr });
        }
        debug!("patch applied");
        Ok(ApplyOutcome::Applied)
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Diff of everything currently staged.
    pub fn staged_diff(&self) -> Result<String> {
        self.run_capture(&["diff", "--cached"])
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    #[instrument(skip_all, fields(branch))]
    pub fn push(&self, remote: &str, branch: &str) -> Result<()> {
        debug!(remote, branch, "pushing branch");
        self.run_checked(&["push", remote, branch])?;
        Ok(())
    }

    pub fn remote_url(&self, remote: &str) -> Result<String> {
        Ok(self
            .run_capture(&["remote", "get-url", remote])?
            .trim()
            .to_string())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// Write `patch` to `path` and apply it.
pub fn write_and_apply(git: &Git, path: &Path, patch: &str) -> Result<ApplyOutcome> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, patch).with_context(|| format!("write patch {}", path.display()))?;
    git.apply_patch(path)
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
