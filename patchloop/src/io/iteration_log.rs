//! Iteration logging under `.patchloop/runs/<branch-dir>/<iter>/`.
//!
//! Every file is written only when the iteration produced it, so the presence
//! of a file is itself a record (e.g. `apply.log` exists iff a patch failed).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::io::layout::PatchloopPaths;

/// What happened to the iteration's patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    None,
    Applied,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta {
    pub branch: String,
    pub iter: u32,
    pub patch: PatchStatus,
    pub complete: bool,
    pub commands_run: usize,
    pub commands_rejected: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub prompt_path: PathBuf,
    pub response_path: PathBuf,
    pub patch_path: PathBuf,
    pub apply_log_path: PathBuf,
    pub out_log_path: PathBuf,
    pub next_gameplan_path: PathBuf,
    pub complete_path: PathBuf,
    pub meta_path: PathBuf,
}

impl IterationPaths {
    pub fn new(root: &Path, branch: &str, iter: u32) -> Self {
        let dir = PatchloopPaths::new(root)
            .run_dir(branch)
            .join(iter.to_string());
        Self {
            prompt_path: dir.join("prompt.md"),
            response_path: dir.join("response.json"),
            patch_path: dir.join("patch"),
            apply_log_path: dir.join("apply.log"),
            out_log_path: dir.join("out.log"),
            next_gameplan_path: dir.join("nextGameplan.md"),
            complete_path: dir.join("COMPLETE"),
            meta_path: dir.join("meta.json"),
            dir,
        }
    }

    /// Create the iteration directory.
    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create iteration dir {}", self.dir.display()))
    }
}

pub fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
