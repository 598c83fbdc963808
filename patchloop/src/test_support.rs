//! Test helpers: scratch repositories and scripted collaborators.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::io::chat::{ChatModel, ChatRequest};
use crate::io::pull_request::{PullRequestHost, PullRequestRequest};

/// A throwaway git repository with one commit containing `README.md` ("hi\n").
pub struct TestRepo {
    dir: TempDir,
    scratch: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create repo tempdir")?;
        let scratch = tempfile::tempdir().context("create scratch tempdir")?;
        let repo = Self { dir, scratch };
        repo.git(&["init", "--quiet"])?;
        repo.git(&["config", "user.email", "test@example.com"])?;
        repo.git(&["config", "user.name", "test"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        fs::write(repo.path().join("README.md"), "hi\n").context("write README")?;
        repo.git(&["add", "README.md"])?;
        repo.git(&["commit", "--quiet", "-m", "chore: init"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A directory outside the repository, for files that must not dirty it.
    pub fn scratch(&self) -> &Path {
        self.scratch.path()
    }

    /// Create a bare repository in the scratch dir and register it as `origin`.
    pub fn add_bare_origin(&self) -> Result<()> {
        let origin = self.scratch().join("origin.git");
        let status = Command::new("git")
            .args(["init", "--bare", "--quiet"])
            .arg(&origin)
            .status()
            .context("git init --bare")?;
        if !status.success() {
            return Err(anyhow!("git init --bare failed"));
        }
        let origin = origin
            .to_str()
            .ok_or_else(|| anyhow!("non UTF-8 scratch path"))?
            .to_string();
        self.git(&["remote", "add", "origin", &origin])?;
        Ok(())
    }

    pub fn commit_count(&self) -> Result<usize> {
        let out = self.git(&["rev-list", "--count", "HEAD"])?;
        out.trim().parse().context("parse commit count")
    }

    pub fn head_subject(&self) -> Result<String> {
        Ok(self.git(&["log", "-1", "--format=%s"])?.trim().to_string())
    }

    /// Run git in the repository and return stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Chat model that returns queued replies and records every request.
#[derive(Default)]
pub struct ScriptedChat {
    replies: Mutex<VecDeque<String>>,
    repeat: Option<String>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Answer every request with the same reply.
    pub fn repeating(reply: impl Into<String>) -> Self {
        Self {
            repeat: Some(reply.into()),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ChatModel for ScriptedChat {
    fn complete(&self, request: &ChatRequest) -> Result<String> {
        self.requests
            .lock()
            .map_err(|_| anyhow!("scripted chat lock poisoned"))?
            .push(request.clone());
        let next = self
            .replies
            .lock()
            .map_err(|_| anyhow!("scripted chat lock poisoned"))?
            .pop_front();
        next.or_else(|| self.repeat.clone())
            .ok_or_else(|| anyhow!("scripted chat has no reply left"))
    }
}

/// Pull request host that records requests and answers with a fixed URL.
#[derive(Default)]
pub struct RecordingPullRequests {
    url: Option<String>,
    requests: Mutex<Vec<PullRequestRequest>>,
}

impl RecordingPullRequests {
    pub fn new(url: Option<&str>) -> Self {
        Self {
            url: url.map(str::to_string),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<PullRequestRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl PullRequestHost for RecordingPullRequests {
    fn open(&self, request: &PullRequestRequest) -> Result<Option<String>> {
        self.requests
            .lock()
            .map_err(|_| anyhow!("recording lock poisoned"))?
            .push(request.clone());
        Ok(self.url.clone())
    }
}

/// Iteration reply that keeps going with `gameplan` and asks for `commands`.
pub fn continue_reply(gameplan: &str, commands: &[&str]) -> String {
    serde_json::json!({
        "patch": "",
        "patchDescription": "",
        "nextIteration": {"gameplan": gameplan, "commands": commands},
        "complete": false
    })
    .to_string()
}

/// Iteration reply that applies `patch` and declares the goal met.
pub fn complete_reply(patch: &str, description: &str) -> String {
    serde_json::json!({
        "patch": patch,
        "patchDescription": description,
        "complete": true
    })
    .to_string()
}
