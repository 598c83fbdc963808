//! Finalizer: stage, describe, commit and optionally open a pull request.
//!
//! Nothing here aborts the run once the loop has finished. Commit, push and
//! pull request failures are logged and collected in
//! [`FinalizeOutcome::failures`] so the caller can report a partial result.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::changelog::render_change_log;
use crate::core::reply::parse_finalize_reply;
use crate::core::types::{ChangeLog, FinalizeReply};
use crate::io::chat::{ChatModel, ChatRequest};
use crate::io::config::LoopConfig;
use crate::io::git::Git;
use crate::io::iteration_log::write_text;
use crate::io::layout::PatchloopPaths;
use crate::io::prompt::PromptBuilder;
use crate::io::pull_request::{PullRequestHost, PullRequestRequest, parse_github_remote};

const REMOTE: &str = "origin";

#[derive(Debug, Clone, Copy)]
pub struct FinalizeRequest<'a> {
    pub root: &'a Path,
    pub goal: &'a str,
    pub branch: &'a str,
    /// Branch that was checked out when the run started.
    pub start_branch: &'a str,
    pub final_gameplan: &'a str,
    pub config: &'a LoopConfig,
    pub prompts: &'a PromptBuilder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub commit_message: String,
    pub committed: bool,
    pub change_log_path: Option<PathBuf>,
    pub pull_request_url: Option<String>,
    pub failures: Vec<String>,
}

impl FinalizeOutcome {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Commit message used when the model cannot describe the change.
pub fn fallback_commit_message(goal: &str) -> String {
    let first_line = goal.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("update");
    format!("patchloop: {first_line}")
}

#[instrument(skip_all, fields(branch = %request.branch))]
pub fn finalize<C: ChatModel>(
    request: &FinalizeRequest<'_>,
    chat: &C,
    pull_requests: Option<&dyn PullRequestHost>,
) -> FinalizeOutcome {
    let git = Git::new(request.root);
    let mut failures = Vec::new();

    let diff = match stage_all(&git) {
        Ok(diff) => diff,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "staging failed");
            failures.push(format!("stage changes: {err:#}"));
            String::new()
        }
    };

    let description = if diff.trim().is_empty() {
        info!("nothing staged, skipping commit");
        fallback_reply(request.goal)
    } else {
        describe(request, chat, &diff)
    };

    let paths = PatchloopPaths::new(request.root);
    let change_log_path = paths.change_log_path(request.branch);
    let change_log = render_change_log(
        request.goal,
        &description.commit_message,
        &description.change_log,
    );
    let change_log_path = match write_change_log(&change_log_path, &change_log) {
        Ok(()) => Some(change_log_path),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "writing change log failed");
            failures.push(format!("write change log: {err:#}"));
            None
        }
    };

    let committed = if diff.trim().is_empty() {
        false
    } else {
        match git.commit_staged(&description.commit_message) {
            Ok(committed) => committed,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "commit failed");
                failures.push(format!("commit: {err:#}"));
                false
            }
        }
    };

    let mut pull_request_url = None;
    if request.config.pull_request.enabled {
        match (committed, pull_requests) {
            (true, Some(host)) => {
                match open_pull_request(&git, request, &description.commit_message, host) {
                    Ok(Some(url)) => pull_request_url = Some(url),
                    Ok(None) => failures.push("pull request was not created".to_string()),
                    Err(err) => {
                        warn!(err = %format!("{err:#}"), "pull request failed");
                        failures.push(format!("pull request: {err:#}"));
                    }
                }
            }
            (true, None) => failures.push("pull requests enabled but no host configured".to_string()),
            (false, _) => info!("no commit, skipping pull request"),
        }
    }

    FinalizeOutcome {
        commit_message: description.commit_message,
        committed,
        change_log_path,
        pull_request_url,
        failures,
    }
}

fn stage_all(git: &Git) -> Result<String> {
    git.add_all()?;
    git.staged_diff()
}

fn describe<C: ChatModel>(request: &FinalizeRequest<'_>, chat: &C, diff: &str) -> FinalizeReply {
    let attempt = || -> Result<FinalizeReply> {
        let prompt = request
            .prompts
            .build_finalize(request.goal, request.final_gameplan, diff)?;
        let raw = chat.complete(&ChatRequest::new(
            &request.config.model,
            request.prompts.system(),
            &prompt,
        ))?;
        parse_finalize_reply(&raw)
    };
    match attempt() {
        Ok(reply) => reply,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "could not describe change, using fallback message");
            fallback_reply(request.goal)
        }
    }
}

fn fallback_reply(goal: &str) -> FinalizeReply {
    FinalizeReply {
        commit_message: fallback_commit_message(goal),
        change_log: ChangeLog::default(),
    }
}

fn write_change_log(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    write_text(path, contents)
}

fn open_pull_request(
    git: &Git,
    request: &FinalizeRequest<'_>,
    title: &str,
    host: &dyn PullRequestHost,
) -> Result<Option<String>> {
    let cfg = &request.config.pull_request;
    git.push(REMOTE, request.branch)?;

    let (owner, repo) = match (&cfg.owner, &cfg.repo) {
        (Some(owner), Some(repo)) => (owner.clone(), repo.clone()),
        _ => {
            let url = git.remote_url(REMOTE)?;
            parse_github_remote(&url)
                .ok_or_else(|| anyhow!("cannot derive owner/repo from remote '{url}'"))?
        }
    };
    let base = cfg
        .base
        .clone()
        .unwrap_or_else(|| request.start_branch.to_string());

    let url = host.open(&PullRequestRequest {
        owner,
        repo,
        head: request.branch.to_string(),
        base,
        title: title.to_string(),
        body: request.final_gameplan.to_string(),
    })?;
    if let Some(url) = &url {
        info!(%url, "pull request opened");
    }
    Ok(url)
}
