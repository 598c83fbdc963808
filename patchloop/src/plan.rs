//! Planner: one chat call that names the branch and seeds the gameplan.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::core::branch::{fallback_branch, sanitize_branch};
use crate::core::reply::parse_plan_reply;
use crate::core::types::PlanReply;
use crate::io::chat::{ChatModel, ChatRequest};
use crate::io::config::ModelConfig;
use crate::io::context::resolve_in_repo;
use crate::io::git::Git;
use crate::io::prompt::PromptBuilder;

const FALLBACK_ATTEMPTS: usize = 10;

/// Where the run's branch name came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchSource {
    Model,
    Fallback,
}

/// Planner result, ready to seed the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub reply: PlanReply,
    pub branch: String,
    pub branch_source: BranchSource,
    /// First readable entry of `filesToRead`.
    pub working_file: Option<PathBuf>,
}

/// Ask the model for a plan. Touches nothing in the repository.
#[instrument(skip_all)]
pub fn request_plan<C: ChatModel>(
    git: &Git,
    chat: &C,
    model: &ModelConfig,
    prompts: &PromptBuilder,
    goal: &str,
) -> Result<PlanReply> {
    let tree = git.tracked_tree().context("list tracked files for planner")?;
    let prompt = prompts.build_planner(goal, &tree)?;
    let raw = chat.complete(&ChatRequest::new(model, prompts.system(), &prompt))?;
    let reply = parse_plan_reply(&raw)?;
    debug!(branch = %reply.branch, files_to_read = reply.files_to_read.len(), "plan received");
    Ok(reply)
}

/// Pick the run branch: the sanitized model proposal if it is free, otherwise
/// a random fallback that does not exist yet.
pub fn choose_branch<R: Rng>(
    git: &Git,
    goal: &str,
    proposed: &str,
    rng: &mut R,
) -> Result<(String, BranchSource)> {
    if let Some(name) = sanitize_branch(proposed) {
        if !git.branch_exists(&name)? {
            return Ok((name, BranchSource::Model));
        }
        warn!(branch = %name, "proposed branch already exists, using fallback");
    } else {
        warn!(proposed, "proposed branch is unusable, using fallback");
    }

    for _ in 0..FALLBACK_ATTEMPTS {
        let candidate = fallback_branch(goal, rng);
        if !git.branch_exists(&candidate)? {
            return Ok((candidate, BranchSource::Fallback));
        }
    }
    Err(anyhow!(
        "could not find a free branch name after {FALLBACK_ATTEMPTS} attempts"
    ))
}

/// Run the planner and resolve the branch and initial working file.
pub fn plan<C: ChatModel, R: Rng>(
    root: &Path,
    chat: &C,
    model: &ModelConfig,
    prompts: &PromptBuilder,
    goal: &str,
    rng: &mut R,
) -> Result<Plan> {
    let git = Git::new(root);
    let reply = request_plan(&git, chat, model, prompts, goal)?;
    let (branch, branch_source) = choose_branch(&git, goal, &reply.branch, rng)?;
    let working_file = initial_working_file(root, &reply.files_to_read);
    info!(%branch, ?branch_source, "planned");
    Ok(Plan {
        reply,
        branch,
        branch_source,
        working_file,
    })
}

fn initial_working_file(root: &Path, files_to_read: &[String]) -> Option<PathBuf> {
    let first = files_to_read.first()?;
    let path = PathBuf::from(first);
    match resolve_in_repo(root, &path) {
        Ok(full) if full.is_file() => Some(path),
        Ok(_) => {
            warn!(path = %first, "planned file does not exist, starting without a working file");
            None
        }
        Err(err) => {
            warn!(path = %first, err = %err, "ignoring planned file");
            None
        }
    }
}
