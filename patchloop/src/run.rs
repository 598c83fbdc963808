//! Top-level orchestration: plan, branch, loop, finalize.

use std::path::Path;

use anyhow::{Context, Result};
use rand::Rng;
use tracing::{info, instrument};

use crate::core::state::IterationState;
use crate::exit_codes;
use crate::finalize::{FinalizeOutcome, FinalizeRequest, finalize};
use crate::io::chat::ChatModel;
use crate::io::config::LoopConfig;
use crate::io::git::Git;
use crate::io::layout::ensure_layout;
use crate::io::prompt::PromptBuilder;
use crate::io::pull_request::PullRequestHost;
use crate::iterate::{IterationSummary, LoopOutcome, LoopRequest, LoopStop, run_loop};
use crate::plan::{BranchSource, plan};

/// Summary of a full run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub branch: String,
    pub branch_source: BranchSource,
    pub start_branch: String,
    pub iterations: LoopOutcome,
    pub finalize: FinalizeOutcome,
}

impl RunOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        if !self.finalize.is_clean() {
            return exit_codes::PARTIAL;
        }
        match self.iterations.stop {
            LoopStop::Complete { .. } => exit_codes::OK,
            LoopStop::CeilingReached { .. } => exit_codes::EXHAUSTED,
        }
    }
}

/// Collaborators for one run.
pub struct Collaborators<'a, C: ChatModel> {
    pub chat: &'a C,
    pub pull_requests: Option<&'a dyn PullRequestHost>,
}

/// Plan, create the branch, iterate and finalize.
///
/// Refuses to start on a dirty working tree. Any error before the loop
/// finishes leaves the branch checked out and nothing committed.
#[instrument(skip_all)]
pub fn run<C: ChatModel, R: Rng, F: FnMut(&IterationSummary)>(
    root: &Path,
    config: &LoopConfig,
    collaborators: &Collaborators<'_, C>,
    goal: &str,
    rng: &mut R,
    on_iteration: F,
) -> Result<RunOutcome> {
    let git = Git::new(root);
    ensure_layout(root)?;
    git.ensure_clean()?;
    let start_branch = git.current_branch()?;

    let prompts = PromptBuilder::new(config.iteration.prompt_budget_bytes)?;
    let plan = plan(root, collaborators.chat, &config.model, &prompts, goal, rng)?;
    git.checkout_new_branch(&plan.branch)
        .with_context(|| format!("create branch {}", plan.branch))?;
    info!(branch = %plan.branch, from = %start_branch, "branch created");

    let initial = IterationState::initial(plan.reply.plan.clone(), plan.working_file.clone());
    let iterations = run_loop(
        &LoopRequest {
            root,
            goal,
            branch: &plan.branch,
            config,
            prompts: &prompts,
        },
        collaborators.chat,
        initial,
        on_iteration,
    )?;

    let finalize = finalize(
        &FinalizeRequest {
            root,
            goal,
            branch: &plan.branch,
            start_branch: &start_branch,
            final_gameplan: &iterations.final_gameplan,
            config,
            prompts: &prompts,
        },
        collaborators.chat,
        collaborators.pull_requests,
    );

    Ok(RunOutcome {
        branch: plan.branch,
        branch_source: plan.branch_source,
        start_branch,
        iterations,
        finalize,
    })
}
