//! The iteration loop: prompt, reply, patch, commands, repeat.
//!
//! Each iteration consumes the previous [`IterationState`] and produces the
//! next one. The loop ends when a reply is complete or when the configured
//! ceiling is reached, whichever comes first.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::reply::parse_iteration_reply;
use crate::core::state::{CommandOutputs, IterationState};
use crate::core::types::ReplyOutcome;
use crate::io::chat::{ChatModel, ChatRequest};
use crate::io::config::{LoopConfig, PatchFailurePolicy};
use crate::io::context::gather_context;
use crate::io::git::{ApplyOutcome, Git, write_and_apply};
use crate::io::iteration_log::{IterationMeta, IterationPaths, PatchStatus, write_json, write_text};
use crate::io::prompt::{IterationPromptInputs, PromptBuilder};
use crate::io::shell::{ShellLimits, execute_commands};

/// Key under which a failed patch is reported back to the model.
pub const PATCH_FAILURE_KEY: &str = "git apply patch";

/// Raised when a patch does not apply and the policy is `abort`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("patch from iteration {iter} did not apply: {stderr}")]
pub struct PatchRejectedError {
    pub iter: u32,
    pub stderr: String,
}

/// Shared inputs for every iteration of one run.
#[derive(Debug, Clone, Copy)]
pub struct LoopRequest<'a> {
    pub root: &'a Path,
    pub goal: &'a str,
    pub branch: &'a str,
    pub config: &'a LoopConfig,
    pub prompts: &'a PromptBuilder,
}

/// Reported to the caller after every iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationSummary {
    pub iter: u32,
    pub patch: PatchStatus,
    pub description: String,
    pub complete: bool,
    pub commands_run: usize,
    pub commands_rejected: usize,
}

/// Reason why [`run_loop`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The model declared the goal met at `iter`.
    Complete { iter: u32 },
    /// Every allowed iteration ran without a complete reply.
    CeilingReached { max_iterations: u32 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub iterations: u32,
    pub stop: LoopStop,
    /// Gameplan in effect when the loop stopped.
    pub final_gameplan: String,
}

enum Step {
    Complete,
    Continue(IterationState),
}

/// Run iterations until a complete reply or `max_iterations`.
///
/// Malformed replies, missing context files and (under the `abort` policy)
/// rejected patches stop the loop with an error.
#[instrument(skip_all, fields(branch = %request.branch))]
pub fn run_loop<C: ChatModel, F: FnMut(&IterationSummary)>(
    request: &LoopRequest<'_>,
    chat: &C,
    initial: IterationState,
    mut on_iteration: F,
) -> Result<LoopOutcome> {
    let max_iterations = request.config.iteration.max_iterations;
    let mut state = initial;
    let mut iterations = 0u32;

    while state.iter < max_iterations {
        let iter = state.iter;
        let gameplan = state.gameplan.clone();
        let (summary, step) = run_iteration(request, chat, state)?;
        iterations += 1;
        on_iteration(&summary);
        match step {
            Step::Complete => {
                info!(iter, "goal reported complete");
                return Ok(LoopOutcome {
                    iterations,
                    stop: LoopStop::Complete { iter },
                    final_gameplan: gameplan,
                });
            }
            Step::Continue(next) => state = next,
        }
    }

    info!(max_iterations, "iteration ceiling reached");
    Ok(LoopOutcome {
        iterations,
        stop: LoopStop::CeilingReached { max_iterations },
        final_gameplan: state.gameplan,
    })
}

fn run_iteration<C: ChatModel>(
    request: &LoopRequest<'_>,
    chat: &C,
    state: IterationState,
) -> Result<(IterationSummary, Step)> {
    let started_at = Utc::now();
    let clock = Instant::now();
    let config = request.config;
    let iter = state.iter;
    let paths = IterationPaths::new(request.root, request.branch, iter);
    paths.create()?;

    let bundle = gather_context(request.root, &config.iteration.readme_path, &state)?;
    let prompt = request.prompts.build_iteration(
        &IterationPromptInputs {
            goal: request.goal,
            gameplan: &state.gameplan,
            iter,
            max_iterations: config.iteration.max_iterations,
            allowed_prefixes: &config.commands.allowed_prefixes,
        },
        &bundle,
    )?;
    write_text(&paths.prompt_path, &prompt)?;

    let raw = chat.complete(&ChatRequest::new(&config.model, request.prompts.system(), &prompt))?;
    write_text(&paths.response_path, &raw)?;
    let reply = parse_iteration_reply(&raw)?;
    debug!(iter, complete = reply.is_complete(), has_patch = reply.patch.is_some(), "reply parsed");

    let mut summary = IterationSummary {
        iter,
        patch: PatchStatus::None,
        description: reply.description.clone(),
        complete: reply.is_complete(),
        commands_run: 0,
        commands_rejected: 0,
    };

    let mut patch_failure = None;
    if let Some(patch) = &reply.patch {
        match write_and_apply(&Git::new(request.root), &paths.patch_path, patch)? {
            ApplyOutcome::Applied => summary.patch = PatchStatus::Applied,
            ApplyOutcome::Rejected { stderr } => {
                summary.patch = PatchStatus::Rejected;
                write_text(&paths.apply_log_path, &format!("{stderr}\n"))?;
                warn!(iter, "patch rejected, tree left unchanged");
                patch_failure = Some(stderr);
            }
        }
    }

    if let Some(stderr) = &patch_failure
        && config.iteration.on_patch_failure == PatchFailurePolicy::Abort
    {
        write_meta(&paths, request.branch, &summary, started_at, clock.elapsed())?;
        return Err(PatchRejectedError {
            iter,
            stderr: stderr.clone(),
        }
        .into());
    }

    let step = match &reply.outcome {
        ReplyOutcome::Complete => {
            if patch_failure.is_some() {
                warn!(iter, "complete reply carried a patch that did not apply");
            }
            write_text(&paths.complete_path, &format!("{}\n", reply.description))?;
            Step::Complete
        }
        ReplyOutcome::Continue(next) => {
            let report = execute_commands(
                request.root,
                &config.commands.guard(),
                &next.commands,
                ShellLimits {
                    timeout: Duration::from_secs(config.commands.timeout_secs),
                    output_limit_bytes: config.commands.output_limit_bytes,
                },
            );
            summary.commands_run = report.outputs.len();
            summary.commands_rejected = report.rejected.len();
            if !report.is_empty() {
                write_text(&paths.out_log_path, &report.render_log())?;
            }

            let mut outputs = CommandOutputs::new();
            if let Some(stderr) = patch_failure {
                outputs.insert(PATCH_FAILURE_KEY, stderr);
            }
            for (command, output) in report.outputs.iter() {
                outputs.insert(command, output);
            }

            write_text(&paths.next_gameplan_path, &format!("{}\n", next.gameplan))?;
            Step::Continue(state.advance(next, outputs))
        }
    };

    write_meta(&paths, request.branch, &summary, started_at, clock.elapsed())?;
    Ok((summary, step))
}

fn write_meta(
    paths: &IterationPaths,
    branch: &str,
    summary: &IterationSummary,
    started_at: chrono::DateTime<Utc>,
    elapsed: Duration,
) -> Result<()> {
    let meta = IterationMeta {
        branch: branch.to_string(),
        iter: summary.iter,
        patch: summary.patch,
        complete: summary.complete,
        commands_run: summary.commands_run,
        commands_rejected: summary.commands_rejected,
        started_at,
        ended_at: Utc::now(),
        duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
    };
    write_json(&paths.meta_path, &meta)
}
