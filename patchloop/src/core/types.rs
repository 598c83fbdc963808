//! Shared types for model replies.
//!
//! These are the validated, in-memory forms of what the model returns. Wire
//! shapes (camelCase JSON) live in [`crate::core::reply`]; everything past the
//! parser works with these.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Planner reply: branch name plus an optional opening strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanReply {
    pub branch: String,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub files_to_read: Vec<String>,
    #[serde(default)]
    pub files_to_write: Vec<String>,
    #[serde(default)]
    pub changes: Vec<String>,
}

/// What the loop should do after this iteration's patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The model considers the goal met. Stop without running commands.
    Complete,
    /// Keep going with a fresh gameplan.
    Continue(NextIteration),
}

/// The model's request for the next iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextIteration {
    pub gameplan: String,
    pub commands: Vec<String>,
    pub working_file: Option<PathBuf>,
}

/// One validated iteration reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReply {
    /// Unified diff, `None` when the model returned no (or an empty) patch.
    pub patch: Option<String>,
    pub description: String,
    pub outcome: ReplyOutcome,
}

impl IterationReply {
    pub fn is_complete(&self) -> bool {
        matches!(self.outcome, ReplyOutcome::Complete)
    }
}

/// Finalizer reply: commit message and structured change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeReply {
    pub commit_message: String,
    #[serde(default)]
    pub change_log: ChangeLog,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLog {
    #[serde(default)]
    pub breaking_changes: Vec<String>,
    #[serde(default)]
    pub new_features: Vec<String>,
    #[serde(default)]
    pub bug_fixes: Vec<String>,
}

impl ChangeLog {
    pub fn is_empty(&self) -> bool {
        self.breaking_changes.is_empty() && self.new_features.is_empty() && self.bug_fixes.is_empty()
    }
}
