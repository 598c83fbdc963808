//! Parsing and validation of model replies.
//!
//! Every reply goes through the same three gates: strip an optional markdown
//! fence, parse JSON, validate against the embedded JSON Schema. Anything that
//! fails surfaces as a [`ReplyError`] so callers can tell a bad reply apart from
//! transport or I/O failures (`err.downcast_ref::<ReplyError>()`).

use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::types::{FinalizeReply, IterationReply, NextIteration, PlanReply, ReplyOutcome};

const ITERATION_REPLY_SCHEMA: &str = include_str!("../../schemas/iteration_reply.schema.json");
const PLAN_REPLY_SCHEMA: &str = include_str!("../../schemas/plan_reply.schema.json");
const FINALIZE_REPLY_SCHEMA: &str = include_str!("../../schemas/finalize_reply.schema.json");

type CompiledSchema = Result<Validator, String>;

static ITERATION_REPLY_VALIDATOR: LazyLock<CompiledSchema> =
    LazyLock::new(|| compile_schema(ITERATION_REPLY_SCHEMA));
static PLAN_REPLY_VALIDATOR: LazyLock<CompiledSchema> =
    LazyLock::new(|| compile_schema(PLAN_REPLY_SCHEMA));
static FINALIZE_REPLY_VALIDATOR: LazyLock<CompiledSchema> =
    LazyLock::new(|| compile_schema(FINALIZE_REPLY_SCHEMA));

/// A model reply that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplyError {
    #[error("malformed model reply: not valid JSON ({reason})")]
    MalformedJson { reason: String },
    #[error("malformed model reply: {}", violations.join("; "))]
    SchemaViolation { violations: Vec<String> },
    #[error("malformed model reply: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IterationReplyWire {
    #[serde(default)]
    patch: Option<String>,
    #[serde(default)]
    patch_description: Option<String>,
    #[serde(default)]
    next_iteration: Option<NextIterationWire>,
    complete: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextIterationWire {
    #[serde(default)]
    gameplan: Option<String>,
    #[serde(default)]
    commands: Option<Vec<String>>,
    #[serde(default)]
    working_file: Option<String>,
}

/// Parse an iteration reply.
///
/// `complete: true` wins over any `nextIteration` the model also sent, whatever
/// its shape. When `complete` is false a non-blank `nextIteration.gameplan` is
/// mandatory; `commands` may be missing or null.
pub fn parse_iteration_reply(raw: &str) -> Result<IterationReply> {
    let wire: IterationReplyWire = parse_validated(raw, &ITERATION_REPLY_VALIDATOR)?;

    let patch = wire.patch.as_deref().and_then(normalize_patch);
    let description = wire
        .patch_description
        .map(|d| d.trim().to_string())
        .unwrap_or_default();

    let outcome = if wire.complete {
        ReplyOutcome::Complete
    } else {
        let next = wire.next_iteration.ok_or_else(|| {
            ReplyError::Inconsistent("nextIteration is required unless complete is true".into())
        })?;
        let gameplan = next.gameplan.as_deref().map(str::trim).unwrap_or_default();
        if gameplan.is_empty() {
            return Err(ReplyError::Inconsistent("nextIteration.gameplan is empty".into()).into());
        }
        ReplyOutcome::Continue(NextIteration {
            gameplan: gameplan.to_string(),
            commands: next
                .commands
                .unwrap_or_default()
                .iter()
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
            working_file: next
                .working_file
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        })
    };

    Ok(IterationReply {
        patch,
        description,
        outcome,
    })
}

/// Parse the planner's reply. The branch is returned as sent; sanitizing it is
/// the caller's job (see [`crate::core::branch`]).
pub fn parse_plan_reply(raw: &str) -> Result<PlanReply> {
    let mut reply: PlanReply = parse_validated(raw, &PLAN_REPLY_VALIDATOR)?;
    reply.branch = reply.branch.trim().to_string();
    reply.plan = reply
        .plan
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());
    for list in [
        &mut reply.files_to_read,
        &mut reply.files_to_write,
        &mut reply.changes,
    ] {
        list.retain(|item| !item.trim().is_empty());
        for item in list.iter_mut() {
            *item = item.trim().to_string();
        }
    }
    Ok(reply)
}

/// Parse the finalizer's reply, keeping only the first line of the commit message.
pub fn parse_finalize_reply(raw: &str) -> Result<FinalizeReply> {
    let mut reply: FinalizeReply = parse_validated(raw, &FINALIZE_REPLY_VALIDATOR)?;
    let first_line = reply
        .commit_message
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string();
    if first_line.is_empty() {
        return Err(ReplyError::Inconsistent("commitMessage is blank".into()).into());
    }
    reply.commit_message = first_line;
    Ok(reply)
}

/// Remove a surrounding ```` ``` ```` / ```` ```json ```` fence, if any.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`, `JSON`, ...) on the opening line.
    match rest.split_once('\n') {
        Some((_, body)) => body.trim(),
        None => rest.trim(),
    }
}

fn parse_validated<T: DeserializeOwned>(raw: &str, schema: &CompiledSchema) -> Result<T> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body).map_err(|err| ReplyError::MalformedJson {
        reason: err.to_string(),
    })?;
    validate_schema(schema, &value)?;
    let parsed = serde_json::from_value(value).map_err(|err| ReplyError::SchemaViolation {
        violations: vec![err.to_string()],
    })?;
    Ok(parsed)
}

fn compile_schema(schema: &str) -> CompiledSchema {
    let schema_value: Value =
        serde_json::from_str(schema).map_err(|err| format!("parse embedded schema: {err}"))?;
    validator_for(&schema_value).map_err(|err| format!("invalid embedded schema: {err}"))
}

fn validate_schema(schema: &CompiledSchema, instance: &Value) -> Result<()> {
    let compiled = schema.as_ref().map_err(|err| anyhow!("{err}"))?;
    let violations: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !violations.is_empty() {
        return Err(ReplyError::SchemaViolation { violations }.into());
    }
    Ok(())
}

/// `git apply` rejects a patch whose last line lacks a newline, and models
/// routinely drop it.
fn normalize_patch(patch: &str) -> Option<String> {
    if patch.trim().is_empty() {
        return None;
    }
    let mut out = patch.trim_start_matches('\n').to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    Some(out)
}
