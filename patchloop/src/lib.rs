//! LLM-driven patch iteration for a local git repository.
//!
//! A run plans a branch, then loops: gather repository context, ask the model
//! for a patch plus the next gameplan, apply the patch, run the read-only
//! commands the model asked for, and feed their output back. It stops when the
//! model reports the goal complete or the iteration ceiling is hit, then
//! commits the result and can open a pull request.
//!
//! - **[`core`]**: Pure logic (reply parsing, command vetting, loop state,
//!   branch naming). No I/O.
//! - **[`io`]**: Side-effecting collaborators (git, processes, chat API,
//!   code host, filesystem). Traits sit at the remote seams so tests can script
//!   them.
//!
//! Orchestration modules ([`plan`], [`iterate`], [`finalize`], [`run`])
//! coordinate the two to implement the CLI commands.

pub mod core;
pub mod exit_codes;
pub mod finalize;
pub mod io;
pub mod iterate;
pub mod logging;
pub mod plan;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
