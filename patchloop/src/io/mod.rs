//! Side-effecting collaborators: filesystem, git, processes and remote APIs.

pub mod chat;
pub mod config;
pub mod context;
pub mod git;
pub mod iteration_log;
pub mod layout;
pub mod process;
pub mod prompt;
pub mod pull_request;
pub mod shell;
