//! Pure logic shared by the loop.
//!
//! Core modules do no I/O. They parse and validate model replies, decide which
//! commands may run, and compute the next loop state.

pub mod branch;
pub mod changelog;
pub mod commands;
pub mod reply;
pub mod state;
pub mod types;
