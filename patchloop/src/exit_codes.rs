//! Stable exit codes for patchloop CLI commands.

/// Goal completed and finalized (or `check` accepted the command).
pub const OK: i32 = 0;
/// Fatal error before finalize; nothing was committed by patchloop.
pub const FAILED: i32 = 1;
/// Iteration ceiling reached without a complete reply; finalize still ran.
pub const EXHAUSTED: i32 = 2;
/// Commit, push or pull request creation failed during finalize.
pub const PARTIAL: i32 = 3;
/// `patchloop check` rejected the command.
pub const REJECTED: i32 = 4;
