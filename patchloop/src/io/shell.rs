//! Execution of model-requested commands.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::commands::{CommandGuard, CommandRejection};
use crate::core::state::CommandOutputs;
use crate::io::process::run_command_with_timeout;

/// Limits applied to each spawned command.
#[derive(Debug, Clone, Copy)]
pub struct ShellLimits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// What happened to every command of one iteration.
#[derive(Debug, Clone, Default)]
pub struct ShellReport {
    /// Outputs of the commands that ran, keyed by the command string.
    pub outputs: CommandOutputs,
    /// Commands the guard or the vocabulary refused, in request order.
    pub rejected: Vec<(String, CommandRejection)>,
}

impl ShellReport {
    /// True when no command was requested at all.
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty() && self.rejected.is_empty()
    }

    /// Text for `out.log`: outputs first, then rejections.
    pub fn render_log(&self) -> String {
        let mut buf = self.outputs.render();
        for (command, reason) in &self.rejected {
            if !buf.is_empty() {
                buf.push('\n');
            }
            buf.push_str(&format!("$ {command}\n[rejected: {reason}]\n"));
        }
        buf
    }
}

/// Run every admitted command in `root` and capture its output.
///
/// A command that fails, times out or cannot be spawned is recorded as text;
/// it never aborts the batch. Rejected commands are skipped and are not part of
/// `outputs`.
#[instrument(skip_all, fields(count = commands.len()))]
pub fn execute_commands(
    root: &Path,
    guard: &CommandGuard,
    commands: &[String],
    limits: ShellLimits,
) -> ShellReport {
    let mut report = ShellReport::default();
    for command in commands {
        let admitted = match guard.admit(command) {
            Ok(admitted) => admitted,
            Err(reason) => {
                warn!(%command, %reason, "skipping command");
                report.rejected.push((command.clone(), reason));
                continue;
            }
        };

        let (program, args) = admitted.argv();
        let mut cmd = Command::new(program);
        cmd.args(&args).current_dir(root);

        debug!(%command, "running command");
        let text = match run_command_with_timeout(cmd, limits.timeout, limits.output_limit_bytes) {
            Ok(output) => output.primary_text(),
            Err(err) => {
                warn!(%command, err = %format!("{err:#}"), "command did not run");
                format!("[failed to run: {err:#}]\n")
            }
        };
        report.outputs.insert(command.clone(), text);
    }
    report
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::io::git::Git;
    use crate::test_support::TestRepo;

    fn limits() -> ShellLimits {
        ShellLimits {
            timeout: Duration::from_secs(5),
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn runs_permitted_commands_in_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("marker.txt"), "present\n").expect("write");

        let report = execute_commands(
            temp.path(),
            &CommandGuard::default(),
            &["ls".to_string(), "cat marker.txt".to_string()],
            limits(),
        );

        assert!(report.rejected.is_empty());
        assert!(
            report
                .outputs
                .get("ls")
                .expect("ls output")
                .contains("marker.txt")
        );
        assert_eq!(report.outputs.get("cat marker.txt"), Some("present\n"));
    }

    #[test]
    fn rejected_commands_are_skipped_not_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("keep.txt"), "x").expect("write");

        let report = execute_commands(
            temp.path(),
            &CommandGuard::default(),
            &["ls && rm keep.txt".to_string(), "rm keep.txt".to_string()],
            limits(),
        );

        assert!(report.outputs.is_empty());
        assert_eq!(report.rejected.len(), 2);
        assert!(temp.path().join("keep.txt").exists());
        assert!(report.render_log().contains("[rejected:"));
    }

    #[test]
    fn file_writing_and_pager_options_leave_tree_untouched() {
        let repo = TestRepo::new().expect("repo");
        let marker = repo.scratch().join("spawned");
        let commands = vec![
            format!("git grep --open-files-in-pager=\"touch {}\" hi", marker.display()),
            "git diff --output=README.md HEAD".to_string(),
            "find . -maxdepth 1 -name README.md -fprint README.md".to_string(),
        ];

        let report = execute_commands(repo.path(), &CommandGuard::default(), &commands, limits());

        assert!(report.outputs.is_empty());
        assert_eq!(report.rejected.len(), 3);
        assert!(
            report
                .rejected
                .iter()
                .all(|(_, reason)| matches!(reason, CommandRejection::DisallowedOption(_)))
        );
        assert!(!marker.exists());
        assert_eq!(
            fs::read_to_string(repo.path().join("README.md")).expect("read"),
            "hi\n"
        );
        Git::new(repo.path()).ensure_clean().expect("tree unchanged");
    }

    #[test]
    fn failing_command_records_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = execute_commands(
            temp.path(),
            &CommandGuard::default(),
            &["cat missing.txt".to_string()],
            limits(),
        );
        let text = report.outputs.get("cat missing.txt").expect("output");
        assert!(text.contains("missing.txt"));
        assert!(text.contains("[exit status"));
    }
}
