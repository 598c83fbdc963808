//! Child process execution with a timeout and bounded output capture.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Stdout on success, stderr otherwise, with truncation and timeout notes.
    pub fn primary_text(&self) -> String {
        let (bytes, truncated, label) = if self.success() {
            (&self.stdout, self.stdout_truncated, "stdout")
        } else {
            (&self.stderr, self.stderr_truncated, "stderr")
        };
        let mut text = String::from_utf8_lossy(bytes).into_owned();
        if truncated > 0 {
            text.push_str(&format!("\n[{label} truncated {truncated} bytes]\n"));
        }
        if self.timed_out {
            text.push_str("\n[timed out]\n");
        } else if !self.status.success() {
            match self.status.code() {
                Some(code) => text.push_str(&format!("\n[exit status {code}]\n")),
                None => text.push_str("\n[terminated by signal]\n"),
            }
        }
        text
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_on_success() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let out = run_command_with_timeout(cmd, Duration::from_secs(5), 1_000).expect("run");
        assert!(out.success());
        assert_eq!(out.primary_text().trim(), "hello");
    }

    #[test]
    fn reports_stderr_and_exit_status_on_failure() {
        let mut cmd = Command::new("ls");
        cmd.arg("definitely-not-a-real-path");
        let out = run_command_with_timeout(cmd, Duration::from_secs(5), 1_000).expect("run");
        assert!(!out.success());
        let text = out.primary_text();
        assert!(text.contains("definitely-not-a-real-path"));
        assert!(text.contains("[exit status"));
    }

    #[test]
    fn truncates_output_beyond_limit() {
        let mut cmd = Command::new("echo");
        cmd.arg("0123456789");
        let out = run_command_with_timeout(cmd, Duration::from_secs(5), 4).expect("run");
        assert_eq!(out.stdout, b"0123");
        assert!(out.primary_text().contains("[stdout truncated 7 bytes]"));
    }

    #[test]
    fn kills_command_after_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let out = run_command_with_timeout(cmd, Duration::from_millis(100), 1_000).expect("run");
        assert!(out.timed_out);
        assert!(out.primary_text().contains("[timed out]"));
    }
}
