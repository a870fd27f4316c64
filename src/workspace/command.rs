//! Shell command execution with wall-clock timeouts.
//!
//! Every subprocess the pipeline starts (setup, build, run and test
//! commands) goes through [`run_shell`]. Each command runs in its own
//! process group; when it finishes or exceeds its timeout the whole group is
//! killed, so background children cannot keep touching the workspace. A
//! timeout is reported as [`CommandError::TimedOut`].

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::CommandError;

/// Timeout for one I/O-oracle test case.
pub const CASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for setup, build and test-suite commands.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Captured result of a finished shell command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Returns true if the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Exit code with signals folded into `-1`.
    pub fn code(&self) -> i32 {
        self.exit_code.unwrap_or(-1)
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// The most useful diagnostic text: stderr when present, else stdout.
    pub fn diagnostic(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Runs `command` through `sh -c` inside `cwd`.
///
/// When `stdin` is given it is written to the child's standard input, which
/// is then closed. The child is killed if it outlives `timeout`.
pub async fn run_shell(
    command: &str,
    cwd: &Path,
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    debug!(command = command, cwd = %cwd.display(), "Running shell command");

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
        command: command.to_string(),
        source,
    })?;
    let pid = child.id();

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let input = input.to_owned();
        // Written on its own task so a child that never reads stdin cannot
        // block output collection.
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(input.as_bytes()).await {
                debug!(error = %e, "stdin closed before input was fully written");
            }
            let _ = pipe.shutdown().await;
        });
    }

    let waited = tokio::time::timeout(timeout, child.wait_with_output()).await;
    if let Some(pid) = pid {
        kill_process_group(pid);
    }

    match waited {
        Ok(Ok(output)) => Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }),
        Ok(Err(e)) => Err(CommandError::Io(e)),
        Err(_) => {
            warn!(command = command, timeout_secs = timeout.as_secs(), "Command timed out");
            Err(CommandError::TimedOut(timeout))
        }
    }
}

/// Sends SIGKILL to every process left in the group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg only takes plain integers.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!(pgid, error = %err, "Failed to kill process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Keeps at most `max_chars` characters from the start of `s`.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
