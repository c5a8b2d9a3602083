//! Helpers for running child processes with timeouts and bounded output.

use std::io::{ErrorKind, Read, Write};
use std::process::{ChildStdin, Command, ExitStatus, Stdio};
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

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Both streams in one human-readable transcript, with truncation notes.
    pub fn transcript(&self, label: &str) -> String {
        let mut buf = String::new();
        buf.push_str("=== stdout ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stdout));
        buf.push_str(&self.stdout_truncated_notice(label));
        buf.push_str("\n=== stderr ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stderr));
        buf.push_str(&self.stderr_truncated_notice(label));
        if self.timed_out {
            buf.push_str(&format!("\n[{label} timed out]\n"));
        }
        buf
    }

    pub fn stdout_truncated_notice(&self, label: &str) -> String {
        if self.stdout_truncated > 0 {
            format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            )
        } else {
            String::new()
        }
    }

    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        if self.stderr_truncated > 0 {
            format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            )
        } else {
            String::new()
        }
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {}", cmd.get_program().to_string_lossy()));
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

    // Feed stdin from its own thread so the timeout also covers a child that never reads.
    let stdin_handle = match stdin {
        Some(input) => {
            let child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || write_stdin(child_stdin, &input)))
        }
        None => None,
    };

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

    if let Some(handle) = stdin_handle {
        match handle.join() {
            Ok(result) => result.context("write stdin")?,
            Err(_) => return Err(anyhow!("stdin writer thread panicked")),
        }
    }

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

/// A child may exit without reading all of its input; its exit status decides the outcome.
fn write_stdin(mut pipe: ChildStdin, input: &[u8]) -> Result<()> {
    match pipe.write_all(input) {
        Err(e) if e.kind() == ErrorKind::BrokenPipe => {
            debug!(input_bytes = input.len(), "child closed stdin early");
            Ok(())
        }
        other => other.map_err(Into::into),
    }
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
