//! Child processes with timeouts and bounded output.
//!
//! Every external program the agent drives (git, the test runner, the PR CLI,
//! the package installer) goes through [`run_command_with_timeout`], so a hung
//! child can never stall the loop and a chatty one can never exhaust memory.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long to keep collecting output once the child has exited. Readers still
/// blocked after this are abandoned.
const READER_GRACE: Duration = Duration::from_secs(2);

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

    /// Stdout followed by stderr, with truncation notices, for model-facing logs.
    pub fn combined_text(&self, label: &str) -> String {
        let mut text = self.stdout_text();
        if self.stdout_truncated > 0 {
            text.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        let stderr = self.stderr_text();
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        if self.stderr_truncated > 0 {
            text.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        if self.timed_out {
            text.push_str(&format!("\n[{label} timed out and was killed]\n"));
        }
        text
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
///
/// On unix the child leads its own process group, and a timeout kills the whole group so
/// grandchildren holding the output pipes cannot outlive the deadline.
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
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel();
    let stdout_tx = tx.clone();
    thread::spawn(move || {
        let _ = stdout_tx.send((Stream::Stdout, read_stream_limited(stdout, output_limit_bytes)));
    });
    thread::spawn(move || {
        let _ = tx.send((Stream::Stderr, read_stream_limited(stderr, output_limit_bytes)));
    });

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => {
            // Background descendants left behind would keep the pipes open.
            #[cfg(unix)]
            if let Err(err) = kill_process_group(&mut child) {
                debug!(err = %err, "could not reap leftover process group");
            }
            status
        }
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing process group"
            );
            timed_out = true;
            kill_process_group(&mut child).context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let ((stdout, stdout_truncated), (stderr, stderr_truncated)) = collect_output(&rx)?;

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

enum Stream {
    Stdout,
    Stderr,
}

type StreamOutput = (Vec<u8>, usize);

/// Wait up to [`READER_GRACE`] for both readers. A stream whose reader is still
/// blocked (a detached descendant kept the pipe open) comes back empty.
fn collect_output(
    rx: &mpsc::Receiver<(Stream, Result<StreamOutput>)>,
) -> Result<(StreamOutput, StreamOutput)> {
    let deadline = Instant::now() + READER_GRACE;
    let mut stdout = None;
    let mut stderr = None;
    while stdout.is_none() || stderr.is_none() {
        let wait = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok((Stream::Stdout, result)) => stdout = Some(result.context("read stdout")?),
            Ok((Stream::Stderr, result)) => stderr = Some(result.context("read stderr")?),
            Err(RecvTimeoutError::Timeout) => {
                warn!("output pipes still open after the child exited, abandoning readers");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("output reader thread panicked"));
            }
        }
    }
    Ok((stdout.unwrap_or_default(), stderr.unwrap_or_default()))
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    // The child was spawned with `process_group(0)`, so its pid is the group id.
    let pgid = Pid::from_raw(child.id() as i32);
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(std::io::Error::from(errno)),
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) -> std::io::Result<()> {
    child.kill()
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
    fn captures_output_and_exit_status() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = run_command_with_timeout(cmd, None, Duration::from_secs(10), 1024)
            .expect("run");
        assert!(!output.success());
        assert_eq!(output.status.code(), Some(3));
        let text = output.combined_text("sh");
        assert!(text.contains("out"));
        assert!(text.contains("err"));
    }

    #[test]
    fn truncates_output_beyond_limit() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf '0123456789'"]);
        let output =
            run_command_with_timeout(cmd, None, Duration::from_secs(10), 4).expect("run");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
        assert!(output.combined_text("sh").contains("truncated 6 bytes"));
    }

    #[test]
    fn kills_child_on_timeout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5"]);
        let output = run_command_with_timeout(cmd, None, Duration::from_millis(200), 1024)
            .expect("run");
        assert!(output.timed_out);
        assert!(!output.success());
    }

    #[test]
    fn timeout_kills_grandchildren_holding_the_pipes() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 6; echo done"]);
        let started = Instant::now();
        let output =
            run_command_with_timeout(cmd, None, Duration::from_secs(1), 1024).expect("run");
        let elapsed = started.elapsed();

        assert!(output.timed_out);
        assert!(elapsed < Duration::from_secs(4), "1s timeout took {elapsed:?}");
        assert!(!output.stdout_text().contains("done"));
    }

    #[test]
    fn background_descendant_does_not_hold_a_finished_command() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 6 & echo started"]);
        let started = Instant::now();
        let output =
            run_command_with_timeout(cmd, None, Duration::from_secs(30), 1024).expect("run");

        assert!(!output.timed_out);
        assert!(output.success());
        assert_eq!(output.stdout_text().trim(), "started");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn feeds_stdin() {
        let mut cmd = Command::new("cat");
        cmd.arg("-");
        let output = run_command_with_timeout(cmd, Some(b"hello"), Duration::from_secs(10), 1024)
            .expect("run");
        assert_eq!(output.stdout_text(), "hello");
    }
}
