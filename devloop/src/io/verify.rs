//! Verification runner: executes the project's tests against one target.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::types::TestOutcome;
use crate::io::config::VerifyConfig;
use crate::io::process::run_command_with_timeout;
use crate::io::workspace::{Workspace, WorkspaceError};

/// Appended to every failing log handed back to the model.
pub const FAILURE_INSTRUCTION: &str = "INSTRUCTION: Analyze the failure log above, fix the code \
     or the tests, then run the tests again. Do not commit until the tests pass.";

/// Per-stream capture bound; the combined log is tail-truncated afterwards.
const CAPTURE_LIMIT_BYTES: usize = 1_000_000;

#[derive(Debug, Clone)]
pub struct TestRequest {
    pub workdir: PathBuf,
    /// Workspace-relative target, passed to the runner as-is.
    pub target: String,
    pub timeout: Duration,
}

pub trait TestRunner {
    fn run(&self, request: &TestRequest) -> Result<TestOutcome>;
}

/// Runs the configured test command with the target appended.
pub struct CommandTestRunner {
    command: Vec<String>,
    include_path_var: String,
}

impl CommandTestRunner {
    pub fn new(config: &VerifyConfig) -> Self {
        Self {
            command: config.command.clone(),
            include_path_var: config.include_path_var.clone(),
        }
    }
}

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(target = %request.target))]
    fn run(&self, request: &TestRequest) -> Result<TestOutcome> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("verify.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&request.target)
            .current_dir(&request.workdir);
        if !self.include_path_var.is_empty() {
            cmd.env(
                &self.include_path_var,
                prepend_path(&request.workdir, std::env::var_os(&self.include_path_var))?,
            );
        }

        let output = run_command_with_timeout(cmd, None, request.timeout, CAPTURE_LIMIT_BYTES)?;
        let passed = output.success();
        info!(passed, exit_code = ?output.status.code(), "tests finished");
        Ok(TestOutcome {
            passed,
            log: output.combined_text(program),
        })
    }
}

fn prepend_path(first: &std::path::Path, existing: Option<OsString>) -> Result<OsString> {
    let mut paths = vec![first.to_path_buf()];
    if let Some(existing) = existing {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).map_err(|err| anyhow!("build include path: {err}"))
}

/// Run `target` inside the workspace.
///
/// A missing target fails without invoking the runner. Failing logs are
/// bounded to `config.output_limit_bytes` (keeping the tail, where test
/// summaries live) and end with [`FAILURE_INSTRUCTION`].
pub fn verify_target<R: TestRunner + ?Sized>(
    workspace: &Workspace,
    runner: &R,
    config: &VerifyConfig,
    target: &str,
) -> std::result::Result<TestOutcome, WorkspaceError> {
    workspace.ensure_ready()?;
    let path = workspace.resolve(target)?;
    if !path.exists() {
        warn!(target, "test target missing");
        return Ok(TestOutcome {
            passed: false,
            log: format!(
                "Test target '{target}' does not exist in the workspace. Write the test file \
                 first, then run it."
            ),
        });
    }

    let request = TestRequest {
        workdir: workspace.root().to_path_buf(),
        target: target.trim().to_string(),
        timeout: Duration::from_secs(config.timeout_secs),
    };
    let outcome = runner.run(&request)?;
    let mut log = tail_bounded(&outcome.log, config.output_limit_bytes);
    if !outcome.passed {
        if !log.ends_with('\n') {
            log.push('\n');
        }
        log.push('\n');
        log.push_str(FAILURE_INSTRUCTION);
    }
    Ok(TestOutcome {
        passed: outcome.passed,
        log,
    })
}

/// Keep at most the last `limit` bytes of `text` on a char boundary.
pub fn tail_bounded(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[... {start} earlier bytes omitted ...]\n{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::fs;

    use super::*;
    use crate::io::config::WorkspaceConfig;
    use crate::io::git::Git;
    use crate::test_support::TestRemote;

    struct CountingRunner {
        calls: Cell<u32>,
        outcome: TestOutcome,
    }

    impl TestRunner for CountingRunner {
        fn run(&self, _request: &TestRequest) -> Result<TestOutcome> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.outcome.clone())
        }
    }

    fn workspace(remote: &TestRemote, dir: &std::path::Path) -> Workspace {
        let git = Git::new(dir.join("ws"), Duration::from_secs(30));
        let ws = Workspace::new(WorkspaceConfig::default(), Some(remote.url()), Box::new(git));
        ws.init("feature/x", None).expect("init");
        ws
    }

    fn sh_config() -> VerifyConfig {
        VerifyConfig {
            command: vec!["sh".to_string()],
            include_path_var: "DEVLOOP_TEST_INCLUDE".to_string(),
            timeout_secs: 30,
            output_limit_bytes: 4_000,
        }
    }

    #[test]
    fn missing_target_never_invokes_the_runner() {
        let remote = TestRemote::new();
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = workspace(&remote, temp.path());
        let runner = CountingRunner {
            calls: Cell::new(0),
            outcome: TestOutcome {
                passed: true,
                log: String::new(),
            },
        };

        let outcome =
            verify_target(&ws, &runner, &sh_config(), "tests/test_missing.sh").expect("verify");
        assert!(!outcome.passed);
        assert!(outcome.log.contains("does not exist"));
        assert_eq!(runner.calls.get(), 0);
    }

    #[test]
    fn target_outside_workspace_is_rejected() {
        let remote = TestRemote::new();
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = workspace(&remote, temp.path());
        let runner = CommandTestRunner::new(&sh_config());
        let err = verify_target(&ws, &runner, &sh_config(), "../x.sh").unwrap_err();
        assert!(matches!(err, WorkspaceError::OutsideWorkspace(_)));
    }

    #[test]
    fn passing_script_runs_with_workspace_on_include_path() {
        let remote = TestRemote::new();
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = workspace(&remote, temp.path());
        ws.write("tests/test_ok.sh", "echo \"include=$DEVLOOP_TEST_INCLUDE\"\nexit 0\n")
            .expect("write");

        let runner = CommandTestRunner::new(&sh_config());
        let outcome =
            verify_target(&ws, &runner, &sh_config(), "tests/test_ok.sh").expect("verify");
        assert!(outcome.passed, "{}", outcome.log);
        let expected = format!("include={}", ws.root().display());
        assert!(outcome.log.contains(&expected), "{}", outcome.log);
        assert!(!outcome.log.contains(FAILURE_INSTRUCTION));
    }

    #[test]
    fn failing_script_log_carries_instruction() {
        let remote = TestRemote::new();
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = workspace(&remote, temp.path());
        fs::create_dir_all(ws.root().join("tests")).expect("dir");
        ws.write("tests/test_bad.sh", "echo 'AssertionError: 1 != 2' >&2\nexit 1\n")
            .expect("write");

        let runner = CommandTestRunner::new(&sh_config());
        let outcome =
            verify_target(&ws, &runner, &sh_config(), "tests/test_bad.sh").expect("verify");
        assert!(!outcome.passed);
        assert!(outcome.log.contains("AssertionError: 1 != 2"));
        assert!(outcome.log.ends_with(FAILURE_INSTRUCTION));
    }

    #[test]
    fn hung_script_times_out_as_a_failure() {
        let remote = TestRemote::new();
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = workspace(&remote, temp.path());
        ws.write("tests/t.sh", "sleep 6\necho done\n").expect("write");
        let config = VerifyConfig {
            timeout_secs: 1,
            ..sh_config()
        };

        let runner = CommandTestRunner::new(&config);
        let started = std::time::Instant::now();
        let outcome = verify_target(&ws, &runner, &config, "tests/t.sh").expect("verify");
        let elapsed = started.elapsed();

        assert!(!outcome.passed);
        assert!(elapsed < Duration::from_secs(4), "1s timeout took {elapsed:?}");
        assert!(outcome.log.contains("timed out"), "{}", outcome.log);
        assert!(outcome.log.ends_with(FAILURE_INSTRUCTION));
    }

    #[test]
    fn tail_bounded_keeps_the_end() {
        let text = format!("{}SUMMARY", "x".repeat(100));
        let out = tail_bounded(&text, 10);
        assert!(out.ends_with("xxxSUMMARY"));
        assert!(out.starts_with("[... 97 earlier bytes omitted ...]"));
    }
}
