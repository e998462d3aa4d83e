//! Delivery pipeline: commit, push, and open a change request.
//!
//! Each step is safe to repeat. A clean tree commits nothing and says so, a
//! change request that already exists counts as created, and a push is
//! refused outright when it names a branch other than the checked-out one.
//! Failed pushes are counted; once the budget is spent the result is fatal and
//! the local commit is left in place.

use std::cell::RefCell;
use std::path::Path;
use std::process::Command;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::budget::AttemptLimiter;
use crate::core::classifier::{
    ExternalFailure, classify_external_failure, classify_push_failure, remediation,
};
use crate::core::types::ToolResult;
use crate::io::config::DeliveryConfig;
use crate::io::process::run_command_with_timeout;
use crate::io::workspace::{Workspace, WorkspaceError};

const PUSH_KEY: &str = "push";
const HOST_OUTPUT_LIMIT: usize = 64 * 1024;

/// Parameters for a change request (pull request).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeRequestOutcome {
    /// Link to the new change request.
    Created(String),
    AlreadyExists,
}

/// Abstraction over the change-request host.
pub trait ChangeRequestHost {
    fn create(&self, workdir: &Path, request: &ChangeRequest) -> Result<ChangeRequestOutcome>;
}

/// Host backed by the GitHub CLI (`gh pr create`).
pub struct GhCli {
    program: String,
    timeout: Duration,
}

impl GhCli {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            program: config.pr_command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl ChangeRequestHost for GhCli {
    #[instrument(skip_all, fields(head = %request.head, base = %request.base))]
    fn create(&self, workdir: &Path, request: &ChangeRequest) -> Result<ChangeRequestOutcome> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["pr", "create", "--title"])
            .arg(&request.title)
            .arg("--body")
            .arg(&request.body)
            .arg("--base")
            .arg(&request.base)
            .arg("--head")
            .arg(&request.head)
            .current_dir(workdir)
            .env("GH_PROMPT_DISABLED", "1")
            .env("GIT_TERMINAL_PROMPT", "0");

        let output = match run_command_with_timeout(cmd, None, self.timeout, HOST_OUTPUT_LIMIT) {
            Ok(output) => output,
            Err(err) => {
                let missing = err
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound);
                if missing {
                    return Err(anyhow!(
                        "'{}' is not installed or not on PATH; install the GitHub CLI",
                        self.program
                    ));
                }
                return Err(err);
            }
        };
        if output.timed_out {
            return Err(anyhow!(
                "{} pr create timed out after {}s",
                self.program,
                self.timeout.as_secs()
            ));
        }
        if output.status.success() {
            return Ok(ChangeRequestOutcome::Created(
                output.stdout_text().trim().to_string(),
            ));
        }
        let stderr = output.stderr_text();
        if classify_external_failure(&stderr) == ExternalFailure::AlreadyExists {
            return Ok(ChangeRequestOutcome::AlreadyExists);
        }
        Err(anyhow!(
            "{} pr create failed: {}",
            self.program,
            stderr.trim()
        ))
    }
}

pub struct Delivery {
    workspace: Rc<Workspace>,
    host: Box<dyn ChangeRequestHost>,
    failed_pushes: RefCell<AttemptLimiter>,
}

impl Delivery {
    pub fn new(
        workspace: Rc<Workspace>,
        host: Box<dyn ChangeRequestHost>,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            workspace,
            host,
            failed_pushes: RefCell::new(AttemptLimiter::new(config.max_push_attempts)),
        }
    }

    /// Summarize uncommitted changes on the checked-out branch.
    pub fn status(&self) -> Result<ToolResult, WorkspaceError> {
        self.workspace.ensure_ready()?;
        let vcs = self.workspace.vcs();
        let branch = vcs.current_branch()?;
        let changes = vcs.status_porcelain()?;
        if changes.is_empty() {
            return Ok(ToolResult::success(format!(
                "On branch '{branch}'. Working tree clean."
            )));
        }
        let lines: Vec<String> = changes
            .iter()
            .map(|entry| format!("{} {}", entry.code, entry.path))
            .collect();
        Ok(ToolResult::success(format!(
            "On branch '{branch}'. {} uncommitted change(s):\n{}",
            changes.len(),
            lines.join("\n")
        )))
    }

    /// Stage everything and commit. A clean tree is a success, not an error.
    #[instrument(skip_all)]
    pub fn commit(&self, message: &str) -> Result<ToolResult, WorkspaceError> {
        self.workspace.ensure_ready()?;
        let vcs = self.workspace.vcs();
        let branch = vcs.current_branch()?;
        let changes = vcs.status_porcelain()?;
        if changes.is_empty() {
            info!(%branch, "nothing to commit");
            return Ok(ToolResult::success(format!(
                "Nothing to commit on '{branch}'. Proceed to push."
            )));
        }
        vcs.add_all()?;
        vcs.commit(message)?;
        info!(%branch, files = changes.len(), "committed");
        Ok(ToolResult::success(format!(
            "Committed {} changed file(s) on '{branch}': {message}",
            changes.len()
        )))
    }

    /// Push `branch` to origin, refusing when it is not the checked-out branch.
    #[instrument(skip_all, fields(branch))]
    pub fn push(&self, branch: &str) -> Result<ToolResult, WorkspaceError> {
        self.workspace.ensure_ready()?;
        if self.failed_pushes.borrow().is_exhausted(PUSH_KEY) {
            return Ok(self.push_budget_spent(branch, "no further pushes are attempted"));
        }
        let vcs = self.workspace.vcs();
        let current = vcs.current_branch()?;
        if branch != current {
            warn!(requested = branch, %current, "push rejected: branch mismatch");
            let text = format!(
                "CONTEXT ERROR: the checked-out branch is '{current}' but you asked to push \
                 '{branch}'. Nothing was pushed. Call git_push with branch_name '{current}', the \
                 branch created by init_workspace."
            );
            return Ok(self.record_failed_push(&current, text));
        }

        match vcs.push(branch) {
            Ok(()) => {
                info!(branch, "pushed");
                Ok(ToolResult::success(format!(
                    "Pushed '{branch}' to origin. Next: create_pr."
                )))
            }
            Err(err) => {
                let message = format!("{err:#}");
                let kind = classify_push_failure(&message);
                warn!(branch, ?kind, "push failed");
                let text = format!("Push of '{branch}' failed: {message}\n{}", remediation(kind));
                Ok(self.record_failed_push(branch, text))
            }
        }
    }

    fn record_failed_push(&self, branch: &str, text: String) -> ToolResult {
        let mut limiter = self.failed_pushes.borrow_mut();
        limiter.try_acquire(PUSH_KEY);
        if limiter.is_exhausted(PUSH_KEY) {
            drop(limiter);
            return self.push_budget_spent(branch, &text);
        }
        ToolResult::failure(text)
    }

    fn push_budget_spent(&self, branch: &str, detail: &str) -> ToolResult {
        let max = self.failed_pushes.borrow().max_attempts();
        ToolResult::fatal(format!(
            "{detail}\nPush failed {max} time(s); stopping the task. The local commit on '{branch}' \
             is kept for manual delivery."
        ))
    }

    /// Open a change request from the current branch into the init base branch.
    #[instrument(skip_all)]
    pub fn create_change_request(
        &self,
        title: &str,
        body: &str,
    ) -> Result<ToolResult, WorkspaceError> {
        self.workspace.ensure_ready()?;
        let head = self.workspace.vcs().current_branch()?;
        let base = self
            .workspace
            .base_branch()
            .unwrap_or_else(|| self.workspace.default_base_branch().to_string());
        if head == base {
            return Ok(ToolResult::failure(format!(
                "Refusing to open a change request from '{head}' into itself. Work on the branch \
                 created by init_workspace."
            )));
        }
        let request = ChangeRequest {
            title: title.to_string(),
            body: body.to_string(),
            head: head.clone(),
            base: base.clone(),
        };
        match self.host.create(self.workspace.root(), &request) {
            Ok(ChangeRequestOutcome::Created(link)) => {
                info!(%head, %base, %link, "change request created");
                Ok(ToolResult::success(format!(
                    "Change request created: {link}\nDelivery is complete. Call task_complete now \
                     with a short summary."
                )))
            }
            Ok(ChangeRequestOutcome::AlreadyExists) => {
                info!(%head, %base, "change request already exists");
                Ok(ToolResult::success(format!(
                    "A change request from '{head}' into '{base}' already exists.\nDelivery is \
                     complete. Call task_complete now with a short summary."
                )))
            }
            Err(err) => {
                let message = format!("{err:#}");
                let kind = classify_external_failure(&message);
                warn!(?kind, "change request failed");
                Ok(ToolResult::failure(format!(
                    "Creating the change request failed: {message}\n{}",
                    remediation(kind)
                )))
            }
        }
    }
}
