//! Agent configuration stored under `.devloop/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Agent configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// values that work against a local Ollama and a Python project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DevloopConfig {
    /// Maximum model turns per task.
    pub max_steps: u32,

    /// Optional wall-clock budget for a whole task, checked between turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_timeout_secs: Option<u64>,

    pub workspace: WorkspaceConfig,
    pub verify: VerifyConfig,
    pub delivery: DeliveryConfig,
    pub installer: InstallerConfig,
    pub model: ModelConfig,
    pub ticket: TicketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Checkout directory; relative paths resolve against the project root.
    pub path: PathBuf,
    /// Remote to clone. When unset, the project root's `origin` is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    pub base_branch: String,
    pub bot_name: String,
    pub bot_email: String,
    /// Maximum entries returned by `list_files`.
    pub list_limit: usize,
    /// `read_file` output is truncated beyond this many bytes.
    pub read_limit_bytes: usize,
    /// Timeout for clone/fetch/pull/push.
    pub git_timeout_secs: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("workspace"),
            remote_url: None,
            base_branch: "main".to_string(),
            bot_name: "devloop-bot".to_string(),
            bot_email: "devloop-bot@users.noreply.localhost".to_string(),
            list_limit: 50,
            read_limit_bytes: 20_000,
            git_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifyConfig {
    /// Test runner argv; the target path is appended.
    pub command: Vec<String>,
    /// Environment variable that gets the workspace root prepended so tests
    /// can import project modules. Empty disables it.
    pub include_path_var: String,
    pub timeout_secs: u64,
    /// Bound on the failure log handed back to the model.
    pub output_limit_bytes: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "python3".to_string(),
                "-m".to_string(),
                "pytest".to_string(),
            ],
            include_path_var: "PYTHONPATH".to_string(),
            timeout_secs: 600,
            output_limit_bytes: 8_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Change-request CLI (`gh`-compatible).
    pub pr_command: String,
    /// Failed pushes allowed before the task is stopped.
    pub max_push_attempts: u32,
    pub timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            pr_command: "gh".to_string(),
            max_push_attempts: 3,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InstallerConfig {
    /// Installer argv; the package spec is appended.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            command: ["python3", "-m", "pip", "install"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of the Ollama server.
    pub endpoint: String,
    pub model: String,
    pub temperature: f64,
    /// Context window requested from the server (`num_ctx`).
    pub context_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "qwen2.5-coder:14b".to_string(),
            temperature: 0.2,
            context_tokens: 4096,
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TicketConfig {
    /// Lookups per issue key before the key is switched off.
    pub max_lookups_per_key: u32,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            max_lookups_per_key: 2,
        }
    }
}

impl Default for DevloopConfig {
    fn default() -> Self {
        Self {
            max_steps: 30,
            task_timeout_secs: None,
            workspace: WorkspaceConfig::default(),
            verify: VerifyConfig::default(),
            delivery: DeliveryConfig::default(),
            installer: InstallerConfig::default(),
            model: ModelConfig::default(),
            ticket: TicketConfig::default(),
        }
    }
}

impl DevloopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.task_timeout_secs == Some(0) {
            return Err(anyhow!("task_timeout_secs must be > 0 when set"));
        }
        let ws = &self.workspace;
        if ws.path.as_os_str().is_empty() {
            return Err(anyhow!("workspace.path must not be empty"));
        }
        if ws.base_branch.trim().is_empty() {
            return Err(anyhow!("workspace.base_branch must not be empty"));
        }
        if ws.list_limit == 0 || ws.read_limit_bytes == 0 {
            return Err(anyhow!(
                "workspace.list_limit and workspace.read_limit_bytes must be > 0"
            ));
        }
        if ws.git_timeout_secs == 0 {
            return Err(anyhow!("workspace.git_timeout_secs must be > 0"));
        }
        require_command("verify.command", &self.verify.command)?;
        if self.verify.timeout_secs == 0 || self.verify.output_limit_bytes == 0 {
            return Err(anyhow!(
                "verify.timeout_secs and verify.output_limit_bytes must be > 0"
            ));
        }
        if self.delivery.pr_command.trim().is_empty() {
            return Err(anyhow!("delivery.pr_command must not be empty"));
        }
        if self.delivery.max_push_attempts == 0 || self.delivery.timeout_secs == 0 {
            return Err(anyhow!(
                "delivery.max_push_attempts and delivery.timeout_secs must be > 0"
            ));
        }
        require_command("installer.command", &self.installer.command)?;
        if self.model.endpoint.trim().is_empty() || self.model.model.trim().is_empty() {
            return Err(anyhow!("model.endpoint and model.model must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(anyhow!("model.temperature must be within 0.0..=2.0"));
        }
        if self.ticket.max_lookups_per_key == 0 {
            return Err(anyhow!("ticket.max_lookups_per_key must be > 0"));
        }
        Ok(())
    }

    /// Workspace directory, resolved against `project_root` when relative.
    pub fn workspace_dir(&self, project_root: &Path) -> PathBuf {
        if self.workspace.path.is_absolute() {
            self.workspace.path.clone()
        } else {
            project_root.join(&self.workspace.path)
        }
    }
}

fn require_command(field: &str, command: &[String]) -> Result<()> {
    if command.is_empty() || command[0].trim().is_empty() {
        return Err(anyhow!("{field} must be a non-empty array"));
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DevloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<DevloopConfig> {
    if !path.exists() {
        let cfg = DevloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DevloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DevloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
