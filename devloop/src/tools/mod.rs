//! Tool registry and dispatch.
//!
//! Every tool implements [`Tool`]: a name, a description, a JSON Schema for
//! its arguments, and `invoke`. [`ToolRegistry::dispatch`] validates the
//! arguments against the schema, invokes the tool, and folds every error into
//! a failure-classified [`ToolResult`] the model can read. Nothing escapes
//! dispatch as an error.

mod delivery;
mod project;
mod ticket;
mod workspace;

use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Result, anyhow, bail};
use jsonschema::Validator;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::core::types::ToolResult;
use crate::io::config::DevloopConfig;
use crate::io::delivery::{Delivery, GhCli};
use crate::io::installer::PackageInstaller;
use crate::io::prompt::ToolDoc;
use crate::io::ticket::{JiraClient, JiraCredentials, TicketSource};
use crate::io::verify::{CommandTestRunner, TestRunner};
use crate::io::workspace::{Workspace, WorkspaceError};

pub use delivery::{CreatePrTool, GitCommitTool, GitPushTool, GitStatusTool};
pub use project::{InstallPackageTool, RunTestsTool};
pub use ticket::ReadTicketTool;
pub use workspace::{
    AppendFileTool, InitWorkspaceTool, ListFilesTool, OutlineFileTool, ReadFileTool, WriteFileTool,
};

/// Name of the terminal action. Handled by the loop, never registered.
pub const TERMINAL_ACTION: &str = "task_complete";

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("workspace is not initialized; call init_workspace first")]
    NotInitialized,
    #[error("{0}")]
    OutsideWorkspace(String),
    #[error("{0:#}")]
    Failed(anyhow::Error),
}

impl From<WorkspaceError> for ToolError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::NotInitialized => ToolError::NotInitialized,
            WorkspaceError::OutsideWorkspace(message) => ToolError::OutsideWorkspace(message),
            WorkspaceError::Io(err) => ToolError::Failed(err),
        }
    }
}

impl From<anyhow::Error> for ToolError {
    fn from(err: anyhow::Error) -> Self {
        ToolError::Failed(err)
    }
}

pub trait Tool {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON Schema for the argument object.
    fn parameters(&self) -> Value;
    fn invoke(&self, arguments: &Map<String, Value>) -> Result<ToolResult, ToolError>;
}

struct Registered {
    tool: Box<dyn Tool>,
    validator: Validator,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Registered>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, compiling its argument schema.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<()> {
        let name = tool.name();
        if name == TERMINAL_ACTION {
            bail!("'{TERMINAL_ACTION}' is reserved for the loop");
        }
        if self.tools.contains_key(name) {
            bail!("tool '{name}' is already registered");
        }
        let validator = jsonschema::validator_for(&tool.parameters())
            .map_err(|err| anyhow!("invalid schema for tool '{name}': {err}"))?;
        self.tools
            .insert(name.to_string(), Registered { tool, validator });
        Ok(())
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn catalog(&self) -> Vec<ToolDoc> {
        self.tools
            .values()
            .map(|entry| {
                let parameters = entry.tool.parameters();
                ToolDoc {
                    name: entry.tool.name().to_string(),
                    description: entry.tool.description().to_string(),
                    parameters: serde_json::to_string_pretty(&parameters)
                        .unwrap_or_else(|_| parameters.to_string()),
                }
            })
            .collect()
    }

    #[instrument(skip_all, fields(tool = name))]
    pub fn dispatch(&self, name: &str, arguments: &Map<String, Value>) -> ToolResult {
        let Some(entry) = self.tools.get(name) else {
            warn!("unknown tool");
            return ToolResult::failure(format!(
                "Unknown tool '{name}'. Available tools: {}, {TERMINAL_ACTION}.",
                self.names().join(", ")
            ));
        };

        let instance = Value::Object(arguments.clone());
        let violations: Vec<String> = entry
            .validator
            .iter_errors(&instance)
            .map(|err| err.to_string())
            .collect();
        if !violations.is_empty() {
            warn!(violations = violations.len(), "arguments rejected by schema");
            return ToolResult::failure(format!(
                "Invalid arguments for '{name}':\n- {}\nExpected arguments schema:\n{}",
                violations.join("\n- "),
                entry.tool.parameters()
            ));
        }

        let result = match entry.tool.invoke(arguments) {
            Ok(result) => result,
            Err(err) => {
                warn!(%err, "tool error");
                ToolResult::failure(format!("{name} failed: {err}"))
            }
        };
        info!(status = ?result.status, "tool finished");
        result
    }
}

/// Shared collaborators the standard tools are built from.
pub struct Toolbox {
    pub workspace: Rc<Workspace>,
    pub delivery: Rc<Delivery>,
    pub test_runner: Box<dyn TestRunner>,
    pub installer: PackageInstaller,
    /// `None` when ticket credentials are not configured.
    pub tickets: Option<Box<dyn TicketSource>>,
}

impl Toolbox {
    /// Production collaborators for a project: git workspace, `gh`, the
    /// configured test command and installer, and Jira when credentials are
    /// present in the environment.
    pub fn for_project(config: &DevloopConfig, project_root: &Path) -> Result<Self> {
        let workspace = Rc::new(Workspace::open(config, project_root)?);
        let delivery = Rc::new(Delivery::new(
            workspace.clone(),
            Box::new(GhCli::new(&config.delivery)),
            &config.delivery,
        ));
        let tickets = match JiraCredentials::from_env() {
            Some(credentials) => {
                Some(Box::new(JiraClient::new(credentials)?) as Box<dyn TicketSource>)
            }
            None => {
                info!("JIRA_URL, JIRA_EMAIL or JIRA_API_TOKEN unset; ticket lookup disabled");
                None
            }
        };
        Ok(Self {
            workspace,
            delivery,
            test_runner: Box::new(CommandTestRunner::new(&config.verify)),
            installer: PackageInstaller::new(&config.installer),
            tickets,
        })
    }
}

/// Register the full tool catalog.
pub fn standard_registry(config: &DevloopConfig, toolbox: Toolbox) -> Result<ToolRegistry> {
    let Toolbox {
        workspace,
        delivery,
        test_runner,
        installer,
        tickets,
    } = toolbox;
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ReadTicketTool::new(
        tickets,
        config.ticket.max_lookups_per_key,
    )))?;
    registry.register(Box::new(InitWorkspaceTool::new(workspace.clone())))?;
    registry.register(Box::new(ListFilesTool::new(workspace.clone())))?;
    registry.register(Box::new(ReadFileTool::new(workspace.clone())))?;
    registry.register(Box::new(OutlineFileTool::new(workspace.clone())))?;
    registry.register(Box::new(WriteFileTool::new(workspace.clone())))?;
    registry.register(Box::new(AppendFileTool::new(workspace.clone())))?;
    registry.register(Box::new(RunTestsTool::new(
        workspace.clone(),
        test_runner,
        config.verify.clone(),
    )))?;
    registry.register(Box::new(InstallPackageTool::new(workspace, installer)))?;
    registry.register(Box::new(GitStatusTool::new(delivery.clone())))?;
    registry.register(Box::new(GitCommitTool::new(delivery.clone())))?;
    registry.register(Box::new(GitPushTool::new(delivery.clone())))?;
    registry.register(Box::new(CreatePrTool::new(delivery)))?;
    Ok(registry)
}

fn required_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    match arguments.get(key) {
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(ToolError::InvalidArguments(format!("'{key}' must be a string"))),
        None => Err(ToolError::InvalidArguments(format!("missing '{key}'"))),
    }
}

fn optional_str<'a>(
    arguments: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a str>, ToolError> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(_) => Err(ToolError::InvalidArguments(format!("'{key}' must be a string"))),
    }
}
