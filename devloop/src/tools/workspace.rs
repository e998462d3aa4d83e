//! Workspace tools: initialization and contained file operations.

use std::rc::Rc;
use std::sync::LazyLock;

use serde_json::{Map, Value, json};
use tracing::error;

use super::{Tool, ToolError, optional_str, required_str};
use crate::core::skeleton::render_outline;
use crate::core::types::ToolResult;
use crate::io::workspace::{Workspace, truncate_text};

static BRANCH_NAME: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$").unwrap());

/// Conservative subset of `git check-ref-format`.
fn is_valid_branch_name(name: &str) -> bool {
    BRANCH_NAME.is_match(name)
        && !name.contains("..")
        && !name.contains("//")
        && !name.ends_with('/')
        && !name.ends_with('.')
        && !name.ends_with(".lock")
}

pub struct InitWorkspaceTool {
    workspace: Rc<Workspace>,
}

impl InitWorkspaceTool {
    pub fn new(workspace: Rc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for InitWorkspaceTool {
    fn name(&self) -> &'static str {
        "init_workspace"
    }

    fn description(&self) -> &'static str {
        "Clone the repository if needed, sync the base branch, and check out a fresh feature \
         branch. Call this before any file, test, or git tool. A failure ends the task."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "branch_name": {"type": "string", "description": "New feature branch, e.g. feature/add-fee"},
                "base_branch": {"type": "string", "description": "Branch to start from (defaults to the configured base)"}
            },
            "required": ["branch_name"],
            "additionalProperties": false
        })
    }

    fn invoke(&self, arguments: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let feature = required_str(arguments, "branch_name")?.trim();
        let base = optional_str(arguments, "base_branch")?
            .map(str::trim)
            .filter(|base| !base.is_empty());
        for name in std::iter::once(feature).chain(base) {
            if !is_valid_branch_name(name) {
                return Err(ToolError::InvalidArguments(format!(
                    "'{name}' is not a valid branch name"
                )));
            }
        }
        if Some(feature) == base {
            return Err(ToolError::InvalidArguments(format!(
                "feature branch '{feature}' must differ from the base branch"
            )));
        }

        match self.workspace.init(feature, base) {
            Ok(report) => Ok(ToolResult::success(format!(
                "Workspace ready at {} on branch '{}' (created from '{}'{}). Use branch_name \
                 '{}' for git_push. Next: write the code and its tests.",
                report.root.display(),
                report.feature_branch,
                report.base_branch,
                if report.cloned { ", fresh clone" } else { "" },
                report.feature_branch,
            ))),
            Err(err) => {
                error!(error = %format!("{err:#}"), "workspace initialization failed");
                Ok(ToolResult::fatal(format!(
                    "Workspace initialization failed: {err:#}"
                )))
            }
        }
    }
}

pub struct ListFilesTool {
    workspace: Rc<Workspace>,
}

impl ListFilesTool {
    pub fn new(workspace: Rc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for ListFilesTool {
    fn name(&self) -> &'static str {
        "list_files"
    }

    fn description(&self) -> &'static str {
        "List files in the workspace, skipping VCS metadata and build artifacts."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory": {"type": "string", "description": "Workspace-relative directory (default: root)"}
            },
            "additionalProperties": false
        })
    }

    fn invoke(&self, arguments: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let directory = optional_str(arguments, "directory")?;
        let listing = self.workspace.list(directory)?;
        let label = directory.unwrap_or(".");
        if listing.files.is_empty() {
            return Ok(ToolResult::success(format!("No files under '{label}'.")));
        }
        let mut text = format!("Files under '{label}':\n{}", listing.files.join("\n"));
        if listing.truncated {
            text.push_str(&format!(
                "\n[list truncated at {} entries; list a subdirectory to see more]",
                listing.files.len()
            ));
        }
        Ok(ToolResult::success(text))
    }
}

pub struct ReadFileTool {
    workspace: Rc<Workspace>,
}

impl ReadFileTool {
    pub fn new(workspace: Rc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a text file from the workspace. Long files are truncated."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"file_path": {"type": "string"}},
            "required": ["file_path"],
            "additionalProperties": false
        })
    }

    fn invoke(&self, arguments: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let path = required_str(arguments, "file_path")?;
        Ok(ToolResult::success(self.workspace.read(path)?))
    }
}

/// `generate_skeleton`: class and function signatures of a Python file.
pub struct OutlineFileTool {
    workspace: Rc<Workspace>,
}

impl OutlineFileTool {
    pub fn new(workspace: Rc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for OutlineFileTool {
    fn name(&self) -> &'static str {
        "generate_skeleton"
    }

    fn description(&self) -> &'static str {
        "Show only the class and function signatures of a Python file. Cheaper than read_file \
         for getting oriented in a large module."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"file_path": {"type": "string", "pattern": "\\.pyi?$"}},
            "required": ["file_path"],
            "additionalProperties": false
        })
    }

    fn invoke(&self, arguments: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let path = required_str(arguments, "file_path")?;
        let source = self.workspace.read_whole(path)?;
        let outline = render_outline(path, &source);
        Ok(ToolResult::success(truncate_text(
            &outline,
            self.workspace.read_limit_bytes(),
        )))
    }
}

fn file_content_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "file_path": {"type": "string"},
            "content": {"type": "string", "description": "File body; may instead follow the action as a fenced code block"}
        },
        "required": ["file_path", "content"],
        "additionalProperties": false
    })
}

pub struct WriteFileTool {
    workspace: Rc<Workspace>,
}

impl WriteFileTool {
    pub fn new(workspace: Rc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Create or overwrite a file in the workspace. Parent directories are created."
    }

    fn parameters(&self) -> Value {
        file_content_schema()
    }

    fn invoke(&self, arguments: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let path = required_str(arguments, "file_path")?;
        let content = required_str(arguments, "content")?;
        let bytes = self.workspace.write(path, content)?;
        Ok(ToolResult::success(format!("Wrote {bytes} bytes to {path}.")))
    }
}

pub struct AppendFileTool {
    workspace: Rc<Workspace>,
}

impl AppendFileTool {
    pub fn new(workspace: Rc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for AppendFileTool {
    fn name(&self) -> &'static str {
        "append_file"
    }

    fn description(&self) -> &'static str {
        "Append text to a file in the workspace, creating it if missing."
    }

    fn parameters(&self) -> Value {
        file_content_schema()
    }

    fn invoke(&self, arguments: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let path = required_str(arguments, "file_path")?;
        let content = required_str(arguments, "content")?;
        let bytes = self.workspace.append(path, content)?;
        Ok(ToolResult::success(format!("Appended {bytes} bytes to {path}.")))
    }
}
