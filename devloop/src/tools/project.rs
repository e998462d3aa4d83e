//! Project tools: test verification and dependency installation.

use std::rc::Rc;

use serde_json::{Map, Value, json};
use tracing::info;

use super::{Tool, ToolError, required_str};
use crate::core::types::ToolResult;
use crate::io::config::VerifyConfig;
use crate::io::installer::{PackageInstaller, is_valid_package_spec};
use crate::io::verify::{TestRunner, verify_target};
use crate::io::workspace::Workspace;

pub struct RunTestsTool {
    workspace: Rc<Workspace>,
    runner: Box<dyn TestRunner>,
    config: VerifyConfig,
}

impl RunTestsTool {
    pub fn new(workspace: Rc<Workspace>, runner: Box<dyn TestRunner>, config: VerifyConfig) -> Self {
        Self {
            workspace,
            runner,
            config,
        }
    }
}

impl Tool for RunTestsTool {
    fn name(&self) -> &'static str {
        "run_tests"
    }

    fn description(&self) -> &'static str {
        "Run the project's test runner on one test file inside the workspace. Fix failures and \
         run again; commit only after the tests pass."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target": {"type": "string", "description": "Workspace-relative test file, e.g. tests/test_fee.py"}
            },
            "required": ["target"],
            "additionalProperties": false
        })
    }

    fn invoke(&self, arguments: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let target = required_str(arguments, "target")?.trim();
        if target.is_empty() {
            return Err(ToolError::InvalidArguments("'target' is empty".to_string()));
        }
        let outcome = verify_target(&self.workspace, self.runner.as_ref(), &self.config, target)?;
        info!(target, passed = outcome.passed, "verification finished");
        if outcome.passed {
            Ok(ToolResult::success(format!(
                "Tests passed for '{target}'.\n{}",
                outcome.log.trim_end()
            )))
        } else {
            Ok(ToolResult::failure(format!(
                "Tests failed for '{target}'.\n{}",
                outcome.log
            )))
        }
    }
}

pub struct InstallPackageTool {
    workspace: Rc<Workspace>,
    installer: PackageInstaller,
}

impl InstallPackageTool {
    pub fn new(workspace: Rc<Workspace>, installer: PackageInstaller) -> Self {
        Self {
            workspace,
            installer,
        }
    }
}

impl Tool for InstallPackageTool {
    fn name(&self) -> &'static str {
        "install_package"
    }

    fn description(&self) -> &'static str {
        "Install a third-party package the code or tests need, e.g. 'requests' or 'numpy==1.26.4'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"package_name": {"type": "string"}},
            "required": ["package_name"],
            "additionalProperties": false
        })
    }

    fn invoke(&self, arguments: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let spec = required_str(arguments, "package_name")?.trim();
        if !is_valid_package_spec(spec) {
            return Err(ToolError::InvalidArguments(format!(
                "'{spec}' is not a package name; use letters, digits, '.', '_', '-', optional \
                 [extras] and an optional version such as ==1.2"
            )));
        }
        self.workspace.ensure_ready()?;
        let output = self.installer.install(self.workspace.root(), spec)?;
        Ok(ToolResult::success(format!("Installed {spec}.\n{output}")))
    }
}
