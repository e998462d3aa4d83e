//! Delivery tools: thin adapters over [`Delivery`].

use std::rc::Rc;

use serde_json::{Map, Value, json};

use super::{Tool, ToolError, required_str};
use crate::core::types::ToolResult;
use crate::io::delivery::Delivery;

pub struct GitCommitTool {
    delivery: Rc<Delivery>,
}

impl GitCommitTool {
    pub fn new(delivery: Rc<Delivery>) -> Self {
        Self { delivery }
    }
}

impl Tool for GitCommitTool {
    fn name(&self) -> &'static str {
        "git_commit"
    }

    fn description(&self) -> &'static str {
        "Stage all changes and commit them. Only call after run_tests passed."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"message": {"type": "string", "minLength": 1}},
            "required": ["message"],
            "additionalProperties": false
        })
    }

    fn invoke(&self, arguments: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let message = required_str(arguments, "message")?.trim();
        if message.is_empty() {
            return Err(ToolError::InvalidArguments("'message' is empty".to_string()));
        }
        Ok(self.delivery.commit(message)?)
    }
}

pub struct GitStatusTool {
    delivery: Rc<Delivery>,
}

impl GitStatusTool {
    pub fn new(delivery: Rc<Delivery>) -> Self {
        Self { delivery }
    }
}

impl Tool for GitStatusTool {
    fn name(&self) -> &'static str {
        "git_status"
    }

    fn description(&self) -> &'static str {
        "Show the checked-out branch and uncommitted changes."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    fn invoke(&self, _arguments: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        Ok(self.delivery.status()?)
    }
}

pub struct GitPushTool {
    delivery: Rc<Delivery>,
}

impl GitPushTool {
    pub fn new(delivery: Rc<Delivery>) -> Self {
        Self { delivery }
    }
}

impl Tool for GitPushTool {
    fn name(&self) -> &'static str {
        "git_push"
    }

    fn description(&self) -> &'static str {
        "Push the feature branch to origin. branch_name must be the branch created by \
         init_workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"branch_name": {"type": "string"}},
            "required": ["branch_name"],
            "additionalProperties": false
        })
    }

    fn invoke(&self, arguments: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let branch = required_str(arguments, "branch_name")?.trim();
        Ok(self.delivery.push(branch)?)
    }
}

pub struct CreatePrTool {
    delivery: Rc<Delivery>,
}

impl CreatePrTool {
    pub fn new(delivery: Rc<Delivery>) -> Self {
        Self { delivery }
    }
}

impl Tool for CreatePrTool {
    fn name(&self) -> &'static str {
        "create_pr"
    }

    fn description(&self) -> &'static str {
        "Open a pull request from the feature branch into the base branch. Call task_complete \
         right after it succeeds."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "minLength": 1},
                "body": {"type": "string"}
            },
            "required": ["title", "body"],
            "additionalProperties": false
        })
    }

    fn invoke(&self, arguments: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let title = required_str(arguments, "title")?.trim();
        let body = required_str(arguments, "body")?;
        Ok(self.delivery.create_change_request(title, body)?)
    }
}
