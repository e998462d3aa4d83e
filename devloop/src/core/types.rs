//! Shared types for the agent control loop.
//!
//! These types define stable contracts between the decoder, the tool registry,
//! and the loop. They carry no I/O and serialize deterministically.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::classifier::{FAILURE_MARKER, SUCCESS_MARKER};

/// Role tag for a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Assistant,
    User,
}

/// One role-tagged message in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Append-only conversation for a single task run.
///
/// Owned by the agent loop and dropped when the task ends; there is no way to
/// remove or rewrite a message once pushed.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// One structured tool invocation decoded from model text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl Action {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// String argument lookup; non-string values are ignored.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// Outcome classification for a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    /// Recoverable: the model reads the text and self-corrects.
    Failure,
    /// Not recoverable within the task; the loop stops immediately.
    Fatal,
}

/// Typed tool outcome: a classification plus model-readable text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub text: String,
}

impl ToolResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Success,
            text: text.into(),
        }
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Failure,
            text: text.into(),
        }
    }

    pub fn fatal(text: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Fatal,
            text: text.into(),
        }
    }

    pub fn ok(&self) -> bool {
        self.status == ToolStatus::Success
    }

    pub fn is_fatal(&self) -> bool {
        self.status == ToolStatus::Fatal
    }

    /// Render with the fixed success/failure marker for the model channel.
    pub fn render(&self) -> String {
        let marker = if self.ok() {
            SUCCESS_MARKER
        } else {
            FAILURE_MARKER
        };
        format!("{marker} {}", self.text)
    }
}

/// Result of a single verification run. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub passed: bool,
    pub log: String,
}

/// Terminal state of one task run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The model reached the terminal action.
    Completed { summary: String, steps: u32 },
    /// A fatal step stopped the task.
    Failed {
        step: String,
        reason: String,
        steps: u32,
    },
    /// The step budget ran out before the terminal action.
    BudgetExhausted { max_steps: u32 },
    /// The task deadline passed between turns.
    Cancelled { reason: String, steps: u32 },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }

    /// One-line description for the task's caller.
    pub fn describe(&self) -> String {
        match self {
            TaskOutcome::Completed { summary, steps } => {
                format!("SUCCESS after {steps} step(s): {summary}")
            }
            TaskOutcome::Failed {
                step,
                reason,
                steps,
            } => format!("FAILED at step {steps} ({step}): {reason}"),
            TaskOutcome::BudgetExhausted { max_steps } => {
                format!("FAILED: step budget of {max_steps} exhausted before task_complete")
            }
            TaskOutcome::Cancelled { reason, steps } => {
                format!("CANCELLED after {steps} step(s): {reason}")
            }
        }
    }
}
