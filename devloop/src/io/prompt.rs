//! System prompt rendering.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

/// One registered tool as shown to the model.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolDoc {
    pub name: String,
    pub description: String,
    /// Pretty-printed JSON Schema of the arguments.
    pub parameters: String,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        Self { env }
    }

    fn render_system(&self, tools: &[ToolDoc], base_branch: &str) -> Result<String> {
        let template = self.env.get_template("system")?;
        let rendered = template.render(context! {
            tools => tools,
            base_branch => base_branch,
        })?;
        Ok(rendered)
    }
}

/// Render the system message for a task.
pub fn render_system_prompt(tools: &[ToolDoc], base_branch: &str) -> Result<String> {
    PromptEngine::new().render_system(tools, base_branch)
}
