//! The agent loop: model turn, one action, observation, repeat.

use std::time::{Duration, Instant};

use tracing::{error, info, instrument, warn};

use crate::core::budget::remaining_budget;
use crate::core::types::{Conversation, Message, TaskOutcome};
use crate::io::config::DevloopConfig;
use crate::io::model::ModelClient;
use crate::io::prompt::render_system_prompt;
use crate::step::{TurnOutcome, run_turn};
use crate::tools::ToolRegistry;

/// Limits for one task run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    pub max_steps: u32,
    /// Checked at the start of each turn.
    pub task_timeout: Option<Duration>,
    /// Shown to the model as the default base branch.
    pub base_branch: String,
}

impl LoopConfig {
    pub fn from_config(config: &DevloopConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            task_timeout: config.task_timeout_secs.map(Duration::from_secs),
            base_branch: config.workspace.base_branch.clone(),
        }
    }
}

pub struct Agent<'a> {
    model: &'a dyn ModelClient,
    registry: &'a ToolRegistry,
    config: LoopConfig,
}

impl<'a> Agent<'a> {
    pub fn new(model: &'a dyn ModelClient, registry: &'a ToolRegistry, config: LoopConfig) -> Self {
        Self {
            model,
            registry,
            config,
        }
    }

    /// Drive one task to a terminal outcome. Never returns an error: every
    /// failure is folded into [`TaskOutcome`].
    #[instrument(skip_all, fields(max_steps = self.config.max_steps))]
    pub fn run_task(&self, task: &str) -> TaskOutcome {
        let system = match render_system_prompt(&self.registry.catalog(), &self.config.base_branch)
        {
            Ok(system) => system,
            Err(err) => {
                return TaskOutcome::Failed {
                    step: "prompt".to_string(),
                    reason: format!("{err:#}"),
                    steps: 0,
                };
            }
        };
        let mut history = Conversation::new();
        history.push(Message::system(system));
        history.push(Message::user(task.trim()));

        let deadline = self.config.task_timeout.map(|timeout| Instant::now() + timeout);
        let max_steps = self.config.max_steps;
        for step in 1..=max_steps {
            if let Some(deadline) = deadline
                && let Err(err) = remaining_budget(deadline)
            {
                warn!(step, "task deadline reached");
                return TaskOutcome::Cancelled {
                    reason: err.to_string(),
                    steps: step - 1,
                };
            }
            info!(step, max_steps, "agent step");

            let reply = match self.model.complete(history.messages()) {
                Ok(reply) => reply,
                Err(err) => {
                    error!(step, error = %format!("{err:#}"), "model call failed");
                    return TaskOutcome::Failed {
                        step: "model".to_string(),
                        reason: format!("{err:#}"),
                        steps: step,
                    };
                }
            };

            match run_turn(self.registry, &mut history, &reply) {
                TurnOutcome::Continue => {}
                TurnOutcome::Completed { summary } => {
                    info!(step, "task completed");
                    return TaskOutcome::Completed {
                        summary,
                        steps: step,
                    };
                }
                TurnOutcome::Fatal { tool, reason } => {
                    return TaskOutcome::Failed {
                        step: tool,
                        reason,
                        steps: step,
                    };
                }
            }
        }
        warn!(max_steps, "step budget exhausted");
        TaskOutcome::BudgetExhausted { max_steps }
    }
}
