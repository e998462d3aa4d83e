//! One turn of the agent loop: decode the reply, execute at most one action,
//! and record the observation.

use serde_json::Value;
use tracing::{error, info, warn};

use crate::core::content::last_content_block;
use crate::core::decoder::decode;
use crate::core::types::{Conversation, Message, ToolResult};
use crate::tools::{TERMINAL_ACTION, ToolRegistry};

/// Sent after a reply that carried no action.
pub const NO_ACTION_REMINDER: &str = "You MUST output exactly one valid JSON action block, e.g. \
     {\"name\": \"list_files\", \"arguments\": {}}. Call task_complete with a summary once the \
     change request exists.";

/// Tools whose `content` may come from a fenced block in the same reply.
const CONTENT_TOOLS: &[&str] = &["write_file", "append_file"];

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Keep going; the history holds the next observation.
    Continue,
    /// The model issued the terminal action.
    Completed { summary: String },
    /// A tool reported a fatal result.
    Fatal { tool: String, reason: String },
}

/// Process one model reply against `history`.
///
/// The reply is appended as an assistant message. Only the first decoded
/// action runs; its rendered result is appended as
/// `Tool Output (<name>):\n<result>`.
pub fn run_turn(registry: &ToolRegistry, history: &mut Conversation, reply: &str) -> TurnOutcome {
    let actions = decode(reply);
    history.push(Message::assistant(reply));

    let Some(action) = actions.first() else {
        warn!("reply carried no action");
        history.push(Message::user(NO_ACTION_REMINDER));
        return TurnOutcome::Continue;
    };
    let ignored = actions.len() - 1;
    if ignored > 0 {
        warn!(
            executed = %action.name,
            ignored,
            "multiple actions in one reply; executing only the first"
        );
    }

    if action.name == TERMINAL_ACTION {
        let summary = action
            .str_arg("summary")
            .map(str::trim)
            .filter(|summary| !summary.is_empty())
            .unwrap_or("Task completed.")
            .to_string();
        info!("terminal action received");
        return TurnOutcome::Completed { summary };
    }

    let mut arguments = action.arguments.clone();
    let result = if CONTENT_TOOLS.contains(&action.name.as_str())
        && !arguments.contains_key("content")
    {
        match last_content_block(reply) {
            Some(content) => {
                arguments.insert("content".to_string(), Value::String(content));
                registry.dispatch(&action.name, &arguments)
            }
            None => ToolResult::failure(format!(
                "{} needs file content: pass a 'content' argument or put the file body in a \
                 fenced code block after the action.",
                action.name
            )),
        }
    } else {
        registry.dispatch(&action.name, &arguments)
    };

    let mut observation = format!("Tool Output ({}):\n{}", action.name, result.render());
    if ignored > 0 {
        observation.push_str(&format!(
            "\nNote: only the first action was executed; {ignored} more action(s) in your reply \
             were ignored. Issue one action per reply."
        ));
    }
    history.push(Message::user(observation));

    if result.is_fatal() {
        error!(tool = %action.name, "fatal tool result; stopping task");
        return TurnOutcome::Fatal {
            tool: action.name.clone(),
            reason: result.text,
        };
    }
    TurnOutcome::Continue
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::{Map, json};

    use super::*;
    use crate::core::types::Role;
    use crate::tools::{Tool, ToolError};

    /// Records every argument map it receives; `fatal: true` yields a fatal result.
    struct Recorder {
        name: &'static str,
        seen: Rc<RefCell<Vec<Map<String, Value>>>>,
    }

    impl Tool for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn description(&self) -> &'static str {
            "Records its arguments."
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        fn invoke(&self, arguments: &Map<String, Value>) -> Result<ToolResult, ToolError> {
            self.seen.borrow_mut().push(arguments.clone());
            if arguments.get("fatal") == Some(&Value::Bool(true)) {
                return Ok(ToolResult::fatal("workspace gone"));
            }
            Ok(ToolResult::success(format!("{} ran", self.name)))
        }
    }

    fn registry() -> (ToolRegistry, Rc<RefCell<Vec<Map<String, Value>>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ToolRegistry::new();
        for name in ["list_files", "write_file", "init_workspace"] {
            registry
                .register(Box::new(Recorder {
                    name,
                    seen: seen.clone(),
                }))
                .expect("register");
        }
        (registry, seen)
    }

    #[test]
    fn reply_without_action_gets_a_reminder() {
        let (registry, seen) = registry();
        let mut history = Conversation::new();
        let outcome = run_turn(&registry, &mut history, "Let me think about {this} first.");
        assert_eq!(outcome, TurnOutcome::Continue);
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[0].role, Role::Assistant);
        assert_eq!(history.messages()[1].content, NO_ACTION_REMINDER);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn only_the_first_action_is_executed() {
        let (registry, seen) = registry();
        let mut history = Conversation::new();
        let reply = r#"{"name": "list_files", "arguments": {"directory": "src"}}
then {"name": "init_workspace", "arguments": {"fatal": true}}"#;
        let outcome = run_turn(&registry, &mut history, reply);
        assert_eq!(outcome, TurnOutcome::Continue);
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0]["directory"], "src");
        let observation = &history.messages()[1].content;
        assert!(observation.starts_with("Tool Output (list_files):\n[ok] list_files ran"));
        assert!(observation.contains("1 more action(s)"));
    }

    #[test]
    fn terminal_action_completes_with_summary() {
        let (registry, seen) = registry();
        let mut history = Conversation::new();
        let outcome = run_turn(
            &registry,
            &mut history,
            "Done. {'name': 'task_complete', 'arguments': {'summary': 'Added fee calc.'}}",
        );
        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                summary: "Added fee calc.".to_string()
            }
        );
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn missing_content_is_taken_from_the_last_code_block() {
        let (registry, seen) = registry();
        let mut history = Conversation::new();
        let reply = "```json\n{\"name\": \"write_file\", \"arguments\": {\"file_path\": \"src/a.py\"}}\n```\n\
                     ```python\ndef fee(x):\n    return x * 2\n```\n";
        run_turn(&registry, &mut history, reply);
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["content"], "def fee(x):\n    return x * 2\n");
    }

    #[test]
    fn missing_content_without_block_fails_without_dispatch() {
        let (registry, seen) = registry();
        let mut history = Conversation::new();
        run_turn(
            &registry,
            &mut history,
            r#"{"name": "write_file", "arguments": {"file_path": "src/a.py"}}"#,
        );
        assert!(seen.borrow().is_empty());
        assert!(history.messages()[1].content.contains("[error] write_file needs file content"));
    }

    #[test]
    fn fatal_result_stops_the_task() {
        let (registry, _) = registry();
        let mut history = Conversation::new();
        let outcome = run_turn(
            &registry,
            &mut history,
            r#"{"name": "init_workspace", "arguments": {"fatal": true}}"#,
        );
        assert_eq!(
            outcome,
            TurnOutcome::Fatal {
                tool: "init_workspace".to_string(),
                reason: "workspace gone".to_string()
            }
        );
        assert!(history.messages()[1].content.contains("[error] workspace gone"));
    }

    #[test]
    fn unknown_tool_is_fed_back_as_an_observation() {
        let (registry, _) = registry();
        let mut history = Conversation::new();
        let outcome = run_turn(&registry, &mut history, r#"{"name": "deploy", "arguments": {}}"#);
        assert_eq!(outcome, TurnOutcome::Continue);
        let observation = &history.messages()[1].content;
        assert!(observation.starts_with("Tool Output (deploy):\n[error] Unknown tool 'deploy'"));
        assert!(observation.contains("init_workspace, list_files, write_file, task_complete"));
    }
}
