//! `read_ticket` with a per-key kill-switch.
//!
//! A key that came back `NotFound`, or that failed `max_lookups_per_key`
//! times, is never sent to the ticket source again within the task. Later
//! requests get a fixed answer telling the model to work from the task
//! description instead.

use std::cell::RefCell;

use serde_json::{Map, Value, json};
use tracing::{info, warn};

use super::{Tool, ToolError, required_str};
use crate::core::budget::AttemptLimiter;
use crate::core::classifier::{classify_external_failure, remediation};
use crate::core::types::ToolResult;
use crate::io::ticket::{TicketLookup, TicketSource, is_valid_issue_key};

pub struct ReadTicketTool {
    source: Option<Box<dyn TicketSource>>,
    failed_lookups: RefCell<AttemptLimiter>,
}

impl ReadTicketTool {
    pub fn new(source: Option<Box<dyn TicketSource>>, max_lookups_per_key: u32) -> Self {
        Self {
            source,
            failed_lookups: RefCell::new(AttemptLimiter::new(max_lookups_per_key)),
        }
    }
}

fn stop_text(key: &str) -> String {
    format!(
        "STOP: ticket {key} is unavailable and will not be looked up again. Do not call \
         read_ticket for {key}; proceed using the requirements in the task description."
    )
}

impl Tool for ReadTicketTool {
    fn name(&self) -> &'static str {
        "read_ticket"
    }

    fn description(&self) -> &'static str {
        "Fetch a ticket (summary, status, links, description) by issue key, e.g. PAY-123."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"issue_key": {"type": "string"}},
            "required": ["issue_key"],
            "additionalProperties": false
        })
    }

    fn invoke(&self, arguments: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let key = required_str(arguments, "issue_key")?.trim().to_uppercase();
        if !is_valid_issue_key(&key) {
            return Err(ToolError::InvalidArguments(format!(
                "'{key}' is not an issue key like PAY-123"
            )));
        }
        let Some(source) = &self.source else {
            return Ok(ToolResult::failure(
                "Ticket lookup is not configured (JIRA_URL, JIRA_EMAIL and JIRA_API_TOKEN are \
                 not set). Do not call read_ticket again; proceed using the requirements in the \
                 task description.",
            ));
        };
        if self.failed_lookups.borrow().is_exhausted(&key) {
            info!(%key, "ticket lookup suppressed");
            return Ok(ToolResult::failure(stop_text(&key)));
        }

        match source.fetch(&key) {
            Ok(TicketLookup::Found(text)) => Ok(ToolResult::success(text)),
            Ok(TicketLookup::NotFound) => {
                warn!(%key, "ticket not found; disabling further lookups");
                self.failed_lookups.borrow_mut().exhaust(&key);
                Ok(ToolResult::failure(format!(
                    "Ticket {key} was not found. Do not look it up again; proceed using the \
                     requirements in the task description."
                )))
            }
            Err(err) => {
                let message = format!("{err:#}");
                let mut limiter = self.failed_lookups.borrow_mut();
                limiter.try_acquire(&key);
                warn!(%key, attempts = limiter.attempts(&key), "ticket lookup failed");
                if limiter.is_exhausted(&key) {
                    return Ok(ToolResult::failure(format!(
                        "Ticket lookup failed: {message}\n{}",
                        stop_text(&key)
                    )));
                }
                Ok(ToolResult::failure(format!(
                    "Ticket lookup failed: {message}\n{}",
                    remediation(classify_external_failure(&message))
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ToolStatus;
    use crate::test_support::FakeTicketSource;

    fn args(key: &str) -> Map<String, Value> {
        json!({"issue_key": key}).as_object().cloned().expect("object")
    }

    #[test]
    fn found_ticket_is_returned_every_time() {
        let source = FakeTicketSource::new().with_ticket("PAY-1", "--- TICKET PAY-1 ---");
        let handle = source.clone();
        let tool = ReadTicketTool::new(Some(Box::new(source)), 2);
        for _ in 0..3 {
            let result = tool.invoke(&args("PAY-1")).expect("invoke");
            assert!(result.ok());
        }
        assert_eq!(handle.calls(), 3);
    }

    #[test]
    fn not_found_trips_the_kill_switch() {
        let source = FakeTicketSource::new();
        let handle = source.clone();
        let tool = ReadTicketTool::new(Some(Box::new(source)), 2);

        let first = tool.invoke(&args("PAY-999")).expect("invoke");
        assert_eq!(first.status, ToolStatus::Failure);
        assert!(first.text.contains("was not found"));

        let second = tool.invoke(&args("pay-999")).expect("invoke");
        assert!(second.text.starts_with("STOP"));
        assert_eq!(handle.calls(), 1);
    }

    #[test]
    fn repeated_errors_exhaust_the_key() {
        let source = FakeTicketSource::new().failing("jira returned 503 Service Unavailable");
        let handle = source.clone();
        let tool = ReadTicketTool::new(Some(Box::new(source)), 2);

        let first = tool.invoke(&args("PAY-2")).expect("invoke");
        assert!(!first.text.contains("STOP"));
        let second = tool.invoke(&args("PAY-2")).expect("invoke");
        assert!(second.text.contains("STOP"));
        let third = tool.invoke(&args("PAY-2")).expect("invoke");
        assert!(third.text.starts_with("STOP"));
        assert_eq!(handle.calls(), 2);
    }

    #[test]
    fn missing_credentials_never_call_out() {
        let tool = ReadTicketTool::new(None, 2);
        let result = tool.invoke(&args("PAY-3")).expect("invoke");
        assert_eq!(result.status, ToolStatus::Failure);
        assert!(result.text.contains("not configured"));
    }

    #[test]
    fn malformed_key_is_an_argument_error() {
        let tool = ReadTicketTool::new(Some(Box::new(FakeTicketSource::new())), 2);
        let err = tool.invoke(&args("PAY 1; drop")).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
