//! Fenced-block extraction for file content written outside the action.
//!
//! Models often put a long file body in a fenced code block next to the action
//! instead of escaping it into the JSON `content` argument. The last fenced
//! block that is not itself an action is taken as that body.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::decoder;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[^\n`]*\n(.*?)```").unwrap());

/// Return the body of the last fenced block in `text` that does not decode as
/// an action. The body is trimmed and ends with a single newline.
pub fn last_content_block(text: &str) -> Option<String> {
    let bodies: Vec<&str> = FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    bodies
        .into_iter()
        .rev()
        .find(|body| !is_action_block(body))
        .map(|body| format!("{}\n", body.trim()))
}

fn is_action_block(body: &str) -> bool {
    let trimmed = body.trim();
    trimmed.starts_with('{') && !decoder::decode(trimmed).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_last_non_action_block() {
        let text = "Here is the fix:\n```python\ndef add(a, b):\n    return a + b\n```\n\
                    ```json\n{\"action\": \"write_file\", \"args\": {\"file_path\": \"calc.py\"}}\n```\n";
        assert_eq!(
            last_content_block(text).as_deref(),
            Some("def add(a, b):\n    return a + b\n")
        );
    }

    #[test]
    fn later_code_block_wins_over_earlier_one() {
        let text = "```\nold\n```\nthen\n```text\nnew\n```";
        assert_eq!(last_content_block(text).as_deref(), Some("new\n"));
    }

    #[test]
    fn no_block_or_only_action_blocks_yield_none() {
        assert!(last_content_block("no fences here").is_none());
        assert!(last_content_block("```json\n{\"action\": \"list_files\"}\n```").is_none());
    }
}
