//! Signature outline of Python source.
//!
//! The outline keeps `class` and `def` headers with their nesting and drops
//! every body, so the model can see a large module's shape without reading it.
//! Headers that span several lines are joined until their brackets balance.

use std::sync::LazyLock;

use regex::Regex;

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<indent>[ \t]*)(?P<kind>(?:async[ \t]+)?def|class)[ \t]+(?P<name>\w+)")
        .unwrap()
});

/// Upper bound on physical lines joined into one header.
const MAX_HEADER_LINES: usize = 20;

/// Outline entries, one per `class`/`def` header, in source order.
pub fn outline(source: &str) -> Vec<String> {
    let lines: Vec<&str> = source.lines().collect();
    let mut entries = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let Some(caps) = HEADER.captures(lines[i]) else {
            i += 1;
            continue;
        };
        let indent = caps["indent"].replace('\t', "    ");
        let (header, consumed) = join_header(&lines[i..]);
        entries.push(format!("{indent}{}", signature(&header)));
        i += consumed;
    }
    entries
}

/// Render an outline with a heading, or a note when nothing was found.
pub fn render_outline(path: &str, source: &str) -> String {
    let entries = outline(source);
    if entries.is_empty() {
        return format!("'{path}' has no classes or functions.");
    }
    format!("Outline of '{path}':\n{}", entries.join("\n"))
}

fn join_header(lines: &[&str]) -> (String, usize) {
    let mut header = String::new();
    let mut depth = 0i32;
    for (n, line) in lines.iter().take(MAX_HEADER_LINES).enumerate() {
        let code = strip_comment(line);
        if !header.is_empty() {
            header.push(' ');
        }
        header.push_str(code.trim());
        depth += bracket_delta(code);
        if depth <= 0 && code.trim_end().ends_with(':') {
            return (header, n + 1);
        }
    }
    (header, lines.len().min(MAX_HEADER_LINES).max(1))
}

/// Drop the trailing `:` and collapse whitespace runs.
fn signature(header: &str) -> String {
    let compact = header.split_whitespace().collect::<Vec<_>>().join(" ");
    let compact = compact.replace("( ", "(").replace(" )", ")");
    compact.trim_end_matches(':').trim_end().to_string()
}

fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (idx, ch) in line.char_indices() {
        match (quote, ch) {
            (None, '#') => return &line[..idx],
            (None, '\'' | '"') => quote = Some(ch),
            (Some(q), c) if c == q => quote = None,
            _ => {}
        }
    }
    line
}

fn bracket_delta(code: &str) -> i32 {
    code.chars()
        .map(|ch| match ch {
            '(' | '[' | '{' => 1,
            ')' | ']' | '}' => -1,
            _ => 0,
        })
        .sum()
}
