//! Extract structured actions from free-form model text.
//!
//! The scan walks the text left to right. At every `{` it tries to parse one
//! complete value starting there; on success the cursor jumps past the consumed
//! span, otherwise it advances by one byte. A strict JSON pass runs first. Only
//! if it yields no action at all does a second pass run with the permissive
//! literal parser from [`crate::core::literal`].
//!
//! Decoding never fails: malformed input produces an empty list.

use serde_json::{Map, Value};

use crate::core::literal;
use crate::core::types::Action;

/// Keys accepted as the action name, in priority order.
pub const NAME_KEYS: &[&str] = &["name", "action", "tool"];
/// Keys accepted as the action arguments, in priority order.
pub const ARGUMENT_KEYS: &[&str] = &["arguments", "args", "parameters"];

/// Decode every qualifying action in `text`, in textual order.
pub fn decode(text: &str) -> Vec<Action> {
    let strict = scan(text, strict_prefix);
    if !strict.is_empty() {
        return strict;
    }
    scan(text, literal::parse_prefix)
}

fn scan(text: &str, parse: fn(&str) -> Option<(Value, usize)>) -> Vec<Action> {
    let mut actions = Vec::new();
    let mut pos = 0;
    while let Some(offset) = text[pos..].find('{') {
        let start = pos + offset;
        match parse(&text[start..]) {
            Some((value, consumed)) if consumed > 0 => {
                if let Some(action) = action_from_value(value) {
                    actions.push(action);
                }
                pos = start + consumed;
            }
            _ => pos = start + 1,
        }
    }
    actions
}

fn strict_prefix(input: &str) -> Option<(Value, usize)> {
    let mut stream = serde_json::Deserializer::from_str(input).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Some((value, stream.byte_offset())),
        _ => None,
    }
}

/// Turn a parsed value into an action if it has the action shape.
///
/// The value must be an object with a string name under one of [`NAME_KEYS`].
/// Arguments, if present, must be an object; absent arguments become an empty
/// map. A bare `name` key is ambiguous with ordinary data, so it only qualifies
/// when the object has an arguments key or no other keys.
pub fn action_from_value(value: Value) -> Option<Action> {
    let Value::Object(mut object) = value else {
        return None;
    };
    let (name_key, name) = NAME_KEYS.iter().find_map(|key| {
        object
            .get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| (*key, name.to_string()))
    })?;

    let args_key = ARGUMENT_KEYS.iter().find(|key| object.contains_key(**key));
    if name_key == "name" && args_key.is_none() && object.len() > 1 {
        return None;
    }

    let arguments = match args_key.and_then(|key| object.remove(*key)) {
        None => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => return None,
    };
    Some(Action::new(name, arguments))
}
