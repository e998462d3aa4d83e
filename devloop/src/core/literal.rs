//! Permissive object-literal parser for near-miss JSON.
//!
//! Models regularly emit objects that are almost JSON: single-quoted strings,
//! `True`/`False`/`None`, bare keys, trailing commas, tuples, or raw newlines
//! inside strings. This parser accepts those spellings and produces a
//! [`serde_json::Value`]. It is only used when strict JSON finds nothing.

use serde_json::{Map, Number, Value};

/// Parse one value at the start of `input`.
///
/// Returns the value and the number of bytes consumed, or `None` if the input
/// does not start with a parseable literal. Trailing text is ignored.
pub fn parse_prefix(input: &str) -> Option<(Value, usize)> {
    let mut parser = Parser { src: input, pos: 0 };
    parser.skip_ws();
    let value = parser.value(0)?;
    Some((value, parser.pos))
}

const MAX_DEPTH: usize = 128;

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            return true;
        }
        false
    }

    fn skip_ws(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.pos += ch.len_utf8();
            } else {
                break;
            }
        }
    }

    fn value(&mut self, depth: usize) -> Option<Value> {
        if depth > MAX_DEPTH {
            return None;
        }
        match self.peek()? {
            '{' => self.object(depth),
            '[' => self.sequence('[', ']', depth),
            '(' => self.sequence('(', ')', depth),
            '"' | '\'' => self.string().map(Value::String),
            ch if ch == '-' || ch == '+' || ch.is_ascii_digit() => self.number(),
            ch if ch.is_alphabetic() || ch == '_' => self.keyword(),
            _ => None,
        }
    }

    fn object(&mut self, depth: usize) -> Option<Value> {
        self.bump();
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.eat('}') {
                return Some(Value::Object(map));
            }
            let key = self.key()?;
            self.skip_ws();
            if !self.eat(':') {
                return None;
            }
            self.skip_ws();
            let value = self.value(depth + 1)?;
            map.insert(key, value);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            self.skip_ws();
            if self.eat('}') {
                return Some(Value::Object(map));
            }
            return None;
        }
    }

    fn key(&mut self) -> Option<String> {
        match self.peek()? {
            '"' | '\'' => self.string(),
            ch if ch.is_alphanumeric() || ch == '_' => {
                let start = self.pos;
                while let Some(ch) = self.peek() {
                    if ch.is_alphanumeric() || ch == '_' || ch == '-' {
                        self.pos += ch.len_utf8();
                    } else {
                        break;
                    }
                }
                Some(self.src[start..self.pos].to_string())
            }
            _ => None,
        }
    }

    fn sequence(&mut self, open: char, close: char, depth: usize) -> Option<Value> {
        debug_assert_eq!(self.peek(), Some(open));
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Some(Value::Array(items));
            }
            items.push(self.value(depth + 1)?);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            self.skip_ws();
            if self.eat(close) {
                return Some(Value::Array(items));
            }
            return None;
        }
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.bump()?;
        let mut out = String::new();
        loop {
            let ch = self.bump()?;
            if ch == quote {
                return Some(out);
            }
            if ch != '\\' {
                out.push(ch);
                continue;
            }
            match self.bump()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                'b' => out.push('\u{0008}'),
                'f' => out.push('\u{000C}'),
                '0' => out.push('\0'),
                'u' => out.push(self.unicode_escape()?),
                // Line continuation inside a string literal.
                '\n' => {}
                other => out.push(other),
            }
        }
    }

    fn unicode_escape(&mut self) -> Option<char> {
        let high = self.hex4()?;
        if (0xD800..0xDC00).contains(&high) {
            let save = self.pos;
            if self.eat('\\') && self.eat('u') {
                if let Some(low) = self.hex4()
                    && (0xDC00..0xE000).contains(&low)
                {
                    let combined = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                    return char::from_u32(combined);
                }
            }
            self.pos = save;
            return Some(char::REPLACEMENT_CHARACTER);
        }
        Some(char::from_u32(high).unwrap_or(char::REPLACEMENT_CHARACTER))
    }

    fn hex4(&mut self) -> Option<u32> {
        let digits = self.src.get(self.pos..self.pos + 4)?;
        let value = u32::from_str_radix(digits, 16).ok()?;
        self.pos += 4;
        Some(value)
    }

    fn number(&mut self) -> Option<Value> {
        let start = self.pos;
        if matches!(self.peek(), Some('-' | '+')) {
            self.bump();
        }
        let mut is_float = false;
        while let Some(ch) = self.peek() {
            match ch {
                '0'..='9' | '_' => {}
                '.' | 'e' | 'E' => is_float = true,
                '-' | '+' if is_float => {}
                _ => break,
            }
            self.bump();
        }
        let raw: String = self.src[start..self.pos]
            .chars()
            .filter(|ch| *ch != '_' && *ch != '+')
            .collect();
        if !is_float && let Ok(int) = raw.parse::<i64>() {
            return Some(Value::Number(int.into()));
        }
        let float = raw.parse::<f64>().ok()?;
        Number::from_f64(float).map(Value::Number)
    }

    fn keyword(&mut self) -> Option<Value> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                self.pos += ch.len_utf8();
            } else {
                break;
            }
        }
        match &self.src[start..self.pos] {
            "true" | "True" => Some(Value::Bool(true)),
            "false" | "False" => Some(Value::Bool(false)),
            "null" | "None" | "nil" => Some(Value::Null),
            _ => None,
        }
    }
}
