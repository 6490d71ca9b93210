//! Tolerant extraction of a JSON array from free-form LLM output.
//!
//! Models are told to answer with bare JSON but regularly wrap it in a
//! markdown fence, add a sentence of prose around it, leave raw newlines in
//! strings, or fall back to single-quoted Python-style literals. The parse
//! runs strict → permissive:
//!
//! 1. take the inner text of a fenced block if there is one,
//! 2. slice from the first `[` to the last `]`,
//! 3. parse as JSON, tolerating control characters inside strings,
//! 4. parse with a narrow literal grammar (either quote style,
//!    `True`/`False`/`None`, tuples, trailing commas).
//!
//! Nothing is ever evaluated. If both parses fail the result is an empty
//! array: one malformed field must not take the rest of the job down.

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Parse LLM output that is expected to hold a JSON array.
///
/// Never fails; unparseable input, and input that parses to anything other
/// than an array (`null`, `None`, a bare object or scalar), yields `[]`.
pub fn parse_json_list(raw: &str) -> Value {
    let cleaned = clean_json_string(raw);

    let parsed = match serde_json::from_str::<Value>(&escape_control_chars(cleaned)) {
        Ok(value) => value,
        Err(_) => match parse_literal(cleaned) {
            Ok(value) => value,
            Err(e) => {
                let preview: String = cleaned.chars().take(100).collect();
                tracing::warn!(error = %e, preview = %preview, "failed to parse LLM output as JSON");
                return Value::Array(Vec::new());
            }
        },
    };

    if parsed.is_array() {
        parsed
    } else {
        tracing::warn!(kind = %value_kind(&parsed), "LLM output is not a list; using []");
        Value::Array(Vec::new())
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Strip a markdown fence and surrounding prose, leaving the array span.
pub fn clean_json_string(raw: &str) -> &str {
    let text = fenced_block(raw).unwrap_or(raw);

    match (text.find('['), text.rfind(']')) {
        (Some(start), Some(end)) if start <= end => &text[start..=end],
        (Some(_), Some(_)) => "",
        _ => text.trim(),
    }
}

/// Inner text of the first ```` ``` ```` fenced block, with an optional
/// `json` tag removed. An unterminated fence does not count.
fn fenced_block(raw: &str) -> Option<&str> {
    let open = raw.find("```")?;
    let after = &raw[open + 3..];
    let body = after.strip_prefix("json").unwrap_or(after);
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// Escape raw control characters that appear inside string literals so
/// `serde_json` accepts them, matching a non-strict JSON decoder.
fn escape_control_chars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
                c => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }

    out
}

#[derive(Debug, Error)]
#[error("{message} at offset {offset}")]
pub struct LiteralError {
    offset: usize,
    message: String,
}

const MAX_DEPTH: usize = 128;

/// Parse a Python-style literal (lists, tuples, dicts, strings, numbers,
/// booleans, `None`) into a JSON value.
pub fn parse_literal(text: &str) -> Result<Value, LiteralError> {
    let mut parser = LiteralParser {
        chars: text.chars().collect(),
        pos: 0,
        depth: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() {
        return Err(parser.error("trailing characters"));
    }
    Ok(value)
}

struct LiteralParser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl LiteralParser {
    fn error(&self, message: &str) -> LiteralError {
        LiteralError {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn value(&mut self) -> Result<Value, LiteralError> {
        self.skip_ws();
        match self.peek() {
            Some('[') => self.sequence(']'),
            Some('(') => self.sequence(')'),
            Some('{') => self.dict(),
            Some('\'') | Some('"') => self.strings().map(Value::String),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.keyword(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn enter(&mut self) -> Result<(), LiteralError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        Ok(())
    }

    /// `[a, b, ...]` or `(a, b, ...)`, trailing comma allowed.
    fn sequence(&mut self, close: char) -> Result<Value, LiteralError> {
        self.enter()?;
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                break;
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(c) if c == close => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.error("expected ',' or closing bracket")),
            }
        }
        self.depth -= 1;
        Ok(Value::Array(items))
    }

    fn dict(&mut self) -> Result<Value, LiteralError> {
        self.enter()?;
        self.pos += 1;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.pos += 1;
                break;
            }
            let key = match self.value()? {
                Value::String(s) => s,
                Value::Array(_) | Value::Object(_) => {
                    return Err(self.error("unhashable dict key"));
                }
                other => other.to_string(),
            };
            self.skip_ws();
            if self.peek() != Some(':') {
                return Err(self.error("expected ':'"));
            }
            self.pos += 1;
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
        self.depth -= 1;
        Ok(Value::Object(map))
    }

    /// One or more adjacent string literals, concatenated.
    fn strings(&mut self) -> Result<String, LiteralError> {
        let mut out = self.string()?;
        loop {
            let save = self.pos;
            self.skip_ws();
            if matches!(self.peek(), Some('\'') | Some('"')) {
                out.push_str(&self.string()?);
            } else {
                self.pos = save;
                return Ok(out);
            }
        }
    }

    fn string(&mut self) -> Result<String, LiteralError> {
        let quote = self.peek().ok_or_else(|| self.error("expected string"))?;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let c = self
                .peek()
                .ok_or_else(|| self.error("unterminated string"))?;
            self.pos += 1;
            if c == quote {
                return Ok(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            let esc = self
                .peek()
                .ok_or_else(|| self.error("unterminated escape"))?;
            self.pos += 1;
            match esc {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                '\\' | '\'' | '"' | '/' => out.push(esc),
                '\n' => {}
                'x' => out.push(self.hex_escape(2)?),
                'u' => out.push(self.hex_escape(4)?),
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
        }
    }

    fn hex_escape(&mut self, len: usize) -> Result<char, LiteralError> {
        let end = self.pos + len;
        if end > self.chars.len() {
            return Err(self.error("truncated hex escape"));
        }
        let digits: String = self.chars[self.pos..end].iter().collect();
        let code =
            u32::from_str_radix(&digits, 16).map_err(|_| self.error("invalid hex escape"))?;
        self.pos = end;
        char::from_u32(code).ok_or_else(|| self.error("invalid code point"))
    }

    fn number(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.pos += 1;
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' | '_' => {}
                '.' | 'e' | 'E' => is_float = true,
                '-' | '+' if matches!(self.chars.get(self.pos - 1), Some('e') | Some('E')) => {}
                _ => break,
            }
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        let text = text.strip_prefix('+').unwrap_or(&text);

        if !is_float {
            if let Ok(n) = text.parse::<i64>() {
                return Ok(Value::Number(n.into()));
            }
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| LiteralError {
                offset: start,
                message: format!("invalid number '{}'", text),
            })
    }

    fn keyword(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            "None" | "null" => Ok(Value::Null),
            _ => Err(LiteralError {
                offset: start,
                message: format!("unknown name '{}'", word),
            }),
        }
    }
}
