//! Script evaluation engines.
//!
//! The bundled [`JsonEngine`] treats a loaded resource as a JSON document
//! that forms the context's global state. Scripts are `;`-separated
//! statements, each either a path expression or an assignment:
//!
//! ```text
//! user.name                  -> value at the path, or null
//! user.tags[1]               -> array element
//! user.age = 42; user.age    -> assignment, then lookup
//! $                          -> the whole document
//! ```

use serde_json::{Map, Value};
use splice_common::error::{SpliceError, SpliceResult};

/// Creates script contexts from resource bytes.
pub trait ScriptEngine: Send + 'static {
    fn create_context(&self, source: &[u8]) -> SpliceResult<Box<dyn ScriptContext>>;
}

/// A live context with its own global state.
pub trait ScriptContext: Send {
    /// Evaluate a script and return the value of its last statement.
    fn evaluate(&mut self, script: &str) -> SpliceResult<Value>;
}

/// Engine whose global state is a JSON document.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEngine;

impl ScriptEngine for JsonEngine {
    fn create_context(&self, source: &[u8]) -> SpliceResult<Box<dyn ScriptContext>> {
        let globals = if source.iter().all(u8::is_ascii_whitespace) {
            Value::Object(Map::new())
        } else {
            serde_json::from_slice(source)?
        };
        Ok(Box::new(JsonContext { globals }))
    }
}

/// Context created by [`JsonEngine`].
#[derive(Debug, Clone)]
pub struct JsonContext {
    globals: Value,
}

impl JsonContext {
    pub fn globals(&self) -> &Value {
        &self.globals
    }
}

impl ScriptContext for JsonContext {
    fn evaluate(&mut self, script: &str) -> SpliceResult<Value> {
        let mut last = Value::Null;
        for statement in split_outside_quotes(script, ';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            last = match split_assignment(statement) {
                Some((target, literal)) => {
                    let path = parse_path(target)?;
                    let value: Value = serde_json::from_str(literal.trim()).map_err(|e| {
                        SpliceError::script(format!("invalid literal `{}`: {e}", literal.trim()))
                    })?;
                    assign(&mut self.globals, &path, value.clone())?;
                    value
                }
                None => {
                    let path = parse_path(statement)?;
                    lookup(&self.globals, &path).cloned().unwrap_or(Value::Null)
                }
            };
        }
        Ok(last)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn split_outside_quotes(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
        } else if c == '"' {
            in_string = true;
        } else if c == separator {
            parts.push(&text[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&text[start..]);
    parts
}

fn split_assignment(statement: &str) -> Option<(&str, &str)> {
    let idx = statement.find('=')?;
    let target = &statement[..idx];
    // Only a bare path may sit left of `=`.
    if target.contains('"') {
        return None;
    }
    Some((target.trim(), &statement[idx + 1..]))
}

fn parse_path(text: &str) -> SpliceResult<Vec<Segment>> {
    let text = text.trim();
    if text == "$" {
        return Ok(Vec::new());
    }

    let invalid = || SpliceError::script(format!("invalid path `{text}`"));
    let mut segments = Vec::new();
    let mut key = String::new();
    let mut chars = text.chars().peekable();
    let mut after_index = false;

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if key.is_empty() && !after_index {
                    return Err(invalid());
                }
                if !key.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut key)));
                }
                after_index = false;
            }
            '[' => {
                if !key.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut key)));
                } else if segments.is_empty() && !after_index {
                    return Err(invalid());
                }
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        _ => return Err(invalid()),
                    }
                }
                let index = digits.parse::<usize>().map_err(|_| invalid())?;
                segments.push(Segment::Index(index));
                after_index = true;
            }
            c if c.is_alphanumeric() || c == '_' || c == '-' => {
                if after_index && key.is_empty() {
                    // `a[0]b` is not a path.
                    return Err(invalid());
                }
                key.push(c);
            }
            _ => return Err(invalid()),
        }
    }

    if !key.is_empty() {
        segments.push(Segment::Key(key));
    } else if !after_index {
        return Err(invalid());
    }
    Ok(segments)
}

fn lookup<'a>(root: &'a Value, path: &[Segment]) -> Option<&'a Value> {
    path.iter().try_fold(root, |value, segment| match segment {
        Segment::Key(key) => value.get(key.as_str()),
        Segment::Index(index) => value.get(*index),
    })
}

fn assign(root: &mut Value, path: &[Segment], value: Value) -> SpliceResult<()> {
    let Some((last, parents)) = path.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut current = root;
    for segment in parents {
        current = child_mut(current, segment)?;
    }
    *child_mut(current, last)? = value;
    Ok(())
}

fn child_mut<'a>(value: &'a mut Value, segment: &Segment) -> SpliceResult<&'a mut Value> {
    if value.is_null() {
        *value = match segment {
            Segment::Key(_) => Value::Object(Map::new()),
            Segment::Index(_) => Value::Array(Vec::new()),
        };
    }
    match (value, segment) {
        (Value::Object(map), Segment::Key(key)) => Ok(map.entry(key.clone()).or_insert(Value::Null)),
        (Value::Array(items), Segment::Index(index)) => {
            if *index == items.len() {
                items.push(Value::Null);
            }
            items
                .get_mut(*index)
                .ok_or_else(|| SpliceError::script(format!("index {index} out of bounds")))
        }
        (other, segment) => Err(SpliceError::script(format!(
            "cannot address {segment:?} inside {}",
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(source: &str) -> Box<dyn ScriptContext> {
        JsonEngine.create_context(source.as_bytes()).unwrap()
    }

    #[test]
    fn test_lookup_paths() {
        let mut ctx = context(r#"{"user": {"name": "ada", "tags": ["a", "b"]}}"#);
        assert_eq!(ctx.evaluate("user.name").unwrap(), json!("ada"));
        assert_eq!(ctx.evaluate("user.tags[1]").unwrap(), json!("b"));
        assert_eq!(ctx.evaluate("user.missing").unwrap(), Value::Null);
        assert_eq!(ctx.evaluate("$").unwrap()["user"]["name"], json!("ada"));
    }

    #[test]
    fn test_assignment_persists_between_evaluations() {
        let mut ctx = context("{}");
        assert_eq!(ctx.evaluate("counter = 1").unwrap(), json!(1));
        assert_eq!(
            ctx.evaluate(r#"settings.title = "a;b=c"; counter"#).unwrap(),
            json!(1)
        );
        assert_eq!(ctx.evaluate("settings.title").unwrap(), json!("a;b=c"));
        assert_eq!(ctx.evaluate("list[0] = true; list").unwrap(), json!([true]));
    }

    #[test]
    fn test_empty_source_and_script() {
        let mut ctx = context("  ");
        assert_eq!(ctx.evaluate("").unwrap(), Value::Null);
        assert_eq!(ctx.evaluate("$").unwrap(), json!({}));
    }

    #[test]
    fn test_errors() {
        assert!(JsonEngine.create_context(b"{not json").is_err());
        let mut ctx = context(r#"{"n": 3}"#);
        assert!(ctx.evaluate("a..b").is_err());
        assert!(ctx.evaluate("n.inner = 1").is_err());
        assert!(ctx.evaluate("x = {oops").is_err());
        assert!(ctx.evaluate("list[5] = 1").is_err());
    }

    #[test]
    fn test_parse_path_segments() {
        assert_eq!(
            parse_path("a.b[2][0].c").unwrap(),
            vec![
                Segment::Key("a".into()),
                Segment::Key("b".into()),
                Segment::Index(2),
                Segment::Index(0),
                Segment::Key("c".into()),
            ]
        );
        assert!(parse_path("[0]").is_err());
        assert!(parse_path("a.").is_err());
    }
}
