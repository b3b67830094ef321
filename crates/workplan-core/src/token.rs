//! `•path` and `•{path}` scope tokens.

use serde_json::Value;

pub const SIGIL: char = '•';

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Token<'a> {
    Literal(&'a str),
    Reference(&'a str),
    Template(Vec<Segment<'a>>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Segment<'a> {
    Text(&'a str),
    Path(&'a str),
}

pub fn parse(input: &str) -> Token<'_> {
    if let Some(rest) = input
        .strip_prefix(SIGIL)
        .filter(|rest| is_path(rest))
    {
        return Token::Reference(rest);
    }

    let opener = format!("{SIGIL}{{");
    if !input.contains(&opener) {
        return Token::Literal(input);
    }

    let mut segments = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find(&opener) {
        let after = &rest[start + opener.len()..];
        let Some(end) = after.find('}') else {
            break;
        };
        if start > 0 {
            segments.push(Segment::Text(&rest[..start]));
        }
        segments.push(Segment::Path(after[..end].trim()));
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    Token::Template(segments)
}

/// Applies token substitution to `input`, resolving dotted paths through
/// `resolve`.
pub fn substitute(input: &str, resolve: impl Fn(&str) -> Option<Value>) -> Value {
    match parse(input) {
        Token::Literal(text) => Value::String(text.to_string()),
        Token::Reference(path) => resolve(path).unwrap_or(Value::Null),
        Token::Template(segments) => {
            let mut output = String::new();
            for segment in segments {
                match segment {
                    Segment::Text(text) => output.push_str(text),
                    Segment::Path(path) => {
                        output.push_str(&render(&resolve(path).unwrap_or(Value::Null)))
                    }
                }
            }
            Value::String(output)
        }
    }
}

fn is_path(candidate: &str) -> bool {
    candidate.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && candidate
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | '$'))
}

/// Text form of a value: strings unquoted, null empty, everything else JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Splits `a.b.c` into `("a", Some("b.c"))`.
pub fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    }
}

/// Walks a dotted path into objects (by key) and arrays (by index).
pub fn value_at_path(root: &Value, path: &str) -> Option<Value> {
    let mut current = root;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}
