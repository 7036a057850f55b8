use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{AgentlyError, AgentlyResult};

static BLOCK_COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static TRAILING_COMMA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",(\s*[}\]])").unwrap());

/// Parses `raw` into a JSON object, repairing the usual model formatting mistakes first.
pub fn parse_json_object(raw: &str) -> AgentlyResult<serde_json::Map<String, serde_json::Value>> {
    if raw.trim().is_empty() {
        return Err(AgentlyError::EmptyResponse);
    }
    let repaired = repair(raw);
    let invalid = |reason: String| AgentlyError::InvalidResponse {
        reason,
        original: raw.to_string(),
        repaired: repaired.clone(),
    };
    match serde_json::from_str::<serde_json::Value>(&repaired) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(invalid(format!("expected a JSON object, got {}", kind_of(&other)))),
        Err(e) => {
            tracing::error!(error = %e, response = ?raw, "JSON decode error");
            Err(invalid(e.to_string()))
        }
    }
}

/// Fence, `//` comments, `/* */` comments, trailing commas, then the outermost `{...}` span.
pub fn repair(raw: &str) -> String {
    let text = strip_code_fence(raw);
    let text = remove_line_comments(&text);
    let text = remove_block_comments(&text);
    let text = remove_trailing_commas(&text);
    extract_object_span(&text).to_string()
}

pub fn strip_code_fence(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim().to_string()
}

/// Cuts each line at the first `//` that sits outside a double-quoted region.
///
/// Quote parity is tracked per physical line only, so a string that spans lines is not
/// followed across the line break.
pub fn remove_line_comments(text: &str) -> String {
    text.split('\n')
        .map(|line| match line_comment_start(line) {
            Some(idx) => line[..idx].trim_end(),
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn line_comment_start(line: &str) -> Option<usize> {
    if !line.contains("//") {
        return None;
    }
    let quotes = quote_positions(line);
    line.match_indices("//")
        .map(|(idx, _)| idx)
        .find(|&idx| quotes.iter().filter(|&&q| q < idx).count() % 2 == 0)
}

/// Byte offsets of unescaped `"` characters. A backslash only affects which quotes count.
fn quote_positions(line: &str) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut escape_next = false;
    for (idx, ch) in line.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' => escape_next = true,
            '"' => positions.push(idx),
            _ => {}
        }
    }
    positions
}

pub fn remove_block_comments(text: &str) -> String {
    BLOCK_COMMENT_RE.replace_all(text, "").into_owned()
}

pub fn remove_trailing_commas(text: &str) -> String {
    TRAILING_COMMA_RE.replace_all(text, "$1").into_owned()
}

/// The first-`{` to last-`}` span when the text has material around an object.
pub fn extract_object_span(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return trimmed;
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
