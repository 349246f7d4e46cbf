//! Helper utilities for agent operation
//!
//! Input sanitization, JSON extraction, and the small parsers the turn
//! pipeline uses to recognize direct tool calls and command prefixes.

use std::collections::HashMap;

use serde_json::Value;

/// Sanitizes user input to prevent prompt injection.
///
/// Any line that begins with `System:` (case-insensitive, after trim) is
/// re-prefixed as `System (quoted):` so a raw system directive smuggled in
/// user text never appears verbatim in the assembled prompt. `User:` lines
/// get the same treatment, and backticks are flattened to straight quotes.
pub fn sanitize_input(s: &str) -> String {
    let quoted = s
        .trim()
        .lines()
        .map(quote_directive_line)
        .collect::<Vec<_>>()
        .join("\n");
    quoted.replace('`', "'")
}

/// Escapes memory or tool content for safe inclusion in prompts.
pub fn escape_prompt_content(s: &str) -> String {
    let quoted = s
        .lines()
        .map(quote_directive_line)
        .collect::<Vec<_>>()
        .join("\n");
    quoted.replace('`', "'")
}

fn quote_directive_line(line: &str) -> String {
    let trimmed = line.trim_start();
    let lower = trimmed.to_lowercase();
    for (prefix, quoted) in [
        ("system:", "System (quoted):"),
        ("user:", "User (quoted):"),
        ("conversation memory", "Conversation memory (quoted)"),
    ] {
        if lower.starts_with(prefix) {
            let indent = &line[..line.len() - trimmed.len()];
            let rest = &trimmed[prefix.len()..];
            return format!("{indent}{quoted}{rest}");
        }
    }
    line.to_string()
}

/// Extracts the first JSON object or array from a string that may contain
/// surrounding prose (e.g. a model reply wrapped in explanation text).
pub fn extract_json(s: &str) -> Option<String> {
    let trimmed = s.trim();

    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                return Some(trimmed[start..=end].to_string());
            }
        }
    }

    if let Some(start) = trimmed.find('[') {
        if let Some(end) = trimmed.rfind(']') {
            if end > start {
                return Some(trimmed[start..=end].to_string());
            }
        }
    }

    None
}

/// Strips a Markdown code fence, returning the inner snippet.
pub fn strip_code_fence(s: &str) -> String {
    let trimmed = s.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let mut inner = trimmed.trim_start_matches("```");
    if let Some(pos) = inner.find('\n') {
        inner = &inner[pos + 1..];
    }

    if let Some(end) = inner.rfind("```") {
        inner = &inner[..end];
    }

    inner.trim().to_string()
}

/// Splits a command string into name and arguments
pub fn split_command(s: &str) -> (&str, &str) {
    let trimmed = s.trim();
    if let Some(pos) = trimmed.find(char::is_whitespace) {
        let (name, rest) = trimmed.split_at(pos);
        (name.trim(), rest.trim())
    } else {
        (trimmed, "")
    }
}

/// A recognized direct tool invocation.
#[derive(Debug, Clone)]
pub struct DirectToolCall {
    pub name: String,
    pub arguments: HashMap<String, Value>,
    pub stream: bool,
}

/// Detects the three direct-call shapes the pipeline short-circuits on:
///
/// 1. `{"tool": "name", "arguments": {...}, "stream": true}`
/// 2. `tool: name <json-or-text>`
/// 3. `name {json}` where `name` resolves to a known tool
///
/// `resolves` answers whether a candidate name is present in the merged
/// tool namespace; it gates shape 3 so ordinary prose never matches.
pub fn parse_direct_tool_call(
    input: &str,
    resolves: impl Fn(&str) -> bool,
) -> Option<DirectToolCall> {
    let trimmed = input.trim();

    // Shape 1: strict JSON envelope.
    if trimmed.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            if let Some(name) = map.get("tool").and_then(Value::as_str) {
                let arguments = map
                    .get("arguments")
                    .and_then(Value::as_object)
                    .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default();
                let stream = map.get("stream").and_then(Value::as_bool).unwrap_or(false);
                return Some(DirectToolCall {
                    name: name.to_string(),
                    arguments,
                    stream,
                });
            }
        }
        return None;
    }

    // Shape 2: "tool: name payload" with a space after the colon.
    if let Some(rest) = trimmed.strip_prefix("tool: ") {
        let (name, payload) = split_command(rest);
        if !name.is_empty() {
            return Some(DirectToolCall {
                name: name.to_string(),
                arguments: arguments_from_payload(payload),
                stream: false,
            });
        }
        return None;
    }

    // Shape 3: "name {json}" for a known tool.
    let (name, payload) = split_command(trimmed);
    if payload.starts_with('{') && resolves(name) {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(payload) {
            return Some(DirectToolCall {
                name: name.to_string(),
                arguments: map.into_iter().collect(),
                stream: false,
            });
        }
    }

    None
}

/// Parses a command payload: JSON when it looks like JSON, otherwise the raw
/// text lands under the `input` key.
pub fn arguments_from_payload(payload: &str) -> HashMap<String, Value> {
    let trimmed = payload.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            return map.into_iter().collect();
        }
        if let Ok(value @ Value::Array(_)) = serde_json::from_str::<Value>(trimmed) {
            return HashMap::from([("input".to_string(), value)]);
        }
    }
    if trimmed.is_empty() {
        HashMap::new()
    } else {
        HashMap::from([("input".to_string(), Value::String(trimmed.to_string()))])
    }
}

/// Heuristic for the sandboxed-code branch: a fenced block or a Go-ish
/// snippet with a function and braces. JSON never qualifies.
pub fn looks_like_code(input: &str) -> bool {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.starts_with('{') || trimmed.starts_with('[') {
        return false;
    }
    if trimmed.starts_with("```") {
        return true;
    }
    let has_func = trimmed
        .split_whitespace()
        .any(|tok| tok == "func" || tok == "fn");
    has_func && trimmed.contains('{') && trimmed.contains('}')
}
