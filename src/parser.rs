use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::model::{Role, UsageDelta};

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    SessionMeta { id: String },
    ModelChange { model: String, provider: Option<String> },
    Message(MessageEvent),
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub role: Role,
    pub timestamp: Option<DateTime<Utc>>,
    pub usage: Option<UsageDelta>,
    pub tool_invocations: Vec<ToolInvocation>,
    pub tool_result: Option<ToolResultRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResultRef {
    pub call_id: String,
    pub is_error: bool,
}

const TOOL_INVOCATION_BLOCKS: [&str; 3] = ["tool_call", "toolCall", "tool_use"];

/// Decode one raw line. `None` means the line is skipped: blank, not valid
/// JSON, not an object, or missing the fields its kind requires.
pub fn parse_line(line: &str) -> Option<Event> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = serde_json::from_str::<Value>(trimmed).ok()?;
    decode_event(&parsed)
}

pub fn decode_event(parsed: &Value) -> Option<Event> {
    if !parsed.is_object() {
        return None;
    }
    let typ = str_at(parsed, &["type"])?;
    let top_timestamp = parsed.get("timestamp").and_then(parse_timestamp);

    let (kind, timestamp) = match typ.as_str() {
        "session_meta" | "session" => {
            let id = first_str(parsed, &[&["id"], &["sessionId"], &["session_id"]])?;
            (EventKind::SessionMeta { id }, top_timestamp)
        }
        "model_change" => {
            let model = first_str(parsed, &[&["model"], &["modelId"], &["model_id"]])?;
            let provider = str_at(parsed, &["provider"]);
            (EventKind::ModelChange { model, provider }, top_timestamp)
        }
        "message" => {
            let message = decode_message(parsed.get("message")?, top_timestamp)?;
            let timestamp = top_timestamp.or(message.timestamp);
            (EventKind::Message(message), timestamp)
        }
        _ => (EventKind::Unrecognized, top_timestamp),
    };

    Some(Event { timestamp, kind })
}

fn decode_message(message: &Value, fallback: Option<DateTime<Utc>>) -> Option<MessageEvent> {
    let role = Role::from_raw(&str_at(message, &["role"])?);
    let timestamp = message
        .get("timestamp")
        .and_then(parse_timestamp)
        .or(fallback);

    let tool_invocations = message
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| blocks.iter().filter_map(decode_tool_invocation).collect())
        .unwrap_or_default();

    let usage = match role {
        Role::Assistant => message.get("usage").and_then(decode_usage),
        _ => None,
    };

    let tool_result = match role {
        Role::ToolResult => first_str(
            message,
            &[&["toolCallId"], &["tool_call_id"], &["tool_use_id"]],
        )
        .map(|call_id| ToolResultRef {
            call_id,
            is_error: first_bool(message, &[&["isError"], &["is_error"]]).unwrap_or(false),
        }),
        _ => None,
    };

    Some(MessageEvent {
        role,
        timestamp,
        usage,
        tool_invocations,
        tool_result,
    })
}

fn decode_tool_invocation(block: &Value) -> Option<ToolInvocation> {
    let typ = str_at(block, &["type"])?;
    if !TOOL_INVOCATION_BLOCKS.contains(&typ.as_str()) {
        return None;
    }
    let id = str_at(block, &["id"])?;
    let name = str_at(block, &["name"]).unwrap_or_else(|| "unknown".to_string());
    Some(ToolInvocation { id, name })
}

fn decode_usage(usage: &Value) -> Option<UsageDelta> {
    if !usage.is_object() {
        return None;
    }
    let input = first_uint(usage, &[&["input"], &["input_tokens"], &["inputTokens"]]).unwrap_or(0);
    let output =
        first_uint(usage, &[&["output"], &["output_tokens"], &["outputTokens"]]).unwrap_or(0);
    let cache_read = first_uint(
        usage,
        &[
            &["cacheRead"],
            &["cache_read"],
            &["cache_read_tokens"],
            &["cache_read_input_tokens"],
        ],
    )
    .unwrap_or(0);
    let cache_write = first_uint(
        usage,
        &[
            &["cacheWrite"],
            &["cache_write"],
            &["cache_write_tokens"],
            &["cache_creation_input_tokens"],
        ],
    )
    .unwrap_or(0);
    let total = first_uint(usage, &[&["totalTokens"], &["total_tokens"], &["total"]])
        .unwrap_or_else(|| {
            input
                .saturating_add(output)
                .saturating_add(cache_read)
                .saturating_add(cache_write)
        });
    let cost = float_at(usage, &["cost"])
        .or_else(|| float_at(usage, &["cost", "total"]))
        .filter(|cost| cost.is_finite() && *cost > 0.0)
        .unwrap_or(0.0);

    Some(UsageDelta {
        input,
        output,
        cache_read,
        cache_write,
        total,
        cost,
    })
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(text) = value.as_str() {
        return DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .ok();
    }
    let millis = value
        .as_i64()
        .or_else(|| value.as_f64().filter(|v| v.is_finite()).map(|v| v as i64))?;
    Utc.timestamp_millis_opt(millis).single()
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cursor = value;
    for key in path {
        cursor = cursor.get(*key)?;
    }
    Some(cursor)
}

fn str_at(value: &Value, path: &[&str]) -> Option<String> {
    lookup(value, path)?.as_str().map(|s| s.to_string())
}

fn uint_at(value: &Value, path: &[&str]) -> Option<u64> {
    let cursor = lookup(value, path)?;
    cursor
        .as_u64()
        .or_else(|| cursor.as_i64().and_then(|n| (n >= 0).then_some(n as u64)))
        .or_else(|| {
            cursor
                .as_f64()
                .filter(|n| n.is_finite() && *n >= 0.0)
                .map(|n| n as u64)
        })
}

fn float_at(value: &Value, path: &[&str]) -> Option<f64> {
    let cursor = lookup(value, path)?;
    cursor
        .as_f64()
        .or_else(|| cursor.as_u64().map(|n| n as f64))
}

fn first_str(value: &Value, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|path| str_at(value, path))
}

fn first_uint(value: &Value, paths: &[&[&str]]) -> Option<u64> {
    paths.iter().find_map(|path| uint_at(value, path))
}

fn first_bool(value: &Value, paths: &[&[&str]]) -> Option<bool> {
    paths
        .iter()
        .find_map(|path| lookup(value, path).and_then(Value::as_bool))
}
