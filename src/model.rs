use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
    #[default]
    Other,
}

impl Role {
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "tool_result" | "toolResult" | "tool" => Self::ToolResult,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct UsageDelta {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub total: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn add_delta(&mut self, delta: &UsageDelta) {
        self.input = self.input.saturating_add(delta.input);
        self.output = self.output.saturating_add(delta.output);
        self.cache_read = self.cache_read.saturating_add(delta.cache_read);
        self.cache_write = self.cache_write.saturating_add(delta.cache_write);
        self.total = self.total.saturating_add(delta.total);
    }

    pub fn merge(&mut self, other: &TokenUsage) {
        self.input = self.input.saturating_add(other.input);
        self.output = self.output.saturating_add(other.output);
        self.cache_read = self.cache_read.saturating_add(other.cache_read);
        self.cache_write = self.cache_write.saturating_add(other.cache_write);
        self.total = self.total.saturating_add(other.total);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub timestamp: Option<DateTime<Utc>>,
    pub has_tool_calls: bool,
    pub usage: Option<UsageDelta>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolResult {
    pub is_error: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub result: Option<ToolResult>,
}

impl ToolCall {
    pub fn is_error(&self) -> bool {
        self.result.is_some_and(|result| result.is_error)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        let started = self.timestamp?;
        let finished = self.result?.timestamp?;
        let elapsed = finished.signed_duration_since(started).num_milliseconds();
        (elapsed >= 0).then_some(elapsed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub source_file: PathBuf,
    pub messages: Vec<Message>,
    pub tool_calls: Vec<ToolCall>,
    pub tokens: TokenUsage,
    pub cost: f64,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Session {
    pub fn duration_ms(&self) -> Option<i64> {
        let start = self.start_time?;
        let end = self.end_time?;
        Some(end.signed_duration_since(start).num_milliseconds())
    }

    pub fn tool_errors(&self) -> usize {
        self.tool_calls.iter().filter(|call| call.is_error()).count()
    }
}
