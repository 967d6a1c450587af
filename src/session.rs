use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{PulseError, Result};
use crate::model::{Message, Role, Session, TokenUsage, ToolCall, ToolResult};
use crate::parser::{Event, EventKind, parse_line};

#[derive(Debug, Default)]
pub struct SessionBuilder {
    fallback_id: String,
    source_file: PathBuf,
    events_seen: usize,
    meta_id: Option<String>,
    messages: Vec<Message>,
    tool_calls: Vec<ToolCall>,
    call_index: HashMap<String, usize>,
    tokens: TokenUsage,
    cost: f64,
    model: Option<String>,
    provider: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl SessionBuilder {
    pub fn new(source_file: &Path) -> Self {
        let fallback_id = source_file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown-session")
            .to_string();
        Self {
            fallback_id,
            source_file: source_file.to_path_buf(),
            ..Self::default()
        }
    }

    pub fn apply(&mut self, event: &Event) {
        self.events_seen += 1;
        if let Some(ts) = event.timestamp {
            self.observe_timestamp(ts);
        }

        match &event.kind {
            EventKind::SessionMeta { id } => self.meta_id = Some(id.clone()),
            EventKind::ModelChange { model, provider } => {
                self.model = Some(model.clone());
                if provider.is_some() {
                    self.provider = provider.clone();
                }
            }
            EventKind::Message(message) => {
                if message.role == Role::Assistant
                    && let Some(usage) = &message.usage
                {
                    self.tokens.add_delta(usage);
                    self.cost += usage.cost;
                }

                if message.role == Role::Assistant {
                    for invocation in &message.tool_invocations {
                        if self.call_index.contains_key(&invocation.id) {
                            continue;
                        }
                        self.call_index
                            .insert(invocation.id.clone(), self.tool_calls.len());
                        self.tool_calls.push(ToolCall {
                            id: invocation.id.clone(),
                            name: invocation.name.clone(),
                            timestamp: message.timestamp,
                            result: None,
                        });
                    }
                }

                if let Some(result) = &message.tool_result
                    && let Some(&idx) = self.call_index.get(&result.call_id)
                {
                    self.tool_calls[idx].result = Some(ToolResult {
                        is_error: result.is_error,
                        timestamp: message.timestamp,
                    });
                }

                self.messages.push(Message {
                    role: message.role,
                    timestamp: message.timestamp,
                    has_tool_calls: !message.tool_invocations.is_empty(),
                    usage: message.usage,
                });
            }
            EventKind::Unrecognized => {}
        }
    }

    pub fn finish(self) -> Option<Session> {
        if self.events_seen == 0 {
            return None;
        }
        Some(Session {
            id: self.meta_id.unwrap_or(self.fallback_id),
            source_file: self.source_file,
            messages: self.messages,
            tool_calls: self.tool_calls,
            tokens: self.tokens,
            cost: self.cost,
            model: self.model,
            provider: self.provider,
            start_time: self.start_time,
            end_time: self.end_time,
        })
    }

    fn observe_timestamp(&mut self, ts: DateTime<Utc>) {
        self.start_time = Some(self.start_time.map_or(ts, |cur| cur.min(ts)));
        self.end_time = Some(self.end_time.map_or(ts, |cur| cur.max(ts)));
    }
}

pub fn parse_session_file(path: &Path) -> Result<Option<Session>> {
    let file = File::open(path).map_err(|err| PulseError::io(path, err))?;
    let mut reader = BufReader::new(file);
    let mut builder = SessionBuilder::new(path);

    let mut buf = Vec::new();
    loop {
        buf.clear();
        let bytes = reader
            .read_until(b'\n', &mut buf)
            .map_err(|err| PulseError::io(path, err))?;
        if bytes == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        if let Some(event) = parse_line(&line) {
            builder.apply(&event);
        }
    }

    Ok(builder.finish())
}
