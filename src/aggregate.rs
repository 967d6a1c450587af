use std::collections::HashMap;

use chrono::{DateTime, Days, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Session, TokenUsage};

pub const HOURS_PER_DAY: usize = 24;
const UNKNOWN_MODEL: &str = "unknown";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyStat {
    pub date: NaiveDate,
    pub sessions: usize,
    pub messages: usize,
    pub tokens: u64,
    pub cost: f64,
    pub tool_calls: usize,
    pub tool_errors: usize,
}

impl DailyStat {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            sessions: 0,
            messages: 0,
            tokens: 0,
            cost: 0.0,
            tool_calls: 0,
            tool_errors: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelUsage {
    pub model: String,
    pub sessions: usize,
    pub tokens: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowSummary {
    pub days: u32,
    pub sessions: usize,
    pub messages: usize,
    pub tokens: TokenUsage,
    pub cost: f64,
    pub tool_calls: usize,
    pub tool_errors: usize,
    // ties keep first-seen order
    pub tool_counts: Vec<ToolCount>,
    pub hourly: [usize; HOURS_PER_DAY],
    pub peak_hour: usize,
    pub avg_tokens_per_session: u64,
    pub avg_messages_per_session: u64,
    pub models: Vec<String>,
    pub by_model: Vec<ModelUsage>,
    pub total_duration_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Period {
    pub days: u32,
    pub from: Option<NaiveDate>,
    pub to: NaiveDate,
}

/// Day buckets are calendar days in the reference's time zone: a window of
/// `days` covers the reference's own day plus the `days - 1` before it, and
/// never anything later than the reference instant itself.
pub struct Aggregator<'a, Tz: TimeZone> {
    sessions: &'a [Session],
    reference: DateTime<Tz>,
    reference_utc: DateTime<Utc>,
}

impl<'a, Tz: TimeZone> Aggregator<'a, Tz> {
    pub fn new(sessions: &'a [Session], reference: DateTime<Tz>) -> Self {
        let reference_utc = reference.with_timezone(&Utc);
        Self {
            sessions,
            reference,
            reference_utc,
        }
    }

    pub fn sessions(&self) -> &'a [Session] {
        self.sessions
    }

    pub fn period(&self, days: u32) -> Period {
        Period {
            days,
            from: self.bucket_dates(days).first().copied(),
            to: self.reference.date_naive(),
        }
    }

    // Same buckets as daily_stats, so window totals equal the sum of the daily rows.
    pub fn filter_window(&self, days: u32) -> Vec<&'a Session> {
        let Some(first) = self.bucket_dates(days).first().copied() else {
            return Vec::new();
        };
        self.sessions
            .iter()
            .filter(|session| {
                self.bucket_of(session)
                    .is_some_and(|date| date >= first)
            })
            .collect()
    }

    pub fn daily_stats(&self, days: u32) -> Vec<DailyStat> {
        let dates = self.bucket_dates(days);
        let mut rows: Vec<DailyStat> = dates.iter().copied().map(DailyStat::empty).collect();
        let index: HashMap<NaiveDate, usize> =
            dates.iter().enumerate().map(|(idx, date)| (*date, idx)).collect();

        for session in self.sessions {
            let Some(&idx) = self.bucket_of(session).and_then(|date| index.get(&date)) else {
                continue;
            };
            let row = &mut rows[idx];
            row.sessions += 1;
            row.messages += session.messages.len();
            row.tokens = row.tokens.saturating_add(session.tokens.total);
            row.cost += session.cost;
            row.tool_calls += session.tool_calls.len();
            row.tool_errors += session.tool_errors();
        }
        rows
    }

    pub fn window_summary(&self, days: u32) -> WindowSummary {
        let window = self.filter_window(days);
        let tz = self.reference.timezone();

        let mut tokens = TokenUsage::default();
        let mut cost = 0.0;
        let mut messages = 0usize;
        let mut tool_calls = 0usize;
        let mut tool_errors = 0usize;
        let mut hourly = [0usize; HOURS_PER_DAY];
        let mut total_duration_ms = 0i64;
        let mut tool_counts: Vec<ToolCount> = Vec::new();
        let mut tool_index: HashMap<&str, usize> = HashMap::new();
        let mut models: Vec<String> = Vec::new();
        let mut by_model: Vec<ModelUsage> = Vec::new();
        let mut model_index: HashMap<&str, usize> = HashMap::new();

        for session in &window {
            tokens.merge(&session.tokens);
            cost += session.cost;
            messages += session.messages.len();
            tool_calls += session.tool_calls.len();
            tool_errors += session.tool_errors();
            total_duration_ms =
                total_duration_ms.saturating_add(session.duration_ms().unwrap_or(0).max(0));

            if let Some(start) = session.start_time {
                let hour = start.with_timezone(&tz).hour() as usize;
                hourly[hour % HOURS_PER_DAY] += 1;
            }

            for call in &session.tool_calls {
                match tool_index.get(call.name.as_str()) {
                    Some(&idx) => tool_counts[idx].count += 1,
                    None => {
                        tool_index.insert(call.name.as_str(), tool_counts.len());
                        tool_counts.push(ToolCount {
                            name: call.name.clone(),
                            count: 1,
                        });
                    }
                }
            }

            if let Some(model) = &session.model
                && !models.contains(model)
            {
                models.push(model.clone());
            }

            let model_key = session.model.as_deref().unwrap_or(UNKNOWN_MODEL);
            let idx = *model_index.entry(model_key).or_insert_with(|| {
                by_model.push(ModelUsage {
                    model: model_key.to_string(),
                    sessions: 0,
                    tokens: 0,
                    cost: 0.0,
                });
                by_model.len() - 1
            });
            let entry = &mut by_model[idx];
            entry.sessions += 1;
            entry.tokens = entry.tokens.saturating_add(session.tokens.total);
            entry.cost += session.cost;
        }

        tool_counts.sort_by(|a, b| b.count.cmp(&a.count));
        by_model.sort_by(|a, b| {
            b.cost
                .partial_cmp(&a.cost)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.model.cmp(&b.model))
        });

        let sessions = window.len();
        WindowSummary {
            days,
            sessions,
            messages,
            tokens,
            cost,
            tool_calls,
            tool_errors,
            tool_counts,
            hourly,
            peak_hour: peak_hour(&hourly),
            avg_tokens_per_session: rounded_average(tokens.total, sessions),
            avg_messages_per_session: rounded_average(messages as u64, sessions),
            models,
            by_model,
            total_duration_ms,
        }
    }

    fn bucket_dates(&self, days: u32) -> Vec<NaiveDate> {
        let today = self.reference.date_naive();
        (0..days)
            .rev()
            .filter_map(|offset| today.checked_sub_days(Days::new(u64::from(offset))))
            .collect()
    }

    fn bucket_of(&self, session: &Session) -> Option<NaiveDate> {
        let start = session.start_time?;
        if start > self.reference_utc {
            return None;
        }
        Some(start.with_timezone(&self.reference.timezone()).date_naive())
    }
}

pub fn peak_hour(hourly: &[usize; HOURS_PER_DAY]) -> usize {
    let mut peak = 0;
    for (hour, count) in hourly.iter().enumerate() {
        if *count > hourly[peak] {
            peak = hour;
        }
    }
    peak
}

fn rounded_average(total: u64, count: usize) -> u64 {
    if count == 0 {
        return 0;
    }
    (total as f64 / count as f64).round() as u64
}
