use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregator, DailyStat, Period, WindowSummary};
use crate::anomaly::{Anomaly, detect_anomalies};
use crate::model::Session;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportReport {
    pub generated_at: DateTime<Utc>,
    pub period: Period,
    pub sessions: Vec<Session>,
    pub daily: Vec<DailyStat>,
    pub summary: WindowSummary,
    pub anomalies: Vec<Anomaly>,
}

impl ExportReport {
    // anomalies always cover the detector's own window
    pub fn build<Tz: TimeZone>(aggregator: &Aggregator<'_, Tz>, days: u32) -> Self {
        Self {
            generated_at: Utc::now(),
            period: aggregator.period(days),
            sessions: aggregator
                .filter_window(days)
                .into_iter()
                .cloned()
                .collect(),
            daily: aggregator.daily_stats(days),
            summary: aggregator.window_summary(days),
            anomalies: detect_anomalies(aggregator),
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, Role, TokenUsage};
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn session_at(id: &str, rfc3339: &str, tokens: u64) -> Session {
        let start = DateTime::parse_from_rfc3339(rfc3339)
            .expect("timestamp")
            .with_timezone(&Utc);
        Session {
            id: id.to_string(),
            source_file: PathBuf::from(format!("/sessions/{id}.jsonl")),
            messages: vec![Message {
                role: Role::User,
                timestamp: Some(start),
                has_tool_calls: false,
                usage: None,
            }],
            tool_calls: Vec::new(),
            tokens: TokenUsage {
                total: tokens,
                ..TokenUsage::default()
            },
            cost: 0.25,
            model: Some("sonnet".to_string()),
            provider: None,
            start_time: Some(start),
            end_time: Some(start),
        }
    }

    #[test]
    fn report_combines_window_views() {
        let sessions = vec![
            session_at("old", "2026-02-01T09:00:00Z", 500),
            session_at("recent", "2026-03-09T09:00:00Z", 1_200),
            session_at("today", "2026-03-10T08:00:00Z", 800),
        ];
        let reference = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let aggregator = Aggregator::new(&sessions, reference);

        let report = ExportReport::build(&aggregator, 3);
        assert_eq!(report.period.days, 3);
        assert_eq!(report.period.from, NaiveDate::from_ymd_opt(2026, 3, 8));
        assert_eq!(report.period.to, NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
        let ids: Vec<&str> = report.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["recent", "today"]);
        assert_eq!(report.daily.len(), 3);
        assert_eq!(report.summary.sessions, 2);
        assert_eq!(report.summary.tokens.total, 2_000);
    }

    #[test]
    fn serializes_to_json_object() {
        let sessions: Vec<Session> = Vec::new();
        let reference = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let aggregator = Aggregator::new(&sessions, reference);

        let json = ExportReport::build(&aggregator, 7)
            .to_json_pretty()
            .expect("serialize");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse back");
        assert_eq!(value["period"]["days"], 7);
        assert_eq!(value["daily"].as_array().map(Vec::len), Some(7));
        assert!(value["anomalies"].as_array().is_some_and(Vec::is_empty));
    }
}
