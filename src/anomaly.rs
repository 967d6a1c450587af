use chrono::{NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregator, DailyStat, WindowSummary};
use crate::util::{format_cost, format_tokens};

pub const ANOMALY_WINDOW_DAYS: u32 = 7;

const SPIKE_MULTIPLIER: f64 = 3.0;
const TOKEN_SPIKE_FLOOR: u64 = 10_000;
const COST_SPIKE_FLOOR: f64 = 0.5;
const ERROR_RATE_THRESHOLD: f64 = 0.1;
const ERROR_COUNT_FLOOR: usize = 5;
const NIGHT_HOURS_END: usize = 5;
const NIGHT_SHARE_THRESHOLD: f64 = 0.3;
const NIGHT_SESSION_FLOOR: usize = 5;
const GAP_MIN_DAYS: usize = 2;
const TOOL_DOMINANCE_SHARE: f64 = 0.5;
const TOOL_DOMINANCE_FLOOR: usize = 50;
const CALLS_PER_SESSION_THRESHOLD: f64 = 100.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    TokenSpike,
    CostSpike,
    HighErrorRate,
    UnusualHours,
    ActivityGap,
    ToolDominance,
    HighCallFrequency,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub message: String,
    pub value: f64,
    pub threshold: Option<f64>,
    pub date: Option<NaiveDate>,
    pub tool: Option<String>,
}

pub fn detect_anomalies<Tz: TimeZone>(aggregator: &Aggregator<'_, Tz>) -> Vec<Anomaly> {
    let summary = aggregator.window_summary(ANOMALY_WINDOW_DAYS);
    let daily = aggregator.daily_stats(ANOMALY_WINDOW_DAYS);
    detect(&summary, &daily)
}

pub fn detect(summary: &WindowSummary, daily: &[DailyStat]) -> Vec<Anomaly> {
    let mut findings = Vec::new();
    findings.extend(token_spikes(summary, daily));
    findings.extend(cost_spikes(summary, daily));
    findings.extend(high_error_rate(summary));
    findings.extend(unusual_hours(summary));
    findings.extend(activity_gaps(daily));
    findings.extend(tool_dominance(summary));
    findings.extend(high_call_frequency(summary));
    findings
}

fn token_spikes(summary: &WindowSummary, daily: &[DailyStat]) -> Vec<Anomaly> {
    let average = summary.tokens.total as f64 / f64::from(ANOMALY_WINDOW_DAYS);
    let threshold = average * SPIKE_MULTIPLIER;
    daily
        .iter()
        .filter(|day| day.tokens as f64 > threshold && day.tokens > TOKEN_SPIKE_FLOOR)
        .map(|day| Anomaly {
            kind: AnomalyKind::TokenSpike,
            severity: Severity::Medium,
            message: format!(
                "Token usage spike on {}: {} tokens vs {} daily average",
                day.date,
                format_tokens(day.tokens),
                format_tokens(average.round() as u64)
            ),
            value: day.tokens as f64,
            threshold: Some(threshold),
            date: Some(day.date),
            tool: None,
        })
        .collect()
}

fn cost_spikes(summary: &WindowSummary, daily: &[DailyStat]) -> Vec<Anomaly> {
    let average = summary.cost / f64::from(ANOMALY_WINDOW_DAYS);
    let threshold = average * SPIKE_MULTIPLIER;
    daily
        .iter()
        .filter(|day| day.cost > threshold && day.cost > COST_SPIKE_FLOOR)
        .map(|day| Anomaly {
            kind: AnomalyKind::CostSpike,
            severity: Severity::High,
            message: format!(
                "Cost spike on {}: {} vs {} daily average",
                day.date,
                format_cost(day.cost),
                format_cost(average)
            ),
            value: day.cost,
            threshold: Some(threshold),
            date: Some(day.date),
            tool: None,
        })
        .collect()
}

fn high_error_rate(summary: &WindowSummary) -> Option<Anomaly> {
    if summary.tool_calls == 0 {
        return None;
    }
    let rate = summary.tool_errors as f64 / summary.tool_calls as f64;
    if rate <= ERROR_RATE_THRESHOLD || summary.tool_errors <= ERROR_COUNT_FLOOR {
        return None;
    }
    Some(Anomaly {
        kind: AnomalyKind::HighErrorRate,
        severity: Severity::High,
        message: format!(
            "High tool error rate: {:.1}% ({} of {} calls failed)",
            rate * 100.0,
            summary.tool_errors,
            summary.tool_calls
        ),
        value: rate,
        threshold: Some(ERROR_RATE_THRESHOLD),
        date: None,
        tool: None,
    })
}

fn unusual_hours(summary: &WindowSummary) -> Option<Anomaly> {
    let total: usize = summary.hourly.iter().sum();
    if total == 0 {
        return None;
    }
    let night: usize = summary.hourly[..=NIGHT_HOURS_END].iter().sum();
    let share = night as f64 / total as f64;
    if share <= NIGHT_SHARE_THRESHOLD || night <= NIGHT_SESSION_FLOOR {
        return None;
    }
    Some(Anomaly {
        kind: AnomalyKind::UnusualHours,
        severity: Severity::Low,
        message: format!(
            "{:.0}% of sessions ({night} of {total}) started between 00:00 and 05:59",
            share * 100.0
        ),
        value: share,
        threshold: Some(NIGHT_SHARE_THRESHOLD),
        date: None,
        tool: None,
    })
}

/// One finding for every day on which a run of idle days is at least
/// `GAP_MIN_DAYS` long, so a growing run keeps reporting.
fn activity_gaps(daily: &[DailyStat]) -> Vec<Anomaly> {
    let mut findings = Vec::new();
    let mut run = 0usize;
    for day in daily {
        if day.sessions != 0 {
            run = 0;
            continue;
        }
        run += 1;
        if run >= GAP_MIN_DAYS {
            findings.push(Anomaly {
                kind: AnomalyKind::ActivityGap,
                severity: Severity::Low,
                message: format!("No sessions for {run} consecutive days through {}", day.date),
                value: run as f64,
                threshold: Some(GAP_MIN_DAYS as f64),
                date: Some(day.date),
                tool: None,
            });
        }
    }
    findings
}

fn tool_dominance(summary: &WindowSummary) -> Vec<Anomaly> {
    if summary.tool_calls == 0 {
        return Vec::new();
    }
    summary
        .tool_counts
        .iter()
        .filter_map(|tool| {
            let share = tool.count as f64 / summary.tool_calls as f64;
            (share > TOOL_DOMINANCE_SHARE && tool.count > TOOL_DOMINANCE_FLOOR).then(|| Anomaly {
                kind: AnomalyKind::ToolDominance,
                severity: Severity::Low,
                message: format!(
                    "Tool '{}' accounts for {:.0}% of calls ({} of {})",
                    tool.name,
                    share * 100.0,
                    tool.count,
                    summary.tool_calls
                ),
                value: share,
                threshold: Some(TOOL_DOMINANCE_SHARE),
                date: None,
                tool: Some(tool.name.clone()),
            })
        })
        .collect()
}

fn high_call_frequency(summary: &WindowSummary) -> Option<Anomaly> {
    if summary.sessions == 0 {
        return None;
    }
    let per_session = summary.tool_calls as f64 / summary.sessions as f64;
    if per_session <= CALLS_PER_SESSION_THRESHOLD {
        return None;
    }
    Some(Anomaly {
        kind: AnomalyKind::HighCallFrequency,
        severity: Severity::Medium,
        message: format!("Averaging {per_session:.0} tool calls per session"),
        value: per_session,
        threshold: Some(CALLS_PER_SESSION_THRESHOLD),
        date: None,
        tool: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{HOURS_PER_DAY, ToolCount};
    use crate::model::TokenUsage;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).expect("date")
    }

    fn empty_summary() -> WindowSummary {
        WindowSummary {
            days: ANOMALY_WINDOW_DAYS,
            sessions: 0,
            messages: 0,
            tokens: TokenUsage::default(),
            cost: 0.0,
            tool_calls: 0,
            tool_errors: 0,
            tool_counts: Vec::new(),
            hourly: [0; HOURS_PER_DAY],
            peak_hour: 0,
            avg_tokens_per_session: 0,
            avg_messages_per_session: 0,
            models: Vec::new(),
            by_model: Vec::new(),
            total_duration_ms: 0,
        }
    }

    fn days(sessions: &[usize]) -> Vec<DailyStat> {
        sessions
            .iter()
            .enumerate()
            .map(|(idx, count)| DailyStat {
                date: date(1 + idx as u32),
                sessions: *count,
                messages: 0,
                tokens: 0,
                cost: 0.0,
                tool_calls: 0,
                tool_errors: 0,
            })
            .collect()
    }

    fn kinds(findings: &[Anomaly]) -> Vec<AnomalyKind> {
        findings.iter().map(|f| f.kind).collect()
    }

    #[test]
    fn quiet_week_produces_nothing() {
        let summary = empty_summary();
        assert!(detect(&summary, &days(&[1, 1, 1, 1, 1, 1, 1])).is_empty());
    }

    #[test]
    fn cost_spike_fires_above_three_times_average() {
        let mut summary = empty_summary();
        summary.cost = 21.0;
        let mut daily = days(&[1, 1, 1, 1, 1, 1, 1]);
        daily[6].cost = 10.0;
        daily[5].cost = 9.0;

        let findings = detect(&summary, &daily);
        assert_eq!(kinds(&findings), vec![AnomalyKind::CostSpike]);
        let spike = &findings[0];
        assert_eq!(spike.severity, Severity::High);
        assert!((spike.value - 10.0).abs() < 1e-9);
        assert!((spike.threshold.expect("threshold") - 9.0).abs() < 1e-9);
        assert_eq!(spike.date, Some(date(7)));
    }

    #[test]
    fn token_spike_needs_absolute_floor() {
        let mut summary = empty_summary();
        summary.tokens.total = 7_000;
        let mut daily = days(&[1, 1, 1, 1, 1, 1, 1]);
        daily[2].tokens = 6_000;
        assert!(detect(&summary, &daily).is_empty());

        summary.tokens.total = 21_000;
        daily[2].tokens = 15_000;
        let findings = detect(&summary, &daily);
        assert_eq!(kinds(&findings), vec![AnomalyKind::TokenSpike]);
        assert_eq!(findings[0].severity, Severity::Medium);
        assert_eq!(findings[0].date, Some(date(3)));
    }

    #[test]
    fn error_rate_requires_ratio_and_count() {
        let mut summary = empty_summary();
        summary.sessions = 1;
        summary.tool_calls = 100;
        summary.tool_errors = 12;
        let findings = detect(&summary, &days(&[1; 7]));
        assert_eq!(kinds(&findings), vec![AnomalyKind::HighErrorRate]);
        assert_eq!(findings[0].severity, Severity::High);
        assert!((findings[0].value - 0.12).abs() < 1e-9);

        summary.tool_calls = 20;
        summary.tool_errors = 4;
        assert!(detect(&summary, &days(&[1; 7])).is_empty());
    }

    #[test]
    fn night_sessions_flagged_as_unusual_hours() {
        let mut summary = empty_summary();
        summary.hourly[2] = 4;
        summary.hourly[5] = 2;
        summary.hourly[14] = 6;
        let findings = detect(&summary, &days(&[1; 7]));
        assert_eq!(kinds(&findings), vec![AnomalyKind::UnusualHours]);
        assert!((findings[0].value - 0.5).abs() < 1e-9);

        summary.hourly[5] = 1;
        assert!(detect(&summary, &days(&[1; 7])).is_empty());
    }

    #[test]
    fn activity_gap_fires_per_day_once_run_reaches_two() {
        let findings = activity_gaps(&days(&[0, 0, 0, 5, 0, 0, 2]));
        let dates: Vec<NaiveDate> = findings.iter().filter_map(|f| f.date).collect();
        assert_eq!(dates, vec![date(2), date(3), date(6)]);
        let runs: Vec<f64> = findings.iter().map(|f| f.value).collect();
        assert_eq!(runs, vec![2.0, 3.0, 2.0]);

        assert!(activity_gaps(&days(&[0, 1, 0, 1, 0, 1, 0])).is_empty());
    }

    #[test]
    fn dominant_tool_is_named() {
        let mut summary = empty_summary();
        summary.sessions = 2;
        summary.tool_calls = 90;
        summary.tool_counts = vec![
            ToolCount {
                name: "bash".to_string(),
                count: 60,
            },
            ToolCount {
                name: "read".to_string(),
                count: 30,
            },
        ];
        let findings = detect(&summary, &days(&[1; 7]));
        assert_eq!(kinds(&findings), vec![AnomalyKind::ToolDominance]);
        assert_eq!(findings[0].tool.as_deref(), Some("bash"));
    }

    #[test]
    fn call_frequency_and_ordering() {
        let mut summary = empty_summary();
        summary.sessions = 1;
        summary.tool_calls = 150;
        summary.tool_errors = 30;
        summary.tool_counts = vec![ToolCount {
            name: "bash".to_string(),
            count: 150,
        }];
        let findings = detect(&summary, &days(&[0, 0, 1, 1, 1, 1, 1]));
        assert_eq!(
            kinds(&findings),
            vec![
                AnomalyKind::HighErrorRate,
                AnomalyKind::ActivityGap,
                AnomalyKind::ToolDominance,
                AnomalyKind::HighCallFrequency,
            ]
        );
        assert_eq!(findings[3].severity, Severity::Medium);
    }

    #[test]
    fn finding_serializes_kind_as_type() {
        let findings = detect(&empty_summary(), &days(&[0, 0, 1, 1, 1, 1, 1]));
        let value = serde_json::to_value(&findings[0]).expect("serialize");
        assert_eq!(value["type"], "activity_gap");
        assert!(value.get("kind").is_none());
        assert_eq!(value["severity"], "low");
    }
}
