use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::info;

use crate::aggregate::{Aggregator, DailyStat, WindowSummary};
use crate::anomaly::{ANOMALY_WINDOW_DAYS, Anomaly, detect_anomalies};
use crate::config::{self, PulseConfig};
use crate::export::ExportReport;
use crate::ingest::load_sessions;
use crate::model::Session;
use crate::tail::RunningStats;
use crate::util::{format_cost, format_local_time, format_tokens, human_duration};
use crate::watch::LiveWatch;

const TOP_TOOLS: usize = 8;

pub fn report(config: &PulseConfig, days: Option<u32>) -> Result<()> {
    let days = days.unwrap_or(config.default_days).max(1);
    let root = config.sessions_root();
    let sessions = load_sessions(&root, &config.extensions);
    let aggregator = Aggregator::new(&sessions, Local::now());
    let summary = aggregator.window_summary(days);
    let daily = aggregator.daily_stats(days);
    let period = aggregator.period(days);

    println!("agent-pulse report");
    println!("sessions_dir: {}", root.display());
    println!(
        "period: {} .. {} ({days} days)",
        period
            .from
            .map(|date| date.to_string())
            .unwrap_or_else(|| "n/a".to_string()),
        period.to
    );
    print_summary(&summary);
    print_daily(&daily);
    Ok(())
}

pub fn anomalies(config: &PulseConfig) -> Result<()> {
    let root = config.sessions_root();
    let sessions = load_sessions(&root, &config.extensions);
    let aggregator = Aggregator::new(&sessions, Local::now());
    let findings = detect_anomalies(&aggregator);

    println!("agent-pulse anomalies (last {ANOMALY_WINDOW_DAYS} days)");
    println!("sessions_dir: {}", root.display());
    print_anomalies(&findings);
    Ok(())
}

pub fn export(config: &PulseConfig, days: Option<u32>, output: Option<&Path>) -> Result<()> {
    let days = days.unwrap_or(config.default_days).max(1);
    let sessions: Vec<Session> = load_sessions(&config.sessions_root(), &config.extensions);
    let aggregator = Aggregator::new(&sessions, Local::now());
    let json = ExportReport::build(&aggregator, days)
        .to_json_pretty()
        .context("failed to serialize export")?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create output directory {}", parent.display())
                })?;
            }
            fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), days, "export written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

pub fn watch(config: &PulseConfig) -> Result<()> {
    let stop = install_stop_signal()?;
    let root = config.sessions_root();
    let mut live = LiveWatch::start(&root, config.extensions.clone())
        .with_context(|| format!("failed to watch {}", root.display()))?;

    println!("watching: {}", live.root().display());
    println!("Press Ctrl+C to stop.");
    live.run_until(&stop, config.tick_interval(), print_running);
    live.stop();
    Ok(())
}

pub fn print_paths(config: &PulseConfig) {
    println!("config: {}", config::config_path().display());
    println!("sessions_dir: {}", config.sessions_root().display());
}

fn print_summary(summary: &WindowSummary) {
    println!("sessions: {}", summary.sessions);
    println!("messages: {}", summary.messages);
    println!(
        "tokens: {} (in {} / out {} / cache read {} / cache write {})",
        format_tokens(summary.tokens.total),
        format_tokens(summary.tokens.input),
        format_tokens(summary.tokens.output),
        format_tokens(summary.tokens.cache_read),
        format_tokens(summary.tokens.cache_write),
    );
    println!("cost: {}", format_cost(summary.cost));
    println!(
        "tool_calls: {} (errors {})",
        summary.tool_calls, summary.tool_errors
    );
    println!(
        "avg_per_session: {} tokens, {} messages",
        format_tokens(summary.avg_tokens_per_session),
        summary.avg_messages_per_session
    );
    println!("peak_hour: {:02}:00", summary.peak_hour);
    println!(
        "active_time: {}",
        human_duration(Duration::from_millis(
            u64::try_from(summary.total_duration_ms).unwrap_or(0)
        ))
    );

    if !summary.tool_counts.is_empty() {
        println!("top_tools:");
        for tool in summary.tool_counts.iter().take(TOP_TOOLS) {
            println!("  - {}: {}", tool.name, tool.count);
        }
    }
    if !summary.by_model.is_empty() {
        println!("models:");
        for usage in &summary.by_model {
            println!(
                "  - {}: {} sessions, {} tokens, {}",
                usage.model,
                usage.sessions,
                format_tokens(usage.tokens),
                format_cost(usage.cost)
            );
        }
    }
}

fn print_daily(daily: &[DailyStat]) {
    println!("daily:");
    for row in daily {
        println!(
            "  {}  sessions {:>3}  messages {:>5}  tokens {:>7}  cost {:>8}  tools {:>4}  errors {:>3}",
            row.date,
            row.sessions,
            row.messages,
            format_tokens(row.tokens),
            format_cost(row.cost),
            row.tool_calls,
            row.tool_errors
        );
    }
}

fn print_anomalies(findings: &[Anomaly]) {
    if findings.is_empty() {
        println!("no anomalies detected");
        return;
    }
    for finding in findings {
        let when = finding
            .date
            .map(|date| format!(" [{date}]"))
            .unwrap_or_default();
        println!(
            "{:<6}{when} {}",
            finding.severity.label().to_ascii_uppercase(),
            finding.message
        );
    }
}

fn print_running(stats: &RunningStats) {
    println!(
        "messages: {}  tool_calls: {}  tokens: {}  errors: {}  last_activity: {}",
        stats.messages,
        stats.tool_calls,
        format_tokens(stats.tokens),
        stats.errors,
        format_local_time(stats.last_activity)
    );
}

pub fn resolve_output(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|p| p.as_os_str() != "-")
}

fn install_stop_signal() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    })
    .context("failed to install Ctrl+C handler")?;
    Ok(stop)
}
