pub mod aggregate;
pub mod anomaly;
pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod ingest;
pub mod model;
pub mod parser;
pub mod session;
pub mod tail;
pub mod util;
pub mod watch;

pub use aggregate::{Aggregator, DailyStat, ModelUsage, Period, ToolCount, WindowSummary};
pub use anomaly::{Anomaly, AnomalyKind, Severity, detect, detect_anomalies};
pub use error::{PulseError, Result};
pub use export::ExportReport;
pub use ingest::{discover_session_files, load_sessions};
pub use model::{Message, Role, Session, TokenUsage, ToolCall, ToolResult, UsageDelta};
pub use parser::{Event, EventKind, parse_line};
pub use session::{SessionBuilder, parse_session_file};
pub use tail::{RunningStats, TailFollower};
pub use watch::LiveWatch;
