use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PulseError;
use crate::ingest::default_extensions;

const DEFAULT_DAYS: u32 = 7;
const DEFAULT_TICK_SECONDS: u64 = 2;
const CONFIG_DIR_NAME: &str = "agent-pulse";
const CONFIG_FILE_NAME: &str = "config.json";

pub const ENV_SESSIONS_DIR: &str = "AGENT_PULSE_SESSIONS_DIR";
pub const ENV_TICK_SECONDS: &str = "AGENT_PULSE_TICK_SECONDS";
pub const ENV_DAYS: &str = "AGENT_PULSE_DAYS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PulseConfig {
    pub sessions_dir: Option<PathBuf>,
    pub default_days: u32,
    pub tick_seconds: u64,
    pub extensions: Vec<String>,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            sessions_dir: None,
            default_days: DEFAULT_DAYS,
            tick_seconds: DEFAULT_TICK_SECONDS,
            extensions: default_extensions(),
        }
    }
}

impl PulseConfig {
    pub fn load() -> Result<Self> {
        let path = config_path();
        let mut config = Self::load_from(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?;
        config.apply_overrides(|name| env::var(name).ok());
        config.normalize();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|err| PulseError::io(path, err))?;
        let mut parsed: PulseConfig =
            serde_json::from_str(&raw).map_err(|err| PulseError::Config {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        parsed.normalize();
        Ok(parsed)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(dir) = read(ENV_SESSIONS_DIR) {
            self.sessions_dir = Some(PathBuf::from(dir));
        }
        if let Some(tick) = read(ENV_TICK_SECONDS)
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
        {
            self.tick_seconds = tick;
        }
        if let Some(days) = read(ENV_DAYS)
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0)
        {
            self.default_days = days;
        }
    }

    pub fn normalize(&mut self) {
        let mut extensions: Vec<String> = Vec::with_capacity(self.extensions.len());
        for ext in &self.extensions {
            let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
            if !ext.is_empty() && !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }
        if extensions.is_empty() {
            extensions = default_extensions();
        }
        self.extensions = extensions;
        self.default_days = self.default_days.max(1);
        self.tick_seconds = self.tick_seconds.max(1);
        if self
            .sessions_dir
            .as_ref()
            .is_some_and(|dir| dir.as_os_str().is_empty())
        {
            self.sessions_dir = None;
        }
    }

    pub fn sessions_root(&self) -> PathBuf {
        self.sessions_dir.clone().unwrap_or_else(default_sessions_dir)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_seconds.max(1))
    }
}

pub fn default_sessions_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pi")
        .join("agent")
        .join("sessions")
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().expect("temp dir");
        let cfg = PulseConfig::load_from(&tmp.path().join("config.json")).expect("load");
        assert_eq!(cfg, PulseConfig::default());
        assert_eq!(cfg.tick_interval(), Duration::from_secs(2));
    }

    #[test]
    fn partial_file_is_filled_and_normalized() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("config.json");
        fs::write(
            &path,
            r#"{"default_days":0,"extensions":[" .JSONL ","","log","jsonl"],"sessions_dir":"/data/runs"}"#,
        )
        .expect("write");

        let cfg = PulseConfig::load_from(&path).expect("load");
        assert_eq!(cfg.default_days, 1);
        assert_eq!(cfg.tick_seconds, 2);
        assert_eq!(cfg.extensions, vec!["jsonl".to_string(), "log".to_string()]);
        assert_eq!(cfg.sessions_root(), PathBuf::from("/data/runs"));
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("config.json");
        fs::write(&path, "{ not json").expect("write");

        let err = PulseConfig::load_from(&path).expect_err("should fail");
        assert!(matches!(err, PulseError::Config { .. }));
    }

    #[test]
    fn overrides_ignore_zero_and_garbage() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_SESSIONS_DIR, " /tmp/sessions "),
            (ENV_TICK_SECONDS, "0"),
            (ENV_DAYS, "30"),
        ]);
        let mut cfg = PulseConfig::default();
        cfg.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(cfg.sessions_dir, Some(PathBuf::from("/tmp/sessions")));
        assert_eq!(cfg.tick_seconds, 2);
        assert_eq!(cfg.default_days, 30);

        cfg.apply_overrides(|name| (name == ENV_TICK_SECONDS).then(|| "soon".to_string()));
        assert_eq!(cfg.tick_seconds, 2);
    }

    #[test]
    fn default_sessions_dir_lives_under_home() {
        let cfg = PulseConfig::default();
        assert!(cfg.sessions_root().ends_with(".pi/agent/sessions"));
    }
}
