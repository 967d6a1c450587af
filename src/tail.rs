use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PulseError, Result};
use crate::ingest::{discover_session_files, is_session_file};
use crate::model::Role;
use crate::parser::{Event, EventKind, parse_line};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunningStats {
    pub messages: u64,
    pub tool_calls: u64,
    pub tokens: u64,
    pub errors: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl RunningStats {
    pub fn fold(&mut self, event: &Event, observed_at: DateTime<Utc>) {
        let seen = event.timestamp.unwrap_or(observed_at);
        self.last_activity = Some(self.last_activity.map_or(seen, |cur| cur.max(seen)));

        let EventKind::Message(message) = &event.kind else {
            return;
        };
        self.messages += 1;
        if message.role == Role::Assistant {
            self.tool_calls += message.tool_invocations.len() as u64;
            if let Some(usage) = &message.usage {
                self.tokens = self.tokens.saturating_add(usage.total);
            }
        }
        if message.tool_result.as_ref().is_some_and(|result| result.is_error) {
            self.errors += 1;
        }
    }
}

#[derive(Debug)]
pub struct TailFollower {
    extensions: Vec<String>,
    offsets: HashMap<PathBuf, u64>,
    stats: RunningStats,
}

impl TailFollower {
    pub fn new(extensions: Vec<String>) -> Self {
        Self {
            extensions,
            offsets: HashMap::new(),
            stats: RunningStats::default(),
        }
    }

    /// Track every existing file at its current size, so history is not
    /// replayed into the live counters.
    pub fn scan_existing(&mut self, root: &Path) -> usize {
        let mut tracked = 0;
        for path in discover_session_files(root, &self.extensions) {
            match std::fs::metadata(&path) {
                Ok(meta) => {
                    self.offsets.insert(path, meta.len());
                    tracked += 1;
                }
                Err(err) => warn!(path = %path.display(), error = %err, "cannot stat session file"),
            }
        }
        info!(root = %root.display(), files = tracked, "initial scan complete");
        tracked
    }

    pub fn accepts(&self, path: &Path) -> bool {
        is_session_file(path, &self.extensions)
    }

    pub fn track_created(&mut self, path: &Path) {
        self.offsets.entry(path.to_path_buf()).or_insert(0);
    }

    pub fn forget(&mut self, path: &Path) {
        self.offsets.remove(path);
    }

    pub fn offset(&self, path: &Path) -> Option<u64> {
        self.offsets.get(path).copied()
    }

    pub fn tracked_files(&self) -> usize {
        self.offsets.len()
    }

    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }

    /// Fold the complete lines appended since the stored offset and advance
    /// past them. Returns the number of lines that decoded into events. On
    /// error the offset is left where it was.
    pub fn process(&mut self, path: &Path) -> Result<usize> {
        let size = std::fs::metadata(path)
            .map_err(|err| PulseError::io(path, err))?
            .len();
        let mut offset = self.offsets.get(path).copied().unwrap_or(0);
        if size < offset {
            warn!(path = %path.display(), offset, size, "session file shrank; restarting from 0");
            offset = 0;
            self.offsets.insert(path.to_path_buf(), 0);
        }
        if size == offset {
            self.offsets.entry(path.to_path_buf()).or_insert(offset);
            return Ok(0);
        }

        let appended = read_range(path, offset, size)?;
        let Some(last_newline) = appended.iter().rposition(|byte| *byte == b'\n') else {
            return Ok(0);
        };
        let complete = &appended[..=last_newline];

        let observed_at = Utc::now();
        let mut folded = 0;
        for raw in complete.split(|byte| *byte == b'\n') {
            let line = String::from_utf8_lossy(raw);
            if let Some(event) = parse_line(&line) {
                self.stats.fold(&event, observed_at);
                folded += 1;
            }
        }

        let next = offset + complete.len() as u64;
        self.offsets.insert(path.to_path_buf(), next);
        debug!(path = %path.display(), from = offset, to = next, lines = folded, "folded appended lines");
        Ok(folded)
    }
}

fn read_range(path: &Path, start: u64, end: u64) -> Result<Vec<u8>> {
    let mut file = File::open(path).map_err(|err| PulseError::io(path, err))?;
    file.seek(SeekFrom::Start(start))
        .map_err(|err| PulseError::io(path, err))?;
    let mut buf = Vec::with_capacity(end.saturating_sub(start) as usize);
    file.take(end - start)
        .read_to_end(&mut buf)
        .map_err(|err| PulseError::io(path, err))?;
    Ok(buf)
}
