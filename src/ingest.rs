use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::model::Session;
use crate::session::parse_session_file;

/// Name markers the producing runtime uses for files it has locked or retired.
const EXCLUDED_MARKERS: [&str; 3] = [".deleted", ".lock", ".locked"];

pub const DEFAULT_EXTENSIONS: [&str; 1] = ["jsonl"];

pub fn discover_session_files(root: &Path, extensions: &[String]) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_session_file(path, extensions))
        .collect();
    files.sort();
    files
}

pub fn is_session_file(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    if !extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)) {
        return false;
    }
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    !EXCLUDED_MARKERS.iter().any(|marker| stem.contains(marker))
}

pub fn load_sessions(root: &Path, extensions: &[String]) -> Vec<Session> {
    let files = discover_session_files(root, extensions);
    debug!(root = %root.display(), files = files.len(), "discovered session files");

    let mut sessions = Vec::with_capacity(files.len());
    for path in files {
        match parse_session_file(&path) {
            Ok(Some(session)) => sessions.push(session),
            Ok(None) => debug!(path = %path.display(), "no decodable events; skipping"),
            Err(err) => warn!(path = %path.display(), error = %err, "failed to read session file"),
        }
    }
    sessions
}

pub fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect()
}
