use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::error::{PulseError, Result};
use crate::tail::{RunningStats, TailFollower};

const STOP_POLL: Duration = Duration::from_millis(100);

/// One worker thread owns the [`TailFollower`], so reads of a single file never
/// interleave. Readers only ever see fully folded snapshots.
pub struct LiveWatch {
    root: PathBuf,
    snapshot: Arc<Mutex<RunningStats>>,
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
}

impl LiveWatch {
    pub fn start(root: &Path, extensions: Vec<String>) -> Result<Self> {
        if !root.is_dir() {
            return Err(PulseError::io(
                root,
                io::Error::new(io::ErrorKind::NotFound, "sessions directory does not exist"),
            ));
        }

        let mut follower = TailFollower::new(extensions);
        follower.scan_existing(root);
        let snapshot = Arc::new(Mutex::new(follower.stats().clone()));

        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        let shared = Arc::clone(&snapshot);
        let worker = thread::Builder::new()
            .name("agent-pulse-tail".to_string())
            .spawn(move || drain(rx, follower, shared))
            .map_err(|err| PulseError::io(root, err))?;

        info!(root = %root.display(), "watching for session activity");
        Ok(Self {
            root: root.to_path_buf(),
            snapshot,
            watcher: Some(watcher),
            worker: Some(worker),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot(&self) -> RunningStats {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn run_until<F>(&self, stop: &AtomicBool, interval: Duration, mut emit: F)
    where
        F: FnMut(&RunningStats),
    {
        while !stop.load(Ordering::Relaxed) {
            emit(&self.snapshot());
            let deadline = Instant::now() + interval;
            while !stop.load(Ordering::Relaxed) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::sleep(STOP_POLL.min(deadline - now));
            }
        }
    }

    pub fn stop(&mut self) {
        // Dropping the watcher drops the sender, which ends the worker loop.
        self.watcher.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("tail worker panicked");
        }
    }
}

impl Drop for LiveWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

fn drain(
    rx: Receiver<notify::Result<Event>>,
    mut follower: TailFollower,
    shared: Arc<Mutex<RunningStats>>,
) {
    while let Ok(res) = rx.recv() {
        let mut changed = match res {
            Ok(event) => apply_event(&mut follower, &event),
            Err(err) => {
                warn!(error = %err, "watch notification error");
                false
            }
        };
        // Coalesce whatever queued up while this batch was being read.
        while let Ok(res) = rx.try_recv() {
            if let Ok(event) = res {
                changed |= apply_event(&mut follower, &event);
            }
        }
        if changed {
            *shared.lock().unwrap_or_else(PoisonError::into_inner) = follower.stats().clone();
        }
    }
    debug!(files = follower.tracked_files(), "tail worker stopped");
}

// true when counters moved
pub fn apply_event(follower: &mut TailFollower, event: &Event) -> bool {
    let mut changed = false;
    for path in &event.paths {
        if !follower.accepts(path) {
            continue;
        }
        match event.kind {
            EventKind::Create(_) => {
                follower.track_created(path);
                changed |= fold_growth(follower, path);
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                if path.exists() {
                    follower.track_created(path);
                    changed |= fold_growth(follower, path);
                } else {
                    follower.forget(path);
                }
            }
            EventKind::Modify(_) => changed |= fold_growth(follower, path),
            EventKind::Remove(_) => follower.forget(path),
            _ => {}
        }
    }
    changed
}

fn fold_growth(follower: &mut TailFollower, path: &Path) -> bool {
    match follower.process(path) {
        Ok(folded) => folded > 0,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read appended lines");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::default_extensions;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use tempfile::TempDir;

    const USER: &str = r#"{"type":"message","timestamp":"2026-03-01T10:00:00Z","message":{"role":"user"}}"#;

    fn event(kind: EventKind, path: &Path) -> Event {
        Event::new(kind).add_path(path.to_path_buf())
    }

    #[test]
    fn created_file_is_read_from_start() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("fresh.jsonl");
        std::fs::write(&path, format!("{USER}\n{USER}\n")).expect("write");

        let mut follower = TailFollower::new(default_extensions());
        assert!(apply_event(
            &mut follower,
            &event(EventKind::Create(CreateKind::File), &path)
        ));
        assert_eq!(follower.stats().messages, 2);
    }

    #[test]
    fn modify_on_untracked_extension_is_ignored() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, format!("{USER}\n")).expect("write");

        let mut follower = TailFollower::new(default_extensions());
        let kind = EventKind::Modify(ModifyKind::Data(DataChange::Content));
        assert!(!apply_event(&mut follower, &event(kind, &path)));
        assert_eq!(follower.offset(&path), None);
    }

    #[test]
    fn remove_then_recreate_restarts_at_zero() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("cycle.jsonl");
        std::fs::write(&path, format!("{USER}\n")).expect("write");

        let mut follower = TailFollower::new(default_extensions());
        follower.scan_existing(tmp.path());
        std::fs::remove_file(&path).expect("remove");
        apply_event(&mut follower, &event(EventKind::Remove(RemoveKind::File), &path));
        assert_eq!(follower.offset(&path), None);

        std::fs::write(&path, format!("{USER}\n")).expect("write");
        apply_event(&mut follower, &event(EventKind::Create(CreateKind::File), &path));
        assert_eq!(follower.stats().messages, 1);
    }

    #[test]
    fn missing_root_is_not_created() {
        let tmp = TempDir::new().expect("temp dir");
        let root = tmp.path().join("typo");
        let err = LiveWatch::start(&root, default_extensions())
            .err()
            .expect("missing root should fail");
        assert!(matches!(err, PulseError::Io { .. }));
        assert!(!root.exists());
    }

    #[test]
    fn run_until_returns_once_stopped() {
        let tmp = TempDir::new().expect("temp dir");
        let mut watch = LiveWatch::start(tmp.path(), default_extensions()).expect("start");
        let stop = AtomicBool::new(false);
        let mut ticks = 0;
        watch.run_until(&stop, Duration::from_millis(10), |stats| {
            assert_eq!(stats, &RunningStats::default());
            ticks += 1;
            if ticks == 3 {
                stop.store(true, Ordering::Relaxed);
            }
        });
        assert_eq!(ticks, 3);
        watch.stop();
    }
}
