//! Live folder watching.
//!
//! Filesystem notifications only say that *something* happened to a path. A
//! [`Scheduler`] turns them into dispatch decisions with a per-path state machine:
//!
//! ```text
//! Pending(size) --settle delay, size unchanged--> Stable --> Dispatched --> Done
//!      ^   |                                                     |
//!      |   +--size changed: poll again                           +--> Failed --retry delay--+
//!      +-------------------------------------------------------------------------------------+
//! ```
//!
//! Only direct children of the watched folder are tracked, so files the organizer
//! has just moved into category folders never come back around. Stable files are
//! queued for a fixed pool of worker threads that call the [`FileAppeared`]
//! handler, so a slow move never delays the stability checks of other files.

use crate::file_organizer::Outcome;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Longest the scheduler sleeps when nothing is pending.
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Callback invoked for each file that appeared and stopped changing.
pub trait FileAppeared: Send + Sync {
    fn on_file_appeared(&self, path: &Path) -> Outcome;
}

/// Timing of stability checks and retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherSettings {
    /// Wait after the last event before the first size check.
    pub settle_delay: Duration,
    /// Wait between size checks while the file is still growing.
    pub poll_interval: Duration,
    /// Wait before retrying a file whose move failed.
    pub retry_delay: Duration,
    /// Retries after the first failed attempt before giving up.
    pub max_retries: u32,
    /// Threads handling settled files. At least one is always started.
    pub workers: usize,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(250),
            retry_delay: Duration::from_secs(2),
            max_retries: 3,
            workers: 4,
        }
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Cannot watch {}: {source}", path.display())]
    InvalidRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Filesystem notifications unavailable: {0}")]
    Notify(#[from] notify::Error),
    #[error("Failed to start watcher thread: {0}")]
    Thread(std::io::Error),
}

/// Where a tracked path is in its life cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathState {
    /// Waiting for the size to stop changing.
    Pending {
        last_size: u64,
        check_at: Instant,
        failures: u32,
    },
    /// Size unchanged across two polls; about to be dispatched.
    Stable { failures: u32 },
    /// Handed to the handler; further events are ignored until it returns.
    Dispatched { failures: u32 },
    /// Handled. Finished paths are not retained.
    Done,
    /// The handler failed; another attempt is scheduled.
    Failed { retry_at: Instant, failures: u32 },
}

/// The per-path state machine, driven by events and clock ticks.
///
/// Time is passed in explicitly, so the scheduler never sleeps.
#[derive(Debug)]
pub struct Scheduler {
    root: PathBuf,
    settings: WatcherSettings,
    states: HashMap<PathBuf, PathState>,
}

impl Scheduler {
    pub fn new(root: &Path, settings: WatcherSettings) -> Self {
        Self {
            root: root.to_path_buf(),
            settings,
            states: HashMap::new(),
        }
    }

    /// Current state of `path`, if tracked.
    pub fn state(&self, path: &Path) -> Option<&PathState> {
        self.states.get(path)
    }

    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    /// Records an event for `path` at `now`.
    ///
    /// A pending path has its size and timer refreshed. Dispatched paths ignore
    /// events. Paths outside the root's top level, directories, and paths that no
    /// longer exist are not tracked.
    pub fn handle_event(&mut self, path: &Path, now: Instant) {
        if path.parent() != Some(self.root.as_path()) {
            return;
        }
        let size = match fs::metadata(path) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return,
        };

        let failures = match self.states.get(path) {
            Some(PathState::Dispatched { .. } | PathState::Stable { .. }) => return,
            Some(
                PathState::Pending { failures, .. } | PathState::Failed { failures, .. },
            ) => *failures,
            Some(PathState::Done) | None => 0,
        };

        debug!("Pending: {} ({} bytes)", path.display(), size);
        self.states.insert(
            path.to_path_buf(),
            PathState::Pending {
                last_size: size,
                check_at: now + self.settings.settle_delay,
                failures,
            },
        );
    }

    /// Advances timers to `now` and returns the paths that are ready to dispatch.
    ///
    /// Returned paths are marked [`PathState::Dispatched`].
    pub fn tick(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut ready = Vec::new();
        let mut vanished = Vec::new();

        for (path, state) in self.states.iter_mut() {
            match *state {
                PathState::Pending {
                    last_size,
                    check_at,
                    failures,
                } if check_at <= now => match fs::metadata(path) {
                    Ok(meta) if meta.is_file() && meta.len() == last_size => {
                        *state = PathState::Stable { failures };
                    }
                    Ok(meta) if meta.is_file() => {
                        debug!("Still growing: {} ({} bytes)", path.display(), meta.len());
                        *state = PathState::Pending {
                            last_size: meta.len(),
                            check_at: now + self.settings.poll_interval,
                            failures,
                        };
                    }
                    _ => vanished.push(path.clone()),
                },
                PathState::Failed { retry_at, failures } if retry_at <= now => {
                    match fs::metadata(path) {
                        Ok(meta) if meta.is_file() => {
                            *state = PathState::Pending {
                                last_size: meta.len(),
                                check_at: now,
                                failures,
                            };
                        }
                        _ => vanished.push(path.clone()),
                    }
                }
                _ => {}
            }

            if let PathState::Stable { failures } = *state {
                *state = PathState::Dispatched { failures };
                ready.push(path.clone());
            }
        }

        for path in vanished {
            debug!("Gone before it settled: {}", path.display());
            self.states.remove(&path);
        }
        ready.sort();
        ready
    }

    /// Records the handler's verdict for a dispatched path and returns its new state.
    pub fn complete(&mut self, path: &Path, failed: bool, now: Instant) -> PathState {
        let failures = match self.states.get(path) {
            Some(PathState::Dispatched { failures }) => *failures,
            _ => 0,
        };

        if !failed {
            self.states.remove(path);
            return PathState::Done;
        }

        let failures = failures + 1;
        if failures > self.settings.max_retries {
            warn!(
                "Giving up on {} after {} failed attempts",
                path.display(),
                failures
            );
            self.states.remove(path);
            return PathState::Done;
        }

        let state = PathState::Failed {
            retry_at: now + self.settings.retry_delay,
            failures,
        };
        self.states.insert(path.to_path_buf(), state.clone());
        state
    }

    /// Earliest instant at which [`Scheduler::tick`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.states
            .values()
            .filter_map(|state| match state {
                PathState::Pending { check_at, .. } => Some(*check_at),
                PathState::Failed { retry_at, .. } => Some(*retry_at),
                _ => None,
            })
            .min()
    }

    /// Drops every path that has not been dispatched yet.
    pub fn cancel_pending(&mut self) -> usize {
        let before = self.states.len();
        self.states
            .retain(|_, state| matches!(state, PathState::Dispatched { .. }));
        before - self.states.len()
    }
}

enum Message {
    Fs(notify::Result<Event>),
    Finished { path: PathBuf, failed: bool },
    Stop,
}

/// Paths an event refers to that may have just appeared.
fn appeared_paths(event: Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.into_iter().skip(1).collect()
        }
        EventKind::Create(_) | EventKind::Modify(_) => event.paths,
        _ => Vec::new(),
    }
}

/// A running watch on one folder.
///
/// Dropping the watcher stops it.
pub struct Watcher {
    root: PathBuf,
    tx: Sender<Message>,
    notifier: Option<RecommendedWatcher>,
    thread: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
}

impl Watcher {
    /// Starts watching `root` and handing settled files to `handler`.
    pub fn start(
        root: &Path,
        handler: Arc<dyn FileAppeared>,
        settings: WatcherSettings,
    ) -> Result<Self, WatchError> {
        let root = root.canonicalize().map_err(|source| WatchError::InvalidRoot {
            path: root.to_path_buf(),
            source,
        })?;

        let (tx, rx) = mpsc::channel();

        let event_tx = tx.clone();
        let mut notifier = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = event_tx.send(Message::Fs(res));
        })?;
        notifier.watch(&root, RecursiveMode::NonRecursive)?;

        // Workers exit once the job sender is gone, including on the error paths below.
        let (job_tx, job_rx) = mpsc::channel();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let stopping = Arc::new(AtomicBool::new(false));
        let pool_size = settings.workers.max(1);
        let mut workers = Vec::with_capacity(pool_size);
        for id in 0..pool_size {
            let jobs = Arc::clone(&job_rx);
            let done_tx = tx.clone();
            let handler = Arc::clone(&handler);
            let stopping = Arc::clone(&stopping);
            let worker = thread::Builder::new()
                .name(format!("smartsort-worker-{}", id))
                .spawn(move || work(jobs, done_tx, handler, stopping))
                .map_err(WatchError::Thread)?;
            workers.push(worker);
        }

        let mut scheduler = Scheduler::new(&root, settings);
        let thread = thread::Builder::new()
            .name("smartsort-watcher".to_string())
            .spawn(move || run(&mut scheduler, rx, job_tx))
            .map_err(WatchError::Thread)?;

        info!("Watching {} with {} workers", root.display(), pool_size);
        Ok(Self {
            root,
            tx,
            notifier: Some(notifier),
            thread: Some(thread),
            workers,
            stopping,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stops watching. Pending stability checks and queued files are dropped;
    /// files already being moved finish first.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        // No new notifications once the OS watch is gone.
        drop(self.notifier.take());
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.tx.send(Message::Stop);
        if thread.join().is_err() {
            error!("Watcher thread panicked");
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Worker thread panicked");
            }
        }
        info!("Stopped watching {}", self.root.display());
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Scheduler loop. Settled paths go to the worker pool through `jobs`.
fn run(scheduler: &mut Scheduler, rx: Receiver<Message>, jobs: Sender<PathBuf>) {
    loop {
        let timeout = scheduler
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_WAIT);

        match rx.recv_timeout(timeout) {
            Ok(Message::Fs(Ok(event))) => {
                let now = Instant::now();
                for path in appeared_paths(event) {
                    scheduler.handle_event(&path, now);
                }
            }
            Ok(Message::Fs(Err(e))) => warn!("Watch error: {}", e),
            Ok(Message::Finished { path, failed }) => {
                if let PathState::Failed { failures, .. } =
                    scheduler.complete(&path, failed, Instant::now())
                {
                    info!("Will retry {} (attempt {})", path.display(), failures + 1);
                }
            }
            Ok(Message::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        for path in scheduler.tick(now) {
            if let Err(mpsc::SendError(path)) = jobs.send(path) {
                error!("No worker left to handle {}", path.display());
                scheduler.complete(&path, true, now);
            }
        }
    }

    let cancelled = scheduler.cancel_pending();
    if cancelled > 0 {
        debug!("Cancelled {} pending files", cancelled);
    }
}

/// Worker loop: handles queued paths until the scheduler hangs up.
fn work(
    jobs: Arc<Mutex<Receiver<PathBuf>>>,
    done: Sender<Message>,
    handler: Arc<dyn FileAppeared>,
    stopping: Arc<AtomicBool>,
) {
    loop {
        // The guard is released before the handler runs.
        let job = jobs.lock().unwrap_or_else(PoisonError::into_inner).recv();
        let Ok(path) = job else { break };
        if stopping.load(Ordering::SeqCst) {
            debug!("Dropped queued file {}", path.display());
            continue;
        }
        let failed = matches!(handler.on_file_appeared(&path), Outcome::Failed(_));
        let _ = done.send(Message::Finished { path, failed });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_organizer::{OrganizeError, SkipReason};
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn settings() -> WatcherSettings {
        WatcherSettings {
            settle_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(250),
            retry_delay: Duration::from_secs(2),
            max_retries: 1,
            workers: 1,
        }
    }

    fn setup() -> (TempDir, Scheduler) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().canonicalize().unwrap();
        let scheduler = Scheduler::new(&root, settings());
        (temp_dir, scheduler)
    }

    fn root(temp_dir: &TempDir) -> PathBuf {
        temp_dir.path().canonicalize().unwrap()
    }

    #[test]
    fn test_dispatch_after_settle_delay() {
        let (temp_dir, mut scheduler) = setup();
        let file = root(&temp_dir).join("a.txt");
        fs::write(&file, "abc").unwrap();
        let t0 = Instant::now();

        scheduler.handle_event(&file, t0);
        assert!(scheduler.tick(t0 + Duration::from_millis(100)).is_empty());
        assert_eq!(scheduler.tick(t0 + Duration::from_millis(500)), vec![file.clone()]);
        assert!(matches!(
            scheduler.state(&file),
            Some(PathState::Dispatched { .. })
        ));
    }

    #[test]
    fn test_growing_file_waits_for_stable_size() {
        let (temp_dir, mut scheduler) = setup();
        let file = root(&temp_dir).join("download.zip");
        fs::write(&file, "a").unwrap();
        let t0 = Instant::now();
        scheduler.handle_event(&file, t0);

        fs::write(&file, "abc").unwrap();
        let t1 = t0 + Duration::from_millis(500);
        assert!(scheduler.tick(t1).is_empty());
        assert!(matches!(
            scheduler.state(&file),
            Some(PathState::Pending { last_size: 3, .. })
        ));

        assert!(scheduler.tick(t1 + Duration::from_millis(100)).is_empty());
        assert_eq!(scheduler.tick(t1 + Duration::from_millis(250)), vec![file]);
    }

    #[test]
    fn test_repeated_events_refresh_pending() {
        let (temp_dir, mut scheduler) = setup();
        let file = root(&temp_dir).join("a.txt");
        fs::write(&file, "abc").unwrap();
        let t0 = Instant::now();

        scheduler.handle_event(&file, t0);
        scheduler.handle_event(&file, t0 + Duration::from_millis(400));
        assert!(scheduler.tick(t0 + Duration::from_millis(600)).is_empty());
        assert_eq!(scheduler.tick(t0 + Duration::from_millis(900)).len(), 1);
        assert_eq!(scheduler.tracked(), 1);
    }

    #[test]
    fn test_events_ignored_while_dispatched() {
        let (temp_dir, mut scheduler) = setup();
        let file = root(&temp_dir).join("a.txt");
        fs::write(&file, "abc").unwrap();
        let t0 = Instant::now();

        scheduler.handle_event(&file, t0);
        let t1 = t0 + Duration::from_millis(500);
        assert_eq!(scheduler.tick(t1).len(), 1);

        scheduler.handle_event(&file, t1);
        assert!(matches!(
            scheduler.state(&file),
            Some(PathState::Dispatched { .. })
        ));
        assert!(scheduler.tick(t1 + Duration::from_secs(5)).is_empty());

        assert_eq!(scheduler.complete(&file, false, t1), PathState::Done);
        assert_eq!(scheduler.tracked(), 0);
    }

    #[test]
    fn test_category_folder_and_directories_ignored() {
        let (temp_dir, mut scheduler) = setup();
        let root = root(&temp_dir);
        fs::create_dir(root.join("Images")).unwrap();
        let inner = root.join("Images").join("a.png");
        fs::write(&inner, "png").unwrap();

        let now = Instant::now();
        scheduler.handle_event(&inner, now);
        scheduler.handle_event(&root.join("Images"), now);
        scheduler.handle_event(&root.join("missing.txt"), now);
        assert_eq!(scheduler.tracked(), 0);
    }

    #[test]
    fn test_failed_dispatch_retries_then_gives_up() {
        let (temp_dir, mut scheduler) = setup();
        let file = root(&temp_dir).join("locked.doc");
        fs::write(&file, "x").unwrap();
        let t0 = Instant::now();
        scheduler.handle_event(&file, t0);
        let t1 = t0 + Duration::from_millis(500);
        assert_eq!(scheduler.tick(t1).len(), 1);

        let state = scheduler.complete(&file, true, t1);
        assert!(matches!(state, PathState::Failed { failures: 1, .. }));
        assert!(scheduler.tick(t1 + Duration::from_secs(1)).is_empty());

        // Retry re-checks the size, then dispatches again.
        let t2 = t1 + Duration::from_secs(2);
        assert!(scheduler.tick(t2).is_empty());
        assert!(matches!(
            scheduler.state(&file),
            Some(PathState::Pending { failures: 1, .. })
        ));
        assert_eq!(scheduler.tick(t2), vec![file.clone()]);

        // max_retries is 1, so the second failure is final.
        assert_eq!(scheduler.complete(&file, true, t2), PathState::Done);
        assert_eq!(scheduler.tracked(), 0);
    }

    #[test]
    fn test_vanished_file_dropped() {
        let (temp_dir, mut scheduler) = setup();
        let file = root(&temp_dir).join("a.txt");
        fs::write(&file, "abc").unwrap();
        let t0 = Instant::now();
        scheduler.handle_event(&file, t0);
        fs::remove_file(&file).unwrap();

        assert!(scheduler.tick(t0 + Duration::from_millis(500)).is_empty());
        assert_eq!(scheduler.tracked(), 0);
    }

    #[test]
    fn test_cancel_pending_keeps_dispatched() {
        let (temp_dir, mut scheduler) = setup();
        let root = root(&temp_dir);
        let a = root.join("a.txt");
        let b = root.join("b.txt");
        fs::write(&a, "a").unwrap();
        let t0 = Instant::now();
        scheduler.handle_event(&a, t0);
        assert_eq!(scheduler.tick(t0 + Duration::from_millis(500)).len(), 1);

        fs::write(&b, "b").unwrap();
        scheduler.handle_event(&b, t0 + Duration::from_millis(500));
        assert_eq!(scheduler.next_deadline(), Some(t0 + Duration::from_secs(1)));

        assert_eq!(scheduler.cancel_pending(), 1);
        assert!(scheduler.state(&b).is_none());
        assert!(scheduler.state(&a).is_some());
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn test_appeared_paths_skips_rename_source() {
        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("/inbox/old.txt"));
        assert!(appeared_paths(from).is_empty());

        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/inbox/old.txt"))
            .add_path(PathBuf::from("/inbox/new.txt"));
        assert_eq!(appeared_paths(both), vec![PathBuf::from("/inbox/new.txt")]);

        let remove = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(PathBuf::from("/inbox/old.txt"));
        assert!(appeared_paths(remove).is_empty());
    }

    /// Records every path it is handed.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<PathBuf>>,
        fail: bool,
    }

    impl FileAppeared for Recorder {
        fn on_file_appeared(&self, path: &Path) -> Outcome {
            self.seen.lock().unwrap().push(path.to_path_buf());
            if self.fail {
                Outcome::Failed(OrganizeError::FileMoveFailure {
                    source_path: path.to_path_buf(),
                    destination: path.to_path_buf(),
                    error: std::io::ErrorKind::PermissionDenied.into(),
                })
            } else {
                Outcome::Skipped(SkipReason::Filtered)
            }
        }
    }

    fn fast_settings() -> WatcherSettings {
        WatcherSettings {
            settle_delay: Duration::from_millis(50),
            poll_interval: Duration::from_millis(20),
            retry_delay: Duration::from_millis(50),
            max_retries: 1,
            workers: 2,
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_watcher_dispatches_new_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let recorder = Arc::new(Recorder::default());
        let mut watcher =
            Watcher::start(temp_dir.path(), recorder.clone(), fast_settings()).unwrap();

        let file = watcher.root().join("new.txt");
        fs::write(&file, "hello").unwrap();

        assert!(wait_for(|| !recorder.seen.lock().unwrap().is_empty()));
        watcher.stop();
        assert_eq!(recorder.seen.lock().unwrap()[0], file);
    }

    #[test]
    fn test_watcher_retries_failures() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let _watcher =
            Watcher::start(temp_dir.path(), recorder.clone(), fast_settings()).unwrap();

        fs::write(temp_dir.path().join("stuck.txt"), "x").unwrap();
        assert!(wait_for(|| recorder.seen.lock().unwrap().len() >= 2));
    }

    #[test]
    fn test_stopped_watcher_dispatches_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let recorder = Arc::new(Recorder::default());
        let mut watcher =
            Watcher::start(temp_dir.path(), recorder.clone(), fast_settings()).unwrap();
        watcher.stop();

        fs::write(temp_dir.path().join("late.txt"), "x").unwrap();
        thread::sleep(Duration::from_millis(200));
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    /// Slow handler that tracks how many calls overlap.
    #[derive(Default)]
    struct Gauge {
        active: AtomicUsize,
        peak: AtomicUsize,
        handled: AtomicUsize,
    }

    impl FileAppeared for Gauge {
        fn on_file_appeared(&self, _path: &Path) -> Outcome {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.handled.fetch_add(1, Ordering::SeqCst);
            Outcome::Skipped(SkipReason::Filtered)
        }
    }

    #[test]
    fn test_burst_is_bounded_by_worker_pool() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let gauge = Arc::new(Gauge::default());
        let mut watcher = Watcher::start(temp_dir.path(), gauge.clone(), fast_settings()).unwrap();

        for i in 0..12 {
            fs::write(watcher.root().join(format!("file{}.txt", i)), "x").unwrap();
        }

        assert!(wait_for(|| gauge.handled.load(Ordering::SeqCst) == 12));
        watcher.stop();
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_start_on_missing_folder_fails() {
        let recorder: Arc<dyn FileAppeared> = Arc::new(Recorder::default());
        assert!(matches!(
            Watcher::start(Path::new("/non/existent/folder"), recorder, fast_settings()),
            Err(WatchError::InvalidRoot { .. })
        ));
    }
}
