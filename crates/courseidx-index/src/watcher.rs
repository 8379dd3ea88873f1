//! Watches the content root and turns debounced file changes into queue jobs.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use courseidx_config::{CourseIdxConfig, PriorityConfig};
use courseidx_core::{
    ChangeEvent, ChangeKind, EnqueueOutcome, Granularity, IndexingJob, JobAction, JobHandle,
    JobTrigger,
};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::layout::{relative_path, ContentFilter, ContentLayout};
use crate::queue::JobQueue;
use crate::WatchError;

/// Forces the polling backend with the given interval when set.
pub const POLL_INTERVAL_ENV: &str = "COURSEIDX_WATCH_POLL_INTERVAL_MS";

/// Watcher settings.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub root: PathBuf,
    pub debounce: Duration,
    /// Use the polling backend at this interval instead of native notifications.
    pub poll_interval: Option<Duration>,
    /// Lowercase, without the dot.
    pub extensions: Vec<String>,
    pub max_depth: usize,
    pub ignore: Vec<String>,
    pub priorities: PriorityConfig,
    pub event_buffer: usize,
}

impl WatchSettings {
    pub fn from_config(config: &CourseIdxConfig) -> Self {
        WatchSettings {
            root: PathBuf::from(&config.content.root),
            debounce: config.watch.debounce.as_duration(),
            poll_interval: config.watch.poll_interval.map(|d| d.as_duration()),
            extensions: config
                .content
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_depth: config.content.max_depth,
            ignore: config.content.ignore.clone(),
            priorities: config.watch.priorities.clone(),
            event_buffer: config.watch.event_buffer,
        }
    }
}

/// Notifications from the watcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatcherEvent {
    /// A debounced change was stored in the queue.
    Enqueued { path: String, handle: JobHandle },
    /// The queue already holds a higher-priority job for this path.
    Dropped { path: String, existing: String },
    /// The path passed the filters but maps to no collection.
    Unmapped { path: String },
    Error { path: Option<String>, message: String },
}

/// A change as reported by the OS, before filtering and mapping.
#[derive(Debug, Clone)]
struct RawChange {
    path: PathBuf,
    kind: ChangeKind,
}

enum WatcherImpl {
    Recommended(RecommendedWatcher),
    Poll(PollWatcher),
}

impl WatcherImpl {
    fn watch(&mut self, path: &Path, mode: RecursiveMode) -> notify::Result<()> {
        match self {
            WatcherImpl::Recommended(watcher) => watcher.watch(path, mode),
            WatcherImpl::Poll(watcher) => watcher.watch(path, mode),
        }
    }
}

struct Running {
    // Dropping the notify watcher releases the OS handles
    _watcher: WatcherImpl,
    raw_tx: mpsc::Sender<RawChange>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Debounced filesystem watcher feeding the job queue.
pub struct ChangeWatcher {
    settings: WatchSettings,
    layout: Arc<ContentLayout>,
    queue: Arc<JobQueue>,
    events: broadcast::Sender<WatcherEvent>,
    running: Mutex<Option<Running>>,
    root: Mutex<PathBuf>,
}

impl ChangeWatcher {
    pub fn new(settings: WatchSettings, layout: Arc<ContentLayout>, queue: Arc<JobQueue>) -> Self {
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));
        let root = settings.root.clone();
        ChangeWatcher {
            settings,
            layout,
            queue,
            events,
            running: Mutex::new(None),
            root: Mutex::new(root),
        }
    }

    /// Content root being watched; canonical once started.
    pub fn root(&self) -> PathBuf {
        self.root.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatcherEvent> {
        self.events.subscribe()
    }

    /// Start watching. Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<(), WatchError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(WatchError::AlreadyRunning);
        }

        let root = self
            .settings
            .root
            .canonicalize()
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(|| WatchError::RootMissing(self.settings.root.clone()))?;
        let filter = ContentFilter::new(
            &self.settings.extensions,
            self.settings.max_depth,
            &self.settings.ignore,
        )
        .map_err(|e| WatchError::Config(e.to_string()))?;

        let (raw_tx, raw_rx) = mpsc::channel::<RawChange>(self.settings.event_buffer.max(1));
        let bridge_tx = raw_tx.clone();
        let bridge_events = self.events.clone();

        let handler = move |result: Result<Event, notify::Error>| match result {
            Ok(event) => {
                for change in convert_event(&event) {
                    if let Err(e) = bridge_tx.blocking_send(change) {
                        warn!("Failed to forward file change: {}", e);
                    }
                }
            }
            Err(e) => {
                error!("Watch error: {}", e);
                // No receivers is fine
                let _ = bridge_events.send(WatcherEvent::Error {
                    path: e.paths.first().map(|p| p.display().to_string()),
                    message: e.to_string(),
                });
            }
        };

        let mut watcher = match self.settings.poll_interval.or_else(poll_interval_from_env) {
            Some(interval) => {
                let config = Config::default()
                    .with_poll_interval(interval)
                    .with_compare_contents(true);
                WatcherImpl::Poll(PollWatcher::new(handler, config)?)
            }
            None => WatcherImpl::Recommended(RecommendedWatcher::new(handler, Config::default())?),
        };
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let mut dirs = HashSet::new();
        collect_dirs(&root, "", &filter, &mut dirs);
        debug!(dirs = dirs.len(), "tracking content directories");

        let (shutdown, shutdown_rx) = watch::channel(false);
        let debounce = DebounceLoop {
            root: root.clone(),
            filter,
            dirs,
            layout: Arc::clone(&self.layout),
            queue: Arc::clone(&self.queue),
            events: self.events.clone(),
            priorities: self.settings.priorities.clone(),
            window: self.settings.debounce,
        };
        let task = tokio::spawn(debounce.run(raw_rx, shutdown_rx));

        info!(root = %root.display(), debounce = ?self.settings.debounce, "watching content");
        *self.root.lock() = root;
        *running = Some(Running {
            _watcher: watcher,
            raw_tx,
            shutdown,
            task,
        });
        Ok(())
    }

    /// Stop watching. Pending debounced changes are discarded. Idempotent.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        drop(running._watcher);
        let _ = running.shutdown.send(true);
        if let Err(e) = running.task.await {
            error!(error = %e, "debounce task failed");
        }
        info!("watcher stopped");
    }

    /// Feed a change observed outside the OS watcher through the debounce path.
    pub async fn submit(&self, path: impl Into<PathBuf>, kind: ChangeKind) -> Result<(), WatchError> {
        let tx = self
            .running
            .lock()
            .as_ref()
            .map(|r| r.raw_tx.clone())
            .ok_or(WatchError::NotRunning)?;
        tx.send(RawChange {
            path: path.into(),
            kind,
        })
        .await
        .map_err(|_| WatchError::NotRunning)
    }

    /// Enqueue an immediate reindex of a whole collection.
    pub fn force_reindex(&self, collection_id: &str) -> Result<JobHandle, WatchError> {
        let job = IndexingJob::collection(collection_id, JobAction::Reindex)
            .with_priority(self.settings.priorities.manual)
            .with_trigger(JobTrigger::Manual);
        let handle = self.queue.enqueue(job)?;
        info!(collection_id, job_id = %handle.id, "forced collection reindex");
        Ok(handle)
    }
}

/// Pending changes keyed by path; each new change resets its deadline.
struct Debouncer {
    window: Duration,
    pending: HashMap<String, Pending>,
}

struct Pending {
    deadline: Instant,
    event: ChangeEvent,
    priority: i64,
    scope: Scope,
}

/// What a buffered change refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    File,
    /// A directory appeared or disappeared, including either side of a rename.
    Directory,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Debouncer {
            window,
            pending: HashMap::new(),
        }
    }

    fn push(&mut self, event: ChangeEvent, priority: i64, scope: Scope, now: Instant) {
        self.pending.insert(
            event.path.clone(),
            Pending {
                deadline: now + self.window,
                event,
                priority,
                scope,
            },
        );
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove and return changes whose window has elapsed, oldest deadline first.
    fn drain_due(&mut self, now: Instant) -> Vec<Pending> {
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        let mut drained: Vec<Pending> = due
            .iter()
            .filter_map(|path| self.pending.remove(path))
            .collect();
        drained.sort_by_key(|p| p.deadline);
        drained
    }

    fn len(&self) -> usize {
        self.pending.len()
    }
}

struct DebounceLoop {
    root: PathBuf,
    filter: ContentFilter,
    /// Known content directories, root-relative. Removed paths no longer
    /// exist on disk, so this is how a removed directory is recognized.
    dirs: HashSet<String>,
    layout: Arc<ContentLayout>,
    queue: Arc<JobQueue>,
    events: broadcast::Sender<WatcherEvent>,
    priorities: PriorityConfig,
    window: Duration,
}

impl DebounceLoop {
    async fn run(mut self, mut raw_rx: mpsc::Receiver<RawChange>, mut shutdown: watch::Receiver<bool>) {
        let mut debouncer = Debouncer::new(self.window);

        loop {
            let next = debouncer.next_deadline();
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                raw = raw_rx.recv() => match raw {
                    Some(change) => self.observe(&mut debouncer, change),
                    None => break,
                },
                _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                    for pending in debouncer.drain_due(Instant::now()) {
                        self.dispatch(pending);
                    }
                }
            }
        }

        if debouncer.len() > 0 {
            debug!(discarded = debouncer.len(), "discarded pending changes");
        }
    }

    fn observe(&mut self, debouncer: &mut Debouncer, change: RawChange) {
        let Some(rel) = relative_path(&self.root, &change.path) else {
            trace!(path = %change.path.display(), "change outside content root");
            return;
        };
        if let Some(accepted) = self.track_directory(&change, &rel) {
            if accepted {
                self.observe_directory(debouncer, change.kind, rel);
            }
            return;
        }
        if !self.filter.accepts(&rel) {
            trace!(path = %rel, "change filtered");
            return;
        }

        let Some(info) = self.layout.map_relative(&rel) else {
            warn!(path = %rel, "cannot map change to a collection");
            // No receivers is fine
            let _ = self.events.send(WatcherEvent::Unmapped { path: rel });
            return;
        };

        let priority = self.layout.priority_for(&info, &self.priorities);
        let event = ChangeEvent {
            kind: change.kind,
            path: info.path,
            collection_id: info.collection_id,
            group_id: info.group_id,
            item_id: info.item_id,
            observed_at: Utc::now(),
        };
        trace!(path = %event.path, kind = ?event.kind, "change buffered");
        debouncer.push(event, priority, Scope::File, Instant::now());
    }

    /// `Some` when the change is a directory appearing or disappearing, with
    /// whether the directory holds content. Keeps `dirs` current.
    fn track_directory(&mut self, change: &RawChange, rel: &str) -> Option<bool> {
        match change.kind {
            ChangeKind::Added | ChangeKind::Modified if change.path.is_dir() => {
                if change.kind == ChangeKind::Modified && self.dirs.contains(rel) {
                    // Metadata of a directory we already know
                    return Some(false);
                }
                if !self.filter.accepts_dir(rel) {
                    return Some(false);
                }
                self.dirs.insert(rel.to_string());
                collect_dirs(&change.path, rel, &self.filter, &mut self.dirs);
                Some(true)
            }
            ChangeKind::Removed if self.dirs.contains(rel) => {
                let nested = format!("{}/", rel);
                self.dirs.retain(|d| d != rel && !d.starts_with(&nested));
                Some(true)
            }
            _ => None,
        }
    }

    fn observe_directory(&self, debouncer: &mut Debouncer, kind: ChangeKind, rel: String) {
        let Some(info) = self.layout.map_directory(&rel) else {
            warn!(path = %rel, "cannot map directory to a collection");
            // No receivers is fine
            let _ = self.events.send(WatcherEvent::Unmapped { path: rel });
            return;
        };
        let event = ChangeEvent {
            kind,
            path: info.path,
            collection_id: info.collection_id,
            group_id: info.group_id,
            item_id: None,
            observed_at: Utc::now(),
        };
        debug!(path = %event.path, kind = ?event.kind, "directory change buffered");
        debouncer.push(event, self.priorities.other, Scope::Directory, Instant::now());
    }

    fn dispatch(&self, pending: Pending) {
        let path = pending.event.path.clone();
        let job = match pending.scope {
            Scope::File => IndexingJob::from_change(&pending.event, pending.priority),
            Scope::Directory => directory_job(&pending.event).with_priority(pending.priority),
        };

        let event = match self.queue.enqueue(job) {
            Ok(handle) => match &handle.outcome {
                EnqueueOutcome::Dropped { existing } => {
                    debug!(path = %path, existing = %existing, "change dropped by queue");
                    WatcherEvent::Dropped {
                        path,
                        existing: existing.clone(),
                    }
                }
                _ => {
                    debug!(path = %path, job_id = %handle.id, "change enqueued");
                    WatcherEvent::Enqueued { path, handle }
                }
            },
            Err(e) => {
                error!(path = %path, error = %e, "failed to enqueue change");
                WatcherEvent::Error {
                    path: Some(path),
                    message: e.to_string(),
                }
            }
        };
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

/// Reindex whatever a directory change touched: its group when it lies in
/// one, otherwise the whole collection.
fn directory_job(event: &ChangeEvent) -> IndexingJob {
    match &event.group_id {
        Some(group_id) => {
            IndexingJob::new(Granularity::Group, JobAction::Reindex, event.collection_id.clone())
                .with_group(group_id.clone())
        }
        None => IndexingJob::collection(event.collection_id.clone(), JobAction::Reindex),
    }
}

/// Record every content directory below `dir`, whose root-relative path is `rel`.
fn collect_dirs(dir: &Path, rel: &str, filter: &ContentFilter, out: &mut HashSet<String>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "cannot list directory");
            return;
        }
    };
    for entry in entries.flatten() {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let child = if rel.is_empty() {
            name
        } else {
            format!("{}/{}", rel, name)
        };
        if filter.accepts_dir(&child) {
            collect_dirs(&entry.path(), &child, filter, out);
            out.insert(child);
        }
    }
}

fn poll_interval_from_env() -> Option<Duration> {
    let value = std::env::var(POLL_INTERVAL_ENV).ok()?;
    let millis: u64 = value.parse().ok()?;
    if millis == 0 {
        return None;
    }
    Some(Duration::from_millis(millis))
}

fn convert_event(event: &Event) -> Vec<RawChange> {
    let all = |kind: ChangeKind| {
        event
            .paths
            .iter()
            .map(|path| RawChange {
                path: path.clone(),
                kind,
            })
            .collect::<Vec<_>>()
    };

    match event.kind {
        EventKind::Create(_) => all(ChangeKind::Added),
        EventKind::Remove(_) => all(ChangeKind::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(ChangeKind::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(ChangeKind::Added),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut changes = Vec::new();
            if let Some(from) = event.paths.first() {
                changes.push(RawChange {
                    path: from.clone(),
                    kind: ChangeKind::Removed,
                });
            }
            if let Some(to) = event.paths.get(1) {
                changes.push(RawChange {
                    path: to.clone(),
                    kind: ChangeKind::Added,
                });
            }
            changes
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|path| RawChange {
                path: path.clone(),
                kind: if path.exists() {
                    ChangeKind::Added
                } else {
                    ChangeKind::Removed
                },
            })
            .collect(),
        EventKind::Modify(_) => all(ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueSettings;
    use courseidx_config::LayoutConfig;
    use courseidx_core::{Granularity, JobState};
    use std::sync::Once;
    use tempfile::TempDir;
    use tokio::time::{sleep, timeout};

    fn settings(root: &Path) -> WatchSettings {
        let mut config = CourseIdxConfig::default();
        config.content.root = root.display().to_string();
        WatchSettings::from_config(&config)
    }

    fn fixture() -> (TempDir, Arc<JobQueue>, ChangeWatcher) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("rust-101/module-1")).unwrap();
        let queue = Arc::new(JobQueue::open_memory(QueueSettings::immediate()).unwrap());
        let layout = Arc::new(ContentLayout::new(&LayoutConfig::default()).unwrap());
        let watcher = ChangeWatcher::new(settings(dir.path()), layout, Arc::clone(&queue));
        (dir, queue, watcher)
    }

    fn lesson(watcher: &ChangeWatcher) -> PathBuf {
        watcher.root().join("rust-101/module-1/lesson-1.md")
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_changes_enqueues_once() {
        let (_dir, queue, watcher) = fixture();
        watcher.start().unwrap();
        let mut events = watcher.subscribe();

        for _ in 0..5 {
            watcher
                .submit(lesson(&watcher), ChangeKind::Modified)
                .await
                .unwrap();
            sleep(Duration::from_millis(500)).await;
        }

        let event = timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        let WatcherEvent::Enqueued { path, handle } = event else {
            panic!("expected an enqueue, got {:?}", event);
        };
        assert_eq!(path, "rust-101/module-1/lesson-1.md");
        assert_eq!(handle.outcome, EnqueueOutcome::Enqueued);

        assert!(timeout(Duration::from_secs(10), events.recv()).await.is_err());
        assert_eq!(queue.stats().unwrap().waiting, 1);

        let job = queue.get_job(&handle.id).unwrap().unwrap().job;
        assert_eq!(job.granularity, Granularity::File);
        assert_eq!(job.action, JobAction::Index);
        assert_eq!(job.item_id.as_deref(), Some("lesson-1"));
        assert_eq!(job.priority, 5);
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_changes_enqueue_each() {
        let (_dir, _queue, watcher) = fixture();
        watcher.start().unwrap();
        let mut events = watcher.subscribe();

        for _ in 0..3 {
            watcher
                .submit(lesson(&watcher), ChangeKind::Modified)
                .await
                .unwrap();
            sleep(Duration::from_secs(4)).await;
        }

        let mut enqueued = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, WatcherEvent::Enqueued { .. }) {
                enqueued += 1;
            }
        }
        assert_eq!(enqueued, 3);
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_removal_becomes_delete_job() {
        let (_dir, queue, watcher) = fixture();
        watcher.start().unwrap();
        let mut events = watcher.subscribe();

        watcher
            .submit(lesson(&watcher), ChangeKind::Modified)
            .await
            .unwrap();
        watcher
            .submit(lesson(&watcher), ChangeKind::Removed)
            .await
            .unwrap();

        let event = timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        let WatcherEvent::Enqueued { handle, .. } = event else {
            panic!("expected an enqueue, got {:?}", event);
        };
        let job = queue.get_job(&handle.id).unwrap().unwrap().job;
        assert_eq!(job.action, JobAction::Delete);
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_pending_changes() {
        let (_dir, queue, watcher) = fixture();
        watcher.start().unwrap();
        let mut events = watcher.subscribe();

        watcher
            .submit(lesson(&watcher), ChangeKind::Modified)
            .await
            .unwrap();
        sleep(Duration::from_millis(100)).await;
        watcher.stop().await;
        watcher.stop().await;

        sleep(Duration::from_secs(10)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(queue.stats().unwrap().waiting, 0);
        assert!(!watcher.is_running());
        assert!(matches!(
            watcher.submit(lesson(&watcher), ChangeKind::Modified).await,
            Err(WatchError::NotRunning)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmapped_and_filtered_changes() {
        let (_dir, queue, watcher) = fixture();
        watcher.start().unwrap();
        let mut events = watcher.subscribe();
        let root = watcher.root();

        watcher
            .submit(root.join("README.md"), ChangeKind::Modified)
            .await
            .unwrap();
        watcher
            .submit(root.join("rust-101/module-1/lesson-1.test.md"), ChangeKind::Modified)
            .await
            .unwrap();
        watcher
            .submit(root.join("rust-101/module-1/image.png"), ChangeKind::Added)
            .await
            .unwrap();

        let event = timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            WatcherEvent::Unmapped {
                path: "README.md".to_string()
            }
        );

        sleep(Duration::from_secs(10)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(queue.stats().unwrap().waiting, 0);
        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_start_requires_root() {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(JobQueue::open_memory(QueueSettings::immediate()).unwrap());
        let layout = Arc::new(ContentLayout::new(&LayoutConfig::default()).unwrap());
        let watcher = ChangeWatcher::new(settings(&dir.path().join("missing")), layout, queue);
        assert!(matches!(watcher.start(), Err(WatchError::RootMissing(_))));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (_dir, _queue, watcher) = fixture();
        watcher.start().unwrap();
        assert!(matches!(watcher.start(), Err(WatchError::AlreadyRunning)));
        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_force_reindex() {
        let (_dir, queue, watcher) = fixture();
        let handle = watcher.force_reindex("rust-101").unwrap();

        let stored = queue.get_job(&handle.id).unwrap().unwrap();
        assert_eq!(stored.job.granularity, Granularity::Collection);
        assert_eq!(stored.job.action, JobAction::Reindex);
        assert_eq!(stored.job.trigger, JobTrigger::Manual);
        assert_eq!(stored.job.priority, 20);
        assert_eq!(stored.state, JobState::Waiting);
    }

    #[test]
    fn test_debouncer_resets_deadline() {
        let mut debouncer = Debouncer::new(Duration::from_secs(3));
        let start = Instant::now();
        let event = |path: &str| ChangeEvent {
            kind: ChangeKind::Modified,
            path: path.to_string(),
            collection_id: "c".to_string(),
            group_id: None,
            item_id: None,
            observed_at: Utc::now(),
        };

        debouncer.push(event("c/a.md"), 1, Scope::File, start);
        debouncer.push(event("c/b.md"), 1, Scope::File, start + Duration::from_secs(1));
        debouncer.push(event("c/a.md"), 1, Scope::File, start + Duration::from_secs(2));
        assert_eq!(debouncer.len(), 2);
        assert_eq!(debouncer.next_deadline(), Some(start + Duration::from_secs(4)));

        let due = debouncer.drain_due(start + Duration::from_secs(4));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].event.path, "c/b.md");

        assert!(debouncer.drain_due(start + Duration::from_secs(4)).is_empty());
        assert_eq!(debouncer.drain_due(start + Duration::from_secs(5)).len(), 1);
        assert_eq!(debouncer.len(), 0);
    }

    #[test]
    fn test_convert_rename_both() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/content/c/module-1/lesson-1.md"))
            .add_path(PathBuf::from("/content/c/module-1/lesson-2.md"));
        let changes = convert_event(&event);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].kind, ChangeKind::Removed);
        assert_eq!(changes[1].kind, ChangeKind::Added);

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any));
        assert!(convert_event(&access).is_empty());
    }

    #[test]
    fn test_convert_ambiguous_rename() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("module-3");
        std::fs::create_dir(&present).unwrap();
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any)))
            .add_path(dir.path().join("module-1"))
            .add_path(present);
        let changes = convert_event(&event);
        assert_eq!(changes[0].kind, ChangeKind::Removed);
        assert_eq!(changes[1].kind, ChangeKind::Added);
    }

    /// Collect every enqueued job until `window` of quiet passes.
    async fn drain_jobs(
        queue: &JobQueue,
        events: &mut broadcast::Receiver<WatcherEvent>,
        window: Duration,
    ) -> Vec<IndexingJob> {
        let mut jobs = Vec::new();
        while let Ok(Ok(event)) = timeout(window, events.recv()).await {
            if let WatcherEvent::Enqueued { handle, .. } = event {
                if let Some(stored) = queue.get_job(&handle.id).unwrap() {
                    jobs.push(stored.job);
                }
            }
        }
        jobs
    }

    #[tokio::test(start_paused = true)]
    async fn test_directory_rename_reindexes_both_groups() {
        let (_dir, queue, watcher) = fixture();
        watcher.start().unwrap();
        let mut events = watcher.subscribe();
        let root = watcher.root();

        std::fs::rename(root.join("rust-101/module-1"), root.join("rust-101/module-3")).unwrap();
        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(root.join("rust-101/module-1"))
            .add_path(root.join("rust-101/module-3"));
        for change in convert_event(&rename) {
            watcher.submit(change.path, change.kind).await.unwrap();
        }

        let jobs = drain_jobs(&queue, &mut events, Duration::from_secs(10)).await;
        for group in ["module-1", "module-3"] {
            assert!(
                jobs.iter().any(|job| job.granularity == Granularity::Group
                    && job.action == JobAction::Reindex
                    && job.group_id.as_deref() == Some(group)),
                "expected a reindex of {}, got {:?}",
                group,
                jobs
            );
        }
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_directory_moves_in_and_out() {
        let (_dir, queue, watcher) = fixture();
        watcher.start().unwrap();
        let mut events = watcher.subscribe();
        let root = watcher.root();

        // A plain directory moved in reindexes its collection
        let notes = root.join("rust-101/notes");
        std::fs::create_dir_all(&notes).unwrap();
        std::fs::write(notes.join("glossary.md"), "Borrow: a reference.").unwrap();
        watcher.submit(notes.clone(), ChangeKind::Added).await.unwrap();

        let jobs = drain_jobs(&queue, &mut events, Duration::from_secs(10)).await;
        assert!(jobs
            .iter()
            .any(|job| job.granularity == Granularity::Collection && job.action == JobAction::Reindex));

        // Moved out again: no longer on disk, but still recognized
        std::fs::remove_dir_all(&notes).unwrap();
        watcher.submit(notes, ChangeKind::Removed).await.unwrap();
        let jobs = drain_jobs(&queue, &mut events, Duration::from_secs(20)).await;
        assert!(jobs.iter().any(|job| job.granularity == Granularity::Collection));

        // An unknown extensionless removal is not a directory
        watcher
            .submit(root.join("rust-101/module-1/4913"), ChangeKind::Removed)
            .await
            .unwrap();
        let jobs = drain_jobs(&queue, &mut events, Duration::from_secs(10)).await;
        assert!(!jobs.iter().any(|job| job.granularity == Granularity::Group));
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_failure_is_broadcast() {
        let (_dir, queue, watcher) = fixture();
        watcher.start().unwrap();
        let mut events = watcher.subscribe();
        queue.make_read_only();

        watcher
            .submit(lesson(&watcher), ChangeKind::Modified)
            .await
            .unwrap();

        let event = timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            WatcherEvent::Error { path, message } => {
                assert_eq!(path.as_deref(), Some("rust-101/module-1/lesson-1.md"));
                assert!(!message.is_empty());
            }
            other => panic!("expected an error event, got {:?}", other),
        }
        assert!(watcher.is_running());
        watcher.stop().await;
    }

    fn ensure_polling() {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            std::env::set_var(POLL_INTERVAL_ENV, "50");
        });
    }

    #[tokio::test]
    async fn test_file_write_reaches_queue() {
        ensure_polling();
        let (_dir, queue, watcher) = fixture();
        let mut settings = watcher.settings.clone();
        settings.debounce = Duration::from_millis(100);
        let watcher = ChangeWatcher::new(
            settings,
            Arc::new(ContentLayout::new(&LayoutConfig::default()).unwrap()),
            Arc::clone(&queue),
        );
        watcher.start().unwrap();
        let mut events = watcher.subscribe();

        // Allow the watcher time to register before creating files.
        sleep(Duration::from_millis(200)).await;
        tokio::fs::write(lesson(&watcher), "# Ownership").await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut found = false;
        while Instant::now() < deadline {
            match timeout(Duration::from_secs(2), events.recv()).await {
                Ok(Ok(WatcherEvent::Enqueued { path, .. })) => {
                    if path == "rust-101/module-1/lesson-1.md" {
                        found = true;
                        break;
                    }
                }
                Ok(Ok(_)) | Err(_) => continue,
                Ok(Err(_)) => break,
            }
        }
        watcher.stop().await;
        assert!(found, "expected an enqueue for the written lesson");
    }
}
