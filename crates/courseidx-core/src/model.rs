use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Kind of filesystem change observed by the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// A filesystem change mapped onto course structure.
///
/// `path` is relative to the content root and always uses `/` separators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: String,
    pub collection_id: String,
    pub group_id: Option<String>,
    pub item_id: Option<String>,
    pub observed_at: DateTime<Utc>,
}

macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $s),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok($name::$variant),)+
                    other => Err(format!(
                        concat!("unknown ", stringify!($name), ": {}"),
                        other
                    )),
                }
            }
        }
    };
}

/// Scope of an indexing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    File,
    Item,
    Group,
    Collection,
}

str_enum!(Granularity {
    File => "file",
    Item => "item",
    Group => "group",
    Collection => "collection",
});

/// What an indexing job does to its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Index,
    Reindex,
    Delete,
}

str_enum!(JobAction {
    Index => "index",
    Reindex => "reindex",
    Delete => "delete",
});

/// Who asked for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobTrigger {
    #[default]
    Watcher,
    Manual,
    Startup,
    Replay,
}

str_enum!(JobTrigger {
    Watcher => "watcher",
    Manual => "manual",
    Startup => "startup",
    Replay => "replay",
});

/// Lifecycle state of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

str_enum!(JobState {
    Waiting => "waiting",
    Delayed => "delayed",
    Active => "active",
    Completed => "completed",
    Failed => "failed",
});

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Deduplication key. At most one queued and one active job exist per key.
///
/// `target` is the job's file path, or its item/group id when it has no path,
/// so two group jobs for different groups never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub collection_id: String,
    pub granularity: Granularity,
    pub action: JobAction,
    pub target: String,
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.collection_id, self.granularity, self.action, self.target
        )
    }
}

/// A unit of indexing work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingJob {
    pub id: String,
    pub granularity: Granularity,
    pub action: JobAction,
    pub collection_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub item_id: Option<String>,
    /// Relative to the content root, `/` separated.
    #[serde(default)]
    pub file_path: Option<String>,
    pub priority: i64,
    #[serde(default)]
    pub retry_attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub delay_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trigger: JobTrigger,
}

impl IndexingJob {
    pub fn new(granularity: Granularity, action: JobAction, collection_id: impl Into<String>) -> Self {
        IndexingJob {
            id: uuid::Uuid::new_v4().to_string(),
            granularity,
            action,
            collection_id: collection_id.into(),
            group_id: None,
            item_id: None,
            file_path: None,
            priority: 0,
            retry_attempt: 0,
            enqueued_at: Utc::now(),
            delay_until: None,
            trigger: JobTrigger::Watcher,
        }
    }

    /// File-granularity job for a debounced change.
    pub fn from_change(event: &ChangeEvent, priority: i64) -> Self {
        let action = match event.kind {
            ChangeKind::Removed => JobAction::Delete,
            ChangeKind::Added | ChangeKind::Modified => JobAction::Index,
        };
        let mut job = IndexingJob::new(Granularity::File, action, event.collection_id.clone())
            .with_file(event.path.clone())
            .with_priority(priority);
        job.group_id = event.group_id.clone();
        job.item_id = event.item_id.clone();
        job
    }

    /// Whole-collection job.
    pub fn collection(collection_id: impl Into<String>, action: JobAction) -> Self {
        IndexingJob::new(Granularity::Collection, action, collection_id)
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn with_file(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_trigger(mut self, trigger: JobTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn key(&self) -> JobKey {
        let target = self
            .file_path
            .as_deref()
            .or(self.item_id.as_deref())
            .or(self.group_id.as_deref())
            .unwrap_or_default()
            .to_string();
        JobKey {
            collection_id: self.collection_id.clone(),
            granularity: self.granularity,
            action: self.action,
            target,
        }
    }

    /// A fresh copy for dead-letter replay: new id, one more attempt, boosted priority.
    pub fn replayed(&self, priority_boost: i64) -> Self {
        IndexingJob {
            id: uuid::Uuid::new_v4().to_string(),
            retry_attempt: self.retry_attempt + 1,
            priority: self.priority.saturating_add(priority_boost),
            enqueued_at: Utc::now(),
            delay_until: None,
            trigger: JobTrigger::Replay,
            ..self.clone()
        }
    }

    /// Short human description used in logs.
    pub fn describe(&self) -> String {
        match (&self.file_path, &self.item_id, &self.group_id) {
            (Some(path), _, _) => format!("{} {} {}", self.action, self.granularity, path),
            (None, Some(item), _) => format!("{} item {}/{}", self.action, self.collection_id, item),
            (None, None, Some(group)) => {
                format!("{} group {}/{}", self.action, self.collection_id, group)
            }
            (None, None, None) => format!("{} collection {}", self.action, self.collection_id),
        }
    }
}

/// What happened to a job at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnqueueOutcome {
    /// Stored as a new queued job.
    Enqueued,
    /// Stored, and an older queued job with the same key was removed.
    Superseded { replaced: String },
    /// Not stored; a queued job with the same key and higher priority exists.
    Dropped { existing: String },
}

/// Returned by enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
    #[serde(flatten)]
    pub outcome: EnqueueOutcome,
}

impl JobHandle {
    /// Whether the job now sits in the queue.
    pub fn is_queued(&self) -> bool {
        !matches!(self.outcome, EnqueueOutcome::Dropped { .. })
    }
}

/// Snapshot of queue counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: bool,
}

/// Latest progress for a job. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub job_id: String,
    pub percent: u8,
    pub stage: String,
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

/// A job that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub index: u64,
    pub original_job: IndexingJob,
    pub error_message: String,
    pub error_trace: Option<String>,
    pub failed_at: DateTime<Utc>,
}

/// One embedded chunk of a content file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub collection_id: String,
    pub group_id: Option<String>,
    pub item_id: Option<String>,
    pub file_path: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub content: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub indexed_at: DateTime<Utc>,
    /// Content hash of the source file the record was built from.
    pub version: String,
}

impl VectorRecord {
    /// Stable record id for a chunk position within a file.
    pub fn record_id(collection_id: &str, file_path: &str, chunk_index: usize) -> String {
        format!("{}:{}#{}", collection_id, file_path, chunk_index)
    }
}

/// Selects vector records. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub collection_id: Option<String>,
    pub group_id: Option<String>,
    pub item_id: Option<String>,
    pub file_path: Option<String>,
}

impl RecordFilter {
    pub fn collection(collection_id: impl Into<String>) -> Self {
        RecordFilter {
            collection_id: Some(collection_id.into()),
            ..Default::default()
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn with_file(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    /// True when no field is set, i.e. the filter would match every record.
    pub fn is_unbounded(&self) -> bool {
        self.collection_id.is_none()
            && self.group_id.is_none()
            && self.item_id.is_none()
            && self.file_path.is_none()
    }

    pub fn matches(&self, record: &VectorRecord) -> bool {
        fn field_matches(want: &Option<String>, have: Option<&str>) -> bool {
            match want {
                Some(w) => have == Some(w.as_str()),
                None => true,
            }
        }

        field_matches(&self.collection_id, Some(&record.collection_id))
            && field_matches(&self.group_id, record.group_id.as_deref())
            && field_matches(&self.item_id, record.item_id.as_deref())
            && field_matches(&self.file_path, Some(&record.file_path))
    }
}

/// Summary of what a job did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub chunks_indexed: usize,
    pub records_deleted: usize,
}

impl JobReport {
    pub fn merge(&mut self, other: JobReport) {
        self.files_indexed += other.files_indexed;
        self.files_skipped += other.files_skipped;
        self.chunks_indexed += other.chunks_indexed;
        self.records_deleted += other.records_deleted;
    }

    pub fn skipped() -> Self {
        JobReport {
            files_skipped: 1,
            ..Default::default()
        }
    }
}
