//! Durable priority job queue backed by SQLite.
//!
//! Jobs are deduplicated by [`JobKey`](courseidx_core::JobKey): at most one
//! queued and one active job exist per key. A newer job with equal or higher
//! priority supersedes the queued one; a lower-priority duplicate is dropped.
//! Workers claim the highest-priority due job whose key is not already active,
//! retry failures with exponential backoff and move exhausted jobs to a capped
//! dead-letter table.

mod store;
mod worker;

use std::time::Duration;

use chrono::{DateTime, Utc};
use courseidx_config::{PriorityConfig, QueueConfig};
use courseidx_core::{Granularity, IndexingJob, JobAction, JobReport, JobTrigger, ProgressRecord};
use serde::Serialize;

pub use store::{JobQueue, QueuedJob};
pub use worker::{HandlerError, JobHandler, WorkerPool};

/// Runtime queue settings.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Delay before a file, item, group or collection-index job becomes claimable.
    pub change_delay: Duration,
    /// Delay before a collection reindex becomes claimable.
    pub collection_delay: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_attempts: u32,
    pub collection_max_attempts: u32,
    pub dead_letter_cap: usize,
    pub progress_ttl: Duration,
    /// How often idle workers look for newly due jobs.
    pub poll_interval: Duration,
    pub event_buffer: usize,
    /// Added to a dead-lettered job's priority when it is replayed.
    pub replay_boost: i64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings::from_config(&QueueConfig::default(), &PriorityConfig::default())
    }
}

impl QueueSettings {
    pub fn from_config(queue: &QueueConfig, priorities: &PriorityConfig) -> Self {
        QueueSettings {
            change_delay: queue.change_delay.as_duration(),
            collection_delay: queue.collection_delay.as_duration(),
            backoff_base: queue.backoff_base.as_duration(),
            backoff_max: queue.backoff_max.as_duration(),
            max_attempts: queue.max_attempts,
            collection_max_attempts: queue.collection_max_attempts,
            dead_letter_cap: queue.dead_letter_cap,
            progress_ttl: queue.progress_ttl.as_duration(),
            poll_interval: queue.poll_interval.as_duration(),
            event_buffer: queue.event_buffer,
            replay_boost: priorities.replay_boost,
        }
    }

    /// Settings with no delays or backoff, for tests and one-shot runs.
    pub fn immediate() -> Self {
        QueueSettings {
            change_delay: Duration::ZERO,
            collection_delay: Duration::ZERO,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    /// How long a newly enqueued job waits before it can be claimed.
    pub fn delay_for(&self, job: &IndexingJob) -> Duration {
        if job.action == JobAction::Delete
            || matches!(job.trigger, JobTrigger::Manual | JobTrigger::Replay)
        {
            Duration::ZERO
        } else if job.granularity == Granularity::Collection && job.action == JobAction::Reindex {
            self.collection_delay
        } else {
            self.change_delay
        }
    }

    pub fn max_attempts_for(&self, job: &IndexingJob) -> u32 {
        if job.granularity == Granularity::Collection {
            self.collection_max_attempts
        } else {
            self.max_attempts
        }
    }

    /// Backoff before retry number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

/// Lifecycle notifications broadcast by the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Enqueued {
        job_id: String,
        key: String,
        priority: i64,
    },
    /// `replaced` was removed from the queue in favour of `by`.
    Superseded { replaced: String, by: String },
    /// `job_id` was not stored because `existing` outranks it.
    Dropped { job_id: String, existing: String },
    Active { job_id: String, attempt: u32 },
    Progress(ProgressRecord),
    Completed { job_id: String, report: JobReport },
    Retrying {
        job_id: String,
        attempt: u32,
        retry_at: DateTime<Utc>,
        error: String,
    },
    DeadLettered {
        job_id: String,
        index: u64,
        error: String,
    },
}

impl QueueEvent {
    pub fn job_id(&self) -> &str {
        match self {
            QueueEvent::Enqueued { job_id, .. }
            | QueueEvent::Dropped { job_id, .. }
            | QueueEvent::Active { job_id, .. }
            | QueueEvent::Completed { job_id, .. }
            | QueueEvent::Retrying { job_id, .. }
            | QueueEvent::DeadLettered { job_id, .. } => job_id,
            QueueEvent::Superseded { replaced, .. } => replaced,
            QueueEvent::Progress(record) => &record.job_id,
        }
    }
}

/// Receives progress updates from a running job.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, job_id: &str, percent: u8, stage: &str, message: Option<&str>);
}

/// Discards progress.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _job_id: &str, _percent: u8, _stage: &str, _message: Option<&str>) {}
}
