pub mod config;
pub mod queue;
pub mod reindex;
pub mod run;

use std::path::Path;

use anyhow::Context;
use courseidx_config::CourseIdxConfig;
use courseidx_index::{JobQueue, QueueSettings};

pub fn queue_settings(config: &CourseIdxConfig) -> QueueSettings {
    QueueSettings::from_config(&config.queue, &config.watch.priorities)
}

fn queue_path(config: &CourseIdxConfig) -> anyhow::Result<&Path> {
    config
        .queue
        .path
        .as_deref()
        .map(Path::new)
        .context("queue.path is not set")
}

/// Open the queue for administration without touching jobs a running
/// `courseidx run` holds.
pub fn attach_queue(config: &CourseIdxConfig) -> anyhow::Result<JobQueue> {
    let path = queue_path(config)?;
    JobQueue::attach(path, queue_settings(config))
        .with_context(|| format!("failed to open queue at {}", path.display()))
}

/// Open the queue as its worker process, recovering interrupted jobs.
pub fn open_queue(config: &CourseIdxConfig) -> anyhow::Result<JobQueue> {
    let path = queue_path(config)?;
    JobQueue::open(path, queue_settings(config))
        .with_context(|| format!("failed to open queue at {}", path.display()))
}
