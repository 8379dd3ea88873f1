use courseidx_config::CourseIdxConfig;
use courseidx_core::{EnqueueOutcome, IndexingJob, JobAction, JobTrigger};

use super::attach_queue;

pub fn run(config: &CourseIdxConfig, collection: &str) -> anyhow::Result<()> {
    let collection = collection.trim_matches('/');
    if collection.is_empty() || collection.contains('/') {
        anyhow::bail!("'{}' is not a collection name", collection);
    }

    let queue = attach_queue(config)?;
    let job = IndexingJob::collection(collection, JobAction::Reindex)
        .with_priority(config.watch.priorities.manual)
        .with_trigger(JobTrigger::Manual);
    let handle = queue.enqueue(job)?;

    match handle.outcome {
        EnqueueOutcome::Enqueued => println!("Queued reindex of {}: {}", collection, handle.id),
        EnqueueOutcome::Superseded { replaced } => println!(
            "Queued reindex of {}: {} (replaces {})",
            collection, handle.id, replaced
        ),
        EnqueueOutcome::Dropped { existing } => println!(
            "A reindex of {} is already queued: {}",
            collection, existing
        ),
    }
    Ok(())
}
