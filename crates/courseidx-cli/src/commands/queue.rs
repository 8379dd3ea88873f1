use courseidx_config::CourseIdxConfig;

use super::attach_queue;

pub fn stats(config: &CourseIdxConfig, json: bool) -> anyhow::Result<()> {
    let queue = attach_queue(config)?;
    let stats = queue.stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Queue Status");
    println!("============");
    println!("  waiting:   {}", stats.waiting);
    println!("  delayed:   {}", stats.delayed);
    println!("  active:    {}", stats.active);
    println!("  completed: {}", stats.completed);
    println!("  failed:    {}", stats.failed);
    if stats.paused {
        println!();
        println!("Queue is paused.");
    }
    Ok(())
}

pub fn progress(config: &CourseIdxConfig, job_id: &str) -> anyhow::Result<()> {
    let queue = attach_queue(config)?;
    let Some(job) = queue.get_job(job_id)? else {
        anyhow::bail!("job {} not found", job_id);
    };

    println!("{}: {}", job_id, job.job.describe());
    println!(
        "  state: {} (attempt {} of {})",
        queue.job_status(job_id)?.unwrap_or(job.state),
        job.attempts,
        job.max_attempts
    );
    if let Some(error) = &job.last_error {
        println!("  last error: {}", error);
    }

    match queue.get_progress(job_id)? {
        Some(progress) => {
            let message = progress.message.as_deref().unwrap_or("");
            println!(
                "  progress: {}% {} {} ({})",
                progress.percent,
                progress.stage,
                message,
                progress.at.to_rfc3339()
            );
        }
        None => println!("  progress: none recorded"),
    }
    Ok(())
}

pub fn dead_letters(config: &CourseIdxConfig, limit: usize) -> anyhow::Result<()> {
    let queue = attach_queue(config)?;
    let entries = queue.list_dead_letters(limit)?;

    if entries.is_empty() {
        println!("No dead letters.");
        return Ok(());
    }

    println!("Dead letters (newest first):");
    for entry in &entries {
        println!(
            "  [{}] {} {} (replays: {})",
            entry.index,
            entry.failed_at.format("%Y-%m-%d %H:%M:%S"),
            entry.original_job.describe(),
            entry.original_job.retry_attempt
        );
        println!("      error: {}", entry.error_message);
    }
    Ok(())
}

pub fn replay(config: &CourseIdxConfig, index: u64) -> anyhow::Result<()> {
    let queue = attach_queue(config)?;
    let handle = queue.replay_dead_letter(index)?;
    if handle.is_queued() {
        println!("Replayed dead letter {} as job {}", index, handle.id);
    } else {
        println!("Dead letter {} not replayed: a higher-priority job is already queued", index);
    }
    Ok(())
}

pub fn set_paused(config: &CourseIdxConfig, paused: bool) -> anyhow::Result<()> {
    let queue = attach_queue(config)?;
    if paused {
        queue.pause()?;
        println!("Queue paused.");
    } else {
        queue.resume()?;
        println!("Queue resumed.");
    }
    Ok(())
}

pub fn clean(config: &CourseIdxConfig, older_than_hours: u64) -> anyhow::Result<()> {
    let queue = attach_queue(config)?;
    let removed = queue.clean_completed(older_than_hours)?;
    println!(
        "Removed {} finished job(s) older than {}h",
        removed, older_than_hours
    );
    Ok(())
}
