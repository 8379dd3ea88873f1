use std::sync::Arc;

use anyhow::Context;
use courseidx_config::CourseIdxConfig;
use courseidx_core::{IndexingJob, JobAction, JobTrigger};
use courseidx_index::{
    create_chunker, create_embedder, create_extractors, open_store, spawn_maintenance,
    ChangeWatcher, ChunkerConfig, ContentFilter, ContentLayout, FsContentSource,
    IndexingOrchestrator, OrchestratorSettings, WatchSettings,
};
use tracing::{info, warn};

use super::open_queue;

/// Run workers (and the watcher) until Ctrl+C.
pub async fn run(config: CourseIdxConfig, watch: bool, seed: bool) -> anyhow::Result<()> {
    let queue = Arc::new(open_queue(&config)?);

    let source = Arc::new(
        FsContentSource::new(&config.content.root)
            .with_context(|| format!("content root {} is not usable", config.content.root))?,
    );
    let layout = Arc::new(ContentLayout::new(&config.layout)?);
    let filter = Arc::new(ContentFilter::from_config(&config.content)?);
    let embedder = create_embedder(&config.pipeline.embedding)?;
    let chunker = create_chunker(
        config.pipeline.chunker,
        ChunkerConfig::from(&config.pipeline),
    )?;
    let store = open_store(&config.store)?;

    let orchestrator = IndexingOrchestrator::new(source, embedder, store, layout.clone(), filter)
        .with_chunker(chunker)
        .with_extractors(create_extractors(&config.layout.structured_extensions))
        .with_progress(queue.clone())
        .with_settings(OrchestratorSettings::from_config(&config.pipeline));

    if seed {
        let collections = orchestrator.discover_collections().await?;
        let jobs: Vec<IndexingJob> = collections
            .iter()
            .map(|collection| {
                IndexingJob::collection(collection.as_str(), JobAction::Index)
                    .with_priority(config.watch.priorities.other)
                    .with_trigger(JobTrigger::Startup)
            })
            .collect();
        let handles = queue.enqueue_batch(jobs)?;
        let queued = handles.iter().filter(|h| h.is_queued()).count();
        info!(collections = collections.len(), queued, "seeded startup jobs");
    }

    let workers = queue.start_workers(config.queue.concurrency, Arc::new(orchestrator))?;
    let maintenance = spawn_maintenance(
        queue.clone(),
        config.queue.maintenance_interval.as_duration(),
        config.queue.retention_hours,
    );

    let watcher = if watch && config.watch.enabled {
        let watcher = ChangeWatcher::new(WatchSettings::from_config(&config), layout, queue.clone());
        watcher.start()?;
        Some(watcher)
    } else {
        None
    };

    info!(
        name = config.name.as_deref().unwrap_or("courseidx"),
        root = %config.content.root,
        workers = workers.len(),
        watching = watcher.is_some(),
        "indexing pipeline running, press Ctrl+C to stop"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C, shutting down");
    }

    info!("shutting down");
    if let Some(watcher) = watcher {
        watcher.stop().await;
    }
    workers.shutdown().await;
    maintenance.shutdown().await;

    let stats = queue.stats()?;
    info!(
        waiting = stats.waiting,
        delayed = stats.delayed,
        failed = stats.failed,
        "stopped"
    );
    Ok(())
}
