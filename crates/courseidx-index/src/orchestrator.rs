//! Executes indexing jobs: read, extract, chunk, embed, store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use courseidx_config::PipelineSettings;
use courseidx_core::{
    ContentSource, Granularity, IndexingJob, JobAction, JobReport, RecordFilter, VectorRecord,
    VectorStore,
};
use futures::{stream, StreamExt, TryStreamExt};
use tracing::{debug, info, instrument, warn};

use crate::chunkers::{Chunker, ChunkerConfig, RecursiveChunker};
use crate::content_hash::content_hash;
use crate::embedders::Embedder;
use crate::extractors::{create_extractors, ExtractorRegistry};
use crate::layout::{ContentFilter, ContentLayout};
use crate::queue::{HandlerError, JobHandler, NoopProgress, ProgressReporter};
use crate::{Chunk, EmbeddingResult, IndexError, IndexingError};

/// Embedding fan-out.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Chunks per embedder call.
    pub batch_size: usize,
    /// Embedder calls in flight per file.
    pub embed_concurrency: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        OrchestratorSettings::from_config(&PipelineSettings::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(pipeline: &PipelineSettings) -> Self {
        OrchestratorSettings {
            batch_size: pipeline.embedding.batch_size.max(1),
            embed_concurrency: pipeline.embed_concurrency.max(1),
        }
    }
}

/// Runs [`IndexingJob`]s against injected collaborators.
pub struct IndexingOrchestrator {
    source: Arc<dyn ContentSource>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    layout: Arc<ContentLayout>,
    filter: Arc<ContentFilter>,
    extractors: ExtractorRegistry,
    chunker: Arc<dyn Chunker>,
    progress: Arc<dyn ProgressReporter>,
    settings: OrchestratorSettings,
}

/// Item files of one collection, split the way a collection job walks them.
#[derive(Debug, Default)]
struct CollectionFiles {
    groups: BTreeMap<String, Vec<String>>,
    other: Vec<String>,
    index: Option<String>,
}

impl CollectionFiles {
    fn paths(&self) -> impl Iterator<Item = &str> {
        self.groups
            .values()
            .flatten()
            .chain(self.other.iter())
            .chain(self.index.iter())
            .map(String::as_str)
    }
}

impl IndexingOrchestrator {
    /// Recursive chunking with default sizes, plain text and lesson extractors,
    /// no progress reporting.
    pub fn new(
        source: Arc<dyn ContentSource>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        layout: Arc<ContentLayout>,
        filter: Arc<ContentFilter>,
    ) -> Self {
        IndexingOrchestrator {
            source,
            embedder,
            store,
            layout,
            filter,
            extractors: create_extractors(&["json".into(), "yaml".into(), "yml".into()]),
            chunker: Arc::new(RecursiveChunker::new(ChunkerConfig::default())),
            progress: Arc::new(NoopProgress),
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = extractors;
        self
    }

    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Run one job.
    pub async fn run(&self, job: &IndexingJob) -> Result<JobReport, IndexError> {
        if job.action == JobAction::Delete {
            return self.delete(job).await;
        }
        match job.granularity {
            Granularity::File => self.run_file(job).await,
            Granularity::Item => self.run_item(job).await,
            Granularity::Group => self.run_group(job).await,
            Granularity::Collection => self.run_collection(job).await,
        }
    }

    /// Collection directories directly under the content root.
    pub async fn discover_collections(&self) -> Result<Vec<String>, IndexError> {
        let mut collections: Vec<String> = self
            .source
            .list("")
            .await?
            .into_iter()
            .filter(|e| e.is_dir && !e.name.starts_with('.') && !self.filter.is_ignored(&e.path))
            .map(|e| e.name)
            .collect();
        collections.sort();
        Ok(collections)
    }

    async fn run_file(&self, job: &IndexingJob) -> Result<JobReport, IndexError> {
        let path = job
            .file_path
            .as_deref()
            .ok_or_else(|| IndexError::InvalidJob(format!("file job {} has no path", job.id)))?;
        self.index_single(job, path).await
    }

    /// Index one file for a File or Item job. Content errors skip the file
    /// instead of failing the job, since a retry would read the same bytes.
    async fn index_single(&self, job: &IndexingJob, path: &str) -> Result<JobReport, IndexError> {
        match self.index_file(&job.collection_id, path, Some(&job.id)).await {
            Ok(report) => Ok(report),
            Err(e) if e.is_content_error() => {
                warn!(job_id = %job.id, path, error = %e, "skipping unreadable file");
                self.progress
                    .report(&job.id, 100, "skipped", Some(&e.to_string()));
                Ok(JobReport::skipped())
            }
            Err(e) => Err(e),
        }
    }

    async fn run_item(&self, job: &IndexingJob) -> Result<JobReport, IndexError> {
        let item_id = job
            .item_id
            .as_deref()
            .ok_or_else(|| IndexError::InvalidJob(format!("item job {} has no item id", job.id)))?;

        let mut report = JobReport::default();
        if job.action == JobAction::Reindex {
            report.records_deleted += self
                .store
                .delete_by_filter(&RecordFilter::collection(&job.collection_id).with_item(item_id))
                .await?;
        }

        let path = match &job.file_path {
            Some(path) => Some(path.clone()),
            None => self.resolve_item(job, item_id).await?,
        };
        let Some(path) = path else {
            debug!(job_id = %job.id, item_id, "item not found, nothing to index");
            self.progress.report(&job.id, 100, "done", Some("item not found"));
            return Ok(report);
        };

        report.merge(self.index_single(job, &path).await?);
        Ok(report)
    }

    async fn run_group(&self, job: &IndexingJob) -> Result<JobReport, IndexError> {
        let group_id = job
            .group_id
            .as_deref()
            .ok_or_else(|| IndexError::InvalidJob(format!("group job {} has no group id", job.id)))?;

        let mut report = JobReport::default();
        if job.action == JobAction::Reindex {
            report.records_deleted += self
                .store
                .delete_by_filter(
                    &RecordFilter::collection(&job.collection_id).with_group(group_id),
                )
                .await?;
        }

        let files = self.scan_collection(&job.collection_id).await?;
        let items = files.groups.get(group_id).cloned().unwrap_or_default();
        report.merge(self.index_files(job, &items, 5, 95, "item").await?);

        self.progress.report(&job.id, 100, "done", None);
        Ok(report)
    }

    async fn run_collection(&self, job: &IndexingJob) -> Result<JobReport, IndexError> {
        let collection_id = job.collection_id.as_str();
        let mut report = JobReport::default();

        if job.action == JobAction::Reindex {
            report.records_deleted += self.store.delete_by_collection(collection_id).await?;
            self.progress.report(
                &job.id,
                5,
                "clear",
                Some(&format!("removed {} records", report.records_deleted)),
            );
        }

        let files = self.scan_collection(collection_id).await?;
        if job.action == JobAction::Index {
            report.records_deleted += self.prune_missing(collection_id, &files).await?;
        }
        let group_count = files.groups.len();
        // Groups share 10..80, everything else 80..95
        for (position, (group_id, items)) in files.groups.iter().enumerate() {
            let start = 10 + (70 * position / group_count.max(1)) as u8;
            let end = 10 + (70 * (position + 1) / group_count.max(1)) as u8;
            self.progress.report(
                &job.id,
                start,
                "group",
                Some(&format!(
                    "indexing group {} of {} ({})",
                    position + 1,
                    group_count,
                    group_id
                )),
            );
            report.merge(self.index_files(job, items, start, end, "item").await?);
        }

        let mut rest = files.other.clone();
        rest.extend(files.index.iter().cloned());
        report.merge(self.index_files(job, &rest, 80, 95, "file").await?);

        info!(
            collection_id,
            groups = group_count,
            files = report.files_indexed,
            skipped = report.files_skipped,
            chunks = report.chunks_indexed,
            "collection indexed"
        );
        self.progress.report(&job.id, 100, "done", None);
        Ok(report)
    }

    /// Remove records of files that are no longer part of the collection,
    /// such as files deleted while nothing was watching.
    async fn prune_missing(
        &self,
        collection_id: &str,
        files: &CollectionFiles,
    ) -> Result<usize, IndexError> {
        let present: HashSet<&str> = files.paths().collect();
        let mut removed = 0;
        for path in self.store.file_paths(collection_id).await? {
            if present.contains(path.as_str()) {
                continue;
            }
            removed += self
                .store
                .delete_by_filter(&RecordFilter::collection(collection_id).with_file(&path))
                .await?;
            debug!(collection_id, path = %path, "pruned records of missing file");
        }
        if removed > 0 {
            info!(collection_id, removed, "pruned stale records");
        }
        Ok(removed)
    }

    /// Index a list of files, skipping content and embedding failures.
    /// Progress moves proportionally through `from..to`.
    async fn index_files(
        &self,
        job: &IndexingJob,
        files: &[String],
        from: u8,
        to: u8,
        noun: &str,
    ) -> Result<JobReport, IndexError> {
        let mut report = JobReport::default();
        let total = files.len();
        let span = to.saturating_sub(from) as usize;

        for (position, path) in files.iter().enumerate() {
            let percent = from + (span * position / total.max(1)) as u8;
            self.progress.report(
                &job.id,
                percent,
                "index",
                Some(&format!("indexing {} {} of {}", noun, position + 1, total)),
            );

            match self.index_file(&job.collection_id, path, None).await {
                Ok(file_report) => report.merge(file_report),
                Err(e) if e.is_skippable() => {
                    warn!(job_id = %job.id, path = %path, error = %e, "skipping file");
                    report.files_skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Index one file, replacing all of its previous records.
    ///
    /// A file that no longer exists has its records removed instead.
    #[instrument(skip(self, job_id))]
    async fn index_file(
        &self,
        collection_id: &str,
        path: &str,
        job_id: Option<&str>,
    ) -> Result<JobReport, IndexError> {
        let progress = |percent: u8, stage: &str, message: Option<&str>| {
            if let Some(id) = job_id {
                self.progress.report(id, percent, stage, message);
            }
        };

        progress(10, "read", None);
        let content = match self.source.read(path).await {
            Ok(content) => content,
            Err(e) if e.is_not_found() => {
                let removed = self
                    .store
                    .delete_by_filter(&RecordFilter::collection(collection_id).with_file(path))
                    .await?;
                debug!(removed, "file is gone, removed its records");
                progress(100, "done", Some("file no longer exists"));
                return Ok(JobReport {
                    records_deleted: removed,
                    ..Default::default()
                });
            }
            Err(e) => return Err(e.into()),
        };

        let version = content_hash(&content);
        let extractor = self.extractors.for_path(path).ok_or_else(|| IndexError::Parse {
            path: path.to_string(),
            reason: "no extractor for this file type".to_string(),
        })?;
        let text = extractor
            .extract(&content, path)
            .await
            .map_err(|source| match source {
                IndexingError::JsonError(e) => IndexError::Parse {
                    path: path.to_string(),
                    reason: e.to_string(),
                },
                IndexingError::YamlError(e) => IndexError::Parse {
                    path: path.to_string(),
                    reason: e.to_string(),
                },
                source => IndexError::Extraction {
                    path: path.to_string(),
                    source,
                },
            })?;

        let chunks = self
            .chunker
            .chunk(&text)
            .await
            .map_err(|source| IndexError::Extraction {
                path: path.to_string(),
                source,
            })?;
        progress(30, "split", Some(&format!("{} chunks", chunks.len())));

        let embeddings = self.embed_chunks(path, &chunks).await?;
        progress(60, "embed", None);

        let info = self.layout.map_relative(path);
        let group_id = info.as_ref().and_then(|i| i.group_id.clone());
        let item_id = info.as_ref().and_then(|i| i.item_id.clone());
        let indexed_at = Utc::now();
        let chunk_count = chunks.len();

        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                let mut metadata = HashMap::new();
                metadata.insert("extractor".to_string(), extractor.name().to_string());
                metadata.insert("chunker".to_string(), self.chunker.name().to_string());
                metadata.insert("model".to_string(), self.embedder.model().to_string());
                metadata.insert("start_line".to_string(), chunk.start_line.to_string());
                metadata.insert("end_line".to_string(), chunk.end_line.to_string());
                VectorRecord {
                    id: VectorRecord::record_id(collection_id, path, chunk.chunk_index),
                    collection_id: collection_id.to_string(),
                    group_id: group_id.clone(),
                    item_id: item_id.clone(),
                    file_path: path.to_string(),
                    chunk_index: chunk.chunk_index,
                    total_chunks: chunk.total_chunks,
                    content: chunk.content,
                    embedding,
                    metadata,
                    indexed_at,
                    version: version.clone(),
                }
            })
            .collect();

        progress(90, "store", None);
        let replaced = self.store.replace_file(collection_id, path, records).await?;
        progress(100, "done", None);
        debug!(chunks = chunk_count, replaced, "file indexed");

        Ok(JobReport {
            files_indexed: 1,
            chunks_indexed: chunk_count,
            records_deleted: replaced.saturating_sub(chunk_count),
            ..Default::default()
        })
    }

    /// Embed chunk texts in batches, `embed_concurrency` calls at a time,
    /// preserving chunk order.
    async fn embed_chunks(&self, path: &str, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, IndexError> {
        let to_error = |source: IndexingError| IndexError::Embedding {
            path: path.to_string(),
            source,
        };

        // Owned batches keep the stream future Send for the worker pool
        let batches: Vec<Vec<String>> = chunks
            .chunks(self.settings.batch_size.max(1))
            .map(|batch| batch.iter().map(|c| c.content.clone()).collect())
            .collect();

        let results: Vec<EmbeddingResult> = stream::iter(batches)
            .map(|batch| {
                let embedder = Arc::clone(&self.embedder);
                async move {
                    let texts: Vec<&str> = batch.iter().map(String::as_str).collect();
                    embedder.embed(&texts).await
                }
            })
            .buffered(self.settings.embed_concurrency.max(1))
            .try_collect()
            .await
            .map_err(to_error)?;

        let embeddings: Vec<Vec<f32>> = results.into_iter().flat_map(|r| r.embeddings).collect();
        if embeddings.len() != chunks.len() {
            return Err(to_error(IndexingError::EmbeddingError(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            ))));
        }
        Ok(embeddings)
    }

    /// Walk a collection directory and sort its indexable files.
    async fn scan_collection(&self, collection_id: &str) -> Result<CollectionFiles, IndexError> {
        let mut files = CollectionFiles::default();
        let mut pending = vec![collection_id.to_string()];

        while let Some(dir) = pending.pop() {
            let entries = match self.source.list(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };

            for entry in entries {
                if entry.name.starts_with('.') || self.filter.is_ignored(&entry.path) {
                    continue;
                }
                if entry.is_dir {
                    if entry.path.split('/').count() < self.filter.max_depth() {
                        pending.push(entry.path);
                    }
                    continue;
                }
                if !self.filter.accepts(&entry.path) || self.extractors.for_path(&entry.path).is_none() {
                    continue;
                }
                let Some(info) = self.layout.map_relative(&entry.path) else {
                    continue;
                };
                match (info.is_collection_index, info.group_id, info.item_id) {
                    (true, _, _) if files.index.is_none() => files.index = Some(entry.path),
                    (_, Some(group_id), Some(_)) => {
                        files.groups.entry(group_id).or_default().push(entry.path)
                    }
                    _ => files.other.push(entry.path),
                }
            }
        }

        for items in files.groups.values_mut() {
            items.sort();
        }
        files.other.sort();
        Ok(files)
    }

    /// Find the file for an item id within the job's group, or anywhere in
    /// the collection when the job names no group.
    async fn resolve_item(&self, job: &IndexingJob, item_id: &str) -> Result<Option<String>, IndexError> {
        let files = self.scan_collection(&job.collection_id).await?;
        let candidates: Vec<&String> = match &job.group_id {
            Some(group_id) => files.groups.get(group_id).into_iter().flatten().collect(),
            None => files.groups.values().flatten().chain(files.other.iter()).collect(),
        };

        Ok(candidates
            .into_iter()
            .find(|path| {
                self.layout
                    .map_relative(path)
                    .and_then(|info| info.item_id)
                    .as_deref()
                    == Some(item_id)
            })
            .cloned())
    }

    async fn delete(&self, job: &IndexingJob) -> Result<JobReport, IndexError> {
        let base = RecordFilter::collection(&job.collection_id);
        let removed = match job.granularity {
            Granularity::Collection => self.store.delete_by_collection(&job.collection_id).await?,
            Granularity::File | Granularity::Item => {
                let filter = match (&job.file_path, &job.item_id) {
                    (Some(path), _) => base.with_file(path),
                    (None, Some(item_id)) => base.with_item(item_id),
                    (None, None) => {
                        return Err(IndexError::InvalidJob(format!(
                            "delete job {} names no file or item",
                            job.id
                        )))
                    }
                };
                self.store.delete_by_filter(&filter).await?
            }
            Granularity::Group => {
                let group_id = job.group_id.as_deref().ok_or_else(|| {
                    IndexError::InvalidJob(format!("group delete {} has no group id", job.id))
                })?;
                self.store.delete_by_filter(&base.with_group(group_id)).await?
            }
        };

        debug!(job_id = %job.id, removed, "deleted records");
        self.progress.report(&job.id, 100, "done", None);
        Ok(JobReport {
            records_deleted: removed,
            ..Default::default()
        })
    }
}

#[async_trait]
impl JobHandler for IndexingOrchestrator {
    async fn handle(&self, job: &IndexingJob) -> Result<JobReport, HandlerError> {
        let started = Instant::now();
        let report = self.run(job).await?;
        info!(
            job_id = %job.id,
            files = report.files_indexed,
            skipped = report.files_skipped,
            chunks = report.chunks_indexed,
            deleted = report.records_deleted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "{}",
            job.describe()
        );
        Ok(report)
    }
}
