use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use courseidx_core::{
    DeadLetterEntry, EnqueueOutcome, IndexingJob, JobHandle, JobReport, JobState, ProgressRecord,
    QueueStats,
};
use parking_lot::Mutex;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

use super::{ProgressReporter, QueueEvent, QueueSettings};
use crate::QueueError;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS jobs (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        dedup_key TEXT NOT NULL,
        priority INTEGER NOT NULL,
        state TEXT NOT NULL DEFAULT 'waiting',
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        payload TEXT NOT NULL,
        last_error TEXT,
        available_at INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        finished_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(state, priority DESC, seq);
    CREATE INDEX IF NOT EXISTS idx_jobs_key ON jobs(dedup_key, state);
    CREATE TABLE IF NOT EXISTS dead_letters (
        idx INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL,
        payload TEXT NOT NULL,
        error_message TEXT NOT NULL,
        error_trace TEXT,
        failed_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS progress (
        job_id TEXT PRIMARY KEY,
        percent INTEGER NOT NULL,
        stage TEXT NOT NULL,
        message TEXT,
        updated_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS queue_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );";

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn millis(d: std::time::Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// A job as currently stored in the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub job: IndexingJob,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
}

/// A job handed to a worker.
#[derive(Debug, Clone)]
pub(crate) struct ClaimedJob {
    pub job: IndexingJob,
    pub attempt: u32,
}

/// SQLite-backed priority job queue.
///
/// All mutations run in a single transaction under the connection lock, so a
/// job is claimed by exactly one worker and dedup decisions never race.
pub struct JobQueue {
    conn: Mutex<Connection>,
    settings: QueueSettings,
    events: broadcast::Sender<QueueEvent>,
    wakeup: Notify,
}

impl JobQueue {
    /// Open (or create) a persistent queue at the given path.
    ///
    /// Jobs left active by a previous process go back to waiting.
    pub fn open(db_path: &Path, settings: QueueSettings) -> Result<Self, QueueError> {
        Self::init(Self::connect(db_path)?, settings, true)
    }

    /// Open a queue that another process may be working, for inspection and
    /// administration. Active jobs are left alone.
    pub fn attach(db_path: &Path, settings: QueueSettings) -> Result<Self, QueueError> {
        Self::init(Self::connect(db_path)?, settings, false)
    }

    /// Open an in-memory queue (for testing).
    pub fn open_memory(settings: QueueSettings) -> Result<Self, QueueError> {
        Self::init(Connection::open_in_memory()?, settings, true)
    }

    fn connect(db_path: &Path) -> Result<Connection, QueueError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Ok(conn)
    }

    fn init(conn: Connection, settings: QueueSettings, recover: bool) -> Result<Self, QueueError> {
        conn.execute_batch(SCHEMA)?;

        if recover {
            let recovered = conn.execute(
                "UPDATE jobs SET state = 'waiting', updated_at = ?1 WHERE state = 'active'",
                params![now_ms()],
            )?;
            if recovered > 0 {
                info!(recovered, "recovered jobs left active by a previous run");
            }
        }

        let (events, _) = broadcast::channel(settings.event_buffer.max(1));
        Ok(JobQueue {
            conn: Mutex::new(conn),
            settings,
            events,
            wakeup: Notify::new(),
        })
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Subscribe to lifecycle events. Slow receivers observe `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub(crate) fn wakeup(&self) -> &Notify {
        &self.wakeup
    }

    /// Reject all writes from now on.
    #[cfg(test)]
    pub(crate) fn make_read_only(&self) {
        self.conn
            .lock()
            .execute_batch("PRAGMA query_only = ON;")
            .unwrap();
    }

    fn emit(&self, event: QueueEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Add a job, applying dedup supersession.
    pub fn enqueue(&self, job: IndexingJob) -> Result<JobHandle, QueueError> {
        let (handle, event) = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let result = self.enqueue_in(&tx, job)?;
            tx.commit()?;
            result
        };
        self.emit(event);
        self.wakeup.notify_waiters();
        Ok(handle)
    }

    /// Add several jobs in one transaction.
    pub fn enqueue_batch(&self, jobs: Vec<IndexingJob>) -> Result<Vec<JobHandle>, QueueError> {
        let results = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let mut results = Vec::with_capacity(jobs.len());
            for job in jobs {
                results.push(self.enqueue_in(&tx, job)?);
            }
            tx.commit()?;
            results
        };

        let mut handles = Vec::with_capacity(results.len());
        for (handle, event) in results {
            self.emit(event);
            handles.push(handle);
        }
        self.wakeup.notify_waiters();
        Ok(handles)
    }

    fn enqueue_in(
        &self,
        tx: &Transaction<'_>,
        mut job: IndexingJob,
    ) -> Result<(JobHandle, QueueEvent), QueueError> {
        let key = job.key().to_string();
        let now = now_ms();

        let existing: Option<(String, i64)> = tx
            .query_row(
                "SELECT id, priority FROM jobs
                 WHERE dedup_key = ?1 AND state = 'waiting'
                 ORDER BY seq DESC LIMIT 1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let outcome = match existing {
            Some((existing_id, existing_priority)) if job.priority < existing_priority => {
                debug!(
                    job_id = %job.id,
                    existing = %existing_id,
                    key = %key,
                    "dropped lower-priority duplicate"
                );
                let handle = JobHandle {
                    id: job.id.clone(),
                    outcome: EnqueueOutcome::Dropped {
                        existing: existing_id.clone(),
                    },
                };
                let event = QueueEvent::Dropped {
                    job_id: job.id,
                    existing: existing_id,
                };
                return Ok((handle, event));
            }
            Some((existing_id, _)) => {
                tx.execute("DELETE FROM jobs WHERE id = ?1", params![existing_id])?;
                EnqueueOutcome::Superseded {
                    replaced: existing_id,
                }
            }
            None => EnqueueOutcome::Enqueued,
        };

        let delay = self.settings.delay_for(&job);
        let available_at = now.saturating_add(millis(delay));
        job.delay_until = (!delay.is_zero()).then(|| to_datetime(available_at));

        tx.execute(
            "INSERT INTO jobs (id, dedup_key, priority, state, attempts, max_attempts, payload,
                               available_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'waiting', 0, ?4, ?5, ?6, ?7, ?7)",
            params![
                job.id,
                key,
                job.priority,
                self.settings.max_attempts_for(&job),
                serde_json::to_string(&job)?,
                available_at,
                now,
            ],
        )?;
        debug!(job_id = %job.id, key = %key, priority = job.priority, ?delay, "enqueued job");

        let event = match &outcome {
            EnqueueOutcome::Superseded { replaced } => QueueEvent::Superseded {
                replaced: replaced.clone(),
                by: job.id.clone(),
            },
            _ => QueueEvent::Enqueued {
                job_id: job.id.clone(),
                key,
                priority: job.priority,
            },
        };
        Ok((JobHandle { id: job.id, outcome }, event))
    }

    /// Atomically claim the next due job, if any.
    pub(crate) fn claim(&self) -> Result<Option<ClaimedJob>, QueueError> {
        let claimed = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            if is_paused(&tx)? {
                return Ok(None);
            }

            let now = now_ms();
            let row: Option<(String, String, u32)> = tx
                .query_row(
                    "SELECT j.id, j.payload, j.attempts FROM jobs j
                     WHERE j.state = 'waiting' AND j.available_at <= ?1
                       AND NOT EXISTS (
                           SELECT 1 FROM jobs a
                           WHERE a.state = 'active' AND a.dedup_key = j.dedup_key
                       )
                     ORDER BY j.priority DESC, j.seq ASC
                     LIMIT 1",
                    params![now],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            let Some((id, payload, attempts)) = row else {
                return Ok(None);
            };

            let job: IndexingJob = match serde_json::from_str(&payload) {
                Ok(job) => job,
                Err(e) => {
                    tx.execute(
                        "UPDATE jobs SET state = 'failed', last_error = ?2,
                                        finished_at = ?3, updated_at = ?3
                         WHERE id = ?1",
                        params![id, format!("undecodable payload: {}", e), now],
                    )?;
                    tx.commit()?;
                    return Err(e.into());
                }
            };

            let attempt = attempts + 1;
            tx.execute(
                "UPDATE jobs SET state = 'active', attempts = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, attempt, now],
            )?;
            tx.commit()?;
            ClaimedJob { job, attempt }
        };

        self.emit(QueueEvent::Active {
            job_id: claimed.job.id.clone(),
            attempt: claimed.attempt,
        });
        Ok(Some(claimed))
    }

    /// Mark an active job completed.
    pub(crate) fn complete(&self, job_id: &str, report: JobReport) -> Result<(), QueueError> {
        {
            let conn = self.conn.lock();
            let now = now_ms();
            conn.execute(
                "UPDATE jobs SET state = 'completed', last_error = NULL,
                                 finished_at = ?2, updated_at = ?2
                 WHERE id = ?1",
                params![job_id, now],
            )?;
        }
        self.emit(QueueEvent::Completed {
            job_id: job_id.to_string(),
            report,
        });
        // A job with the same key may have been waiting on this one
        self.wakeup.notify_waiters();
        Ok(())
    }

    /// Record a failed attempt: schedule a retry or dead-letter the job.
    pub(crate) fn fail(
        &self,
        job_id: &str,
        error: &str,
        trace: Option<String>,
    ) -> Result<(), QueueError> {
        let event = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let now = now_ms();

            let row: Option<(String, String, u32, u32)> = tx
                .query_row(
                    "SELECT dedup_key, payload, attempts, max_attempts FROM jobs
                     WHERE id = ?1 AND state = 'active'",
                    params![job_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            let Some((key, payload, attempts, max_attempts)) = row else {
                return Err(QueueError::InvalidArgument(format!(
                    "job {} is not active",
                    job_id
                )));
            };

            let event = if attempts >= max_attempts {
                tx.execute(
                    "INSERT INTO dead_letters (job_id, payload, error_message, error_trace, failed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![job_id, payload, error, trace, now],
                )?;
                let index = tx.last_insert_rowid() as u64;
                tx.execute(
                    "UPDATE jobs SET state = 'failed', last_error = ?2,
                                     finished_at = ?3, updated_at = ?3
                     WHERE id = ?1",
                    params![job_id, error, now],
                )?;
                let evicted = tx.execute(
                    "DELETE FROM dead_letters WHERE idx NOT IN
                         (SELECT idx FROM dead_letters ORDER BY idx DESC LIMIT ?1)",
                    params![self.settings.dead_letter_cap.max(1) as i64],
                )?;
                if evicted > 0 {
                    debug!(evicted, "evicted oldest dead letters");
                }
                warn!(job_id, attempts, error, "job moved to dead letters");
                QueueEvent::DeadLettered {
                    job_id: job_id.to_string(),
                    index,
                    error: error.to_string(),
                }
            } else {
                let newer: Option<String> = tx
                    .query_row(
                        "SELECT id FROM jobs WHERE dedup_key = ?1 AND state = 'waiting' LIMIT 1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?;

                match newer {
                    Some(by) => {
                        tx.execute("DELETE FROM jobs WHERE id = ?1", params![job_id])?;
                        debug!(job_id, by = %by, "failed job superseded by a newer one");
                        QueueEvent::Superseded {
                            replaced: job_id.to_string(),
                            by,
                        }
                    }
                    None => {
                        let delay = self.retry_delay(attempts);
                        let retry_at = now.saturating_add(millis(delay));
                        tx.execute(
                            "UPDATE jobs SET state = 'waiting', last_error = ?2,
                                             available_at = ?3, updated_at = ?4
                             WHERE id = ?1",
                            params![job_id, error, retry_at, now],
                        )?;
                        warn!(job_id, attempt = attempts, ?delay, error, "job failed, will retry");
                        QueueEvent::Retrying {
                            job_id: job_id.to_string(),
                            attempt: attempts,
                            retry_at: to_datetime(retry_at),
                            error: error.to_string(),
                        }
                    }
                }
            };
            tx.commit()?;
            event
        };

        self.emit(event);
        self.wakeup.notify_waiters();
        Ok(())
    }

    /// Exponential backoff with up to 25% jitter.
    fn retry_delay(&self, attempt: u32) -> std::time::Duration {
        let base = self.settings.backoff(attempt);
        let spread = millis(base) / 4;
        if spread <= 0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..=spread);
        base + std::time::Duration::from_millis(jitter as u64)
    }

    /// Store the latest progress for a job.
    pub fn update_progress(
        &self,
        job_id: &str,
        percent: u8,
        stage: &str,
        message: Option<&str>,
    ) -> Result<ProgressRecord, QueueError> {
        let record = ProgressRecord {
            job_id: job_id.to_string(),
            percent: percent.min(100),
            stage: stage.to_string(),
            message: message.map(str::to_string),
            at: Utc::now(),
        };
        {
            let conn = self.conn.lock();
            let now = record.at.timestamp_millis();
            conn.execute(
                "INSERT OR REPLACE INTO progress (job_id, percent, stage, message, updated_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.job_id,
                    record.percent,
                    record.stage,
                    record.message,
                    now,
                    now.saturating_add(millis(self.settings.progress_ttl)),
                ],
            )?;
        }
        self.emit(QueueEvent::Progress(record.clone()));
        Ok(record)
    }

    /// Latest unexpired progress for a job.
    pub fn get_progress(&self, job_id: &str) -> Result<Option<ProgressRecord>, QueueError> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT job_id, percent, stage, message, updated_at FROM progress
                 WHERE job_id = ?1 AND expires_at > ?2",
                params![job_id, now_ms()],
                |row| {
                    Ok(ProgressRecord {
                        job_id: row.get(0)?,
                        percent: row.get(1)?,
                        stage: row.get(2)?,
                        message: row.get(3)?,
                        at: to_datetime(row.get(4)?),
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        let conn = self.conn.lock();
        let (waiting, delayed, active, completed, failed): (i64, i64, i64, i64, i64) = conn
            .query_row(
                "SELECT
                    COALESCE(SUM(CASE WHEN state = 'waiting' AND available_at <= ?1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN state = 'waiting' AND available_at > ?1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN state = 'active' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN state = 'completed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN state = 'failed' THEN 1 ELSE 0 END), 0)
                 FROM jobs",
                params![now_ms()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )?;
        Ok(QueueStats {
            waiting: waiting as u64,
            active: active as u64,
            completed: completed as u64,
            failed: failed as u64,
            delayed: delayed as u64,
            paused: is_paused(&conn)?,
        })
    }

    /// Stop handing out jobs. In-flight jobs finish; queued jobs stay.
    pub fn pause(&self) -> Result<(), QueueError> {
        self.set_paused(true)?;
        info!("queue paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<(), QueueError> {
        self.set_paused(false)?;
        info!("queue resumed");
        self.wakeup.notify_waiters();
        Ok(())
    }

    pub fn is_paused(&self) -> Result<bool, QueueError> {
        is_paused(&self.conn.lock())
    }

    fn set_paused(&self, paused: bool) -> Result<(), QueueError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO queue_meta (key, value) VALUES ('paused', ?1)",
            params![if paused { "1" } else { "0" }],
        )?;
        Ok(())
    }

    /// Dead letters, newest first.
    pub fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT idx, payload, error_message, error_trace, failed_at FROM dead_letters
             ORDER BY idx DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], dead_letter_row)?;

        let mut entries = Vec::new();
        for row in rows {
            let (index, payload, error_message, error_trace, failed_at) = row?;
            entries.push(DeadLetterEntry {
                index,
                original_job: serde_json::from_str(&payload)?,
                error_message,
                error_trace,
                failed_at: to_datetime(failed_at),
            });
        }
        Ok(entries)
    }

    pub fn dead_letter(&self, index: u64) -> Result<Option<DeadLetterEntry>, QueueError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT idx, payload, error_message, error_trace, failed_at FROM dead_letters
                 WHERE idx = ?1",
                params![index as i64],
                dead_letter_row,
            )
            .optional()?;

        match row {
            Some((index, payload, error_message, error_trace, failed_at)) => {
                Ok(Some(DeadLetterEntry {
                    index,
                    original_job: serde_json::from_str(&payload)?,
                    error_message,
                    error_trace,
                    failed_at: to_datetime(failed_at),
                }))
            }
            None => Ok(None),
        }
    }

    /// Re-enqueue a dead-lettered job with one more attempt and boosted priority.
    /// The dead-letter entry is kept.
    pub fn replay_dead_letter(&self, index: u64) -> Result<JobHandle, QueueError> {
        let entry = self
            .dead_letter(index)?
            .ok_or(QueueError::DeadLetterNotFound(index))?;
        let job = entry.original_job.replayed(self.settings.replay_boost);
        info!(index, job_id = %job.id, retry_attempt = job.retry_attempt, "replaying dead letter");
        self.enqueue(job)
    }

    /// Delete completed and failed jobs finished at least `older_than_hours`
    /// ago, and expired progress rows. Returns the number of jobs removed.
    pub fn clean_completed(&self, older_than_hours: u64) -> Result<usize, QueueError> {
        let now = now_ms();
        let horizon = i64::try_from(older_than_hours)
            .unwrap_or(i64::MAX)
            .saturating_mul(3_600_000);
        let cutoff = now.saturating_sub(horizon);

        let conn = self.conn.lock();
        let jobs = conn.execute(
            "DELETE FROM jobs WHERE state IN ('completed', 'failed') AND finished_at <= ?1",
            params![cutoff],
        )?;
        let progress = conn.execute("DELETE FROM progress WHERE expires_at <= ?1", params![now])?;
        debug!(jobs, progress, "cleaned queue");
        Ok(jobs)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<QueuedJob>, QueueError> {
        let conn = self.conn.lock();
        let row: Option<(String, String, u32, u32, Option<String>, i64)> = conn
            .query_row(
                "SELECT payload, state, attempts, max_attempts, last_error, available_at
                 FROM jobs WHERE id = ?1",
                params![job_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((payload, state, attempts, max_attempts, last_error, available_at)) = row else {
            return Ok(None);
        };
        let mut state: JobState = state
            .parse()
            .map_err(|e: String| QueueError::InvalidArgument(e))?;
        if state == JobState::Waiting && available_at > now_ms() {
            state = JobState::Delayed;
        }
        Ok(Some(QueuedJob {
            job: serde_json::from_str(&payload)?,
            state,
            attempts,
            max_attempts,
            last_error,
        }))
    }

    pub fn job_status(&self, job_id: &str) -> Result<Option<JobState>, QueueError> {
        Ok(self.get_job(job_id)?.map(|j| j.state))
    }
}

type DeadLetterRow = (u64, String, String, Option<String>, i64);

fn dead_letter_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeadLetterRow> {
    Ok((
        row.get::<_, i64>(0)? as u64,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn is_paused(conn: &Connection) -> Result<bool, QueueError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM queue_meta WHERE key = 'paused'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.as_deref() == Some("1"))
}

impl ProgressReporter for JobQueue {
    fn report(&self, job_id: &str, percent: u8, stage: &str, message: Option<&str>) {
        if let Err(e) = self.update_progress(job_id, percent, stage, message) {
            warn!(job_id, error = %e, "failed to record progress");
        }
    }
}
