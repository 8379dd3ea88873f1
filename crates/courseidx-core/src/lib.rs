mod error;
mod model;
mod traits;

pub use error::{SourceError, StoreError};
pub use model::{
    ChangeEvent, ChangeKind, DeadLetterEntry, EnqueueOutcome, Granularity, IndexingJob,
    JobAction, JobHandle, JobKey, JobReport, JobState, JobTrigger, ProgressRecord, QueueStats,
    RecordFilter, VectorRecord,
};
pub use traits::{ContentSource, Entry, VectorStore};
