use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::jobs;
use crate::models::job::{Job, JobProgress, JobResult, JobStatus};

/// Client over the shared job table.
///
/// `claim` is the only mutual-exclusion point in the system: an
/// implementation must guarantee that no two callers, in this process or any
/// other, ever receive the same job.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Move exactly one queued job to running and return it.
    async fn claim(&self) -> Result<Option<Job>, QueueError>;

    /// Record advisory progress. Callers treat failures as non-fatal.
    async fn update_progress(&self, job_id: Uuid, progress: &JobProgress) -> Result<(), QueueError>;

    /// Merge per-platform outcomes into the stored result mapping.
    async fn update_result(&self, job_id: Uuid, result: &JobResult) -> Result<(), QueueError>;

    /// Transition a running job to completed.
    async fn mark_completed(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Transition a running job to failed with a top-level reason.
    async fn mark_failed(&self, job_id: Uuid, reason: &str) -> Result<(), QueueError>;
}

/// PostgreSQL-backed job queue.
pub struct PgJobQueue {
    db: PgPool,
}

impl PgJobQueue {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn finish(&self, job_id: Uuid, status: JobStatus, error: Option<&str>) -> Result<(), QueueError> {
        if jobs::finish_job(&self.db, job_id, status, error).await? {
            Ok(())
        } else {
            Err(QueueError::NotRunning(job_id))
        }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn claim(&self) -> Result<Option<Job>, QueueError> {
        Ok(jobs::claim_next_job(&self.db).await?)
    }

    async fn update_progress(&self, job_id: Uuid, progress: &JobProgress) -> Result<(), QueueError> {
        Ok(jobs::update_progress(&self.db, job_id, progress).await?)
    }

    async fn update_result(&self, job_id: Uuid, result: &JobResult) -> Result<(), QueueError> {
        Ok(jobs::merge_result(&self.db, job_id, result).await?)
    }

    async fn mark_completed(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.finish(job_id, JobStatus::Completed, None).await
    }

    async fn mark_failed(&self, job_id: Uuid, reason: &str) -> Result<(), QueueError> {
        self.finish(job_id, JobStatus::Failed, Some(reason)).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} is not running")]
    NotRunning(Uuid),
}
