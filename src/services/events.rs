use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::events;
use crate::models::event::{EventLevel, JobEvent};

/// Storage for the job audit trail.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn append(&self, event: &JobEvent) -> Result<(), sqlx::Error>;
}

pub struct PgEventSink {
    db: PgPool,
}

impl PgEventSink {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventSink for PgEventSink {
    async fn append(&self, event: &JobEvent) -> Result<(), sqlx::Error> {
        events::insert_event(&self.db, event).await
    }
}

/// Best-effort job event logger.
///
/// Appends are bounded by a timeout and their errors are logged and
/// discarded; a failed append never fails or stalls a job run.
#[derive(Clone)]
pub struct JobEventLogger {
    sink: Arc<dyn EventSink>,
    append_timeout: Duration,
}

impl JobEventLogger {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            append_timeout: Duration::from_secs(5),
        }
    }

    pub async fn log(
        &self,
        job_id: Uuid,
        level: EventLevel,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) {
        let event = JobEvent::new(job_id, level, message, metadata);
        match tokio::time::timeout(self.append_timeout, self.sink.append(&event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job_id, level = %level, error = %e, "Failed to append job event");
            }
            Err(_) => {
                tracing::warn!(job_id = %job_id, level = %level, "Timed out appending job event");
            }
        }
    }

    pub async fn info(&self, job_id: Uuid, message: impl Into<String>, metadata: serde_json::Value) {
        self.log(job_id, EventLevel::Info, message, metadata).await
    }

    pub async fn success(&self, job_id: Uuid, message: impl Into<String>, metadata: serde_json::Value) {
        self.log(job_id, EventLevel::Success, message, metadata).await
    }

    pub async fn error(&self, job_id: Uuid, message: impl Into<String>, metadata: serde_json::Value) {
        self.log(job_id, EventLevel::Error, message, metadata).await
    }
}
