use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventLevel {
    Info,
    Success,
    Error,
}

/// Append-only audit entry tied to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub level: EventLevel,
    pub message: String,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(
        job_id: Uuid,
        level: EventLevel,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            job_id,
            level,
            message: message.into(),
            metadata,
            timestamp: Utc::now(),
        }
    }
}
