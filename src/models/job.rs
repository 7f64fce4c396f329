use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of a listing job in the shared job table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Advisory progress reported while a job is running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobProgress {
    pub percent: u8,
    pub message: String,
}

impl JobProgress {
    pub fn new(percent: u8, message: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            message: message.into(),
        }
    }

    /// Progress at the start of platform `index` out of `total`.
    pub fn at_platform(index: usize, total: usize, platform: &str) -> Self {
        let percent = if total == 0 { 100 } else { index * 100 / total };
        Self::new(percent as u8, format!("Processing {}...", platform))
    }
}

/// Outcome of one platform run within a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlatformResult {
    pub fn listed(listing_url: impl Into<String>) -> Self {
        Self {
            success: true,
            listing_url: Some(listing_url.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            listing_url: None,
            error: Some(error.into()),
        }
    }
}

/// Per-platform outcomes keyed by the platform identifier requested in the job.
pub type JobResult = BTreeMap<String, PlatformResult>;

/// A listing job as claimed from the job table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_id: Uuid,
    pub platforms: Vec<String>,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}
