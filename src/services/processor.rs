use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::browser::BrowserEngine;
use crate::models::account::AccountStatus;
use crate::models::job::{Job, JobProgress, JobResult, PlatformResult};
use crate::models::listing::{ListingPayload, Platform};
use crate::platforms::{PlatformError, PlatformProcessor, Step};
use crate::services::accounts::is_auth_failure;
use crate::services::images::ImageError;
use crate::services::queue::QueueError;

/// Top-level reason recorded when at least one platform did not list.
pub const SOME_PLATFORMS_FAILED: &str = "Some platforms failed";

const PROGRESS_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// How a job run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Every platform was attempted and at least one failed.
    PlatformsFailed(Vec<String>),
    /// The run stopped outside any single platform.
    Aborted(String),
}

/// A platform run that did not produce a listing.
#[derive(Debug)]
struct PlatformFailure {
    stage: String,
    error: String,
}

impl PlatformFailure {
    fn new(stage: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            error: error.into(),
        }
    }

    fn at(step: Step) -> impl Fn(PlatformError) -> Self {
        move |e| Self::new(step.to_string(), e.to_string())
    }
}

/// Runs one claimed job through every requested platform, serially.
///
/// Platform failures are isolated into `result[platform]`; anything failing
/// outside a platform run fails the whole job. Nothing is propagated to the
/// caller.
pub struct JobProcessor {
    state: AppState,
}

impl JobProcessor {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn process(&self, job: Job) -> JobOutcome {
        let job_id = job.id;
        let started = Instant::now();
        tracing::info!(job_id = %job_id, platforms = ?job.platforms, "Processing listing job");

        let outcome = match self.run(&job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = e.to_string();
                self.fail_job(job_id, "Job processing failed", &reason).await;
                JobOutcome::Aborted(reason)
            }
        };

        match &outcome {
            JobOutcome::Completed => {
                metrics::counter!("listing_jobs_completed_total").increment(1);
            }
            JobOutcome::PlatformsFailed(_) | JobOutcome::Aborted(_) => {
                metrics::counter!("listing_jobs_failed_total").increment(1);
            }
        }
        metrics::histogram!("listing_job_duration_seconds").record(started.elapsed().as_secs_f64());

        tracing::info!(
            job_id = %job_id,
            outcome = ?outcome,
            duration_ms = started.elapsed().as_millis() as u64,
            "Listing job finished"
        );
        outcome
    }

    /// Record a job-level failure: an error event, then the terminal write.
    ///
    /// Also used by the worker when a job task dies without reaching its own
    /// terminal write.
    pub async fn fail_job(&self, job_id: Uuid, message: &str, reason: &str) {
        tracing::error!(job_id = %job_id, error = %reason, "{}", message);
        self.state
            .events
            .error(job_id, message, json!({ "error": reason }))
            .await;
        if let Err(e) = self.state.queue.mark_failed(job_id, reason).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to mark job as failed");
        }
    }

    async fn run(&self, job: &Job) -> Result<JobOutcome, ProcessError> {
        if job.platforms.is_empty() {
            return Err(ProcessError::NoPlatforms);
        }

        let payload: ListingPayload = serde_json::from_value(job.payload.clone())?;
        let result = match self.state.images.stage(job.id, &payload.images).await {
            Ok(images) => {
                let result = self.run_platforms(job, &payload, images.paths()).await;
                images.cleanup().await;
                result
            }
            Err(e) => self.images_unavailable(job, &e).await,
        };

        self.state.queue.update_result(job.id, &result).await?;

        let failed: Vec<String> = result
            .iter()
            .filter(|(_, r)| !r.success)
            .map(|(platform, _)| platform.clone())
            .collect();

        if failed.is_empty() {
            self.state.queue.mark_completed(job.id).await?;
            self.state
                .events
                .success(job.id, "Listing published to all platforms", json!({ "result": result }))
                .await;
            Ok(JobOutcome::Completed)
        } else {
            self.state.queue.mark_failed(job.id, SOME_PLATFORMS_FAILED).await?;
            self.state
                .events
                .error(job.id, SOME_PLATFORMS_FAILED, json!({ "failed": failed, "result": result }))
                .await;
            Ok(JobOutcome::PlatformsFailed(failed))
        }
    }

    /// Without staged images no platform can upload, so every requested
    /// platform records the upload failure.
    async fn images_unavailable(&self, job: &Job, error: &ImageError) -> JobResult {
        let reason = PlatformError::ImageUpload(error.to_string()).to_string();
        tracing::warn!(job_id = %job.id, error = %error, "Listing images could not be staged");
        self.state
            .events
            .error(
                job.id,
                "Listing images could not be staged",
                json!({ "platforms": job.platforms, "error": reason }),
            )
            .await;

        job.platforms
            .iter()
            .map(|name| (name.clone(), PlatformResult::failed(reason.clone())))
            .collect()
    }

    async fn run_platforms(&self, job: &Job, payload: &ListingPayload, images: &[PathBuf]) -> JobResult {
        // One engine handle per job; a crash mid-job surfaces as EngineUnavailable
        // on the remaining platforms instead of a relaunch.
        let engine = self
            .state
            .browsers
            .get_or_create_engine()
            .await
            .map_err(|e| e.to_string());

        let total = job.platforms.len();
        let mut result = JobResult::new();

        for (index, name) in job.platforms.iter().enumerate() {
            self.report_progress(job.id, &JobProgress::at_platform(index, total, name))
                .await;
            self.state
                .events
                .info(
                    job.id,
                    format!("Starting {} listing", name),
                    json!({ "platform": name, "index": index, "total": total }),
                )
                .await;

            let started = Instant::now();
            let platform_result = match self.run_platform(job, name, payload, images, &engine).await {
                Ok(listing_url) => {
                    tracing::info!(job_id = %job.id, platform = %name, url = %listing_url, "Listing published");
                    self.state
                        .events
                        .success(
                            job.id,
                            format!("Listed on {}", name),
                            json!({ "platform": name, "listingUrl": listing_url }),
                        )
                        .await;
                    PlatformResult::listed(listing_url)
                }
                Err(failure) => {
                    tracing::warn!(
                        job_id = %job.id,
                        platform = %name,
                        stage = %failure.stage,
                        error = %failure.error,
                        "Platform run failed"
                    );
                    self.state
                        .events
                        .error(
                            job.id,
                            format!("{} listing failed: {}", name, failure.error),
                            json!({ "platform": name, "stage": failure.stage, "error": failure.error }),
                        )
                        .await;
                    if is_auth_failure(&failure.error) {
                        self.flag_reauth(job, name).await;
                    }
                    PlatformResult::failed(failure.error)
                }
            };

            let outcome = if platform_result.success { "success" } else { "failure" };
            metrics::counter!("listing_platform_runs_total", "platform" => name.clone(), "outcome" => outcome)
                .increment(1);
            metrics::histogram!("listing_platform_run_seconds", "platform" => name.clone())
                .record(started.elapsed().as_secs_f64());

            result.insert(name.clone(), platform_result);
        }

        result
    }

    async fn run_platform(
        &self,
        job: &Job,
        name: &str,
        payload: &ListingPayload,
        images: &[PathBuf],
        engine: &Result<Arc<dyn BrowserEngine>, String>,
    ) -> Result<String, PlatformFailure> {
        let platform: Platform = name
            .parse()
            .map_err(|_| PlatformFailure::new("platform", format!("UnsupportedPlatform: {}", name)))?;

        let session = self
            .state
            .vault
            .get_decrypted_session(job.user_id, platform)
            .await
            .map_err(|e| PlatformFailure::new("credentials", e.to_string()))?;

        let engine = engine.as_ref().map_err(|reason| {
            PlatformFailure::new(
                "engine",
                PlatformError::EngineUnavailable(reason.clone()).to_string(),
            )
        })?;

        let mut processor = self.state.processors.create(platform, engine.clone(), session);
        let run = AssertUnwindSafe(drive(processor.as_mut(), payload, images))
            .catch_unwind()
            .await;
        let outcome = run.unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            tracing::error!(
                job_id = %job.id,
                platform = %processor.platform(),
                panic = %message,
                "Platform adapter panicked"
            );
            Err(PlatformFailure::new(
                "adapter",
                PlatformError::Automation(format!("adapter panicked: {}", message)).to_string(),
            ))
        });
        processor.cleanup().await;
        outcome
    }

    async fn report_progress(&self, job_id: Uuid, progress: &JobProgress) {
        match tokio::time::timeout(
            PROGRESS_WRITE_TIMEOUT,
            self.state.queue.update_progress(job_id, progress),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to update job progress");
            }
            Err(_) => {
                tracing::warn!(job_id = %job_id, "Timed out updating job progress");
            }
        }
    }

    async fn flag_reauth(&self, job: &Job, name: &str) {
        let Ok(platform) = name.parse::<Platform>() else {
            return;
        };
        match self
            .state
            .accounts
            .set_status(job.user_id, platform, AccountStatus::NeedsReauth)
            .await
        {
            Ok(()) => {
                tracing::info!(job_id = %job.id, platform = %platform, "Account flagged for re-authentication");
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, platform = %platform, error = %e, "Failed to flag account for re-authentication");
            }
        }
    }
}

/// Text carried by a panic payload, when it has any.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run the publish steps in order, stopping at the first failure.
async fn drive(
    processor: &mut dyn PlatformProcessor,
    payload: &ListingPayload,
    images: &[PathBuf],
) -> Result<String, PlatformFailure> {
    processor
        .initialize()
        .await
        .map_err(PlatformFailure::at(Step::Initialize))?;
    processor
        .upload_images(images)
        .await
        .map_err(PlatformFailure::at(Step::UploadImages))?;
    processor
        .fill_form(payload)
        .await
        .map_err(PlatformFailure::at(Step::FillForm))?;
    processor
        .submit()
        .await
        .map_err(PlatformFailure::at(Step::Submit))?;
    processor
        .get_listing_url()
        .await
        .map_err(PlatformFailure::at(Step::GetListingUrl))
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Job has no platforms")]
    NoPlatforms,

    #[error("Invalid listing payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Job store error: {0}")]
    Queue(#[from] QueueError),
}
