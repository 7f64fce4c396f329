//! Per-marketplace automation adapters.

pub mod facebook;
pub mod mercari;
pub mod session;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use strum::Display;

use crate::browser::{BrowserEngine, BrowserError};
use crate::config::AutomationTimeouts;
use crate::models::account::SessionPayload;
use crate::models::listing::{ListingPayload, Platform};

pub use facebook::FacebookProcessor;
pub use mercari::MercariProcessor;

/// Lifecycle steps of a platform run, in the order they must be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    Initialize,
    UploadImages,
    FillForm,
    Submit,
    GetListingUrl,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PlatformError {
    #[error("SessionInvalid: {0}")]
    SessionInvalid(String),

    #[error("ImageUploadError: {0}")]
    ImageUpload(String),

    #[error("FormValidationError: {0}")]
    FormValidation(String),

    #[error("SubmissionRejected: {0}")]
    SubmissionRejected(String),

    #[error("ListingUrlUnavailable: {0}")]
    ListingUrlUnavailable(String),

    #[error("TimeoutError: {0}")]
    Timeout(String),

    #[error("EngineUnavailable: {0}")]
    EngineUnavailable(String),

    #[error("AutomationError: {0}")]
    Automation(String),

    #[error("LifecycleError: {0} attempted before initialize")]
    NotInitialized(Step),
}

impl From<BrowserError> for PlatformError {
    fn from(e: BrowserError) -> Self {
        match e {
            BrowserError::Launch(reason) | BrowserError::Unavailable(reason) => {
                PlatformError::EngineUnavailable(reason)
            }
            BrowserError::Timeout { .. } => PlatformError::Timeout(e.to_string()),
            other => PlatformError::Automation(other.to_string()),
        }
    }
}

/// One publish flow against one marketplace for one job.
///
/// The orchestrator calls `initialize`, `upload_images`, `fill_form`,
/// `submit` and `get_listing_url` in that order, each at most once, and
/// stops at the first error. `cleanup` always runs afterwards and must
/// tolerate having been preceded by a failure at any step.
#[async_trait]
pub trait PlatformProcessor: Send {
    fn platform(&self) -> Platform;

    async fn initialize(&mut self) -> Result<(), PlatformError>;

    async fn upload_images(&mut self, images: &[PathBuf]) -> Result<(), PlatformError>;

    async fn fill_form(&mut self, payload: &ListingPayload) -> Result<(), PlatformError>;

    async fn submit(&mut self) -> Result<(), PlatformError>;

    async fn get_listing_url(&mut self) -> Result<String, PlatformError>;

    /// Release the page and its context. Never fails; problems are logged.
    async fn cleanup(&mut self);
}

/// Builds the processor for a platform run.
pub trait ProcessorFactory: Send + Sync {
    fn create(
        &self,
        platform: Platform,
        engine: Arc<dyn BrowserEngine>,
        session: SessionPayload,
    ) -> Box<dyn PlatformProcessor>;
}

/// Factory for the browser-driven marketplace adapters.
pub struct MarketplaceProcessors {
    timeouts: AutomationTimeouts,
}

impl MarketplaceProcessors {
    pub fn new(timeouts: AutomationTimeouts) -> Self {
        Self { timeouts }
    }
}

impl ProcessorFactory for MarketplaceProcessors {
    fn create(
        &self,
        platform: Platform,
        engine: Arc<dyn BrowserEngine>,
        session: SessionPayload,
    ) -> Box<dyn PlatformProcessor> {
        match platform {
            Platform::Mercari => Box::new(MercariProcessor::new(engine, session, self.timeouts)),
            Platform::Facebook => Box::new(FacebookProcessor::new(engine, session, self.timeouts)),
        }
    }
}

/// Whole-dollar price as the marketplaces expect it in their price inputs.
pub(crate) fn whole_dollars(price: f64) -> Option<u64> {
    let rounded = price.round();
    (rounded >= 1.0 && rounded.is_finite()).then_some(rounded as u64)
}

/// Truncate on a character boundary to a marketplace's length limit.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    text.trim().chars().take(max).collect()
}

/// Extract the path segment that follows `marker` in a URL.
pub(crate) fn segment_after<'a>(url: &'a str, marker: &str) -> Option<&'a str> {
    let start = url.find(marker)? + marker.len();
    let rest = &url[start..];
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let segment = &rest[..end];
    (!segment.is_empty()).then_some(segment)
}
