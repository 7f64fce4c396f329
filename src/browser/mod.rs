//! Browser automation seam.
//!
//! Platform adapters talk to [`BrowserPage`] only, so the Chromium engine in
//! [`chromium`] can be swapped for a scripted fake in tests.

pub mod chromium;
pub mod manager;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::models::account::SessionPayload;

/// A live automation engine shared by every job in the process.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Open a page in a fresh, isolated browser context carrying the session's cookies.
    async fn new_page(&self, session: &SessionPayload) -> Result<Box<dyn BrowserPage>, BrowserError>;

    /// False once the underlying engine has exited or lost its connection.
    fn is_alive(&self) -> bool;

    async fn close(&self) -> Result<(), BrowserError>;
}

/// Starts a new engine instance.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn BrowserEngine>, BrowserError>;
}

/// One page inside an isolated context. Every wait is bounded by the caller's timeout.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Wait until at least one element matches `selector`.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;

    async fn exists(&self, selector: &str) -> Result<bool, BrowserError>;

    async fn count(&self, selector: &str) -> Result<usize, BrowserError>;

    async fn click(&self, selector: &str) -> Result<(), BrowserError>;

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError>;

    async fn text(&self, selector: &str) -> Result<Option<String>, BrowserError>;

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>, BrowserError>;

    /// Attach local files to a file input.
    async fn set_files(&self, selector: &str, files: &[PathBuf]) -> Result<(), BrowserError>;

    /// Close the page and dispose its context. Repeated calls are no-ops.
    async fn close(&self) -> Result<(), BrowserError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BrowserError {
    #[error("Browser engine could not be launched: {0}")]
    Launch(String),

    #[error("Browser engine is unavailable: {0}")]
    Unavailable(String),

    #[error("Timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { what: String, timeout_ms: u64 },

    #[error("No element matches {0}")]
    ElementNotFound(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Browser protocol error: {0}")]
    Protocol(String),
}

impl BrowserError {
    pub fn timeout(what: impl Into<String>, timeout: Duration) -> Self {
        BrowserError::Timeout {
            what: what.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}
