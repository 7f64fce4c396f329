use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use super::{PlatformError, Step};
use crate::browser::{BrowserEngine, BrowserPage};
use crate::config::AutomationTimeouts;
use crate::models::account::SessionPayload;
use crate::models::listing::Platform;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on how long `submit` watches for an inline rejection.
const SUBMIT_SETTLE: Duration = Duration::from_secs(5);

/// Page state shared by the marketplace adapters: the engine handle, the
/// decrypted session, and the page opened by `initialize`.
pub struct PageSession {
    platform: Platform,
    engine: Arc<dyn BrowserEngine>,
    session: SessionPayload,
    page: Option<Box<dyn BrowserPage>>,
    pub timeouts: AutomationTimeouts,
}

impl PageSession {
    pub fn new(
        platform: Platform,
        engine: Arc<dyn BrowserEngine>,
        session: SessionPayload,
        timeouts: AutomationTimeouts,
    ) -> Self {
        Self {
            platform,
            engine,
            session,
            page: None,
            timeouts,
        }
    }

    /// Open a page with the session applied and navigate to `url`.
    ///
    /// Landing on a URL containing any of `login_markers` means the site
    /// rejected the session.
    pub async fn open(&mut self, url: &str, login_markers: &[&str]) -> Result<(), PlatformError> {
        let page = self.engine.new_page(&self.session).await?;
        self.page = Some(page);

        let page = self.page(Step::Initialize)?;
        page.goto(url, self.timeouts.navigation).await?;

        let landed = page.current_url().await?;
        if login_markers.iter().any(|marker| landed.contains(marker)) {
            return Err(PlatformError::SessionInvalid(format!(
                "{} redirected to login ({})",
                self.platform, landed
            )));
        }

        tracing::debug!(platform = %self.platform, url = %landed, "Page opened");
        Ok(())
    }

    pub fn page(&self, step: Step) -> Result<&dyn BrowserPage, PlatformError> {
        self.page.as_deref().ok_or(PlatformError::NotInitialized(step))
    }

    /// Wait until `selector` matches at least `expected` elements.
    ///
    /// Returns the last observed count, which is below `expected` when the
    /// bound expired first.
    pub async fn wait_for_count(
        &self,
        step: Step,
        selector: &str,
        expected: usize,
        limit: Duration,
    ) -> Result<usize, PlatformError> {
        let page = self.page(step)?;
        let deadline = Instant::now() + limit;
        loop {
            let seen = page.count(selector).await?;
            if seen >= expected || Instant::now() >= deadline {
                return Ok(seen);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// After the publish click, watch briefly for an inline rejection.
    ///
    /// Returns early once `is_listing` accepts the current URL.
    pub async fn settle_after_submit(
        &self,
        error_selector: &str,
        is_listing: impl Fn(&str) -> bool + Send,
    ) -> Result<(), PlatformError> {
        let page = self.page(Step::Submit)?;
        let deadline = Instant::now() + SUBMIT_SETTLE.min(self.timeouts.element);
        loop {
            if page.exists(error_selector).await? {
                let reason = page
                    .text(error_selector)
                    .await?
                    .map(|text| text.trim().to_string())
                    .filter(|text| !text.is_empty())
                    .unwrap_or_else(|| "listing was not accepted".to_string());
                return Err(PlatformError::SubmissionRejected(reason));
            }
            if is_listing(&page.current_url().await?) || Instant::now() >= deadline {
                return Ok(());
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Poll until `resolve` yields a listing URL or the listing-URL bound expires.
    pub async fn resolve_listing_url(
        &self,
        link_selector: Option<&str>,
        resolve: impl Fn(&str) -> Option<String> + Send,
    ) -> Result<String, PlatformError> {
        let page = self.page(Step::GetListingUrl)?;
        let limit = self.timeouts.listing_url;
        let deadline = Instant::now() + limit;
        let last_seen = loop {
            let current = page.current_url().await?;
            if let Some(url) = resolve(&current) {
                return Ok(url);
            }
            if let Some(selector) = link_selector {
                if let Some(href) = page.attribute(selector, "href").await? {
                    if let Some(url) = resolve(&href) {
                        return Ok(url);
                    }
                }
            }
            if Instant::now() >= deadline {
                break current;
            }
            sleep(POLL_INTERVAL).await;
        };

        Err(PlatformError::ListingUrlUnavailable(format!(
            "no {} listing URL within {}ms (last page {})",
            self.platform,
            limit.as_millis(),
            last_seen
        )))
    }

    /// Close the page if one was opened. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                tracing::warn!(platform = %self.platform, error = %e, "Failed to close page");
            }
        }
    }
}
