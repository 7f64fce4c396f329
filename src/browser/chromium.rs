use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetCookiesParams};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

use super::{BrowserEngine, BrowserError, BrowserPage, EngineLauncher};
use crate::models::account::{SessionCookie, SessionPayload};

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Launches a Chromium instance over the DevTools protocol.
pub struct ChromiumLauncher {
    headless: bool,
    executable: Option<PathBuf>,
    request_timeout: Duration,
}

impl ChromiumLauncher {
    pub fn new(headless: bool, executable: Option<PathBuf>, request_timeout: Duration) -> Self {
        Self {
            headless,
            executable,
            request_timeout,
        }
    }
}

#[async_trait]
impl EngineLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserEngine>, BrowserError> {
        let mut builder = BrowserConfig::builder().request_timeout(self.request_timeout);
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let alive = Arc::new(AtomicBool::new(true));
        let handler_alive = alive.clone();
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "Browser handler event error");
                }
            }
            handler_alive.store(false, Ordering::SeqCst);
            tracing::warn!("Browser engine connection closed");
        });

        tracing::info!(headless = self.headless, "Browser engine launched");

        Ok(Arc::new(ChromiumEngine {
            shared: Arc::new(Shared {
                browser: Mutex::new(Some(browser)),
                alive,
            }),
            handler_task: Mutex::new(Some(handler_task)),
        }))
    }
}

struct Shared {
    browser: Mutex<Option<Browser>>,
    alive: Arc<AtomicBool>,
}

impl Shared {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Classify a protocol failure: once the connection is gone every error
    /// means the engine itself is unusable.
    fn classify(&self, e: CdpError) -> BrowserError {
        if self.is_alive() {
            BrowserError::Protocol(e.to_string())
        } else {
            BrowserError::Unavailable(e.to_string())
        }
    }

    async fn dispose_context(&self, context_id: BrowserContextId) -> Result<(), BrowserError> {
        let guard = self.browser.lock().await;
        let Some(browser) = guard.as_ref() else {
            return Ok(());
        };
        browser
            .execute(DisposeBrowserContextParams::new(context_id))
            .await
            .map_err(|e| self.classify(e))?;
        Ok(())
    }
}

pub struct ChromiumEngine {
    shared: Arc<Shared>,
    handler_task: Mutex<Option<JoinHandle<()>>>,
}

fn cookie_param(cookie: &SessionCookie) -> CookieParam {
    let mut param = CookieParam::new(cookie.name.clone(), cookie.value.clone());
    param.domain = Some(cookie.domain.clone());
    param.path = Some(cookie.path.clone());
    param.secure = Some(cookie.secure);
    param.http_only = Some(cookie.http_only);
    param
}

#[async_trait]
impl BrowserEngine for ChromiumEngine {
    async fn new_page(&self, session: &SessionPayload) -> Result<Box<dyn BrowserPage>, BrowserError> {
        if !self.shared.is_alive() {
            return Err(BrowserError::Unavailable("engine connection closed".to_string()));
        }

        let (page, context_id) = {
            let guard = self.shared.browser.lock().await;
            let browser = guard
                .as_ref()
                .ok_or_else(|| BrowserError::Unavailable("engine has been shut down".to_string()))?;

            let context_id = browser
                .execute(CreateBrowserContextParams::default())
                .await
                .map_err(|e| self.shared.classify(e))?
                .result
                .browser_context_id;

            let mut target = CreateTargetParams::new("about:blank");
            target.browser_context_id = Some(context_id.clone());

            match browser.new_page(target).await {
                Ok(page) => (page, context_id),
                Err(e) => {
                    let err = self.shared.classify(e);
                    drop(guard);
                    let _ = self.shared.dispose_context(context_id).await;
                    return Err(err);
                }
            }
        };

        let page = ChromiumPage {
            page,
            context_id,
            shared: self.shared.clone(),
            closed: AtomicBool::new(false),
        };

        if let Err(e) = page.apply_session(session).await {
            let _ = page.close().await;
            return Err(e);
        }

        Ok(Box::new(page))
    }

    fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let browser = self.shared.browser.lock().await.take();
        let result = match browser {
            Some(mut browser) => {
                let closed = browser.close().await.map(|_| ());
                let _ = browser.wait().await;
                closed.map_err(|e| BrowserError::Protocol(e.to_string()))
            }
            None => Ok(()),
        };

        self.shared.alive.store(false, Ordering::SeqCst);
        if let Some(task) = self.handler_task.lock().await.take() {
            task.abort();
        }
        result
    }
}

pub struct ChromiumPage {
    page: Page,
    context_id: BrowserContextId,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl ChromiumPage {
    async fn apply_session(&self, session: &SessionPayload) -> Result<(), BrowserError> {
        if !session.cookies.is_empty() {
            let cookies = session.cookies.iter().map(cookie_param).collect();
            self.page
                .execute(SetCookiesParams::new(cookies))
                .await
                .map_err(|e| self.shared.classify(e))?;
        }
        if let Some(user_agent) = &session.user_agent {
            self.page
                .execute(SetUserAgentOverrideParams::new(user_agent.clone()))
                .await
                .map_err(|e| self.shared.classify(e))?;
        }
        Ok(())
    }

    fn ensure_usable(&self) -> Result<(), BrowserError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::Protocol("page already closed".to_string()));
        }
        if !self.shared.is_alive() {
            return Err(BrowserError::Unavailable("engine connection closed".to_string()));
        }
        Ok(())
    }

    async fn elements(&self, selector: &str) -> Result<Vec<Element>, BrowserError> {
        self.ensure_usable()?;
        self.page
            .find_elements(selector)
            .await
            .map_err(|e| self.shared.classify(e))
    }

    async fn first(&self, selector: &str) -> Result<Element, BrowserError> {
        self.elements(selector)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BrowserError::ElementNotFound(selector.to_string()))
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn goto(&self, url: &str, limit: Duration) -> Result<(), BrowserError> {
        self.ensure_usable()?;
        match timeout(limit, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(match self.shared.classify(e) {
                BrowserError::Protocol(reason) => BrowserError::Navigation {
                    url: url.to_string(),
                    reason,
                },
                other => other,
            }),
            Err(_) => Err(BrowserError::timeout(format!("navigation to {}", url), limit)),
        }
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        self.ensure_usable()?;
        let url = self.page.url().await.map_err(|e| self.shared.classify(e))?;
        Ok(url.unwrap_or_default())
    }

    async fn wait_for(&self, selector: &str, limit: Duration) -> Result<(), BrowserError> {
        let deadline = Instant::now() + limit;
        loop {
            if !self.elements(selector).await?.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::timeout(selector, limit));
            }
            sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    async fn exists(&self, selector: &str) -> Result<bool, BrowserError> {
        Ok(!self.elements(selector).await?.is_empty())
    }

    async fn count(&self, selector: &str) -> Result<usize, BrowserError> {
        Ok(self.elements(selector).await?.len())
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let element = self.first(selector).await?;
        element.click().await.map_err(|e| self.shared.classify(e))?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let element = self.first(selector).await?;
        element.click().await.map_err(|e| self.shared.classify(e))?;
        element
            .type_str(text)
            .await
            .map_err(|e| self.shared.classify(e))?;
        Ok(())
    }

    async fn text(&self, selector: &str) -> Result<Option<String>, BrowserError> {
        match self.elements(selector).await?.into_iter().next() {
            Some(element) => element.inner_text().await.map_err(|e| self.shared.classify(e)),
            None => Ok(None),
        }
    }

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>, BrowserError> {
        match self.elements(selector).await?.into_iter().next() {
            Some(element) => element
                .attribute(name)
                .await
                .map_err(|e| self.shared.classify(e)),
            None => Ok(None),
        }
    }

    async fn set_files(&self, selector: &str, files: &[PathBuf]) -> Result<(), BrowserError> {
        let element = self.first(selector).await?;
        let mut params = SetFileInputFilesParams::new(
            files
                .iter()
                .map(|path| path.to_string_lossy().into_owned())
                .collect(),
        );
        params.backend_node_id = Some(element.backend_node_id);
        self.page
            .execute(params)
            .await
            .map_err(|e| self.shared.classify(e))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let page_closed = self
            .page
            .clone()
            .close()
            .await
            .map_err(|e| self.shared.classify(e));
        let context_disposed = self.shared.dispose_context(self.context_id.clone()).await;

        page_closed.and(context_disposed)
    }
}
