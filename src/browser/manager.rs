use std::sync::Arc;
use tokio::sync::Mutex;

use super::{BrowserEngine, BrowserError, EngineLauncher};

/// Owns the single automation engine for the worker process.
///
/// The engine is launched on first use and reused by every job. A dead engine
/// is only replaced by the next `get_or_create_engine` call; runs already
/// holding the old handle see `Unavailable` errors instead of a restart.
pub struct BrowserManager {
    launcher: Arc<dyn EngineLauncher>,
    engine: Mutex<Option<Arc<dyn BrowserEngine>>>,
}

impl BrowserManager {
    pub fn new(launcher: Arc<dyn EngineLauncher>) -> Self {
        Self {
            launcher,
            engine: Mutex::new(None),
        }
    }

    pub async fn get_or_create_engine(&self) -> Result<Arc<dyn BrowserEngine>, BrowserError> {
        let mut slot = self.engine.lock().await;

        if let Some(engine) = slot.as_ref() {
            if engine.is_alive() {
                return Ok(engine.clone());
            }
            tracing::warn!("Browser engine is no longer alive, launching a new one");
            slot.take();
        }

        tracing::info!("Launching browser engine");
        let engine = self.launcher.launch().await?;
        *slot = Some(engine.clone());
        metrics::counter!("browser_engine_launches_total").increment(1);
        Ok(engine)
    }

    /// Whether an engine is currently provisioned and alive.
    pub async fn is_running(&self) -> bool {
        self.engine
            .lock()
            .await
            .as_ref()
            .is_some_and(|engine| engine.is_alive())
    }

    /// Close the engine, if one was launched.
    pub async fn shutdown(&self) {
        let engine = self.engine.lock().await.take();
        if let Some(engine) = engine {
            tracing::info!("Closing browser engine");
            if let Err(e) = engine.close().await {
                tracing::warn!(error = %e, "Browser engine did not close cleanly");
            }
        }
    }
}
