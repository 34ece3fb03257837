use crate::cdp::{CdpClient, LaunchOptions};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use scribe_engine::backend::{BackendError, CaptureBackend, HostBridge, Navigator};
use scribe_engine::protocol::{ContextId, NavigationTarget, Screenshot, Step};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A Chromium tab acting as the recording host: it captures the viewport and
/// carries out deferred navigations.
pub struct HeadlessHost {
    client: Mutex<Option<CdpClient>>,
    context: ContextId,
}

impl HeadlessHost {
    pub async fn launch(visible: bool) -> Result<Self, BackendError> {
        info!("Launching headless host (Chromium)...");
        let client = CdpClient::launch(&LaunchOptions::from_env(visible))
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?;
        Ok(Self {
            client: Mutex::new(Some(client)),
            context: ContextId(1),
        })
    }

    pub async fn close(&self) -> Result<(), BackendError> {
        if let Some(client) = self.client.lock().await.take() {
            client
                .close()
                .await
                .map_err(|e| BackendError::Other(e.to_string()))?;
        }
        Ok(())
    }

    async fn page(&self) -> Result<Page, BackendError> {
        self.client
            .lock()
            .await
            .as_ref()
            .map(|c| c.page.clone())
            .ok_or(BackendError::NotReady)
    }

    /// Load `url` in the recording tab.
    pub async fn open(&self, url: &str) -> Result<(), BackendError> {
        debug!("Opening {}", url);
        self.page()
            .await?
            .goto(url)
            .await
            .map_err(|e| BackendError::Navigation(e.to_string()))?;
        Ok(())
    }

    /// Replace the tab's document with `html`.
    pub async fn set_content(&self, html: &str) -> Result<(), BackendError> {
        self.page()
            .await?
            .set_content(html)
            .await
            .map_err(|e| BackendError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn run_script(&self, script: String) -> Result<(), BackendError> {
        self.page()
            .await?
            .evaluate(script)
            .await
            .map_err(|e| BackendError::Navigation(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl CaptureBackend for HeadlessHost {
    async fn capture(&self) -> Result<Option<Screenshot>, BackendError> {
        let page = self.page().await?;
        let bytes = page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(|e| BackendError::Capture(e.to_string()))?;
        Ok(Some(Screenshot::png(bytes)))
    }

    /// Polls `document.readyState`; the caller bounds the wait.
    async fn wait_until_ready(&self) {
        let Ok(page) = self.page().await else {
            return;
        };
        loop {
            let state = page
                .evaluate("document.readyState")
                .await
                .ok()
                .and_then(|r| r.into_value::<String>().ok());
            if state.as_deref() == Some("complete") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[async_trait]
impl Navigator for HeadlessHost {
    async fn navigate(&self, target: &NavigationTarget) -> Result<(), BackendError> {
        match target {
            NavigationTarget::Url {
                url,
                new_view: false,
            } => self.open(url).await,
            NavigationTarget::Url { url, new_view: true } => {
                let guard = self.client.lock().await;
                let client = guard.as_ref().ok_or(BackendError::NotReady)?;
                client
                    .browser
                    .new_page(url.as_str())
                    .await
                    .map_err(|e| BackendError::Navigation(e.to_string()))?;
                Ok(())
            }
            NavigationTarget::SubmitForm { selector } => {
                let selector = serde_json::to_string(selector)?;
                self.run_script(format!(
                    "(() => {{ const f = document.querySelector({}); if (f) {{ f.requestSubmit ? f.requestSubmit() : f.submit(); }} }})()",
                    selector
                ))
                .await
            }
            NavigationTarget::ReplayClick { selector } => {
                let page = self.page().await?;
                page.find_element(selector.as_str())
                    .await
                    .map_err(|e| BackendError::Navigation(e.to_string()))?
                    .click()
                    .await
                    .map_err(|e| BackendError::Navigation(e.to_string()))?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl HostBridge for HeadlessHost {
    async fn current_context_id(&self) -> Result<Option<ContextId>, BackendError> {
        Ok(Some(self.context))
    }

    async fn step_captured(&self, step: &Step) -> Result<(), BackendError> {
        debug!(sequence = step.sequence, action = %step.action, "Step captured");
        Ok(())
    }
}
