//! Owning handle on a Chromium process driven over the DevTools protocol.

use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Handler, Page};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ChromiumError {
    #[error("Invalid browser options: {0}")]
    Options(String),
    #[error("Browser profile directory: {0}")]
    Profile(#[from] std::io::Error),
    #[error("Browser {stage} failed: {source}")]
    Protocol {
        stage: &'static str,
        #[source]
        source: CdpError,
    },
    #[error("Browser event loop panicked: {0}")]
    EventLoop(#[from] tokio::task::JoinError),
}

fn stage(stage: &'static str) -> impl FnOnce(CdpError) -> ChromiumError {
    move |source| ChromiumError::Protocol { stage, source }
}

/// Where Chromium keeps its profile for the lifetime of the host.
#[derive(Debug)]
enum Profile {
    /// Caller-provided; left in place on shutdown.
    Kept(PathBuf),
    /// Removed when dropped.
    Scratch(TempDir),
}

impl Profile {
    fn path(&self) -> &Path {
        match self {
            Profile::Kept(path) => path,
            Profile::Scratch(dir) => dir.path(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Show a browser window instead of running headless.
    pub visible: bool,
    pub executable: Option<PathBuf>,
    /// Reuse this profile instead of a throwaway one.
    pub profile_dir: Option<PathBuf>,
}

impl LaunchOptions {
    /// Reads `CHROME_BIN` and `SCRIBE_USER_DATA_DIR`.
    pub fn from_env(visible: bool) -> Self {
        Self {
            visible,
            executable: std::env::var_os("CHROME_BIN").map(PathBuf::from),
            profile_dir: std::env::var_os("SCRIBE_USER_DATA_DIR").map(PathBuf::from),
        }
    }

    fn profile(&self) -> Result<Profile, ChromiumError> {
        match &self.profile_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Ok(Profile::Kept(dir.clone()))
            }
            None => Ok(Profile::Scratch(
                tempfile::Builder::new()
                    .prefix("scribe-chromium-")
                    .tempdir()?,
            )),
        }
    }
}

pub struct CdpClient {
    pub browser: Browser,
    pub page: Page,
    events: JoinHandle<()>,
    profile: Profile,
}

impl CdpClient {
    pub async fn launch(options: &LaunchOptions) -> Result<Self, ChromiumError> {
        let profile = options.profile()?;
        info!(
            visible = options.visible,
            profile = %profile.path().display(),
            "Starting Chromium"
        );

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .user_data_dir(profile.path());
        if options.visible {
            builder = builder.with_head();
        }
        if let Some(executable) = &options.executable {
            builder = builder.chrome_executable(executable);
        }
        let config = builder.build().map_err(ChromiumError::Options)?;

        let (browser, handler) = Browser::launch(config).await.map_err(stage("launch"))?;
        let events = tokio::spawn(drive(handler));

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(stage("open tab"))?;
        dismiss_dialogs(&page).await?;

        Ok(Self {
            browser,
            page,
            events,
            profile,
        })
    }

    /// Closes the browser and waits for its event loop; a scratch profile
    /// is removed afterwards.
    pub async fn close(mut self) -> Result<(), ChromiumError> {
        self.browser.close().await.map_err(stage("close"))?;
        self.events.await?;
        if let Profile::Scratch(dir) = self.profile
            && let Err(e) = dir.close()
        {
            debug!("Profile cleanup: {}", e);
        }
        Ok(())
    }
}

/// Pumps protocol messages until the connection goes away.
async fn drive(mut handler: Handler) {
    while let Some(message) = handler.next().await {
        if let Err(e) = message {
            warn!("Chromium event: {}", e);
        }
    }
    debug!("Chromium event loop ended");
}

/// An open alert or confirm blocks screenshots, so every dialog is accepted.
async fn dismiss_dialogs(page: &Page) -> Result<(), ChromiumError> {
    let mut opened = page
        .event_listener::<EventJavascriptDialogOpening>()
        .await
        .map_err(stage("dialog subscription"))?;
    let page = page.clone();
    tokio::spawn(async move {
        while let Some(dialog) = opened.next().await {
            debug!(message = %dialog.message, "Accepting dialog");
            if let Err(e) = page.execute(HandleJavaScriptDialogParams::new(true)).await {
                warn!("Dialog left open: {}", e);
            }
        }
    });
    Ok(())
}
