use async_trait::async_trait;
pub use scribe_common::error::BackendError;
use scribe_common::protocol::{
    ActionKind, ContextId, NavigationTarget, PersistedState, Screenshot, Step,
};
use std::sync::Arc;

/// External capture capability (the host's "capture visible tab").
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Capture the current viewport. `Ok(None)` means the host declined.
    async fn capture(&self) -> Result<Option<Screenshot>, BackendError>;

    /// Resolve once the document signals readiness. Callers bound the wait.
    async fn wait_until_ready(&self) {}
}

/// Key/value storage that survives a context reload.
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn load(&self) -> Result<PersistedState, BackendError>;

    async fn save(&self, state: &PersistedState) -> Result<(), BackendError>;
}

/// Performs navigations the engine deferred while capturing evidence.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn navigate(&self, target: &NavigationTarget) -> Result<(), BackendError>;
}

/// The rest of the host surface a recording context talks to.
#[async_trait]
pub trait HostBridge: Send + Sync {
    /// Identity of the calling context (`getCurrentTabId`).
    async fn current_context_id(&self) -> Result<Option<ContextId>, BackendError>;

    /// Fire-and-forget `stepCaptured` notification.
    async fn step_captured(&self, step: &Step) -> Result<(), BackendError>;

    /// Attach or detach the page listeners for `kinds`.
    async fn set_listeners(&self, _kinds: &[ActionKind], _attached: bool) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Everything a `Recorder` needs from its environment.
#[derive(Clone)]
pub struct RecorderBackends {
    pub capture: Arc<dyn CaptureBackend>,
    pub state: Arc<dyn StateBackend>,
    pub navigator: Arc<dyn Navigator>,
    pub bridge: Arc<dyn HostBridge>,
}

/// Capture backend that never produces an image.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCapture;

#[async_trait]
impl CaptureBackend for NullCapture {
    async fn capture(&self) -> Result<Option<Screenshot>, BackendError> {
        Ok(None)
    }
}
