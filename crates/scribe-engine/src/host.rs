//! The host side of the recording protocol, plus an in-process adapter that
//! lets a `Recorder` talk to it directly.

use crate::backend::{BackendError, CaptureBackend, HostBridge, Navigator, StateBackend};
use async_trait::async_trait;
use scribe_common::protocol::{
    ContextId, HostRequest, HostResponse, NavigationTarget, Screenshot, Step,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Answers every request exactly once; `stepCaptured` gets no reply.
pub struct HostService {
    state: Arc<dyn StateBackend>,
    capture: Arc<dyn CaptureBackend>,
    navigator: Arc<dyn Navigator>,
}

impl HostService {
    pub fn new(
        state: Arc<dyn StateBackend>,
        capture: Arc<dyn CaptureBackend>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            state,
            capture,
            navigator,
        }
    }

    pub async fn handle(&self, from: ContextId, request: HostRequest) -> Option<HostResponse> {
        let response = match request {
            HostRequest::StartRecording => HostResponse::Success {
                success: self.start_recording(from).await.is_ok(),
            },
            HostRequest::StopRecording => HostResponse::Success {
                success: self.stop_recording().await.is_ok(),
            },
            HostRequest::CaptureScreenshot => HostResponse::Screenshot {
                screenshot: self.capture_for(from).await.map(|s| s.to_base64()),
            },
            HostRequest::GetCurrentTabId => HostResponse::TabId {
                tab_id: Some(from),
            },
            HostRequest::StepCaptured { step } => {
                debug!(context = %from, sequence = step.sequence, action = %step.action, "Step captured");
                return None;
            }
            HostRequest::Navigate { target } => HostResponse::Success {
                success: match self.navigator.navigate(&target).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(context = %from, "Navigation failed: {}", e);
                        false
                    }
                },
            },
        };
        Some(response)
    }

    async fn start_recording(&self, owner: ContextId) -> Result<(), BackendError> {
        let mut state = self.state.load().await?;
        state.is_recording = true;
        state.owner_context_id = Some(owner);
        state.steps.clear();
        state.navigation_flag = false;
        state.navigation_flag_timestamp = None;
        self.state.save(&state).await.inspect_err(|e| {
            warn!("startRecording could not persist: {}", e);
        })?;
        info!(owner = %owner, "Recording bound to context");
        Ok(())
    }

    async fn stop_recording(&self) -> Result<(), BackendError> {
        let mut state = self.state.load().await?;
        state.is_recording = false;
        state.navigation_flag = false;
        state.navigation_flag_timestamp = None;
        self.state.save(&state).await
    }

    /// Captures only for the recording owner.
    async fn capture_for(&self, from: ContextId) -> Option<Screenshot> {
        let owner = match self.state.load().await {
            Ok(state) => state.owner_context_id,
            Err(e) => {
                warn!("Owner lookup failed: {}", e);
                return None;
            }
        };
        if owner.is_some_and(|o| o != from) {
            debug!(context = %from, "Capture refused for non-owner");
            return None;
        }
        match self.capture.capture().await {
            Ok(shot) => shot,
            Err(e) => {
                warn!("Capture failed: {}", e);
                None
            }
        }
    }

    /// An adapter bound to one context.
    pub fn context(self: &Arc<Self>, id: ContextId) -> HostContext {
        HostContext {
            id,
            host: Arc::clone(self),
        }
    }
}

/// One recording context's view of an in-process `HostService`.
#[derive(Clone)]
pub struct HostContext {
    id: ContextId,
    host: Arc<HostService>,
}

impl HostContext {
    pub fn id(&self) -> ContextId {
        self.id
    }

    async fn request(&self, request: HostRequest) -> Result<HostResponse, BackendError> {
        self.host
            .handle(self.id, request)
            .await
            .ok_or_else(|| BackendError::UnexpectedResponse("no reply".into()))
    }
}

#[async_trait]
impl HostBridge for HostContext {
    async fn current_context_id(&self) -> Result<Option<ContextId>, BackendError> {
        match self.request(HostRequest::GetCurrentTabId).await? {
            HostResponse::TabId { tab_id } => Ok(tab_id),
            other => Err(BackendError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    async fn step_captured(&self, step: &Step) -> Result<(), BackendError> {
        self.host
            .handle(
                self.id,
                HostRequest::StepCaptured {
                    step: Box::new(step.clone()),
                },
            )
            .await;
        Ok(())
    }
}

#[async_trait]
impl CaptureBackend for HostContext {
    async fn capture(&self) -> Result<Option<Screenshot>, BackendError> {
        match self.request(HostRequest::CaptureScreenshot).await? {
            HostResponse::Screenshot { screenshot: None } => Ok(None),
            HostResponse::Screenshot {
                screenshot: Some(encoded),
            } => Screenshot::from_base64(&encoded)
                .map(Some)
                .map_err(|e| BackendError::Serialization(e.to_string())),
            other => Err(BackendError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    async fn wait_until_ready(&self) {
        self.host.capture.wait_until_ready().await
    }
}

#[async_trait]
impl Navigator for HostContext {
    async fn navigate(&self, target: &NavigationTarget) -> Result<(), BackendError> {
        match self
            .request(HostRequest::Navigate {
                target: target.clone(),
            })
            .await?
        {
            HostResponse::Success { success: true } => Ok(()),
            HostResponse::Success { success: false } => {
                Err(BackendError::Navigation(format!("host refused {:?}", target)))
            }
            other => Err(BackendError::UnexpectedResponse(format!("{:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullCapture;
    use crate::store::MemoryStateBackend;
    use std::sync::Mutex;

    struct FixedCapture;

    #[async_trait]
    impl CaptureBackend for FixedCapture {
        async fn capture(&self) -> Result<Option<Screenshot>, BackendError> {
            Ok(Some(Screenshot::png(vec![1, 2, 3])))
        }
    }

    #[derive(Default)]
    struct RecordingNavigator(Mutex<Vec<NavigationTarget>>);

    #[async_trait]
    impl Navigator for RecordingNavigator {
        async fn navigate(&self, target: &NavigationTarget) -> Result<(), BackendError> {
            self.0.lock().unwrap().push(target.clone());
            Ok(())
        }
    }

    fn host(capture: Arc<dyn CaptureBackend>) -> (Arc<HostService>, MemoryStateBackend) {
        let state = MemoryStateBackend::default();
        let service = HostService::new(
            Arc::new(state.clone()),
            capture,
            Arc::new(RecordingNavigator::default()),
        );
        (Arc::new(service), state)
    }

    #[tokio::test]
    async fn start_binds_owner_and_gates_capture() {
        let (service, state) = host(Arc::new(FixedCapture));
        let owner = ContextId(1);
        let other = ContextId(2);

        assert_eq!(
            service.handle(owner, HostRequest::StartRecording).await,
            Some(HostResponse::Success { success: true })
        );
        assert_eq!(state.snapshot().owner_context_id, Some(owner));

        match service.handle(owner, HostRequest::CaptureScreenshot).await {
            Some(HostResponse::Screenshot { screenshot: Some(_) }) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            service.handle(other, HostRequest::CaptureScreenshot).await,
            Some(HostResponse::Screenshot { screenshot: None })
        );
    }

    #[tokio::test]
    async fn every_request_but_notifications_is_answered() {
        let (service, _) = host(Arc::new(NullCapture));
        let ctx = ContextId(5);
        assert_eq!(
            service.handle(ctx, HostRequest::GetCurrentTabId).await,
            Some(HostResponse::TabId { tab_id: Some(ctx) })
        );
        assert!(service.handle(ctx, HostRequest::StopRecording).await.is_some());
        let step = Step {
            sequence: 1,
            action: scribe_common::protocol::ActionKind::Click,
            payload: Default::default(),
            captured_at_ms: 0,
            page_url: "https://x/".into(),
            page_title: String::new(),
            screenshot: None,
        };
        assert!(
            service
                .handle(ctx, HostRequest::StepCaptured { step: Box::new(step) })
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn context_adapter_round_trips_screenshots() {
        let (service, _) = host(Arc::new(FixedCapture));
        let ctx = service.context(ContextId(3));
        assert_eq!(ctx.current_context_id().await.unwrap(), Some(ContextId(3)));
        let shot = ctx.capture().await.unwrap().unwrap();
        assert_eq!(shot.data, vec![1, 2, 3]);
    }
}
