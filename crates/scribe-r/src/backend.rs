use crate::server::{Outbound, RemoteServer, ServerHandle};
use async_trait::async_trait;
use scribe_engine::backend::{BackendError, CaptureBackend, HostBridge, Navigator};
use scribe_engine::protocol::{
    ContextId, HostEnvelope, HostRequest, HostResponse, NavigationTarget, Screenshot, Step,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<HostResponse>>>>;

/// A host reached over the websocket bridge. Each request carries an id and
/// the reply with the same id completes it.
pub struct RemoteHost {
    local_addr: SocketAddr,
    command_tx: broadcast::Sender<Outbound>,
    pending: Pending,
    next_id: AtomicU64,
    reply_timeout: Duration,
    dispatcher: JoinHandle<()>,
}

impl RemoteHost {
    pub async fn launch(port: u16) -> Result<Self, BackendError> {
        info!("Launching remote host on port {}", port);
        let handle = RemoteServer::new(port).start().await?;
        Ok(Self::with_handle(handle, DEFAULT_REPLY_TIMEOUT))
    }

    pub fn with_handle(handle: ServerHandle, reply_timeout: Duration) -> Self {
        let pending: Pending = Arc::default();
        let routes = pending.clone();
        let response_rx = handle.response_rx.clone();
        let dispatcher = tokio::spawn(async move {
            let mut rx = response_rx.lock().await;
            while let Some(reply) = rx.recv().await {
                let waiter = routes
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&reply.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(reply.body);
                    }
                    None => warn!("Dropping reply #{} with no waiting request", reply.id),
                }
            }
        });

        Self {
            local_addr: handle.local_addr,
            command_tx: handle.command_tx,
            pending,
            next_id: AtomicU64::new(1),
            reply_timeout,
            dispatcher,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn wait_for_connection(&self) -> Result<(), BackendError> {
        if self.command_tx.receiver_count() > 0 {
            return Ok(());
        }
        info!("Waiting for host extension to connect...");
        tokio::time::timeout(CONNECT_TIMEOUT, async {
            while self.command_tx.receiver_count() == 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .map_err(|_| BackendError::Timeout {
            operation: "waiting for host connection".into(),
        })?;
        info!("Host extension connected.");
        Ok(())
    }

    /// Sends `body`; resolves with the reply, or `None` for notifications.
    pub async fn request(&self, body: HostRequest) -> Result<Option<HostResponse>, BackendError> {
        self.wait_for_connection().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let expects_response = body.expects_response();

        let rx = expects_response.then(|| {
            let (tx, rx) = oneshot::channel();
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, tx);
            rx
        });

        if let Err(e) = self.command_tx.send(HostEnvelope { id, body }) {
            self.forget(id);
            return Err(BackendError::Other(format!("Failed to broadcast: {}", e)));
        }

        let Some(rx) = rx else {
            return Ok(None);
        };
        match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(_)) => Err(BackendError::ConnectionLost),
            Err(_) => {
                self.forget(id);
                Err(BackendError::Timeout {
                    operation: format!("reply to request #{}", id),
                })
            }
        }
    }

    async fn expect_reply(&self, body: HostRequest) -> Result<HostResponse, BackendError> {
        self.request(body)
            .await?
            .ok_or_else(|| BackendError::UnexpectedResponse("missing reply".into()))
    }

    fn forget(&self, id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub async fn start_recording(&self) -> Result<bool, BackendError> {
        self.expect_success(HostRequest::StartRecording).await
    }

    pub async fn stop_recording(&self) -> Result<bool, BackendError> {
        self.expect_success(HostRequest::StopRecording).await
    }

    async fn expect_success(&self, body: HostRequest) -> Result<bool, BackendError> {
        match self.expect_reply(body).await? {
            HostResponse::Success { success } => Ok(success),
            other => Err(BackendError::UnexpectedResponse(format!("{:?}", other))),
        }
    }
}

impl Drop for RemoteHost {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

#[async_trait]
impl CaptureBackend for RemoteHost {
    async fn capture(&self) -> Result<Option<Screenshot>, BackendError> {
        match self.expect_reply(HostRequest::CaptureScreenshot).await? {
            HostResponse::Screenshot { screenshot: None } => Ok(None),
            HostResponse::Screenshot {
                screenshot: Some(encoded),
            } => Screenshot::from_base64(&encoded)
                .map(Some)
                .map_err(|e| BackendError::Serialization(e.to_string())),
            other => Err(BackendError::UnexpectedResponse(format!("{:?}", other))),
        }
    }
}

#[async_trait]
impl HostBridge for RemoteHost {
    async fn current_context_id(&self) -> Result<Option<ContextId>, BackendError> {
        match self.expect_reply(HostRequest::GetCurrentTabId).await? {
            HostResponse::TabId { tab_id } => Ok(tab_id),
            other => Err(BackendError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    async fn step_captured(&self, step: &Step) -> Result<(), BackendError> {
        debug!(sequence = step.sequence, "Notifying host of captured step");
        self.request(HostRequest::StepCaptured {
            step: Box::new(step.clone()),
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Navigator for RemoteHost {
    async fn navigate(&self, target: &NavigationTarget) -> Result<(), BackendError> {
        let body = HostRequest::Navigate {
            target: target.clone(),
        };
        if self.expect_success(body).await? {
            Ok(())
        } else {
            Err(BackendError::Navigation(format!("host refused {:?}", target)))
        }
    }
}
