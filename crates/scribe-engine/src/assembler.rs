//! Turns accepted actions into sequenced, persisted steps.
//!
//! `begin` is synchronous and assigns the sequence at acceptance time;
//! `complete` waits for the screenshot and persists. Steps can complete out
//! of sequence order.

use crate::backend::{BackendError, HostBridge};
use crate::screenshot::ScreenshotOrchestrator;
use crate::state::{Ownership, RecordingSession, RecordingStateStore};
use scribe_common::protocol::{ActionKind, ActionPayload, Step};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AssembleError {
    /// The step is kept in memory; only the write failed.
    #[error("Step #{} recorded but not persisted: {source}", .step.sequence)]
    Persistence {
        step: Box<Step>,
        source: BackendError,
    },

    #[error("Step task did not finish: {0}")]
    Aborted(String),
}

impl AssembleError {
    /// The step that was recorded despite the error, if any.
    pub fn step(&self) -> Option<&Step> {
        match self {
            AssembleError::Persistence { step, .. } => Some(step),
            AssembleError::Aborted(_) => None,
        }
    }
}

/// URL and title captured when the action was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
}

/// A sequenced step without its screenshot.
#[derive(Debug, Clone)]
pub struct StepShell {
    step: Step,
}

impl StepShell {
    pub fn sequence(&self) -> u64 {
        self.step.sequence
    }

    pub fn action(&self) -> ActionKind {
        self.step.action
    }
}

#[derive(Clone)]
pub struct ActionLogAssembler {
    state: Arc<RecordingStateStore>,
    screenshots: ScreenshotOrchestrator,
    bridge: Arc<dyn HostBridge>,
}

impl ActionLogAssembler {
    pub fn new(
        state: Arc<RecordingStateStore>,
        screenshots: ScreenshotOrchestrator,
        bridge: Arc<dyn HostBridge>,
    ) -> Self {
        Self {
            state,
            screenshots,
            bridge,
        }
    }

    /// Assign the next sequence and build the shell. `None` unless this
    /// context is known to be the owner.
    pub fn begin(
        &self,
        action: ActionKind,
        payload: ActionPayload,
        page: PageInfo,
        captured_at_ms: u64,
    ) -> Option<StepShell> {
        self.state
            .with(|session| Self::begin_in(session, action, payload, page, captured_at_ms))
    }

    /// `begin` against an already locked session, so callers can make the
    /// dedup decision and the sequence assignment in one critical section.
    pub fn begin_in(
        session: &mut RecordingSession,
        action: ActionKind,
        payload: ActionPayload,
        page: PageInfo,
        captured_at_ms: u64,
    ) -> Option<StepShell> {
        if session.ownership() != Ownership::Owner {
            return None;
        }
        let sequence = session.next_sequence();
        Some(StepShell {
            step: Step {
                sequence,
                action,
                payload,
                captured_at_ms,
                page_url: page.url,
                page_title: page.title,
                screenshot: None,
            },
        })
    }

    /// Attach a screenshot, push, persist and notify the host.
    pub async fn complete(&self, shell: StepShell) -> Result<Step, AssembleError> {
        let mut step = shell.step;
        if let Some(shot) = self.screenshots.acquire(step.action).await {
            step.attach_screenshot(shot);
        }

        self.state.push_step(step.clone());
        let persisted = self.state.persist().await;

        if let Err(e) = self.bridge.step_captured(&step).await {
            warn!(sequence = step.sequence, "stepCaptured notification failed: {}", e);
        }
        debug!(
            sequence = step.sequence,
            action = %step.action,
            screenshot = step.screenshot.is_some(),
            "Step appended"
        );

        match persisted {
            Ok(()) => Ok(step),
            Err(source) => {
                warn!(sequence = step.sequence, "Persisting step failed: {}", source);
                Err(AssembleError::Persistence {
                    step: Box::new(step),
                    source,
                })
            }
        }
    }

    /// Ownership check, then `begin` and `complete`. `Ok(None)` when this
    /// context may not record.
    pub async fn append(
        &self,
        action: ActionKind,
        payload: ActionPayload,
        page: PageInfo,
        captured_at_ms: u64,
    ) -> Result<Option<Step>, AssembleError> {
        if !self.state.is_owner_context(self.bridge.as_ref()).await {
            debug!(%action, "Not the owner context, append ignored");
            return Ok(None);
        }
        match self.begin(action, payload, page, captured_at_ms) {
            Some(shell) => self.complete(shell).await.map(Some),
            None => Ok(None),
        }
    }
}
