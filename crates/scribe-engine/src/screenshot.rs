//! Screenshot acquisition with per-action timing policies.
//!
//! Acquisition never fails: every failure path is logged and yields `None`.
//! The retry loop is driven by the pure `transition` function so the policy
//! can be tested without time.

use crate::backend::{BackendError, CaptureBackend};
use crate::config::{CapturePolicy, ScreenshotConfig};
use scribe_common::protocol::{ActionKind, Screenshot};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireState {
    Idle,
    /// 1-based attempt in progress.
    Attempting(u32),
    Succeeded,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireEvent {
    Begin,
    AttemptSucceeded,
    AttemptFailed,
}

pub fn transition(state: AcquireState, event: AcquireEvent, max_attempts: u32) -> AcquireState {
    use AcquireEvent::*;
    use AcquireState::*;

    match (state, event) {
        (Idle, Begin) if max_attempts > 0 => Attempting(1),
        (Idle, Begin) => Exhausted,
        (Attempting(_), AttemptSucceeded) => Succeeded,
        (Attempting(n), AttemptFailed) if n < max_attempts => Attempting(n + 1),
        (Attempting(_), AttemptFailed) => Exhausted,
        (state, _) => state,
    }
}

#[derive(Debug, Error)]
enum AttemptFailure {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("host declined the capture")]
    Declined,
    #[error("capture returned an empty image")]
    Empty,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("capture task failed: {0}")]
    Task(String),
}

#[derive(Clone)]
pub struct ScreenshotOrchestrator {
    backend: Arc<dyn CaptureBackend>,
    config: ScreenshotConfig,
}

impl ScreenshotOrchestrator {
    pub fn new(backend: Arc<dyn CaptureBackend>, config: ScreenshotConfig) -> Self {
        Self { backend, config }
    }

    pub fn policy_for(&self, kind: ActionKind) -> &CapturePolicy {
        self.config.policy_for(kind)
    }

    /// Acquire a screenshot for an action of `kind`, or `None`.
    pub async fn acquire(&self, kind: ActionKind) -> Option<Screenshot> {
        let policy = self.config.policy_for(kind).clone();

        if let Some(bound) = policy.ready_wait()
            && tokio::time::timeout(bound, self.backend.wait_until_ready())
                .await
                .is_err()
        {
            debug!(%kind, "Document not ready after {:?}, capturing anyway", bound);
        }
        if !policy.pre_delay().is_zero() {
            tokio::time::sleep(policy.pre_delay()).await;
        }

        let mut state = transition(AcquireState::Idle, AcquireEvent::Begin, policy.attempts);
        let mut captured = None;
        while let AcquireState::Attempting(attempt) = state {
            let backoff = policy.backoff_before(attempt);
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }

            let event = match self.attempt(policy.timeout()).await {
                Ok(shot) => {
                    captured = Some(shot);
                    AcquireEvent::AttemptSucceeded
                }
                Err(e) => {
                    debug!(%kind, attempt, max = policy.attempts, "Screenshot attempt failed: {}", e);
                    AcquireEvent::AttemptFailed
                }
            };
            state = transition(state, event, policy.attempts);
        }

        if captured.is_none() {
            warn!(%kind, attempts = policy.attempts, "Screenshot unavailable, recording step without it");
        }
        captured
    }

    /// One capture raced against `limit`. On timeout the request is left
    /// running and its result discarded.
    async fn attempt(&self, limit: Duration) -> Result<Screenshot, AttemptFailure> {
        let backend = Arc::clone(&self.backend);
        let request = tokio::spawn(async move { backend.capture().await });

        let joined = tokio::time::timeout(limit, request)
            .await
            .map_err(|_| AttemptFailure::Timeout(limit))?;
        let shot = joined
            .map_err(|e| AttemptFailure::Task(e.to_string()))??
            .ok_or(AttemptFailure::Declined)?;
        if shot.is_empty() {
            return Err(AttemptFailure::Empty);
        }
        Ok(shot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AcquireEvent::*;
    use AcquireState::*;

    #[test]
    fn single_attempt_policy() {
        let s = transition(Idle, Begin, 1);
        assert_eq!(s, Attempting(1));
        assert_eq!(transition(s, AttemptFailed, 1), Exhausted);
        assert_eq!(transition(s, AttemptSucceeded, 1), Succeeded);
    }

    #[test]
    fn retries_until_exhausted() {
        let mut s = transition(Idle, Begin, 3);
        let mut seen = vec![s];
        while let Attempting(_) = s {
            s = transition(s, AttemptFailed, 3);
            seen.push(s);
        }
        assert_eq!(seen, vec![Attempting(1), Attempting(2), Attempting(3), Exhausted]);
    }

    #[test]
    fn terminal_states_absorb_events() {
        assert_eq!(transition(Succeeded, AttemptFailed, 3), Succeeded);
        assert_eq!(transition(Exhausted, Begin, 3), Exhausted);
        assert_eq!(transition(Idle, Begin, 0), Exhausted);
        assert_eq!(transition(Idle, AttemptFailed, 3), Idle);
    }
}
