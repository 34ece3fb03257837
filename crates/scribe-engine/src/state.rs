//! Recording session state and its mirror in persistent storage.

use crate::backend::{BackendError, HostBridge, StateBackend};
use crate::dom::NodeId;
use scribe_common::protocol::{ActionKind, ContextId, PersistedState, Point, Step};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Bookkeeping for the most recently accepted action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupState {
    pub last_action_kind: Option<ActionKind>,
    pub last_action_time_ms: Option<u64>,
    /// Index into the document the action happened in; never keeps it alive.
    pub last_target: Option<NodeId>,
    /// Absolute (page) coordinates.
    pub last_coordinates: Option<Point>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingSession {
    active: bool,
    /// Completion order. Use `ordered_steps` for sequence order.
    steps: Vec<Step>,
    sequence_counter: u64,
    dedup: DedupState,
    last_url: Option<String>,
    navigation_flag_at: Option<u64>,
    owner: Option<ContextId>,
    local_context: Option<ContextId>,
}

impl RecordingSession {
    /// Clear everything except the local context identity.
    pub fn reset(&mut self) {
        let local = self.local_context;
        *self = Self {
            local_context: local,
            ..Self::default()
        };
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn next_sequence(&mut self) -> u64 {
        self.sequence_counter += 1;
        self.sequence_counter
    }

    pub fn dedup(&self) -> &DedupState {
        &self.dedup
    }

    pub fn record_accepted(
        &mut self,
        kind: ActionKind,
        time_ms: u64,
        target: Option<NodeId>,
        coordinates: Option<Point>,
    ) {
        self.dedup = DedupState {
            last_action_kind: Some(kind),
            last_action_time_ms: Some(time_ms),
            last_target: target,
            last_coordinates: coordinates,
        };
    }

    pub fn last_url(&self) -> Option<&str> {
        self.last_url.as_deref()
    }

    pub fn observe_url(&mut self, url: impl Into<String>) {
        self.last_url = Some(url.into());
    }

    /// Mark that a navigating click was just recorded at `time_ms`.
    pub fn set_navigation_flag(&mut self, time_ms: u64) {
        self.navigation_flag_at = Some(time_ms);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn ordered_steps(&self) -> Vec<Step> {
        let mut steps = self.steps.clone();
        scribe_common::protocol::sort_by_sequence(&mut steps);
        steps
    }

    pub fn push_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn owner(&self) -> Option<ContextId> {
        self.owner
    }

    pub fn local_context(&self) -> Option<ContextId> {
        self.local_context
    }

    pub fn ownership(&self) -> Ownership {
        match (self.owner, self.local_context) {
            (None, _) => Ownership::Owner,
            (Some(owner), Some(local)) if owner == local => Ownership::Owner,
            (Some(_), Some(_)) => Ownership::Foreign,
            (Some(_), None) => Ownership::Unknown,
        }
    }

    pub fn to_persisted(&self) -> PersistedState {
        PersistedState {
            is_recording: self.active,
            steps: self.steps.clone(),
            owner_context_id: self.owner,
            navigation_flag: self.navigation_flag_at.is_some(),
            navigation_flag_timestamp: self.navigation_flag_at,
        }
    }

    fn apply_persisted(&mut self, persisted: PersistedState) {
        self.active = persisted.is_recording;
        self.owner = persisted.owner_context_id;
        self.navigation_flag_at = if persisted.navigation_flag {
            persisted.navigation_flag_timestamp
        } else {
            None
        };
        self.sequence_counter = persisted
            .steps
            .iter()
            .map(|s| s.sequence)
            .max()
            .unwrap_or(0)
            .max(self.sequence_counter);
        self.steps = persisted.steps;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owner,
    Foreign,
    /// An owner is recorded but the local identity is not known yet.
    Unknown,
}

/// Owns the session for one recording context and mirrors every transition
/// to a `StateBackend`.
pub struct RecordingStateStore {
    session: Mutex<RecordingSession>,
    backend: Arc<dyn StateBackend>,
    /// Serializes snapshot-then-save so saves land in transition order.
    persist_gate: tokio::sync::Mutex<()>,
}

impl RecordingStateStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self {
            session: Mutex::new(RecordingSession::default()),
            backend,
            persist_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RecordingSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the session. Never call across an `.await`.
    pub fn with<R>(&self, f: impl FnOnce(&mut RecordingSession) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn ordered_steps(&self) -> Vec<Step> {
        self.lock().ordered_steps()
    }

    pub fn ownership(&self) -> Ownership {
        self.lock().ownership()
    }

    pub fn set_local_context(&self, local: Option<ContextId>) {
        self.lock().local_context = local;
    }

    /// Reset the session, bind `local` as owner and mark it active.
    pub async fn start(&self, local: Option<ContextId>, url: &str) -> Result<(), BackendError> {
        {
            let mut session = self.lock();
            session.local_context = local;
            session.reset();
            session.active = true;
            session.owner = local;
            session.observe_url(url);
        }
        info!(owner = ?local, "Recording started");
        self.persist().await
    }

    pub async fn stop(&self) -> Result<(), BackendError> {
        let steps = {
            let mut session = self.lock();
            session.active = false;
            session.navigation_flag_at = None;
            session.steps.len()
        };
        info!(steps, "Recording stopped");
        self.persist().await
    }

    /// Restore from storage after a context (re)load. Returns whether the
    /// persisted session is recording.
    pub async fn resume(&self, local: Option<ContextId>, url: &str) -> Result<bool, BackendError> {
        let persisted = self.backend.load().await?;
        let mut session = self.lock();
        session.reset();
        session.local_context = local;
        session.apply_persisted(persisted);
        session.observe_url(url);
        debug!(
            active = session.active,
            owner = ?session.owner,
            steps = session.steps.len(),
            "Session restored"
        );
        Ok(session.active)
    }

    /// Refresh the recording flag and owner from storage, keeping local steps.
    pub async fn reload_owner(&self) -> Result<(), BackendError> {
        let persisted = self.backend.load().await?;
        let mut session = self.lock();
        session.active = persisted.is_recording;
        session.owner = persisted.owner_context_id;
        Ok(())
    }

    /// Whether this context may record. An undetermined answer is retried
    /// against the host and persisted storage; still undetermined means no.
    pub async fn is_owner_context(&self, bridge: &dyn HostBridge) -> bool {
        match self.ownership() {
            Ownership::Owner => return true,
            Ownership::Foreign => return false,
            Ownership::Unknown => {}
        }

        match bridge.current_context_id().await {
            Ok(local) => self.set_local_context(local),
            Err(e) => warn!("Could not resolve context identity: {}", e),
        }
        if let Err(e) = self.reload_owner().await {
            warn!("Could not reload persisted owner: {}", e);
        }
        self.ownership() == Ownership::Owner
    }

    pub fn set_navigation_flag(&self, time_ms: u64) {
        self.lock().set_navigation_flag(time_ms);
    }

    /// Consume the navigation flag. True if it was set less than
    /// `validity_ms` before `now_ms`.
    pub fn take_fresh_navigation_flag(&self, now_ms: u64, validity_ms: u64) -> bool {
        let taken = self.lock().navigation_flag_at.take();
        taken.is_some_and(|at| now_ms.saturating_sub(at) < validity_ms)
    }

    pub fn push_step(&self, step: Step) {
        self.lock().push_step(step);
    }

    pub async fn persist(&self) -> Result<(), BackendError> {
        let _gate = self.persist_gate.lock().await;
        let snapshot = self.lock().to_persisted();
        self.backend.save(&snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateBackend;
    use scribe_common::protocol::ActionPayload;

    fn step(sequence: u64) -> Step {
        Step {
            sequence,
            action: ActionKind::Click,
            payload: ActionPayload::default(),
            captured_at_ms: sequence * 10,
            page_url: "https://x/".into(),
            page_title: "X".into(),
            screenshot: None,
        }
    }

    #[test]
    fn ownership_table() {
        let mut session = RecordingSession::default();
        assert_eq!(session.ownership(), Ownership::Owner);
        session.owner = Some(ContextId(1));
        assert_eq!(session.ownership(), Ownership::Unknown);
        session.local_context = Some(ContextId(2));
        assert_eq!(session.ownership(), Ownership::Foreign);
        session.local_context = Some(ContextId(1));
        assert_eq!(session.ownership(), Ownership::Owner);
    }

    #[test]
    fn ordered_steps_sorts_by_sequence() {
        let mut session = RecordingSession::default();
        session.push_step(step(2));
        session.push_step(step(1));
        let seqs: Vec<u64> = session.ordered_steps().iter().map(|s| s.sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(session.steps()[0].sequence, 2);
    }

    #[tokio::test]
    async fn start_resets_and_persists() {
        let backend = Arc::new(MemoryStateBackend::default());
        let store = RecordingStateStore::new(backend.clone());
        store.with(|s| {
            s.next_sequence();
            s.push_step(step(1));
        });
        store.start(Some(ContextId(4)), "https://x/").await.unwrap();

        let persisted = backend.snapshot();
        assert!(persisted.is_recording);
        assert!(persisted.steps.is_empty());
        assert_eq!(persisted.owner_context_id, Some(ContextId(4)));
        assert_eq!(store.with(|s| s.next_sequence()), 1);
    }

    #[tokio::test]
    async fn resume_continues_sequence_numbers() {
        let backend = Arc::new(MemoryStateBackend::new(PersistedState {
            is_recording: true,
            steps: vec![step(1), step(3)],
            owner_context_id: Some(ContextId(9)),
            ..Default::default()
        }));
        let store = RecordingStateStore::new(backend);
        assert!(store.resume(Some(ContextId(9)), "https://x/").await.unwrap());
        assert_eq!(store.ownership(), Ownership::Owner);
        assert_eq!(store.with(|s| s.next_sequence()), 4);
    }

    #[test]
    fn navigation_flag_is_consumed_once() {
        let store = RecordingStateStore::new(Arc::new(MemoryStateBackend::default()));
        store.set_navigation_flag(1_000);
        assert!(store.take_fresh_navigation_flag(5_999, 5_000));
        assert!(!store.take_fresh_navigation_flag(6_000, 5_000));

        store.set_navigation_flag(1_000);
        assert!(!store.take_fresh_navigation_flag(6_000, 5_000));
    }
}
