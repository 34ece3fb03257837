//! The controller that ties event capture, classification, locators,
//! screenshots and the action log together for one recording context.

use crate::assembler::{ActionLogAssembler, AssembleError, PageInfo, StepShell};
use crate::backend::{BackendError, RecorderBackends};
use crate::capture::{
    self, ChangeEvent, ClickEvent, ClickOutcome, EventOutcome, InputDebouncer, InputEvent,
    NavigationEvent, PendingStep, SubmitEvent, Suppression, Verdict,
};
use crate::config::ScribeConfig;
use crate::dom::{Document, NodeId};
use crate::locator::{LocatorGenerator, bounded};
use crate::navigation::{NavigationObserver, classify};
use crate::screenshot::ScreenshotOrchestrator;
use crate::state::RecordingStateStore;
use async_trait::async_trait;
use scribe_common::formatter::{MASK, mask_sensitive};
use scribe_common::protocol::{
    ActionKind, ActionPayload, ElementLocatorInfo, FieldValue, NavigationTarget, Step,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Host error: {0}")]
    Backend(#[from] BackendError),
}

struct Inner {
    config: ScribeConfig,
    backends: RecorderBackends,
    state: Arc<RecordingStateStore>,
    assembler: ActionLogAssembler,
    locator: LocatorGenerator,
    debouncer: Mutex<InputDebouncer>,
}

impl Inner {
    fn debouncer(&self) -> MutexGuard<'_, InputDebouncer> {
        self.debouncer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One recording context. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<Inner>,
}

impl Recorder {
    pub fn new(config: ScribeConfig, backends: RecorderBackends) -> Self {
        let state = Arc::new(RecordingStateStore::new(Arc::clone(&backends.state)));
        let screenshots =
            ScreenshotOrchestrator::new(Arc::clone(&backends.capture), config.screenshot.clone());
        let assembler =
            ActionLogAssembler::new(Arc::clone(&state), screenshots, Arc::clone(&backends.bridge));
        Self {
            inner: Arc::new(Inner {
                locator: LocatorGenerator::new(config.locator.clone()),
                config,
                backends,
                state,
                assembler,
                debouncer: Mutex::new(InputDebouncer::default()),
            }),
        }
    }

    pub fn config(&self) -> &ScribeConfig {
        &self.inner.config
    }

    pub fn state(&self) -> &RecordingStateStore {
        &self.inner.state
    }

    pub fn is_recording(&self) -> bool {
        self.inner.state.is_active()
    }

    /// Steps recorded so far, ordered by sequence.
    pub fn steps(&self) -> Vec<Step> {
        self.inner.state.ordered_steps()
    }

    /// Input debounce timers still waiting to fire.
    pub fn pending_inputs(&self) -> usize {
        self.inner.debouncer().pending_count()
    }

    /// Resolves once every scheduled input has fired and its step is in the log.
    pub async fn flush_inputs(&self) {
        let mut idle = self.inner.debouncer().subscribe();
        // The sender lives as long as `inner`, so this only ends when idle.
        let _ = idle.wait_for(|idle| *idle).await;
    }

    // ============================================================
    // Session lifecycle
    // ============================================================

    /// Bind this context as owner, reset the session and attach listeners.
    pub async fn start(&self, doc: &Document) -> Result<(), RecorderError> {
        self.inner.debouncer().cancel_all();
        let local = self.inner.backends.bridge.current_context_id().await?;
        self.inner.state.start(local, doc.url()).await?;
        self.inner
            .backends
            .bridge
            .set_listeners(&ActionKind::LISTENED, true)
            .await?;
        Ok(())
    }

    /// Mark inactive, drop pending input timers and detach listeners.
    pub async fn stop(&self) -> Result<(), RecorderError> {
        self.inner.debouncer().cancel_all();
        self.inner.state.stop().await?;
        self.inner
            .backends
            .bridge
            .set_listeners(&ActionKind::LISTENED, false)
            .await?;
        Ok(())
    }

    /// Restore persisted state in a freshly loaded context. Returns whether
    /// this context should record.
    pub async fn resume(&self, doc: &Document) -> Result<bool, RecorderError> {
        let local = self.inner.backends.bridge.current_context_id().await?;
        let active = self.inner.state.resume(local, doc.url()).await?;
        if !active {
            return Ok(false);
        }
        let owner = self
            .inner
            .state
            .is_owner_context(self.inner.backends.bridge.as_ref())
            .await;
        if owner {
            self.inner
                .backends
                .bridge
                .set_listeners(&ActionKind::LISTENED, true)
                .await?;
            info!(url = %doc.url(), "Recording resumed");
        } else {
            debug!(url = %doc.url(), "Recording active in another context");
        }
        Ok(owner)
    }

    /// Recording must be active and this context must own it.
    async fn admit(&self) -> Result<(), Suppression> {
        if !self.inner.state.is_active() {
            return Err(Suppression::NotRecording);
        }
        if !self
            .inner
            .state
            .is_owner_context(self.inner.backends.bridge.as_ref())
            .await
        {
            return Err(Suppression::ForeignContext);
        }
        Ok(())
    }

    fn locate(&self, doc: &Document, target: NodeId) -> Option<ElementLocatorInfo> {
        match self.inner.locator.generate(doc, target) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Dropping event, no locator: {}", e);
                None
            }
        }
    }

    fn spawn_completion(&self, shell: StepShell) -> PendingStep {
        let sequence = shell.sequence();
        let inner = Arc::clone(&self.inner);
        PendingStep::new(
            sequence,
            tokio::spawn(async move { inner.assembler.complete(shell).await }),
        )
    }

    fn suppressed(kind: ActionKind, reason: Suppression) -> EventOutcome {
        debug!(%kind, ?reason, "Event suppressed");
        EventOutcome::Suppressed(reason)
    }

    // ============================================================
    // Event handlers
    // ============================================================

    pub async fn handle_click(&self, doc: &Document, event: ClickEvent) -> ClickOutcome {
        if let Err(reason) = self.admit().await {
            return ClickOutcome::passive(Self::suppressed(ActionKind::Click, reason));
        }

        let coordinates = capture::coordinates(doc, event.target, event.client);
        let classification = classify(doc, event.target);
        let deferred = classification
            .target
            .clone()
            .filter(|_| classification.will_navigate);
        let element = self.locate(doc, event.target);

        let accepted = self.inner.state.with(|session| {
            let verdict = capture::judge_click(
                session.dedup(),
                &self.inner.config.dedup,
                event.target,
                coordinates.absolute,
                event.time_ms,
            );
            if let Verdict::Suppress(reason) = verdict {
                return Err(reason);
            }
            let Some(element) = element else {
                return Err(Suppression::LocatorUnavailable);
            };
            session.record_accepted(
                ActionKind::Click,
                event.time_ms,
                Some(event.target),
                Some(coordinates.absolute),
            );
            if deferred.is_some() {
                session.set_navigation_flag(event.time_ms);
            }
            let payload = ActionPayload {
                element: Some(element),
                coordinates: Some(coordinates),
                value: None,
                page_metadata: Some(doc.metadata()),
            };
            ActionLogAssembler::begin_in(
                session,
                ActionKind::Click,
                payload,
                page_of(doc),
                event.time_ms,
            )
            .ok_or(Suppression::ForeignContext)
        });

        let shell = match accepted {
            Ok(shell) => shell,
            // A duplicate of a deferred click must not navigate on its own.
            Err(reason @ (Suppression::RapidFire | Suppression::Proximity))
                if deferred.is_some() =>
            {
                return ClickOutcome {
                    default_prevented: true,
                    result: Self::suppressed(ActionKind::Click, reason),
                };
            }
            Err(reason) => return ClickOutcome::passive(Self::suppressed(ActionKind::Click, reason)),
        };

        match deferred {
            Some(target) => {
                debug!(sequence = shell.sequence(), href = ?classification.href, "Deferring navigation");
                ClickOutcome {
                    default_prevented: true,
                    result: EventOutcome::Recorded(self.spawn_navigating_click(shell, target)),
                }
            }
            None => ClickOutcome::passive(EventOutcome::Recorded(self.spawn_completion(shell))),
        }
    }

    /// Screenshot, persist, wait the grace delay, then navigate. The
    /// navigation is attempted even when persisting failed.
    fn spawn_navigating_click(&self, shell: StepShell, target: NavigationTarget) -> PendingStep {
        let sequence = shell.sequence();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let result = inner.assembler.complete(shell).await;
            tokio::time::sleep(inner.config.navigation.grace_delay()).await;
            if let Err(e) = inner.backends.navigator.navigate(&target).await {
                warn!(sequence, ?target, "Deferred navigation failed: {}", e);
            }
            result
        });
        PendingStep::new(sequence, handle)
    }

    /// Debounced per field; the last value wins once the field is quiet.
    pub async fn handle_input(&self, doc: &Document, event: InputEvent) -> EventOutcome {
        if let Err(reason) = self.admit().await {
            return Self::suppressed(ActionKind::Input, reason);
        }
        let Some(element) = self.locate(doc, event.target) else {
            return Self::suppressed(ActionKind::Input, Suppression::LocatorUnavailable);
        };

        let payload = ActionPayload {
            element: Some(element),
            coordinates: None,
            value: Some(FieldValue::Text(self.field_text(doc, event.target, &event.value))),
            page_metadata: Some(doc.metadata()),
        };
        let page = page_of(doc);
        let debounce = self.inner.config.input.debounce();
        let fired_at = event.time_ms + self.inner.config.input.debounce_ms;
        let typed_at = event.time_ms;
        let target = event.target;

        let mut debouncer = self.inner.debouncer();
        let generation = debouncer.next_generation();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if !inner.debouncer().claim(target, generation) {
                return;
            }
            let shell = inner.state.is_active().then(|| {
                inner.state.with(|session| {
                    // Other actions accepted while the timer was pending stay the latest.
                    let dedup = session.dedup();
                    let overtaken = dedup.last_action_kind != Some(ActionKind::Input)
                        && dedup.last_action_time_ms.is_some_and(|last| last > typed_at);
                    if !overtaken {
                        session.record_accepted(ActionKind::Input, fired_at, Some(target), None);
                    }
                    ActionLogAssembler::begin_in(session, ActionKind::Input, payload, page, fired_at)
                })
            });
            if let Some(shell) = shell.flatten()
                && let Err(e) = inner.assembler.complete(shell).await
            {
                warn!("Input step: {}", e);
            }
            inner.debouncer().finish();
        });
        debouncer.schedule(target, generation, handle);
        EventOutcome::Scheduled
    }

    /// Selection changes are recorded as they happen, without dedup.
    pub async fn handle_change(&self, doc: &Document, event: ChangeEvent) -> EventOutcome {
        let value = match event.value {
            FieldValue::Text(text) => FieldValue::Text(self.field_text(doc, event.target, &text)),
            flag => flag,
        };
        self.record_element_action(doc, ActionKind::Change, event.target, event.time_ms, Some(value))
            .await
    }

    pub async fn handle_submit(&self, doc: &Document, event: SubmitEvent) -> EventOutcome {
        self.record_element_action(doc, ActionKind::Submit, event.target, event.time_ms, None)
            .await
    }

    async fn record_element_action(
        &self,
        doc: &Document,
        kind: ActionKind,
        target: NodeId,
        time_ms: u64,
        value: Option<FieldValue>,
    ) -> EventOutcome {
        if let Err(reason) = self.admit().await {
            return Self::suppressed(kind, reason);
        }
        let Some(element) = self.locate(doc, target) else {
            return Self::suppressed(kind, Suppression::LocatorUnavailable);
        };
        let payload = ActionPayload {
            element: Some(element),
            coordinates: None,
            value,
            page_metadata: Some(doc.metadata()),
        };
        let shell = self.inner.state.with(|session| {
            session.record_accepted(kind, time_ms, Some(target), None);
            ActionLogAssembler::begin_in(session, kind, payload, page_of(doc), time_ms)
        });
        match shell {
            Some(shell) => EventOutcome::Recorded(self.spawn_completion(shell)),
            None => Self::suppressed(kind, Suppression::ForeignContext),
        }
    }

    /// A freshly loaded document. Suppressed when a navigating click recorded
    /// the transition moments ago.
    pub async fn handle_page_load(&self, doc: &Document, time_ms: u64) -> EventOutcome {
        if let Err(reason) = self.admit().await {
            return Self::suppressed(ActionKind::PageLoad, reason);
        }

        let validity = self.inner.config.navigation.flag_validity_ms;
        if self.inner.state.take_fresh_navigation_flag(time_ms, validity) {
            self.inner.state.with(|s| s.observe_url(doc.url()));
            if let Err(e) = self.inner.state.persist().await {
                warn!("Clearing navigation flag: {}", e);
            }
            return Self::suppressed(ActionKind::PageLoad, Suppression::NavigationFollowUp);
        }

        let payload = ActionPayload {
            page_metadata: Some(doc.metadata()),
            ..Default::default()
        };
        let shell = self.inner.state.with(|session| {
            session.observe_url(doc.url());
            session.record_accepted(ActionKind::PageLoad, time_ms, None, None);
            ActionLogAssembler::begin_in(session, ActionKind::PageLoad, payload, page_of(doc), time_ms)
        });
        match shell {
            Some(shell) => EventOutcome::Recorded(self.spawn_completion(shell)),
            None => Self::suppressed(ActionKind::PageLoad, Suppression::ForeignContext),
        }
    }

    /// Bound and, for secret fields, mask a typed value.
    fn field_text(&self, doc: &Document, target: NodeId, raw: &str) -> String {
        let value = bounded(raw, self.inner.config.input.max_value_len);
        let capture = &self.inner.config.capture;
        if !capture.redact_sensitive_values {
            return value;
        }
        let Some(node) = doc.get(target) else {
            return value;
        };
        if node
            .attr("type")
            .is_some_and(|t| t.trim().eq_ignore_ascii_case("password"))
        {
            return MASK.to_string();
        }
        let name = node.attr("name").or(node.id()).unwrap_or_default();
        mask_sensitive(&value, name, &capture.sensitive_fields)
    }
}

#[async_trait]
impl NavigationObserver for Recorder {
    async fn navigated(&self, doc: &Document, event: NavigationEvent) -> EventOutcome {
        if let Err(reason) = self.admit().await {
            return Self::suppressed(ActionKind::Navigation, reason);
        }

        let payload = ActionPayload {
            page_metadata: Some(doc.metadata()),
            ..Default::default()
        };
        let page = PageInfo {
            url: event.url.clone(),
            title: doc.title().to_string(),
        };
        let shell = self.inner.state.with(|session| {
            let verdict = capture::judge_navigation(
                session.dedup(),
                session.last_url(),
                &self.inner.config.navigation,
                &event.url,
                event.time_ms,
            );
            match verdict {
                Verdict::Suppress(Suppression::UnchangedUrl) => Err(Suppression::UnchangedUrl),
                Verdict::Suppress(reason) => {
                    session.observe_url(event.url.as_str());
                    Err(reason)
                }
                Verdict::Accept => {
                    session.observe_url(event.url.as_str());
                    session.record_accepted(ActionKind::Navigation, event.time_ms, None, None);
                    ActionLogAssembler::begin_in(
                        session,
                        ActionKind::Navigation,
                        payload,
                        page,
                        event.time_ms,
                    )
                    .ok_or(Suppression::ForeignContext)
                }
            }
        });

        match shell {
            Ok(shell) => {
                debug!(url = %event.url, cause = ?event.cause, "Navigation accepted");
                EventOutcome::Recorded(self.spawn_completion(shell))
            }
            Err(reason) => Self::suppressed(ActionKind::Navigation, reason),
        }
    }
}

fn page_of(doc: &Document) -> PageInfo {
    PageInfo {
        url: doc.url().to_string(),
        title: doc.title().to_string(),
    }
}

/// Convenience for callers that want the finished step of an outcome.
pub async fn settle(outcome: EventOutcome) -> Option<Result<Step, AssembleError>> {
    match outcome {
        EventOutcome::Recorded(pending) => Some(pending.wait().await),
        _ => None,
    }
}
