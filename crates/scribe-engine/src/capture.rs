//! Raw page events, deduplication rules and their outcomes.

use crate::assembler::AssembleError;
use crate::config::{DedupConfig, NavigationConfig};
use crate::dom::{Document, NodeId};
use crate::state::DedupState;
use scribe_common::protocol::{ActionKind, Coordinates, FieldValue, Point, Step};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickEvent {
    pub target: NodeId,
    pub time_ms: u64,
    /// Viewport (client) position of the pointer.
    pub client: Point,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputEvent {
    pub target: NodeId,
    pub time_ms: u64,
    /// Field value after this input.
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub target: NodeId,
    pub time_ms: u64,
    pub value: FieldValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubmitEvent {
    /// The submitted form.
    pub target: NodeId,
    pub time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationCause {
    PushState,
    ReplaceState,
    PopState,
    Unload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationEvent {
    /// URL after the transition.
    pub url: String,
    pub time_ms: u64,
    pub cause: NavigationCause,
}

/// Why an event did not produce a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    ForeignContext,
    NotRecording,
    RapidFire,
    Proximity,
    UnchangedUrl,
    RepeatedNavigation,
    /// A `page_load` caused by a navigating click that was already recorded.
    NavigationFollowUp,
    LocatorUnavailable,
}

pub enum Verdict {
    Accept,
    Suppress(Suppression),
}

/// A step whose sequence is assigned and whose screenshot is in flight.
#[derive(Debug)]
pub struct PendingStep {
    pub sequence: u64,
    handle: JoinHandle<Result<Step, AssembleError>>,
}

impl PendingStep {
    pub(crate) fn new(sequence: u64, handle: JoinHandle<Result<Step, AssembleError>>) -> Self {
        Self { sequence, handle }
    }

    /// Wait for screenshot acquisition and persistence to settle.
    pub async fn wait(self) -> Result<Step, AssembleError> {
        self.handle
            .await
            .map_err(|e| AssembleError::Aborted(e.to_string()))?
    }
}

#[derive(Debug)]
pub enum EventOutcome {
    Recorded(PendingStep),
    /// Accepted but deferred (input debounce).
    Scheduled,
    Suppressed(Suppression),
}

impl EventOutcome {
    pub fn suppression(&self) -> Option<Suppression> {
        match self {
            EventOutcome::Suppressed(s) => Some(*s),
            _ => None,
        }
    }

    pub fn into_pending(self) -> Option<PendingStep> {
        match self {
            EventOutcome::Recorded(p) => Some(p),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ClickOutcome {
    /// Default action and propagation were suppressed; the engine performs the
    /// navigation itself once the step is persisted.
    pub default_prevented: bool,
    pub result: EventOutcome,
}

impl ClickOutcome {
    pub(crate) fn passive(result: EventOutcome) -> Self {
        Self {
            default_prevented: false,
            result,
        }
    }
}

/// Click dedup, applied after the foreign-context check.
pub fn judge_click(
    dedup: &DedupState,
    config: &DedupConfig,
    target: NodeId,
    at: Point,
    time_ms: u64,
) -> Verdict {
    if dedup.last_action_kind != Some(ActionKind::Click) {
        return Verdict::Accept;
    }
    let Some(last_time) = dedup.last_action_time_ms else {
        return Verdict::Accept;
    };
    let elapsed = time_ms.saturating_sub(last_time);
    let same_target = dedup.last_target == Some(target);
    let within = |px: f64| {
        dedup
            .last_coordinates
            .is_some_and(|p| (p.x - at.x).abs() < px && (p.y - at.y).abs() < px)
    };

    if elapsed < config.rapid_fire_window_ms && (same_target || within(config.rapid_fire_distance_px)) {
        return Verdict::Suppress(Suppression::RapidFire);
    }
    if same_target && within(config.proximity_distance_px) && elapsed < config.proximity_window_ms {
        return Verdict::Suppress(Suppression::Proximity);
    }
    Verdict::Accept
}

pub fn judge_navigation(
    dedup: &DedupState,
    last_url: Option<&str>,
    config: &NavigationConfig,
    url: &str,
    time_ms: u64,
) -> Verdict {
    if last_url == Some(url) {
        return Verdict::Suppress(Suppression::UnchangedUrl);
    }
    if dedup.last_action_kind == Some(ActionKind::Navigation)
        && dedup
            .last_action_time_ms
            .is_some_and(|t| time_ms.saturating_sub(t) < config.repeat_window_ms)
    {
        return Verdict::Suppress(Suppression::RepeatedNavigation);
    }
    Verdict::Accept
}

/// Pointer position in page, element and viewport frames. Element rects are
/// viewport-relative.
pub fn coordinates(doc: &Document, target: NodeId, client: Point) -> Coordinates {
    let scroll = doc.scroll();
    let rect = doc.get(target).map(|n| n.rect()).unwrap_or_default();
    Coordinates {
        absolute: Point::new(client.x + scroll.x, client.y + scroll.y),
        element_relative: Point::new(client.x - rect.x, client.y - rect.y),
        viewport_relative: client,
    }
}

/// Per-field debounce timers. A newer input on the same field aborts the
/// pending timer; generations reject a timer that fired concurrently.
#[derive(Debug)]
pub(crate) struct InputDebouncer {
    next_generation: u64,
    pending: HashMap<NodeId, (u64, JoinHandle<()>)>,
    in_flight: usize,
    idle: watch::Sender<bool>,
}

impl Default for InputDebouncer {
    fn default() -> Self {
        Self {
            next_generation: 0,
            pending: HashMap::new(),
            in_flight: 0,
            idle: watch::Sender::new(true),
        }
    }
}

impl InputDebouncer {
    /// Follows `is_idle` after every change.
    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.idle.subscribe()
    }

    fn publish(&self) {
        self.idle.send_replace(self.is_idle());
    }

    pub(crate) fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub(crate) fn schedule(&mut self, target: NodeId, generation: u64, handle: JoinHandle<()>) {
        if let Some((_, previous)) = self.pending.insert(target, (generation, handle)) {
            previous.abort();
        }
        self.publish();
    }

    /// Called by a fired timer; true if it is still the current one.
    pub(crate) fn claim(&mut self, target: NodeId, generation: u64) -> bool {
        match self.pending.get(&target) {
            Some((current, _)) if *current == generation => {
                self.pending.remove(&target);
                self.in_flight += 1;
                self.publish();
                true
            }
            _ => false,
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.pending.drain() {
            handle.abort();
        }
        self.publish();
    }

    /// Pairs with a successful `claim` once the step is assembled.
    pub(crate) fn finish(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.publish();
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight == 0
    }
}
