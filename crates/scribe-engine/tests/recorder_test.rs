use async_trait::async_trait;
use scribe_common::formatter::MASK;
use scribe_common::protocol::{
    ActionKind, ContextId, FieldValue, NavigationTarget, PersistedState, Point, Rect, Screenshot,
    Step,
};
use scribe_engine::backend::{
    BackendError, CaptureBackend, HostBridge, Navigator, RecorderBackends, StateBackend,
};
use scribe_engine::capture::{
    ChangeEvent, ClickEvent, EventOutcome, InputEvent, NavigationCause, NavigationEvent,
    SubmitEvent, Suppression,
};
use scribe_engine::config::ScribeConfig;
use scribe_engine::dom::{Document, NodeId};
use scribe_engine::navigation::NavigationObserver;
use scribe_engine::store::MemoryStateBackend;
use scribe_engine::Recorder;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
struct MockCapture {
    attempts: AtomicU32,
    fail: bool,
    hang: bool,
}

impl MockCapture {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl CaptureBackend for MockCapture {
    async fn capture(&self) -> Result<Option<Screenshot>, BackendError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail {
            return Err(BackendError::Capture(format!("attempt {} failed", n)));
        }
        Ok(Some(Screenshot::png(vec![n as u8])))
    }
}

struct MockBridge {
    id: Option<ContextId>,
    notified: Mutex<Vec<u64>>,
    listeners: Mutex<Vec<bool>>,
}

impl MockBridge {
    fn new(id: Option<ContextId>) -> Self {
        Self {
            id,
            notified: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl HostBridge for MockBridge {
    async fn current_context_id(&self) -> Result<Option<ContextId>, BackendError> {
        Ok(self.id)
    }

    async fn step_captured(&self, step: &Step) -> Result<(), BackendError> {
        self.notified.lock().unwrap().push(step.sequence);
        Ok(())
    }

    async fn set_listeners(&self, _kinds: &[ActionKind], attached: bool) -> Result<(), BackendError> {
        self.listeners.lock().unwrap().push(attached);
        Ok(())
    }
}

#[derive(Default)]
struct MockNavigator {
    calls: Mutex<Vec<(NavigationTarget, Instant)>>,
}

#[async_trait]
impl Navigator for MockNavigator {
    async fn navigate(&self, target: &NavigationTarget) -> Result<(), BackendError> {
        self.calls
            .lock()
            .unwrap()
            .push((target.clone(), Instant::now()));
        Ok(())
    }
}

/// Storage whose writes can be switched off.
#[derive(Default)]
struct FlakyState {
    inner: MemoryStateBackend,
    failing: AtomicBool,
}

#[async_trait]
impl StateBackend for FlakyState {
    async fn load(&self) -> Result<PersistedState, BackendError> {
        self.inner.load().await
    }

    async fn save(&self, state: &PersistedState) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::Storage("disk full".into()));
        }
        self.inner.save(state).await
    }
}

struct Harness {
    recorder: Recorder,
    capture: Arc<MockCapture>,
    bridge: Arc<MockBridge>,
    navigator: Arc<MockNavigator>,
}

fn harness_with(
    context: Option<u64>,
    state: Arc<dyn StateBackend>,
    capture: MockCapture,
) -> Harness {
    let capture = Arc::new(capture);
    let bridge = Arc::new(MockBridge::new(context.map(ContextId)));
    let navigator = Arc::new(MockNavigator::default());
    let recorder = Recorder::new(
        ScribeConfig::default(),
        RecorderBackends {
            capture: capture.clone(),
            state,
            navigator: navigator.clone(),
            bridge: bridge.clone(),
        },
    );
    Harness {
        recorder,
        capture,
        bridge,
        navigator,
    }
}

fn harness() -> Harness {
    harness_with(Some(1), Arc::new(MemoryStateBackend::default()), MockCapture::default())
}

struct Page {
    doc: Document,
    submit_btn: NodeId,
    link: NodeId,
    form: NodeId,
    email: NodeId,
    password: NodeId,
    country: NodeId,
}

fn page(url: &str) -> Page {
    let mut doc = Document::new(url, "Start");
    let rect = |x: f64, y: f64| Rect {
        x,
        y,
        width: 100.0,
        height: 30.0,
    };

    let submit_btn = doc.append_child(doc.body(), "button");
    doc.set_attr(submit_btn, "id", "submit-btn");
    doc.set_attr(submit_btn, "type", "button");
    doc.set_text(submit_btn, "Save");
    doc.set_rect(submit_btn, rect(10.0, 10.0));

    let link = doc.append_child(doc.body(), "a");
    doc.set_attr(link, "href", "https://x/y");
    doc.set_text(link, "Next");
    doc.set_rect(link, rect(10.0, 60.0));

    let form = doc.append_child(doc.body(), "form");
    doc.set_attr(form, "action", "/login");
    let email = doc.append_child(form, "input");
    doc.set_attr(email, "id", "email");
    doc.set_attr(email, "name", "email");
    let password = doc.append_child(form, "input");
    doc.set_attr(password, "id", "pw");
    doc.set_attr(password, "type", "password");
    let country = doc.append_child(form, "select");
    doc.set_attr(country, "id", "country");

    Page {
        doc,
        submit_btn,
        link,
        form,
        email,
        password,
        country,
    }
}

fn click(target: NodeId, time_ms: u64, x: f64, y: f64) -> ClickEvent {
    ClickEvent {
        target,
        time_ms,
        client: Point::new(x, y),
    }
}

async fn recorded(outcome: EventOutcome) -> Step {
    outcome
        .into_pending()
        .expect("event should be recorded")
        .wait()
        .await
        .expect("step should complete")
}

#[tokio::test(start_paused = true)]
async fn test_click_on_unique_id_is_step_one() {
    let h = harness();
    let p = page("https://x/start");
    h.recorder.start(&p.doc).await.unwrap();

    let outcome = h
        .recorder
        .handle_click(&p.doc, click(p.submit_btn, 1_000, 20.0, 20.0))
        .await;
    assert!(!outcome.default_prevented);

    let step = recorded(outcome.result).await;
    assert_eq!(step.sequence, 1);
    assert_eq!(step.action, ActionKind::Click);
    let element = step.payload.element.as_ref().unwrap();
    assert_eq!(element.selector, "#submit-btn");
    assert_eq!(
        p.doc.query_selector_all(&element.selector).unwrap(),
        vec![p.submit_btn]
    );
    assert_eq!(step.page_url, "https://x/start");
    assert_eq!(
        step.payload.coordinates.unwrap().element_relative,
        Point::new(10.0, 10.0)
    );
    assert!(step.screenshot.is_some());
    assert_eq!(*h.bridge.notified.lock().unwrap(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_double_click_within_rapid_fire_window() {
    let h = harness();
    let p = page("https://x/start");
    h.recorder.start(&p.doc).await.unwrap();

    let first = h
        .recorder
        .handle_click(&p.doc, click(p.submit_btn, 1_000, 20.0, 20.0))
        .await;
    let second = h
        .recorder
        .handle_click(&p.doc, click(p.submit_btn, 1_120, 60.0, 25.0))
        .await;

    assert_eq!(second.result.suppression(), Some(Suppression::RapidFire));
    recorded(first.result).await;
    let steps = h.recorder.steps();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].sequence, 1);
}

#[tokio::test(start_paused = true)]
async fn test_proximity_window_after_rapid_fire() {
    let h = harness();
    let p = page("https://x/start");
    h.recorder.start(&p.doc).await.unwrap();

    let first = h
        .recorder
        .handle_click(&p.doc, click(p.submit_btn, 1_000, 20.0, 20.0))
        .await;
    let near = h
        .recorder
        .handle_click(&p.doc, click(p.submit_btn, 1_300, 23.0, 18.0))
        .await;
    let later = h
        .recorder
        .handle_click(&p.doc, click(p.submit_btn, 1_900, 20.0, 20.0))
        .await;

    assert_eq!(near.result.suppression(), Some(Suppression::Proximity));
    assert_eq!(recorded(first.result).await.sequence, 1);
    assert_eq!(recorded(later.result).await.sequence, 2);
}

#[tokio::test(start_paused = true)]
async fn test_navigating_click_captures_before_navigating() {
    let state = MemoryStateBackend::default();
    let h = harness_with(Some(1), Arc::new(state.clone()), MockCapture::default());
    let p = page("https://x/start");
    h.recorder.start(&p.doc).await.unwrap();

    let clicked = Instant::now();
    let outcome = h
        .recorder
        .handle_click(&p.doc, click(p.link, 1_000, 15.0, 65.0))
        .await;
    assert!(outcome.default_prevented);

    let step = recorded(outcome.result).await;
    assert_eq!(step.page_url, "https://x/start");
    assert_ne!(step.page_url, "https://x/y");
    assert!(step.screenshot.is_some());

    let calls = h.navigator.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].0,
        NavigationTarget::Url {
            url: "https://x/y".into(),
            new_view: false
        }
    );
    assert!(calls[0].1.duration_since(clicked) >= Duration::from_millis(150));

    let persisted = state.snapshot();
    assert!(persisted.navigation_flag);
    assert_eq!(persisted.navigation_flag_timestamp, Some(1_000));
    assert_eq!(persisted.steps.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_click_on_link_still_blocks_navigation() {
    let h = harness();
    let p = page("https://x/start");
    h.recorder.start(&p.doc).await.unwrap();

    let first = h
        .recorder
        .handle_click(&p.doc, click(p.link, 1_000, 15.0, 65.0))
        .await;
    let second = h
        .recorder
        .handle_click(&p.doc, click(p.link, 1_080, 15.0, 65.0))
        .await;

    assert!(first.default_prevented);
    assert!(second.default_prevented);
    assert_eq!(second.result.suppression(), Some(Suppression::RapidFire));

    recorded(first.result).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.navigator.calls.lock().unwrap().len(), 1);
    assert_eq!(h.recorder.steps().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_click_on_plain_button_is_not_prevented() {
    let h = harness();
    let p = page("https://x/start");
    h.recorder.start(&p.doc).await.unwrap();

    let first = h
        .recorder
        .handle_click(&p.doc, click(p.submit_btn, 1_000, 20.0, 20.0))
        .await;
    let second = h
        .recorder
        .handle_click(&p.doc, click(p.submit_btn, 1_050, 20.0, 20.0))
        .await;

    assert_eq!(second.result.suppression(), Some(Suppression::RapidFire));
    assert!(!second.default_prevented);
    recorded(first.result).await;
}

#[tokio::test(start_paused = true)]
async fn test_page_load_after_navigating_click_is_suppressed_once() {
    let state = MemoryStateBackend::default();
    let first = harness_with(Some(1), Arc::new(state.clone()), MockCapture::default());
    let p = page("https://x/start");
    first.recorder.start(&p.doc).await.unwrap();
    let outcome = first
        .recorder
        .handle_click(&p.doc, click(p.link, 1_000, 15.0, 65.0))
        .await;
    recorded(outcome.result).await;

    // The destination document loads in a fresh context for the same tab.
    let reloaded = harness_with(Some(1), Arc::new(state.clone()), MockCapture::default());
    let next = Document::new("https://x/y", "Next");
    assert!(reloaded.recorder.resume(&next).await.unwrap());

    let follow_up = reloaded.recorder.handle_page_load(&next, 3_000).await;
    assert_eq!(
        follow_up.suppression(),
        Some(Suppression::NavigationFollowUp)
    );
    assert!(!state.snapshot().navigation_flag);

    let step = recorded(reloaded.recorder.handle_page_load(&next, 9_000).await).await;
    assert_eq!(step.sequence, 2);
    assert_eq!(step.action, ActionKind::PageLoad);
    assert_eq!(step.page_url, "https://x/y");
}

#[tokio::test(start_paused = true)]
async fn test_stale_navigation_flag_does_not_suppress() {
    let state = MemoryStateBackend::new(PersistedState {
        is_recording: true,
        owner_context_id: Some(ContextId(1)),
        navigation_flag: true,
        navigation_flag_timestamp: Some(1_000),
        ..Default::default()
    });
    let h = harness_with(Some(1), Arc::new(state), MockCapture::default());
    let doc = Document::new("https://x/y", "Next");
    assert!(h.recorder.resume(&doc).await.unwrap());

    let step = recorded(h.recorder.handle_page_load(&doc, 6_000).await).await;
    assert_eq!(step.sequence, 1);
}

#[tokio::test(start_paused = true)]
async fn test_page_load_capture_failure_still_records_step() {
    let h = harness_with(
        Some(1),
        Arc::new(MemoryStateBackend::default()),
        MockCapture::failing(),
    );
    let doc = Document::new("https://x/", "Home");
    h.recorder.start(&doc).await.unwrap();

    let began = Instant::now();
    let step = recorded(h.recorder.handle_page_load(&doc, 1_000).await).await;
    assert!(step.screenshot.is_none());
    assert_eq!(h.capture.attempts.load(Ordering::SeqCst), 3);
    // 300 ms settle, then 300 ms and 600 ms of backoff.
    assert!(began.elapsed() >= Duration::from_millis(1_200));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_click_capture_is_abandoned_at_timeout() {
    let h = harness_with(
        Some(1),
        Arc::new(MemoryStateBackend::default()),
        MockCapture::hanging(),
    );
    let p = page("https://x/start");
    h.recorder.start(&p.doc).await.unwrap();

    let began = Instant::now();
    let outcome = h
        .recorder
        .handle_click(&p.doc, click(p.submit_btn, 1_000, 20.0, 20.0))
        .await;
    let step = recorded(outcome.result).await;
    assert!(step.screenshot.is_none());
    assert_eq!(h.capture.attempts.load(Ordering::SeqCst), 1);
    let waited = began.elapsed();
    assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_second_context_with_foreign_owner_records_nothing() {
    let state = MemoryStateBackend::default();
    let owner = harness_with(Some(1), Arc::new(state.clone()), MockCapture::default());
    let p = page("https://x/start");
    owner.recorder.start(&p.doc).await.unwrap();

    let other = harness_with(Some(2), Arc::new(state.clone()), MockCapture::default());
    let other_page = page("https://x/other");
    assert!(!other.recorder.resume(&other_page.doc).await.unwrap());
    assert!(other.recorder.is_recording());
    assert!(other.bridge.listeners.lock().unwrap().is_empty());

    let outcome = other
        .recorder
        .handle_click(&other_page.doc, click(other_page.submit_btn, 1_000, 20.0, 20.0))
        .await;
    assert_eq!(outcome.result.suppression(), Some(Suppression::ForeignContext));
    assert!(other.recorder.steps().is_empty());
    assert_eq!(other.capture.attempts.load(Ordering::SeqCst), 0);
    assert!(state.snapshot().steps.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_identity_is_not_treated_as_owner() {
    let state = MemoryStateBackend::new(PersistedState {
        is_recording: true,
        owner_context_id: Some(ContextId(1)),
        ..Default::default()
    });
    let h = harness_with(None, Arc::new(state), MockCapture::default());
    let p = page("https://x/start");
    assert!(!h.recorder.resume(&p.doc).await.unwrap());

    let outcome = h.recorder.handle_submit(&p.doc, SubmitEvent { target: p.form, time_ms: 10 }).await;
    assert_eq!(outcome.suppression(), Some(Suppression::ForeignContext));
}

#[tokio::test(start_paused = true)]
async fn test_sequence_is_assigned_at_acceptance_not_completion() {
    let h = harness();
    let p = page("https://x/start");
    h.recorder.start(&p.doc).await.unwrap();

    // Submit waits out a 100 ms pre-delay; the click right after does not.
    let submit = h
        .recorder
        .handle_submit(&p.doc, SubmitEvent { target: p.form, time_ms: 1_000 })
        .await;
    let clicked = h
        .recorder
        .handle_click(&p.doc, click(p.submit_btn, 1_010, 20.0, 20.0))
        .await;

    let click_step = recorded(clicked.result).await;
    let submit_step = recorded(submit).await;
    assert_eq!(submit_step.sequence, 1);
    assert_eq!(click_step.sequence, 2);

    let completion_order: Vec<u64> = h
        .recorder
        .state()
        .with(|s| s.steps().iter().map(|st| st.sequence).collect());
    assert_eq!(completion_order, vec![2, 1]);
    let ordered: Vec<u64> = h.recorder.steps().iter().map(|s| s.sequence).collect();
    assert_eq!(ordered, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_input_is_debounced_per_field() {
    let h = harness();
    let p = page("https://x/start");
    h.recorder.start(&p.doc).await.unwrap();

    for (i, value) in ["a", "ab", "abc"].iter().enumerate() {
        let outcome = h
            .recorder
            .handle_input(
                &p.doc,
                InputEvent {
                    target: p.email,
                    time_ms: 1_000 + i as u64 * 100,
                    value: value.to_string(),
                },
            )
            .await;
        assert!(matches!(outcome, EventOutcome::Scheduled));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(h.recorder.pending_inputs(), 1);
    assert!(h.recorder.steps().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let steps = h.recorder.steps();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].action, ActionKind::Input);
    assert_eq!(steps[0].payload.value, Some(FieldValue::Text("abc".into())));
    assert_eq!(steps[0].captured_at_ms, 1_700);
    assert_eq!(h.recorder.pending_inputs(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_input_timer_does_not_reset_click_dedup() {
    let h = harness();
    let p = page("https://x/start");
    h.recorder.start(&p.doc).await.unwrap();

    let typed = h
        .recorder
        .handle_input(
            &p.doc,
            InputEvent {
                target: p.email,
                time_ms: 1_000,
                value: "ann".into(),
            },
        )
        .await;
    assert!(matches!(typed, EventOutcome::Scheduled));

    tokio::time::sleep(Duration::from_millis(400)).await;
    let first = h
        .recorder
        .handle_click(&p.doc, click(p.submit_btn, 1_400, 20.0, 20.0))
        .await;

    // The field's timer fires in between the two clicks.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.recorder.pending_inputs(), 0);
    let second = h
        .recorder
        .handle_click(&p.doc, click(p.submit_btn, 1_550, 20.0, 20.0))
        .await;

    assert_eq!(second.result.suppression(), Some(Suppression::RapidFire));
    recorded(first.result).await;
    h.recorder.flush_inputs().await;

    let actions: Vec<ActionKind> = h.recorder.steps().iter().map(|s| s.action).collect();
    assert_eq!(actions, vec![ActionKind::Click, ActionKind::Input]);
}

#[tokio::test(start_paused = true)]
async fn test_input_values_are_bounded_and_passwords_masked() {
    let h = harness();
    let p = page("https://x/start");
    h.recorder.start(&p.doc).await.unwrap();

    h.recorder
        .handle_input(
            &p.doc,
            InputEvent {
                target: p.email,
                time_ms: 1_000,
                value: "x".repeat(150),
            },
        )
        .await;
    h.recorder
        .handle_input(
            &p.doc,
            InputEvent {
                target: p.password,
                time_ms: 1_000,
                value: "hunter2".into(),
            },
        )
        .await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let values: Vec<String> = h
        .recorder
        .steps()
        .iter()
        .filter_map(|s| match &s.payload.value {
            Some(FieldValue::Text(t)) => Some(t.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(values.len(), 2);
    assert!(values.contains(&"x".repeat(100)));
    assert!(values.contains(&MASK.to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_change_and_submit_are_never_deduplicated() {
    let h = harness();
    let p = page("https://x/start");
    h.recorder.start(&p.doc).await.unwrap();

    let mut pending = Vec::new();
    for _ in 0..2 {
        pending.push(
            h.recorder
                .handle_change(
                    &p.doc,
                    ChangeEvent {
                        target: p.country,
                        time_ms: 1_000,
                        value: FieldValue::Text("NZ".into()),
                    },
                )
                .await,
        );
    }
    pending.push(
        h.recorder
            .handle_submit(&p.doc, SubmitEvent { target: p.form, time_ms: 1_000 })
            .await,
    );

    let mut sequences = Vec::new();
    for outcome in pending {
        sequences.push(recorded(outcome).await.sequence);
    }
    assert_eq!(sequences, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_history_navigation_dedup() {
    let h = harness();
    let doc = Document::new("https://x/start", "Start");
    h.recorder.start(&doc).await.unwrap();

    let nav = |url: &str, time_ms: u64| NavigationEvent {
        url: url.into(),
        time_ms,
        cause: NavigationCause::PushState,
    };

    let same = h.recorder.navigated(&doc, nav("https://x/start", 500)).await;
    assert_eq!(same.suppression(), Some(Suppression::UnchangedUrl));

    let first = h.recorder.navigated(&doc, nav("https://x/a", 1_000)).await;
    let burst = h.recorder.navigated(&doc, nav("https://x/b", 1_500)).await;
    let later = h.recorder.navigated(&doc, nav("https://x/c", 2_600)).await;

    assert_eq!(burst.suppression(), Some(Suppression::RepeatedNavigation));
    let a = recorded(first).await;
    assert_eq!((a.sequence, a.page_url.as_str()), (1, "https://x/a"));
    let c = recorded(later).await;
    assert_eq!((c.sequence, c.page_url.as_str()), (2, "https://x/c"));
}

#[tokio::test(start_paused = true)]
async fn test_events_before_start_are_ignored() {
    let h = harness();
    let p = page("https://x/start");
    let outcome = h
        .recorder
        .handle_click(&p.doc, click(p.submit_btn, 1_000, 20.0, 20.0))
        .await;
    assert_eq!(outcome.result.suppression(), Some(Suppression::NotRecording));
}

#[tokio::test(start_paused = true)]
async fn test_stop_drops_pending_input_and_detaches() {
    let h = harness();
    let p = page("https://x/start");
    h.recorder.start(&p.doc).await.unwrap();
    h.recorder
        .handle_input(
            &p.doc,
            InputEvent {
                target: p.email,
                time_ms: 1_000,
                value: "half-typed".into(),
            },
        )
        .await;
    h.recorder.stop().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(!h.recorder.is_recording());
    assert!(h.recorder.steps().is_empty());
    assert_eq!(h.recorder.pending_inputs(), 0);
    assert_eq!(*h.bridge.listeners.lock().unwrap(), vec![true, false]);
}

#[tokio::test(start_paused = true)]
async fn test_persistence_failure_keeps_step_in_memory() {
    let state = Arc::new(FlakyState::default());
    let h = harness_with(Some(1), state.clone(), MockCapture::default());
    let p = page("https://x/start");
    h.recorder.start(&p.doc).await.unwrap();
    state.failing.store(true, Ordering::SeqCst);

    let outcome = h
        .recorder
        .handle_click(&p.doc, click(p.submit_btn, 1_000, 20.0, 20.0))
        .await;
    let err = outcome
        .result
        .into_pending()
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert_eq!(err.step().map(|s| s.sequence), Some(1));
    assert_eq!(h.recorder.steps().len(), 1);
    assert!(state.inner.snapshot().steps.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_detached_target_drops_event_without_bookkeeping() {
    let h = harness();
    let mut p = page("https://x/start");
    h.recorder.start(&p.doc).await.unwrap();
    p.doc.detach(p.submit_btn);

    let dropped = h
        .recorder
        .handle_click(&p.doc, click(p.submit_btn, 1_000, 20.0, 20.0))
        .await;
    assert_eq!(
        dropped.result.suppression(),
        Some(Suppression::LocatorUnavailable)
    );

    // No bookkeeping was updated, so an immediate click elsewhere records.
    let link_click = h
        .recorder
        .handle_click(&p.doc, click(p.link, 1_050, 20.0, 20.0))
        .await;
    assert_eq!(recorded(link_click.result).await.sequence, 1);
}
