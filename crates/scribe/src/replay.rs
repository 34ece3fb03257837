use crate::script::{Script, ScriptError, ScriptEvent, is_markup_name};
use async_trait::async_trait;
use scribe_engine::backend::{BackendError, Navigator, RecorderBackends};
use scribe_engine::capture::{
    ChangeEvent, ClickEvent, EventOutcome, InputEvent, NavigationEvent, PendingStep, SubmitEvent,
    Suppression,
};
use scribe_engine::config::ScribeConfig;
use scribe_engine::dom::{Document, DocumentSpec, ElementSpec, NodeId};
use scribe_engine::navigation::NavigationObserver;
use scribe_engine::protocol::{FieldValue, NavigationTarget, Point, Step};
use scribe_engine::Recorder;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Something that can display a page fixture while it is being recorded.
#[async_trait]
pub trait PageHost: Send + Sync {
    async fn show(&self, spec: &DocumentSpec) -> Result<(), BackendError>;
}

/// Navigator for hosts without a real page: remembers the requested targets.
#[derive(Debug, Default)]
pub struct ScriptNavigator {
    targets: Mutex<Vec<NavigationTarget>>,
}

impl ScriptNavigator {
    pub fn targets(&self) -> Vec<NavigationTarget> {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Navigator for ScriptNavigator {
    async fn navigate(&self, target: &NavigationTarget) -> Result<(), BackendError> {
        info!(?target, "Navigating");
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(target.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuppressedEvent {
    pub at: u64,
    pub reason: Suppression,
}

#[derive(Debug, Default)]
pub struct ReplayReport {
    /// Ordered by sequence.
    pub steps: Vec<Step>,
    pub suppressed: Vec<SuppressedEvent>,
    /// Steps that completed but failed to persist.
    pub unpersisted: usize,
}

/// Drives a `Script` through a `Recorder` in (tokio) real time.
pub struct Replayer {
    config: ScribeConfig,
    backends: RecorderBackends,
    pages: Option<Arc<dyn PageHost>>,
}

struct Run<'a> {
    script: &'a Script,
    recorder: Recorder,
    doc: Option<Document>,
    pending: Vec<PendingStep>,
    report: ReplayReport,
}

impl Replayer {
    pub fn new(config: ScribeConfig, backends: RecorderBackends) -> Self {
        Self {
            config,
            backends,
            pages: None,
        }
    }

    pub fn with_pages(mut self, pages: Arc<dyn PageHost>) -> Self {
        self.pages = Some(pages);
        self
    }

    fn context(&self) -> Recorder {
        Recorder::new(self.config.clone(), self.backends.clone())
    }

    pub async fn run(&self, script: &Script) -> anyhow::Result<ReplayReport> {
        let origin = Instant::now();
        let mut run = Run {
            script,
            recorder: self.context(),
            doc: None,
            pending: Vec::new(),
            report: ReplayReport::default(),
        };

        for timed in &script.events {
            tokio::time::sleep_until(origin + Duration::from_millis(timed.at)).await;
            let at = timed.at;
            debug!(at, event = ?timed.event, "Replaying");

            match &timed.event {
                ScriptEvent::Start { page } => {
                    let doc = self.open(script, page, at).await?;
                    run.recorder.start(&doc).await?;
                    run.doc = Some(doc);
                }
                ScriptEvent::Resume { page } => {
                    self.reload(&mut run, page, at).await?;
                }
                ScriptEvent::Load { page } => {
                    self.reload(&mut run, page, at).await?;
                    let doc = run.doc(at)?;
                    let outcome = run.recorder.handle_page_load(doc, at).await;
                    run.track(at, outcome);
                }
                ScriptEvent::Stop => run.recorder.stop().await?,
                ScriptEvent::Click { target, x, y } => {
                    let doc = run.doc(at)?;
                    let event = ClickEvent {
                        target: find(doc, target, at)?,
                        time_ms: at,
                        client: Point::new(*x, *y),
                    };
                    let outcome = run.recorder.handle_click(doc, event).await;
                    run.track(at, outcome.result);
                }
                ScriptEvent::Input { target, value } => {
                    let doc = run.doc(at)?;
                    let event = InputEvent {
                        target: find(doc, target, at)?,
                        time_ms: at,
                        value: value.clone(),
                    };
                    let outcome = run.recorder.handle_input(doc, event).await;
                    run.track(at, outcome);
                }
                ScriptEvent::Change {
                    target,
                    value,
                    checked,
                } => {
                    let doc = run.doc(at)?;
                    let value = match checked {
                        Some(flag) => FieldValue::Flag(*flag),
                        None => FieldValue::Text(value.clone().unwrap_or_default()),
                    };
                    let event = ChangeEvent {
                        target: find(doc, target, at)?,
                        time_ms: at,
                        value,
                    };
                    let outcome = run.recorder.handle_change(doc, event).await;
                    run.track(at, outcome);
                }
                ScriptEvent::Submit { target } => {
                    let doc = run.doc(at)?;
                    let event = SubmitEvent {
                        target: find(doc, target, at)?,
                        time_ms: at,
                    };
                    let outcome = run.recorder.handle_submit(doc, event).await;
                    run.track(at, outcome);
                }
                ScriptEvent::Navigate { url, cause } => {
                    let doc = run.doc_mut(at)?;
                    let title = doc.title().to_string();
                    doc.set_location(url.clone(), title);
                    let event = NavigationEvent {
                        url: url.clone(),
                        time_ms: at,
                        cause: *cause,
                    };
                    let doc = run.doc(at)?;
                    let outcome = run.recorder.navigated(doc, event).await;
                    run.track(at, outcome);
                }
                ScriptEvent::Detach { target } => {
                    let node = find(run.doc(at)?, target, at)?;
                    run.doc_mut(at)?.detach(node);
                }
            }
        }

        run.settle().await;
        run.report.steps = run.recorder.steps();
        info!(
            steps = run.report.steps.len(),
            suppressed = run.report.suppressed.len(),
            "Replay finished"
        );
        Ok(run.report)
    }

    async fn open(&self, script: &Script, page: &str, at: u64) -> anyhow::Result<Document> {
        let spec = script
            .pages
            .get(page)
            .ok_or_else(|| ScriptError::UnknownPage {
                at,
                page: page.to_string(),
            })?;
        if let Some(pages) = &self.pages {
            pages.show(spec).await?;
        }
        Ok(Document::from_spec(spec))
    }

    /// A full document load: the old context finishes its work and a fresh
    /// one restores the session from storage.
    async fn reload(&self, run: &mut Run<'_>, page: &str, at: u64) -> anyhow::Result<()> {
        run.settle().await;
        let doc = self.open(run.script, page, at).await?;
        run.recorder = self.context();
        if !run.recorder.resume(&doc).await? {
            info!(url = doc.url(), "Loaded page is not recording");
        }
        run.doc = Some(doc);
        Ok(())
    }
}

impl Run<'_> {
    fn doc(&self, at: u64) -> Result<&Document, ScriptError> {
        self.doc.as_ref().ok_or(ScriptError::NoDocument { at })
    }

    fn doc_mut(&mut self, at: u64) -> Result<&mut Document, ScriptError> {
        self.doc.as_mut().ok_or(ScriptError::NoDocument { at })
    }

    fn track(&mut self, at: u64, outcome: EventOutcome) {
        match outcome {
            EventOutcome::Recorded(pending) => self.pending.push(pending),
            EventOutcome::Scheduled => {}
            EventOutcome::Suppressed(reason) => {
                self.report.suppressed.push(SuppressedEvent { at, reason })
            }
        }
    }

    async fn settle(&mut self) {
        self.recorder.flush_inputs().await;
        for pending in self.pending.drain(..) {
            let sequence = pending.sequence;
            if let Err(e) = pending.wait().await {
                warn!(sequence, "{}", e);
                self.report.unpersisted += 1;
            }
        }
    }
}

fn find(doc: &Document, selector: &str, at: u64) -> Result<NodeId, ScriptError> {
    doc.query_selector(selector)
        .map_err(|e| ScriptError::BadSelector {
            at,
            selector: selector.to_string(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| ScriptError::NoMatch {
            at,
            selector: selector.to_string(),
        })
}

/// Static HTML for a page fixture, for hosts that render real pages.
pub fn render_html(spec: &DocumentSpec) -> String {
    let mut html = format!(
        "<!DOCTYPE html><html><head><title>{}</title></head><body>",
        escape(&spec.title)
    );
    for element in &spec.body {
        render_element(element, &mut html);
    }
    html.push_str("</body></html>");
    html
}

/// Elements and attributes whose names are not plain markup names are left out.
fn render_element(element: &ElementSpec, out: &mut String) {
    if !is_markup_name(&element.tag) {
        warn!(tag = %element.tag, "Skipping element with invalid tag");
        return;
    }
    out.push('<');
    out.push_str(&element.tag);
    for (name, value) in element.attrs.iter().filter(|(name, _)| is_markup_name(name)) {
        out.push_str(&format!(" {}=\"{}\"", name, escape(value)));
    }
    out.push('>');
    if let Some(text) = &element.text {
        out.push_str(&escape(text));
    }
    for child in &element.children {
        render_element(child, out);
    }
    out.push_str(&format!("</{}>", element.tag));
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
