//! Predicts whether a click's default action will leave the page.

use crate::capture::{EventOutcome, NavigationEvent};
use crate::dom::{Document, Node, NodeId};
use crate::locator::positional_path;
use async_trait::async_trait;
use scribe_common::protocol::NavigationTarget;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Classification {
    pub will_navigate: bool,
    /// Hyperlink (target or ancestor) that carried the `href`.
    pub anchor: Option<NodeId>,
    /// Absolute destination, when one is known.
    pub href: Option<String>,
    /// How to perform the navigation once evidence has been captured.
    pub target: Option<NavigationTarget>,
}

impl Classification {
    fn stays() -> Self {
        Self::default()
    }
}

/// Hosts notify the engine of history mutations and unloads through this
/// trait instead of the engine patching the history API.
#[async_trait]
pub trait NavigationObserver: Send + Sync {
    async fn navigated(&self, doc: &Document, event: NavigationEvent) -> EventOutcome;
}

pub fn classify(doc: &Document, target: NodeId) -> Classification {
    let Some(node) = doc.get(target) else {
        return Classification::stays();
    };

    if let Some(anchor) = doc
        .ancestors(target)
        .find(|n| doc.get(*n).is_some_and(is_hyperlink))
        && let Some(found) = classify_anchor(doc, anchor)
    {
        return found;
    }

    if is_submit_control(node)
        && let Some(form) = owning_form(doc, target)
    {
        let action = node
            .attr("formaction")
            .or_else(|| doc.get(form).and_then(|f| f.attr("action")))
            .and_then(|a| resolve(doc.url(), a))
            .unwrap_or_else(|| doc.url().to_string());
        return Classification {
            will_navigate: true,
            anchor: None,
            href: Some(action),
            target: positional_path(doc, form)
                .ok()
                .map(|selector| NavigationTarget::SubmitForm { selector }),
        };
    }

    if node.has_attr("onclick") || node.has_attr("formaction") {
        return Classification {
            will_navigate: true,
            anchor: None,
            href: node.attr("formaction").and_then(|a| resolve(doc.url(), a)),
            target: positional_path(doc, target)
                .ok()
                .map(|selector| NavigationTarget::ReplayClick { selector }),
        };
    }

    Classification::stays()
}

fn is_hyperlink(node: &Node) -> bool {
    matches!(node.tag(), "a" | "area") && node.has_attr("href")
}

/// `None` when the anchor's href does not leave the page.
fn classify_anchor(doc: &Document, anchor: NodeId) -> Option<Classification> {
    let node = doc.get(anchor)?;
    let raw = node.attr("href")?.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    if raw
        .get(..11)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("javascript:"))
    {
        return None;
    }

    let destination = resolve(doc.url(), raw)?;
    if same_document(doc.url(), &destination) {
        return None;
    }

    let new_view = node
        .attr("target")
        .map(str::trim)
        .is_some_and(|t| !t.is_empty() && !matches!(t.to_ascii_lowercase().as_str(), "_self" | "_parent" | "_top"));

    Some(Classification {
        will_navigate: true,
        anchor: Some(anchor),
        href: Some(destination.clone()),
        target: Some(NavigationTarget::Url {
            url: destination,
            new_view,
        }),
    })
}

fn is_submit_control(node: &Node) -> bool {
    let kind = node.attr("type").map(|t| t.trim().to_ascii_lowercase());
    match node.tag() {
        "button" => matches!(kind.as_deref(), None | Some("") | Some("submit")),
        "input" => matches!(kind.as_deref(), Some("submit") | Some("image")),
        _ => false,
    }
}

/// The control's `form` attribute, else the closest enclosing form.
fn owning_form(doc: &Document, control: NodeId) -> Option<NodeId> {
    if let Some(form_id) = doc.get(control).and_then(|n| n.attr("form"))
        && let Some(form) = doc.element_by_id(form_id)
        && doc.get(form).is_some_and(|f| f.tag() == "form")
    {
        return Some(form);
    }
    doc.closest(control, "form")
}

/// Resolve `href` against the document URL. Falls back to the raw value when
/// the document URL itself cannot be parsed.
fn resolve(base: &str, href: &str) -> Option<String> {
    match Url::parse(base) {
        Ok(base) => base.join(href).ok().map(String::from),
        Err(_) => Some(href.to_string()),
    }
}

/// Equal once fragments are ignored.
fn same_document(current: &str, destination: &str) -> bool {
    match (Url::parse(current), Url::parse(destination)) {
        (Ok(mut a), Ok(mut b)) => {
            a.set_fragment(None);
            b.set_fragment(None);
            a == b
        }
        _ => strip_fragment(current) == strip_fragment(destination),
    }
}

fn strip_fragment(url: &str) -> &str {
    url.split('#').next().unwrap_or(url)
}
