//! Stable locators for interacted elements.
//!
//! Generation is synchronous and deterministic for a given document state.
//! Selector preference: unique `#id`, then `tag.class…` when it resolves to
//! exactly the element, then a positional path from the root.

use crate::config::LocatorConfig;
use crate::dom::{Document, Node, NodeId};
use crate::selector::css_escape;
use scribe_common::protocol::ElementLocatorInfo;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    #[error("Node {0:?} does not exist")]
    UnknownNode(NodeId),
    #[error("Node {0:?} is not attached to the document")]
    Detached(NodeId),
}

/// Truncate to at most `max` characters.
pub fn bounded(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

fn normalized_text(raw: &str, max: usize) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(bounded(&collapsed, max))
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocatorGenerator {
    limits: LocatorConfig,
}

impl LocatorGenerator {
    pub fn new(limits: LocatorConfig) -> Self {
        Self { limits }
    }

    pub fn generate(&self, doc: &Document, id: NodeId) -> Result<ElementLocatorInfo, LocatorError> {
        let node = doc.get(id).ok_or(LocatorError::UnknownNode(id))?;
        if !doc.is_connected(id) {
            return Err(LocatorError::Detached(id));
        }

        let selector = self.css_selector(doc, id)?;
        let xpath = self.xpath(doc, id)?;

        let parent_selector = node
            .parent()
            .and_then(|p| self.css_selector(doc, p).ok());

        let attributes = node
            .attributes()
            .iter()
            .map(|(k, v)| (k.clone(), bounded(v, self.limits.max_attribute_len)))
            .collect();

        Ok(ElementLocatorInfo {
            tag_name: node.tag().to_string(),
            id: node.id().map(|v| bounded(v, self.limits.max_attribute_len)),
            class_list: node
                .classes()
                .take(self.limits.max_classes)
                .map(|c| bounded(c, self.limits.max_attribute_len))
                .collect(),
            label: self.label(doc, id),
            text: normalized_text(&doc.text_content(id), self.limits.max_text_len),
            selector,
            xpath,
            rect: node.rect(),
            attributes,
            parent_selector,
        })
    }

    pub fn css_selector(&self, doc: &Document, id: NodeId) -> Result<String, LocatorError> {
        let node = doc.get(id).ok_or(LocatorError::UnknownNode(id))?;

        if let Some(value) = unique_id(doc, node) {
            let candidate = format!("#{}", css_escape(value));
            if resolves_to(doc, &candidate, id) {
                return Ok(candidate);
            }
        }

        let classes: Vec<&str> = node.classes().take(self.limits.max_classes).collect();
        if !classes.is_empty() {
            let mut candidate = node.tag().to_string();
            for class in &classes {
                candidate.push('.');
                candidate.push_str(&css_escape(class));
            }
            if resolves_to(doc, &candidate, id) {
                return Ok(candidate);
            }
        }

        positional_path(doc, id)
    }

    /// `//*[@id="…"]` for unique ids, else an absolute index-qualified path.
    pub fn xpath(&self, doc: &Document, id: NodeId) -> Result<String, LocatorError> {
        let node = doc.get(id).ok_or(LocatorError::UnknownNode(id))?;
        if let Some(value) = unique_id(doc, node) {
            if !value.contains('"') {
                return Ok(format!("//*[@id=\"{}\"]", value));
            }
            if !value.contains('\'') {
                return Ok(format!("//*[@id='{}']", value));
            }
        }

        let mut segments = Vec::new();
        let mut reached_root = false;
        for current in doc.ancestors(id) {
            let tag = doc.get(current).map(Node::tag).unwrap_or_default();
            let (index, _) = doc
                .position_of_type(current)
                .ok_or(LocatorError::UnknownNode(current))?;
            segments.push(format!("{}[{}]", tag, index));
            if current == doc.root() {
                reached_root = true;
                break;
            }
        }
        if !reached_root {
            return Err(LocatorError::Detached(id));
        }
        segments.reverse();
        Ok(format!("/{}", segments.join("/")))
    }

    /// Associated `<label for>`, then enclosing `<label>`, then `aria-label`.
    pub fn label(&self, doc: &Document, id: NodeId) -> Option<String> {
        let node = doc.get(id)?;
        let max = self.limits.max_text_len;

        if let Some(value) = node.id() {
            let explicit = doc.descendants().into_iter().find(|n| {
                doc.get(*n)
                    .is_some_and(|l| l.tag() == "label" && l.attr("for") == Some(value))
            });
            if let Some(text) = explicit.and_then(|l| normalized_text(&doc.text_content(l), max)) {
                return Some(text);
            }
        }

        let enclosing = doc.ancestors(id).skip(1).find(|n| {
            doc.get(*n).is_some_and(|l| l.tag() == "label")
        });
        if let Some(text) = enclosing.and_then(|l| normalized_text(&doc.text_content(l), max)) {
            return Some(text);
        }

        node.attr("aria-label").and_then(|v| normalized_text(v, max))
    }
}

fn unique_id<'a>(doc: &Document, node: &'a Node) -> Option<&'a str> {
    node.id().filter(|value| doc.count_with_id(value) == 1)
}

/// Whether `selector` matches exactly `id`. Parse failures count as no match.
fn resolves_to(doc: &Document, selector: &str, id: NodeId) -> bool {
    match doc.query_selector_all(selector) {
        Ok(found) => found == [id],
        Err(e) => {
            debug!("Discarding selector candidate: {}", e);
            false
        }
    }
}

/// `html > body > div:nth-of-type(2) > button`, disambiguating only where
/// siblings share a tag.
pub fn positional_path(doc: &Document, id: NodeId) -> Result<String, LocatorError> {
    let mut segments = Vec::new();
    let mut reached_root = false;
    for current in doc.ancestors(id) {
        let node = doc.get(current).ok_or(LocatorError::UnknownNode(current))?;
        let (index, shared) = doc
            .position_of_type(current)
            .ok_or(LocatorError::UnknownNode(current))?;
        if shared {
            segments.push(format!("{}:nth-of-type({})", node.tag(), index));
        } else {
            segments.push(node.tag().to_string());
        }
        if current == doc.root() {
            reached_root = true;
            break;
        }
    }
    if !reached_root {
        return Err(LocatorError::Detached(id));
    }
    segments.reverse();
    Ok(segments.join(" > "))
}
