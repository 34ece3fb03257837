//! Minimal document model the engine reasons over.
//!
//! Nodes live in an arena owned by the `Document`; a `NodeId` is a plain index
//! and never keeps a node alive. Detached nodes stay in the arena but are no
//! longer reachable from the root.

use crate::selector::{Selector, SelectorError};
use scribe_common::protocol::{PageMetadata, Point, Rect, Size};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    rect: Rect,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    /// Lowercase tag name.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Non-empty `id` attribute.
    pub fn id(&self) -> Option<&str> {
        self.attr("id").filter(|id| !id.is_empty())
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class")
            .unwrap_or_default()
            .split_ascii_whitespace()
    }

    pub fn own_text(&self) -> &str {
        &self.text
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    url: String,
    title: String,
    viewport: Size,
    scroll: Point,
    user_agent: String,
    nodes: Vec<Node>,
    root: NodeId,
    body: NodeId,
}

impl Document {
    /// An empty `<html><body></body></html>` document.
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        let mut doc = Self {
            url: url.into(),
            title: title.into(),
            viewport: Size {
                width: 1280.0,
                height: 720.0,
            },
            scroll: Point::default(),
            user_agent: String::new(),
            nodes: Vec::new(),
            root: NodeId(0),
            body: NodeId(0),
        };
        doc.root = doc.alloc("html", None);
        doc.body = doc.append_child(doc.root, "body");
        doc
    }

    fn alloc(&mut self, tag: &str, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            tag: tag.to_ascii_lowercase(),
            attributes: BTreeMap::new(),
            text: String::new(),
            rect: Rect::default(),
            parent,
            children: Vec::new(),
        });
        id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_location(&mut self, url: impl Into<String>, title: impl Into<String>) {
        self.url = url.into();
        self.title = title.into();
    }

    pub fn set_viewport(&mut self, viewport: Size, scroll: Point) {
        self.viewport = viewport;
        self.scroll = scroll;
    }

    pub fn set_user_agent(&mut self, agent: impl Into<String>) {
        self.user_agent = agent.into();
    }

    pub fn scroll(&self) -> Point {
        self.scroll
    }

    pub fn metadata(&self) -> PageMetadata {
        PageMetadata {
            viewport_size: self.viewport,
            scroll_offset: self.scroll,
            agent_string: self.user_agent.clone(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn append_child(&mut self, parent: NodeId, tag: &str) -> NodeId {
        let id = self.alloc(tag, Some(parent));
        if let Some(p) = self.nodes.get_mut(parent.0) {
            p.children.push(id);
        }
        id
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: impl Into<String>) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.attributes
                .insert(name.to_ascii_lowercase(), value.into());
        }
    }

    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.text = text.into();
        }
    }

    pub fn set_rect(&mut self, id: NodeId, rect: Rect) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.rect = rect;
        }
    }

    /// Remove `id` from its parent. The node keeps its own subtree.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.nodes.get(id.0).and_then(|n| n.parent) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(parent.0) {
            p.children.retain(|c| *c != id);
        }
        if let Some(n) = self.nodes.get_mut(id.0) {
            n.parent = None;
        }
    }

    /// Whether `id` is reachable from the document root.
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.ancestors(id).last() == Some(self.root)
    }

    /// `id` followed by its ancestors up to the topmost reachable node.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let start = self.get(id).map(|_| id);
        std::iter::successors(start, |n| self.get(*n).and_then(|node| node.parent))
    }

    /// Closest inclusive ancestor with the given tag.
    pub fn closest(&self, id: NodeId, tag: &str) -> Option<NodeId> {
        self.ancestors(id)
            .find(|n| self.get(*n).is_some_and(|node| node.tag == tag))
    }

    /// Connected nodes in document order.
    pub fn descendants(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.get(id) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Concatenated text of `id` and its subtree.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.get(id) else {
            return;
        };
        if !node.text.is_empty() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&node.text);
        }
        for child in &node.children {
            self.collect_text(*child, out);
        }
    }

    pub fn count_with_id(&self, value: &str) -> usize {
        self.descendants()
            .into_iter()
            .filter(|n| self.get(*n).and_then(Node::id) == Some(value))
            .count()
    }

    pub fn element_by_id(&self, value: &str) -> Option<NodeId> {
        self.descendants()
            .into_iter()
            .find(|n| self.get(*n).and_then(Node::id) == Some(value))
    }

    /// 1-based position of `id` among its parent's children sharing its tag,
    /// and whether any sibling shares that tag.
    pub fn position_of_type(&self, id: NodeId) -> Option<(usize, bool)> {
        let node = self.get(id)?;
        let Some(parent) = node.parent.and_then(|p| self.get(p)) else {
            return Some((1, false));
        };
        let same: Vec<NodeId> = parent
            .children
            .iter()
            .copied()
            .filter(|c| self.get(*c).is_some_and(|n| n.tag == node.tag))
            .collect();
        let index = same.iter().position(|c| *c == id)? + 1;
        Some((index, same.len() > 1))
    }

    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>, SelectorError> {
        let parsed = Selector::parse(selector)?;
        Ok(self
            .descendants()
            .into_iter()
            .filter(|n| parsed.matches(self, *n))
            .collect())
    }

    pub fn query_selector(&self, selector: &str) -> Result<Option<NodeId>, SelectorError> {
        Ok(self.query_selector_all(selector)?.into_iter().next())
    }

    /// Build a document from a declarative fixture.
    pub fn from_spec(spec: &DocumentSpec) -> Self {
        let mut doc = Document::new(spec.url.clone(), spec.title.clone());
        if let Some(viewport) = spec.viewport {
            doc.viewport = viewport;
        }
        doc.scroll = spec.scroll.unwrap_or_default();
        doc.user_agent = spec.user_agent.clone().unwrap_or_default();
        for child in &spec.body {
            doc.build(doc.body, child);
        }
        doc
    }

    fn build(&mut self, parent: NodeId, spec: &ElementSpec) {
        let id = self.append_child(parent, &spec.tag);
        for (k, v) in &spec.attrs {
            self.set_attr(id, k, v.clone());
        }
        if let Some(text) = &spec.text {
            self.set_text(id, text.clone());
        }
        if let Some(rect) = spec.rect {
            self.set_rect(id, rect);
        }
        for child in &spec.children {
            self.build(id, child);
        }
    }
}

/// Serializable page fixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSpec {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub viewport: Option<Size>,
    #[serde(default)]
    pub scroll: Option<Point>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub body: Vec<ElementSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementSpec {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub rect: Option<Rect>,
    #[serde(default)]
    pub children: Vec<ElementSpec>,
}
