//! Page snapshot model.
//!
//! A [`Document`] is a read-only arena of element and text nodes captured
//! from a live page. Nodes are stored in document (preorder) order, so
//! comparing two [`NodeId`]s compares their position in the page.

use std::collections::BTreeMap;
use std::convert::TryFrom;

use serde::{Deserialize, Serialize};

use crate::error::GuideError;

/// Opacity below which an element counts as fully transparent.
pub const TRANSPARENT_OPACITY: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

/// Viewport-relative bounding box, as reported by `getBoundingClientRect`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn top(&self) -> f64 {
        self.y
    }

    pub fn left(&self) -> f64 {
        self.x
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && self.right() > other.x
            && self.y < other.bottom()
            && self.bottom() > other.y
    }

    /// Grow the rect by `pad` on every side.
    pub fn padded(&self, pad: f64) -> Rect {
        Rect::new(
            self.x - pad,
            self.y - pad,
            self.width + pad * 2.0,
            self.height + pad * 2.0,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub scroll_x: f64,
    #[serde(default)]
    pub scroll_y: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 720.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
        }
    }
}

impl Viewport {
    pub fn rect(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// The subset of computed style that decides visibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputedStyle {
    pub display: String,
    pub visibility: String,
    pub opacity: f64,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: "block".to_string(),
            visibility: "visible".to_string(),
            opacity: 1.0,
        }
    }
}

impl ComputedStyle {
    pub fn hides(&self) -> bool {
        self.display == "none"
            || self.visibility == "hidden"
            || self.visibility == "collapse"
            || self.opacity < TRANSPARENT_OPACITY
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub rect: Rect,
    pub style: ComputedStyle,
    pub disabled: bool,
    pub value: Option<String>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Attribute value, treating an empty string as absent.
    pub fn attr_nonempty(&self, name: &str) -> Option<&str> {
        self.attr(name).filter(|v| !v.is_empty())
    }

    pub fn id(&self) -> Option<&str> {
        self.attr_nonempty("id")
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|c| c.split_ascii_whitespace().any(|c| c == class))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub data: NodeData,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "Snapshot")]
pub struct Document {
    url: String,
    title: String,
    viewport: Viewport,
    focused: Option<NodeId>,
    nodes: Vec<Node>,
}

impl Document {
    pub fn from_json(raw: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn focused(&self) -> Option<NodeId> {
        self.focused
    }

    /// The document element (`<html>`).
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes.get(id.0)?.data {
            NodeData::Element(el) => Some(el),
            NodeData::Text(_) => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0)?.parent
    }

    /// Element ancestors of `id`, nearest first, excluding `id` itself.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&p| self.parent(p))
    }

    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(move |&c| self.element(c).is_some())
    }

    /// Every node below `id` in document order. Because the arena is stored
    /// in preorder, a subtree is one contiguous range.
    pub fn descendants(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let end = self.subtree_end(id);
        (id.0 + 1..end).map(NodeId)
    }

    /// All elements in document order.
    pub fn elements(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len())
            .map(NodeId)
            .filter(move |&id| self.element(id).is_some())
    }

    fn subtree_end(&self, id: NodeId) -> usize {
        let mut cur = id;
        while let Some(&last) = self.node(cur).children.last() {
            cur = last;
        }
        cur.0 + 1
    }

    /// `true` when `node` is `ancestor` or lies inside it.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        ancestor.0 <= node.0 && node.0 < self.subtree_end(ancestor)
    }

    /// The propagation path of an event dispatched at `target`:
    /// the target followed by its ancestors.
    pub fn event_path(&self, target: NodeId) -> Vec<NodeId> {
        std::iter::once(target).chain(self.ancestors(target)).collect()
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        if let NodeData::Text(t) = &self.node(id).data {
            out.push_str(t);
        }
        for d in self.descendants(id) {
            if let NodeData::Text(t) = &self.node(d).data {
                out.push_str(t);
            }
        }
        out
    }

    /// Whitespace-collapsed, trimmed text content.
    pub fn normalized_text(&self, id: NodeId) -> String {
        self.text_content(id)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn find_by_id(&self, value: &str) -> Option<NodeId> {
        self.elements()
            .find(|&id| self.element(id).and_then(Element::id) == Some(value))
    }

    /// No ancestor-or-self hides the element and its box has area.
    pub fn is_visible(&self, id: NodeId) -> bool {
        let Some(el) = self.element(id) else {
            return false;
        };
        if !el.rect.has_area() {
            return false;
        }
        std::iter::once(id)
            .chain(self.ancestors(id))
            .filter_map(|n| self.element(n))
            .all(|e| !e.style.hides())
    }

    pub fn in_viewport(&self, id: NodeId) -> bool {
        self.element(id)
            .is_some_and(|el| el.rect.intersects(&self.viewport.rect()))
    }

    /// Rect translated into document space by the current scroll offset.
    pub fn absolute_rect(&self, id: NodeId) -> Option<Rect> {
        let r = self.element(id)?.rect;
        Some(Rect::new(
            r.x + self.viewport.scroll_x,
            r.y + self.viewport.scroll_y,
            r.width,
            r.height,
        ))
    }

    pub fn previous_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        self.element_children(parent)
            .take_while(|&c| c != id)
            .last()
    }

    pub fn next_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        self.element_children(parent)
            .skip_while(|&c| c != id)
            .nth(1)
    }

    /// 1-based position of `id` among its parent's element children that
    /// share its tag, and the size of that group.
    pub fn type_position(&self, id: NodeId) -> (usize, usize) {
        let Some(tag) = self.element(id).map(|e| e.tag.as_str()) else {
            return (1, 1);
        };
        let Some(parent) = self.parent(id) else {
            return (1, 1);
        };
        let mut index = 1;
        let mut total = 0;
        for c in self.element_children(parent) {
            if self.element(c).is_some_and(|e| e.tag == tag) {
                total += 1;
                if c.0 < id.0 {
                    index += 1;
                }
            }
        }
        (index, total)
    }
}

// Wire format produced by the in-page capture script: nodes in preorder,
// each pointing at its parent by index.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    viewport: Viewport,
    #[serde(default)]
    focused: Option<usize>,
    nodes: Vec<NodeRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeRecord {
    #[serde(default)]
    parent: Option<usize>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    attrs: BTreeMap<String, String>,
    #[serde(default)]
    rect: Rect,
    #[serde(default)]
    style: ComputedStyle,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    value: Option<String>,
}

impl TryFrom<Snapshot> for Document {
    type Error = GuideError;

    fn try_from(snap: Snapshot) -> Result<Self, Self::Error> {
        if snap.nodes.is_empty() {
            return Err(GuideError::Snapshot("snapshot has no nodes".into()));
        }
        let mut nodes: Vec<Node> = Vec::with_capacity(snap.nodes.len());
        for (i, rec) in snap.nodes.into_iter().enumerate() {
            let data = match (rec.tag, rec.text) {
                (Some(tag), None) => NodeData::Element(Element {
                    tag: tag.to_ascii_lowercase(),
                    attrs: rec.attrs,
                    rect: rec.rect,
                    style: rec.style,
                    disabled: rec.disabled,
                    value: rec.value,
                }),
                (None, Some(text)) => NodeData::Text(text),
                _ => {
                    return Err(GuideError::Snapshot(format!(
                        "node {i} must have exactly one of `tag` or `text`"
                    )));
                }
            };
            let parent = match (i, rec.parent) {
                (0, None) => None,
                (0, Some(_)) => {
                    return Err(GuideError::Snapshot("root node has a parent".into()));
                }
                (_, Some(p)) if p < i => Some(NodeId(p)),
                (_, p) => {
                    return Err(GuideError::Snapshot(format!(
                        "node {i} has invalid parent {p:?}"
                    )));
                }
            };
            if i == 0 && !matches!(data, NodeData::Element(_)) {
                return Err(GuideError::Snapshot("root node must be an element".into()));
            }
            if let Some(p) = parent {
                if !matches!(nodes[p.0].data, NodeData::Element(_)) {
                    return Err(GuideError::Snapshot(format!(
                        "node {i} is attached to a text node"
                    )));
                }
                nodes[p.0].children.push(NodeId(i));
            }
            nodes.push(Node {
                parent,
                children: Vec::new(),
                data,
            });
        }

        let doc = Document {
            url: snap.url,
            title: snap.title,
            viewport: snap.viewport,
            focused: snap.focused.map(NodeId).filter(|f| f.0 < nodes.len()),
            nodes,
        };
        doc.check_preorder()?;
        Ok(doc)
    }
}

impl Document {
    fn check_preorder(&self) -> crate::Result<()> {
        let mut expected = 0;
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            if id.0 != expected {
                return Err(GuideError::Snapshot(
                    "nodes must be listed in document order".into(),
                ));
            }
            expected += 1;
            stack.extend(self.node(id).children.iter().rev().copied());
        }
        Ok(())
    }
}

/// Declarative element tree used to build documents in tools and tests.
#[derive(Debug, Clone)]
pub struct ElementSpec {
    element: Element,
    focused: bool,
    children: Vec<ChildSpec>,
}

#[derive(Debug, Clone)]
enum ChildSpec {
    Element(ElementSpec),
    Text(String),
}

/// Shorthand for [`ElementSpec::new`].
pub fn el(tag: &str) -> ElementSpec {
    ElementSpec::new(tag)
}

impl ElementSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            element: Element {
                tag: tag.to_ascii_lowercase(),
                attrs: BTreeMap::new(),
                rect: Rect::default(),
                style: ComputedStyle::default(),
                disabled: false,
                value: None,
            },
            focused: false,
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.element.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn id(self, value: &str) -> Self {
        self.attr("id", value)
    }

    pub fn text(mut self, text: &str) -> Self {
        self.children.push(ChildSpec::Text(text.to_string()));
        self
    }

    pub fn rect(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.element.rect = Rect::new(x, y, width, height);
        self
    }

    pub fn style(mut self, style: ComputedStyle) -> Self {
        self.element.style = style;
        self
    }

    /// `display: none`
    pub fn hidden(mut self) -> Self {
        self.element.style.display = "none".to_string();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.element.disabled = true;
        self
    }

    pub fn focused(mut self) -> Self {
        self.focused = true;
        self
    }

    pub fn child(mut self, child: ElementSpec) -> Self {
        self.children.push(ChildSpec::Element(child));
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = ElementSpec>) -> Self {
        self.children
            .extend(children.into_iter().map(ChildSpec::Element));
        self
    }
}

/// Builds a [`Document`] from an [`ElementSpec`] tree rooted at `<html>`.
#[derive(Debug, Clone)]
pub struct DocumentBuilder {
    url: String,
    title: String,
    viewport: Viewport,
}

impl DocumentBuilder {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            title: String::new(),
            viewport: Viewport::default(),
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    /// Wraps `body` in an `<html>` element that fills the viewport.
    pub fn body(self, body: ElementSpec) -> Document {
        let vp = self.viewport;
        let html = el("html").rect(0.0, 0.0, vp.width, vp.height).child(body);
        self.build(html)
    }

    pub fn build(self, root: ElementSpec) -> Document {
        let mut nodes = Vec::new();
        let mut focused = None;
        push_spec(&mut nodes, &mut focused, None, root);
        Document {
            url: self.url,
            title: self.title,
            viewport: self.viewport,
            focused,
            nodes,
        }
    }
}

fn push_spec(
    nodes: &mut Vec<Node>,
    focused: &mut Option<NodeId>,
    parent: Option<NodeId>,
    spec: ElementSpec,
) {
    let id = NodeId(nodes.len());
    if spec.focused {
        *focused = Some(id);
    }
    nodes.push(Node {
        parent,
        children: Vec::new(),
        data: NodeData::Element(spec.element),
    });
    if let Some(p) = parent {
        nodes[p.0].children.push(id);
    }
    for child in spec.children {
        match child {
            ChildSpec::Element(c) => push_spec(nodes, focused, Some(id), c),
            ChildSpec::Text(t) => {
                let tid = NodeId(nodes.len());
                nodes.push(Node {
                    parent: Some(id),
                    children: Vec::new(),
                    data: NodeData::Text(t),
                });
                nodes[id.0].children.push(tid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        DocumentBuilder::new("https://example.test/").body(
            el("body").rect(0.0, 0.0, 1280.0, 2000.0).children([
                el("div").rect(0.0, 0.0, 100.0, 100.0).hidden().child(
                    el("a")
                        .attr("href", "/x")
                        .rect(0.0, 0.0, 50.0, 20.0)
                        .text("Hidden"),
                ),
                el("p")
                    .rect(0.0, 100.0, 100.0, 20.0)
                    .text("Hello ")
                    .child(el("b").rect(0.0, 100.0, 10.0, 10.0).text("big"))
                    .text("  world"),
                el("p").rect(0.0, 900.0, 100.0, 20.0),
            ]),
        )
    }

    #[test]
    fn arena_is_preorder() {
        let doc = sample();
        assert!(doc.check_preorder().is_ok());
        let body = NodeId(1);
        assert_eq!(doc.element(body).map(|e| e.tag.as_str()), Some("body"));
        assert!(doc.contains(body, NodeId(doc.len() - 1)));
        assert!(!doc.contains(NodeId(2), NodeId(5)));
    }

    #[test]
    fn text_content_preserves_order() {
        let doc = sample();
        let p = doc
            .elements()
            .find(|&id| doc.element(id).is_some_and(|e| e.tag == "p"))
            .unwrap();
        assert_eq!(doc.normalized_text(p), "Hello big world");
    }

    #[test]
    fn hidden_ancestor_hides_descendants() {
        let doc = sample();
        let a = doc
            .elements()
            .find(|&id| doc.element(id).is_some_and(|e| e.tag == "a"))
            .unwrap();
        assert!(!doc.is_visible(a));
    }

    #[test]
    fn type_position_counts_same_tag_siblings() {
        let doc = sample();
        let ps: Vec<_> = doc
            .elements()
            .filter(|&id| doc.element(id).is_some_and(|e| e.tag == "p"))
            .collect();
        assert_eq!(doc.type_position(ps[0]), (1, 2));
        assert_eq!(doc.type_position(ps[1]), (2, 2));
        assert!(!doc.in_viewport(ps[1]));
    }

    #[test]
    fn snapshot_json_round_trips_into_document() {
        let raw = r#"{
            "url": "https://example.test/",
            "title": "Example",
            "viewport": {"width": 800, "height": 600, "scrollY": 40},
            "focused": 2,
            "nodes": [
                {"tag": "HTML", "rect": {"x":0,"y":0,"width":800,"height":600}},
                {"parent": 0, "tag": "body", "rect": {"x":0,"y":0,"width":800,"height":600}},
                {"parent": 1, "tag": "input", "attrs": {"name": "q"}, "value": "S123", "rect": {"x":10,"y":10,"width":200,"height":30}},
                {"parent": 1, "text": "hi"}
            ]
        }"#;
        let doc = Document::from_json(raw).unwrap();
        assert_eq!(doc.len(), 4);
        assert_eq!(doc.focused(), Some(NodeId(2)));
        assert_eq!(doc.element(NodeId(0)).unwrap().tag, "html");
        assert_eq!(doc.absolute_rect(NodeId(2)).unwrap().y, 50.0);
        assert_eq!(doc.element(NodeId(2)).unwrap().value.as_deref(), Some("S123"));
        assert_eq!(doc.element(NodeId(1)).unwrap().value, None);
    }

    #[test]
    fn snapshot_rejects_out_of_order_nodes() {
        let raw = r#"{
            "url": "about:blank",
            "nodes": [
                {"tag": "html"},
                {"parent": 0, "tag": "body"},
                {"parent": 0, "tag": "head"},
                {"parent": 1, "tag": "div"}
            ]
        }"#;
        assert!(matches!(
            Document::from_json(raw),
            Err(GuideError::Json(_))
        ));
    }
}
