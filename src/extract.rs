//! Page model extraction: turns a [`Document`] into the ordered list of
//! interactive elements the planner ranks.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::config::GuideConfig;
use crate::dom::{Document, NodeData, NodeId};
use crate::error::Result;
use crate::selector::{Selector, css_escape, xpath_literal};
use crate::step::truncate;

pub const ELEMENT_TEXT_MAX: usize = 200;

const MODAL_SELECTOR: &str = "dialog[open], [role=\"dialog\"][aria-modal=\"true\"], \
                              [role=\"alertdialog\"][aria-modal=\"true\"]";
const INPUT_LIKE: &str = "input, textarea, select, [contenteditable=\"true\"]";
const BUTTON_LIKE: &str = "button, [role=\"button\"], a[href]";
const MODAL_MIN_WIDTH: f64 = 50.0;
const PANEL_MAX_DEPTH: usize = 15;
const PANEL_MIN_INTERACTIVE: usize = 3;
const TEXT_SKIP_TAGS: [&str; 4] = ["script", "style", "noscript", "svg"];

/// Absolute document-space geometry.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ElementRect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

impl ElementRect {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
}

/// Snapshot of one interactive node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageElement {
    #[serde(default)]
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,
    pub tag: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_test_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default)]
    pub css_selector: String,
    #[serde(default)]
    pub xpath: String,
    #[serde(default)]
    pub rect: ElementRect,
    #[serde(default)]
    pub is_visible: bool,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_context: Option<FormContext>,
}

impl PageElement {
    pub fn is_form_field(&self) -> bool {
        matches!(self.tag.as_str(), "input" | "textarea" | "select")
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    pub url: String,
    pub title: String,
    pub elements: Vec<PageElement>,
    pub page_text: String,
}

/// The container extraction concentrates on, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivePanel {
    pub container: NodeId,
    /// `false` when the container covers most of the viewport: its elements
    /// still sort first, but the rest of the page is extracted too.
    pub scoped: bool,
}

pub struct PageModelExtractor {
    interactive: Vec<Selector>,
    modal: Selector,
    input_like: Selector,
    button_like: Selector,
    max_elements: usize,
    max_page_text: usize,
    panel_area_ratio: f64,
}

impl PageModelExtractor {
    pub fn new(config: &GuideConfig) -> Result<Self> {
        let interactive = config
            .interactive_selectors
            .iter()
            .map(|s| Selector::parse(s))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            interactive,
            modal: Selector::parse(MODAL_SELECTOR)?,
            input_like: Selector::parse(INPUT_LIKE)?,
            button_like: Selector::parse(BUTTON_LIKE)?,
            max_elements: config.max_elements,
            max_page_text: config.max_page_text,
            panel_area_ratio: config.panel_area_ratio,
        })
    }

    pub fn extract(&self, doc: &Document) -> PageData {
        let panel = self.active_panel(doc);
        let scope = panel.filter(|p| p.scoped).map(|p| p.container);

        let mut seen = HashSet::new();
        let mut picked: Vec<NodeId> = Vec::new();
        for selector in &self.interactive {
            let matches = match scope {
                Some(s) => selector.query_within(doc, s),
                None => selector.query_all(doc),
            };
            for id in matches {
                if seen.insert(id) {
                    picked.push(id);
                }
            }
        }

        let total = picked.len();
        picked.retain(|&id| {
            doc.is_visible(id) && (scope.is_none() || doc.in_viewport(id))
        });

        let mut keyed: Vec<(bool, bool, f64, NodeId)> = picked
            .into_iter()
            .map(|id| {
                let in_panel = panel.is_some_and(|p| doc.contains(p.container, id));
                let top = doc.absolute_rect(id).map_or(0.0, |r| r.y);
                (in_panel, doc.in_viewport(id), top, id)
            })
            .collect();
        keyed.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.cmp(&a.1))
                .then(a.2.total_cmp(&b.2))
                .then(a.3.cmp(&b.3))
        });
        keyed.truncate(self.max_elements);

        let elements: Vec<PageElement> = keyed
            .into_iter()
            .enumerate()
            .map(|(index, (.., id))| describe(doc, id, index))
            .collect();

        info!(
            url = doc.url(),
            matched = total,
            kept = elements.len(),
            panel = ?panel,
            "extracted page model"
        );

        PageData {
            url: doc.url().to_string(),
            title: doc.title().to_string(),
            elements,
            page_text: page_text(doc, self.max_page_text),
        }
    }

    /// An open modal dialog, or the nearest container around the focused
    /// element that looks like a self-contained form.
    pub fn active_panel(&self, doc: &Document) -> Option<ActivePanel> {
        let modal = self.modal.query_all(doc).into_iter().rev().find(|&id| {
            doc.is_visible(id)
                && doc
                    .element(id)
                    .is_some_and(|e| e.rect.width > MODAL_MIN_WIDTH)
        });
        if let Some(container) = modal {
            debug!(?container, "modal dialog is open");
            return Some(ActivePanel {
                container,
                scoped: true,
            });
        }

        let focused = doc.focused()?;
        if focused == doc.root() || doc.element(focused).is_some_and(|e| e.tag == "body") {
            return None;
        }

        let viewport_area = doc.viewport().area();
        let mut oversized = None;
        for ancestor in doc.ancestors(focused).take(PANEL_MAX_DEPTH) {
            let Some(el) = doc.element(ancestor) else {
                break;
            };
            if el.tag == "body" || el.tag == "html" {
                break;
            }
            let inputs = self.input_like.query_within(doc, ancestor).len();
            let buttons = self.button_like.query_within(doc, ancestor).len();
            if inputs >= 1 && buttons >= 1 && inputs + buttons >= PANEL_MIN_INTERACTIVE {
                if el.rect.area() < viewport_area * self.panel_area_ratio {
                    debug!(container = ?ancestor, inputs, buttons, "focused panel");
                    return Some(ActivePanel {
                        container: ancestor,
                        scoped: true,
                    });
                }
                oversized.get_or_insert(ancestor);
            }
        }
        oversized.map(|container| ActivePanel {
            container,
            scoped: false,
        })
    }
}

fn describe(doc: &Document, id: NodeId, index: usize) -> PageElement {
    let Some(el) = doc.element(id) else {
        return PageElement::default();
    };
    let owned = |name: &str| el.attr(name).map(str::to_string);
    let abs = doc.absolute_rect(id).unwrap_or_default();

    let href = if el.tag == "a" {
        el.attr_nonempty("href").map(|h| absolute_href(doc.url(), h))
    } else {
        None
    };

    let form_context = matches!(el.tag.as_str(), "input" | "textarea" | "select").then(|| {
        FormContext {
            label: label_for(doc, id),
            field_type: Some(owned("type").unwrap_or_else(|| el.tag.clone())),
        }
    });

    PageElement {
        index,
        node: Some(id),
        tag: el.tag.clone(),
        input_type: owned("type"),
        id: el.id().map(str::to_string),
        name: owned("name"),
        aria_label: owned("aria-label"),
        text: truncate(&doc.normalized_text(id), ELEMENT_TEXT_MAX).to_string(),
        placeholder: owned("placeholder"),
        data_test_id: owned("data-testid"),
        role: owned("role"),
        href,
        css_selector: stable_selector(doc, id),
        xpath: xpath_for(doc, id),
        rect: ElementRect {
            top: abs.y,
            left: abs.x,
            width: abs.width,
            height: abs.height,
        },
        is_visible: doc.is_visible(id),
        is_disabled: el.disabled || el.attr("aria-disabled") == Some("true"),
        form_context,
    }
}

fn absolute_href(base: &str, href: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(href))
        .map(String::from)
        .unwrap_or_else(|_| href.to_string())
}

/// A CSS selector for `id`, preferring attributes that survive re-renders:
/// `id`, `data-testid`, `aria-label`, `name`, then a positional path.
pub fn stable_selector(doc: &Document, id: NodeId) -> String {
    let Some(el) = doc.element(id) else {
        return String::new();
    };
    if let Some(v) = el.id() {
        return format!("#{}", css_escape(v));
    }
    if let Some(v) = el.attr_nonempty("data-testid") {
        return format!("[data-testid=\"{}\"]", css_escape(v));
    }
    if let Some(v) = el.attr_nonempty("aria-label") {
        return format!("[aria-label=\"{}\"]", css_escape(v));
    }
    if let Some(v) = el.attr_nonempty("name") {
        return format!("{}[name=\"{}\"]", el.tag, css_escape(v));
    }

    let mut path: Vec<String> = Vec::new();
    let mut cur = Some(id);
    while let Some(node) = cur {
        if node == doc.root() {
            break;
        }
        let Some(e) = doc.element(node) else {
            break;
        };
        if let Some(v) = e.id() {
            path.push(format!("#{}", css_escape(v)));
            break;
        }
        let (index, total) = doc.type_position(node);
        if total > 1 {
            path.push(format!("{}:nth-of-type({index})", e.tag));
        } else {
            path.push(e.tag.clone());
        }
        cur = doc.parent(node);
    }
    path.reverse();
    path.join(" > ")
}

/// XPath built from the same ancestor walk, with 1-based same-tag indices.
pub fn xpath_for(doc: &Document, id: NodeId) -> String {
    let mut segments: Vec<String> = Vec::new();
    let mut cur = Some(id);
    while let Some(node) = cur {
        let Some(e) = doc.element(node) else {
            break;
        };
        if let Some(lit) = e.id().and_then(xpath_literal) {
            segments.reverse();
            let anchor = format!("//*[@id={lit}]");
            return if segments.is_empty() {
                anchor
            } else {
                format!("{anchor}/{}", segments.join("/"))
            };
        }
        segments.push(format!("{}[{}]", e.tag, doc.type_position(node).0));
        cur = doc.parent(node);
    }
    segments.reverse();
    format!("/{}", segments.join("/"))
}

/// Label text for a form control; first match wins: `<label for>`,
/// enclosing `<label>`, preceding sibling `<label>`, `aria-labelledby`.
pub fn label_for(doc: &Document, id: NodeId) -> Option<String> {
    let el = doc.element(id)?;
    let text_of = |n: NodeId| Some(doc.normalized_text(n)).filter(|t| !t.is_empty());

    if let Some(own) = el.id() {
        let explicit = doc.elements().find(|&n| {
            doc.element(n)
                .is_some_and(|l| l.tag == "label" && l.attr("for") == Some(own))
        });
        if let Some(t) = explicit.and_then(text_of) {
            return Some(t);
        }
    }
    let enclosing = doc
        .ancestors(id)
        .find(|&a| doc.element(a).is_some_and(|e| e.tag == "label"));
    if let Some(t) = enclosing.and_then(text_of) {
        return Some(t);
    }
    let previous = doc
        .previous_element_sibling(id)
        .filter(|&p| doc.element(p).is_some_and(|e| e.tag == "label"));
    if let Some(t) = previous.and_then(text_of) {
        return Some(t);
    }
    el.attr_nonempty("aria-labelledby")
        .and_then(|by| doc.find_by_id(by))
        .and_then(text_of)
}

/// Visible page text, joined by spaces and capped at `max` characters.
pub fn page_text(doc: &Document, max: usize) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let mut len = 0;
    for id in doc.descendants(doc.root()) {
        if len >= max {
            break;
        }
        let NodeData::Text(text) = &doc.node(id).data else {
            continue;
        };
        let text = text.trim();
        if text.chars().count() < 2 {
            continue;
        }
        let Some(parent) = doc.parent(id) else {
            continue;
        };
        let skipped = std::iter::once(parent)
            .chain(doc.ancestors(parent))
            .filter_map(|a| doc.element(a))
            .any(|e| TEXT_SKIP_TAGS.contains(&e.tag.as_str()));
        if skipped || !doc.is_visible(parent) {
            continue;
        }
        len += text.chars().count();
        parts.push(text);
    }
    truncate(&parts.join(" "), max).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{DocumentBuilder, ElementSpec, Viewport, el};
    use crate::selector::{Selector, XPath};
    use pretty_assertions::assert_eq;

    fn extractor() -> PageModelExtractor {
        PageModelExtractor::new(&GuideConfig::default()).unwrap()
    }

    fn page(body: ElementSpec) -> Document {
        DocumentBuilder::new("https://gov.example/home")
            .title("Home")
            .body(body.rect(0.0, 0.0, 1280.0, 3000.0))
    }

    fn by_text<'a>(data: &'a PageData, text: &str) -> &'a PageElement {
        data.elements
            .iter()
            .find(|e| e.text == text)
            .unwrap_or_else(|| panic!("no element with text {text:?}"))
    }

    #[test]
    fn id_wins_over_test_id() {
        let doc = page(el("body").child(
            el("button")
                .id("go")
                .attr("data-testid", "go-btn")
                .rect(10.0, 10.0, 80.0, 30.0)
                .text("Go"),
        ));
        let data = extractor().extract(&doc);
        assert_eq!(data.elements[0].css_selector, "#go");
        assert_eq!(data.elements[0].xpath, "//*[@id=\"go\"]");
    }

    #[test]
    fn selector_priority_falls_through_attributes() {
        let doc = page(el("body").children([
            el("a").attr("href", "/a").attr("data-testid", "t").rect(0.0, 0.0, 50.0, 20.0).text("A"),
            el("a").attr("href", "/b").attr("aria-label", "Bee link").rect(0.0, 30.0, 50.0, 20.0).text("B"),
            el("input").attr("name", "email").rect(0.0, 60.0, 50.0, 20.0),
        ]));
        let data = extractor().extract(&doc);
        assert_eq!(by_text(&data, "A").css_selector, "[data-testid=\"t\"]");
        assert_eq!(by_text(&data, "B").css_selector, "[aria-label=\"Bee\\ link\"]");
        let input = data.elements.iter().find(|e| e.tag == "input").unwrap();
        assert_eq!(input.css_selector, "input[name=\"email\"]");
    }

    #[test]
    fn positional_path_stops_at_id_ancestor_and_resolves() {
        let doc = page(el("body").child(
            el("div").id("main").children([
                el("a").attr("href", "/one").rect(0.0, 0.0, 60.0, 20.0).text("One"),
                el("span").child(el("a").attr("href", "/x").rect(0.0, 25.0, 60.0, 20.0).text("Inner")),
                el("a").attr("href", "/two").rect(0.0, 50.0, 60.0, 20.0).text("Two"),
            ]),
        ));
        let data = extractor().extract(&doc);
        let two = by_text(&data, "Two");
        assert_eq!(two.css_selector, "#main > a:nth-of-type(2)");
        assert_eq!(two.xpath, "//*[@id=\"main\"]/a[2]");
        assert_eq!(by_text(&data, "Inner").css_selector, "#main > span > a");

        let via_css = Selector::parse(&two.css_selector).unwrap().query_first(&doc);
        let via_xpath = XPath::parse(&two.xpath).unwrap().first(&doc);
        assert_eq!(via_css, two.node);
        assert_eq!(via_xpath, two.node);
        assert_eq!(two.href.as_deref(), Some("https://gov.example/two"));
    }

    #[test]
    fn xpath_without_ids_is_absolute() {
        let doc = page(el("body").children([
            el("p").rect(0.0, 0.0, 10.0, 10.0),
            el("p").child(el("button").rect(0.0, 0.0, 40.0, 20.0).text("Ok")),
        ]));
        let data = extractor().extract(&doc);
        assert_eq!(data.elements[0].xpath, "/html[1]/body[1]/p[2]/button[1]");
        assert_eq!(data.elements[0].css_selector, "body > p:nth-of-type(2) > button");
    }

    #[test]
    fn hidden_subtrees_and_empty_boxes_are_dropped() {
        let doc = page(el("body").children([
            el("div").hidden().child(el("button").rect(0.0, 0.0, 80.0, 30.0).text("Ghost")),
            el("button").rect(0.0, 0.0, 0.0, 0.0).text("Zero"),
            el("button")
                .style(crate::dom::ComputedStyle {
                    opacity: 0.0,
                    ..Default::default()
                })
                .rect(0.0, 40.0, 80.0, 30.0)
                .text("Clear"),
            el("button").rect(0.0, 80.0, 80.0, 30.0).text("Real"),
        ]));
        let data = extractor().extract(&doc);
        let texts: Vec<&str> = data.elements.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["Real"]);
    }

    #[test]
    fn orders_viewport_first_then_top_to_bottom() {
        let doc = page(el("body").children([
            el("a").attr("href", "/far").rect(0.0, 2000.0, 50.0, 20.0).text("Far"),
            el("a").attr("href", "/low").rect(0.0, 500.0, 50.0, 20.0).text("Low"),
            el("a").attr("href", "/high").rect(0.0, 100.0, 50.0, 20.0).text("High"),
        ]));
        let data = extractor().extract(&doc);
        let texts: Vec<&str> = data.elements.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["High", "Low", "Far"]);
        let indices: Vec<usize> = data.elements.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn caps_element_count() {
        let links = (0..20).map(|i| {
            el("a")
                .attr("href", &format!("/{i}"))
                .rect(0.0, i as f64 * 30.0, 50.0, 20.0)
                .text(&format!("L{i}"))
        });
        let doc = page(el("body").children(links));
        let config = GuideConfig {
            max_elements: 5,
            ..GuideConfig::default()
        };
        let data = PageModelExtractor::new(&config).unwrap().extract(&doc);
        assert_eq!(data.elements.len(), 5);
        assert_eq!(data.elements[4].text, "L4");
    }

    #[test]
    fn labels_follow_priority() {
        let doc = page(el("body").children([
            el("label").attr("for", "nric").text("NRIC / ID"),
            el("input").id("nric").rect(0.0, 0.0, 100.0, 20.0),
            el("label").text("Wrapped ").child(el("input").attr("name", "w").rect(0.0, 30.0, 100.0, 20.0)),
            el("div").children([
                el("label").text("Sibling"),
                el("select").attr("name", "s").rect(0.0, 60.0, 100.0, 20.0),
            ]),
            el("span").id("lbl").text("By reference"),
            el("textarea").attr("aria-labelledby", "lbl").rect(0.0, 90.0, 100.0, 40.0),
        ]));
        let data = extractor().extract(&doc);
        let label = |tag: &str, nth: usize| {
            data.elements
                .iter()
                .filter(|e| e.tag == tag)
                .nth(nth)
                .and_then(|e| e.form_context.clone())
                .and_then(|f| f.label)
        };
        assert_eq!(label("input", 0).as_deref(), Some("NRIC / ID"));
        assert_eq!(label("input", 1).as_deref(), Some("Wrapped"));
        assert_eq!(label("select", 0).as_deref(), Some("Sibling"));
        assert_eq!(label("textarea", 0).as_deref(), Some("By reference"));
        let field = data.elements[0].form_context.clone().unwrap();
        assert_eq!(field.field_type.as_deref(), Some("input"));
    }

    #[test]
    fn disabled_flag_and_aria_disabled() {
        let doc = page(el("body").children([
            el("button").disabled().rect(0.0, 0.0, 80.0, 30.0).text("Native"),
            el("button").attr("aria-disabled", "true").rect(0.0, 40.0, 80.0, 30.0).text("Aria"),
        ]));
        let data = extractor().extract(&doc);
        assert!(data.elements.iter().all(|e| e.is_disabled));
    }

    #[test]
    fn open_modal_scopes_extraction() {
        let doc = page(el("body").children([
            el("a").attr("href", "/bg").rect(0.0, 10.0, 50.0, 20.0).text("Background"),
            el("div")
                .attr("role", "dialog")
                .attr("aria-modal", "true")
                .rect(300.0, 100.0, 400.0, 300.0)
                .children([
                    el("button").rect(320.0, 300.0, 80.0, 30.0).text("Confirm"),
                    el("button").rect(420.0, 300.0, 80.0, 30.0).text("Cancel"),
                ]),
        ]));
        let data = extractor().extract(&doc);
        let texts: Vec<&str> = data.elements.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["Confirm", "Cancel"]);
    }

    #[test]
    fn scoped_extraction_keeps_only_on_screen_elements() {
        let below_fold = el("button").rect(320.0, 900.0, 80.0, 30.0).text("Later");
        let doc = page(el("body").child(
            el("div")
                .attr("role", "dialog")
                .attr("aria-modal", "true")
                .rect(300.0, 100.0, 400.0, 1000.0)
                .children([
                    el("button").rect(320.0, 300.0, 80.0, 30.0).text("Now"),
                    below_fold.clone(),
                ]),
        ));
        let texts = |data: &PageData| -> Vec<String> {
            data.elements.iter().map(|e| e.text.clone()).collect()
        };
        assert_eq!(doc.viewport().height, 720.0);
        assert_eq!(texts(&extractor().extract(&doc)), vec!["Now"]);

        let unscoped = page(el("body").children([
            el("button").rect(320.0, 300.0, 80.0, 30.0).text("Now"),
            below_fold,
        ]));
        assert_eq!(texts(&extractor().extract(&unscoped)), vec!["Now", "Later"]);
    }

    #[test]
    fn focused_form_panel_scopes_unless_it_fills_the_viewport() {
        let form = |w: f64, h: f64| {
            el("form").rect(0.0, 100.0, w, h).children([
                el("input").attr("name", "a").focused().rect(10.0, 110.0, 100.0, 20.0),
                el("input").attr("name", "b").rect(10.0, 140.0, 100.0, 20.0),
                el("button").rect(10.0, 170.0, 80.0, 30.0).text("Send"),
            ])
        };
        let outside = el("a").attr("href", "/other").rect(0.0, 10.0, 50.0, 20.0).text("Other");

        let small = page(el("body").children([outside.clone(), form(400.0, 200.0)]));
        let data = extractor().extract(&small);
        assert_eq!(data.elements.len(), 3);
        assert!(data.elements.iter().all(|e| e.text != "Other"));

        let big = page(el("body").children([outside, form(1280.0, 700.0)]));
        let data = extractor().extract(&big);
        assert_eq!(data.elements.len(), 4);
        assert_eq!(data.elements.last().map(|e| e.text.as_str()), Some("Other"));
    }

    #[test]
    fn page_text_skips_scripts_and_hidden_text() {
        let doc = DocumentBuilder::new("https://example.test/")
            .viewport(Viewport::default())
            .body(el("body").rect(0.0, 0.0, 1280.0, 720.0).children([
                el("h1").rect(0.0, 0.0, 500.0, 40.0).text("Welcome"),
                el("script").rect(0.0, 0.0, 1.0, 1.0).text("var x = 1;"),
                el("p").hidden().rect(0.0, 0.0, 1.0, 1.0).text("secret"),
                el("p").rect(0.0, 50.0, 500.0, 20.0).text(" a ").text("Services"),
            ]));
        assert_eq!(page_text(&doc, 2000), "Welcome Services");
        assert_eq!(page_text(&doc, 4), "Welc");
    }

    #[test]
    fn empty_page_yields_no_elements() {
        let doc = page(el("body").child(el("p").rect(0.0, 0.0, 100.0, 20.0).text("Nothing here")));
        let data = extractor().extract(&doc);
        assert!(data.elements.is_empty());
        assert_eq!(data.page_text, "Nothing here");
    }
}
