use anyhow::{Context, Result, anyhow};
use headless_chrome::Tab;
use navguide::Document;
use std::sync::Arc;

/// Attribute stamped on every captured element, holding its snapshot index.
/// Overlay painting and event paths refer to elements through it.
pub const NODE_ATTR: &str = "data-nav-node";

/// Id of the overlay host element, skipped by capture.
pub const HOST_ID: &str = "navguide-host";

/// JavaScript that serializes the live page into the snapshot format the
/// library decodes: elements and non-blank text nodes in document order,
/// each with its parent's index.
///
/// Read-only apart from the `data-nav-node` stamps. Text under
/// script/style/noscript is dropped; the overlay host is skipped.
const CAPTURE_JS: &str = r#"
(() => {
  const ATTR = 'data-nav-node';
  const HOST = 'navguide-host';
  const NO_TEXT = new Set(['SCRIPT','STYLE','NOSCRIPT','TEMPLATE']);
  const nodes = [];
  let focused = null;

  function visit(node, parent) {
    if (node.nodeType === Node.TEXT_NODE) {
      if (parent === null || !node.data.trim()) return;
      nodes.push({ parent, text: node.data });
      return;
    }
    if (node.nodeType !== Node.ELEMENT_NODE) return;
    if (node.id === HOST) return;

    const index = nodes.length;
    node.setAttribute(ATTR, String(index));
    const attrs = {};
    for (const a of node.attributes) {
      if (a.name !== ATTR) attrs[a.name] = a.value;
    }
    const r = node.getBoundingClientRect();
    const s = getComputedStyle(node);
    const rec = {
      tag: node.tagName.toLowerCase(),
      attrs,
      rect: { x: r.left, y: r.top, width: r.width, height: r.height },
      style: { display: s.display, visibility: s.visibility, opacity: parseFloat(s.opacity) || 0 },
      disabled: !!node.disabled,
    };
    if (parent !== null) rec.parent = parent;
    if ('value' in node && typeof node.value === 'string') rec.value = node.value;
    nodes.push(rec);
    if (node === document.activeElement) focused = index;

    const skipText = NO_TEXT.has(node.tagName);
    for (const child of node.childNodes) {
      if (skipText && child.nodeType === Node.TEXT_NODE) continue;
      visit(child, index);
    }
  }

  visit(document.documentElement, null);
  return JSON.stringify({
    url: location.href,
    title: document.title,
    viewport: {
      width: innerWidth, height: innerHeight,
      scrollX: scrollX, scrollY: scrollY,
    },
    focused,
    nodes,
  });
})()
"#;

/// Evaluate `script` and return its string result.
pub fn eval_string(tab: &Arc<Tab>, script: &str) -> Result<String> {
    let result = tab.evaluate(script, false)?;
    result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .ok_or_else(|| anyhow!("script returned no string"))
}

/// Capture the current page as a [`Document`].
pub fn capture_document(tab: &Arc<Tab>) -> Result<Document> {
    let raw = eval_string(tab, CAPTURE_JS).context("capturing page")?;
    let doc = Document::from_json(&raw).context("decoding page capture")?;
    tracing::debug!(nodes = doc.len(), url = doc.url(), "captured page");
    Ok(doc)
}

/// Get the current page URL.
pub fn get_current_url(tab: &Arc<Tab>) -> Result<String> {
    eval_string(tab, "window.location.href")
}
