use anyhow::{Result, anyhow};
use headless_chrome::{Browser, LaunchOptions, Tab};
use navguide::{NavEvent, NavigationSource, NodeId, OverlayFrame, OverlaySurface, PageEvent, Rect, Viewport};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::dom::{HOST_ID, NODE_ATTR, eval_string, get_current_url};

/// Browser session. Created once, reused for every guidance run.
pub struct BrowserSession {
    _browser: Browser,
    pub tab: Arc<Tab>,
}

impl BrowserSession {
    pub fn launch() -> Result<Self> {
        // Attach to a Chrome started with --remote-debugging-port=9222 if one
        // is running, so guidance happens in the user's own window.
        info!("attempting to attach to Chrome on port 9222");
        if let Ok(browser) = Browser::connect("http://127.0.0.1:9222".to_string()) {
            let existing = {
                let tabs = browser
                    .get_tabs()
                    .lock()
                    .map_err(|_| anyhow!("tab list lock poisoned"))?;
                tabs.first().cloned()
            };
            let tab = match existing {
                Some(t) => {
                    info!("attached, using existing tab");
                    t
                }
                None => browser.new_tab()?,
            };
            return Ok(Self {
                _browser: browser,
                tab,
            });
        }

        info!("no running Chrome, launching a new window");
        let options = LaunchOptions {
            headless: false,
            args: vec![
                std::ffi::OsStr::new("--no-first-run"),
                std::ffi::OsStr::new("--no-default-browser-check"),
            ],
            idle_browser_timeout: Duration::from_secs(24 * 60 * 60),
            ..Default::default()
        };
        let browser =
            Browser::new(options).map_err(|e| anyhow!("Browser launch failed: {}", e))?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;

        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    pub fn open(&self, url: &str) -> Result<()> {
        self.tab.navigate_to(url)?;
        self.tab.wait_until_navigated()?;
        Ok(())
    }
}

/// In-page hooks, installed at most once per document. They queue page and
/// navigation events for [`drain_events`] and own the overlay host, a
/// closed shadow root pinned above the page.
const HOOKS_JS: &str = r#"
(() => {
  if (window.__navguide) return;
  const ATTR = '__ATTR__';
  const HOST = '__HOST__';
  const events = [{ kind: 'load' }];
  const g = { events };
  window.__navguide = g;

  const pathOf = e => e.composedPath()
    .filter(n => n.nodeType === 1 && n.hasAttribute(ATTR))
    .map(n => Number(n.getAttribute(ATTR)));
  const push = ev => {
    const last = events[events.length - 1];
    if ((ev.kind === 'scroll' || ev.kind === 'resize' || ev.kind === 'mutation')
        && last && last.kind === ev.kind) return;
    events.push(ev);
  };

  document.addEventListener('click', e => push({ kind: 'click', path: pathOf(e) }), true);
  document.addEventListener('input', e => push({
    kind: 'input', path: pathOf(e), value: String(e.target.value ?? ''),
  }), true);
  document.addEventListener('change', e => push({ kind: 'change', path: pathOf(e) }), true);
  window.addEventListener('scroll', () => push({ kind: 'scroll' }), true);
  window.addEventListener('resize', () => push({ kind: 'resize' }));

  for (const [name, kind] of [['pushState', 'push'], ['replaceState', 'replace']]) {
    const orig = history[name];
    history[name] = function (...a) { const r = orig.apply(this, a); push({ kind }); return r; };
  }
  window.addEventListener('popstate', () => push({ kind: 'popstate' }));
  window.addEventListener('hashchange', () => push({ kind: 'hashchange' }));
  new MutationObserver(() => push({ kind: 'mutation' }))
    .observe(document.body ?? document.documentElement, { childList: true, subtree: true });

  const CSS = `
    * { box-sizing: border-box; margin: 0; padding: 0; }
    .spotlight { position: fixed; border-radius: 6px; pointer-events: none;
      box-shadow: 0 0 0 9999px rgba(0,0,0,.42); transition: all .2s ease; }
    .ring { position: fixed; border: 3px solid #6366F1; border-radius: 8px;
      pointer-events: none; animation: pulse 1.5s ease-in-out infinite; }
    @keyframes pulse { 0%,100% { opacity: 1 } 50% { opacity: .35 } }
    .card { position: fixed; pointer-events: none; background: #fff;
      border: 2px solid #6366F1; border-radius: 12px; padding: 14px 18px;
      max-width: 320px; min-width: 180px; box-shadow: 0 6px 24px rgba(0,0,0,.15);
      font-family: system-ui, -apple-system, 'Segoe UI', sans-serif; }
    .lbl { font-size: 11px; font-weight: 700; color: #6366F1; text-transform: uppercase;
      letter-spacing: .6px; margin-bottom: 4px; }
    .ins { font-size: 14px; font-weight: 500; color: #1e1e2e; line-height: 1.45;
      margin-bottom: 8px; }
    .badge { display: inline-block; font-size: 10px; font-weight: 700; color: #fff;
      background: #6366F1; border-radius: 4px; padding: 2px 8px; text-transform: uppercase; }
    .arrow { position: fixed; pointer-events: none; width: 0; height: 0;
      border-left: 9px solid transparent; border-right: 9px solid transparent; }
    .arrow.up { border-bottom: 11px solid #6366F1; }
    .arrow.down { border-top: 11px solid #6366F1; }`;

  let host = null, shadow = null;
  const root = () => {
    if (shadow) return shadow;
    host = document.createElement('div');
    host.id = HOST;
    Object.assign(host.style, { position: 'fixed', top: '0', left: '0', width: '0',
      height: '0', zIndex: '2147483647', pointerEvents: 'none' });
    document.documentElement.appendChild(host);
    shadow = host.attachShadow({ mode: 'closed' });
    const style = document.createElement('style');
    style.textContent = CSS;
    shadow.appendChild(style);
    return shadow;
  };
  const box = (cls, r) => {
    const d = document.createElement('div');
    d.className = cls;
    Object.assign(d.style, { top: r.y + 'px', left: r.x + 'px',
      width: r.width + 'px', height: r.height + 'px' });
    return d;
  };
  g.clear = () => {
    if (!shadow) return;
    for (const c of Array.from(shadow.children)) if (c.tagName !== 'STYLE') c.remove();
  };
  g.remove = () => { host?.remove(); host = null; shadow = null; };
  g.paint = f => {
    const sh = root();
    g.clear();
    sh.appendChild(box('spotlight', f.spotlight));
    sh.appendChild(box('ring', f.ring));
    if (f.arrow) {
      const a = document.createElement('div');
      a.className = 'arrow ' + f.arrow.direction;
      Object.assign(a.style, { top: f.arrow.top + 'px', left: f.arrow.left + 'px' });
      sh.appendChild(a);
    }
    const card = document.createElement('div');
    card.className = 'card';
    Object.assign(card.style, { top: f.card.top + 'px', left: f.card.left + 'px' });
    for (const [cls, text] of [['lbl', f.stepLabel], ['ins', f.instruction]]) {
      const d = document.createElement('div');
      d.className = cls;
      d.textContent = text;
      card.appendChild(d);
    }
    const badge = document.createElement('span');
    badge.className = 'badge';
    badge.textContent = f.action;
    card.appendChild(badge);
    sh.appendChild(card);
  };
})()
"#;

fn hooked(call: &str) -> String {
    let hooks = HOOKS_JS
        .replace("__ATTR__", NODE_ATTR)
        .replace("__HOST__", HOST_ID);
    format!("{hooks};{call}")
}

fn node_call(node: NodeId, body: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector('[{NODE_ATTR}=\"{}\"]'); {body} }})()",
        node.0
    )
}

/// Everything the page queued since the last drain.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RawEvent {
    Click {
        path: Vec<usize>,
    },
    Input {
        path: Vec<usize>,
        #[serde(default)]
        value: String,
    },
    Change {
        path: Vec<usize>,
    },
    Scroll,
    Resize,
    Push,
    Replace,
    Popstate,
    Hashchange,
    Mutation,
    Load,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Page(PageEvent),
    Nav(NavEvent),
}

fn ids(path: Vec<usize>) -> Vec<NodeId> {
    path.into_iter().map(NodeId).collect()
}

impl From<RawEvent> for Observed {
    fn from(raw: RawEvent) -> Self {
        match raw {
            RawEvent::Click { path } => Observed::Page(PageEvent::Click { path: ids(path) }),
            RawEvent::Input { path, value } => Observed::Page(PageEvent::Input {
                path: ids(path),
                value,
            }),
            RawEvent::Change { path } => Observed::Page(PageEvent::Change { path: ids(path) }),
            RawEvent::Scroll => Observed::Page(PageEvent::Scroll),
            RawEvent::Resize => Observed::Page(PageEvent::Resize),
            RawEvent::Push => Observed::Nav(NavEvent::HistoryPush),
            RawEvent::Replace => Observed::Nav(NavEvent::HistoryReplace),
            RawEvent::Popstate => Observed::Nav(NavEvent::PopState),
            RawEvent::Hashchange => Observed::Nav(NavEvent::HashChange),
            RawEvent::Mutation => Observed::Nav(NavEvent::Mutation),
            RawEvent::Load => Observed::Nav(NavEvent::Load),
        }
    }
}

pub fn decode_events(raw: &str) -> Result<Vec<Observed>> {
    let events: Vec<RawEvent> = serde_json::from_str(raw)?;
    Ok(events.into_iter().map(Observed::from).collect())
}

/// Install the hooks if the document is new and take the queued events.
pub fn drain_events(tab: &Arc<Tab>) -> Result<Vec<Observed>> {
    let raw = eval_string(
        tab,
        &hooked("(() => { const q = window.__navguide.events.splice(0); return JSON.stringify(q); })()"),
    )?;
    decode_events(&raw)
}

/// [`OverlaySurface`] backed by the hooks' shadow-DOM host.
pub struct ChromeSurface {
    tab: Arc<Tab>,
}

impl ChromeSurface {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self { tab }
    }

    fn run(&self, script: &str) {
        if let Err(e) = self.tab.evaluate(script, false) {
            warn!(error = %e, "overlay script failed");
        }
    }
}

impl OverlaySurface for ChromeSurface {
    fn viewport(&self) -> Viewport {
        eval_string(
            &self.tab,
            "JSON.stringify({width: innerWidth, height: innerHeight, scrollX, scrollY})",
        )
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
    }

    fn rect_of(&self, node: NodeId) -> Option<Rect> {
        let script = node_call(
            node,
            "if (!el) return 'null'; const r = el.getBoundingClientRect(); \
             return JSON.stringify({x: r.left, y: r.top, width: r.width, height: r.height});",
        );
        let raw = eval_string(&self.tab, &script).ok()?;
        serde_json::from_str::<Option<Rect>>(&raw).ok().flatten()
    }

    fn scroll_into_view(&mut self, node: NodeId) {
        self.run(&node_call(
            node,
            "if (el) el.scrollIntoView({behavior: 'smooth', block: 'center'});",
        ));
    }

    fn paint(&mut self, frame: &OverlayFrame) {
        match serde_json::to_string(frame) {
            Ok(json) => self.run(&hooked(&format!("window.__navguide.paint({json})"))),
            Err(e) => warn!(error = %e, "could not encode overlay frame"),
        }
    }

    fn clear(&mut self) {
        self.run("window.__navguide && window.__navguide.clear()");
    }

    fn remove_host(&mut self) {
        self.run("window.__navguide && window.__navguide.remove()");
    }
}

/// [`NavigationSource`] fed from the drained hook queue.
pub struct ChromeNavigation {
    tab: Arc<Tab>,
    pending: Vec<NavEvent>,
}

impl ChromeNavigation {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self {
            tab,
            pending: Vec::new(),
        }
    }

    pub fn push(&mut self, event: NavEvent) {
        self.pending.push(event);
    }
}

impl NavigationSource for ChromeNavigation {
    fn current_url(&mut self) -> Option<String> {
        match get_current_url(&self.tab) {
            Ok(url) => Some(url),
            Err(e) => {
                debug!(error = %e, "could not read page url");
                None
            }
        }
    }

    fn drain(&mut self) -> Vec<NavEvent> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_hook_queue() {
        let raw = r#"[
            {"kind":"load"},
            {"kind":"click","path":[7,3,1,0]},
            {"kind":"input","path":[9,1,0],"value":"S123"},
            {"kind":"scroll"},
            {"kind":"push"}
        ]"#;
        let events = decode_events(raw).unwrap();
        assert_eq!(
            events,
            vec![
                Observed::Nav(NavEvent::Load),
                Observed::Page(PageEvent::Click {
                    path: vec![NodeId(7), NodeId(3), NodeId(1), NodeId(0)]
                }),
                Observed::Page(PageEvent::Input {
                    path: vec![NodeId(9), NodeId(1), NodeId(0)],
                    value: "S123".into(),
                }),
                Observed::Page(PageEvent::Scroll),
                Observed::Nav(NavEvent::HistoryPush),
            ]
        );
    }

    #[test]
    fn hooks_are_parameterized() {
        let script = hooked("1");
        assert!(script.contains("const ATTR = 'data-nav-node'"));
        assert!(script.contains("const HOST = 'navguide-host'"));
        assert!(script.ends_with(";1"));
        assert_eq!(
            node_call(NodeId(4), "return 1;"),
            "(() => { const el = document.querySelector('[data-nav-node=\"4\"]'); return 1; })()"
        );
    }
}
