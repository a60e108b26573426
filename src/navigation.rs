//! Detects page changes that call for a fresh extraction: URL-API
//! navigations and DOM rewrites by client-side routers.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Raw notifications from the host page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavEvent {
    HistoryPush,
    HistoryReplace,
    PopState,
    HashChange,
    /// Something under `<body>` was added or removed.
    Mutation,
    /// The document was replaced by a full page load.
    Load,
}

/// Where navigation notifications come from. The host decides how to
/// observe them (script hooks, CDP events, a test queue).
pub trait NavigationSource {
    fn current_url(&mut self) -> Option<String>;
    /// Events observed since the previous call.
    fn drain(&mut self) -> Vec<NavEvent>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationSignal {
    pub url: String,
}

pub struct NavigationWatcher<N: NavigationSource> {
    source: N,
    last_url: String,
    debounce: Duration,
    mutation_deadline: Option<Instant>,
}

impl<N: NavigationSource> NavigationWatcher<N> {
    pub fn new(mut source: N, debounce: Duration) -> Self {
        let last_url = source.current_url().unwrap_or_default();
        Self {
            source,
            last_url,
            debounce,
            mutation_deadline: None,
        }
    }

    pub fn last_url(&self) -> &str {
        &self.last_url
    }

    pub fn source_mut(&mut self) -> &mut N {
        &mut self.source
    }

    /// Forget the current URL baseline, e.g. after the orchestrator loaded a
    /// page itself.
    pub fn reset(&mut self, url: &str) {
        self.last_url = url.to_string();
        self.mutation_deadline = None;
    }

    /// Process pending events. Returns a signal only when the URL differs
    /// from the last one reported.
    pub fn poll(&mut self, now: Instant) -> Option<NavigationSignal> {
        let mut check = false;
        for event in self.source.drain() {
            match event {
                NavEvent::Mutation => {
                    self.mutation_deadline = Some(now + self.debounce);
                }
                other => {
                    debug!(event = ?other, "url api event");
                    check = true;
                }
            }
        }
        if self.mutation_deadline.is_some_and(|d| now >= d) {
            self.mutation_deadline = None;
            check = true;
        }
        if !check {
            return None;
        }

        let url = self.source.current_url()?;
        if url == self.last_url {
            return None;
        }
        info!(from = %self.last_url, to = %url, "navigation detected");
        self.last_url = url.clone();
        Some(NavigationSignal { url })
    }
}
