use std::time::Duration;

use navguide::{ActionType, GuidanceStep, PlannerMode, SessionState};
use serde::{Deserialize, Serialize};

/// A command posted by the control panel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Command {
    Start {
        goal: String,
        #[serde(default)]
        mode: PlannerMode,
    },
    Stop,
    Rescan,
    Skip,
}

/// What the panel is told about, streamed over SSE.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PanelEvent {
    State {
        state: SessionState,
    },
    Step {
        number: u32,
        step: GuidanceStep,
    },
    Completed {
        action: ActionType,
    },
    Navigation {
        url: String,
    },
    Error {
        message: String,
    },
}

impl PanelEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PanelEvent::State { .. } => "state",
            PanelEvent::Step { .. } => "step",
            PanelEvent::Completed { .. } => "completed",
            PanelEvent::Navigation { .. } => "navigation",
            PanelEvent::Error { .. } => "error",
        }
    }
}

/// Pause before re-scanning after the user completed a step. Clicks often
/// start a navigation, so they get longer to settle.
pub fn settle_delay(action: ActionType) -> Duration {
    match action {
        ActionType::Click => Duration::from_millis(600),
        _ => Duration::from_millis(100),
    }
}

pub const SKIP_DELAY: Duration = Duration::from_millis(100);
pub const NAVIGATION_DELAY: Duration = Duration::from_millis(800);

/// Elements and history entries included in a remote planning prompt.
pub const PROMPT_MAX_ELEMENTS: usize = 50;
pub const PROMPT_MAX_HISTORY: usize = 5;
pub const PROMPT_PAGE_EXCERPT: usize = 500;
pub const PROMPT_FIELD_MAX: usize = 100;
