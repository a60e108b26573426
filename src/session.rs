use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::config::APP_DIR;
use crate::error::Result;
use crate::step::{ActionType, GuidanceStep};

pub const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlannerMode {
    #[default]
    Heuristic,
    Llm,
}

impl std::str::FromStr for PlannerMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "heuristic" => Ok(PlannerMode::Heuristic),
            "llm" => Ok(PlannerMode::Llm),
            other => Err(format!("unknown planner mode `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub step_number: u32,
    pub action: ActionType,
    pub url: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub goal: String,
    pub is_active: bool,
    pub current_step_number: u32,
    pub current_step: Option<GuidanceStep>,
    pub action_history: Vec<ActionRecord>,
    pub planner_mode: PlannerMode,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            goal: String::new(),
            is_active: false,
            current_step_number: 0,
            current_step: None,
            action_history: Vec::new(),
            planner_mode: PlannerMode::Heuristic,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

impl SessionState {
    pub fn started(goal: &str, mode: PlannerMode) -> Self {
        let mut state = Self::default();
        state.start(goal, mode);
        state
    }

    pub fn start(&mut self, goal: &str, mode: PlannerMode) {
        *self = Self {
            goal: goal.trim().to_string(),
            is_active: true,
            current_step_number: 1,
            current_step: None,
            action_history: Vec::new(),
            planner_mode: mode,
        };
        info!(goal = %self.goal, mode = ?mode, "guidance started");
    }

    pub fn stop(&mut self) {
        *self = Self::default();
        info!("guidance stopped");
    }

    /// Record the user's completed action and advance to the next step.
    pub fn complete(&mut self, action: ActionType, url: &str) {
        self.record(action, url);
    }

    /// Advance without the user acting. The skipped step's action is
    /// recorded with an empty URL.
    pub fn skip(&mut self) {
        let action = self
            .current_step
            .as_ref()
            .map_or(ActionType::Click, |s| s.action);
        self.record(action, "");
    }

    fn record(&mut self, action: ActionType, url: &str) {
        if !self.is_active {
            debug!("ignoring step transition on inactive session");
            return;
        }
        self.action_history.push(ActionRecord {
            step_number: self.current_step_number,
            action,
            url: url.to_string(),
            timestamp: now_millis(),
        });
        self.current_step_number += 1;
        self.current_step = None;
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join(APP_DIR).join(SESSION_FILE))
    }

    /// Read a saved session; a missing file yields a fresh one.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let state: SessionState = serde_json::from_reader(reader)?;
        Ok(state)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn start_resets_to_step_one() {
        let mut state = SessionState::started("old goal", PlannerMode::Llm);
        state.complete(ActionType::Click, "https://a.test/");
        state.start("  Renew passport ", PlannerMode::Heuristic);
        assert_eq!(state.goal, "Renew passport");
        assert_eq!(state.current_step_number, 1);
        assert!(state.action_history.is_empty());
        assert!(state.is_active);
    }

    #[test]
    fn complete_and_skip_advance_steps() {
        let mut state = SessionState::started("apply", PlannerMode::Heuristic);
        state.complete(ActionType::Click, "https://a.test/");
        state.skip();
        assert_eq!(state.current_step_number, 3);
        let history: Vec<(u32, &str)> = state
            .action_history
            .iter()
            .map(|r| (r.step_number, r.url.as_str()))
            .collect();
        assert_eq!(history, vec![(1, "https://a.test/"), (2, "")]);
    }

    #[test]
    fn stopped_session_ignores_completion() {
        let mut state = SessionState::started("apply", PlannerMode::Heuristic);
        state.stop();
        state.complete(ActionType::Type, "https://a.test/");
        assert_eq!(state, SessionState::default());
    }

    #[test]
    fn persists_as_camel_case_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SESSION_FILE);
        assert_eq!(SessionState::load(&path).unwrap(), SessionState::default());

        let mut state = SessionState::started("apply", PlannerMode::Llm);
        state.complete(ActionType::Select, "https://a.test/form");
        state.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"currentStepNumber\": 2"));
        assert!(raw.contains("\"plannerMode\": \"llm\""));
        assert_eq!(SessionState::load(&path).unwrap(), state);
    }
}
