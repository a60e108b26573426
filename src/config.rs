use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GuideError, Result};

pub const CONFIG_FILE: &str = "config.json";
pub const APP_DIR: &str = "navguide";

/// Tunables for extraction, overlay timing and the optional remote planner.
/// Every field has a default, so a partial config file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GuideConfig {
    /// Quiet period after the last keystroke before a `type` step completes.
    pub type_debounce_ms: u64,
    /// Minimum interval between overlay repaints on scroll/resize.
    pub repaint_throttle_ms: u64,
    /// Quiet period after the last DOM mutation before the URL is rechecked.
    pub navigation_debounce_ms: u64,
    /// A focused panel covering at least this share of the viewport is not
    /// treated as a panel.
    pub panel_area_ratio: f64,
    pub max_elements: usize,
    pub max_page_text: usize,
    /// Space needed below or above the target to place the card there.
    pub card_clearance_px: f64,
    /// How often the live host polls the page for events.
    pub poll_interval_ms: u64,
    pub interactive_selectors: Vec<String>,
    pub llm: Option<LlmConfig>,
}

impl Default for GuideConfig {
    fn default() -> Self {
        Self {
            type_debounce_ms: 1200,
            repaint_throttle_ms: 50,
            navigation_debounce_ms: 300,
            panel_area_ratio: 0.8,
            max_elements: 150,
            max_page_text: 2000,
            card_clearance_px: 120.0,
            poll_interval_ms: 100,
            interactive_selectors: DEFAULT_INTERACTIVE_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            llm: None,
        }
    }
}

pub const DEFAULT_INTERACTIVE_SELECTORS: &[&str] = &[
    "a[href]",
    "button",
    "input",
    "textarea",
    "select",
    "[role=\"button\"]",
    "[role=\"link\"]",
    "[role=\"tab\"]",
    "[role=\"menuitem\"]",
    "[tabindex=\"0\"]",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Openai,
    Anthropic,
    Custom,
}

impl LlmProvider {
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            LlmProvider::Openai => "https://api.openai.com/v1/chat/completions",
            LlmProvider::Anthropic => "https://api.anthropic.com/v1/messages",
            LlmProvider::Custom => "",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Openai => "gpt-4o-mini",
            LlmProvider::Anthropic => "claude-sonnet-4-20250514",
            LlmProvider::Custom => "",
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = GuideError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmProvider::Openai),
            "anthropic" => Ok(LlmProvider::Anthropic),
            "custom" => Ok(LlmProvider::Custom),
            other => Err(GuideError::Config(format!("unknown llm provider `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
}

impl LlmConfig {
    pub fn endpoint(&self) -> &str {
        if self.endpoint.is_empty() {
            self.provider.default_endpoint()
        } else {
            &self.endpoint
        }
    }

    pub fn model(&self) -> &str {
        if self.model.is_empty() {
            self.provider.default_model()
        } else {
            &self.model
        }
    }

    pub fn is_usable(&self) -> bool {
        !self.api_key.is_empty() && !self.endpoint().is_empty()
    }
}

impl GuideConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`, or from the default location when `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        let config: GuideConfig = serde_json::from_str(&raw)
            .map_err(|e| GuideError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Apply `NAVGUIDE_LLM_*` overrides from the environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        let key = var("NAVGUIDE_LLM_API_KEY");
        let endpoint = var("NAVGUIDE_LLM_ENDPOINT");
        let model = var("NAVGUIDE_LLM_MODEL");
        let provider = var("NAVGUIDE_LLM_PROVIDER");
        if key.is_none() && endpoint.is_none() && model.is_none() && provider.is_none() {
            return Ok(());
        }
        let llm = self.llm.get_or_insert_with(|| LlmConfig {
            provider: LlmProvider::default(),
            endpoint: String::new(),
            api_key: String::new(),
            model: String::new(),
        });
        if let Some(p) = provider {
            llm.provider = p.parse()?;
        }
        if let Some(k) = key {
            llm.api_key = k;
        }
        if let Some(e) = endpoint {
            llm.endpoint = e;
        }
        if let Some(m) = model {
            llm.model = m;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.panel_area_ratio) {
            return Err(GuideError::Config(
                "panelAreaRatio must be between 0 and 1".into(),
            ));
        }
        if self.max_elements == 0 {
            return Err(GuideError::Config("maxElements must be positive".into()));
        }
        if self.interactive_selectors.is_empty() {
            return Err(GuideError::Config(
                "interactiveSelectors must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn type_debounce(&self) -> Duration {
        Duration::from_millis(self.type_debounce_ms)
    }

    pub fn repaint_throttle(&self) -> Duration {
        Duration::from_millis(self.repaint_throttle_ms)
    }

    pub fn navigation_debounce(&self) -> Duration {
        Duration::from_millis(self.navigation_debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"typeDebounceMs": 1000, "maxElements": 40}"#).unwrap();
        let config = GuideConfig::load(Some(&path)).unwrap();
        assert_eq!(config.type_debounce_ms, 1000);
        assert_eq!(config.max_elements, 40);
        assert_eq!(config.repaint_throttle_ms, 50);
        assert_eq!(config.interactive_selectors.len(), 10);
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = GuideConfig::load(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(config, GuideConfig::default());
    }

    #[test]
    fn rejects_out_of_range_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"panelAreaRatio": 1.5}"#).unwrap();
        assert!(matches!(
            GuideConfig::load(Some(&path)),
            Err(GuideError::Config(_))
        ));
    }

    #[test]
    fn env_overrides_llm_section() {
        let vars: HashMap<&str, &str> = [
            ("NAVGUIDE_LLM_API_KEY", "sk-test"),
            ("NAVGUIDE_LLM_PROVIDER", "anthropic"),
        ]
        .into_iter()
        .collect();
        let mut config = GuideConfig::default();
        config
            .apply_vars(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        let llm = config.llm.unwrap();
        assert_eq!(llm.provider, LlmProvider::Anthropic);
        assert_eq!(llm.endpoint(), "https://api.anthropic.com/v1/messages");
        assert!(llm.is_usable());
    }
}
