use anyhow::{Result, anyhow};
use navguide::step::truncate;
use navguide::{GuidanceStep, LlmConfig, LlmProvider, PageData, SessionState, accept_external_plan};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::types::{PROMPT_FIELD_MAX, PROMPT_MAX_ELEMENTS, PROMPT_MAX_HISTORY, PROMPT_PAGE_EXCERPT};

const SYSTEM_PROMPT: &str = r#"You are a navigation assistant guiding a person through a website.
Given the user's goal and the page's interactive elements, choose the single best next action.

Respond with ONLY valid JSON matching this schema:
{
  "stepTitle":   "string",
  "instruction": "string (short and friendly, e.g. 'Click the Apply Now button')",
  "action":      "click|type|select|scroll|wait",
  "target":      { "strategy": "css|xpath|text", "selector": "string", "textHint": "string" },
  "validation":  { "event": "click|input|change|navigation", "successHint": "string" }
}

Rules:
1. Pick ONLY ONE action: the most important next step toward the goal.
2. Prefer stable selectors (id, name, aria-label, data-testid) taken from the css= values given.
3. Keep instructions concise.
4. If no clear action exists, use action "wait"."#;

/// Asks a remote model for the next step. Any failure is returned so the
/// caller can fall back to the heuristic planner.
pub struct RemotePlanner {
    client: Client,
    config: LlmConfig,
}

impl RemotePlanner {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub async fn plan(&self, page: &PageData, session: &SessionState) -> Result<GuidanceStep> {
        let user = build_prompt(page, session);
        let body = request_body(&self.config, &user);

        let mut request = self.client.post(self.config.endpoint()).json(&body);
        request = match self.config.provider {
            LlmProvider::Anthropic => request
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", "2023-06-01"),
            LlmProvider::Openai | LlmProvider::Custom => {
                request.header("Authorization", format!("Bearer {}", self.config.api_key))
            }
        };

        info!(provider = ?self.config.provider, model = self.config.model(), "asking remote planner");
        let response = request.send().await?;
        let status = response.status();
        let json_resp: Value = response.json().await?;

        if !status.is_success() {
            let err_msg = json_resp["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error");
            return Err(anyhow!("planner API error ({}): {}", status, err_msg));
        }

        let content = response_text(self.config.provider, &json_resp)
            .ok_or_else(|| anyhow!("No content in planner response: {}", json_resp))?;
        debug!(content, "planner replied");

        Ok(accept_external_plan(content)?)
    }
}

fn request_body(config: &LlmConfig, user: &str) -> Value {
    match config.provider {
        LlmProvider::Openai => json!({
            "model": config.model(),
            "temperature": 0.1,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user },
            ],
        }),
        LlmProvider::Anthropic => json!({
            "model": config.model(),
            "max_tokens": 512,
            "system": SYSTEM_PROMPT,
            "messages": [{ "role": "user", "content": user }],
        }),
        LlmProvider::Custom => json!({
            "model": config.model(),
            "temperature": 0.1,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user },
            ],
        }),
    }
}

fn response_text(provider: LlmProvider, json: &Value) -> Option<&str> {
    match provider {
        LlmProvider::Anthropic => json["content"][0]["text"].as_str(),
        LlmProvider::Openai | LlmProvider::Custom => {
            json["choices"][0]["message"]["content"].as_str()
        }
    }
}

/// The user message: goal, recent history, visible elements, page excerpt.
pub fn build_prompt(page: &PageData, session: &SessionState) -> String {
    let elements: Vec<String> = page
        .elements
        .iter()
        .filter(|el| el.is_visible && !el.is_disabled)
        .take(PROMPT_MAX_ELEMENTS)
        .map(|el| {
            let mut parts = vec![format!("[{}] <{}>", el.index, el.tag)];
            if !el.text.is_empty() {
                parts.push(format!("text=\"{}\"", truncate(&el.text, PROMPT_FIELD_MAX)));
            }
            let fields = [
                ("aria", el.aria_label.as_deref()),
                ("id", el.id.as_deref()),
                ("name", el.name.as_deref()),
                ("type", el.input_type.as_deref()),
                ("href", el.href.as_deref().map(|h| truncate(h, PROMPT_FIELD_MAX))),
                ("placeholder", el.placeholder.as_deref()),
            ];
            for (key, value) in fields {
                if let Some(v) = value.filter(|v| !v.is_empty()) {
                    parts.push(format!("{key}=\"{v}\""));
                }
            }
            if !el.css_selector.is_empty() {
                parts.push(format!("css=\"{}\"", el.css_selector));
            }
            parts.join(" ")
        })
        .collect();

    let skip = session.action_history.len().saturating_sub(PROMPT_MAX_HISTORY);
    let history: Vec<String> = session.action_history[skip..]
        .iter()
        .map(|h| format!("  Step {}: {} at {}", h.step_number, h.action, h.url))
        .collect();
    let history = if history.is_empty() {
        "  (none)".to_string()
    } else {
        history.join("\n")
    };

    [
        format!("Goal: \"{}\"", session.goal),
        format!("Current step: {}", session.current_step_number),
        format!("URL: {}", page.url),
        format!("Title: {}", page.title),
        String::new(),
        "Previous actions:".to_string(),
        history,
        String::new(),
        "Interactive elements:".to_string(),
        elements.join("\n"),
        String::new(),
        "Page text (excerpt):".to_string(),
        truncate(&page.page_text, PROMPT_PAGE_EXCERPT).to_string(),
    ]
    .join("\n")
}
