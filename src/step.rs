//! The portable guidance step and the builder that produces it.
//!
//! `GuidanceStep` is also the schema an external planner has to return;
//! [`accept_external_plan`] is the gate such responses go through.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{GuideError, Result};
use crate::extract::PageElement;
use crate::planner::instruction_for;

pub const TEXT_HINT_MAX: usize = 80;
pub const SUCCESS_HINT_TEXT_MAX: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Click,
    Type,
    Select,
    Scroll,
    Wait,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Click => "click",
            ActionType::Type => "type",
            ActionType::Select => "select",
            ActionType::Scroll => "scroll",
            ActionType::Wait => "wait",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorStrategy {
    Css,
    Xpath,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationEvent {
    Click,
    Input,
    Change,
    Navigation,
}

impl ValidationEvent {
    pub fn for_action(action: ActionType) -> Self {
        match action {
            ActionType::Type => ValidationEvent::Input,
            ActionType::Select => ValidationEvent::Change,
            _ => ValidationEvent::Click,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTarget {
    pub strategy: SelectorStrategy,
    pub selector: String,
    pub text_hint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepValidation {
    pub event: ValidationEvent,
    pub success_hint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidanceStep {
    pub step_title: String,
    pub instruction: String,
    pub action: ActionType,
    pub target: StepTarget,
    pub validation: StepValidation,
}

/// Turns a chosen element into a [`GuidanceStep`]. Pure.
pub struct StepBuilder;

impl StepBuilder {
    pub fn build(element: &PageElement, action: ActionType, step_number: u32) -> GuidanceStep {
        let strategy = if element.css_selector.is_empty() {
            SelectorStrategy::Text
        } else {
            SelectorStrategy::Css
        };
        GuidanceStep {
            step_title: format!("Step {step_number}"),
            instruction: instruction_for(element, action),
            action,
            target: StepTarget {
                strategy,
                selector: element.css_selector.clone(),
                text_hint: truncate(&element.text, TEXT_HINT_MAX).to_string(),
            },
            validation: StepValidation {
                event: ValidationEvent::for_action(action),
                success_hint: format!(
                    "Completed: {action} on \"{}\"",
                    truncate(&element.text, SUCCESS_HINT_TEXT_MAX)
                ),
            },
        }
    }
}

const REQUIRED_FIELDS: [&str; 5] = ["stepTitle", "instruction", "action", "target", "validation"];

/// Validate a raw planner response (optionally wrapped in a Markdown code
/// fence) against the step schema.
pub fn accept_external_plan(raw: &str) -> Result<GuidanceStep> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| GuideError::MalformedPlan(format!("not JSON: {e}")))?;
    let Some(obj) = value.as_object() else {
        return Err(GuideError::MalformedPlan("expected a JSON object".into()));
    };
    for field in REQUIRED_FIELDS {
        let present = match obj.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        };
        if !present {
            return Err(GuideError::MalformedPlan(format!("missing `{field}`")));
        }
    }
    let step: GuidanceStep = serde_json::from_value(value)
        .map_err(|e| GuideError::MalformedPlan(e.to_string()))?;
    debug!(action = %step.action, selector = %step.target.selector, "accepted external plan");
    Ok(step)
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after = trimmed[start + 3..].trim_start();
    let after = match after.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &after[4..],
        _ => after,
    };
    match after.find("```") {
        Some(end) => after[..end].trim(),
        None => trimmed,
    }
}

/// Longest prefix of `s` with at most `max` characters.
pub fn truncate(s: &str, max: usize) -> &str {
    s.char_indices().nth(max).map_or(s, |(i, _)| &s[..i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ElementRect, PageElement};
    use pretty_assertions::assert_eq;

    fn link() -> PageElement {
        PageElement {
            tag: "a".into(),
            text: "Driver licensing".into(),
            href: Some("https://example.test/licensing".into()),
            css_selector: "#main > a:nth-of-type(2)".into(),
            xpath: "//*[@id=\"main\"]/a[2]".into(),
            rect: ElementRect {
                top: 10.0,
                left: 10.0,
                width: 120.0,
                height: 20.0,
            },
            is_visible: true,
            ..PageElement::default()
        }
    }

    #[test]
    fn builds_css_step_with_mirrored_validation() {
        let step = StepBuilder::build(&link(), ActionType::Click, 1);
        assert_eq!(
            step,
            GuidanceStep {
                step_title: "Step 1".into(),
                instruction: "Click \"Driver licensing\"".into(),
                action: ActionType::Click,
                target: StepTarget {
                    strategy: SelectorStrategy::Css,
                    selector: "#main > a:nth-of-type(2)".into(),
                    text_hint: "Driver licensing".into(),
                },
                validation: StepValidation {
                    event: ValidationEvent::Click,
                    success_hint: "Completed: click on \"Driver licensing\"".into(),
                },
            }
        );
        assert_eq!(
            StepBuilder::build(&link(), ActionType::Select, 3).validation.event,
            ValidationEvent::Change
        );
    }

    #[test]
    fn serializes_to_wire_schema() {
        let json = serde_json::to_value(StepBuilder::build(&link(), ActionType::Type, 2)).unwrap();
        assert_eq!(json["stepTitle"], "Step 2");
        assert_eq!(json["action"], "type");
        assert_eq!(json["target"]["strategy"], "css");
        assert_eq!(json["target"]["textHint"], "Driver licensing");
        assert_eq!(json["validation"]["event"], "input");
    }

    #[test]
    fn accepts_fenced_plan() {
        let raw = "Sure!\n```json\n{\"stepTitle\":\"Step 1\",\"instruction\":\"Click Apply\",\"action\":\"click\",\
                   \"target\":{\"strategy\":\"text\",\"selector\":\"\",\"textHint\":\"Apply\"},\
                   \"validation\":{\"event\":\"navigation\",\"successHint\":\"Form opens\"}}\n```";
        let step = accept_external_plan(raw).unwrap();
        assert_eq!(step.target.strategy, SelectorStrategy::Text);
        assert_eq!(step.validation.event, ValidationEvent::Navigation);
    }

    #[test]
    fn fence_language_tag_ignores_case() {
        let body = "{\"stepTitle\":\"Step 2\",\"instruction\":\"Type your ID\",\"action\":\"type\",\
                    \"target\":{\"strategy\":\"css\",\"selector\":\"#nric\",\"textHint\":\"\"},\
                    \"validation\":{\"event\":\"input\",\"successHint\":\"\"}}";
        for fence in ["```JSON\n", "```Json\n", "``` json\n", "```\n"] {
            let raw = format!("{fence}{body}\n```");
            let step = accept_external_plan(&raw)
                .unwrap_or_else(|e| panic!("{fence:?} rejected: {e}"));
            assert_eq!(step.target.selector, "#nric");
        }
    }

    #[test]
    fn rejects_incomplete_or_invalid_plans() {
        let missing = r#"{"stepTitle":"x","instruction":"y","action":"click","target":{"strategy":"css","selector":"a","textHint":""}}"#;
        assert!(matches!(
            accept_external_plan(missing),
            Err(GuideError::MalformedPlan(m)) if m.contains("validation")
        ));
        let empty_title = r#"{"stepTitle":"","instruction":"y","action":"click","target":{},"validation":{}}"#;
        assert!(accept_external_plan(empty_title).is_err());
        let bad_action = r#"{"stepTitle":"x","instruction":"y","action":"hover",
            "target":{"strategy":"css","selector":"a","textHint":""},
            "validation":{"event":"click","successHint":""}}"#;
        assert!(accept_external_plan(bad_action).is_err());
        assert!(accept_external_plan("I could not decide").is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
