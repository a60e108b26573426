//! Heuristic planner: keyword scoring over extracted elements.

use tracing::{debug, info};

use crate::extract::{PageData, PageElement};
use crate::session::SessionState;
use crate::step::{ActionType, GuidanceStep, StepBuilder, truncate};

pub const LABEL_MAX: usize = 60;

/// Score forced onto elements that can never be chosen.
pub const EXCLUDED: i32 = -1000;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "for", "to", "of", "in", "on", "at", "and", "or", "is", "my", "i", "me",
    "it", "do", "be", "this", "that", "with", "from", "by",
];

pub const CTA_WORDS: &[&str] = &[
    "apply",
    "start",
    "begin",
    "next",
    "continue",
    "submit",
    "proceed",
    "go",
    "sign up",
    "register",
    "log in",
    "login",
    "search",
    "get started",
    "enroll",
    "renew",
    "schedule",
];

const CLICK_INPUT_TYPES: &[&str] = &["checkbox", "radio", "submit", "button", "reset", "file", "image"];
const FALLBACK_TAGS: &[&str] = &["button", "a", "input", "textarea", "select"];

/// Lower-cased goal words, punctuation split out, stop-words and
/// single characters dropped. Order and repeats are kept.
pub fn keywords(goal: &str) -> Vec<String> {
    let cleaned: String = goal
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    cleaned
        .split_whitespace()
        .filter(|w| w.len() > 1 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

fn lower(value: Option<&str>) -> String {
    value.unwrap_or_default().to_lowercase()
}

pub fn score(el: &PageElement, keywords: &[String], step_number: u32) -> i32 {
    if !el.is_visible || el.is_disabled {
        return EXCLUDED;
    }

    let text = el.text.to_lowercase();
    let aria = lower(el.aria_label.as_deref());
    let href = lower(el.href.as_deref());
    let placeholder = lower(el.placeholder.as_deref());
    let label = lower(el.form_context.as_ref().and_then(|f| f.label.as_deref()));

    let mut s = 0;
    for k in keywords {
        let k = k.as_str();
        if text.contains(k) {
            s += 10;
        }
        if aria.contains(k) {
            s += 8;
        }
        if href.contains(k) {
            s += 5;
        }
        if placeholder.contains(k) {
            s += 4;
        }
        if label.contains(k) {
            s += 8;
        }
    }

    for cta in CTA_WORDS {
        if text.contains(cta) {
            s += 5;
        }
        if aria.contains(cta) {
            s += 4;
        }
    }

    if el.tag == "button" || el.input_type.as_deref() == Some("submit") {
        s += 3;
    }
    if el.role.as_deref() == Some("button") {
        s += 2;
    }
    if el.tag == "a" && el.href.as_deref().is_some_and(|h| !h.is_empty()) {
        s += 1;
    }

    if step_number > 1 && el.is_form_field() {
        s += 2;
    }

    let test_id = lower(el.data_test_id.as_deref());
    if ["primary", "cta", "main"].iter().any(|h| test_id.contains(h)) {
        s += 3;
    }

    if el.rect.width < 10.0 || el.rect.height < 10.0 {
        s -= 50;
    }
    if el.rect.top < -500.0 || el.rect.top > 8000.0 {
        s -= 20;
    }

    if el.id.as_deref().is_some_and(|v| !v.is_empty()) {
        s += 1;
    }
    if el.data_test_id.as_deref().is_some_and(|v| !v.is_empty()) {
        s += 1;
    }

    s
}

pub fn action_for(el: &PageElement) -> ActionType {
    match el.tag.as_str() {
        "input" => {
            let kind = el
                .input_type
                .as_deref()
                .unwrap_or("text")
                .to_ascii_lowercase();
            if CLICK_INPUT_TYPES.contains(&kind.as_str()) {
                ActionType::Click
            } else {
                ActionType::Type
            }
        }
        "textarea" => ActionType::Type,
        "select" => ActionType::Select,
        _ => ActionType::Click,
    }
}

fn first_nonempty<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Option<&'a str> {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
}

pub fn instruction_for(el: &PageElement, action: ActionType) -> String {
    let form_label = el.form_context.as_ref().and_then(|f| f.label.as_deref());
    let placeholder = el.placeholder.as_deref();
    let aria = el.aria_label.as_deref();
    let name = el.name.as_deref();

    match action {
        ActionType::Click => {
            let label = first_nonempty([Some(el.text.as_str()), aria, placeholder, name])
                .unwrap_or("this element");
            format!("Click \"{}\"", truncate(label, LABEL_MAX))
        }
        ActionType::Type => {
            let field =
                first_nonempty([form_label, placeholder, aria, name]).unwrap_or("the field");
            format!("Type your information in \"{}\"", truncate(field, LABEL_MAX))
        }
        ActionType::Select => {
            let field = first_nonempty([form_label, aria, name]).unwrap_or("the dropdown");
            format!("Select an option from \"{}\"", truncate(field, LABEL_MAX))
        }
        ActionType::Scroll => "Scroll down to see more options".to_string(),
        ActionType::Wait => "Wait for the page to finish loading".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedCandidate<'a> {
    pub element: &'a PageElement,
    pub score: i32,
    pub action: ActionType,
    /// Chosen by prominence because nothing scored above zero.
    pub fallback: bool,
}

pub struct CandidateScorer;

impl CandidateScorer {
    /// Best element for `goal` on step `step_number`. Ties go to the element
    /// extracted first.
    pub fn rank<'a>(
        elements: &'a [PageElement],
        goal: &str,
        step_number: u32,
    ) -> Option<RankedCandidate<'a>> {
        let kw = keywords(goal);
        let mut best: Option<(&PageElement, i32)> = None;
        for el in elements {
            let s = score(el, &kw, step_number);
            debug!(index = el.index, tag = %el.tag, score = s, "scored candidate");
            if s > 0 && best.is_none_or(|(_, top)| s > top) {
                best = Some((el, s));
            }
        }
        if let Some((element, score)) = best {
            return Some(RankedCandidate {
                element,
                score,
                action: action_for(element),
                fallback: false,
            });
        }

        // Most prominent element; earliest wins on equal area.
        let mut prominent: Option<&PageElement> = None;
        for el in elements
            .iter()
            .filter(|e| e.is_visible && !e.is_disabled)
            .filter(|e| FALLBACK_TAGS.contains(&e.tag.as_str()))
        {
            if prominent.is_none_or(|p| el.rect.area() > p.rect.area()) {
                prominent = Some(el);
            }
        }
        prominent.map(|element| RankedCandidate {
            element,
            score: score(element, &kw, step_number),
            action: action_for(element),
            fallback: true,
        })
    }
}

pub struct HeuristicPlanner;

impl HeuristicPlanner {
    /// Next step for the session, or `None` when the page offers nothing to do.
    pub fn plan(page: &PageData, session: &SessionState) -> Option<GuidanceStep> {
        let step_number = session.current_step_number;
        let Some(best) = CandidateScorer::rank(&page.elements, &session.goal, step_number) else {
            info!(url = %page.url, "no actionable element on page");
            return None;
        };
        info!(
            step = step_number,
            index = best.element.index,
            score = best.score,
            action = %best.action,
            fallback = best.fallback,
            "heuristic planner chose element"
        );
        Some(StepBuilder::build(best.element, best.action, step_number))
    }
}
