//! Re-locating a step's target on the current page.
//!
//! Steps may have been planned against an older snapshot (or by a remote
//! model), so resolution walks a fallback chain and treats selector syntax
//! errors as "no match" rather than aborting.

use std::fmt;

use tracing::{debug, warn};

use crate::dom::{Document, NodeId};
use crate::error::{GuideError, Result};
use crate::selector::{Selector, XPath};
use crate::step::{GuidanceStep, SelectorStrategy};

/// Elements searched by the text fallback.
pub const TEXT_SEARCH_SELECTOR: &str =
    "a, button, input, textarea, select, [role=\"button\"], [role=\"link\"]";

/// Which link of the chain produced the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedVia {
    Css,
    Xpath,
    ExactText,
    ContainsText,
    AriaLabel,
    /// CSS match accepted even though the element is not visible.
    HiddenCss,
}

impl fmt::Display for ResolvedVia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResolvedVia::Css => "css",
            ResolvedVia::Xpath => "xpath",
            ResolvedVia::ExactText => "exact-text",
            ResolvedVia::ContainsText => "contains-text",
            ResolvedVia::AriaLabel => "aria-label",
            ResolvedVia::HiddenCss => "hidden-css",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub node: NodeId,
    pub via: ResolvedVia,
}

pub struct TargetResolver<'d> {
    doc: &'d Document,
}

impl<'d> TargetResolver<'d> {
    pub fn new(doc: &'d Document) -> Self {
        Self { doc }
    }

    /// First success wins:
    /// 1. `selector` as CSS, visible only
    /// 2. `selector` as XPath when the strategy says so, visible only
    /// 3. `textHint` against interactive elements: exact, contains, aria-label
    /// 4. `selector` as CSS without the visibility check
    pub fn resolve(&self, step: &GuidanceStep) -> Option<Resolved> {
        let target = &step.target;
        let selector = target.selector.trim();

        if !selector.is_empty() {
            if let Some(node) = self.css(selector).filter(|&n| self.doc.is_visible(n)) {
                return Some(Resolved {
                    node,
                    via: ResolvedVia::Css,
                });
            }
            if target.strategy == SelectorStrategy::Xpath {
                if let Some(node) = self.xpath(selector).filter(|&n| self.doc.is_visible(n)) {
                    return Some(Resolved {
                        node,
                        via: ResolvedVia::Xpath,
                    });
                }
            }
        }

        if let Some(found) = self.by_text(&target.text_hint) {
            return Some(found);
        }

        if !selector.is_empty() {
            if let Some(node) = self.css(selector) {
                return Some(Resolved {
                    node,
                    via: ResolvedVia::HiddenCss,
                });
            }
        }
        None
    }

    /// Like [`resolve`](Self::resolve), but a miss is a
    /// [`GuideError::TargetNotFound`].
    pub fn resolve_or_lost(&self, step: &GuidanceStep) -> Result<Resolved> {
        self.resolve(step).ok_or_else(|| {
            let what = if step.target.selector.is_empty() {
                format!("text \"{}\"", step.target.text_hint)
            } else {
                step.target.selector.clone()
            };
            GuideError::TargetNotFound(what)
        })
    }

    fn css(&self, selector: &str) -> Option<NodeId> {
        match Selector::parse(selector) {
            Ok(sel) => sel.query_first(self.doc),
            Err(e) => {
                debug!(error = %e, "css resolution skipped");
                None
            }
        }
    }

    fn xpath(&self, selector: &str) -> Option<NodeId> {
        match XPath::parse(selector) {
            Ok(xp) => xp.first(self.doc),
            Err(e) => {
                debug!(error = %e, "xpath resolution skipped");
                None
            }
        }
    }

    fn by_text(&self, hint: &str) -> Option<Resolved> {
        let needle = hint.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        let candidates = match Selector::parse(TEXT_SEARCH_SELECTOR) {
            Ok(sel) => sel.query_all(self.doc),
            Err(e) => {
                warn!(error = %e, "text search selector rejected");
                return None;
            }
        };
        let visible: Vec<(NodeId, String)> = candidates
            .into_iter()
            .filter(|&n| self.doc.is_visible(n))
            .map(|n| (n, self.doc.normalized_text(n).to_lowercase()))
            .collect();

        if let Some((node, _)) = visible.iter().find(|(_, text)| *text == needle) {
            return Some(Resolved {
                node: *node,
                via: ResolvedVia::ExactText,
            });
        }
        let contained = visible.iter().find(|(_, text)| {
            text.contains(&needle) || (!text.is_empty() && needle.contains(text.as_str()))
        });
        if let Some((node, _)) = contained {
            return Some(Resolved {
                node: *node,
                via: ResolvedVia::ContainsText,
            });
        }
        visible
            .iter()
            .find(|(n, _)| {
                self.doc
                    .element(*n)
                    .and_then(|e| e.attr("aria-label"))
                    .is_some_and(|a| a.to_lowercase().contains(&needle))
            })
            .map(|(node, _)| Resolved {
                node: *node,
                via: ResolvedVia::AriaLabel,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{DocumentBuilder, el};
    use crate::step::{ActionType, StepTarget, StepValidation, ValidationEvent};

    fn step(strategy: SelectorStrategy, selector: &str, hint: &str) -> GuidanceStep {
        GuidanceStep {
            step_title: "Step 1".into(),
            instruction: "Do it".into(),
            action: ActionType::Click,
            target: StepTarget {
                strategy,
                selector: selector.into(),
                text_hint: hint.into(),
            },
            validation: StepValidation {
                event: ValidationEvent::Click,
                success_hint: String::new(),
            },
        }
    }

    fn page() -> Document {
        DocumentBuilder::new("https://example.test/").body(
            el("body").rect(0.0, 0.0, 1280.0, 720.0).children([
                el("button").id("apply").rect(10.0, 10.0, 80.0, 30.0).text("Apply now"),
                el("button").id("ghost").hidden().rect(10.0, 50.0, 80.0, 30.0).text("Ghost"),
                el("a")
                    .attr("href", "/help")
                    .attr("aria-label", "Open help centre")
                    .rect(10.0, 90.0, 30.0, 30.0)
                    .text("?"),
                el("div").attr("role", "button").rect(10.0, 130.0, 200.0, 30.0).text("Continue to payment"),
            ]),
        )
    }

    fn resolve(s: &GuidanceStep) -> Option<ResolvedVia> {
        TargetResolver::new(&page()).resolve(s).map(|r| r.via)
    }

    #[test]
    fn visible_css_match_wins() {
        assert_eq!(resolve(&step(SelectorStrategy::Css, "#apply", "")), Some(ResolvedVia::Css));
    }

    #[test]
    fn xpath_only_when_strategy_says_so() {
        let xp = "//*[@id=\"apply\"]";
        assert_eq!(resolve(&step(SelectorStrategy::Xpath, xp, "")), Some(ResolvedVia::Xpath));
        assert_eq!(resolve(&step(SelectorStrategy::Css, xp, "")), None);
    }

    #[test]
    fn stale_selector_falls_back_to_text() {
        let s = step(SelectorStrategy::Css, "#apply-button-v2", "apply NOW");
        let doc = page();
        let resolved = TargetResolver::new(&doc).resolve(&s).unwrap();
        assert_eq!(resolved.via, ResolvedVia::ExactText);
        assert_eq!(doc.element(resolved.node).and_then(|e| e.id()), Some("apply"));
    }

    #[test]
    fn text_containment_works_both_ways() {
        assert_eq!(
            resolve(&step(SelectorStrategy::Text, "", "continue")),
            Some(ResolvedVia::ContainsText)
        );
        assert_eq!(
            resolve(&step(SelectorStrategy::Text, "", "Click Apply now please")),
            Some(ResolvedVia::ContainsText)
        );
        assert_eq!(
            resolve(&step(SelectorStrategy::Text, "", "help centre")),
            Some(ResolvedVia::AriaLabel)
        );
    }

    #[test]
    fn hidden_css_is_the_last_resort() {
        assert_eq!(
            resolve(&step(SelectorStrategy::Css, "#ghost", "nothing like it")),
            Some(ResolvedVia::HiddenCss)
        );
    }

    #[test]
    fn syntax_errors_do_not_abort_the_chain() {
        assert_eq!(
            resolve(&step(SelectorStrategy::Xpath, "button[[", "Apply now")),
            Some(ResolvedVia::ExactText)
        );
    }

    #[test]
    fn overflowing_nth_selector_falls_through_to_text() {
        assert_eq!(
            resolve(&step(
                SelectorStrategy::Css,
                "button:nth-child(-n-9223372036854775808)",
                "Apply now"
            )),
            Some(ResolvedVia::ExactText)
        );
    }

    #[test]
    fn exhausted_chain_reports_target_lost() {
        let doc = page();
        let err = TargetResolver::new(&doc)
            .resolve_or_lost(&step(SelectorStrategy::Css, "#missing", "zzz"))
            .unwrap_err();
        assert!(matches!(err, GuideError::TargetNotFound(ref s) if s == "#missing"));
    }
}
