use thiserror::Error;

pub type Result<T> = std::result::Result<T, GuideError>;

/// Failure modes of the guidance core. None of them is fatal: callers
/// degrade to "no actionable step this cycle".
#[derive(Debug, Error)]
pub enum GuideError {
    /// A CSS or XPath string could not be parsed.
    #[error("invalid {kind} selector `{selector}`: {reason}")]
    Selector {
        kind: &'static str,
        selector: String,
        reason: String,
    },

    /// Every resolution strategy failed for a step target.
    #[error("target not found: {0}")]
    TargetNotFound(String),

    /// An externally supplied step did not satisfy the step schema.
    #[error("malformed plan: {0}")]
    MalformedPlan(String),

    /// A page snapshot could not be turned into a document.
    #[error("invalid page snapshot: {0}")]
    Snapshot(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GuideError {
    pub(crate) fn css(selector: &str, reason: impl Into<String>) -> Self {
        GuideError::Selector {
            kind: "css",
            selector: selector.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn xpath(selector: &str, reason: impl Into<String>) -> Self {
        GuideError::Selector {
            kind: "xpath",
            selector: selector.to_string(),
            reason: reason.into(),
        }
    }
}
