//! Step-by-step guidance on arbitrary web pages.
//!
//! A captured [`Document`] goes through [`PageModelExtractor`], the
//! [`HeuristicPlanner`] picks one element and [`StepBuilder`] turns it into a
//! [`GuidanceStep`]. At display time [`TargetResolver`] finds the element
//! again and [`OverlayController`] highlights it until the user acts.
//! [`NavigationWatcher`] says when to start over.

pub mod config;
pub mod dom;
pub mod error;
pub mod extract;
pub mod navigation;
pub mod overlay;
pub mod planner;
pub mod resolve;
pub mod selector;
pub mod session;
pub mod step;

pub use config::{GuideConfig, LlmConfig, LlmProvider};
pub use dom::{Document, DocumentBuilder, ElementSpec, NodeId, Rect, Viewport, el};
pub use error::{GuideError, Result};
pub use extract::{ElementRect, FormContext, PageData, PageElement, PageModelExtractor};
pub use navigation::{NavEvent, NavigationSignal, NavigationSource, NavigationWatcher};
pub use overlay::{
    Completion, OverlayController, OverlayFrame, OverlayState, OverlaySurface, PageEvent,
    Placement,
};
pub use planner::{CandidateScorer, HeuristicPlanner, RankedCandidate};
pub use resolve::{Resolved, ResolvedVia, TargetResolver};
pub use session::{ActionRecord, PlannerMode, SessionState};
pub use step::{
    ActionType, GuidanceStep, SelectorStrategy, StepBuilder, StepTarget, StepValidation,
    ValidationEvent, accept_external_plan,
};
