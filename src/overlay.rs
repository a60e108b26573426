//! Step overlay: highlight the target, keep the highlight aligned, and
//! report when the user performs the requested action.
//!
//! The controller owns no timers or DOM listeners. The host feeds it page
//! events and the current time; it answers by painting through an
//! [`OverlaySurface`] and, once per shown step, sending a [`Completion`]
//! down a oneshot channel.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::config::GuideConfig;
use crate::dom::{Document, NodeId, Rect, Viewport};
use crate::error::Result;
use crate::resolve::TargetResolver;
use crate::step::{ActionType, GuidanceStep};

const SPOTLIGHT_PAD: f64 = 6.0;
const RING_PAD: f64 = SPOTLIGHT_PAD + 3.0;
const EDGE_MARGIN: f64 = 12.0;
const CARD_WIDTH_RESERVE: f64 = 340.0;
const CARD_GAP: f64 = 14.0;
const CARD_ABOVE_OFFSET: f64 = 130.0;
const CARD_SIDE_BOTTOM_RESERVE: f64 = 140.0;
const CARD_SIDE_GAP: f64 = 16.0;
const ARROW_HALF_WIDTH: f64 = 9.0;

/// The host side of the overlay: geometry queries and painting into an
/// isolated layer above the page.
pub trait OverlaySurface {
    fn viewport(&self) -> Viewport;
    /// Current viewport-relative box of `node`, if it is still attached.
    fn rect_of(&self, node: NodeId) -> Option<Rect>;
    fn scroll_into_view(&mut self, node: NodeId);
    /// Replace whatever is painted with `frame`.
    fn paint(&mut self, frame: &OverlayFrame);
    /// Remove painted nodes, keeping the injected style.
    fn clear(&mut self);
    /// Tear the overlay host out of the page.
    fn remove_host(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Below,
    Above,
    Side,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrowDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Arrow {
    pub top: f64,
    pub left: f64,
    pub direction: ArrowDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CardPosition {
    pub top: f64,
    pub left: f64,
}

/// Everything needed to draw one overlay frame, in viewport coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayFrame {
    pub spotlight: Rect,
    pub ring: Rect,
    pub card: CardPosition,
    pub placement: Placement,
    pub arrow: Option<Arrow>,
    pub step_label: String,
    pub instruction: String,
    pub action: ActionType,
}

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.min(hi).max(lo)
}

impl OverlayFrame {
    /// Lay out a frame around `target`. The card goes below the target when
    /// there is `clearance` space under it, else above, else to the side.
    pub fn layout(
        target: Rect,
        viewport: Viewport,
        step: &GuidanceStep,
        step_number: u32,
        clearance: f64,
    ) -> Self {
        let vw = viewport.width;
        let vh = viewport.height;
        let card_left = clamp(target.left(), EDGE_MARGIN, vw - CARD_WIDTH_RESERVE);
        let arrow_left = target.left() + target.width / 2.0 - ARROW_HALF_WIDTH;

        let (placement, card, arrow) = if vh - target.bottom() >= clearance {
            (
                Placement::Below,
                CardPosition {
                    top: target.bottom() + SPOTLIGHT_PAD + CARD_GAP,
                    left: card_left,
                },
                Some(Arrow {
                    top: target.bottom() + SPOTLIGHT_PAD + 3.0,
                    left: arrow_left,
                    direction: ArrowDirection::Up,
                }),
            )
        } else if target.top() >= clearance {
            (
                Placement::Above,
                CardPosition {
                    top: target.top() - SPOTLIGHT_PAD - CARD_ABOVE_OFFSET,
                    left: card_left,
                },
                Some(Arrow {
                    top: target.top() - SPOTLIGHT_PAD - 15.0,
                    left: arrow_left,
                    direction: ArrowDirection::Down,
                }),
            )
        } else {
            (
                Placement::Side,
                CardPosition {
                    top: clamp(target.top(), EDGE_MARGIN, vh - CARD_SIDE_BOTTOM_RESERVE),
                    left: clamp(
                        target.right() + CARD_SIDE_GAP,
                        EDGE_MARGIN,
                        vw - CARD_WIDTH_RESERVE,
                    ),
                },
                None,
            )
        };

        OverlayFrame {
            spotlight: target.padded(SPOTLIGHT_PAD),
            ring: target.padded(RING_PAD),
            card,
            placement,
            arrow,
            step_label: format!("Step {step_number}"),
            instruction: step.instruction.clone(),
            action: step.action,
        }
    }
}

/// What crosses back to the orchestrator when a step is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub action: ActionType,
}

/// A page event as seen by the overlay. `path` is the event target
/// followed by its ancestors.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Click { path: Vec<NodeId> },
    Input { path: Vec<NodeId>, value: String },
    Change { path: Vec<NodeId> },
    Scroll,
    Resize,
}

impl PageEvent {
    pub fn click(doc: &Document, target: NodeId) -> Self {
        PageEvent::Click {
            path: doc.event_path(target),
        }
    }

    pub fn input(doc: &Document, target: NodeId, value: &str) -> Self {
        PageEvent::Input {
            path: doc.event_path(target),
            value: value.to_string(),
        }
    }

    pub fn change(doc: &Document, target: NodeId) -> Self {
        PageEvent::Change {
            path: doc.event_path(target),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Idle,
    /// Painted, but the action has no completion detector (`scroll`, `wait`).
    Shown,
    Listening,
    Completed,
    Hidden,
}

struct ActiveStep {
    step: GuidanceStep,
    number: u32,
    target: NodeId,
    last_paint: Instant,
    /// Dropping this tells the receiver the step was abandoned.
    done: oneshot::Sender<Completion>,
    /// Pending `type` completion.
    deadline: Option<Instant>,
}

pub struct OverlayController<S: OverlaySurface> {
    surface: S,
    state: OverlayState,
    active: Option<ActiveStep>,
    type_debounce: Duration,
    repaint_throttle: Duration,
    card_clearance: f64,
}

impl<S: OverlaySurface> OverlayController<S> {
    pub fn new(surface: S, config: &GuideConfig) -> Self {
        Self {
            surface,
            state: OverlayState::Idle,
            active: None,
            type_debounce: config.type_debounce(),
            repaint_throttle: config.repaint_throttle(),
            card_clearance: config.card_clearance_px,
        }
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    pub fn target(&self) -> Option<NodeId> {
        self.active.as_ref().map(|a| a.target)
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Display `step` on `doc`, replacing any step already shown. The
    /// returned receiver yields at most one [`Completion`]; it reports
    /// closed if the step is hidden or superseded first.
    pub fn show(
        &mut self,
        doc: &Document,
        step: &GuidanceStep,
        step_number: u32,
        now: Instant,
    ) -> Result<oneshot::Receiver<Completion>> {
        self.hide();

        let resolved = TargetResolver::new(doc).resolve_or_lost(step)?;
        let target = resolved.node;
        info!(step = step_number, action = %step.action, via = %resolved.via, "showing step");

        let (done, rx) = oneshot::channel();
        self.active = Some(ActiveStep {
            step: step.clone(),
            number: step_number,
            target,
            last_paint: now,
            done,
            deadline: None,
        });
        self.repaint(doc, now);
        self.state = OverlayState::Shown;

        let viewport = self.surface.viewport();
        let rect = self
            .surface
            .rect_of(target)
            .or_else(|| doc.element(target).map(|e| e.rect));
        if rect.is_some_and(|r| r.top() < 0.0 || r.bottom() > viewport.height) {
            debug!(?target, "scrolling target into view");
            self.surface.scroll_into_view(target);
        }

        if matches!(
            step.action,
            ActionType::Click | ActionType::Type | ActionType::Select
        ) {
            self.state = OverlayState::Listening;
        }
        Ok(rx)
    }

    fn repaint(&mut self, doc: &Document, now: Instant) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some(rect) = self
            .surface
            .rect_of(active.target)
            .or_else(|| doc.element(active.target).map(|e| e.rect))
        else {
            return;
        };
        let frame = OverlayFrame::layout(
            rect,
            self.surface.viewport(),
            &active.step,
            active.number,
            self.card_clearance,
        );
        active.last_paint = now;
        self.surface.paint(&frame);
    }

    /// Feed one page event. `doc` is only consulted for geometry when the
    /// surface cannot report it.
    pub fn handle_event(&mut self, doc: &Document, event: &PageEvent, now: Instant) {
        self.tick(now);
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let target = active.target;
        match event {
            PageEvent::Scroll | PageEvent::Resize => {
                if now.saturating_duration_since(active.last_paint) >= self.repaint_throttle {
                    self.repaint(doc, now);
                }
            }
            PageEvent::Click { path } => {
                if self.state == OverlayState::Listening
                    && active.step.action == ActionType::Click
                    && path.contains(&target)
                {
                    debug!("click detected");
                    self.complete();
                }
            }
            PageEvent::Input { path, value } => {
                if self.state == OverlayState::Listening
                    && active.step.action == ActionType::Type
                    && path.contains(&target)
                    && !value.is_empty()
                {
                    active.deadline = Some(now + self.type_debounce);
                }
            }
            PageEvent::Change { path } => {
                if self.state == OverlayState::Listening
                    && active.step.action == ActionType::Select
                    && path.contains(&target)
                {
                    debug!("change detected");
                    self.complete();
                }
            }
        }
    }

    /// Advance time: fires a pending `type` completion once the user has
    /// stopped typing for the debounce window.
    pub fn tick(&mut self, now: Instant) {
        let due = self
            .active
            .as_ref()
            .and_then(|a| a.deadline)
            .is_some_and(|d| now >= d);
        if due && self.state == OverlayState::Listening {
            debug!("typing settled");
            self.complete();
        }
    }

    fn complete(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.surface.clear();
        self.state = OverlayState::Completed;
        let completion = Completion {
            action: active.step.action,
        };
        info!(step = active.number, action = %completion.action, "step completed");
        if active.done.send(completion).is_err() {
            debug!("completion receiver already gone");
        }
    }

    /// Stop listening and clear the frame. Safe to call in any state.
    pub fn hide(&mut self) {
        if self.active.take().is_some() {
            self.surface.clear();
        }
        if self.state != OverlayState::Idle {
            self.state = OverlayState::Hidden;
        }
    }

    pub fn destroy(&mut self) {
        self.hide();
        self.surface.remove_host();
        self.state = OverlayState::Hidden;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{DocumentBuilder, el};
    use crate::step::{SelectorStrategy, StepTarget, StepValidation, ValidationEvent};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tokio::sync::oneshot::error::TryRecvError;

    #[derive(Default)]
    struct FakeSurface {
        rects: HashMap<NodeId, Rect>,
        frames: Vec<OverlayFrame>,
        clears: usize,
        scrolled: Vec<NodeId>,
        removed: bool,
    }

    impl OverlaySurface for FakeSurface {
        fn viewport(&self) -> Viewport {
            Viewport::default()
        }
        fn rect_of(&self, node: NodeId) -> Option<Rect> {
            self.rects.get(&node).copied()
        }
        fn scroll_into_view(&mut self, node: NodeId) {
            self.scrolled.push(node);
        }
        fn paint(&mut self, frame: &OverlayFrame) {
            self.frames.push(frame.clone());
        }
        fn clear(&mut self) {
            self.clears += 1;
        }
        fn remove_host(&mut self) {
            self.removed = true;
        }
    }

    fn step(action: ActionType, selector: &str) -> GuidanceStep {
        GuidanceStep {
            step_title: "Step 1".into(),
            instruction: "Do the thing".into(),
            action,
            target: StepTarget {
                strategy: SelectorStrategy::Css,
                selector: selector.into(),
                text_hint: String::new(),
            },
            validation: StepValidation {
                event: ValidationEvent::for_action(action),
                success_hint: String::new(),
            },
        }
    }

    fn form() -> Document {
        DocumentBuilder::new("https://example.test/form").body(
            el("body").rect(0.0, 0.0, 1280.0, 720.0).children([
                el("button")
                    .id("next")
                    .rect(100.0, 100.0, 80.0, 30.0)
                    .child(el("span").rect(110.0, 105.0, 40.0, 20.0).text("Next")),
                el("input").id("nric").rect(100.0, 200.0, 200.0, 30.0),
                el("select").id("country").rect(100.0, 300.0, 200.0, 30.0),
                el("a").id("far").attr("href", "/x").rect(100.0, 1500.0, 80.0, 20.0).text("Far"),
            ]),
        )
    }

    fn controller() -> OverlayController<FakeSurface> {
        OverlayController::new(FakeSurface::default(), &GuideConfig::default())
    }

    fn node(doc: &Document, id: &str) -> NodeId {
        doc.find_by_id(id).unwrap()
    }

    #[test]
    fn click_inside_target_completes_once() {
        let doc = form();
        let mut overlay = controller();
        let t0 = Instant::now();
        let mut rx = overlay.show(&doc, &step(ActionType::Click, "#next"), 1, t0).unwrap();
        assert_eq!(overlay.state(), OverlayState::Listening);
        assert_eq!(overlay.surface().frames.len(), 1);

        let span = doc.element_children(node(&doc, "next")).next().unwrap();
        overlay.handle_event(&doc, &PageEvent::click(&doc, node(&doc, "nric")), t0);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        overlay.handle_event(&doc, &PageEvent::click(&doc, span), t0);
        overlay.handle_event(&doc, &PageEvent::click(&doc, span), t0);
        assert_eq!(rx.try_recv(), Ok(Completion { action: ActionType::Click }));
        assert_eq!(overlay.state(), OverlayState::Completed);
        assert_eq!(overlay.target(), None);
    }

    #[test]
    fn typing_completes_after_quiet_period() {
        let doc = form();
        let mut overlay = controller();
        let t0 = Instant::now();
        let mut rx = overlay.show(&doc, &step(ActionType::Type, "#nric"), 2, t0).unwrap();
        let input = node(&doc, "nric");

        overlay.handle_event(&doc, &PageEvent::input(&doc, input, ""), t0);
        overlay.tick(t0 + Duration::from_secs(5));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        let t1 = t0 + Duration::from_secs(6);
        overlay.handle_event(&doc, &PageEvent::input(&doc, input, "S"), t1);
        overlay.handle_event(&doc, &PageEvent::input(&doc, input, "S1"), t1 + Duration::from_millis(800));
        overlay.tick(t1 + Duration::from_millis(1500));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        overlay.tick(t1 + Duration::from_millis(2000));
        assert_eq!(rx.try_recv(), Ok(Completion { action: ActionType::Type }));
    }

    #[test]
    fn change_on_select_completes_immediately() {
        let doc = form();
        let mut overlay = controller();
        let t0 = Instant::now();
        let mut rx = overlay.show(&doc, &step(ActionType::Select, "#country"), 3, t0).unwrap();
        overlay.handle_event(&doc, &PageEvent::click(&doc, node(&doc, "country")), t0);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        overlay.handle_event(&doc, &PageEvent::change(&doc, node(&doc, "country")), t0);
        assert_eq!(rx.try_recv(), Ok(Completion { action: ActionType::Select }));
    }

    #[test]
    fn second_show_supersedes_first() {
        let doc = form();
        let mut overlay = controller();
        let t0 = Instant::now();
        let mut first = overlay.show(&doc, &step(ActionType::Click, "#next"), 1, t0).unwrap();
        let mut second = overlay.show(&doc, &step(ActionType::Click, "#next"), 1, t0).unwrap();
        assert_eq!(first.try_recv(), Err(TryRecvError::Closed));

        let next = node(&doc, "next");
        overlay.handle_event(&doc, &PageEvent::click(&doc, next), t0);
        overlay.handle_event(&doc, &PageEvent::click(&doc, next), t0);
        assert_eq!(second.try_recv(), Ok(Completion { action: ActionType::Click }));
        assert_eq!(second.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn hide_is_idempotent_and_cancels_pending_typing() {
        let doc = form();
        let mut overlay = controller();
        overlay.hide();
        assert_eq!(overlay.state(), OverlayState::Idle);
        assert_eq!(overlay.surface().clears, 0);

        let t0 = Instant::now();
        let mut rx = overlay.show(&doc, &step(ActionType::Type, "#nric"), 1, t0).unwrap();
        overlay.handle_event(&doc, &PageEvent::input(&doc, node(&doc, "nric"), "abc"), t0);
        overlay.hide();
        overlay.hide();
        overlay.tick(t0 + Duration::from_secs(10));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
        assert_eq!(overlay.state(), OverlayState::Hidden);
        assert_eq!(overlay.surface().clears, 1);

        overlay.destroy();
        assert!(overlay.surface().removed);
    }

    #[test]
    fn repaint_is_throttled() {
        let doc = form();
        let mut overlay = controller();
        let t0 = Instant::now();
        let _rx = overlay.show(&doc, &step(ActionType::Click, "#next"), 1, t0).unwrap();
        overlay.handle_event(&doc, &PageEvent::Scroll, t0 + Duration::from_millis(10));
        overlay.handle_event(&doc, &PageEvent::Scroll, t0 + Duration::from_millis(49));
        assert_eq!(overlay.surface().frames.len(), 1);

        let moved = Rect::new(100.0, 40.0, 80.0, 30.0);
        overlay.surface_mut().rects.insert(node(&doc, "next"), moved);
        overlay.handle_event(&doc, &PageEvent::Resize, t0 + Duration::from_millis(50));
        overlay.handle_event(&doc, &PageEvent::Scroll, t0 + Duration::from_millis(60));
        let frames = &overlay.surface().frames;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].spotlight, moved.padded(6.0));
    }

    #[test]
    fn offscreen_target_is_scrolled_into_view() {
        let doc = form();
        let mut overlay = controller();
        let _rx = overlay
            .show(&doc, &step(ActionType::Click, "#far"), 1, Instant::now())
            .unwrap();
        assert_eq!(overlay.surface().scrolled, vec![node(&doc, "far")]);
    }

    #[test]
    fn missing_target_is_reported() {
        let doc = form();
        let mut overlay = controller();
        let err = overlay.show(&doc, &step(ActionType::Click, "#gone"), 1, Instant::now());
        assert!(matches!(err, Err(crate::GuideError::TargetNotFound(_))));
        assert_eq!(overlay.target(), None);
    }

    #[test]
    fn wait_steps_are_shown_without_listening() {
        let doc = form();
        let mut overlay = controller();
        let t0 = Instant::now();
        let mut rx = overlay.show(&doc, &step(ActionType::Wait, "#next"), 4, t0).unwrap();
        assert_eq!(overlay.state(), OverlayState::Shown);
        overlay.handle_event(&doc, &PageEvent::click(&doc, node(&doc, "next")), t0);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn card_placement_prefers_below_then_above_then_side() {
        let s = step(ActionType::Click, "#x");
        let vp = Viewport::default();

        let below = OverlayFrame::layout(Rect::new(5.0, 100.0, 80.0, 30.0), vp, &s, 1, 120.0);
        assert_eq!(below.placement, Placement::Below);
        assert_eq!(below.card, CardPosition { top: 150.0, left: 12.0 });
        assert_eq!(below.arrow.map(|a| (a.top, a.left)), Some((139.0, 36.0)));

        let above = OverlayFrame::layout(Rect::new(1200.0, 650.0, 60.0, 30.0), vp, &s, 1, 120.0);
        assert_eq!(above.placement, Placement::Above);
        assert_eq!(above.card, CardPosition { top: 514.0, left: 940.0 });
        assert_eq!(above.arrow.map(|a| a.direction), Some(ArrowDirection::Down));

        let side = OverlayFrame::layout(Rect::new(100.0, 50.0, 80.0, 600.0), vp, &s, 1, 120.0);
        assert_eq!(side.placement, Placement::Side);
        assert_eq!(side.card, CardPosition { top: 50.0, left: 196.0 });
        assert_eq!(side.arrow, None);
        assert_eq!(side.ring, Rect::new(91.0, 41.0, 98.0, 618.0));
        assert_eq!(side.step_label, "Step 1");
    }
}
