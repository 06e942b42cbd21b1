//! Input events forwarded by the host and the pointer interactions they drive.
use std::ops::{BitAnd, BitOr, BitOrAssign};

use crate::{
    coordinates::{ClipSpace, Position, ScreenClipTransformer, ScreenSpace, ViewSpace},
    event::Invalidation,
    lasso::Lasso,
    panzoom::PanZoom,
    transform::TransformChain,
};

/// Keys with a meaning for the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    ArrowLeft,
    ArrowRight,
    ArrowUp,
    ArrowDown,
    Plus,
    Minus,
    Escape,
    Enter,
    Char(char),
    Other,
}

impl Key {
    /// Converts the `key` attribute of a DOM keyboard event.
    pub fn from_dom(key: &str) -> Self {
        match key {
            "ArrowLeft" => Key::ArrowLeft,
            "ArrowRight" => Key::ArrowRight,
            "ArrowUp" => Key::ArrowUp,
            "ArrowDown" => Key::ArrowDown,
            "+" | "=" => Key::Plus,
            "-" | "_" => Key::Minus,
            "Escape" => Key::Escape,
            "Enter" => Key::Enter,
            _ => {
                let mut chars = key.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Key::Char(c),
                    _ => Key::Other,
                }
            }
        }
    }
}

/// Modifier keys held during an event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Self = Self(0);
    pub const SHIFT: Self = Self(1 << 0);
    pub const CTRL: Self = Self(1 << 1);
    pub const ALT: Self = Self(1 << 2);
    pub const META: Self = Self(1 << 3);

    pub fn contains(self, other: Self) -> bool {
        (self & other) == other
    }
}

impl BitAnd for Modifiers {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for Modifiers {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Modifiers {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerButton {
    #[default]
    Primary,
    Middle,
    Secondary,
    Other(i16),
}

impl PointerButton {
    /// Converts the `button` attribute of a DOM pointer event.
    pub fn from_dom(button: i16) -> Self {
        match button {
            0 => PointerButton::Primary,
            1 => PointerButton::Middle,
            2 => PointerButton::Secondary,
            b => PointerButton::Other(b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub position: Position<ScreenSpace>,
    pub button: PointerButton,
    pub modifiers: Modifiers,
}

impl PointerEvent {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            position: Position::new((x, y)),
            button: PointerButton::Primary,
            modifiers: Modifiers::NONE,
        }
    }

    pub fn with_button(mut self, button: PointerButton) -> Self {
        self.button = button;
        self
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelEvent {
    pub position: Position<ScreenSpace>,
    /// Positive values zoom in.
    pub delta: f64,
    pub modifiers: Modifiers,
}

impl WheelEvent {
    pub fn new(x: f64, y: f64, delta: f64) -> Self {
        Self {
            position: Position::new((x, y)),
            delta,
            modifiers: Modifiers::NONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyEvent {
    pub key: Key,
    pub modifiers: Modifiers,
}

impl KeyEvent {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            modifiers: Modifiers::NONE,
        }
    }
}

/// What a pointer drag does.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractMode {
    #[default]
    Pan,
    Zoom,
    Lasso,
}

impl InteractMode {
    pub fn name(self) -> &'static str {
        match self {
            InteractMode::Pan => "pan",
            InteractMode::Zoom => "zoom",
            InteractMode::Lasso => "lasso",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pan" => Some(InteractMode::Pan),
            "zoom" => Some(InteractMode::Zoom),
            "lasso" => Some(InteractMode::Lasso),
            _ => None,
        }
    }
}

/// Result of a completed action.
#[derive(Debug)]
pub struct Finished {
    pub invalidation: Invalidation,
    /// The polygon drawn by a lasso action, if it encloses anything.
    pub lasso: Option<Lasso>,
}

/// A pointer interaction bound to one subplot from press to release.
#[derive(Debug)]
pub struct Action {
    subplot: usize,
    initial: PanZoom,
    inner: ActionInner,
}

#[derive(Debug)]
enum ActionInner {
    Pan(PanAction),
    Zoom(ZoomAction),
    Lasso(LassoAction),
}

fn clip_position(event: &PointerEvent, screen: &ScreenClipTransformer) -> Position<ClipSpace> {
    event.position.transform(screen)
}

impl Action {
    pub fn new(
        mode: InteractMode,
        subplot: usize,
        event: &PointerEvent,
        chain: &TransformChain,
        screen: &ScreenClipTransformer,
    ) -> Self {
        let position = clip_position(event, screen);
        let inner = match mode {
            InteractMode::Pan => ActionInner::Pan(PanAction { last: position }),
            InteractMode::Zoom => ActionInner::Zoom(ZoomAction {
                anchor: chain.clip_to_view(position),
                last: position,
            }),
            InteractMode::Lasso => {
                let mut lasso = Lasso::new();
                lasso.push(chain.inverse(position));
                ActionInner::Lasso(LassoAction { lasso })
            }
        };

        Self {
            subplot,
            initial: *chain.panzoom(),
            inner,
        }
    }

    pub fn subplot(&self) -> usize {
        self.subplot
    }

    pub fn mode(&self) -> InteractMode {
        match self.inner {
            ActionInner::Pan(_) => InteractMode::Pan,
            ActionInner::Zoom(_) => InteractMode::Zoom,
            ActionInner::Lasso(_) => InteractMode::Lasso,
        }
    }

    /// The lasso being drawn, if any.
    pub fn lasso(&self) -> Option<&Lasso> {
        match &self.inner {
            ActionInner::Lasso(action) => Some(&action.lasso),
            _ => None,
        }
    }

    pub fn update(
        &mut self,
        event: &PointerEvent,
        chain: &mut TransformChain,
        screen: &ScreenClipTransformer,
    ) -> Invalidation {
        let position = clip_position(event, screen);
        match &mut self.inner {
            ActionInner::Pan(action) => action.update(position, chain),
            ActionInner::Zoom(action) => action.update(position, chain, screen),
            ActionInner::Lasso(action) => action.update(position, chain),
        }
    }

    pub fn finish(self) -> Finished {
        match self.inner {
            ActionInner::Pan(_) | ActionInner::Zoom(_) => Finished {
                invalidation: Invalidation::NONE,
                lasso: None,
            },
            ActionInner::Lasso(action) => Finished {
                invalidation: Invalidation::LASSO_CHANGE,
                lasso: action.lasso.is_closed().then_some(action.lasso),
            },
        }
    }

    /// Aborts the action, restoring the pan and zoom state it started with.
    pub fn cancel(self, chain: &mut TransformChain) -> Invalidation {
        let mut invalidation = Invalidation::NONE;
        if chain.update_panzoom(|panzoom| *panzoom = self.initial) {
            invalidation |= Invalidation::TRANSFORM_CHANGE;
        }
        if let ActionInner::Lasso(_) = self.inner {
            invalidation |= Invalidation::LASSO_CHANGE;
        }

        invalidation
    }
}

#[derive(Debug)]
struct PanAction {
    last: Position<ClipSpace>,
}

impl PanAction {
    fn update(&mut self, position: Position<ClipSpace>, chain: &mut TransformChain) -> Invalidation {
        let offset = chain.clip_offset_to_view(position - self.last);
        self.last = position;

        if chain.update_panzoom(|panzoom| panzoom.pan_delta(offset)) {
            Invalidation::TRANSFORM_CHANGE
        } else {
            Invalidation::NONE
        }
    }
}

#[derive(Debug)]
struct ZoomAction {
    /// Pointer position at the start of the drag, kept fixed while zooming.
    anchor: Position<ViewSpace>,
    last: Position<ClipSpace>,
}

impl ZoomAction {
    fn update(
        &mut self,
        position: Position<ClipSpace>,
        chain: &mut TransformChain,
        screen: &ScreenClipTransformer,
    ) -> Invalidation {
        let delta = chain.clip_offset_to_view(position - self.last).extract();
        self.last = position;

        let coeff = PanZoom::drag_zoom_coeff(screen.width());
        let anchor = self.anchor;
        if chain.update_panzoom(|panzoom| panzoom.zoom_delta(delta, anchor, coeff)) {
            Invalidation::TRANSFORM_CHANGE
        } else {
            Invalidation::NONE
        }
    }
}

#[derive(Debug)]
struct LassoAction {
    lasso: Lasso,
}

impl LassoAction {
    fn update(&mut self, position: Position<ClipSpace>, chain: &TransformChain) -> Invalidation {
        if self.lasso.push(chain.inverse(position)) {
            Invalidation::LASSO_CHANGE
        } else {
            Invalidation::NONE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        coordinates::{Aabb, DataSpace},
        transform::SubplotPlacement,
    };

    fn chain() -> TransformChain {
        let bounds = Aabb::<DataSpace>::new(Position::new((0.0, 0.0)), Position::new((10.0, 10.0)));
        TransformChain::new(bounds, SubplotPlacement::full())
    }

    #[test]
    fn dom_keys_are_mapped() {
        assert_eq!(Key::from_dom("ArrowLeft"), Key::ArrowLeft);
        assert_eq!(Key::from_dom("="), Key::Plus);
        assert_eq!(Key::from_dom("r"), Key::Char('r'));
        assert_eq!(Key::from_dom("Shift"), Key::Other);
    }

    #[test]
    fn panning_follows_the_pointer() {
        let screen = ScreenClipTransformer::new(100.0, 100.0);
        let mut chain = chain();
        let mut action = Action::new(
            InteractMode::Pan,
            0,
            &PointerEvent::new(50.0, 50.0),
            &chain,
            &screen,
        );

        let invalidation = action.update(&PointerEvent::new(75.0, 50.0), &mut chain, &screen);
        assert!(invalidation.signaled(Invalidation::TRANSFORM_CHANGE));
        assert_eq!(chain.panzoom().pan(), [0.5, 0.0]);

        // The data point under the pointer did not move.
        let under = chain.inverse(Position::new((0.5, 0.0)));
        assert!((under.x - 5.0).abs() < 1e-9);

        assert!(action.finish().invalidation.is_empty());
    }

    #[test]
    fn cancelling_restores_the_initial_state() {
        let screen = ScreenClipTransformer::new(100.0, 100.0);
        let mut chain = chain();
        let mut action = Action::new(
            InteractMode::Zoom,
            0,
            &PointerEvent::new(50.0, 50.0),
            &chain,
            &screen,
        );

        action.update(&PointerEvent::new(80.0, 20.0), &mut chain, &screen);
        assert!(chain.panzoom().zoom()[0] > 1.0);

        let invalidation = action.cancel(&mut chain);
        assert!(invalidation.signaled(Invalidation::TRANSFORM_CHANGE));
        assert_eq!(chain.panzoom().zoom(), [1.0, 1.0]);
        assert_eq!(chain.panzoom().pan(), [0.0, 0.0]);
    }

    #[test]
    fn lasso_collects_data_positions() {
        let screen = ScreenClipTransformer::new(100.0, 100.0);
        let mut chain = chain();
        let mut action = Action::new(
            InteractMode::Lasso,
            0,
            &PointerEvent::new(0.0, 100.0),
            &chain,
            &screen,
        );
        action.update(&PointerEvent::new(100.0, 100.0), &mut chain, &screen);
        assert!(action.lasso().is_some_and(|l| !l.is_closed()));
        action.update(&PointerEvent::new(100.0, 0.0), &mut chain, &screen);

        let finished = action.finish();
        let lasso = finished.lasso.unwrap();
        assert_eq!(lasso.points()[0], Position::new((0.0, 0.0)));
        assert!(lasso.contains(Position::new((9.0, 1.0))));
        assert!(!lasso.contains(Position::new((1.0, 9.0))));
    }
}
