use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, BitXorAssign, Not};

/// Set of reasons for which the canvas has to produce a new frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Invalidation(u32);

impl Invalidation {
    pub const NONE: Self = Self(0);

    // External events
    pub const RESIZE: Self = Self(1 << 0);
    pub const DATA_UPDATE: Self = Self(1 << 1);
    pub const BACKGROUND_COLOR_CHANGE: Self = Self(1 << 2);
    pub const VISUAL_ADDITION: Self = Self(1 << 3);
    pub const VISUAL_REMOVAL: Self = Self(1 << 4);
    pub const VISUAL_CONFIG_CHANGE: Self = Self(1 << 5);
    pub const CLUSTER_CHANGE: Self = Self(1 << 6);
    pub const SELECTION_CHANGE: Self = Self(1 << 7);

    // Internal events
    pub const TRANSFORM_CHANGE: Self = Self(1 << 20);
    pub const LASSO_CHANGE: Self = Self(1 << 21);
    pub const MODE_CHANGE: Self = Self(1 << 22);
    pub const RESOURCE_RETRY: Self = Self(1 << 23);

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }

    pub fn has_events(&self) -> bool {
        *self != Self::NONE
    }

    pub fn clear(&mut self) -> Self {
        let e = *self;
        *self = Self::NONE;
        e
    }

    pub fn signal(&mut self, event: Self) {
        *self |= event;
    }

    pub fn signal_many(&mut self, events: &[Self]) {
        let events = events.iter().fold(Self::NONE, |acc, &e| acc | e);
        *self |= events;
    }

    pub fn signaled(&self, event: Self) -> bool {
        (*self & event).has_events()
    }

    pub fn signaled_any(&self, events: &[Self]) -> bool {
        events.iter().copied().any(|e| (*self & e).has_events())
    }
}

impl BitAnd for Invalidation {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for Invalidation {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl BitOr for Invalidation {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Invalidation {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitXor for Invalidation {
    type Output = Self;

    fn bitxor(self, rhs: Self) -> Self::Output {
        Self(self.0 ^ rhs.0)
    }
}

impl BitXorAssign for Invalidation {
    fn bitxor_assign(&mut self, rhs: Self) {
        self.0 ^= rhs.0;
    }
}

impl Not for Invalidation {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self(!self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_returns_the_signaled_set() {
        let mut events = Invalidation::NONE;
        assert!(events.is_empty());

        events.signal(Invalidation::RESIZE);
        events.signal_many(&[Invalidation::DATA_UPDATE, Invalidation::TRANSFORM_CHANGE]);
        assert!(events.signaled(Invalidation::DATA_UPDATE));
        assert!(!events.signaled(Invalidation::LASSO_CHANGE));
        assert!(events.signaled_any(&[Invalidation::LASSO_CHANGE, Invalidation::RESIZE]));

        let taken = events.clear();
        assert!(events.is_empty());
        assert!(taken.signaled(Invalidation::TRANSFORM_CHANGE));
    }
}
