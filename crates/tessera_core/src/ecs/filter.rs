//! # Object Filters
//!
//! Selects groupings by required and excluded components.

use super::component::ComponentMask;

/// A query over component masks: every `all` bit present, no `none` bit present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Filter {
    /// Components that must be present.
    pub all: ComponentMask,
    /// Components that must be absent.
    pub none: ComponentMask,
}

impl Filter {
    /// Creates a filter matching every object.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            all: ComponentMask::EMPTY,
            none: ComponentMask::EMPTY,
        }
    }

    /// Requires a component.
    #[must_use]
    pub const fn with(self, id: u8) -> Self {
        Self {
            all: self.all.with(id),
            none: self.none,
        }
    }

    /// Excludes a component.
    #[must_use]
    pub const fn without(self, id: u8) -> Self {
        Self {
            all: self.all,
            none: self.none.with(id),
        }
    }

    /// Checks if a mask passes the filter.
    #[inline]
    #[must_use]
    pub const fn matches(&self, mask: ComponentMask) -> bool {
        mask.contains(self.all) && !mask.intersects(self.none)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches() {
        let filter = Filter::new().with(0).without(3);
        assert!(filter.matches(ComponentMask::bit(0).with(1)));
        assert!(!filter.matches(ComponentMask::bit(1)));
        assert!(!filter.matches(ComponentMask::bit(0).with(3)));
    }
}
