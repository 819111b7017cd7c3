//! # Component Masks
//!
//! A component is identified by a bit (0-63). The set of components an
//! object carries is its [`ComponentMask`].

/// Marker trait for statically known component types.
///
/// # Example
///
/// ```rust,ignore
/// struct RenderMesh { mesh_id: u32 }
///
/// impl Component for RenderMesh {
///     const ID: u8 = 0;
/// }
/// ```
pub trait Component: Copy + Send + Sync + 'static {
    /// Unique identifier for this component type (0-63).
    const ID: u8;
}

/// Bitmask of attached components (up to 64 component types).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ComponentMask(pub u64);

impl ComponentMask {
    /// The mask with no components.
    pub const EMPTY: Self = Self(0);

    /// Returns the mask for a single component bit.
    #[inline]
    #[must_use]
    pub const fn bit(id: u8) -> Self {
        Self(1 << id)
    }

    /// Returns the mask for a statically known component type.
    #[inline]
    #[must_use]
    pub const fn of<C: Component>() -> Self {
        Self::bit(C::ID)
    }

    /// Returns this mask with `id` added.
    #[inline]
    #[must_use]
    pub const fn with(self, id: u8) -> Self {
        Self(self.0 | (1 << id))
    }

    /// Returns this mask with `id` removed.
    #[inline]
    #[must_use]
    pub const fn without(self, id: u8) -> Self {
        Self(self.0 & !(1 << id))
    }

    /// Checks if a specific component is present.
    #[inline]
    #[must_use]
    pub const fn has(self, id: u8) -> bool {
        (self.0 & (1 << id)) != 0
    }

    /// Checks if every component in `other` is present.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Checks if at least one component of `other` is present.
    #[inline]
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    /// Returns the components present in both masks.
    #[inline]
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Returns the components present in either mask.
    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns the number of components.
    #[inline]
    #[must_use]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Checks if no component is present.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates over the component bits, lowest first.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let bit = bits.trailing_zeros() as u8;
            bits &= bits - 1;
            Some(bit)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_ops() {
        let mask = ComponentMask::EMPTY.with(5).with(1);
        assert!(mask.has(5));
        assert!(mask.has(1));
        assert!(!mask.has(0));
        assert_eq!(mask.count(), 2);
        assert!(mask.contains(ComponentMask::bit(5)));
        assert!(!mask.without(5).has(5));
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![1, 5]);
    }
}
