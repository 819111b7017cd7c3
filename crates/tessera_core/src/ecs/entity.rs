//! # Object Identity
//!
//! Objects are lightweight identifiers consisting of:
//! - An index into per-object arrays
//! - A generation counter for safe reuse

use super::component::ComponentMask;

/// Unique identifier for an object.
///
/// The ID is split into two parts:
/// - Lower 32 bits: Index into per-object arrays
/// - Upper 32 bits: Generation counter for detecting stale references
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Creates a new object ID from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the index portion of the object ID.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the object ID.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Null/invalid object ID.
    pub const NULL: Self = Self(u64::MAX);

    /// Checks if this object ID is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::NULL
    }
}

/// One pre-allocated object slot.
#[derive(Clone, Copy, Debug)]
pub struct ObjectSlot {
    /// The identifier currently (or last) stored in this slot.
    pub id: ObjectId,
    /// Components attached to the object.
    pub mask: ComponentMask,
    /// Position of the object inside its grouping's object list.
    pub grouping_index: u32,
    /// Whether this slot is currently alive.
    pub alive: bool,
}

impl ObjectSlot {
    /// Creates a dead/empty slot.
    #[inline]
    #[must_use]
    pub const fn dead() -> Self {
        Self {
            id: ObjectId::NULL,
            mask: ComponentMask::EMPTY,
            grouping_index: 0,
            alive: false,
        }
    }
}

impl Default for ObjectSlot {
    fn default() -> Self {
        Self::dead()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_roundtrip() {
        let id = ObjectId::new(12345, 67890);
        assert_eq!(id.index(), 12345);
        assert_eq!(id.generation(), 67890);
        assert!(!id.is_null());
        assert!(ObjectId::default().is_null());
    }
}
