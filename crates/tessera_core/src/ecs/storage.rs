//! # Stashes
//!
//! Pre-allocated, dense per-object storage with generation-checked access.
//!
//! The storage uses a dense array strategy:
//! - All slots are pre-allocated at creation
//! - Access is O(1) via object index
//! - Stale ids (wrong generation) never see another object's data

use super::entity::ObjectId;

/// Typed per-object data keyed by [`ObjectId`].
///
/// # Example
///
/// ```rust,ignore
/// let mut transforms: Stash<Mat4> = Stash::new(100_000);
/// transforms.insert(id, Mat4::IDENTITY);
/// ```
#[derive(Clone, Debug)]
pub struct Stash<T> {
    /// Values, indexed by object index.
    data: Box<[Option<T>]>,
    /// Generation of the object that owns each value.
    generations: Box<[u32]>,
    /// Number of occupied slots.
    len: usize,
}

impl<T> Stash<T> {
    /// Creates a stash able to hold data for `capacity` object indices.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: (0..capacity).map(|_| None).collect(),
            generations: vec![0; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Returns the capacity of this stash.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Returns the number of stored values.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Checks if the stash holds no value.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores a value for an object, returning the previous one.
    ///
    /// Ids beyond the capacity are ignored.
    pub fn insert(&mut self, id: ObjectId, value: T) -> Option<T> {
        let index = id.index() as usize;
        let slot = self.data.get_mut(index)?;
        let previous = slot.replace(value);
        if previous.is_none() {
            self.len += 1;
        }
        let same_owner = self.generations[index] == id.generation();
        self.generations[index] = id.generation();
        previous.filter(|_| same_owner)
    }

    /// Removes the value of an object.
    pub fn remove(&mut self, id: ObjectId) -> Option<T> {
        let index = id.index() as usize;
        if self.generations.get(index) != Some(&id.generation()) {
            return None;
        }
        let value = self.data[index].take();
        if value.is_some() {
            self.len -= 1;
        }
        value
    }

    /// Gets the value of an object.
    #[inline]
    #[must_use]
    pub fn get(&self, id: ObjectId) -> Option<&T> {
        let index = id.index() as usize;
        if self.generations.get(index) != Some(&id.generation()) {
            return None;
        }
        self.data[index].as_ref()
    }

    /// Gets the value of an object mutably.
    #[inline]
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut T> {
        let index = id.index() as usize;
        if self.generations.get(index) != Some(&id.generation()) {
            return None;
        }
        self.data[index].as_mut()
    }

    /// Checks if an object has a value.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }
}

/// Untyped per-object data of a fixed byte stride.
///
/// Used for GPU override properties whose layout is only known at
/// registration time.
#[derive(Clone, Debug)]
pub struct ByteStash {
    /// Bytes per object.
    stride: usize,
    /// Packed values, `stride` bytes per object index.
    bytes: Vec<u8>,
    /// Generation of the owner of each value, None when empty.
    owners: Vec<Option<u32>>,
}

impl ByteStash {
    /// Creates a stash with `stride` bytes per object.
    #[must_use]
    pub fn new(stride: usize, capacity: usize) -> Self {
        Self {
            stride,
            bytes: vec![0; stride * capacity],
            owners: vec![None; capacity],
        }
    }

    /// Returns the bytes stored per object.
    #[inline]
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Stores bytes for an object.
    ///
    /// The value is truncated or zero-padded to the stride.
    ///
    /// # Returns
    ///
    /// `false` if the id is beyond the capacity.
    pub fn insert(&mut self, id: ObjectId, value: &[u8]) -> bool {
        let index = id.index() as usize;
        let Some(owner) = self.owners.get_mut(index) else {
            return false;
        };
        *owner = Some(id.generation());

        let start = index * self.stride;
        let dst = &mut self.bytes[start..start + self.stride];
        let copied = value.len().min(self.stride);
        dst[..copied].copy_from_slice(&value[..copied]);
        dst[copied..].fill(0);
        true
    }

    /// Removes the bytes of an object.
    pub fn remove(&mut self, id: ObjectId) -> bool {
        let index = id.index() as usize;
        match self.owners.get_mut(index) {
            Some(owner) if *owner == Some(id.generation()) => {
                *owner = None;
                true
            }
            _ => false,
        }
    }

    /// Gets the bytes of an object.
    #[inline]
    #[must_use]
    pub fn get(&self, id: ObjectId) -> Option<&[u8]> {
        let index = id.index() as usize;
        if self.owners.get(index).copied().flatten() != Some(id.generation()) {
            return None;
        }
        let start = index * self.stride;
        Some(&self.bytes[start..start + self.stride])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stash_get_set() {
        let mut stash: Stash<u32> = Stash::new(100);
        let id = ObjectId::new(50, 1);
        assert!(stash.insert(id, 7).is_none());
        assert_eq!(stash.get(id), Some(&7));
        assert_eq!(stash.insert(id, 8), Some(7));
        assert_eq!(stash.len(), 1);
    }

    #[test]
    fn test_stash_rejects_stale_generation() {
        let mut stash: Stash<u32> = Stash::new(10);
        stash.insert(ObjectId::new(3, 1), 1);
        assert!(stash.get(ObjectId::new(3, 2)).is_none());
        assert!(stash.remove(ObjectId::new(3, 2)).is_none());
        assert_eq!(stash.remove(ObjectId::new(3, 1)), Some(1));
        assert!(stash.is_empty());
    }

    #[test]
    fn test_stash_bounds() {
        let mut stash: Stash<u32> = Stash::new(10);
        assert!(stash.insert(ObjectId::new(10, 0), 1).is_none());
        assert!(stash.is_empty());
    }

    #[test]
    fn test_byte_stash_pads_to_stride() {
        let mut stash = ByteStash::new(8, 4);
        let id = ObjectId::new(2, 0);
        assert!(stash.insert(id, &[1, 2, 3]));
        assert_eq!(stash.get(id), Some(&[1, 2, 3, 0, 0, 0, 0, 0][..]));
        assert!(stash.remove(id));
        assert!(stash.get(id).is_none());
    }
}
