//! # Object World
//!
//! The central container for all objects and their component masks.
//! Pre-allocates all object slots at creation time.

use std::collections::BTreeMap;

use super::component::ComponentMask;
use super::entity::{ObjectId, ObjectSlot};
use super::filter::Filter;
use crate::error::{CoreError, CoreResult};

/// All objects sharing one component mask.
#[derive(Clone, Copy, Debug)]
pub struct GroupingView<'a> {
    /// The shared component mask.
    pub mask: ComponentMask,
    /// Objects in the grouping, in insertion order (swap-removed on exit).
    pub objects: &'a [ObjectId],
}

/// The object world - ids, component masks and groupings.
///
/// Objects with identical component masks are kept together in a
/// **grouping**. Groupings are iterated in mask order, so every traversal
/// of an unchanged world visits objects in the same order.
///
/// # Capacity
///
/// The world has a fixed capacity set at creation.
///
/// # Example
///
/// ```rust,ignore
/// let mut world = World::new(1_000_000);
///
/// let id = world.spawn(ComponentMask::bit(0));
/// world.add_component(id, 3);
/// ```
#[derive(Clone, Debug)]
pub struct World {
    /// All object slots (pre-allocated).
    slots: Box<[ObjectSlot]>,
    /// Free list of slot indices for reuse.
    free_indices: Vec<u32>,
    /// Number of currently alive objects.
    alive_count: usize,
    /// Objects per component mask.
    groupings: BTreeMap<ComponentMask, Vec<ObjectId>>,
    /// Bumped whenever a grouping appears or disappears.
    grouping_version: u64,
    /// Bumped on every membership change.
    change_version: u64,
}

impl World {
    /// Creates a new world with the specified object capacity.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero or exceeds `u32::MAX`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");
        assert!(
            u32::try_from(capacity).is_ok(),
            "Capacity cannot exceed u32::MAX"
        );

        let slots = vec![ObjectSlot::dead(); capacity].into_boxed_slice();
        #[allow(clippy::cast_possible_truncation)]
        let free_indices: Vec<u32> = (0..capacity as u32).rev().collect();

        Self {
            slots,
            free_indices,
            alive_count: 0,
            groupings: BTreeMap::new(),
            grouping_version: 0,
            change_version: 0,
        }
    }

    /// Returns the maximum capacity of this world.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of currently alive objects.
    #[inline]
    #[must_use]
    pub const fn alive_count(&self) -> usize {
        self.alive_count
    }

    /// Returns the grouping version, bumped when a grouping appears or disappears.
    #[inline]
    #[must_use]
    pub const fn grouping_version(&self) -> u64 {
        self.grouping_version
    }

    /// Returns the change version, bumped on every membership change.
    #[inline]
    #[must_use]
    pub const fn change_version(&self) -> u64 {
        self.change_version
    }

    /// Spawns a new object with the given components.
    ///
    /// # Returns
    ///
    /// The new object's ID, or `ObjectId::NULL` if capacity is reached.
    pub fn spawn(&mut self, mask: ComponentMask) -> ObjectId {
        let Some(index) = self.free_indices.pop() else {
            return ObjectId::NULL;
        };

        let slot = &mut self.slots[index as usize];
        let generation = slot.id.generation().wrapping_add(1);
        let id = ObjectId::new(index, generation);
        *slot = ObjectSlot {
            id,
            mask,
            grouping_index: 0,
            alive: true,
        };

        self.alive_count += 1;
        self.enter_grouping(id, mask);
        id
    }

    /// Spawns a new object, failing if the world is full.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WorldFull`] when no slot is free.
    pub fn try_spawn(&mut self, mask: ComponentMask) -> CoreResult<ObjectId> {
        let id = self.spawn(mask);
        if id.is_null() {
            Err(CoreError::WorldFull {
                capacity: self.capacity(),
            })
        } else {
            Ok(id)
        }
    }

    /// Despawns an object, freeing its slot for reuse.
    ///
    /// # Returns
    ///
    /// `false` if the object was already dead or the ID was stale.
    pub fn despawn(&mut self, id: ObjectId) -> bool {
        if !self.is_alive(id) {
            return false;
        }

        let slot = self.slots[id.index() as usize];
        self.leave_grouping(id, slot.mask, slot.grouping_index);

        let slot = &mut self.slots[id.index() as usize];
        slot.alive = false;
        slot.mask = ComponentMask::EMPTY;
        self.alive_count -= 1;
        self.free_indices.push(id.index());
        true
    }

    /// Checks if an object is alive.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, id: ObjectId) -> bool {
        if id.is_null() {
            return false;
        }
        self.slots
            .get(id.index() as usize)
            .is_some_and(|slot| slot.alive && slot.id.generation() == id.generation())
    }

    /// Returns the component mask of an object.
    #[inline]
    #[must_use]
    pub fn mask(&self, id: ObjectId) -> Option<ComponentMask> {
        if !self.is_alive(id) {
            return None;
        }
        Some(self.slots[id.index() as usize].mask)
    }

    /// Replaces the component mask of an object, moving it to another grouping.
    ///
    /// # Returns
    ///
    /// `false` if the object is dead.
    pub fn set_mask(&mut self, id: ObjectId, mask: ComponentMask) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        let slot = self.slots[id.index() as usize];
        if slot.mask == mask {
            return true;
        }
        self.leave_grouping(id, slot.mask, slot.grouping_index);
        self.slots[id.index() as usize].mask = mask;
        self.enter_grouping(id, mask);
        true
    }

    /// Adds a component bit to an object.
    pub fn add_component(&mut self, id: ObjectId, component: u8) -> bool {
        match self.mask(id) {
            Some(mask) => self.set_mask(id, mask.with(component)),
            None => false,
        }
    }

    /// Removes a component bit from an object.
    pub fn remove_component(&mut self, id: ObjectId, component: u8) -> bool {
        match self.mask(id) {
            Some(mask) => self.set_mask(id, mask.without(component)),
            None => false,
        }
    }

    /// Iterates over every non-empty grouping in mask order.
    pub fn groupings(&self) -> impl Iterator<Item = GroupingView<'_>> {
        self.groupings.iter().map(|(&mask, objects)| GroupingView {
            mask,
            objects: objects.as_slice(),
        })
    }

    /// Iterates over the groupings that pass a filter.
    pub fn groupings_matching(&self, filter: Filter) -> impl Iterator<Item = GroupingView<'_>> {
        self.groupings().filter(move |grouping| filter.matches(grouping.mask))
    }

    /// Iterates over the objects that pass a filter.
    pub fn objects_matching(&self, filter: Filter) -> impl Iterator<Item = ObjectId> + '_ {
        self.groupings_matching(filter)
            .flat_map(|grouping| grouping.objects.iter().copied())
    }

    /// Returns the objects of one grouping.
    #[must_use]
    pub fn grouping(&self, mask: ComponentMask) -> Option<&[ObjectId]> {
        self.groupings.get(&mask).map(Vec::as_slice)
    }

    fn enter_grouping(&mut self, id: ObjectId, mask: ComponentMask) {
        let objects = self.groupings.entry(mask).or_insert_with(|| {
            self.grouping_version += 1;
            Vec::new()
        });
        #[allow(clippy::cast_possible_truncation)]
        let position = objects.len() as u32;
        objects.push(id);
        self.slots[id.index() as usize].grouping_index = position;
        self.change_version += 1;
    }

    fn leave_grouping(&mut self, id: ObjectId, mask: ComponentMask, position: u32) {
        let Some(objects) = self.groupings.get_mut(&mask) else {
            return;
        };
        let position = position as usize;
        debug_assert_eq!(objects.get(position), Some(&id));
        objects.swap_remove(position);
        if let Some(&moved) = objects.get(position) {
            #[allow(clippy::cast_possible_truncation)]
            let position = position as u32;
            self.slots[moved.index() as usize].grouping_index = position;
        }
        if objects.is_empty() {
            self.groupings.remove(&mask);
            self.grouping_version += 1;
        }
        self.change_version += 1;
    }
}
