//! # Graphics Archetype Registry
//!
//! Groups renderable objects by the set of override properties they carry.
//!
//! ## Update Order
//!
//! 1. Archetypes discovered last update are committed to the live table
//! 2. Every live archetype rebuilds its object set from the world groupings
//! 3. Groupings no live archetype covered are hashed; unseen hashes create
//!    a new archetype in the pending buffer
//!
//! An object of a brand new property combination therefore becomes
//! renderable on the update after the one that discovered it.

use rustc_hash::{FxHashMap, FxHashSet};

use super::property::{
    PropertyCatalog, PropertyId, DISABLED_COMPONENT, RENDERABLE_COMPONENT,
};
use crate::error::{RenderError, RenderResult};
use tessera_core::{ComponentMask, Filter, ObjectId, World};

/// Alignment of each property array inside a batch.
pub const PROPERTY_ARRAY_ALIGNMENT: u32 = 16;

/// Objects that take part in instanced rendering.
#[must_use]
pub const fn renderable_filter() -> Filter {
    Filter::new()
        .with(RENDERABLE_COMPONENT)
        .without(DISABLED_COMPONENT)
}

/// Position of an object inside its archetype.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectLocation {
    /// Index of the archetype.
    pub archetype: u32,
    /// Index of the object in the archetype's object set.
    pub index: u32,
}

impl ObjectLocation {
    const NONE: Self = Self {
        archetype: u32::MAX,
        index: u32::MAX,
    };
}

/// Byte layout of one archetype inside a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchLayout {
    /// Byte offset of each property array, parallel to the property list.
    pub offsets: Vec<u32>,
    /// Sum of all property sizes.
    pub bytes_per_object: u32,
    /// Objects stored per batch.
    pub max_objects_per_batch: u32,
    /// Bytes used of the batch budget.
    pub layout_bytes: u32,
}

impl BatchLayout {
    /// Computes the structure-of-arrays layout of a property list.
    ///
    /// Property `i` starts at the 16-byte-aligned running sum of
    /// `size * max_objects_per_batch` over properties `0..i`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::OversizedArchetype`] if not even one object fits.
    pub fn compute(sizes: &[u32], batch_byte_budget: u64) -> RenderResult<Self> {
        let bytes_per_object: u32 = sizes.iter().sum();
        let oversized = || RenderError::OversizedArchetype {
            bytes_per_object: u64::from(bytes_per_object),
            budget: batch_byte_budget,
        };
        if bytes_per_object == 0 {
            return Err(oversized());
        }

        let budget = batch_byte_budget.min(u64::from(u32::MAX));
        #[allow(clippy::cast_possible_truncation)]
        let mut max = (budget / u64::from(bytes_per_object)) as u32;

        // Padding between arrays can push the layout over budget.
        while max > 0 {
            let (offsets, layout_bytes) = layout_offsets(sizes, max);
            if u64::from(layout_bytes) <= budget {
                return Ok(Self {
                    offsets,
                    bytes_per_object,
                    max_objects_per_batch: max,
                    layout_bytes,
                });
            }
            max -= 1;
        }
        Err(oversized())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn layout_offsets(sizes: &[u32], max: u32) -> (Vec<u32>, u32) {
    let mut offsets = Vec::with_capacity(sizes.len());
    let mut cursor = 0u64;
    for &size in sizes {
        cursor = align_up(cursor, u64::from(PROPERTY_ARRAY_ALIGNMENT));
        offsets.push(cursor.min(u64::from(u32::MAX)) as u32);
        cursor += u64::from(size) * u64::from(max);
    }
    // Only array starts are aligned; the last array ends unpadded.
    (offsets, cursor.min(u64::from(u32::MAX)) as u32)
}

const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// A set of objects sharing the same GPU layout.
///
/// Immutable once created, apart from its membership and batch list.
#[derive(Clone, Debug)]
pub struct GraphicsArchetype {
    hash: u64,
    override_mask: ComponentMask,
    properties: Vec<PropertyId>,
    layout: BatchLayout,
    /// Source groupings covered this update.
    groupings: Vec<ComponentMask>,
    /// Live object set, in grouping order.
    objects: Vec<ObjectId>,
    /// Owned batch indices; slot `i` holds objects `i * max .. (i + 1) * max`.
    batches: Vec<u32>,
}

impl GraphicsArchetype {
    fn new(catalog: &PropertyCatalog, override_mask: ComponentMask) -> RenderResult<Self> {
        let properties: Vec<PropertyId> = catalog.properties_for_mask(override_mask).collect();
        let sizes: Vec<u32> = properties
            .iter()
            .filter_map(|&id| catalog.get(id))
            .map(|property| property.size)
            .collect();
        let layout = BatchLayout::compute(&sizes, catalog.batch_byte_budget())?;

        Ok(Self {
            hash: catalog.archetype_hash(override_mask),
            override_mask,
            properties,
            layout,
            groupings: Vec::new(),
            objects: Vec::new(),
            batches: Vec::new(),
        })
    }

    /// Returns the archetype hash.
    #[inline]
    #[must_use]
    pub const fn hash(&self) -> u64 {
        self.hash
    }

    /// Returns the override components of the archetype.
    #[inline]
    #[must_use]
    pub const fn override_mask(&self) -> ComponentMask {
        self.override_mask
    }

    /// Returns the ordered property list; the transforms are always 0 and 1.
    #[inline]
    #[must_use]
    pub fn properties(&self) -> &[PropertyId] {
        &self.properties
    }

    /// Returns the batch layout.
    #[inline]
    #[must_use]
    pub const fn layout(&self) -> &BatchLayout {
        &self.layout
    }

    /// Returns the byte offset of a property inside a batch.
    #[must_use]
    pub fn property_offset(&self, property: PropertyId) -> Option<u32> {
        let position = self.properties.iter().position(|&p| p == property)?;
        self.layout.offsets.get(position).copied()
    }

    /// Returns the bytes used of each batch.
    #[inline]
    #[must_use]
    pub const fn layout_bytes(&self) -> u32 {
        self.layout.layout_bytes
    }

    /// Returns the objects stored per batch.
    #[inline]
    #[must_use]
    pub const fn max_objects_per_batch(&self) -> u32 {
        self.layout.max_objects_per_batch
    }

    /// Returns the number of live objects.
    #[inline]
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Returns the live object set.
    #[inline]
    #[must_use]
    pub fn objects(&self) -> &[ObjectId] {
        &self.objects
    }

    /// Returns the source groupings covered by the last update.
    #[inline]
    #[must_use]
    pub fn groupings(&self) -> &[ComponentMask] {
        &self.groupings
    }

    /// Returns `ceil(object_count / max_objects_per_batch)`.
    #[must_use]
    pub fn expected_batches(&self) -> usize {
        self.objects
            .len()
            .div_ceil(self.layout.max_objects_per_batch as usize)
    }

    /// Returns the number of owned batches.
    #[inline]
    #[must_use]
    pub fn actual_batches(&self) -> usize {
        self.batches.len()
    }

    /// Returns the owned batch indices, by slot.
    #[inline]
    #[must_use]
    pub fn batches(&self) -> &[u32] {
        &self.batches
    }

    /// Returns the objects stored in one batch slot.
    #[must_use]
    pub fn batch_objects(&self, slot: usize) -> &[ObjectId] {
        let max = self.layout.max_objects_per_batch as usize;
        let start = (slot * max).min(self.objects.len());
        let end = (start + max).min(self.objects.len());
        &self.objects[start..end]
    }

    pub(crate) fn batches_mut(&mut self) -> &mut Vec<u32> {
        &mut self.batches
    }
}

/// Counters of one registry update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryUpdate {
    /// Archetypes moved from the pending buffer to the live table.
    pub committed: usize,
    /// New archetypes placed in the pending buffer.
    pub discovered: usize,
    /// Renderable objects assigned to a live archetype.
    pub objects: usize,
    /// Groupings waiting for a pending archetype.
    pub uncovered_groupings: usize,
}

/// The table of graphics archetypes.
///
/// # Example
///
/// ```rust,ignore
/// let mut registry = GraphicsArchetypeRegistry::new(catalog);
/// registry.update(&scene.world); // discovers archetypes
/// registry.update(&scene.world); // commits them and fills their object sets
/// ```
#[derive(Debug)]
pub struct GraphicsArchetypeRegistry {
    catalog: PropertyCatalog,
    archetypes: Vec<GraphicsArchetype>,
    by_hash: FxHashMap<u64, u32>,
    pending: Vec<GraphicsArchetype>,
    /// Hashes that failed layout; never retried.
    rejected: FxHashSet<u64>,
    /// Groupings covered by a live archetype during the last update.
    known_groupings: FxHashSet<ComponentMask>,
    /// Location of each object, indexed by object index.
    locations: Vec<ObjectLocation>,
}

impl GraphicsArchetypeRegistry {
    /// Creates an empty registry over a property catalog.
    #[must_use]
    pub fn new(catalog: PropertyCatalog) -> Self {
        Self {
            catalog,
            archetypes: Vec::new(),
            by_hash: FxHashMap::default(),
            pending: Vec::new(),
            rejected: FxHashSet::default(),
            known_groupings: FxHashSet::default(),
            locations: Vec::new(),
        }
    }

    /// Returns the property catalog.
    #[inline]
    #[must_use]
    pub const fn catalog(&self) -> &PropertyCatalog {
        &self.catalog
    }

    /// Returns the live archetypes.
    #[inline]
    #[must_use]
    pub fn archetypes(&self) -> &[GraphicsArchetype] {
        &self.archetypes
    }

    /// Returns one live archetype.
    #[inline]
    #[must_use]
    pub fn archetype(&self, index: u32) -> Option<&GraphicsArchetype> {
        self.archetypes.get(index as usize)
    }

    pub(crate) fn archetypes_mut(&mut self) -> &mut [GraphicsArchetype] {
        &mut self.archetypes
    }

    /// Returns the number of archetypes waiting to be committed.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Finds the live archetype of an override mask.
    #[must_use]
    pub fn find(&self, override_mask: ComponentMask) -> Option<u32> {
        let mask = override_mask.intersection(self.catalog.override_mask());
        self.by_hash.get(&self.catalog.archetype_hash(mask)).copied()
    }

    /// Returns where an object currently lives, if it is renderable.
    #[must_use]
    pub fn location(&self, id: ObjectId) -> Option<ObjectLocation> {
        let location = *self.locations.get(id.index() as usize)?;
        let archetype = self.archetypes.get(location.archetype as usize)?;
        (archetype.objects.get(location.index as usize) == Some(&id)).then_some(location)
    }

    /// Runs one registry update against the world.
    #[tracing::instrument(skip_all, name = "archetype_registry_update")]
    pub fn update(&mut self, world: &World) -> RegistryUpdate {
        let mut report = RegistryUpdate::default();

        // (1) Commit archetypes discovered last update.
        for archetype in self.pending.drain(..) {
            #[allow(clippy::cast_possible_truncation)]
            let index = self.archetypes.len() as u32;
            self.by_hash.insert(archetype.hash, index);
            self.archetypes.push(archetype);
            report.committed += 1;
        }

        // (2) Rebuild every live object set from the world groupings.
        for archetype in &mut self.archetypes {
            archetype.groupings.clear();
            archetype.objects.clear();
        }
        self.known_groupings.clear();
        if self.locations.len() < world.capacity() {
            self.locations.resize(world.capacity(), ObjectLocation::NONE);
        }

        let override_mask = self.catalog.override_mask();
        let mut matching_groupings = 0;
        for grouping in world.groupings_matching(renderable_filter()) {
            matching_groupings += 1;
            let hash = self
                .catalog
                .archetype_hash(grouping.mask.intersection(override_mask));
            let Some(&index) = self.by_hash.get(&hash) else {
                continue;
            };

            let archetype = &mut self.archetypes[index as usize];
            for &id in grouping.objects {
                #[allow(clippy::cast_possible_truncation)]
                let position = archetype.objects.len() as u32;
                self.locations[id.index() as usize] = ObjectLocation {
                    archetype: index,
                    index: position,
                };
                archetype.objects.push(id);
            }
            archetype.groupings.push(grouping.mask);
            self.known_groupings.insert(grouping.mask);
            report.objects += grouping.objects.len();
        }

        // (3) Create archetypes for groupings nothing covered.
        if self.known_groupings.len() < matching_groupings {
            for grouping in world.groupings_matching(renderable_filter()) {
                if self.known_groupings.contains(&grouping.mask) {
                    continue;
                }
                report.uncovered_groupings += 1;
                if self.discover(grouping.mask.intersection(override_mask)) {
                    report.discovered += 1;
                }
            }
        }

        if report.committed > 0 || report.discovered > 0 {
            tracing::debug!(
                committed = report.committed,
                discovered = report.discovered,
                live = self.archetypes.len(),
                "graphics archetypes changed"
            );
        }
        report
    }

    /// Places a new archetype in the pending buffer if its hash is unseen.
    fn discover(&mut self, override_mask: ComponentMask) -> bool {
        let hash = self.catalog.archetype_hash(override_mask);
        if self.by_hash.contains_key(&hash)
            || self.rejected.contains(&hash)
            || self.pending.iter().any(|pending| pending.hash == hash)
        {
            return false;
        }

        match GraphicsArchetype::new(&self.catalog, override_mask) {
            Ok(archetype) => {
                tracing::trace!(
                    hash,
                    max_objects = archetype.max_objects_per_batch(),
                    "graphics archetype discovered"
                );
                self.pending.push(archetype);
                true
            }
            Err(err) => {
                tracing::error!(hash, %err, "graphics archetype rejected");
                self.rejected.insert(hash);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype::PropertyFormat;

    fn catalog() -> PropertyCatalog {
        let mut catalog = PropertyCatalog::new(64 * 1024);
        catalog.register("_BaseColor", 1, PropertyFormat::Float4).unwrap();
        catalog.register("_Custom", 2, PropertyFormat::Float).unwrap();
        catalog
    }

    #[test]
    fn test_layout_offsets_are_aligned_running_sums() {
        // Two matrices of 48 bytes and one float4: 112 bytes per object.
        let layout = BatchLayout::compute(&[48, 48, 16], 64 * 1024).unwrap();
        assert_eq!(layout.bytes_per_object, 112);
        assert_eq!(layout.max_objects_per_batch, 585);
        assert_eq!(layout.offsets, vec![0, 48 * 585, 96 * 585]);
        assert!(layout.layout_bytes <= 64 * 1024);
    }

    #[test]
    fn test_layout_shrinks_for_padding() {
        // 4-byte property arrays of odd length need padding.
        let layout = BatchLayout::compute(&[4, 4, 4], 48).unwrap();
        assert_eq!(layout.max_objects_per_batch, 4);
        assert_eq!(layout.offsets, vec![0, 16, 32]);
        assert_eq!(layout.layout_bytes, 48);

        let padded = BatchLayout::compute(&[12, 4], 64).unwrap();
        // 4 objects would need 48 + 16 = 64 bytes exactly.
        assert_eq!(padded.max_objects_per_batch, 4);
        // 3 objects: 36 bytes padded to 48, then 12 bytes of the last array.
        let tight = BatchLayout::compute(&[12, 4], 63).unwrap();
        assert_eq!(tight.max_objects_per_batch, 3);
        assert_eq!(tight.offsets, vec![0, 48]);
        assert_eq!(tight.layout_bytes, 60);
    }

    #[test]
    fn test_layout_rejects_zero_objects() {
        assert!(matches!(
            BatchLayout::compute(&[48, 48], 64),
            Err(RenderError::OversizedArchetype { .. })
        ));
    }

    #[test]
    fn test_new_archetype_needs_two_updates() {
        let mut world = World::new(16);
        let id = world.spawn(ComponentMask::bit(RENDERABLE_COMPONENT));
        let mut registry = GraphicsArchetypeRegistry::new(catalog());

        let first = registry.update(&world);
        assert_eq!(first.discovered, 1);
        assert_eq!(registry.archetypes().len(), 0);
        assert_eq!(registry.pending_count(), 1);

        let second = registry.update(&world);
        assert_eq!(second.committed, 1);
        assert_eq!(second.objects, 1);
        assert_eq!(registry.archetypes()[0].objects(), &[id]);
        assert_eq!(
            registry.location(id),
            Some(ObjectLocation {
                archetype: 0,
                index: 0
            })
        );
    }

    #[test]
    fn test_disabled_objects_are_skipped() {
        let mut world = World::new(16);
        world.spawn(
            ComponentMask::bit(RENDERABLE_COMPONENT).with(DISABLED_COMPONENT),
        );
        world.spawn(ComponentMask::bit(5));
        let mut registry = GraphicsArchetypeRegistry::new(catalog());
        assert_eq!(registry.update(&world).discovered, 0);
    }

    #[test]
    fn test_groupings_share_an_archetype() {
        // Bit 40 is not an override, so both groupings map to one archetype.
        let mut world = World::new(16);
        let base = ComponentMask::bit(RENDERABLE_COMPONENT).with(1);
        let a = world.spawn(base);
        let b = world.spawn(base.with(40));
        let mut registry = GraphicsArchetypeRegistry::new(catalog());
        registry.update(&world);
        registry.update(&world);

        assert_eq!(registry.archetypes().len(), 1);
        let archetype = &registry.archetypes()[0];
        assert_eq!(archetype.groupings().len(), 2);
        assert_eq!(archetype.objects(), &[a, b]);
        assert_eq!(archetype.properties().len(), 3);
        assert_eq!(registry.find(base), Some(0));
    }

    #[test]
    fn test_object_moves_between_archetypes() {
        let mut world = World::new(16);
        let id = world.spawn(ComponentMask::bit(RENDERABLE_COMPONENT));
        let mut registry = GraphicsArchetypeRegistry::new(catalog());
        registry.update(&world);
        registry.update(&world);

        world.add_component(id, 2);
        registry.update(&world);
        assert_eq!(registry.location(id), None);
        registry.update(&world);

        let location = registry.location(id).unwrap();
        assert_eq!(location.archetype, 1);
        assert_eq!(registry.archetypes()[0].object_count(), 0);
        assert_eq!(registry.archetypes()[0].expected_batches(), 0);
    }

    #[test]
    fn test_batch_objects_slices_by_slot() {
        let mut world = World::new(2000);
        for _ in 0..1000 {
            world.spawn(ComponentMask::bit(RENDERABLE_COMPONENT));
        }
        let mut registry = GraphicsArchetypeRegistry::new(catalog());
        registry.update(&world);
        registry.update(&world);

        let archetype = &registry.archetypes()[0];
        let max = archetype.max_objects_per_batch() as usize;
        assert_eq!(max, 682);
        assert_eq!(archetype.expected_batches(), 2);
        assert_eq!(archetype.batch_objects(0).len(), max);
        assert_eq!(archetype.batch_objects(1).len(), 1000 - max);
        assert!(archetype.batch_objects(2).is_empty());
    }
}
