//! # Property Catalog
//!
//! The declarative list of GPU-resident per-object properties.
//!
//! The two transform properties are implicit and always come first. Every
//! override registered after them gets a component bit: an object carries
//! the override when its component mask has that bit set.

use super::registry::BatchLayout;
use crate::error::{RenderError, RenderResult};
use tessera_core::ComponentMask;

/// Component bit of objects that take part in instanced rendering.
pub const RENDERABLE_COMPONENT: u8 = 0;

/// Component bit that excludes an object from rendering without despawning it.
pub const DISABLED_COMPONENT: u8 = 63;

/// First component bit handed to override properties.
const FIRST_OVERRIDE_COMPONENT: u8 = 1;

/// Largest number of override properties (component bits 1 to 62).
pub const MAX_OVERRIDES: usize = 62;

/// Binding id of the object-to-world matrix.
pub const OBJECT_TO_WORLD_BINDING: u32 = 0xFFFF_FF00;

/// Binding id of the world-to-object matrix.
pub const WORLD_TO_OBJECT_BINDING: u32 = 0xFFFF_FF01;

/// Number of implicit properties at the head of every archetype.
pub const IMPLICIT_PROPERTY_COUNT: usize = 2;

/// Byte format of one property value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropertyFormat {
    /// One `f32`.
    Float,
    /// Two `f32`.
    Float2,
    /// Three `f32`.
    Float3,
    /// Four `f32`.
    Float4,
    /// A 3x4 matrix (four packed columns of three floats).
    Float3x4,
    /// A 4x4 matrix.
    Float4x4,
    /// One `u32`.
    UInt,
    /// Four `u32`.
    UInt4,
}

impl PropertyFormat {
    /// Returns the size of one value in bytes.
    #[inline]
    #[must_use]
    pub const fn size_bytes(self) -> u32 {
        match self {
            Self::Float | Self::UInt => 4,
            Self::Float2 => 8,
            Self::Float3 => 12,
            Self::Float4 | Self::UInt4 => 16,
            Self::Float3x4 => 48,
            Self::Float4x4 => 64,
        }
    }

    /// Returns the alignment of one value in bytes.
    #[inline]
    #[must_use]
    pub const fn alignment(self) -> u32 {
        4
    }
}

/// Index of a property in the [`PropertyCatalog`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId(pub u16);

impl PropertyId {
    /// The object-to-world matrix.
    pub const OBJECT_TO_WORLD: Self = Self(0);
    /// The world-to-object matrix.
    pub const WORLD_TO_OBJECT: Self = Self(1);

    /// Returns the catalog index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One GPU-bound property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchetypeProperty {
    /// Name the property was registered under.
    pub name: String,
    /// External binding id (shader parameter id).
    pub binding_id: u32,
    /// Byte format.
    pub format: PropertyFormat,
    /// Bytes per object.
    pub size: u32,
    /// Alignment in bytes.
    pub alignment: u32,
    /// Stable type hash, FNV-1a of the name.
    pub type_hash: u64,
    /// Component bit that activates the property, None for implicit ones.
    pub component: Option<u8>,
}

/// All GPU-bound properties, registered once at startup.
///
/// # Example
///
/// ```rust,ignore
/// let mut catalog = PropertyCatalog::new(64 * 1024);
/// let color = catalog.register("_BaseColor", 17, PropertyFormat::Float4)?;
/// ```
#[derive(Clone, Debug)]
pub struct PropertyCatalog {
    properties: Vec<ArchetypeProperty>,
    override_mask: ComponentMask,
    batch_byte_budget: u64,
}

impl PropertyCatalog {
    /// Creates a catalog holding the two transform properties.
    ///
    /// `batch_byte_budget` is the per-batch allocation size the catalog is
    /// validated against.
    #[must_use]
    pub fn new(batch_byte_budget: u64) -> Self {
        let implicit = |name: &str, binding_id| ArchetypeProperty {
            name: name.to_string(),
            binding_id,
            format: PropertyFormat::Float3x4,
            size: PropertyFormat::Float3x4.size_bytes(),
            alignment: PropertyFormat::Float3x4.alignment(),
            type_hash: type_hash(name),
            component: None,
        };

        Self {
            properties: vec![
                implicit("unity_ObjectToWorld", OBJECT_TO_WORLD_BINDING),
                implicit("unity_WorldToObject", WORLD_TO_OBJECT_BINDING),
            ],
            override_mask: ComponentMask::EMPTY,
            batch_byte_budget,
        }
    }

    /// Registers an override property.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate name or binding id, when all component bits are
    /// taken, or when an object carrying every registered property would no
    /// longer fit into one batch.
    pub fn register(
        &mut self,
        name: &str,
        binding_id: u32,
        format: PropertyFormat,
    ) -> RenderResult<PropertyId> {
        if self.properties.iter().any(|p| p.name == name) {
            return Err(RenderError::DuplicateProperty(name.to_string()));
        }
        if self.properties.iter().any(|p| p.binding_id == binding_id) {
            return Err(RenderError::DuplicateBinding(binding_id));
        }
        let override_count = self.override_count();
        if override_count >= MAX_OVERRIDES {
            return Err(RenderError::TooManyProperties { max: MAX_OVERRIDES });
        }

        // The archetype carrying every property must still fit one object,
        // array padding included.
        let mut worst_case: Vec<u32> = self.properties.iter().map(|p| p.size).collect();
        worst_case.push(format.size_bytes());
        BatchLayout::compute(&worst_case, self.batch_byte_budget)?;

        #[allow(clippy::cast_possible_truncation)]
        let component = FIRST_OVERRIDE_COMPONENT + override_count as u8;
        #[allow(clippy::cast_possible_truncation)]
        let id = PropertyId(self.properties.len() as u16);
        self.properties.push(ArchetypeProperty {
            name: name.to_string(),
            binding_id,
            format,
            size: format.size_bytes(),
            alignment: format.alignment(),
            type_hash: type_hash(name),
            component: Some(component),
        });
        self.override_mask = self.override_mask.with(component);

        tracing::debug!(name, binding_id, component, "override property registered");
        Ok(id)
    }

    /// Returns the per-batch byte budget.
    #[inline]
    #[must_use]
    pub const fn batch_byte_budget(&self) -> u64 {
        self.batch_byte_budget
    }

    /// Returns every property, implicit ones first.
    #[inline]
    #[must_use]
    pub fn properties(&self) -> &[ArchetypeProperty] {
        &self.properties
    }

    /// Returns one property.
    #[inline]
    #[must_use]
    pub fn get(&self, id: PropertyId) -> Option<&ArchetypeProperty> {
        self.properties.get(id.index())
    }

    /// Returns the number of override properties.
    #[inline]
    #[must_use]
    pub fn override_count(&self) -> usize {
        self.properties.len() - IMPLICIT_PROPERTY_COUNT
    }

    /// Returns the component bits of all overrides.
    #[inline]
    #[must_use]
    pub const fn override_mask(&self) -> ComponentMask {
        self.override_mask
    }

    /// Finds a property by binding id.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn find_binding(&self, binding_id: u32) -> Option<PropertyId> {
        self.properties
            .iter()
            .position(|p| p.binding_id == binding_id)
            .map(|index| PropertyId(index as u16))
    }

    /// Finds the override property activated by a component bit.
    #[must_use]
    pub fn property_for_component(&self, component: u8) -> Option<PropertyId> {
        if !self.override_mask.has(component) {
            return None;
        }
        Some(PropertyId(
            u16::from(component - FIRST_OVERRIDE_COMPONENT) + IMPLICIT_PROPERTY_COUNT as u16,
        ))
    }

    /// Returns the override slot (0-based among overrides) of a property.
    #[must_use]
    pub fn override_slot(&self, id: PropertyId) -> Option<usize> {
        let slot = id.index().checked_sub(IMPLICIT_PROPERTY_COUNT)?;
        (slot < self.override_count()).then_some(slot)
    }

    /// Returns the properties active for an override mask, implicit ones first.
    pub fn properties_for_mask(&self, mask: ComponentMask) -> impl Iterator<Item = PropertyId> + '_ {
        let overrides = mask
            .intersection(self.override_mask)
            .iter()
            .filter_map(|component| self.property_for_component(component));
        [PropertyId::OBJECT_TO_WORLD, PropertyId::WORLD_TO_OBJECT]
            .into_iter()
            .chain(overrides)
    }

    /// Returns the archetype hash for an override mask: the XOR of the type
    /// hashes of every active property.
    #[must_use]
    pub fn archetype_hash(&self, mask: ComponentMask) -> u64 {
        self.properties_for_mask(mask)
            .filter_map(|id| self.get(id))
            .fold(0, |hash, property| hash ^ property.type_hash)
    }
}

/// FNV-1a hash of a property name.
#[must_use]
pub fn type_hash(name: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xCBF2_9CE4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01B3;

    name.bytes().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(PRIME)
    })
}
