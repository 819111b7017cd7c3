//! # Graphics Archetypes
//!
//! Renderable objects grouped by the GPU-bound properties they carry.
//!
//! ## Design Philosophy
//!
//! - Properties are registered once at startup in a [`PropertyCatalog`]
//! - Each distinct set of active overrides is one [`GraphicsArchetype`]
//!   with a fixed structure-of-arrays batch layout
//! - Archetypes are created lazily and never destroyed; an empty archetype
//!   simply owns no batches

mod property;
mod registry;

pub use property::{
    type_hash, ArchetypeProperty, PropertyCatalog, PropertyFormat, PropertyId,
    DISABLED_COMPONENT, IMPLICIT_PROPERTY_COUNT, MAX_OVERRIDES, OBJECT_TO_WORLD_BINDING,
    RENDERABLE_COMPONENT, WORLD_TO_OBJECT_BINDING,
};
pub use registry::{
    renderable_filter, BatchLayout, GraphicsArchetype, GraphicsArchetypeRegistry,
    ObjectLocation, RegistryUpdate, PROPERTY_ARRAY_ALIGNMENT,
};
