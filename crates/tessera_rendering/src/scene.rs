//! The scene the pipeline renders.
//!
//! Bundles the object world with the per-object data the pipeline reads:
//! transforms, bounds, render meshes and property overrides.

use glam::Mat4;

use crate::archetype::{
    PropertyCatalog, PropertyId, DISABLED_COMPONENT, IMPLICIT_PROPERTY_COUNT,
    RENDERABLE_COMPONENT,
};
use crate::culling::Aabb;
use crate::draw::{FilterSettings, FilterTable, RenderMesh};
use crate::error::RenderResult;
use tessera_core::{ByteStash, ComponentMask, ObjectId, Stash, World};

/// Objects and their render data.
///
/// # Example
///
/// ```rust,ignore
/// let mut scene = Scene::new(100_000, &catalog);
/// let id = scene.spawn_renderable(mesh, local_bounds)?;
/// scene.set_transform(id, Mat4::from_translation(position));
/// scene.set_override(id, color, bytemuck::bytes_of(&[1.0f32, 0.0, 0.0, 1.0]));
/// ```
#[derive(Debug)]
pub struct Scene {
    world: World,
    transforms: Stash<Mat4>,
    local_bounds: Stash<Aabb>,
    world_bounds: Stash<Aabb>,
    render_meshes: Stash<RenderMesh>,
    /// Override bytes, indexed by override slot.
    overrides: Vec<ByteStash>,
    /// Component bit of each override slot.
    override_components: Vec<u8>,
    filters: FilterTable,
}

impl Scene {
    /// Creates an empty scene for up to `capacity` objects.
    #[must_use]
    pub fn new(capacity: usize, catalog: &PropertyCatalog) -> Self {
        let overrides = &catalog.properties()[IMPLICIT_PROPERTY_COUNT.min(catalog.properties().len())..];
        Self {
            world: World::new(capacity),
            transforms: Stash::new(capacity),
            local_bounds: Stash::new(capacity),
            world_bounds: Stash::new(capacity),
            render_meshes: Stash::new(capacity),
            overrides: overrides
                .iter()
                .map(|property| ByteStash::new(property.size as usize, capacity))
                .collect(),
            override_components: overrides
                .iter()
                .map(|property| property.component.unwrap_or(DISABLED_COMPONENT))
                .collect(),
            filters: FilterTable::new(),
        }
    }

    /// Returns the object world.
    #[inline]
    #[must_use]
    pub const fn world(&self) -> &World {
        &self.world
    }

    /// Returns the object world mutably, for components of other systems.
    #[inline]
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Returns the object-to-world transforms.
    #[inline]
    #[must_use]
    pub const fn transforms(&self) -> &Stash<Mat4> {
        &self.transforms
    }

    /// Returns the world-space bounds.
    #[inline]
    #[must_use]
    pub const fn world_bounds(&self) -> &Stash<Aabb> {
        &self.world_bounds
    }

    /// Returns the render meshes.
    #[inline]
    #[must_use]
    pub const fn render_meshes(&self) -> &Stash<RenderMesh> {
        &self.render_meshes
    }

    /// Returns the override stashes by override slot.
    #[inline]
    #[must_use]
    pub fn overrides(&self) -> &[ByteStash] {
        &self.overrides
    }

    /// Returns the filter table.
    #[inline]
    #[must_use]
    pub const fn filters(&self) -> &FilterTable {
        &self.filters
    }

    /// Registers filter settings, returning their index for render meshes.
    pub fn register_filter(&mut self, settings: FilterSettings) -> u16 {
        self.filters.register(settings)
    }

    /// Spawns a renderable object at the origin.
    ///
    /// # Errors
    ///
    /// Returns an error if the world is full.
    pub fn spawn_renderable(&mut self, mesh: RenderMesh, local_bounds: Aabb) -> RenderResult<ObjectId> {
        let id = self
            .world
            .try_spawn(ComponentMask::EMPTY.with(RENDERABLE_COMPONENT))?;
        self.transforms.insert(id, Mat4::IDENTITY);
        self.local_bounds.insert(id, local_bounds);
        self.world_bounds.insert(id, local_bounds);
        self.render_meshes.insert(id, mesh);
        Ok(id)
    }

    /// Removes an object and all of its data.
    pub fn despawn(&mut self, id: ObjectId) -> bool {
        if !self.world.despawn(id) {
            return false;
        }
        self.transforms.remove(id);
        self.local_bounds.remove(id);
        self.world_bounds.remove(id);
        self.render_meshes.remove(id);
        for stash in &mut self.overrides {
            stash.remove(id);
        }
        true
    }

    /// Moves an object, refreshing its world-space bounds.
    pub fn set_transform(&mut self, id: ObjectId, transform: Mat4) -> bool {
        let Some(local) = self.local_bounds.get(id).copied() else {
            return false;
        };
        self.transforms.insert(id, transform);
        self.world_bounds.insert(id, local.transformed(&transform));
        true
    }

    /// Replaces an object's render mesh.
    pub fn set_render_mesh(&mut self, id: ObjectId, mesh: RenderMesh) -> bool {
        if !self.world.is_alive(id) {
            return false;
        }
        self.render_meshes.insert(id, mesh);
        true
    }

    /// Gives an object its own value of an override property.
    ///
    /// Adds the property's component, which moves the object to another
    /// archetype. Returns false for unknown properties, dead objects or a
    /// value of the wrong size.
    pub fn set_override(&mut self, id: ObjectId, property: PropertyId, value: &[u8]) -> bool {
        let Some((slot, component)) = self.override_component(property) else {
            return false;
        };
        if !self.world.is_alive(id) || !self.overrides[slot].insert(id, value) {
            return false;
        }
        self.world.add_component(id, component)
    }

    /// Drops an object's override value, reverting to the shared default.
    pub fn clear_override(&mut self, id: ObjectId, property: PropertyId) -> bool {
        let Some((slot, component)) = self.override_component(property) else {
            return false;
        };
        self.overrides[slot].remove(id);
        self.world.remove_component(id, component)
    }

    /// Stops an object from rendering without despawning it.
    pub fn disable(&mut self, id: ObjectId) -> bool {
        self.world.add_component(id, DISABLED_COMPONENT)
    }

    /// Lets a disabled object render again.
    pub fn enable(&mut self, id: ObjectId) -> bool {
        self.world.remove_component(id, DISABLED_COMPONENT)
    }

    fn override_component(&self, property: PropertyId) -> Option<(usize, u8)> {
        let slot = property.index().checked_sub(IMPLICIT_PROPERTY_COUNT)?;
        let component = *self.override_components.get(slot)?;
        Some((slot, component))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype::PropertyFormat;
    use glam::Vec3;

    fn catalog() -> (PropertyCatalog, PropertyId) {
        let mut catalog = PropertyCatalog::new(16 * 1024);
        let color = catalog
            .register("_BaseColor", 7, PropertyFormat::Float4)
            .expect("register");
        (catalog, color)
    }

    #[test]
    fn test_transform_moves_bounds() {
        let (catalog, _) = catalog();
        let mut scene = Scene::new(8, &catalog);
        let id = scene
            .spawn_renderable(RenderMesh::default(), Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0)))
            .expect("spawn");

        assert!(scene.set_transform(id, Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0))));
        let bounds = scene.world_bounds().get(id).copied().expect("bounds");
        assert_eq!(bounds.center(), Vec3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn test_override_toggles_component() {
        let (catalog, color) = catalog();
        let component = catalog.get(color).and_then(|p| p.component).expect("component");
        let mut scene = Scene::new(8, &catalog);
        let id = scene
            .spawn_renderable(RenderMesh::default(), Aabb::default())
            .expect("spawn");

        // Wrong size is rejected.
        assert!(!scene.set_override(id, color, &[0; 4]));
        assert!(scene.set_override(id, color, &[1; 16]));
        assert!(scene.world().mask(id).expect("mask").has(component));
        assert_eq!(scene.overrides()[0].get(id), Some(&[1u8; 16][..]));

        assert!(scene.clear_override(id, color));
        assert!(!scene.world().mask(id).expect("mask").has(component));
        assert!(!scene.set_override(id, PropertyId::OBJECT_TO_WORLD, &[0; 48]));
    }

    #[test]
    fn test_despawn_clears_data() {
        let (catalog, _) = catalog();
        let mut scene = Scene::new(4, &catalog);
        let id = scene
            .spawn_renderable(RenderMesh::default(), Aabb::default())
            .expect("spawn");
        assert!(scene.despawn(id));
        assert!(!scene.despawn(id));
        assert!(scene.transforms().get(id).is_none());
        assert!(!scene.set_transform(id, Mat4::IDENTITY));
    }
}
