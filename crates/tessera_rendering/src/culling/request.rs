//! Culling requests: one view with one to eight splits.

use glam::{Mat4, Vec3};

use super::frustum::{Frustum, Plane};
use crate::error::{RenderError, RenderResult};

/// Largest number of splits in one request.
pub const MAX_SPLITS: usize = 8;

/// What kind of view is being culled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ViewKind {
    /// A camera view.
    #[default]
    Camera,
    /// A shadow-casting light, one split per cascade.
    Light,
    /// A reflection probe view.
    Reflection,
}

/// One split (cascade or sub-view) of a culling request.
#[derive(Clone, Debug, PartialEq)]
pub struct CullingSplit {
    /// Planes of the split, normals pointing inwards.
    pub planes: Vec<Plane>,
    /// Center of the receiver sphere.
    pub sphere_center: Vec3,
    /// Radius of the receiver sphere, `<= 0` when unknown.
    pub sphere_radius: f32,
    /// Fraction of the sphere radius that counts as full coverage.
    pub blend_cull_factor: f32,
}

impl CullingSplit {
    /// Creates a split from a view-projection matrix, without receiver sphere.
    #[must_use]
    pub fn from_view_projection(view_projection: &Mat4) -> Self {
        Self {
            planes: Frustum::from_view_projection(view_projection).planes.to_vec(),
            sphere_center: Vec3::ZERO,
            sphere_radius: 0.0,
            blend_cull_factor: 1.0,
        }
    }

    /// Sets the receiver sphere of the split.
    #[must_use]
    pub fn with_sphere(mut self, center: Vec3, radius: f32, blend_cull_factor: f32) -> Self {
        self.sphere_center = center;
        self.sphere_radius = radius;
        self.blend_cull_factor = blend_cull_factor;
        self
    }
}

/// A request to cull every batch against one view.
///
/// # Example
///
/// ```rust,ignore
/// let request = CullingRequest::camera(projection * view);
/// let output = pipeline.cull(&scene, &request)?;
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct CullingRequest {
    /// Kind of view.
    pub view: ViewKind,
    /// Splits in priority order; split 0 wins ties.
    pub splits: Vec<CullingSplit>,
    /// Planes bounding the shadow receivers, combined with every split.
    pub receiver_planes: Vec<Plane>,
    /// Whether the split spheres stay put from frame to frame.
    pub projection_is_stable: bool,
    /// Direction the light travels, for shadow extrusion.
    pub light_direction: Vec3,
    /// Length a caster's shadow is extruded along the light direction.
    pub shadow_extrusion_distance: f32,
}

impl CullingRequest {
    /// Creates a single-split camera request.
    #[must_use]
    pub fn camera(view_projection: Mat4) -> Self {
        Self {
            view: ViewKind::Camera,
            splits: vec![CullingSplit::from_view_projection(&view_projection)],
            receiver_planes: Vec::new(),
            projection_is_stable: false,
            light_direction: Vec3::ZERO,
            shadow_extrusion_distance: 0.0,
        }
    }

    /// Creates a shadow request with one split per cascade.
    #[must_use]
    pub fn shadow(splits: Vec<CullingSplit>, light_direction: Vec3, extrusion: f32) -> Self {
        Self {
            view: ViewKind::Light,
            splits,
            receiver_planes: Vec::new(),
            projection_is_stable: true,
            light_direction: light_direction.normalize_or_zero(),
            shadow_extrusion_distance: extrusion,
        }
    }

    /// Sets the receiver planes.
    #[must_use]
    pub fn with_receiver_planes(mut self, planes: Vec<Plane>) -> Self {
        self.receiver_planes = planes;
        self
    }

    /// Checks the split count.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidSplitCount`] outside `1..=8`.
    pub fn validate(&self) -> RenderResult<()> {
        if (1..=MAX_SPLITS).contains(&self.splits.len()) {
            Ok(())
        } else {
            Err(RenderError::InvalidSplitCount(self.splits.len()))
        }
    }

    /// Checks if the receiver sphere test applies.
    ///
    /// Only shadow views with a stable projection use it, and a single
    /// degenerate sphere disables it for the whole request.
    #[must_use]
    pub fn sphere_test_enabled(&self) -> bool {
        self.view == ViewKind::Light
            && self.projection_is_stable
            && self.splits.iter().all(|split| split.sphere_radius > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cascade(radius: f32) -> CullingSplit {
        CullingSplit::from_view_projection(&Mat4::orthographic_rh(-10.0, 10.0, -10.0, 10.0, 0.0, 50.0))
            .with_sphere(Vec3::ZERO, radius, 0.9)
    }

    #[test]
    fn test_split_count_validation() {
        let mut request = CullingRequest::camera(Mat4::IDENTITY);
        assert!(request.validate().is_ok());

        request.splits.clear();
        assert_eq!(request.validate(), Err(RenderError::InvalidSplitCount(0)));

        request.splits = vec![cascade(1.0); 9];
        assert_eq!(request.validate(), Err(RenderError::InvalidSplitCount(9)));
    }

    #[test]
    fn test_sphere_test_needs_positive_radii() {
        let request = CullingRequest::shadow(vec![cascade(5.0), cascade(10.0)], Vec3::NEG_Y, 20.0);
        assert!(request.sphere_test_enabled());

        let degenerate = CullingRequest::shadow(vec![cascade(5.0), cascade(0.0)], Vec3::NEG_Y, 20.0);
        assert!(!degenerate.sphere_test_enabled());

        let mut unstable = request.clone();
        unstable.projection_is_stable = false;
        assert!(!unstable.sphere_test_enabled());

        assert!(!CullingRequest::camera(Mat4::IDENTITY).sphere_test_enabled());
    }
}
