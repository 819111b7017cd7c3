//! Culling setup: plane packets and receiver spheres per split.

use std::ops::Range;

use glam::Vec3;

use super::frustum::{build_packets, Aabb, Plane, PlanePacket4};
use super::request::{CullingRequest, ViewKind};
use crate::error::RenderResult;

/// Per-split data shared by every culling job of one request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CullingSplitData {
    /// Center of the receiver sphere.
    pub sphere_center: Vec3,
    /// Radius of the receiver sphere.
    pub sphere_radius: f32,
    /// Fraction of the radius that counts as full coverage.
    pub blend_cull_factor: f32,
    /// Packets of the split's own planes.
    pub planes: Range<u32>,
    /// Packets of the split planes followed by the receiver planes.
    pub combined: Range<u32>,
}

/// Everything the per-batch tests need, built once per request.
#[derive(Clone, Debug, Default)]
pub struct CullingSetup {
    packets: Vec<PlanePacket4>,
    splits: Vec<CullingSplitData>,
    has_receivers: bool,
    sphere_test: bool,
    view: ViewKind,
    extrusion: Vec3,
}

impl CullingSetup {
    /// Creates an empty setup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the setup for a request, reusing storage.
    ///
    /// # Errors
    ///
    /// Fails if the request has no splits or more than eight.
    pub fn build(&mut self, request: &CullingRequest) -> RenderResult<()> {
        request.validate()?;

        self.packets.clear();
        self.splits.clear();
        self.has_receivers = !request.receiver_planes.is_empty();
        self.sphere_test = request.sphere_test_enabled();
        self.view = request.view;
        self.extrusion = if request.view == ViewKind::Light {
            request.light_direction * request.shadow_extrusion_distance.max(0.0)
        } else {
            Vec3::ZERO
        };

        let mut combined_planes = Vec::new();
        for split in &request.splits {
            let planes = self.push_packets(&split.planes);
            let combined = if self.has_receivers {
                combined_planes.clear();
                combined_planes.extend_from_slice(&split.planes);
                combined_planes.extend_from_slice(&request.receiver_planes);
                self.push_packets(&combined_planes)
            } else {
                planes.clone()
            };
            self.splits.push(CullingSplitData {
                sphere_center: split.sphere_center,
                sphere_radius: split.sphere_radius,
                blend_cull_factor: split.blend_cull_factor,
                planes,
                combined,
            });
        }

        tracing::trace!(
            splits = self.splits.len(),
            packets = self.packets.len(),
            sphere_test = self.sphere_test,
            "culling setup built"
        );
        Ok(())
    }

    fn push_packets(&mut self, planes: &[Plane]) -> Range<u32> {
        #[allow(clippy::cast_possible_truncation)]
        let start = self.packets.len() as u32;
        build_packets(planes, &mut self.packets);
        #[allow(clippy::cast_possible_truncation)]
        let end = self.packets.len() as u32;
        start..end
    }

    /// Returns the number of splits.
    #[inline]
    #[must_use]
    pub fn split_count(&self) -> usize {
        self.splits.len()
    }

    /// Returns the per-split data.
    #[inline]
    #[must_use]
    pub fn splits(&self) -> &[CullingSplitData] {
        &self.splits
    }

    /// Returns the kind of view being culled.
    #[inline]
    #[must_use]
    pub const fn view(&self) -> ViewKind {
        self.view
    }

    /// Checks if the receiver sphere refinement runs.
    #[inline]
    #[must_use]
    pub const fn sphere_test(&self) -> bool {
        self.sphere_test
    }

    /// Returns the packets a split is tested against.
    ///
    /// With receiver planes present this is the combined set.
    #[must_use]
    pub fn packets(&self, split: usize) -> &[PlanePacket4] {
        let Some(data) = self.splits.get(split) else {
            return &[];
        };
        let range = if self.has_receivers {
            &data.combined
        } else {
            &data.planes
        };
        &self.packets[range.start as usize..range.end as usize]
    }

    /// Returns the center and half-extents to test for a box.
    ///
    /// Light views test the shadow volume: the box swept along the light
    /// direction by the extrusion distance.
    #[must_use]
    pub fn tested_box(&self, aabb: &Aabb) -> (Vec3, Vec3) {
        if self.extrusion == Vec3::ZERO {
            return (aabb.center(), aabb.extents());
        }
        let swept = aabb.union(&Aabb::new(aabb.min + self.extrusion, aabb.max + self.extrusion));
        (swept.center(), swept.extents())
    }

    /// Narrows a split mask with the receiver spheres.
    ///
    /// The shadow volume of the box is a capsule from its center along the
    /// extrusion. A split keeps its bit if the capsule touches its sphere.
    /// Once a split's sphere fully contains the capsule, every later split
    /// is cleared.
    #[must_use]
    pub fn refine_with_spheres(&self, aabb: &Aabb, mask: u8) -> u8 {
        let radius = aabb.extents().length();
        let start = aabb.center();
        let end = start + self.extrusion;

        let mut refined = 0;
        for (index, split) in self.splits.iter().enumerate() {
            if mask & (1 << index) == 0 {
                continue;
            }
            if segment_distance(split.sphere_center, start, end) > split.sphere_radius + radius {
                continue;
            }
            refined |= 1 << index;

            let farthest = (start - split.sphere_center)
                .length()
                .max((end - split.sphere_center).length());
            if farthest + radius <= split.sphere_radius * split.blend_cull_factor {
                break;
            }
        }
        refined
    }
}

/// Distance from a point to the segment `a..b`.
fn segment_distance(point: Vec3, a: Vec3, b: Vec3) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f32::EPSILON {
        return point.distance(a);
    }
    let t = ((point - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    point.distance(a + ab * t)
}
