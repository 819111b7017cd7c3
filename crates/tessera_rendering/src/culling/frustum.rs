//! Frustum planes, bounding boxes and 4-wide plane packets.
//!
//! Planes are extracted from a view-projection matrix and packed four at a
//! time into structure-of-arrays lanes, so one packet test classifies a box
//! against four planes at once.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec3, Vec4};

/// A plane in 3D space (Ax + By + Cz + D = 0).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Plane {
    /// Normal X component.
    pub a: f32,
    /// Normal Y component.
    pub b: f32,
    /// Normal Z component.
    pub c: f32,
    /// Distance from origin.
    pub d: f32,
}

impl Plane {
    /// Creates a new plane.
    #[must_use]
    pub const fn new(a: f32, b: f32, c: f32, d: f32) -> Self {
        Self { a, b, c, d }
    }

    /// Creates the plane through `point` facing `normal`.
    #[must_use]
    pub fn from_normal_point(normal: Vec3, point: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self::new(normal.x, normal.y, normal.z, -normal.dot(point))
    }

    /// Creates a plane from `(normal, d)` packed in a vector.
    #[must_use]
    pub fn from_vec4(v: Vec4) -> Self {
        Self::new(v.x, v.y, v.z, v.w)
    }

    /// Normalizes the plane.
    #[must_use]
    pub fn normalized(self) -> Self {
        let len = (self.a * self.a + self.b * self.b + self.c * self.c).sqrt();
        if len > 0.0 {
            Self {
                a: self.a / len,
                b: self.b / len,
                c: self.c / len,
                d: self.d / len,
            }
        } else {
            self
        }
    }

    /// Returns the plane normal.
    #[inline]
    #[must_use]
    pub const fn normal(&self) -> Vec3 {
        Vec3::new(self.a, self.b, self.c)
    }

    /// Returns the signed distance from a point to the plane.
    #[inline]
    #[must_use]
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.a * point.x + self.b * point.y + self.c * point.z + self.d
    }
}

/// View frustum for culling.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Frustum {
    /// Left, right, bottom, top, near, far planes.
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Plane indices.
    pub const LEFT: usize = 0;
    /// Right plane index.
    pub const RIGHT: usize = 1;
    /// Bottom plane index.
    pub const BOTTOM: usize = 2;
    /// Top plane index.
    pub const TOP: usize = 3;
    /// Near plane index.
    pub const NEAR: usize = 4;
    /// Far plane index.
    pub const FAR: usize = 5;

    /// Extracts frustum planes from a view-projection matrix.
    ///
    /// Expects the `[0, 1]` clip depth range of `glam`'s `*_rh`/`*_lh`
    /// projections (the wgpu convention). Plane normals point inwards.
    #[must_use]
    pub fn from_view_projection(m: &Mat4) -> Self {
        let row0 = m.row(0);
        let row1 = m.row(1);
        let row2 = m.row(2);
        let row3 = m.row(3);

        let mut planes = [Plane::default(); 6];
        planes[Self::LEFT] = Plane::from_vec4(row3 + row0).normalized();
        planes[Self::RIGHT] = Plane::from_vec4(row3 - row0).normalized();
        planes[Self::BOTTOM] = Plane::from_vec4(row3 + row1).normalized();
        planes[Self::TOP] = Plane::from_vec4(row3 - row1).normalized();
        planes[Self::NEAR] = Plane::from_vec4(row2).normalized();
        planes[Self::FAR] = Plane::from_vec4(row3 - row2).normalized();

        Self { planes }
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    /// The empty box; the union with it is the identity.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Creates a new AABB.
    #[must_use]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Creates an AABB from its center and half-extents.
    #[must_use]
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// Checks if the box contains no point.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    /// Returns the center of the AABB.
    #[inline]
    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Returns the half-extents of the AABB.
    #[inline]
    #[must_use]
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Returns the smallest box containing both boxes.
    #[inline]
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Returns the box of this box transformed by an affine matrix.
    #[must_use]
    pub fn transformed(&self, m: &Mat4) -> Self {
        if self.is_empty() {
            return *self;
        }
        let abs = Mat3::from_cols(
            m.x_axis.truncate().abs(),
            m.y_axis.truncate().abs(),
            m.z_axis.truncate().abs(),
        );
        Self::from_center_extents(m.transform_point3(self.center()), abs * self.extents())
    }
}

/// Result of classifying a volume against a set of planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntersectResult {
    /// Entirely on the negative side of at least one plane.
    Outside,
    /// Neither outside nor inside.
    Partial,
    /// Entirely on the positive side of every plane.
    Inside,
}

/// Four planes in structure-of-arrays form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanePacket4 {
    /// Normal X of each plane.
    pub nx: Vec4,
    /// Normal Y of each plane.
    pub ny: Vec4,
    /// Normal Z of each plane.
    pub nz: Vec4,
    /// Distance of each plane.
    pub d: Vec4,
}

impl PlanePacket4 {
    /// A plane every point is inside of, used to fill unused lanes.
    const PADDING: Plane = Plane::new(0.0, 0.0, 0.0, 1.0);

    /// Packs up to four planes; missing lanes are padding planes.
    #[must_use]
    pub fn from_planes(planes: &[Plane]) -> Self {
        let lane = |i: usize| planes.get(i).copied().unwrap_or(Self::PADDING);
        let [p0, p1, p2, p3] = [lane(0), lane(1), lane(2), lane(3)];
        Self {
            nx: Vec4::new(p0.a, p1.a, p2.a, p3.a),
            ny: Vec4::new(p0.b, p1.b, p2.b, p3.b),
            nz: Vec4::new(p0.c, p1.c, p2.c, p3.c),
            d: Vec4::new(p0.d, p1.d, p2.d, p3.d),
        }
    }
}

/// Appends the packets of a plane list to `out`.
pub fn build_packets(planes: &[Plane], out: &mut Vec<PlanePacket4>) {
    out.extend(planes.chunks(4).map(PlanePacket4::from_planes));
}

/// Classifies a box (center and half-extents) against packed planes.
///
/// A box is outside if it lies entirely behind any plane, inside if it lies
/// entirely in front of every plane, and partial otherwise. An empty packet
/// list classifies everything as inside.
#[must_use]
pub fn classify_aabb(packets: &[PlanePacket4], center: Vec3, extents: Vec3) -> IntersectResult {
    let cx = Vec4::splat(center.x);
    let cy = Vec4::splat(center.y);
    let cz = Vec4::splat(center.z);
    let ex = Vec4::splat(extents.x);
    let ey = Vec4::splat(extents.y);
    let ez = Vec4::splat(extents.z);

    let mut inside = true;
    for packet in packets {
        let distance = packet.nx * cx + packet.ny * cy + packet.nz * cz + packet.d;
        let radius = packet.nx.abs() * ex + packet.ny.abs() * ey + packet.nz.abs() * ez;

        if (distance + radius).cmplt(Vec4::ZERO).any() {
            return IntersectResult::Outside;
        }
        if (distance - radius).cmplt(Vec4::ZERO).any() {
            inside = false;
        }
    }

    if inside {
        IntersectResult::Inside
    } else {
        IntersectResult::Partial
    }
}

/// Checks if a box is not outside the packed planes.
#[inline]
#[must_use]
pub fn is_visible(packets: &[PlanePacket4], center: Vec3, extents: Vec3) -> bool {
    classify_aabb(packets, center, extents) != IntersectResult::Outside
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Frustum {
        let projection = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        Frustum::from_view_projection(&(projection * view))
    }

    fn packets(frustum: &Frustum) -> Vec<PlanePacket4> {
        let mut out = Vec::new();
        build_packets(&frustum.planes, &mut out);
        out
    }

    #[test]
    fn test_plane_normalization() {
        let plane = Plane::new(3.0, 4.0, 0.0, 10.0);
        let normalized = plane.normalized();

        // 3-4-5 triangle, so length is 5
        assert!((normalized.a - 0.6).abs() < 0.001);
        assert!((normalized.b - 0.8).abs() < 0.001);
        assert!((normalized.d - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_aabb_center_and_extents() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::splat(32.0));
        assert_eq!(aabb.center(), Vec3::splat(16.0));
        assert_eq!(aabb.extents(), Vec3::splat(16.0));
        assert!(!aabb.is_empty());
        assert!(Aabb::EMPTY.is_empty());
        assert_eq!(Aabb::EMPTY.union(&aabb), aabb);
    }

    #[test]
    fn test_aabb_transformed() {
        let unit = Aabb::from_center_extents(Vec3::ZERO, Vec3::ONE);
        let moved = unit.transformed(&Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)));
        assert_eq!(moved.center(), Vec3::new(5.0, 0.0, 0.0));

        let rotated = unit.transformed(&Mat4::from_rotation_z(std::f32::consts::FRAC_PI_4));
        let expected = std::f32::consts::SQRT_2;
        assert!((rotated.extents().x - expected).abs() < 1e-5);
        assert!((rotated.extents().z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_packets_pad_to_four_lanes() {
        let mut out = Vec::new();
        build_packets(&camera().planes, &mut out);
        assert_eq!(out.len(), 2);
        // Lanes 2 and 3 of the second packet are padding.
        assert_eq!(out[1].d.z, 1.0);
        assert_eq!(out[1].nx.w, 0.0);
    }

    #[test]
    fn test_classify_trichotomy() {
        let packets = packets(&camera());

        let ahead = classify_aabb(&packets, Vec3::new(0.0, 0.0, -10.0), Vec3::ONE);
        assert_eq!(ahead, IntersectResult::Inside);

        let behind = classify_aabb(&packets, Vec3::new(0.0, 0.0, 10.0), Vec3::ONE);
        assert_eq!(behind, IntersectResult::Outside);

        // Straddles the far plane.
        let far = classify_aabb(&packets, Vec3::new(0.0, 0.0, -100.0), Vec3::splat(2.0));
        assert_eq!(far, IntersectResult::Partial);
    }

    #[test]
    fn test_empty_packets_are_inside() {
        assert_eq!(
            classify_aabb(&[], Vec3::splat(1000.0), Vec3::ONE),
            IntersectResult::Inside
        );
    }

    #[test]
    fn test_single_plane_is_exact() {
        // x >= 0 half-space.
        let packet = [PlanePacket4::from_planes(&[Plane::new(1.0, 0.0, 0.0, 0.0)])];
        assert_eq!(
            classify_aabb(&packet, Vec3::new(1.0, 0.0, 0.0), Vec3::ONE),
            IntersectResult::Inside
        );
        assert_eq!(
            classify_aabb(&packet, Vec3::new(0.5, 0.0, 0.0), Vec3::ONE),
            IntersectResult::Partial
        );
        assert_eq!(
            classify_aabb(&packet, Vec3::new(-1.5, 0.0, 0.0), Vec3::ONE),
            IntersectResult::Outside
        );
        // Touching from behind is not outside.
        assert!(is_visible(&packet, Vec3::new(-1.0, 0.0, 0.0), Vec3::ONE));
    }
}
