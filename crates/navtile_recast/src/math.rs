//! Geometry helpers shared by the build stages.

use glam::{UVec3, Vec2, Vec3A};

/// An axis-aligned bounding box in 3D space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb3d {
    /// The minimum corner
    pub min: Vec3A,
    /// The maximum corner
    pub max: Vec3A,
}

impl Aabb3d {
    /// Creates a new AABB from a center and half extents.
    #[inline]
    pub fn new(center: impl Into<Vec3A>, half_size: impl Into<Vec3A>) -> Self {
        let center = center.into();
        let half_size = half_size.into();
        Self {
            min: center - half_size,
            max: center + half_size,
        }
    }

    /// Creates a new AABB from two corners.
    #[inline]
    pub fn from_min_max(min: impl Into<Vec3A>, max: impl Into<Vec3A>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    /// An AABB that contains nothing. Merging any point into it yields that point.
    pub const EMPTY: Self = Self {
        min: Vec3A::splat(f32::MAX),
        max: Vec3A::splat(f32::MIN),
    };

    /// Returns `true` if min is not above max on any axis.
    #[inline]
    pub fn is_defined(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    /// Computes the AABB of a set of vertices. `None` for an empty set.
    pub fn from_verts(vertices: &[Vec3A]) -> Option<Self> {
        let (first, rest) = vertices.split_first()?;
        let mut aabb = Self {
            min: *first,
            max: *first,
        };
        for vertex in rest {
            aabb.merge_point(*vertex);
        }
        Some(aabb)
    }

    /// Returns the smallest AABB containing both.
    #[inline]
    pub fn union(&self, other: &Aabb3d) -> Aabb3d {
        let mut aabb = *self;
        aabb.merge(other);
        aabb
    }

    /// Grows the AABB to contain the point.
    #[inline]
    pub fn merge_point(&mut self, point: Vec3A) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Grows the AABB to contain the other AABB.
    #[inline]
    pub fn merge(&mut self, other: &Aabb3d) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Returns `true` if the AABBs overlap, touching counts.
    #[inline]
    pub fn intersects(&self, other: &Aabb3d) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Returns `true` if the point is inside or on the boundary.
    #[inline]
    pub fn contains_point(&self, point: Vec3A) -> bool {
        self.min.cmple(point).all() && self.max.cmpge(point).all()
    }

    /// The center of the AABB.
    #[inline]
    pub fn center(&self) -> Vec3A {
        (self.min + self.max) * 0.5
    }

    /// The size of the AABB along each axis.
    #[inline]
    pub fn size(&self) -> Vec3A {
        self.max - self.min
    }
}

/// An axis-aligned bounding box on the xz-plane.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb2d {
    /// The minimum corner
    pub min: Vec2,
    /// The maximum corner
    pub max: Vec2,
}

impl Aabb2d {
    /// Returns `true` if the point is inside or on the boundary.
    #[inline]
    pub fn contains_point(&self, point: Vec2) -> bool {
        self.min.cmple(point).all() && self.max.cmpge(point).all()
    }
}

pub(crate) trait TriangleIndices {
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A;
}

impl TriangleIndices for UVec3 {
    #[inline]
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A {
        let [a, b, c] = self.to_array().map(|index| vertices[index as usize]);
        (b - a).cross(c - a).normalize_or_zero()
    }
}

pub(crate) trait TriangleVertices {
    fn aabb(&self) -> Aabb3d;
}

impl TriangleVertices for [Vec3A; 3] {
    #[inline]
    fn aabb(&self) -> Aabb3d {
        let [a, b, c] = *self;
        Aabb3d {
            min: a.min(b).min(c),
            max: a.max(b).max(c),
        }
    }
}

/// Cell steps of the four grid directions: -x, +z, +x, -z.
const DIRECTION_STEPS: [(i8, i8); 4] = [(-1, 0), (0, 1), (1, 0), (0, -1)];

/// Step along x for a grid direction. Only the low two bits of `direction` count.
#[inline]
pub(crate) fn dir_offset_x(direction: u8) -> i8 {
    DIRECTION_STEPS[(direction & 3) as usize].0
}

/// Step along z for a grid direction.
#[inline]
pub(crate) fn dir_offset_z(direction: u8) -> i8 {
    DIRECTION_STEPS[(direction & 3) as usize].1
}

/// Twice the signed area of the triangle on the xz-plane.
/// Negative when `c` lies to the left of `a -> b`.
#[inline]
pub(crate) fn area2(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> i32 {
    (b[0] - a[0]) * (c[1] - a[1]) - (c[0] - a[0]) * (b[1] - a[1])
}

#[inline]
pub(crate) fn left(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> bool {
    area2(a, b, c) < 0
}

#[inline]
pub(crate) fn left_on(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
pub(crate) fn collinear(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> bool {
    area2(a, b, c) == 0
}

/// Returns true iff `ab` and `cd` are improperly intersecting.
pub(crate) fn intersect_prop(a: [i32; 2], b: [i32; 2], c: [i32; 2], d: [i32; 2]) -> bool {
    // Eliminate improper cases.
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// Returns true iff `c` lies on the closed segment `ab`.
fn between(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a[0] != b[0] {
        (a[0] <= c[0] && c[0] <= b[0]) || (a[0] >= c[0] && c[0] >= b[0])
    } else {
        (a[1] <= c[1] && c[1] <= b[1]) || (a[1] >= c[1] && c[1] >= b[1])
    }
}

/// Returns true iff segments `ab` and `cd` intersect, properly or improperly.
pub(crate) fn intersect(a: [i32; 2], b: [i32; 2], c: [i32; 2], d: [i32; 2]) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

/// Squared distance from `pt` to the segment `p -> q` on the xz-plane.
#[inline]
pub(crate) fn distance_squared_point_segment_2d(pt: Vec3A, p: Vec3A, q: Vec3A) -> f32 {
    let pqx = q.x - p.x;
    let pqz = q.z - p.z;
    let dx = pt.x - p.x;
    let dz = pt.z - p.z;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = p.x + t * pqx - pt.x;
    let dz = p.z + t * pqz - pt.z;
    dx * dx + dz * dz
}

/// Squared distance from `pt` to the segment `p -> q` in 3D.
#[inline]
pub(crate) fn distance_squared_point_segment(pt: Vec3A, p: Vec3A, q: Vec3A) -> f32 {
    let pq = q - p;
    let d = pq.length_squared();
    let mut t = pq.dot(pt - p);
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    (p + pq * t - pt).length_squared()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_offsets_walk_around_a_cell() {
        let mut x = 0;
        let mut z = 0;
        for dir in 0..4 {
            x += dir_offset_x(dir) as i32;
            z += dir_offset_z(dir) as i32;
        }
        assert_eq!((x, z), (0, 0));
        assert_eq!((dir_offset_x(0), dir_offset_z(0)), (-1, 0));
        assert_eq!((dir_offset_x(1), dir_offset_z(1)), (0, 1));
    }

    #[test]
    fn segments_cross() {
        assert!(intersect([0, 0], [4, 4], [0, 4], [4, 0]));
        assert!(!intersect([0, 0], [1, 0], [0, 2], [1, 2]));
        // Touching at an endpoint counts.
        assert!(intersect([0, 0], [2, 0], [2, 0], [2, 2]));
    }

    #[test]
    fn empty_aabb_grows_to_point() {
        let mut aabb = Aabb3d::EMPTY;
        assert!(!aabb.is_defined());
        aabb.merge_point(Vec3A::new(1.0, 2.0, 3.0));
        assert!(aabb.is_defined());
        assert_eq!(aabb.min, aabb.max);
    }

    #[test]
    fn point_segment_distance() {
        let d = distance_squared_point_segment_2d(
            Vec3A::new(1.0, 5.0, 1.0),
            Vec3A::ZERO,
            Vec3A::new(2.0, 0.0, 0.0),
        );
        assert_eq!(d, 1.0);
    }
}
