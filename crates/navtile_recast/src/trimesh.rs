//! The triangle soup fed into [`Heightfield`](crate::Heightfield) rasterization.

use glam::{Affine3A, UVec3, Vec3A};

use crate::{
    math::{Aabb3d, TriangleIndices as _},
    span::AreaType,
};

/// Indexed triangles with one [`AreaType`] per triangle.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TriMesh {
    /// Positions.
    pub vertices: Vec<Vec3A>,
    /// One entry per triangle.
    pub indices: Vec<UVec3>,
    /// Parallel to [`TriMesh::indices`].
    pub area_types: Vec<AreaType>,
}

impl TriMesh {
    /// Returns `true` if the mesh holds no triangles.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Appends the triangles of `other`.
    ///
    /// Returns `false` and leaves `self` untouched if the vertices would no longer be addressable by `u32`.
    pub fn extend(&mut self, other: TriMesh) -> bool {
        let total = self.vertices.len() + other.vertices.len();
        let (Ok(offset), Ok(_)) = (u32::try_from(self.vertices.len()), u32::try_from(total)) else {
            return false;
        };
        self.vertices.extend(other.vertices);
        self.indices.extend(other.indices.into_iter().map(|triangle| triangle + offset));
        self.area_types.extend(other.area_types);
        true
    }

    /// Appends a triangle list in the form of raw positions and indices, all with the same area.
    ///
    /// Indices referring to vertices outside of `vertices` are dropped together with their triangle.
    pub fn push_triangles(&mut self, vertices: &[Vec3A], indices: &[u32], area: AreaType) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(vertices);
        let vertex_count = vertices.len() as u32;
        for triangle in indices.chunks_exact(3) {
            if triangle.iter().any(|&i| i >= vertex_count) {
                continue;
            }
            self.indices.push(UVec3::new(
                triangle[0] + base,
                triangle[1] + base,
                triangle[2] + base,
            ));
            self.area_types.push(area);
        }
    }

    /// Bounds of all vertices, `None` without vertices.
    pub fn compute_aabb(&self) -> Option<Aabb3d> {
        Aabb3d::from_verts(&self.vertices)
    }

    /// Transforms every vertex by `transform`.
    pub fn transform(&mut self, transform: &Affine3A) {
        for vertex in &mut self.vertices {
            *vertex = transform.transform_point3a(*vertex);
        }
    }

    /// Classifies triangles by slope.
    ///
    /// Triangles tilted less than `max_slope` radians keep their area, or get
    /// [`AreaType::DEFAULT_WALKABLE`] if they had none. Steeper ones become [`AreaType::NOT_WALKABLE`].
    pub fn mark_walkable_triangles(&mut self, max_slope: f32) {
        let min_up = max_slope.cos();
        for (triangle, area) in self.indices.iter().zip(&mut self.area_types) {
            *area = match triangle.normal(&self.vertices).y > min_up {
                false => AreaType::NOT_WALKABLE,
                true if area.is_walkable() => *area,
                true => AreaType::DEFAULT_WALKABLE,
            };
        }
    }
}
