//! Conservative voxelization of triangles into a [`Heightfield`].

use glam::Vec3A;
use thiserror::Error;

use crate::{
    heightfield::{Heightfield, SpanInsertionError},
    math::TriangleVertices as _,
    span::{AreaType, Span},
    trimesh::TriMesh,
};

impl Heightfield {
    /// Voxelizes every triangle with its area from [`TriMesh::area_types`].
    ///
    /// Where a new span merges with an existing one whose top is within
    /// `flag_merge_threshold` voxels, the higher area id wins.
    pub fn rasterize_triangles(
        &mut self,
        trimesh: &TriMesh,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        if trimesh.area_types.len() != trimesh.indices.len() {
            return Err(RasterizationError::AreaCountMismatch {
                triangles: trimesh.indices.len(),
                areas: trimesh.area_types.len(),
            });
        }
        let mut buffers = ClipBuffers::default();
        for (triangle, area_type) in trimesh.indices.iter().zip(&trimesh.area_types) {
            let mut vertices = [Vec3A::ZERO; 3];
            for (vertex, index) in vertices.iter_mut().zip(triangle.to_array()) {
                *vertex = *trimesh.vertices.get(index as usize).ok_or(
                    RasterizationError::VertexIndexOutOfBounds {
                        index,
                        len: trimesh.vertices.len(),
                    },
                )?;
            }
            self.rasterize_triangle(vertices, *area_type, flag_merge_threshold, &mut buffers)?;
        }
        Ok(())
    }

    fn rasterize_triangle(
        &mut self,
        triangle: [Vec3A; 3],
        area_type: AreaType,
        flag_merge_threshold: u16,
        buffers: &mut ClipBuffers,
    ) -> Result<(), RasterizationError> {
        let triangle_aabb = triangle.aabb();
        // If the triangle does not touch the bounding box of the heightfield, skip the triangle.
        if !triangle_aabb.intersects(&self.aabb) {
            return Ok(());
        }
        let heightfield_height = self.aabb.max.y - self.aabb.min.y;
        let inverse_cell_size = 1.0 / self.cell_size;
        let inverse_cell_height = 1.0 / self.cell_height;
        let width = self.width as i32;
        let height = self.height as i32;

        // Calculate the footprint of the triangle on the grid's z-axis
        let z0 = ((triangle_aabb.min.z - self.aabb.min.z) * inverse_cell_size) as i32;
        let z1 = ((triangle_aabb.max.z - self.aabb.min.z) * inverse_cell_size) as i32;
        // Use -1 rather than 0 to cut the polygon properly at the start of the tile
        let z0 = z0.clamp(-1, height - 1);
        let z1 = z1.clamp(0, height - 1);

        let ClipBuffers {
            input,
            row,
            cell,
            rest,
        } = buffers;
        input.clear();
        input.extend_from_slice(&triangle);

        for z in z0..=z1 {
            // Clip polygon to row. Store the remaining polygon as well
            let cell_z = self.aabb.min.z + z as f32 * self.cell_size;
            divide_polygon(input, row, rest, cell_z + self.cell_size, Axis::Z);
            std::mem::swap(input, rest);

            if row.len() < 3 || z < 0 {
                continue;
            }

            // Find the horizontal bounds in the row
            let (min_x, max_x) = row
                .iter()
                .fold((f32::MAX, f32::MIN), |(min, max), v| (min.min(v.x), max.max(v.x)));
            let x0 = ((min_x - self.aabb.min.x) * inverse_cell_size) as i32;
            let x1 = ((max_x - self.aabb.min.x) * inverse_cell_size) as i32;
            if x1 < 0 || x0 >= width {
                continue;
            }
            let x0 = x0.clamp(-1, width - 1);
            let x1 = x1.clamp(0, width - 1);

            for x in x0..=x1 {
                // Clip polygon to column. Store the remaining polygon as well
                let cell_x = self.aabb.min.x + x as f32 * self.cell_size;
                divide_polygon(row, cell, rest, cell_x + self.cell_size, Axis::X);
                std::mem::swap(row, rest);

                if cell.len() < 3 || x < 0 {
                    continue;
                }

                // Calculate min and max of the span.
                let (span_min, span_max) = cell
                    .iter()
                    .fold((f32::MAX, f32::MIN), |(min, max), v| (min.min(v.y), max.max(v.y)));
                let span_min = span_min - self.aabb.min.y;
                let span_max = span_max - self.aabb.min.y;

                // Skip the span if it's completely outside the heightfield bounding box
                if span_max < 0.0 || span_min > heightfield_height {
                    continue;
                }
                let span_min = span_min.max(0.0);
                let span_max = span_max.min(heightfield_height);

                // Snap the span extents to the height grid.
                let max_height = Span::MAX_HEIGHT as i32;
                let span_min_cell =
                    ((span_min * inverse_cell_height).floor() as i32).clamp(0, max_height);
                let span_max_cell = ((span_max * inverse_cell_height).ceil() as i32)
                    .clamp(span_min_cell + 1, max_height);

                let span = Span::new(span_min_cell as u16, span_max_cell as u16, area_type);
                self.insert_span(x as u16, z as u16, span, flag_merge_threshold)?;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct ClipBuffers {
    input: Vec<Vec3A>,
    row: Vec<Vec3A>,
    cell: Vec<Vec3A>,
    rest: Vec<Vec3A>,
}

#[derive(Clone, Copy)]
enum Axis {
    X,
    Z,
}

impl Axis {
    #[inline]
    fn of(self, v: Vec3A) -> f32 {
        match self {
            Axis::X => v.x,
            Axis::Z => v.z,
        }
    }
}

/// Divides a convex polygon into two convex polygons on both sides of a line.
/// `below` receives the part at or under `axis_offset`, `above` the rest.
fn divide_polygon(
    polygon: &[Vec3A],
    below: &mut Vec<Vec3A>,
    above: &mut Vec<Vec3A>,
    axis_offset: f32,
    axis: Axis,
) {
    below.clear();
    above.clear();
    if polygon.is_empty() {
        return;
    }
    // How far positive or negative away from the separating axis is each vertex.
    let delta = |v: Vec3A| axis_offset - axis.of(v);

    let mut b = polygon.len() - 1;
    for a in 0..polygon.len() {
        let vertex_a = polygon[a];
        let vertex_b = polygon[b];
        let delta_a = delta(vertex_a);
        let delta_b = delta(vertex_b);
        let same_side = (delta_a >= 0.0) == (delta_b >= 0.0);
        if !same_side {
            let s = delta_b / (delta_b - delta_a);
            let intersection = vertex_b + (vertex_a - vertex_b) * s;
            below.push(intersection);
            above.push(intersection);
            // Add the a point to the right polygon. Do NOT add points that are on the dividing line
            // since these were already added above
            if delta_a > 0.0 {
                below.push(vertex_a);
            } else if delta_a < 0.0 {
                above.push(vertex_a);
            }
        } else {
            // Add the a point to the right polygon. Addition is done even for points on the dividing line
            if delta_a >= 0.0 {
                below.push(vertex_a);
                if delta_a != 0.0 {
                    b = a;
                    continue;
                }
            }
            above.push(vertex_a);
        }
        b = a;
    }
}

/// Errors that can occur when rasterizing triangles into a [`Heightfield`].
#[derive(Error, Debug)]
pub enum RasterizationError {
    /// A span could not be inserted.
    #[error("Failed to insert span: {0}")]
    SpanInsertion(#[from] SpanInsertionError),
    /// A triangle refers to a vertex that does not exist.
    #[error("Vertex index {index} is out of bounds for {len} vertices")]
    VertexIndexOutOfBounds {
        /// The offending index
        index: u32,
        /// The number of vertices in the mesh
        len: usize,
    },
    /// The mesh has a different number of area types than triangles.
    #[error("Expected one area type per triangle, got {areas} area types for {triangles} triangles")]
    AreaCountMismatch {
        /// Number of triangles
        triangles: usize,
        /// Number of area types
        areas: usize,
    },
}

#[cfg(test)]
mod tests {
    use glam::UVec3;

    use crate::Aabb3d;

    use super::*;

    fn heightfield() -> Heightfield {
        Heightfield::new(
            Aabb3d::from_min_max(Vec3A::ZERO, Vec3A::new(4.0, 4.0, 4.0)),
            1.0,
            0.5,
        )
        .unwrap()
    }

    fn floor(y: f32) -> TriMesh {
        TriMesh {
            vertices: vec![
                Vec3A::new(0.0, y, 0.0),
                Vec3A::new(0.0, y, 4.0),
                Vec3A::new(4.0, y, 4.0),
                Vec3A::new(4.0, y, 0.0),
            ],
            indices: vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
            area_types: vec![AreaType::DEFAULT_WALKABLE; 2],
        }
    }

    #[test]
    fn flat_floor_fills_every_column() {
        let mut heightfield = heightfield();
        heightfield.rasterize_triangles(&floor(1.0), 1).unwrap();
        for z in 0..4 {
            for x in 0..4 {
                let span = heightfield.span_at(x, z).unwrap();
                assert_eq!(span.min(), 2, "span at {x},{z}");
                assert_eq!(span.max(), 3, "span at {x},{z}");
                assert_eq!(span.area(), AreaType::DEFAULT_WALKABLE);
                assert_eq!(span.next(), None);
            }
        }
    }

    #[test]
    fn triangle_outside_heightfield_is_ignored() {
        let mut heightfield = heightfield();
        let mut trimesh = floor(1.0);
        for vertex in &mut trimesh.vertices {
            vertex.x += 10.0;
        }
        heightfield.rasterize_triangles(&trimesh, 1).unwrap();
        assert!(heightfield.pool.is_empty());
    }

    #[test]
    fn mismatched_area_count_is_an_error() {
        let mut heightfield = heightfield();
        let mut trimesh = floor(1.0);
        trimesh.area_types.pop();
        assert!(matches!(
            heightfield.rasterize_triangles(&trimesh, 1),
            Err(RasterizationError::AreaCountMismatch { .. })
        ));
    }

    #[test]
    fn divided_polygon_keeps_both_halves() {
        let square = [
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(2.0, 0.0, 0.0),
            Vec3A::new(2.0, 0.0, 2.0),
            Vec3A::new(0.0, 0.0, 2.0),
        ];
        let mut below = Vec::new();
        let mut above = Vec::new();
        divide_polygon(&square, &mut below, &mut above, 1.0, Axis::X);
        assert_eq!(below.len(), 4);
        assert_eq!(above.len(), 4);
        assert!(below.iter().all(|v| v.x <= 1.0));
        assert!(above.iter().all(|v| v.x >= 1.0));
    }
}
