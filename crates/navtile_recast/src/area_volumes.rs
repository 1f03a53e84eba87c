//! Stamping of area types onto a [`CompactHeightfield`].

use glam::{IVec3, Vec2, Vec3A, Vec3Swizzles as _};

use crate::{Aabb3d, AreaType, CompactHeightfield};

impl CompactHeightfield {
    /// Sets the [`AreaType`] of the walkable spans whose floor lies inside `aabb`.
    pub fn mark_box_area(&mut self, aabb: &Aabb3d, area: AreaType) {
        self.stamp_area(aabb, area, |_| true);
    }

    /// Sets the [`AreaType`] of the walkable spans whose floor lies inside `volume`.
    pub fn mark_convex_poly_area(&mut self, volume: &ConvexVolume) {
        let Some(first) = volume.vertices.first() else {
            return;
        };
        let (min, max) = volume
            .vertices
            .iter()
            .fold((*first, *first), |(min, max), v| (min.min(*v), max.max(*v)));
        let aabb = Aabb3d::from_min_max(
            Vec3A::new(min.x, volume.min_y, min.y),
            Vec3A::new(max.x, volume.max_y, max.y),
        );
        self.stamp_area(&aabb, volume.area, |center| {
            contains_point(&volume.vertices, center)
        });
    }

    /// Sets the [`AreaType`] of the walkable spans whose floor lies inside `cylinder`.
    pub fn mark_cylinder_area(&mut self, cylinder: &AreaCylinder) {
        let extent = Vec3A::new(cylinder.radius, 0.0, cylinder.radius);
        let aabb = Aabb3d::from_min_max(
            cylinder.position - extent,
            cylinder.position + extent + Vec3A::Y * cylinder.height,
        );
        let center = cylinder.position.xz();
        let radius_squared = cylinder.radius * cylinder.radius;
        self.stamp_area(&aabb, cylinder.area, |column| {
            column.distance_squared(center) < radius_squared
        });
    }

    /// Stamps `area` onto walkable spans inside `aabb` whose column center passes `inside`.
    fn stamp_area(&mut self, aabb: &Aabb3d, area: AreaType, inside: impl Fn(Vec2) -> bool) {
        let Some((min, max)) = self.cell_footprint(aabb) else {
            return;
        };
        for z in min.z..=max.z {
            for x in min.x..=max.x {
                let center = Vec2::new(
                    self.aabb.min.x + (x as f32 + 0.5) * self.cell_size,
                    self.aabb.min.z + (z as f32 + 0.5) * self.cell_size,
                );
                if !inside(center) {
                    continue;
                }
                for i in self.cell_at(x as u16, z as u16).index_range() {
                    let floor = self.spans[i].y as i32;
                    if self.areas[i].is_walkable() && (min.y..=max.y).contains(&floor) {
                        self.areas[i] = area;
                    }
                }
            }
        }
    }

    /// The cells and voxel heights covered by `aabb`, clamped to the field on x and z.
    fn cell_footprint(&self, aabb: &Aabb3d) -> Option<(IVec3, IVec3)> {
        let inverse_cell = Vec3A::new(self.cell_size, self.cell_height, self.cell_size).recip();
        let to_cells = |point: Vec3A| {
            let cell = (point - self.aabb.min) * inverse_cell;
            IVec3::new(cell.x as i32, cell.y as i32, cell.z as i32)
        };
        let (min, max) = (to_cells(aabb.min), to_cells(aabb.max));
        let columns = IVec3::new(self.width as i32 - 1, i32::MAX, self.height as i32 - 1);
        if max.x < 0 || max.z < 0 || min.x > columns.x || min.z > columns.z {
            return None;
        }
        let floor = IVec3::new(0, i32::MIN, 0);
        Some((min.max(floor), max.min(columns)))
    }
}

/// Even-odd test on the xz-plane.
fn contains_point(polygon: &[Vec2], point: Vec2) -> bool {
    let mut inside = false;
    let mut previous = polygon[polygon.len() - 1];
    for &current in polygon {
        let crosses = (current.y > point.y) != (previous.y > point.y);
        if crosses {
            let x_at_point = current.x
                + (previous.x - current.x) * (point.y - current.y) / (previous.y - current.y);
            if point.x < x_at_point {
                inside = !inside;
            }
        }
        previous = current;
    }
    inside
}

/// A convex prism that stamps its area onto every walkable span inside it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvexVolume {
    /// Outline on the xz-plane, with `y` standing for world z.
    pub vertices: Vec<Vec2>,
    /// Bottom of the prism.
    pub min_y: f32,
    /// Top of the prism.
    pub max_y: f32,
    /// Area to stamp.
    pub area: AreaType,
}

/// An upright cylinder that stamps its area onto every walkable span inside it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct AreaCylinder {
    /// Center of the bottom cap.
    pub position: Vec3A,
    /// Horizontal reach from the axis.
    pub radius: f32,
    /// Vertical reach above `position`.
    pub height: f32,
    /// Area to stamp.
    pub area: AreaType,
}

#[cfg(test)]
mod tests {
    use glam::UVec3;

    use crate::{Heightfield, TriMesh};

    use super::*;

    fn compact_floor() -> CompactHeightfield {
        let mut heightfield = Heightfield::new(
            Aabb3d::from_min_max(Vec3A::ZERO, Vec3A::new(6.0, 4.0, 6.0)),
            1.0,
            1.0,
        )
        .unwrap();
        let trimesh = TriMesh {
            vertices: vec![
                Vec3A::new(0.0, 1.0, 0.0),
                Vec3A::new(0.0, 1.0, 6.0),
                Vec3A::new(6.0, 1.0, 6.0),
                Vec3A::new(6.0, 1.0, 0.0),
            ],
            indices: vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
            area_types: vec![AreaType::DEFAULT_WALKABLE; 2],
        };
        heightfield.rasterize_triangles(&trimesh, 1).unwrap();
        heightfield.into_compact(2, 1).unwrap()
    }

    fn area_at(compact: &CompactHeightfield, x: u16, z: u16) -> AreaType {
        compact.areas[compact.cell_at(x, z).index() as usize]
    }

    #[test]
    fn box_area_overrides_spans_inside() {
        let mut compact = compact_floor();
        let aabb = Aabb3d::from_min_max(Vec3A::new(1.0, 0.0, 1.0), Vec3A::new(2.9, 3.0, 2.9));
        compact.mark_box_area(&aabb, AreaType(7));
        assert_eq!(area_at(&compact, 1, 1), AreaType(7));
        assert_eq!(area_at(&compact, 2, 2), AreaType(7));
        assert_eq!(area_at(&compact, 3, 3), AreaType::DEFAULT_WALKABLE);
        assert_eq!(area_at(&compact, 0, 0), AreaType::DEFAULT_WALKABLE);
    }

    #[test]
    fn box_area_below_floor_does_nothing() {
        let mut compact = compact_floor();
        let aabb = Aabb3d::from_min_max(Vec3A::new(0.0, -5.0, 0.0), Vec3A::new(6.0, -4.0, 6.0));
        compact.mark_box_area(&aabb, AreaType(7));
        assert!(compact.areas.iter().all(|a| *a == AreaType::DEFAULT_WALKABLE));
    }

    #[test]
    fn convex_volume_marks_cell_centers_inside() {
        let mut compact = compact_floor();
        compact.mark_convex_poly_area(&ConvexVolume {
            vertices: vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(0.0, 3.0),
                Vec2::new(3.0, 0.0),
            ],
            min_y: 0.0,
            max_y: 3.0,
            area: AreaType(3),
        });
        assert_eq!(area_at(&compact, 0, 0), AreaType(3));
        assert_eq!(area_at(&compact, 1, 0), AreaType(3));
        assert_eq!(area_at(&compact, 2, 2), AreaType::DEFAULT_WALKABLE);
    }

    #[test]
    fn cylinder_marks_columns_within_its_radius() {
        let mut compact = compact_floor();
        compact.mark_cylinder_area(&AreaCylinder {
            position: Vec3A::new(3.0, 0.0, 3.0),
            radius: 1.2,
            height: 3.0,
            area: AreaType::NOT_WALKABLE,
        });
        assert_eq!(area_at(&compact, 2, 2), AreaType::NOT_WALKABLE);
        assert_eq!(area_at(&compact, 3, 2), AreaType::NOT_WALKABLE);
        // Corner columns sit farther than the radius from the axis.
        assert_eq!(area_at(&compact, 1, 1), AreaType::DEFAULT_WALKABLE);
        assert_eq!(area_at(&compact, 4, 4), AreaType::DEFAULT_WALKABLE);
        assert_eq!(area_at(&compact, 5, 3), AreaType::DEFAULT_WALKABLE);
    }

    #[test]
    fn cylinder_above_the_floor_does_nothing() {
        let mut compact = compact_floor();
        compact.mark_cylinder_area(&AreaCylinder {
            position: Vec3A::new(3.0, 3.5, 3.0),
            radius: 2.0,
            height: 1.0,
            area: AreaType::NOT_WALKABLE,
        });
        assert!(compact.areas.iter().all(|a| *a == AreaType::DEFAULT_WALKABLE));
    }
}
