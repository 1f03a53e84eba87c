use crate::{CompactHeightfield, span::AreaType};

impl CompactHeightfield {
    /// Erodes the walkable area by the agent radius.
    ///
    /// Computes a two-pass chamfer distance to the nearest non-walkable span and marks every span
    /// closer than `walkable_radius` cells as [`AreaType::NOT_WALKABLE`].
    pub fn erode_walkable_area(&mut self, walkable_radius: u16) {
        // Blocked spans and walkable spans missing a walkable neighbor start at zero.
        let mut distance: Vec<u8> = self
            .iter_spans()
            .map(|(x, z, span_index)| {
                let enclosed = self.areas[span_index].is_walkable()
                    && (0..4).all(|direction| {
                        self.neighbor(x, z, span_index, direction)
                            .is_some_and(|(_, _, neighbor)| self.areas[neighbor].is_walkable())
                    });
                if enclosed { u8::MAX } else { 0 }
            })
            .collect();

        let relax = |distance: &mut [u8], target: usize, source: usize, cost: u8| {
            let new_distance = distance[source].saturating_add(cost);
            if new_distance < distance[target] {
                distance[target] = new_distance;
            }
        };

        // Pass 1
        for z in 0..self.height {
            for x in 0..self.width {
                for span_index in self.cell_at(x, z).index_range() {
                    if let Some((ax, az, a_index)) = self.neighbor(x, z, span_index, 0) {
                        // (-1,0)
                        relax(&mut distance, span_index, a_index, 2);
                        // (-1,-1)
                        if let Some((_, _, b_index)) = self.neighbor(ax, az, a_index, 3) {
                            relax(&mut distance, span_index, b_index, 3);
                        }
                    }
                    if let Some((ax, az, a_index)) = self.neighbor(x, z, span_index, 3) {
                        // (0,-1)
                        relax(&mut distance, span_index, a_index, 2);
                        // (1,-1)
                        if let Some((_, _, b_index)) = self.neighbor(ax, az, a_index, 2) {
                            relax(&mut distance, span_index, b_index, 3);
                        }
                    }
                }
            }
        }

        // Pass 2
        for z in (0..self.height).rev() {
            for x in (0..self.width).rev() {
                for span_index in self.cell_at(x, z).index_range() {
                    if let Some((ax, az, a_index)) = self.neighbor(x, z, span_index, 2) {
                        // (1,0)
                        relax(&mut distance, span_index, a_index, 2);
                        // (1,1)
                        if let Some((_, _, b_index)) = self.neighbor(ax, az, a_index, 1) {
                            relax(&mut distance, span_index, b_index, 3);
                        }
                    }
                    if let Some((ax, az, a_index)) = self.neighbor(x, z, span_index, 1) {
                        // (0,1)
                        relax(&mut distance, span_index, a_index, 2);
                        // (-1,1)
                        if let Some((_, _, b_index)) = self.neighbor(ax, az, a_index, 0) {
                            relax(&mut distance, span_index, b_index, 3);
                        }
                    }
                }
            }
        }

        let min_boundary_distance = (walkable_radius * 2).min(u8::MAX as u16) as u8;
        for (area, distance) in self.areas.iter_mut().zip(&distance) {
            if *distance < min_boundary_distance {
                *area = AreaType::NOT_WALKABLE;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        Aabb3d, Heightfield, TriMesh,
        span::AreaType,
    };
    use glam::UVec3;

    fn compact_floor(size: f32) -> crate::CompactHeightfield {
        let mut heightfield = Heightfield::new(
            Aabb3d::from_min_max(Vec3A::ZERO, Vec3A::new(size, 4.0, size)),
            1.0,
            1.0,
        )
        .unwrap();
        let trimesh = TriMesh {
            vertices: vec![
                Vec3A::new(0.0, 1.0, 0.0),
                Vec3A::new(0.0, 1.0, size),
                Vec3A::new(size, 1.0, size),
                Vec3A::new(size, 1.0, 0.0),
            ],
            indices: vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
            area_types: vec![AreaType::DEFAULT_WALKABLE; 2],
        };
        heightfield.rasterize_triangles(&trimesh, 1).unwrap();
        heightfield.into_compact(2, 1).unwrap()
    }

    fn walkable_count(compact: &crate::CompactHeightfield) -> usize {
        compact.areas.iter().filter(|area| area.is_walkable()).count()
    }

    #[test]
    fn zero_radius_keeps_everything() {
        let mut compact = compact_floor(5.0);
        compact.erode_walkable_area(0);
        assert_eq!(walkable_count(&compact), 25);
    }

    #[test]
    fn radius_one_removes_outer_ring() {
        let mut compact = compact_floor(5.0);
        compact.erode_walkable_area(1);
        assert_eq!(walkable_count(&compact), 9);
        let center = compact.cell_at(2, 2).index() as usize;
        assert!(compact.areas[center].is_walkable());
        let edge = compact.cell_at(0, 2).index() as usize;
        assert!(!compact.areas[edge].is_walkable());
    }

    #[test]
    fn radius_two_leaves_only_the_center() {
        let mut compact = compact_floor(5.0);
        compact.erode_walkable_area(2);
        assert_eq!(walkable_count(&compact), 1);
    }
}
