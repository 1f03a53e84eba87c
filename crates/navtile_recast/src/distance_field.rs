use crate::CompactHeightfield;

impl CompactHeightfield {
    /// Builds the distance field used by [`CompactHeightfield::build_regions`].
    ///
    /// Every span gets its chamfer distance to the nearest boundary, i.e. a span that has a
    /// missing neighbor or a neighbor of a different area. The field is then smoothed with a box blur.
    pub fn build_distance_field(&mut self) {
        let (distances, max_distance) = self.calculate_distance_field();
        self.max_distance = max_distance;
        self.dist = self.box_blur(1, &distances);
    }

    fn calculate_distance_field(&self) -> (Vec<u16>, u16) {
        let mut distances = vec![u16::MAX; self.spans.len()];

        // Mark boundary cells.
        for (x, z, span_index) in self.iter_spans() {
            let area = self.areas[span_index];
            let neighbor_count = (0..4)
                .filter_map(|direction| self.neighbor(x, z, span_index, direction))
                .filter(|(_, _, neighbor_index)| self.areas[*neighbor_index] == area)
                .count();
            if neighbor_count != 4 {
                distances[span_index] = 0;
            }
        }

        let relax = |distances: &mut [u16], target: usize, source: usize, cost: u16| {
            let new_distance = distances[source].saturating_add(cost);
            if new_distance < distances[target] {
                distances[target] = new_distance;
            }
        };

        // Pass 1
        for z in 0..self.height {
            for x in 0..self.width {
                for span_index in self.cell_at(x, z).index_range() {
                    if let Some((ax, az, a_index)) = self.neighbor(x, z, span_index, 0) {
                        // (-1,0)
                        relax(&mut distances, span_index, a_index, 2);
                        // (-1,-1)
                        if let Some((_, _, b_index)) = self.neighbor(ax, az, a_index, 3) {
                            relax(&mut distances, span_index, b_index, 3);
                        }
                    }
                    if let Some((ax, az, a_index)) = self.neighbor(x, z, span_index, 3) {
                        // (0,-1)
                        relax(&mut distances, span_index, a_index, 2);
                        // (1,-1)
                        if let Some((_, _, b_index)) = self.neighbor(ax, az, a_index, 2) {
                            relax(&mut distances, span_index, b_index, 3);
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
                        relax(&mut distances, span_index, a_index, 2);
                        // (1,1)
                        if let Some((_, _, b_index)) = self.neighbor(ax, az, a_index, 1) {
                            relax(&mut distances, span_index, b_index, 3);
                        }
                    }
                    if let Some((ax, az, a_index)) = self.neighbor(x, z, span_index, 1) {
                        // (0,1)
                        relax(&mut distances, span_index, a_index, 2);
                        // (-1,1)
                        if let Some((_, _, b_index)) = self.neighbor(ax, az, a_index, 0) {
                            relax(&mut distances, span_index, b_index, 3);
                        }
                    }
                }
            }
        }

        let max_distance = distances.iter().copied().max().unwrap_or(0);
        (distances, max_distance)
    }

    fn box_blur(&self, threshold: u16, distances: &[u16]) -> Vec<u16> {
        let threshold = threshold * 2;
        let mut blurred = vec![0; distances.len()];
        for (x, z, span_index) in self.iter_spans() {
            let center_distance = distances[span_index];
            if center_distance <= threshold {
                blurred[span_index] = center_distance;
                continue;
            }

            let mut sum = center_distance as u32;
            for direction in 0..4 {
                let Some((ax, az, a_index)) = self.neighbor(x, z, span_index, direction) else {
                    sum += center_distance as u32 * 2;
                    continue;
                };
                sum += distances[a_index] as u32;
                let next_direction = (direction + 1) & 0x3;
                match self.neighbor(ax, az, a_index, next_direction) {
                    Some((_, _, b_index)) => sum += distances[b_index] as u32,
                    None => sum += center_distance as u32,
                }
            }
            blurred[span_index] = ((sum + 5) / 9) as u16;
        }
        blurred
    }
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3A};

    use crate::{Aabb3d, AreaType, Heightfield, TriMesh};

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

    #[test]
    fn distance_grows_towards_center() {
        let mut compact = compact_floor(7.0);
        compact.build_distance_field();
        let border = compact.cell_at(0, 3).index() as usize;
        let ring = compact.cell_at(1, 3).index() as usize;
        let center = compact.cell_at(3, 3).index() as usize;
        assert_eq!(compact.dist[border], 0);
        assert!(compact.dist[ring] > 0);
        assert!(compact.dist[center] > compact.dist[ring]);
        assert_eq!(compact.max_distance, 6);
    }

    #[test]
    fn empty_field_has_zero_max_distance() {
        let mut compact = compact_floor(3.0);
        compact.areas.fill(AreaType::NOT_WALKABLE);
        compact.spans.clear();
        compact.areas.clear();
        compact.cells.fill(Default::default());
        compact.build_distance_field();
        assert_eq!(compact.max_distance, 0);
        assert!(compact.dist.is_empty());
    }
}
