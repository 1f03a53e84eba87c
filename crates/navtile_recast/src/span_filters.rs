use crate::{
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    span::{AreaType, Span},
};

const MAX_HEIGHT: i32 = Span::MAX_HEIGHT as i32;

impl Heightfield {
    /// Lets agents step onto low obstacles such as curbs and stair steps.
    ///
    /// A blocked span whose top is at most `walkable_climb` above a walkable span directly
    /// below it takes over that span's area.
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: u16) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut previous: Option<(u16, bool, AreaType)> = None;

                let mut span_key = self.span_key_at(x, z);
                while let Some(key) = span_key {
                    let span = self.span_mut(key);
                    span_key = span.next();
                    let walkable = span.area().is_walkable();

                    if let Some((previous_max, previous_was_walkable, previous_area)) = previous {
                        if !walkable
                            && previous_was_walkable
                            && (span.max() as i32 - previous_max as i32) <= walkable_climb as i32
                        {
                            span.set_area(previous_area);
                        }
                    }

                    // Remember the original state so a stack of obstacles is not climbed one by one.
                    previous = Some((span.max(), walkable, span.area()));
                }
            }
        }
    }

    /// Marks spans that are ledges as not-walkable.
    ///
    /// A ledge is a span with one or more neighbors whose maximum is further away than `walkable_climb`
    /// from the current span's maximum.
    /// This method removes the impact of the overestimation of conservative voxelization
    /// so the resulting mesh will not have regions hanging in the air over ledges.
    pub fn filter_ledge_spans(&mut self, walkable_height: u16, walkable_climb: u16) {
        let walkable_height = walkable_height as i32;
        let walkable_climb = walkable_climb as i32;
        for z in 0..self.height {
            for x in 0..self.width {
                let mut span_key = self.span_key_at(x, z);
                while let Some(key) = span_key {
                    let span = self.span(key);
                    span_key = span.next();
                    // Skip non-walkable spans.
                    if !span.area().is_walkable() {
                        continue;
                    }

                    let floor = span.max() as i32;
                    let ceiling = span
                        .next()
                        .map_or(MAX_HEIGHT, |next| self.span(next).min() as i32);

                    // The difference between this walkable area and the lowest neighbor walkable area.
                    let mut lowest_neighbor_floor_difference = MAX_HEIGHT;
                    // Min and max height of accessible neighbors.
                    let mut lowest_traversable_neighbor_floor = floor;
                    let mut highest_traversable_neighbor_floor = floor;

                    for direction in 0..4 {
                        let neighbor_x = x as i32 + dir_offset_x(direction) as i32;
                        let neighbor_z = z as i32 + dir_offset_z(direction) as i32;
                        // Skip neighbors which are out of bounds.
                        if !self.contains(neighbor_x, neighbor_z) {
                            lowest_neighbor_floor_difference =
                                lowest_neighbor_floor_difference.min(-walkable_climb - floor);
                            continue;
                        }
                        let neighbor_x = neighbor_x as u16;
                        let neighbor_z = neighbor_z as u16;

                        // From minus infinity to the first span.
                        let mut neighbor_key = self.span_key_at(neighbor_x, neighbor_z);
                        let neighbor_floor = -walkable_climb;
                        let neighbor_ceiling =
                            neighbor_key.map_or(MAX_HEIGHT, |key| self.span(key).min() as i32);

                        // Skip neighbor if the gap between the spans is too small.
                        if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor)
                            > walkable_height
                        {
                            lowest_neighbor_floor_difference =
                                lowest_neighbor_floor_difference.min(neighbor_floor - floor);
                        }

                        // Rest of the spans.
                        while let Some(key) = neighbor_key {
                            let neighbor_span = self.span(key);
                            neighbor_key = neighbor_span.next();
                            let neighbor_floor = neighbor_span.max() as i32;
                            let neighbor_ceiling = neighbor_span
                                .next()
                                .map_or(MAX_HEIGHT, |next| self.span(next).min() as i32);

                            // Only consider neighboring areas that have enough overlap to be potentially traversable.
                            if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor)
                                > walkable_height
                            {
                                lowest_neighbor_floor_difference =
                                    lowest_neighbor_floor_difference.min(neighbor_floor - floor);

                                // Find min/max accessible neighbor height.
                                if (neighbor_floor - floor).abs() <= walkable_climb {
                                    lowest_traversable_neighbor_floor =
                                        lowest_traversable_neighbor_floor.min(neighbor_floor);
                                    highest_traversable_neighbor_floor =
                                        highest_traversable_neighbor_floor.max(neighbor_floor);
                                }
                            }
                        }
                    }

                    // The current span is close to a ledge if the magnitude of the drop to any neighbour span
                    // is greater than the walkable_climb distance.
                    // That is, there is a gap that is large enough to let an agent of height walkable_height fall through.
                    let is_ledge = lowest_neighbor_floor_difference < -walkable_climb;
                    // If the difference between all neighbor floors is too large, this is a steep slope.
                    let is_steep = highest_traversable_neighbor_floor
                        - lowest_traversable_neighbor_floor
                        > walkable_climb;
                    if is_ledge || is_steep {
                        self.span_mut(key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }

    /// Marks walkable spans as not walkable if the clearance above the span is less than the specified walkable height.
    ///
    /// For this filter, the clearance above the span is the distance from the span's maximum to the minimum of the next higher span in the same column.
    /// If there is no higher span in the column, the clearance is computed as the distance from the top of the span to the maximum heightfield height.
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: u16) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut span_key = self.span_key_at(x, z);
                while let Some(key) = span_key {
                    let span = self.span(key);
                    span_key = span.next();
                    let floor = span.max() as i32;
                    let ceiling = span
                        .next()
                        .map_or(MAX_HEIGHT, |next| self.span(next).min() as i32);
                    if ceiling - floor < walkable_height as i32 {
                        self.span_mut(key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{Aabb3d, span::SpanKey};

    use super::*;

    fn heightfield(size: f32) -> Heightfield {
        Heightfield::new(
            Aabb3d::from_min_max(Vec3A::ZERO, Vec3A::new(size, 10.0, size)),
            1.0,
            1.0,
        )
        .unwrap()
    }

    fn add(heightfield: &mut Heightfield, x: u16, z: u16, min: u16, max: u16, area: AreaType) {
        heightfield
            .insert_span(x, z, Span::new(min, max, area), 0)
            .unwrap();
    }

    fn top_key(heightfield: &Heightfield, x: u16, z: u16) -> SpanKey {
        heightfield.column(x, z).last().unwrap()
    }

    #[test]
    fn low_hanging_obstacle_becomes_walkable() {
        let mut heightfield = heightfield(1.0);
        add(&mut heightfield, 0, 0, 0, 2, AreaType::DEFAULT_WALKABLE);
        add(&mut heightfield, 0, 0, 3, 4, AreaType::NOT_WALKABLE);
        heightfield.filter_low_hanging_walkable_obstacles(2);
        let top = top_key(&heightfield, 0, 0);
        assert_eq!(heightfield.span(top).area(), AreaType::DEFAULT_WALKABLE);
    }

    #[test]
    fn stacked_obstacles_are_not_all_promoted() {
        let mut heightfield = heightfield(1.0);
        add(&mut heightfield, 0, 0, 0, 2, AreaType::DEFAULT_WALKABLE);
        add(&mut heightfield, 0, 0, 3, 3, AreaType::NOT_WALKABLE);
        add(&mut heightfield, 0, 0, 5, 5, AreaType::NOT_WALKABLE);
        heightfield.filter_low_hanging_walkable_obstacles(3);
        let top = top_key(&heightfield, 0, 0);
        assert_eq!(heightfield.span(top).area(), AreaType::NOT_WALKABLE);
    }

    #[test]
    fn spans_under_low_ceiling_are_unwalkable() {
        let mut heightfield = heightfield(1.0);
        add(&mut heightfield, 0, 0, 0, 1, AreaType::DEFAULT_WALKABLE);
        add(&mut heightfield, 0, 0, 3, 4, AreaType::DEFAULT_WALKABLE);
        heightfield.filter_walkable_low_height_spans(3);
        let bottom = heightfield.span_at(0, 0).unwrap();
        assert_eq!(bottom.area(), AreaType::NOT_WALKABLE);
        let top = top_key(&heightfield, 0, 0);
        assert_eq!(heightfield.span(top).area(), AreaType::DEFAULT_WALKABLE);
    }

    #[test]
    fn border_spans_are_ledges() {
        let mut heightfield = heightfield(3.0);
        for z in 0..3 {
            for x in 0..3 {
                add(&mut heightfield, x, z, 0, 1, AreaType::DEFAULT_WALKABLE);
            }
        }
        heightfield.filter_ledge_spans(2, 1);
        assert_eq!(
            heightfield.span_at(1, 1).unwrap().area(),
            AreaType::DEFAULT_WALKABLE
        );
        assert_eq!(
            heightfield.span_at(0, 1).unwrap().area(),
            AreaType::NOT_WALKABLE
        );
    }
}
