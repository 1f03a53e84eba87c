//! Region ids and the merge and filter pass shared by all partitioning methods.

use thiserror::Error;

use crate::{AreaType, CompactHeightfield};

bitflags::bitflags! {
    /// A region in a [`CompactHeightfield`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    #[repr(transparent)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct RegionId: u16 {
        /// Not part of any region.
        const NONE = 0;
        /// Heightfield border flag.
        /// If a heightfield region ID has this bit set, then the region is a border region
        /// and its spans are considered un-walkable.
        const BORDER_REGION = 0x8000;
        const _ = !0;
    }
}

impl From<u16> for RegionId {
    #[inline]
    fn from(value: u16) -> Self {
        Self::from_bits_retain(value)
    }
}

impl RegionId {
    /// The region id without the [`RegionId::BORDER_REGION`] flag.
    #[inline]
    pub fn id(self) -> u16 {
        self.bits() & !Self::BORDER_REGION.bits()
    }

    /// Returns `true` if this is a border region.
    #[inline]
    pub fn is_border(self) -> bool {
        self.intersects(Self::BORDER_REGION)
    }

    /// Returns `true` if the region is a proper walkable region, i.e. neither [`RegionId::NONE`] nor a border region.
    #[inline]
    pub fn is_walkable_region(self) -> bool {
        self != Self::NONE && !self.is_border()
    }
}

/// Errors that can occur while partitioning a [`CompactHeightfield`] into regions.
#[derive(Error, Debug)]
pub enum RegionError {
    /// More regions were generated than a [`RegionId`] can address.
    #[error("Region ID overflow: more than {max} regions", max = RegionId::BORDER_REGION.bits() - 1)]
    RegionIdOverflow,
}

#[derive(Debug, Clone, Default)]
struct Region {
    span_count: usize,
    id: RegionId,
    area_type: AreaType,
    remap: bool,
    visited: bool,
    overlap: bool,
    connections: Vec<RegionId>,
    floors: Vec<RegionId>,
}

impl Region {
    fn new(id: u16) -> Self {
        Self {
            id: RegionId::from(id),
            ..Default::default()
        }
    }

    fn add_unique_floor(&mut self, floor: RegionId) {
        if !self.floors.contains(&floor) {
            self.floors.push(floor);
        }
    }

    fn remove_adjacent_neighbors(&mut self) {
        remove_adjacent_duplicates(&mut self.connections);
    }

    fn replace_neighbor(&mut self, old_id: RegionId, new_id: RegionId) {
        let mut neighbor_changed = false;
        for connection in &mut self.connections {
            if *connection == old_id {
                *connection = new_id;
                neighbor_changed = true;
            }
        }
        for floor in &mut self.floors {
            if *floor == old_id {
                *floor = new_id;
            }
        }
        if neighbor_changed {
            self.remove_adjacent_neighbors();
        }
    }

    fn can_merge_with(&self, other: &Region) -> bool {
        if self.area_type != other.area_type {
            return false;
        }
        let shared_edges = self
            .connections
            .iter()
            .filter(|connection| **connection == other.id)
            .count();
        if shared_edges > 1 {
            return false;
        }
        !self.floors.contains(&other.id)
    }

    fn is_connected_to_border(&self) -> bool {
        // Null connections are solid edges towards nothing.
        self.connections.contains(&RegionId::NONE)
    }
}

/// Removes consecutive duplicates, treating the list as circular.
fn remove_adjacent_duplicates(list: &mut Vec<RegionId>) {
    let mut i = 0;
    while i < list.len() && list.len() > 1 {
        let next = (i + 1) % list.len();
        if list[i] == list[next] {
            list.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Merges region `source` into region `target`. Returns `false` if they do not share an edge.
fn merge_regions(regions: &mut [Region], target: usize, source: usize) -> bool {
    let target_id = regions[target].id;
    let source_id = regions[source].id;

    // Duplicate current neighbourhood.
    let target_connections = regions[target].connections.clone();
    let source_connections = regions[source].connections.clone();

    // Find insertion point on target.
    let Some(insert_target) = target_connections.iter().position(|c| *c == source_id) else {
        return false;
    };
    // Find insertion point on source.
    let Some(insert_source) = source_connections.iter().position(|c| *c == target_id) else {
        return false;
    };

    // Merge neighbours.
    let mut connections = Vec::with_capacity(target_connections.len() + source_connections.len());
    let target_len = target_connections.len();
    for i in 0..target_len - 1 {
        connections.push(target_connections[(insert_target + 1 + i) % target_len]);
    }
    let source_len = source_connections.len();
    for i in 0..source_len - 1 {
        connections.push(source_connections[(insert_source + 1 + i) % source_len]);
    }

    let source_floors = std::mem::take(&mut regions[source].floors);
    let source_span_count = regions[source].span_count;
    regions[source].span_count = 0;
    regions[source].connections.clear();

    let target_region = &mut regions[target];
    target_region.connections = connections;
    target_region.remove_adjacent_neighbors();
    for floor in source_floors {
        target_region.add_unique_floor(floor);
    }
    target_region.span_count += source_span_count;
    true
}

impl CompactHeightfield {
    /// Returns `true` if the span `i` has no neighbor of the same region in `direction`.
    pub(crate) fn is_solid_edge(
        &self,
        regions: &[RegionId],
        x: u16,
        z: u16,
        i: usize,
        direction: u8,
    ) -> bool {
        let neighbor_region = self
            .neighbor(x, z, i, direction)
            .map_or(RegionId::NONE, |(_, _, a_index)| regions[a_index]);
        neighbor_region != regions[i]
    }

    /// Walks the region contour starting at span `i`, collecting the regions on the other side.
    fn walk_region_contour(
        &self,
        regions: &[RegionId],
        mut x: u16,
        mut z: u16,
        mut i: usize,
        mut direction: u8,
        contour: &mut Vec<RegionId>,
    ) {
        let start_direction = direction;
        let start_index = i;

        let mut current_region = self
            .neighbor(x, z, i, direction)
            .map_or(RegionId::NONE, |(_, _, a_index)| regions[a_index]);
        contour.push(current_region);

        let mut iterations = 0;
        loop {
            iterations += 1;
            if iterations >= 40_000 {
                break;
            }
            if self.is_solid_edge(regions, x, z, i, direction) {
                // Choose the edge corner
                let region = self
                    .neighbor(x, z, i, direction)
                    .map_or(RegionId::NONE, |(_, _, a_index)| regions[a_index]);
                if region != current_region {
                    current_region = region;
                    contour.push(current_region);
                }
                // Rotate CW
                direction = (direction + 1) & 0x3;
            } else {
                let Some((neighbor_x, neighbor_z, neighbor_index)) =
                    self.neighbor(x, z, i, direction)
                else {
                    // Should not happen.
                    return;
                };
                x = neighbor_x;
                z = neighbor_z;
                i = neighbor_index;
                // Rotate CCW
                direction = (direction + 3) & 0x3;
            }

            if start_index == i && start_direction == direction {
                break;
            }
        }

        remove_adjacent_duplicates(contour);
    }

    /// Removes regions smaller than `min_region_area`, merges regions smaller than
    /// `merge_region_size` into their neighbors, and compacts the ids.
    ///
    /// Returns the new maximum region id and the regions found to overlap themselves.
    pub(crate) fn merge_and_filter_regions(
        &self,
        min_region_area: u16,
        merge_region_size: u16,
        max_region_id: u16,
        src_reg: &mut [RegionId],
    ) -> (u16, Vec<RegionId>) {
        let region_count = max_region_id as usize + 1;
        let mut regions: Vec<Region> = (0..region_count as u16).map(Region::new).collect();

        // Find edge of a region and find connections around the contour.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    let region_id = src_reg[i];
                    let r = region_id.bits() as usize;
                    if region_id == RegionId::NONE || r >= region_count {
                        continue;
                    }
                    regions[r].span_count += 1;

                    // Update floors.
                    for j in cell.index_range() {
                        if i == j {
                            continue;
                        }
                        let floor_id = src_reg[j];
                        if floor_id == RegionId::NONE || floor_id.bits() as usize >= region_count {
                            continue;
                        }
                        if floor_id == region_id {
                            regions[r].overlap = true;
                        }
                        regions[r].add_unique_floor(floor_id);
                    }

                    // Have found contour
                    if !regions[r].connections.is_empty() {
                        continue;
                    }
                    regions[r].area_type = self.areas[i];

                    // Check if this cell is next to a border.
                    let Some(direction) =
                        (0..4).find(|direction| self.is_solid_edge(&*src_reg, x, z, i, *direction))
                    else {
                        continue;
                    };
                    // The cell is at border.
                    // Walk around the contour to find all the neighbours.
                    let mut connections = Vec::new();
                    self.walk_region_contour(&*src_reg, x, z, i, direction, &mut connections);
                    regions[r].connections = connections;
                }
            }
        }

        // Remove too small regions.
        let mut stack = Vec::with_capacity(32);
        let mut trace = Vec::with_capacity(32);
        for i in 0..region_count {
            let region = &regions[i];
            if !region.id.is_walkable_region() || region.span_count == 0 || region.visited {
                continue;
            }

            // Count the total size of all the connected regions.
            // Also keep track of the regions connects to a tile border.
            let mut connects_to_border = false;
            let mut span_count = 0;
            stack.clear();
            trace.clear();

            regions[i].visited = true;
            stack.push(i);

            while let Some(region_index) = stack.pop() {
                span_count += regions[region_index].span_count;
                trace.push(region_index);

                for j in 0..regions[region_index].connections.len() {
                    let connection = regions[region_index].connections[j];
                    if connection.is_border() {
                        connects_to_border = true;
                        continue;
                    }
                    let neighbor = &mut regions[connection.bits() as usize];
                    if neighbor.visited || !neighbor.id.is_walkable_region() {
                        continue;
                    }
                    stack.push(neighbor.id.bits() as usize);
                    neighbor.visited = true;
                }
            }

            // If the accumulated regions size is too small, remove it.
            // Do not remove areas which connect to tile borders
            // as their size cannot be estimated correctly and removing them
            // can potentially remove necessary areas.
            if span_count < min_region_area as usize && !connects_to_border {
                // Kill all visited regions.
                for &region_index in &trace {
                    regions[region_index].span_count = 0;
                    regions[region_index].id = RegionId::NONE;
                }
            }
        }

        // Merge too small regions to neighbour regions.
        loop {
            let mut merge_count = 0;
            for i in 0..region_count {
                let region = &regions[i];
                if !region.id.is_walkable_region() || region.overlap || region.span_count == 0 {
                    continue;
                }

                // Check to see if the region should be merged.
                if region.span_count > merge_region_size as usize && region.is_connected_to_border()
                {
                    continue;
                }

                // Small region with more than 1 connection.
                // Or region which is not connected to a border at all.
                // Find smallest neighbour region that connects to this one.
                let mut smallest = usize::MAX;
                let mut merge_id = region.id;
                for connection in &region.connections {
                    if connection.is_border() {
                        continue;
                    }
                    let merge_candidate = &regions[connection.bits() as usize];
                    if !merge_candidate.id.is_walkable_region() || merge_candidate.overlap {
                        continue;
                    }
                    if merge_candidate.span_count < smallest
                        && region.can_merge_with(merge_candidate)
                        && merge_candidate.can_merge_with(region)
                    {
                        smallest = merge_candidate.span_count;
                        merge_id = merge_candidate.id;
                    }
                }

                // Found new id.
                if merge_id != region.id {
                    let old_id = region.id;
                    // Merge neighbours.
                    if merge_regions(&mut regions, merge_id.bits() as usize, i) {
                        // Fixup regions pointing to current region.
                        for other in regions.iter_mut() {
                            if !other.id.is_walkable_region() {
                                continue;
                            }
                            // If another region was already merged into current region
                            // change the nid of the previous region too.
                            if other.id == old_id {
                                other.id = merge_id;
                            }
                            // Replace the current region with the new one if the
                            // current regions is neighbour.
                            other.replace_neighbor(old_id, merge_id);
                        }
                        merge_count += 1;
                    }
                }
            }
            if merge_count == 0 {
                break;
            }
        }

        // Compress region Ids. Only ids that still own spans survive, merged regions
        // share the id of the region that took their spans.
        let mut live = vec![false; region_count];
        for region in &regions {
            if region.span_count > 0 && region.id.is_walkable_region() {
                live[region.id.bits() as usize] = true;
            }
        }
        for region in &mut regions {
            region.remap = region.id.is_walkable_region() && live[region.id.bits() as usize];
            if region.id.is_walkable_region() && !region.remap {
                region.id = RegionId::NONE;
            }
        }

        let mut region_id_gen = 0_u16;
        for i in 0..region_count {
            if !regions[i].remap {
                continue;
            }
            let old_id = regions[i].id;
            region_id_gen += 1;
            let new_id = RegionId::from(region_id_gen);
            for region in regions.iter_mut().skip(i) {
                if region.id == old_id {
                    region.id = new_id;
                    region.remap = false;
                }
            }
        }

        // Remap regions.
        for region in src_reg.iter_mut() {
            if !region.is_border() {
                *region = regions[region.bits() as usize].id;
            }
        }

        // Return regions that we found to be overlapping.
        let overlaps = regions
            .iter()
            .filter(|region| region.overlap)
            .map(|region| region.id)
            .collect();
        (region_id_gen, overlaps)
    }

    /// Paints every walkable span in the rectangle with `region`.
    pub(crate) fn paint_rect_region(
        &self,
        min_x: u16,
        max_x: u16,
        min_z: u16,
        max_z: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
    ) {
        for z in min_z..max_z {
            for x in min_x..max_x {
                for i in self.cell_at(x, z).index_range() {
                    if self.areas[i].is_walkable() {
                        src_reg[i] = region;
                    }
                }
            }
        }
    }

    /// Paints the four border strips, each with its own border region id.
    /// Returns the next free region id.
    pub(crate) fn paint_border_regions(&self, border_size: u16, src_reg: &mut [RegionId]) -> u16 {
        let mut region_id = 1;
        if border_size == 0 {
            return region_id;
        }
        let border_width = border_size.min(self.width);
        let border_height = border_size.min(self.height);
        let strips = [
            (0, border_width, 0, self.height),
            (self.width - border_width, self.width, 0, self.height),
            (0, self.width, 0, border_height),
            (0, self.width, self.height - border_height, self.height),
        ];
        for (min_x, max_x, min_z, max_z) in strips {
            self.paint_rect_region(
                min_x,
                max_x,
                min_z,
                max_z,
                RegionId::from(region_id) | RegionId::BORDER_REGION,
                src_reg,
            );
            region_id += 1;
        }
        region_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[u16]) -> Vec<RegionId> {
        values.iter().copied().map(RegionId::from).collect()
    }

    #[test]
    fn border_flag_is_stripped_from_id() {
        let region = RegionId::from(5) | RegionId::BORDER_REGION;
        assert!(region.is_border());
        assert!(!region.is_walkable_region());
        assert_eq!(region.id(), 5);
        assert!(RegionId::from(5).is_walkable_region());
        assert!(!RegionId::NONE.is_walkable_region());
    }

    #[test]
    fn adjacent_duplicates_wrap_around() {
        // The leading pair collapses first, then the last entry duplicates the first.
        let mut list = ids(&[1, 1, 2, 3, 1]);
        remove_adjacent_duplicates(&mut list);
        assert_eq!(list, ids(&[1, 2, 3]));

        let mut list = ids(&[2, 3, 3, 1, 2]);
        remove_adjacent_duplicates(&mut list);
        assert_eq!(list, ids(&[2, 3, 1]));

        let mut list = ids(&[4, 4, 4]);
        remove_adjacent_duplicates(&mut list);
        assert_eq!(list, ids(&[4]));
    }

    #[test]
    fn merging_joins_connections() {
        let mut regions: Vec<Region> = (0..3).map(Region::new).collect();
        regions[1].connections = ids(&[0, 2]);
        regions[1].span_count = 4;
        regions[2].connections = ids(&[1, 0]);
        regions[2].span_count = 6;
        assert!(merge_regions(&mut regions, 1, 2));
        assert_eq!(regions[1].span_count, 10);
        assert_eq!(regions[2].span_count, 0);
        assert_eq!(regions[1].connections, ids(&[0]));
    }

    #[test]
    fn regions_without_shared_edge_do_not_merge() {
        let mut regions: Vec<Region> = (0..3).map(Region::new).collect();
        regions[1].connections = ids(&[0]);
        regions[2].connections = ids(&[0]);
        assert!(!merge_regions(&mut regions, 1, 2));
    }

    #[test]
    fn different_areas_cannot_merge() {
        let mut a = Region::new(1);
        let mut b = Region::new(2);
        a.connections = ids(&[2]);
        b.connections = ids(&[1]);
        assert!(a.can_merge_with(&b));
        b.area_type = AreaType(3);
        assert!(!a.can_merge_with(&b));
    }
}
