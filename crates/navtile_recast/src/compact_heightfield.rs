use thiserror::Error;

use crate::{
    Aabb3d,
    compact_cell::CompactCell,
    compact_span::CompactSpan,
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    region::RegionId,
    span::AreaType,
};

/// The open space of a [`Heightfield`], flattened into arrays.
///
/// Every walkable surface becomes a [`CompactSpan`] with the clearance above it and links to
/// the spans an agent can step to. Columns are [`CompactCell`]s indexing into [`CompactHeightfield::spans`].
/// The per-span arrays `spans`, `dist` and `areas` always have the same length.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactHeightfield {
    /// Columns along x.
    pub width: u16,
    /// Columns along z.
    pub height: u16,
    /// Clearance an agent needs, in voxels.
    pub walkable_height: u16,
    /// Step an agent can take, in voxels.
    pub walkable_climb: u16,
    /// Cells on each side that belong to neighboring tiles.
    pub border_size: u16,
    /// Largest value in [`CompactHeightfield::dist`].
    pub max_distance: u16,
    /// Largest region id handed out.
    pub max_region: RegionId,
    /// World bounds, raised by the agent height.
    pub aabb: Aabb3d,
    /// Column edge length in world units.
    pub cell_size: f32,
    /// Voxel height in world units.
    pub cell_height: f32,
    /// Row-major columns.
    pub cells: Vec<CompactCell>,
    /// Spans of all columns.
    pub spans: Vec<CompactSpan>,
    /// Distance of each span to the nearest border, filled by the distance field.
    pub dist: Vec<u16>,
    /// Area of each span.
    pub areas: Vec<AreaType>,
}

impl Heightfield {
    /// Flattens the walkable surfaces into a [`CompactHeightfield`] and links neighbors
    /// that have `walkable_height` of shared clearance and differ by at most `walkable_climb`.
    pub fn into_compact(
        self,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<CompactHeightfield, CompactHeightfieldError> {
        CompactHeightfield::from_heightfield(&self, walkable_height, walkable_climb)
    }
}

impl CompactHeightfield {
    /// Links can only address this many layers of a neighbor column.
    const MAX_LAYERS: usize = CompactSpan::NOT_CONNECTED as usize;

    fn from_heightfield(
        heightfield: &Heightfield,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<Self, CompactHeightfieldError> {
        let capacity = heightfield
            .pool
            .values()
            .filter(|span| span.area().is_walkable())
            .count();
        let mut cells = Vec::with_capacity(heightfield.columns.len());
        let mut spans = Vec::with_capacity(capacity);
        let mut areas = Vec::with_capacity(capacity);

        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                let mut cell = CompactCell::starting_at(spans.len());
                let column: Vec<_> = heightfield.column(x, z).collect();
                for (layer, key) in column.iter().enumerate() {
                    let span = heightfield.span(*key);
                    if !span.area().is_walkable() {
                        continue;
                    }
                    if !cell.push() {
                        return Err(CompactHeightfieldError::TooManySpansInColumn { x, z });
                    }
                    let ceiling = column
                        .get(layer + 1)
                        .map_or(u16::MAX, |above| heightfield.span(*above).min());
                    let clearance = ceiling.saturating_sub(span.max()).min(u8::MAX as u16);
                    spans.push(CompactSpan::new(span.max(), clearance as u8));
                    areas.push(span.area());
                }
                cells.push(cell);
            }
        }

        let mut aabb = heightfield.aabb;
        aabb.max.y += walkable_height as f32 * heightfield.cell_height;
        let mut compact = Self {
            width: heightfield.width,
            height: heightfield.height,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_distance: 0,
            max_region: RegionId::NONE,
            aabb,
            cell_size: heightfield.cell_size,
            cell_height: heightfield.cell_height,
            cells,
            dist: vec![0; spans.len()],
            spans,
            areas,
        };
        compact.link_neighbors();
        Ok(compact)
    }

    fn link_neighbors(&mut self) {
        let mut deepest_dropped = None;
        for (x, z, index) in self.iter_spans().collect::<Vec<_>>() {
            let span = self.spans[index];
            for direction in 0..4 {
                let neighbor_x = x as i32 + dir_offset_x(direction) as i32;
                let neighbor_z = z as i32 + dir_offset_z(direction) as i32;
                if !self.contains(neighbor_x, neighbor_z) {
                    continue;
                }
                let neighbor_cell = *self.cell_at(neighbor_x as u16, neighbor_z as u16);
                let reachable = neighbor_cell.index_range().position(|other| {
                    let other = &self.spans[other];
                    let floor = span.y.max(other.y) as i32;
                    let ceiling = (span.y as i32 + span.height() as i32)
                        .min(other.y as i32 + other.height() as i32);
                    ceiling - floor >= self.walkable_height as i32
                        && span.y.abs_diff(other.y) <= self.walkable_climb
                });
                match reachable {
                    Some(layer) if layer < Self::MAX_LAYERS => {
                        self.spans[index].set_con(direction, layer as u8);
                    }
                    Some(layer) => {
                        deepest_dropped = deepest_dropped.max(Some(layer));
                    }
                    None => {}
                }
            }
        }
        if let Some(layer) = deepest_dropped {
            tracing::warn!(
                "Heightfield has {layer} layers but links address at most {max}. Some connections were dropped.",
                max = Self::MAX_LAYERS - 1
            );
        }
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        z as usize * self.width as usize + x as usize
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, z: i32) -> bool {
        (0..self.width as i32).contains(&x) && (0..self.height as i32).contains(&z)
    }

    /// The column at `(x, z)`, `None` outside the field.
    #[inline]
    pub fn try_cell_at(&self, x: u16, z: u16) -> Option<&CompactCell> {
        (x < self.width && z < self.height).then(|| &self.cells[self.column_index(x, z)])
    }

    /// # Panics
    /// Outside the field.
    #[inline]
    pub fn cell_at(&self, x: u16, z: u16) -> &CompactCell {
        &self.cells[self.column_index(x, z)]
    }

    /// The column and span index reached by stepping from span `span_index` at `(x, z)` in `direction`.
    #[inline]
    pub fn neighbor(
        &self,
        x: u16,
        z: u16,
        span_index: usize,
        direction: u8,
    ) -> Option<(u16, u16, usize)> {
        let layer = self.spans[span_index].con(direction)?;
        let neighbor_x = x.wrapping_add_signed(dir_offset_x(direction) as i16);
        let neighbor_z = z.wrapping_add_signed(dir_offset_z(direction) as i16);
        let first = self.cell_at(neighbor_x, neighbor_z).index() as usize;
        Some((neighbor_x, neighbor_z, first + layer as usize))
    }

    /// `(x, z, span_index)` of every span, row by row.
    pub fn iter_spans(&self) -> impl Iterator<Item = (u16, u16, usize)> + '_ {
        (0..self.height).flat_map(move |z| {
            (0..self.width).flat_map(move |x| self.cell_at(x, z).index_range().map(move |i| (x, z, i)))
        })
    }
}

/// Why a [`CompactHeightfield`] could not be built.
#[derive(Error, Debug)]
pub enum CompactHeightfieldError {
    /// A column has more walkable surfaces than a cell can count.
    #[error("Column ({x}, {z}) has more than {max} walkable spans", max = u8::MAX)]
    TooManySpansInColumn {
        /// Column along x.
        x: u16,
        /// Column along z.
        z: u16,
    },
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{Heightfield, span::Span};

    use super::*;

    fn heightfield_with_floor(size: u16, y: u16) -> Heightfield {
        let mut heightfield = Heightfield::new(
            Aabb3d::from_min_max(Vec3A::ZERO, Vec3A::new(size as f32, 20.0, size as f32)),
            1.0,
            1.0,
        )
        .unwrap();
        for z in 0..size {
            for x in 0..size {
                heightfield
                    .insert_span(x, z, Span::new(0, y, AreaType::DEFAULT_WALKABLE), 0)
                    .unwrap();
            }
        }
        heightfield
    }

    #[test]
    fn flat_floor_is_fully_connected_inside() {
        let compact = heightfield_with_floor(3, 2).into_compact(3, 1).unwrap();
        assert_eq!(compact.spans.len(), 9);
        assert_eq!(compact.areas.len(), 9);
        let center = compact.cell_at(1, 1).index() as usize;
        assert_eq!(compact.spans[center].y, 2);
        for dir in 0..4 {
            assert_eq!(compact.spans[center].con(dir), Some(0));
        }
        let corner = compact.cell_at(0, 0).index() as usize;
        assert_eq!(compact.spans[corner].con(0), None);
        assert_eq!(compact.spans[corner].con(3), None);
        assert_eq!(compact.spans[corner].con(2), Some(0));
    }

    #[test]
    fn neighbor_follows_connection() {
        let compact = heightfield_with_floor(3, 2).into_compact(3, 1).unwrap();
        let center = compact.cell_at(1, 1).index() as usize;
        let (x, z, index) = compact.neighbor(1, 1, center, 1).unwrap();
        assert_eq!((x, z), (1, 2));
        assert_eq!(index, compact.cell_at(1, 2).index() as usize);
    }

    #[test]
    fn low_ceiling_blocks_the_link() {
        let mut heightfield = heightfield_with_floor(2, 2);
        heightfield
            .insert_span(1, 0, Span::new(4, 6, AreaType::NOT_WALKABLE), 0)
            .unwrap();
        let compact = heightfield.into_compact(3, 1).unwrap();
        let under_roof = compact.cell_at(1, 0).index() as usize;
        assert_eq!(compact.spans[under_roof].height(), 2);
        assert_eq!(compact.spans[under_roof].con(0), None);
        let open = compact.cell_at(0, 0).index() as usize;
        assert_eq!(compact.spans[open].con(2), None);
        assert_eq!(compact.spans[open].con(1), Some(0));
        assert!(compact.try_cell_at(2, 0).is_none());
    }

    #[test]
    fn compact_aabb_grows_by_walkable_height() {
        let compact = heightfield_with_floor(2, 2).into_compact(3, 1).unwrap();
        assert_eq!(compact.aabb.max.y, 23.0);
        assert_eq!(compact.iter_spans().count(), 4);
    }
}
