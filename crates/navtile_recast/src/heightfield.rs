//! Solid voxel columns produced by rasterization.

use thiserror::Error;

use crate::{
    Aabb3d,
    span::{Span, SpanKey, Spans},
};

/// A grid of voxel columns over the xz-plane. Each column lists its solid [`Span`]s bottom to top.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Heightfield {
    /// Columns along x.
    pub width: u16,
    /// Columns along z.
    pub height: u16,
    /// World bounds. Column `(0, 0)` starts at `aabb.min`.
    pub aabb: Aabb3d,
    /// Column edge length in world units.
    pub cell_size: f32,
    /// Voxel height in world units.
    pub cell_height: f32,
    /// Lowest span of every column, row-major along x.
    pub columns: Vec<Option<SpanKey>>,
    /// Every span of every column.
    pub pool: Spans,
}

impl Heightfield {
    /// An empty field covering `aabb`, with the column count derived from the cell size.
    pub fn new(aabb: Aabb3d, cell_size: f32, cell_height: f32) -> Result<Self, HeightfieldError> {
        check_cell_size(cell_size, cell_height)?;
        let width = ((aabb.max.x - aabb.min.x) / cell_size + 0.5).floor();
        let height = ((aabb.max.z - aabb.min.z) / cell_size + 0.5).floor();
        if !(width >= 0.0 && height >= 0.0) {
            return Err(HeightfieldError::InvalidAabb);
        }
        if width > u16::MAX as f32 || height > u16::MAX as f32 {
            return Err(HeightfieldError::TooManyColumns { width, height });
        }
        Self::with_size(aabb, cell_size, cell_height, width as u16, height as u16)
    }

    /// An empty field with an explicit column count. Tiles use this so the border cells line up.
    pub fn with_size(
        aabb: Aabb3d,
        cell_size: f32,
        cell_height: f32,
        width: u16,
        height: u16,
    ) -> Result<Self, HeightfieldError> {
        check_cell_size(cell_size, cell_height)?;
        let column_count = width as usize * height as usize;
        Ok(Self {
            width,
            height,
            aabb,
            cell_size,
            cell_height,
            columns: vec![None; column_count],
            pool: Spans::with_capacity_and_key(column_count.max(1024)),
        })
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        z as usize * self.width as usize + x as usize
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, z: i32) -> bool {
        (0..self.width as i32).contains(&x) && (0..self.height as i32).contains(&z)
    }

    /// Adds solid voxels to a column.
    ///
    /// Touching spans are fused into one. When the tops of two fused spans are at most
    /// `merge_threshold` voxels apart, the higher area id survives.
    pub(crate) fn insert_span(
        &mut self,
        x: u16,
        z: u16,
        mut span: Span,
        merge_threshold: u16,
    ) -> Result<(), SpanInsertionError> {
        if x >= self.width || z >= self.height {
            return Err(SpanInsertionError::ColumnOutOfBounds { x, z });
        }
        let column = self.column_index(x, z);

        // Walk to the first span that is not entirely below the new one.
        let mut below = None;
        let mut cursor = self.columns[column];
        while let Some(key) = cursor {
            let existing = &self.pool[key];
            if existing.max() >= span.min() {
                break;
            }
            below = Some(key);
            cursor = existing.next();
        }

        // Swallow every span that touches the new one.
        while let Some(key) = cursor {
            if !self.pool[key].touches(&span) {
                break;
            }
            let Some(existing) = self.pool.remove(key) else {
                break;
            };
            span.absorb(&existing);
            if span.max().abs_diff(existing.max()) <= merge_threshold {
                span.set_area(span.area().max(existing.area()));
            }
            cursor = existing.next();
        }

        span.set_next(cursor);
        let key = self.pool.insert(span);
        match below {
            Some(below) => self.pool[below].set_next(Some(key)),
            None => self.columns[column] = Some(key),
        }
        Ok(())
    }

    /// Lowest span of a column. `None` outside the field or for an empty column.
    #[inline]
    pub fn span_key_at(&self, x: u16, z: u16) -> Option<SpanKey> {
        if x < self.width && z < self.height {
            self.columns[self.column_index(x, z)]
        } else {
            None
        }
    }

    /// Lowest span of a column.
    #[inline]
    pub fn span_at(&self, x: u16, z: u16) -> Option<&Span> {
        self.span_key_at(x, z).map(|key| &self.pool[key])
    }

    /// Spans of a column, bottom to top.
    pub fn column(&self, x: u16, z: u16) -> impl Iterator<Item = SpanKey> + '_ {
        std::iter::successors(self.span_key_at(x, z), |key| self.pool[*key].next())
    }

    /// # Panics
    /// If the key was removed.
    #[inline]
    pub fn span(&self, key: SpanKey) -> &Span {
        &self.pool[key]
    }

    /// # Panics
    /// If the key was removed.
    #[inline]
    pub fn span_mut(&mut self, key: SpanKey) -> &mut Span {
        &mut self.pool[key]
    }
}

fn check_cell_size(cell_size: f32, cell_height: f32) -> Result<(), HeightfieldError> {
    if cell_size > 0.0 && cell_height > 0.0 && cell_size.is_finite() && cell_height.is_finite() {
        Ok(())
    } else {
        Err(HeightfieldError::InvalidCellSize {
            cell_size,
            cell_height,
        })
    }
}

/// Why a [`Heightfield`] could not be created.
#[derive(Error, Debug)]
pub enum HeightfieldError {
    /// More than `u16::MAX` columns along an axis.
    #[error("Heightfield needs {width}x{height} columns, but each axis is limited to {max}", max = u16::MAX)]
    TooManyColumns {
        /// Columns along x.
        width: f32,
        /// Columns along z.
        height: f32,
    },
    /// The bounds are inverted or not finite.
    #[error("Heightfield bounds are inverted or not finite")]
    InvalidAabb,
    /// A cell dimension is zero, negative or NaN.
    #[error("Heightfield cells must have a positive size, got {cell_size}x{cell_height}")]
    InvalidCellSize {
        /// Column edge length.
        cell_size: f32,
        /// Voxel height.
        cell_height: f32,
    },
}

/// Why a span could not be added to a [`Heightfield`].
#[derive(Error, Debug)]
pub enum SpanInsertionError {
    /// The column lies outside the field.
    #[error("Column ({x}, {z}) is outside the heightfield")]
    ColumnOutOfBounds {
        /// Column along x.
        x: u16,
        /// Column along z.
        z: u16,
    },
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::span::AreaType;

    use super::*;

    fn field() -> Heightfield {
        Heightfield::new(Aabb3d::new(Vec3A::ZERO, [5.0, 5.0, 5.0]), 1.0, 1.0).unwrap()
    }

    fn runs(heightfield: &Heightfield, x: u16, z: u16) -> Vec<(u16, u16, u8)> {
        heightfield
            .column(x, z)
            .map(|key| {
                let span = heightfield.span(key);
                (span.min(), span.max(), span.area().0)
            })
            .collect()
    }

    #[test]
    fn column_count_follows_the_bounds() {
        let heightfield = field();
        assert_eq!((heightfield.width, heightfield.height), (10, 10));
        assert_eq!(heightfield.columns.len(), 100);
        assert!(heightfield.contains(9, 0));
        assert!(!heightfield.contains(10, 0));
    }

    #[test]
    fn bad_cells_are_rejected() {
        let aabb = Aabb3d::new(Vec3A::ZERO, [5.0, 5.0, 5.0]);
        assert!(matches!(
            Heightfield::new(aabb, 0.0, 1.0),
            Err(HeightfieldError::InvalidCellSize { .. })
        ));
        assert!(matches!(
            Heightfield::new(aabb, 1.0, -0.5),
            Err(HeightfieldError::InvalidCellSize { .. })
        ));
        assert!(matches!(
            Heightfield::with_size(aabb, f32::NAN, 1.0, 4, 4),
            Err(HeightfieldError::InvalidCellSize { .. })
        ));
        assert!(matches!(
            Heightfield::new(Aabb3d::EMPTY, 1.0, 1.0),
            Err(HeightfieldError::InvalidAabb)
        ));
    }

    #[test]
    fn disjoint_spans_stay_sorted() {
        let mut heightfield = field();
        heightfield.insert_span(1, 3, Span::new(8, 10, AreaType(2)), 0).unwrap();
        heightfield.insert_span(1, 3, Span::new(2, 4, AreaType(2)), 0).unwrap();
        heightfield.insert_span(1, 3, Span::new(12, 13, AreaType(5)), 0).unwrap();
        assert_eq!(runs(&heightfield, 1, 3), [(2, 4, 2), (8, 10, 2), (12, 13, 5)]);
        assert!(heightfield.span_at(3, 1).is_none());
    }

    #[test]
    fn out_of_bounds_column_is_rejected() {
        let mut heightfield = field();
        let result = heightfield.insert_span(3, 10, Span::new(0, 1, AreaType(1)), 0);
        assert!(matches!(
            result,
            Err(SpanInsertionError::ColumnOutOfBounds { x: 3, z: 10 })
        ));
    }

    #[test]
    fn touching_spans_fuse() {
        let mut heightfield = field();
        heightfield.insert_span(1, 3, Span::new(2, 4, AreaType(2)), 0).unwrap();
        heightfield.insert_span(1, 3, Span::new(4, 7, AreaType(3)), 0).unwrap();
        assert_eq!(runs(&heightfield, 1, 3), [(2, 7, 3)]);
        assert_eq!(heightfield.pool.len(), 1);
    }

    #[test]
    fn a_tall_span_swallows_everything_in_between() {
        let mut heightfield = field();
        heightfield.insert_span(0, 0, Span::new(2, 4, AreaType(2)), 0).unwrap();
        heightfield.insert_span(0, 0, Span::new(8, 10, AreaType(2)), 0).unwrap();
        heightfield.insert_span(0, 0, Span::new(20, 22, AreaType(2)), 0).unwrap();
        heightfield.insert_span(0, 0, Span::new(3, 9, AreaType(1)), 0).unwrap();
        assert_eq!(runs(&heightfield, 0, 0), [(2, 10, 2), (20, 22, 2)]);
        assert_eq!(heightfield.pool.len(), 2);
    }

    #[test]
    fn higher_area_wins_near_the_top() {
        let mut heightfield = field();
        heightfield.insert_span(0, 0, Span::new(4, 7, AreaType(2)), 0).unwrap();
        heightfield.insert_span(0, 0, Span::new(5, 6, AreaType(9)), 1).unwrap();
        assert_eq!(runs(&heightfield, 0, 0), [(4, 7, 9)]);

        // A buried area does not survive.
        heightfield.insert_span(1, 0, Span::new(2, 3, AreaType(9)), 0).unwrap();
        heightfield.insert_span(1, 0, Span::new(2, 8, AreaType(2)), 1).unwrap();
        assert_eq!(runs(&heightfield, 1, 0), [(2, 8, 2)]);
    }
}
