use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Handle of a [`Span`] inside a [`Heightfield`](crate::Heightfield).
    pub struct SpanKey;
}

/// Storage for the spans of a heightfield. Columns link their spans through [`Span::next`].
pub type Spans = SlotMap<SpanKey, Span>;

/// Solid voxels from `min` to `max` in one heightfield column.
///
/// Heights are in cell height units above the heightfield floor. Spans of a column form a
/// singly linked list sorted bottom to top.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Span {
    min: u16,
    max: u16,
    area: AreaType,
    next: Option<SpanKey>,
}

impl Span {
    /// Largest representable height.
    pub const MAX_HEIGHT: u16 = u16::MAX;

    /// An unlinked span.
    pub(crate) fn new(min: u16, max: u16, area: AreaType) -> Self {
        Self {
            min,
            max,
            area,
            next: None,
        }
    }

    /// Bottom of the solid run.
    #[inline]
    pub fn min(&self) -> u16 {
        self.min
    }

    /// Top of the solid run. Agents stand here.
    #[inline]
    pub fn max(&self) -> u16 {
        self.max
    }

    /// Area of the surface on top.
    #[inline]
    pub fn area(&self) -> AreaType {
        self.area
    }

    /// The span above this one.
    #[inline]
    pub fn next(&self) -> Option<SpanKey> {
        self.next
    }

    #[inline]
    pub(crate) fn set_area(&mut self, area: impl Into<AreaType>) {
        self.area = area.into();
    }

    #[inline]
    pub(crate) fn set_next(&mut self, next: Option<SpanKey>) {
        self.next = next;
    }

    /// Grows this span to also cover `other`.
    pub(crate) fn absorb(&mut self, other: &Span) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Returns `true` if the two runs share at least one height.
    #[inline]
    pub(crate) fn touches(&self, other: &Span) -> bool {
        self.min <= other.max && other.min <= self.max
    }
}

/// Area id stamped on voxels and carried into polygons. Queries weigh costs by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct AreaType(pub u8);

impl AreaType {
    /// Blocked surface.
    pub const NOT_WALKABLE: Self = Self(0);
    /// Area of walkable triangles that no volume overrides.
    pub const DEFAULT_WALKABLE: Self = Self(u8::MAX);

    /// Everything but [`AreaType::NOT_WALKABLE`] can be walked on.
    #[inline]
    pub fn is_walkable(&self) -> bool {
        self.0 != Self::NOT_WALKABLE.0
    }
}

impl From<u8> for AreaType {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<AreaType> for u8 {
    fn from(area: AreaType) -> Self {
        area.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorbing_covers_both_runs() {
        let mut lower = Span::new(2, 5, AreaType(1));
        let upper = Span::new(4, 9, AreaType(2));
        assert!(lower.touches(&upper));
        lower.absorb(&upper);
        assert_eq!((lower.min(), lower.max()), (2, 9));
        assert_eq!(lower.area(), AreaType(1));
    }

    #[test]
    fn separated_runs_do_not_touch() {
        let lower = Span::new(0, 3, AreaType(1));
        let upper = Span::new(4, 6, AreaType(1));
        assert!(!lower.touches(&upper));
        assert!(Span::new(3, 3, AreaType(1)).touches(&lower));
    }

    #[test]
    fn links_to_the_span_above() {
        let mut spans = Spans::with_key();
        let top = spans.insert(Span::new(8, 10, AreaType::DEFAULT_WALKABLE));
        let mut bottom = Span::new(0, 2, AreaType(3));
        bottom.set_next(Some(top));
        bottom.set_area(AreaType::NOT_WALKABLE);
        assert_eq!(bottom.next(), Some(top));
        assert!(!bottom.area().is_walkable());
        assert!(spans[top].area().is_walkable());
    }
}
