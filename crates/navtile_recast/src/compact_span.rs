use crate::region::RegionId;

/// Open space above a walkable surface in a [`CompactHeightfield`](crate::CompactHeightfield).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactSpan {
    /// Floor height in voxels.
    pub y: u16,
    /// Region the span was assigned to.
    pub region: RegionId,
    // Four 6 bit neighbor layers in the low bits, clearance in the high byte.
    packed: u32,
}

impl CompactSpan {
    /// Layer value of a direction without a walkable neighbor.
    pub const NOT_CONNECTED: u8 = 0x3f;

    const LAYER_BITS: u32 = 6;
    const LAYER_MASK: u32 = (1 << Self::LAYER_BITS) - 1;
    const HEIGHT_SHIFT: u32 = 24;

    /// A span with `height` voxels of clearance and no neighbors.
    pub(crate) fn new(y: u16, height: u8) -> Self {
        let unconnected = (0..4).fold(0, |packed, direction| {
            packed | (Self::NOT_CONNECTED as u32) << (direction * Self::LAYER_BITS)
        });
        Self {
            y,
            region: RegionId::NONE,
            packed: unconnected | (height as u32) << Self::HEIGHT_SHIFT,
        }
    }

    /// The layer of the walkable neighbor in `direction`, counted from the bottom of its column.
    #[inline]
    pub fn con(&self, direction: u8) -> Option<u8> {
        let layer = (self.packed >> (direction as u32 * Self::LAYER_BITS)) & Self::LAYER_MASK;
        (layer != Self::NOT_CONNECTED as u32).then_some(layer as u8)
    }

    /// Links a direction to a neighbor layer, or unlinks it with [`Self::NOT_CONNECTED`].
    #[inline]
    pub fn set_con(&mut self, direction: u8, layer: u8) {
        let shift = direction as u32 * Self::LAYER_BITS;
        self.packed &= !(Self::LAYER_MASK << shift);
        self.packed |= (layer as u32 & Self::LAYER_MASK) << shift;
    }

    /// Clearance above [`CompactSpan::y`] in voxels.
    #[inline]
    pub fn height(&self) -> u8 {
        (self.packed >> Self::HEIGHT_SHIFT) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_span_has_no_neighbors() {
        let span = CompactSpan::new(7, 200);
        assert_eq!(span.y, 7);
        assert_eq!(span.height(), 200);
        assert!((0..4).all(|direction| span.con(direction).is_none()));
    }

    #[test]
    fn directions_do_not_overlap() {
        let mut span = CompactSpan::new(0, 42);
        span.set_con(2, 5);
        span.set_con(3, 62);
        assert_eq!(span.con(1), None);
        assert_eq!(span.con(2), Some(5));
        assert_eq!(span.con(3), Some(62));
        assert_eq!(span.height(), 42);

        span.set_con(2, CompactSpan::NOT_CONNECTED);
        assert_eq!(span.con(2), None);
        assert_eq!(span.con(3), Some(62));
    }
}
