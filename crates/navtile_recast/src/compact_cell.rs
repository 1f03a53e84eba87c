use std::ops::Range;

/// A column of a [`CompactHeightfield`](crate::CompactHeightfield): a run of consecutive spans.
///
/// Packed as a 24 bit index of the first span and an 8 bit span count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactCell(u32);

impl CompactCell {
    const COUNT_SHIFT: u32 = 24;
    const INDEX_MASK: u32 = (1 << Self::COUNT_SHIFT) - 1;

    /// An empty column whose spans will start at `first`.
    #[inline]
    pub(crate) fn starting_at(first: usize) -> Self {
        Self(first as u32 & Self::INDEX_MASK)
    }

    /// Index of the lowest span.
    #[inline]
    pub fn index(&self) -> u32 {
        self.0 & Self::INDEX_MASK
    }

    /// Number of spans.
    #[inline]
    pub fn count(&self) -> u8 {
        (self.0 >> Self::COUNT_SHIFT) as u8
    }

    /// Indices of the spans, bottom to top.
    #[inline]
    pub fn index_range(&self) -> Range<usize> {
        let first = self.index() as usize;
        first..first + self.count() as usize
    }

    /// Claims the next span. `false` once the column is full.
    #[inline]
    pub(crate) fn push(&mut self) -> bool {
        if self.count() == u8::MAX {
            return false;
        }
        self.0 += 1 << Self::COUNT_SHIFT;
        true
    }
}
