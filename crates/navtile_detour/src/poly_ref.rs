//! Generational references to tiles and polygons.

use crate::nav_mesh::NavMeshError;

/// A reference to a polygon inside a [`NavMesh`](crate::NavMesh).
///
/// Packs a salt, a tile index and a polygon index into 32 bits.
/// The salt changes every time the tile slot is reused, so a reference to a removed tile never
/// resolves to whatever tile was added in its place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyRef(pub u32);

impl PolyRef {
    /// The reference that points to nothing.
    pub const NULL: Self = Self(0);

    /// Returns `true` for [`PolyRef::NULL`].
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// A reference to a tile inside a [`NavMesh`](crate::NavMesh). Encoded the same way as a
/// [`PolyRef`] whose polygon index is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TileRef(pub u32);

impl TileRef {
    /// The reference that points to nothing.
    pub const NULL: Self = Self(0);

    /// Returns `true` for [`TileRef::NULL`].
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// The bit layout of references for one navigation mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RefEncoding {
    pub(crate) salt_bits: u32,
    pub(crate) tile_bits: u32,
    pub(crate) poly_bits: u32,
}

/// Tile and polygon bits share this budget, everything above it is salt.
pub(crate) const REF_INDEX_BITS: u32 = 22;

impl RefEncoding {
    pub(crate) fn new(max_tiles: u32, max_polys: u32) -> Result<Self, NavMeshError> {
        if max_tiles == 0 || !max_tiles.is_power_of_two() {
            return Err(NavMeshError::MaxTilesNotPowerOfTwo(max_tiles));
        }
        if max_polys == 0 {
            return Err(NavMeshError::NoPolygonsPerTile);
        }
        let tile_bits = max_tiles.ilog2();
        let poly_bits = max_polys.next_power_of_two().ilog2();
        if tile_bits + poly_bits > REF_INDEX_BITS {
            return Err(NavMeshError::ReferenceSpaceExceeded {
                tile_bits,
                poly_bits,
            });
        }
        Ok(Self {
            salt_bits: 32 - tile_bits - poly_bits,
            tile_bits,
            poly_bits,
        })
    }

    #[inline]
    pub(crate) fn encode(&self, salt: u32, tile: u32, poly: u32) -> PolyRef {
        PolyRef(
            (salt << (self.poly_bits + self.tile_bits)) | (tile << self.poly_bits) | poly,
        )
    }

    /// Splits a reference into `(salt, tile, poly)`.
    #[inline]
    pub(crate) fn decode(&self, reference: PolyRef) -> (u32, u32, u32) {
        let salt = reference.0 >> (self.poly_bits + self.tile_bits) & self.salt_mask();
        let tile = (reference.0 >> self.poly_bits) & mask(self.tile_bits);
        let poly = reference.0 & mask(self.poly_bits);
        (salt, tile, poly)
    }

    #[inline]
    pub(crate) fn salt_mask(&self) -> u32 {
        mask(self.salt_bits)
    }
}

#[inline]
fn mask(bits: u32) -> u32 {
    if bits >= 32 { u32::MAX } else { (1 << bits) - 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_follow_capacity() {
        let encoding = RefEncoding::new(256, 1 << 14).unwrap();
        assert_eq!(encoding.tile_bits, 8);
        assert_eq!(encoding.poly_bits, 14);
        assert_eq!(encoding.salt_bits, 10);
    }

    #[test]
    fn encoding_is_reversible() {
        let encoding = RefEncoding::new(16, 1000).unwrap();
        let reference = encoding.encode(3, 9, 777);
        assert_eq!(encoding.decode(reference), (3, 9, 777));
    }

    #[test]
    fn rejects_oversized_capacity() {
        assert!(matches!(
            RefEncoding::new(1 << 12, 1 << 12),
            Err(NavMeshError::ReferenceSpaceExceeded { .. })
        ));
        assert!(matches!(
            RefEncoding::new(100, 16),
            Err(NavMeshError::MaxTilesNotPowerOfTwo(100))
        ));
    }
}
