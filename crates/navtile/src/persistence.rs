//! Tile blocks and the whole-mesh navigation data.
//!
//! A tile block is `i32 x, i32 z, i32 size` followed by `size` bytes of [`TileData`] blob.
//! The navigation data starts with a reserved bounding box, two reserved zeros and
//! [`NAVIGATION_DATA_VERSION`], then the mesh parameters, then tile blocks until the end.
//! Everything is little-endian.

use std::io::{self, Write as _};

use byteorder::{LittleEndian, ReadBytesExt as _, WriteBytesExt as _};
use glam::{IVec2, Vec3};
use navtile_detour::{NavMesh, NavMeshParams, TileData};
use navtile_recast::Aabb3d;

use crate::{
    NavigationMesh,
    error::{AddTileError, NavigationDataError},
};

/// Version of the navigation data layout. Data with another version is rejected.
pub const NAVIGATION_DATA_VERSION: i32 = 1;

pub(crate) fn write_tile(out: &mut Vec<u8>, data: &TileData) {
    try_write_tile(out, data).unwrap_or_else(|_| unreachable!("writing to a Vec cannot fail"));
}

fn try_write_tile(out: &mut Vec<u8>, data: &TileData) -> io::Result<()> {
    let blob = data.to_bytes();
    out.write_i32::<LittleEndian>(data.header.x)?;
    out.write_i32::<LittleEndian>(data.header.z)?;
    out.write_i32::<LittleEndian>(blob.len() as i32)?;
    out.write_all(&blob)
}

fn write_preamble(out: &mut Vec<u8>, nav_mesh: &NavMesh) -> io::Result<()> {
    let reserved = Aabb3d::EMPTY;
    for value in reserved.min.to_array().into_iter().chain(reserved.max.to_array()) {
        out.write_f32::<LittleEndian>(value)?;
    }
    out.write_i32::<LittleEndian>(0)?;
    out.write_i32::<LittleEndian>(0)?;
    out.write_i32::<LittleEndian>(NAVIGATION_DATA_VERSION)?;

    let params = nav_mesh.params();
    out.write_f32::<LittleEndian>(params.tile_width)?;
    out.write_f32::<LittleEndian>(params.tile_height)?;
    out.write_i32::<LittleEndian>(params.max_tiles as i32)?;
    out.write_i32::<LittleEndian>(params.max_polys as i32)
}

fn read_params(reader: &mut &[u8]) -> Result<NavMeshParams, NavigationDataError> {
    for _ in 0..6 {
        reader.read_f32::<LittleEndian>()?;
    }
    let reserved0 = reader.read_i32::<LittleEndian>()?;
    let reserved1 = reader.read_i32::<LittleEndian>()?;
    let version = reader.read_i32::<LittleEndian>()?;
    if reserved0 != 0 || reserved1 != 0 || version != NAVIGATION_DATA_VERSION {
        return Err(NavigationDataError::Incompatible { version });
    }
    Ok(NavMeshParams {
        origin: Vec3::ZERO,
        tile_width: reader.read_f32::<LittleEndian>()?,
        tile_height: reader.read_f32::<LittleEndian>()?,
        max_tiles: reader.read_i32::<LittleEndian>()?.max(0) as u32,
        max_polys: reader.read_i32::<LittleEndian>()?.max(0) as u32,
    })
}

impl NavigationMesh {
    /// Serializes the whole mesh. Empty if the mesh is not allocated.
    pub fn navigation_data(&self) -> Vec<u8> {
        let Some(nav_mesh) = &self.nav_mesh else {
            return Vec::new();
        };
        let mut out = Vec::new();
        write_preamble(&mut out, nav_mesh)
            .unwrap_or_else(|_| unreachable!("writing to a Vec cannot fail"));
        for tile in nav_mesh.tiles() {
            write_tile(&mut out, tile.data());
        }
        out
    }

    /// Replaces the mesh with serialized navigation data.
    ///
    /// Empty data leaves the mesh unallocated. So does a bad preamble, which is also logged as a warning.
    /// Loading stops at the first bad tile block, keeping the tiles before it.
    /// No events are raised.
    pub fn set_navigation_data(&mut self, data: &[u8]) -> Result<(), NavigationDataError> {
        self.clear();
        if data.is_empty() {
            return Ok(());
        }

        let mut reader = data;
        let params = read_params(&mut reader).inspect_err(|err| tracing::warn!("{err}"))?;
        let nav_mesh = NavMesh::new(params)
            .inspect_err(|err| tracing::error!("Could not initialize navigation mesh: {err}"))?;
        self.nav_mesh = Some(nav_mesh);

        let mut tile_count = 0;
        while !reader.is_empty() {
            self.read_tile(&mut reader).map_err(|source| {
                tracing::warn!("Could not load navigation mesh tile {tile_count}: {source}");
                NavigationDataError::Tile {
                    index: tile_count,
                    source,
                }
            })?;
            tile_count += 1;
        }
        tracing::debug!("Created navigation mesh with {tile_count} tiles from serialized data");
        Ok(())
    }

    /// Reads one tile block and inserts its tile.
    pub(crate) fn read_tile(&mut self, reader: &mut &[u8]) -> Result<IVec2, AddTileError> {
        let nav_mesh = self.nav_mesh.as_mut().ok_or(AddTileError::NotAllocated)?;
        let x = reader.read_i32::<LittleEndian>()?;
        let z = reader.read_i32::<LittleEndian>()?;
        let size = reader.read_u32::<LittleEndian>()? as usize;
        if reader.len() < size {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        let (blob, rest) = reader.split_at(size);
        *reader = rest;

        let data = TileData::from_bytes(blob)?;
        let block = IVec2::new(x, z);
        let stored = IVec2::new(data.header.x, data.header.z);
        if block != stored {
            return Err(AddTileError::IndexMismatch {
                block,
                data: stored,
            });
        }
        nav_mesh.add_tile(data)?;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocated() -> NavigationMesh {
        let mut mesh = NavigationMesh::default();
        mesh.allocate_with(16).unwrap();
        mesh
    }

    #[test]
    fn preamble_layout() {
        let mesh = allocated();
        let data = mesh.navigation_data();
        assert_eq!(data.len(), 24 + 12 + 16);
        let mut reader = &data[24..];
        assert_eq!(reader.read_i32::<LittleEndian>().unwrap(), 0);
        assert_eq!(reader.read_i32::<LittleEndian>().unwrap(), 0);
        assert_eq!(reader.read_i32::<LittleEndian>().unwrap(), NAVIGATION_DATA_VERSION);
        approx::assert_relative_eq!(reader.read_f32::<LittleEndian>().unwrap(), 38.4, epsilon = 1e-4);
        approx::assert_relative_eq!(reader.read_f32::<LittleEndian>().unwrap(), 38.4, epsilon = 1e-4);
        assert_eq!(reader.read_i32::<LittleEndian>().unwrap(), 16);
        assert_eq!(reader.read_i32::<LittleEndian>().unwrap(), 1 << 18);
    }

    #[test]
    fn unallocated_mesh_has_no_data() {
        assert!(NavigationMesh::default().navigation_data().is_empty());
        let mut mesh = allocated();
        mesh.set_navigation_data(&[]).unwrap();
        assert!(!mesh.is_allocated());
    }

    #[test]
    fn empty_mesh_round_trips() {
        let data = allocated().navigation_data();
        let mut restored = NavigationMesh::default();
        restored.set_navigation_data(&data).unwrap();
        let nav_mesh = restored.nav_mesh().unwrap();
        assert_eq!(nav_mesh.max_tiles(), 16);
        assert_eq!(nav_mesh.params().max_polys, 1 << 18);
        assert!(restored.all_tile_indices().is_empty());
    }

    #[test]
    fn wrong_version_leaves_the_mesh_unallocated() {
        let mut data = allocated().navigation_data();
        data[32..36].copy_from_slice(&2i32.to_le_bytes());
        let mut restored = NavigationMesh::default();
        let err = restored.set_navigation_data(&data).unwrap_err();
        assert!(matches!(err, NavigationDataError::Incompatible { version: 2 }));
        assert!(!restored.is_allocated());
    }

    #[test]
    fn truncated_preamble_is_rejected() {
        let data = allocated().navigation_data();
        let mut restored = NavigationMesh::default();
        let err = restored.set_navigation_data(&data[..30]).unwrap_err();
        assert!(matches!(err, NavigationDataError::Truncated(_)));
        assert!(!restored.is_allocated());
    }

    #[test]
    fn garbage_tile_block_stops_the_load() {
        let mut data = allocated().navigation_data();
        data.extend_from_slice(&0i32.to_le_bytes());
        data.extend_from_slice(&0i32.to_le_bytes());
        data.extend_from_slice(&4i32.to_le_bytes());
        data.extend_from_slice(b"nope");
        let mut restored = NavigationMesh::default();
        let err = restored.set_navigation_data(&data).unwrap_err();
        assert!(matches!(
            err,
            NavigationDataError::Tile {
                index: 0,
                source: AddTileError::Data(_)
            }
        ));
        assert!(restored.is_allocated());
    }

    #[test]
    fn tile_blocks_need_an_allocated_mesh() {
        let mut mesh = NavigationMesh::default();
        assert!(matches!(mesh.add_tile(&[0; 12]), Err(AddTileError::NotAllocated)));
        let mut mesh = allocated();
        assert!(matches!(mesh.add_tile(&[0; 6]), Err(AddTileError::Truncated(_))));
    }
}
