use std::io;

use glam::IVec2;
use navtile_detour::{CreateTileDataError, NavMeshError, TileDataError};
use navtile_recast::NavmeshBuildError;
use thiserror::Error;

/// Errors from building tiles.
#[derive(Error, Debug)]
pub enum BuildTileError {
    /// Tiles can only be built into an allocated mesh.
    #[error("Navigation mesh must first be built or allocated before it can be partially rebuilt")]
    NotAllocated,
    /// A stage of the voxel pipeline failed.
    #[error(transparent)]
    Pipeline(#[from] NavmeshBuildError),
    /// The polygon mesh could not be converted into tile data.
    #[error("Could not build navigation mesh tile data: {0}")]
    TileData(#[from] CreateTileDataError),
    /// The store rejected the tile.
    #[error("Failed to add navigation mesh tile: {0}")]
    AddTile(#[from] NavMeshError),
}

/// Errors from [`NavigationMesh::add_tile`](crate::NavigationMesh::add_tile).
#[derive(Error, Debug)]
pub enum AddTileError {
    /// Tiles can only be added to an allocated mesh.
    #[error("Navigation mesh is not allocated")]
    NotAllocated,
    /// The tile block ended early.
    #[error("Tile block is truncated: {0}")]
    Truncated(#[from] io::Error),
    /// The tile blob could not be decoded.
    #[error("Invalid navigation mesh tile data: {0}")]
    Data(#[from] TileDataError),
    /// The block header names a different tile than the blob holds.
    #[error("Tile block for {block} holds the tile {data}")]
    IndexMismatch {
        /// Index from the block header.
        block: IVec2,
        /// Index from the tile data.
        data: IVec2,
    },
    /// The store rejected the tile.
    #[error("Failed to add navigation mesh tile: {0}")]
    Insert(#[from] NavMeshError),
}

/// Errors from [`NavigationMesh::set_navigation_data`](crate::NavigationMesh::set_navigation_data).
#[derive(Error, Debug)]
pub enum NavigationDataError {
    /// The preamble is unknown or has a different version.
    #[error("Incompatible navigation data format, please rebuild navigation data")]
    Incompatible {
        /// The version found in the data.
        version: i32,
    },
    /// The preamble ended early.
    #[error("Navigation data preamble is truncated: {0}")]
    Truncated(#[from] io::Error),
    /// The stored mesh parameters are invalid.
    #[error("Could not initialize navigation mesh: {0}")]
    Allocation(#[from] NavMeshError),
    /// A tile block could not be loaded. Tiles before it stay loaded.
    #[error("Could not load tile block {index}: {source}")]
    Tile {
        /// Position of the block in the data, counted from zero.
        index: usize,
        /// Why it failed.
        #[source]
        source: AddTileError,
    },
}
