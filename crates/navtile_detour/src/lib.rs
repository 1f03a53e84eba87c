//! Tiled navigation mesh storage and queries.
//!
//! Tiles are created from the output of [`navtile_recast`] with [`create_tile_data`], stored in a
//! [`NavMesh`] and queried through a [`NavMeshQuery`]. Polygons are addressed by [`PolyRef`]s that
//! become invalid once their tile is removed.

mod create;
pub(crate) mod math;
mod nav_mesh;
mod nav_mesh_query;
mod node_pool;
mod poly_ref;
mod query_filter;
mod surface_queries;
mod tile_data;

pub use create::{CreateTileDataError, NavMeshCreateParams, OffMeshConnectionParams, create_tile_data};
pub use nav_mesh::{Link, MeshTile, NavMesh, NavMeshError, NavMeshParams};
pub use nav_mesh_query::{
    DEFAULT_MAX_NODES, NavMeshQuery, PathResult, QueryError, StraightPathFlags, StraightPathPoint,
};
pub use poly_ref::{PolyRef, TileRef};
pub use query_filter::{MAX_AREAS, QueryFilter};
pub use surface_queries::{RaycastHit, SurfaceMove, WallHit};
pub use tile_data::{
    EXT_LINK, INTERNAL_SIDE, MAX_VERTICES_PER_POLYGON, OFF_MESH_BIDIRECTIONAL, OffMeshConnection,
    Poly, PolyDetail, PolyType, TILE_MAGIC, TILE_VERSION, TileData, TileDataError, TileHeader,
};
