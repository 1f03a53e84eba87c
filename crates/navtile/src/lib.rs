#![doc = include_str!("../../../readme.md")]

mod build;
pub mod collector;
mod error;
pub mod events;
mod navigation_mesh;
mod obstacles;
mod persistence;
mod queries;
pub mod scene;
mod settings;
#[cfg(test)]
mod test_util;

pub use navtile_detour;
pub use navtile_recast;

pub use build::{TileBuild, calculate_max_tiles};
pub use collector::{
    CollectedGeometry, NavAreaVolume, NavigableSource, NavigationGeometryInfo, calculate_bounding_box,
    collect_geometries,
};
pub use error::{AddTileError, BuildTileError, NavigationDataError};
pub use events::NavigationEvent;
pub use navigation_mesh::NavigationMesh;
pub use obstacles::{NavObstacle, ObstacleKey};
pub use navtile_detour::QueryFilter;
pub use navtile_recast::{Aabb3d, PartitionType};
pub use persistence::NAVIGATION_DATA_VERSION;
pub use queries::{MAX_POLYS, PathPoint, PathPointFlag, RaycastResult, WallDistance};
pub use scene::{
    CollisionShape, Component, ModelGeometry, SceneComponent, SceneNode, ShapeKind, TriangleGeometry,
};
pub use settings::{DEFAULT_MAX_TILES, NavigationMeshSettings, POLY_REF_BITS, VERTICES_PER_POLYGON};
