//! The voxel pipeline that turns triangle soups into navigation polygons.
//!
//! A [`TriMesh`] is rasterized into a [`Heightfield`], compacted into a [`CompactHeightfield`],
//! partitioned into regions, traced into a [`ContourSet`] and finally turned into a [`PolygonMesh`]
//! with a [`DetailNavmesh`] for accurate heights. [`NavmeshConfig::build_meshes`] runs all stages.

pub(crate) mod math;

// Voxelization.
mod heightfield;
mod rasterize;
mod span;
mod span_filters;
mod trimesh;

// Open space and its partitioning.
mod area_volumes;
mod compact_cell;
mod compact_heightfield;
mod compact_span;
mod distance_field;
mod erosion;
mod monotone_regions;
mod region;
mod watershed;

// Polygons.
mod contours;
mod detail_mesh;
mod poly_mesh;

mod config;
mod pipeline;

pub use area_volumes::{AreaCylinder, ConvexVolume};
pub use compact_cell::CompactCell;
pub use compact_heightfield::{CompactHeightfield, CompactHeightfieldError};
pub use compact_span::CompactSpan;
pub use config::{NavmeshConfig, NavmeshConfigBuilder, PartitionType};
pub use contours::{BuildContoursFlags, Contour, ContourSet, RegionVertexId};
pub use detail_mesh::{DETAIL_EDGE_BOUNDARY, DetailNavmesh, DetailNavmeshError, SubMesh};
pub use heightfield::{Heightfield, HeightfieldError, SpanInsertionError};
pub use math::{Aabb2d, Aabb3d};
pub use pipeline::{AreaBox, NavmeshBuildError, NavmeshMeshes};
pub use poly_mesh::{PolygonMesh, PolygonMeshError};
pub use rasterize::RasterizationError;
pub use region::{RegionError, RegionId};
pub use span::{AreaType, Span, SpanKey, Spans};
pub use trimesh::TriMesh;
