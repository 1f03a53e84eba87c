use glam::Vec3;
use navtile_recast::{Aabb3d, NavmeshConfigBuilder, PartitionType};

/// The tile count used when it cannot be derived from the scene bounds.
pub const DEFAULT_MAX_TILES: u32 = 256;

/// Number of bits shared by the tile and polygon parts of a polygon reference.
pub const POLY_REF_BITS: u32 = 22;

/// Vertices per polygon of every built tile.
pub const VERTICES_PER_POLYGON: u16 = 6;

/// The build parameters of a [`NavigationMesh`](crate::NavigationMesh).
///
/// Lengths are in world units, [`agent_max_slope`](Self::agent_max_slope) is in degrees.
/// The setters clamp their input to the smallest value the build accepts.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialize",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct NavigationMeshSettings {
    mesh_name: String,
    max_tiles: u32,
    tile_size: u16,
    cell_size: f32,
    cell_height: f32,
    height_range: Option<(f32, f32)>,
    agent_height: f32,
    agent_radius: f32,
    agent_max_climb: f32,
    agent_max_slope: f32,
    region_min_size: f32,
    region_merge_size: f32,
    edge_max_length: f32,
    edge_max_error: f32,
    detail_sample_distance: f32,
    detail_sample_max_error: f32,
    padding: Vec3,
    partition_type: PartitionType,
}

impl Default for NavigationMeshSettings {
    fn default() -> Self {
        Self {
            mesh_name: String::new(),
            max_tiles: DEFAULT_MAX_TILES,
            tile_size: 128,
            cell_size: 0.3,
            cell_height: 0.2,
            height_range: None,
            agent_height: 2.0,
            agent_radius: 0.6,
            agent_max_climb: 0.9,
            agent_max_slope: 45.0,
            region_min_size: 8.0,
            region_merge_size: 20.0,
            edge_max_length: 12.0,
            edge_max_error: 1.3,
            detail_sample_distance: 6.0,
            detail_sample_max_error: 1.0,
            padding: Vec3::ONE,
            partition_type: PartitionType::Watershed,
        }
    }
}

impl NavigationMeshSettings {
    /// A free-form name of the mesh.
    pub fn mesh_name(&self) -> &str {
        &self.mesh_name
    }

    /// Sets the name of the mesh.
    pub fn set_mesh_name(&mut self, name: impl Into<String>) {
        self.mesh_name = name.into();
    }

    /// The tile capacity used by [`NavigationMesh::allocate`](crate::NavigationMesh::allocate).
    /// [`NavigationMesh::rebuild`](crate::NavigationMesh::rebuild) replaces it with a value derived from the scene.
    pub fn max_tiles(&self) -> u32 {
        self.max_tiles
    }

    /// Sets the tile capacity. Rounded up to a power of two and capped so every tile can hold polygons.
    pub fn set_max_tiles(&mut self, max_tiles: u32) {
        self.max_tiles = max_tiles.clamp(1, 1 << (POLY_REF_BITS - 1)).next_power_of_two();
    }

    /// Edge length of a tile in cells.
    pub fn tile_size(&self) -> u16 {
        self.tile_size
    }

    /// Sets the edge length of a tile in cells, at least 16.
    pub fn set_tile_size(&mut self, size: u16) {
        self.tile_size = size.max(16);
    }

    /// Horizontal voxel size.
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Sets the horizontal voxel size.
    pub fn set_cell_size(&mut self, size: f32) {
        self.cell_size = size.max(f32::EPSILON);
    }

    /// Vertical voxel size.
    pub fn cell_height(&self) -> f32 {
        self.cell_height
    }

    /// Sets the vertical voxel size.
    pub fn set_cell_height(&mut self, height: f32) {
        self.cell_height = height.max(f32::EPSILON);
    }

    /// A fixed vertical extent for every tile, if set and non-empty.
    ///
    /// Without it the vertical extent of a tile follows the geometry inside its column.
    pub fn height_range(&self) -> Option<(f32, f32)> {
        self.height_range.filter(|(min, max)| min < max)
    }

    /// Sets or clears the vertical extent of every tile.
    pub fn set_height_range(&mut self, range: Option<(f32, f32)>) {
        self.height_range = range;
    }

    /// Height of the agent.
    pub fn agent_height(&self) -> f32 {
        self.agent_height
    }

    /// Sets the height of the agent.
    pub fn set_agent_height(&mut self, height: f32) {
        self.agent_height = height.max(f32::EPSILON);
    }

    /// Radius of the agent. Walkable areas are eroded by it.
    pub fn agent_radius(&self) -> f32 {
        self.agent_radius
    }

    /// Sets the radius of the agent.
    pub fn set_agent_radius(&mut self, radius: f32) {
        self.agent_radius = radius.max(f32::EPSILON);
    }

    /// Highest ledge the agent can step over.
    pub fn agent_max_climb(&self) -> f32 {
        self.agent_max_climb
    }

    /// Sets the highest ledge the agent can step over.
    pub fn set_agent_max_climb(&mut self, climb: f32) {
        self.agent_max_climb = climb.max(f32::EPSILON);
    }

    /// Steepest walkable slope in degrees.
    pub fn agent_max_slope(&self) -> f32 {
        self.agent_max_slope
    }

    /// Sets the steepest walkable slope in degrees.
    pub fn set_agent_max_slope(&mut self, degrees: f32) {
        self.agent_max_slope = degrees.max(0.0);
    }

    /// Regions smaller than this are removed. Its square root is used as the voxel count.
    pub fn region_min_size(&self) -> f32 {
        self.region_min_size
    }

    /// Sets the minimum region size.
    pub fn set_region_min_size(&mut self, size: f32) {
        self.region_min_size = size.max(f32::EPSILON);
    }

    /// Regions smaller than this are merged into neighbours when possible.
    pub fn region_merge_size(&self) -> f32 {
        self.region_merge_size
    }

    /// Sets the region merge size.
    pub fn set_region_merge_size(&mut self, size: f32) {
        self.region_merge_size = size.max(f32::EPSILON);
    }

    /// Longest contour edge along the mesh border.
    pub fn edge_max_length(&self) -> f32 {
        self.edge_max_length
    }

    /// Sets the longest contour edge along the mesh border.
    pub fn set_edge_max_length(&mut self, length: f32) {
        self.edge_max_length = length.max(f32::EPSILON);
    }

    /// Largest deviation of a simplified contour from the voxel outline, in cells.
    pub fn edge_max_error(&self) -> f32 {
        self.edge_max_error
    }

    /// Sets the contour simplification error.
    pub fn set_edge_max_error(&mut self, error: f32) {
        self.edge_max_error = error.max(f32::EPSILON);
    }

    /// Detail sampling distance in cells.
    pub fn detail_sample_distance(&self) -> f32 {
        self.detail_sample_distance
    }

    /// Sets the detail sampling distance. Values below 0.9 disable height sampling.
    pub fn set_detail_sample_distance(&mut self, distance: f32) {
        self.detail_sample_distance = distance.max(f32::EPSILON);
    }

    /// Detail sampling error in cell heights.
    pub fn detail_sample_max_error(&self) -> f32 {
        self.detail_sample_max_error
    }

    /// Sets the detail sampling error.
    pub fn set_detail_sample_max_error(&mut self, error: f32) {
        self.detail_sample_max_error = error.max(f32::EPSILON);
    }

    /// Padding added around the scene bounds, and vertically around every tile.
    pub fn padding(&self) -> Vec3 {
        self.padding
    }

    /// Sets the bounding box padding.
    pub fn set_padding(&mut self, padding: Vec3) {
        self.padding = padding;
    }

    /// How walkable areas are split into regions.
    pub fn partition_type(&self) -> PartitionType {
        self.partition_type
    }

    /// Sets the partition algorithm.
    pub fn set_partition_type(&mut self, partition_type: PartitionType) {
        self.partition_type = partition_type;
    }

    /// Edge length of a tile in world units.
    pub fn tile_edge_length(&self) -> f32 {
        self.tile_size as f32 * self.cell_size
    }

    /// The voxel pipeline configuration for a tile whose unpadded bounds are `tile_bounds`.
    pub(crate) fn tile_config(&self, tile_bounds: Aabb3d) -> NavmeshConfigBuilder {
        let mut aabb = tile_bounds;
        aabb.min.y -= self.padding.y;
        aabb.max.y += self.padding.y;
        NavmeshConfigBuilder {
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            agent_height: self.agent_height,
            agent_radius: self.agent_radius,
            agent_max_climb: self.agent_max_climb,
            agent_max_slope: self.agent_max_slope.to_radians(),
            region_min_size: self.region_min_size,
            region_merge_size: self.region_merge_size,
            edge_max_len: self.edge_max_length,
            edge_max_error: self.edge_max_error,
            verts_per_poly: VERTICES_PER_POLYGON,
            detail_sample_dist: self.detail_sample_distance,
            detail_sample_max_error: self.detail_sample_max_error,
            tile_size: self.tile_size,
            aabb,
            tiling: true,
            partition: self.partition_type,
            ..Default::default()
        }
    }
}
