use crate::{Aabb3d, AreaCylinder, BuildContoursFlags, ConvexVolume};

/// How walkable spans are grouped into regions before contours are traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum PartitionType {
    /// Flood regions outwards from the spans farthest from any border.
    ///
    /// Gives the best shaped polygons. Needs the distance field.
    #[default]
    Watershed,
    /// Sweep rows and glue together runs that line up.
    ///
    /// Fast and never produces holes, but polygons come out long and thin.
    Monotone,
}

/// Voxel-space parameters of one build.
///
/// Lengths suffixed `vx` are in cells (xz) or voxels (y), everything else in world units.
/// Derive one from agent dimensions with [`NavmeshConfigBuilder`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfig {
    /// Columns along x, border included.
    pub width: u16,
    /// Columns along z, border included.
    pub height: u16,
    /// Cells along each side of a tile, border excluded.
    pub tile_size: u16,
    /// Cells of neighboring geometry rasterized around a tile so its edges line up. vx
    pub border_size: u16,
    /// Column edge length.
    pub cell_size: f32,
    /// Voxel height.
    pub cell_height: f32,
    /// Field bounds, border included.
    pub aabb: Aabb3d,
    /// Steepest walkable triangle, in radians from up.
    pub walkable_slope_angle: f32,
    /// Clearance an agent needs. vx
    pub walkable_height: u16,
    /// Ledge an agent can step up or down. vx
    pub walkable_climb: u16,
    /// How far walkable space is pulled back from walls. vx
    pub walkable_radius: u16,
    /// Longest contour edge along the mesh border, 0 for no limit. vx
    pub max_edge_len: u16,
    /// How far a simplified contour may stray from the voxel outline. vx
    pub max_simplification_error: f32,
    /// Regions with fewer spans are dropped unless they touch the border. vx
    pub min_region_area: u16,
    /// Regions with fewer spans are merged into a neighbor when possible. vx
    pub merge_region_area: u16,
    /// Polygon vertex limit.
    pub max_vertices_per_polygon: u16,
    /// Spacing of height samples in the detail mesh, 0 to only use polygon vertices.
    pub detail_sample_dist: f32,
    /// How far the detail surface may stray from the voxels.
    pub detail_sample_max_error: f32,
    /// Contour tracing options.
    pub contour_flags: BuildContoursFlags,
    /// Region partitioning.
    pub partition: PartitionType,
    /// Volumes stamped into the compact field before partitioning.
    pub area_volumes: Vec<ConvexVolume>,
    /// Cylinders stamped last, over every other area.
    pub area_cylinders: Vec<AreaCylinder>,
}

/// Agent dimensions and quality knobs in world units, converted into a [`NavmeshConfig`].
///
/// The defaults describe a human sized agent on a 0.3 unit grid.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfigBuilder {
    /// Column edge length.
    pub cell_size: f32,
    /// Voxel height.
    pub cell_height: f32,
    /// Agent height.
    pub agent_height: f32,
    /// Agent radius.
    pub agent_radius: f32,
    /// Highest step.
    pub agent_max_climb: f32,
    /// Steepest slope in radians.
    pub agent_max_slope: f32,
    /// Square of the smallest region edge in cells.
    pub region_min_size: f32,
    /// Square of the region edge in cells below which regions get merged.
    pub region_merge_size: f32,
    /// Longest border edge.
    pub edge_max_len: f32,
    /// Contour simplification error in cells.
    pub edge_max_error: f32,
    /// Polygon vertex limit.
    pub verts_per_poly: u16,
    /// Detail sample spacing in cells. Below 0.9 sampling is off.
    pub detail_sample_dist: f32,
    /// Detail error in voxels.
    pub detail_sample_max_error: f32,
    /// Cells along each side of a tile.
    pub tile_size: u16,
    /// Field bounds. For tiles, the bounds of the tile without its border.
    pub aabb: Aabb3d,
    /// Contour tracing options.
    pub contour_flags: BuildContoursFlags,
    /// Builds a tile with a border of `walkable_radius + 3` cells instead of a single field.
    pub tiling: bool,
    /// Region partitioning.
    pub partition: PartitionType,
    /// Volumes stamped into the compact field before partitioning.
    pub area_volumes: Vec<ConvexVolume>,
    /// Cylinders stamped last, over every other area.
    pub area_cylinders: Vec<AreaCylinder>,
}

impl Default for NavmeshConfigBuilder {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            agent_height: 2.0,
            agent_radius: 0.6,
            agent_max_climb: 0.9,
            agent_max_slope: 45.0_f32.to_radians(),
            region_min_size: 8.0,
            region_merge_size: 20.0,
            edge_max_len: 12.0,
            edge_max_error: 1.3,
            verts_per_poly: 6,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            tile_size: 128,
            aabb: Aabb3d::default(),
            contour_flags: BuildContoursFlags::default(),
            tiling: false,
            partition: PartitionType::default(),
            area_volumes: Vec::new(),
            area_cylinders: Vec::new(),
        }
    }
}

impl NavmeshConfigBuilder {
    /// Cells of border around a tile.
    fn border_cells(&self, walkable_radius: u16) -> u16 {
        if self.tiling { walkable_radius.saturating_add(3) } else { 0 }
    }

    /// Columns needed to cover `extent` world units.
    fn columns(&self, extent: f32) -> u16 {
        (extent / self.cell_size + 0.5) as u16
    }

    /// Converts to voxel units. Tiles get their bounds grown by the border on x and z.
    pub fn build(self) -> NavmeshConfig {
        let walkable_radius = (self.agent_radius / self.cell_size).ceil() as u16;
        let border_size = self.border_cells(walkable_radius);

        let mut aabb = self.aabb;
        let (width, height) = if self.tiling {
            let pad = border_size as f32 * self.cell_size;
            aabb.min.x -= pad;
            aabb.min.z -= pad;
            aabb.max.x += pad;
            aabb.max.z += pad;
            let side = self.tile_size.saturating_add(border_size.saturating_mul(2));
            (side, side)
        } else {
            let size = aabb.size();
            (self.columns(size.x), self.columns(size.z))
        };

        let detail_sample_dist = match self.detail_sample_dist {
            cells if cells < 0.9 => 0.0,
            cells => cells * self.cell_size,
        };

        NavmeshConfig {
            width,
            height,
            tile_size: self.tile_size,
            border_size,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            aabb,
            walkable_slope_angle: self.agent_max_slope,
            walkable_height: (self.agent_height / self.cell_height).ceil() as u16,
            walkable_climb: (self.agent_max_climb / self.cell_height).floor() as u16,
            walkable_radius,
            max_edge_len: (self.edge_max_len / self.cell_size) as u16,
            max_simplification_error: self.edge_max_error,
            min_region_area: self.region_min_size.sqrt() as u16,
            merge_region_area: self.region_merge_size.sqrt() as u16,
            max_vertices_per_polygon: self.verts_per_poly,
            detail_sample_dist,
            detail_sample_max_error: self.detail_sample_max_error * self.cell_height,
            contour_flags: self.contour_flags,
            partition: self.partition,
            area_volumes: self.area_volumes,
            area_cylinders: self.area_cylinders,
        }
    }
}
