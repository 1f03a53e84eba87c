use thiserror::Error;

use crate::{
    Aabb3d, AreaType, CompactHeightfield, DetailNavmesh, NavmeshConfig, PartitionType,
    PolygonMesh, TriMesh,
    compact_heightfield::CompactHeightfieldError,
    detail_mesh::DetailNavmeshError,
    heightfield::{Heightfield, HeightfieldError},
    poly_mesh::PolygonMeshError,
    rasterize::RasterizationError,
    region::RegionError,
};

/// The output of a full Recast build: the polygon mesh and its height detail.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshMeshes {
    /// The convex polygons of the walkable surface.
    pub polygon_mesh: PolygonMesh,
    /// The height detail of [`NavmeshMeshes::polygon_mesh`].
    pub detail_mesh: DetailNavmesh,
}

/// An axis-aligned volume that overrides the area of every walkable span inside it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct AreaBox {
    /// The bounds of the volume in the same space as the input geometry.
    pub aabb: Aabb3d,
    /// The area to stamp.
    pub area: AreaType,
}

/// The stage of [`NavmeshConfig::build_meshes`] that failed.
#[derive(Error, Debug)]
pub enum NavmeshBuildError {
    /// The heightfield could not be created.
    #[error("Could not create heightfield: {0}")]
    Heightfield(#[from] HeightfieldError),
    /// The triangles could not be rasterized.
    #[error("Could not rasterize triangles: {0}")]
    Rasterization(#[from] RasterizationError),
    /// The compact heightfield could not be built.
    #[error("Could not build compact heightfield: {0}")]
    CompactHeightfield(#[from] CompactHeightfieldError),
    /// Region partitioning failed.
    #[error("Could not build regions: {0}")]
    Regions(#[from] RegionError),
    /// The contours could not be triangulated.
    #[error("Could not triangulate contours: {0}")]
    PolygonMesh(#[from] PolygonMeshError),
    /// The detail mesh could not be built.
    #[error("Could not build detail mesh: {0}")]
    DetailMesh(#[from] DetailNavmeshError),
}

impl Heightfield {
    /// Rasterizes `trimesh`, whose areas must already be marked, and clears every surface
    /// an agent with the given height and climb (in voxels) cannot stand on.
    pub fn populate_from_trimesh(
        &mut self,
        trimesh: &TriMesh,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<(), RasterizationError> {
        // Areas of surfaces within one step of each other merge.
        self.rasterize_triangles(trimesh, walkable_climb)?;
        self.filter_low_hanging_walkable_obstacles(walkable_climb);
        self.filter_walkable_low_height_spans(walkable_height);
        self.filter_ledge_spans(walkable_height, walkable_climb);
        Ok(())
    }
}

impl NavmeshConfig {
    /// Runs the whole voxel pipeline over `trimesh`.
    ///
    /// Triangles are classified by [`NavmeshConfig::walkable_slope_angle`] first.
    /// `area_boxes` are stamped after erosion, so they take precedence over the areas of the geometry.
    /// [`NavmeshConfig::area_cylinders`] go last.
    /// Returns an empty [`NavmeshMeshes`] if nothing is walkable.
    pub fn build_meshes(
        &self,
        mut trimesh: TriMesh,
        area_boxes: &[AreaBox],
    ) -> Result<NavmeshMeshes, NavmeshBuildError> {
        trimesh.mark_walkable_triangles(self.walkable_slope_angle);

        let mut heightfield = Heightfield::with_size(
            self.aabb,
            self.cell_size,
            self.cell_height,
            self.width,
            self.height,
        )?;
        heightfield.populate_from_trimesh(&trimesh, self.walkable_height, self.walkable_climb)?;

        let mut compact = heightfield.into_compact(self.walkable_height, self.walkable_climb)?;
        compact.erode_walkable_area(self.walkable_radius);
        for volume in &self.area_volumes {
            compact.mark_convex_poly_area(volume);
        }
        for area_box in area_boxes {
            compact.mark_box_area(&area_box.aabb, area_box.area);
        }
        for cylinder in &self.area_cylinders {
            compact.mark_cylinder_area(cylinder);
        }

        self.partition(&mut compact)?;

        let contours =
            compact.build_contours(self.max_simplification_error, self.max_edge_len, self.contour_flags);
        tracing::debug!("Built {} contours", contours.contours.len());
        let polygon_mesh = contours.into_polygon_mesh(self.max_vertices_per_polygon as usize)?;
        let detail_mesh = DetailNavmesh::new(
            &polygon_mesh,
            &compact,
            self.detail_sample_dist,
            self.detail_sample_max_error,
        )?;
        Ok(NavmeshMeshes {
            polygon_mesh,
            detail_mesh,
        })
    }

    fn partition(&self, compact: &mut CompactHeightfield) -> Result<(), RegionError> {
        match self.partition {
            PartitionType::Watershed => {
                compact.build_distance_field();
                compact.build_regions(self.border_size, self.min_region_area, self.merge_region_area)
            }
            PartitionType::Monotone => compact.build_regions_monotone(
                self.border_size,
                self.min_region_area,
                self.merge_region_area,
            ),
        }
    }
}
