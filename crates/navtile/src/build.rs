//! Building tiles from scene geometry.

use glam::{IVec2, Vec3, Vec3A};
use navtile_detour::{NavMeshCreateParams, NavMeshError, create_tile_data};
use navtile_recast::{Aabb3d, AreaType, NavmeshMeshes, TriMesh};

use crate::{
    NavigationMesh,
    collector::{NavigableSource, NavigationGeometryInfo, calculate_bounding_box, collect_geometries},
    error::BuildTileError,
    events::NavigationEvent,
    scene::SceneNode,
    settings::{DEFAULT_MAX_TILES, POLY_REF_BITS},
};

/// The smallest power of two that fits one tile per column touched by `bounds`.
///
/// At least one polygon per tile must stay addressable, so the result never exceeds `2^21`.
pub fn calculate_max_tiles(bounds: &Aabb3d, tile_size: u16, cell_size: f32) -> u32 {
    let tile_edge_length = tile_size as f32 * cell_size;
    let first = (bounds.min / tile_edge_length).floor();
    let last = (bounds.max / tile_edge_length).floor();
    let tiles_x = (last.x - first.x).max(0.0) as u64 + 1;
    let tiles_z = (last.z - first.z).max(0.0) as u64 + 1;
    let limit = 1u64 << (POLY_REF_BITS - 1);
    (tiles_x * tiles_z).min(limit).next_power_of_two() as u32
}

/// Outcome of a successful [`NavigationMesh::build_tile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileBuild {
    /// A tile was built and added to the mesh.
    Stored,
    /// The column holds nothing walkable. No tile is stored, which is not an error.
    Empty,
}

impl NavigationMesh {
    /// Collects the geometry below `root` and rebuilds the whole mesh from it.
    ///
    /// The world transform is taken from `root`, and the tile capacity is sized to the scene.
    /// Tiles that fail to build are logged and skipped. Fails only if the tile store cannot be created.
    /// The registered obstacles are replaced by the enabled obstacles of the scene, each announced once
    /// the mesh is built.
    pub fn rebuild(&mut self, root: &SceneNode) -> Result<(), NavMeshError> {
        self.world_transform = root.transform;
        let collected = collect_geometries(root);
        self.areas = collected.areas;

        let bounds = calculate_bounding_box(&collected.geometry, self.settings.padding());
        let max_tiles = bounds
            .map(|bounds| {
                calculate_max_tiles(&bounds, self.settings.tile_size(), self.settings.cell_size())
            })
            .unwrap_or(DEFAULT_MAX_TILES);
        self.settings.set_max_tiles(max_tiles);
        self.allocate_mesh(self.settings.max_tiles())?;
        self.obstacles.clear();
        for obstacle in &collected.obstacles {
            self.obstacles.insert(*obstacle);
        }

        if let Some(bounds) = bounds {
            let from = self.local_tile_index(bounds.min.into());
            let to = self.local_tile_index(bounds.max.into());
            self.build_tiles_from_geometry(&collected.geometry, from, to);
        }
        self.geometry = Some(collected.geometry);
        tracing::debug!(
            "Built navigation mesh with max {} tiles",
            self.settings.max_tiles()
        );
        self.events.send(NavigationEvent::MeshRebuilt);
        for obstacle in collected.obstacles {
            self.events.send(NavigationEvent::ObstacleAdded {
                position: obstacle.position,
                radius: obstacle.radius,
                height: obstacle.height,
            });
        }
        Ok(())
    }

    /// Rebuilds the tiles overlapping `bounds`, given in navigation mesh space.
    ///
    /// Returns how many tiles were built, empty ones included. Every tile in the range is announced as added.
    pub fn build_tiles_in_region(&mut self, root: &SceneNode, bounds: &Aabb3d) -> Result<u32, BuildTileError> {
        let from = self.local_tile_index(bounds.min.into());
        let to = self.local_tile_index(bounds.max.into());
        self.build_tiles(root, from, to)
    }

    /// Rebuilds the tiles from `from` to `to`, both inclusive.
    ///
    /// Returns how many tiles were built, empty ones included. Every tile in the range is announced as added.
    pub fn build_tiles(&mut self, root: &SceneNode, from: IVec2, to: IVec2) -> Result<u32, BuildTileError> {
        if !self.is_allocated() {
            tracing::error!("{}", BuildTileError::NotAllocated);
            return Err(BuildTileError::NotAllocated);
        }
        self.world_transform = root.transform;
        let collected = collect_geometries(root);
        self.areas = collected.areas;

        let built = self.build_tiles_from_geometry(&collected.geometry, from, to);
        self.geometry = Some(collected.geometry);
        tracing::debug!("Rebuilt {built} tiles of the navigation mesh");
        for z in from.y..=to.y {
            for x in from.x..=to.x {
                self.events.send(NavigationEvent::TileAdded(IVec2::new(x, z)));
            }
        }
        Ok(built)
    }

    fn build_tiles_from_geometry(&mut self, geometry: &[NavigationGeometryInfo], from: IVec2, to: IVec2) -> u32 {
        let mut built = 0;
        for z in from.y..=to.y {
            for x in from.x..=to.x {
                match self.build_tile(geometry, x, z) {
                    Ok(_) => built += 1,
                    Err(err) => tracing::error!("Could not build navigation mesh tile ({x}, {z}): {err}"),
                }
            }
        }
        built
    }

    /// Replaces the tile at `(x, z)` with one built from `geometry`.
    ///
    /// The old tile is removed first. Registered obstacles reaching into the column are cut out of it.
    /// A column with nothing walkable yields [`TileBuild::Empty`].
    pub fn build_tile(
        &mut self,
        geometry: &[NavigationGeometryInfo],
        x: i32,
        z: i32,
    ) -> Result<TileBuild, BuildTileError> {
        let nav_mesh = self.nav_mesh.as_mut().ok_or(BuildTileError::NotAllocated)?;
        if let Some(tile_ref) = nav_mesh.tile_ref_at(x, z, 0) {
            nav_mesh.remove_tile(tile_ref)?;
        }

        let column = self.tile_bounding_box_column(IVec2::new(x, z));
        let tile_bounds = if self.settings.height_range().is_some() {
            column
        } else {
            calculate_tile_bounding_box(geometry, column)
        };
        let mut builder = self.settings.tile_config(tile_bounds);
        builder.area_cylinders = self.obstacle_cylinders(IVec2::new(x, z));
        let config = builder.build();

        let mut trimesh = TriMesh::default();
        let mut connections = Vec::new();
        let mut area_boxes = Vec::new();
        for info in geometry.iter().filter(|info| info.bounds.intersects(&config.aabb)) {
            match &info.source {
                NavigableSource::TriMesh(mesh) => {
                    if !trimesh.extend(mesh.clone()) {
                        tracing::warn!("Tile ({x}, {z}) has too many vertices, skipping some geometry");
                    }
                }
                NavigableSource::OffMeshConnection(connection) => connections.push(*connection),
                NavigableSource::AreaVolume(area_box) => area_boxes.push(*area_box),
            }
        }
        if trimesh.is_empty() {
            tracing::debug!("Tile ({x}, {z}) has no geometry");
            return Ok(TileBuild::Empty);
        }

        let NavmeshMeshes {
            mut polygon_mesh,
            detail_mesh,
        } = config
            .build_meshes(trimesh, &area_boxes)
            .inspect_err(|err| tracing::error!("{err}"))?;
        for (flags, area) in polygon_mesh.flags.iter_mut().zip(&polygon_mesh.areas) {
            if *area != AreaType::NOT_WALKABLE {
                *flags = 1;
            }
        }

        let Some(data) = create_tile_data(&NavMeshCreateParams {
            polygon_mesh: &polygon_mesh,
            detail_mesh: Some(&detail_mesh),
            off_mesh_connections: &connections,
            walkable_height: self.settings.agent_height(),
            walkable_radius: self.settings.agent_radius(),
            walkable_climb: self.settings.agent_max_climb(),
            tile_x: x,
            tile_z: z,
            tile_layer: 0,
            user_id: 0,
        })?
        else {
            tracing::debug!("Tile ({x}, {z}) has no walkable polygons");
            return Ok(TileBuild::Empty);
        };

        let nav_mesh = self.nav_mesh.as_mut().ok_or(BuildTileError::NotAllocated)?;
        nav_mesh.add_tile(data)?;
        self.events.send(NavigationEvent::AreaRebuilt {
            bounds_min: tile_bounds.min.into(),
            bounds_max: tile_bounds.max.into(),
        });
        Ok(TileBuild::Stored)
    }
}

/// Shrinks a tile column vertically to the geometry inside it. A column without geometry gets zero height.
fn calculate_tile_bounding_box(geometry: &[NavigationGeometryInfo], column: Aabb3d) -> Aabb3d {
    let (min_y, max_y) = geometry
        .iter()
        .filter(|info| info.bounds.intersects(&column))
        .fold((f32::MAX, f32::MIN), |(min_y, max_y), info| {
            (min_y.min(info.bounds.min.y), max_y.max(info.bounds.max.y))
        });
    let (min_y, max_y) = if min_y > max_y { (0.0, 0.0) } else { (min_y, max_y) };
    Aabb3d::from_min_max(
        Vec3A::new(column.min.x, min_y, column.min.z),
        Vec3A::new(column.max.x, max_y, column.max.z),
    )
}

#[cfg(test)]
mod tests {
    use navtile_detour::OffMeshConnectionParams;
    use navtile_recast::AreaBox;

    use super::*;
    use crate::test_util::floor;

    fn info(min: Vec3, max: Vec3) -> NavigationGeometryInfo {
        NavigationGeometryInfo {
            source: NavigableSource::AreaVolume(AreaBox {
                aabb: Aabb3d::from_min_max(min, max),
                area: AreaType(3),
            }),
            bounds: Aabb3d::from_min_max(min, max),
        }
    }

    #[test]
    fn max_tiles_cover_every_touched_column() {
        let bounds = Aabb3d::from_min_max(Vec3::splat(-6.0), Vec3::splat(6.0));
        // Straddles the origin, so 2x2 columns.
        assert_eq!(calculate_max_tiles(&bounds, 128, 0.3), 4);
        let bounds = Aabb3d::from_min_max(Vec3::ZERO, Vec3::new(200.0, 1.0, 10.0));
        // 6 columns by 1.
        assert_eq!(calculate_max_tiles(&bounds, 128, 0.3), 8);
        let huge = Aabb3d::from_min_max(Vec3::splat(-1.0e6), Vec3::splat(1.0e6));
        assert_eq!(calculate_max_tiles(&huge, 16, 0.01), 1 << 21);
    }

    #[test]
    fn tile_height_follows_the_geometry() {
        let column = Aabb3d::from_min_max(Vec3::new(0.0, f32::MIN, 0.0), Vec3::new(10.0, f32::MAX, 10.0));
        let geometry = [
            info(Vec3::new(1.0, -2.0, 1.0), Vec3::new(2.0, 3.0, 2.0)),
            info(Vec3::new(5.0, 1.0, 5.0), Vec3::new(6.0, 7.0, 6.0)),
            info(Vec3::new(50.0, -90.0, 50.0), Vec3::new(60.0, 90.0, 60.0)),
        ];
        let bounds = calculate_tile_bounding_box(&geometry, column);
        assert_eq!(bounds.min, Vec3A::new(0.0, -2.0, 0.0));
        assert_eq!(bounds.max, Vec3A::new(10.0, 7.0, 10.0));

        let empty = calculate_tile_bounding_box(&geometry[2..], column);
        assert_eq!(empty.min.y, 0.0);
        assert_eq!(empty.max.y, 0.0);
    }

    #[test]
    fn build_tile_needs_an_allocated_mesh() {
        let mut mesh = NavigationMesh::default();
        assert!(matches!(mesh.build_tile(&[], 0, 0), Err(BuildTileError::NotAllocated)));
        assert!(matches!(
            mesh.build_tiles(&floor(10.0), IVec2::ZERO, IVec2::ZERO),
            Err(BuildTileError::NotAllocated)
        ));
    }

    #[test]
    fn tiles_without_triangles_build_empty() -> anyhow::Result<()> {
        let mut mesh = NavigationMesh::default();
        mesh.allocate_with(4)?;
        let connection_only = [NavigationGeometryInfo {
            source: NavigableSource::OffMeshConnection(OffMeshConnectionParams {
                start: Vec3::ONE,
                end: Vec3::splat(2.0),
                radius: 0.5,
                bidirectional: true,
                area: 0,
                flags: 1,
                user_id: 0,
            }),
            bounds: Aabb3d::from_min_max(Vec3::ZERO, Vec3::splat(3.0)),
        }];
        let events = mesh.channel();
        assert_eq!(mesh.build_tile(&connection_only, 0, 0)?, TileBuild::Empty);
        assert!(!mesh.has_tile(IVec2::ZERO));
        assert_eq!(events.try_iter().count(), 0);
        Ok(())
    }

    #[test]
    fn rebuild_builds_the_floor_tiles() -> anyhow::Result<()> {
        let mut mesh = NavigationMesh::default();
        let events = mesh.channel();
        mesh.rebuild(&floor(10.0))?;

        // Padded bounds straddle the origin on both axes.
        assert_eq!(mesh.settings().max_tiles(), 4);
        let mut tiles = mesh.all_tile_indices();
        tiles.sort_by_key(|index| (index.y, index.x));
        assert_eq!(
            tiles,
            vec![IVec2::new(-1, -1), IVec2::new(0, -1), IVec2::new(-1, 0), IVec2::new(0, 0)]
        );

        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(received.last(), Some(&NavigationEvent::MeshRebuilt));
        let rebuilt = received
            .iter()
            .filter(|event| matches!(event, NavigationEvent::AreaRebuilt { .. }))
            .count();
        assert_eq!(rebuilt, 4);
        Ok(())
    }

    #[test]
    fn building_a_range_announces_every_tile() -> anyhow::Result<()> {
        let root = floor(10.0);
        let mut mesh = NavigationMesh::default();
        mesh.rebuild(&root)?;
        let events = mesh.channel();

        // The second column is empty but still counts as built.
        let built = mesh.build_tiles(&root, IVec2::new(0, 0), IVec2::new(1, 0))?;
        assert_eq!(built, 2);
        let added: Vec<_> = events
            .try_iter()
            .filter(|event| matches!(event, NavigationEvent::TileAdded(_)))
            .collect();
        assert_eq!(
            added,
            vec![
                NavigationEvent::TileAdded(IVec2::new(0, 0)),
                NavigationEvent::TileAdded(IVec2::new(1, 0)),
            ]
        );
        assert!(mesh.has_tile(IVec2::ZERO));
        assert!(!mesh.has_tile(IVec2::new(1, 0)));
        Ok(())
    }
}
