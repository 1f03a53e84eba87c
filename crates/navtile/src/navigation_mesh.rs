use std::sync::mpsc;

use glam::{Affine3A, IVec2, Vec3};
use slotmap::SlotMap;
use navtile_detour::{NavMesh, NavMeshError, NavMeshParams, QueryFilter, TileRef};
use navtile_recast::Aabb3d;
use rand::{SeedableRng as _, rngs::StdRng};

use crate::{
    collector::{NavAreaVolume, NavigationGeometryInfo},
    error::AddTileError,
    events::{EventSender, NavigationEvent},
    obstacles::{NavObstacle, ObstacleKey},
    persistence,
    settings::{NavigationMeshSettings, POLY_REF_BITS},
};

/// A tiled navigation mesh owned by a scene node.
///
/// Tiles are built from the geometry below that node and stored in its local space.
/// Queries take and return world-space positions and convert them with [`NavigationMesh::world_transform`].
#[derive(Debug)]
pub struct NavigationMesh {
    pub(crate) settings: NavigationMeshSettings,
    pub(crate) world_transform: Affine3A,
    pub(crate) nav_mesh: Option<NavMesh>,
    pub(crate) filter: QueryFilter,
    pub(crate) areas: Vec<NavAreaVolume>,
    pub(crate) obstacles: SlotMap<ObstacleKey, NavObstacle>,
    /// Sources of the last build, kept to rebuild tiles around obstacles.
    pub(crate) geometry: Option<Vec<NavigationGeometryInfo>>,
    pub(crate) events: EventSender,
    pub(crate) rng: StdRng,
}

impl Default for NavigationMesh {
    fn default() -> Self {
        Self::new(NavigationMeshSettings::default())
    }
}

impl NavigationMesh {
    /// An unallocated mesh.
    pub fn new(settings: NavigationMeshSettings) -> Self {
        Self {
            settings,
            world_transform: Affine3A::IDENTITY,
            nav_mesh: None,
            filter: QueryFilter::default(),
            areas: Vec::new(),
            obstacles: SlotMap::with_key(),
            geometry: None,
            events: EventSender::default(),
            rng: StdRng::from_entropy(),
        }
    }

    /// The build parameters.
    pub fn settings(&self) -> &NavigationMeshSettings {
        &self.settings
    }

    /// The build parameters. Changes apply to tiles built afterwards.
    pub fn settings_mut(&mut self) -> &mut NavigationMeshSettings {
        &mut self.settings
    }

    /// The world transform of the owning node.
    pub fn world_transform(&self) -> Affine3A {
        self.world_transform
    }

    /// Sets the world transform of the owning node. Builds overwrite it with the transform of their root.
    pub fn set_world_transform(&mut self, transform: Affine3A) {
        self.world_transform = transform;
    }

    /// The underlying tile store, if allocated.
    pub fn nav_mesh(&self) -> Option<&NavMesh> {
        self.nav_mesh.as_ref()
    }

    /// Returns `true` once [`allocate`](Self::allocate), a build or a load has created the tile store.
    pub fn is_allocated(&self) -> bool {
        self.nav_mesh.is_some()
    }

    /// The area volumes found by the last geometry collection.
    pub fn nav_areas(&self) -> &[NavAreaVolume] {
        &self.areas
    }

    /// Calls `callback` for every future event.
    pub fn subscribe(&mut self, callback: impl FnMut(&NavigationEvent) + Send + 'static) {
        self.events.subscribe(callback);
    }

    /// A channel receiving every future event.
    pub fn channel(&mut self) -> mpsc::Receiver<NavigationEvent> {
        self.events.channel()
    }

    /// The cost multiplier of an area in the default query filter.
    pub fn area_cost(&self, area_id: u8) -> f32 {
        self.filter.area_cost(area_id)
    }

    /// Sets the cost multiplier of an area in the default query filter.
    pub fn set_area_cost(&mut self, area_id: u8, cost: f32) {
        self.filter.set_area_cost(area_id, cost);
    }

    /// The filter used by queries that are not given one.
    pub fn query_filter(&self) -> &QueryFilter {
        &self.filter
    }

    /// The filter used by queries that are not given one.
    pub fn query_filter_mut(&mut self) -> &mut QueryFilter {
        &mut self.filter
    }

    /// Reseeds the generator behind the random point queries.
    pub fn set_random_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Creates an empty tile store with [`NavigationMeshSettings::max_tiles`] tiles.
    pub fn allocate(&mut self) -> Result<(), NavMeshError> {
        let max_tiles = self.settings.max_tiles();
        self.allocate_mesh(max_tiles)?;
        tracing::debug!("Allocated empty navigation mesh with max {max_tiles} tiles");
        self.events.send(NavigationEvent::MeshRebuilt);
        Ok(())
    }

    /// Sets the tile capacity and creates an empty tile store.
    pub fn allocate_with(&mut self, max_tiles: u32) -> Result<(), NavMeshError> {
        self.settings.set_max_tiles(max_tiles);
        self.allocate()
    }

    /// Replaces the tile store. The mesh is left unallocated on failure.
    pub(crate) fn allocate_mesh(&mut self, max_tiles: u32) -> Result<(), NavMeshError> {
        self.clear();
        // Tiles and polygons share the reference bits.
        let tile_bits = max_tiles.max(1).ilog2();
        let max_polys = 1 << POLY_REF_BITS.saturating_sub(tile_bits);
        let tile_edge_length = self.settings.tile_edge_length();
        let nav_mesh = NavMesh::new(NavMeshParams {
            origin: Vec3::ZERO,
            tile_width: tile_edge_length,
            tile_height: tile_edge_length,
            max_tiles,
            max_polys,
        })
        .inspect_err(|err| tracing::error!("Could not initialize navigation mesh: {err}"))?;
        self.nav_mesh = Some(nav_mesh);
        Ok(())
    }

    /// Releases all tiles and the tile store. Obstacles stay registered.
    pub fn clear(&mut self) {
        self.nav_mesh = None;
        self.geometry = None;
    }

    /// The tile column containing a world-space position.
    pub fn tile_index(&self, world_position: Vec3) -> IVec2 {
        self.local_tile_index(self.world_transform.inverse().transform_point3(world_position))
    }

    pub(crate) fn local_tile_index(&self, position: Vec3) -> IVec2 {
        let tile_edge_length = self.settings.tile_edge_length();
        IVec2::new(
            (position.x / tile_edge_length).floor() as i32,
            (position.z / tile_edge_length).floor() as i32,
        )
    }

    /// The bounds of a tile column in navigation mesh space.
    ///
    /// Vertically it spans the configured height range, or everything if there is none.
    pub fn tile_bounding_box_column(&self, index: IVec2) -> Aabb3d {
        let (min_y, max_y) = self.settings.height_range().unwrap_or((f32::MIN, f32::MAX));
        let edge = self.settings.tile_edge_length();
        Aabb3d::from_min_max(
            Vec3::new(index.x as f32 * edge, min_y, index.y as f32 * edge),
            Vec3::new((index.x + 1) as f32 * edge, max_y, (index.y + 1) as f32 * edge),
        )
    }

    /// Returns `true` if any layer exists at the tile column.
    pub fn has_tile(&self, index: IVec2) -> bool {
        self.nav_mesh
            .as_ref()
            .is_some_and(|nav_mesh| nav_mesh.tiles_at(index.x, index.y).next().is_some())
    }

    /// The column of every stored tile, in slot order.
    pub fn all_tile_indices(&self) -> Vec<IVec2> {
        let Some(nav_mesh) = &self.nav_mesh else {
            return Vec::new();
        };
        nav_mesh
            .tiles()
            .map(|tile| IVec2::new(tile.data().header.x, tile.data().header.z))
            .collect()
    }

    /// The first layer of a tile column as a tile block, empty if there is no such tile.
    ///
    /// The block can be passed to [`add_tile`](Self::add_tile) of a mesh with the same parameters.
    pub fn tile_data(&self, index: IVec2) -> Vec<u8> {
        let Some(tile) = self
            .nav_mesh
            .as_ref()
            .and_then(|nav_mesh| nav_mesh.tile_at(index.x, index.y, 0))
        else {
            return Vec::new();
        };
        let mut block = Vec::new();
        persistence::write_tile(&mut block, tile.data());
        block
    }

    /// Adds a tile block written by [`tile_data`](Self::tile_data).
    pub fn add_tile(&mut self, block: &[u8]) -> Result<(), AddTileError> {
        let mut reader = block;
        let index = self
            .read_tile(&mut reader)
            .inspect_err(|err| tracing::error!("{err}"))?;
        self.events.send(NavigationEvent::TileAdded(index));
        Ok(())
    }

    /// Removes every layer of a tile column.
    pub fn remove_tile(&mut self, index: IVec2) {
        let Some(nav_mesh) = &mut self.nav_mesh else {
            return;
        };
        let refs: Vec<TileRef> = nav_mesh
            .tiles_at(index.x, index.y)
            .map(|tile| nav_mesh.tile_ref(tile))
            .collect();
        for &tile_ref in &refs {
            if let Err(err) = nav_mesh.remove_tile(tile_ref) {
                tracing::warn!("Could not remove navigation mesh tile {index}: {err}");
            }
        }
        if !refs.is_empty() {
            self.events.send(NavigationEvent::TileRemoved(index));
        }
    }

    /// Removes all tiles. The store stays allocated.
    pub fn remove_all_tiles(&mut self) {
        let Some(nav_mesh) = &mut self.nav_mesh else {
            return;
        };
        let refs: Vec<TileRef> = nav_mesh.tiles().map(|tile| nav_mesh.tile_ref(tile)).collect();
        for tile_ref in refs {
            if let Err(err) = nav_mesh.remove_tile(tile_ref) {
                tracing::warn!("Could not remove navigation mesh tile: {err}");
            }
        }
        self.events.send(NavigationEvent::AllTilesRemoved);
    }
}
