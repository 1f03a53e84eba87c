//! The tiled polygon store.
//!
//! Tiles live in a fixed number of slots. Adding a tile links its polygons to each other, to the
//! polygons of the eight neighbouring tile columns and to off-mesh connections. Removing a tile
//! severs those links again and bumps the slot salt, which invalidates every reference into it.

use std::collections::HashMap;

use glam::Vec3;
use thiserror::Error;

use crate::{
    PolyRef, TileRef,
    math::{
        closest_height_point_triangle, dist_2d_sqr, dist_point_poly_edges_sqr,
        dist_point_segment_sqr_2d, opposite_side, point_in_polygon,
    },
    poly_ref::RefEncoding,
    tile_data::{
        EXT_LINK, INTERNAL_SIDE, MAX_VERTICES_PER_POLYGON, Poly, PolyType, TileData,
    },
};
use navtile_recast::DETAIL_EDGE_BOUNDARY;

/// The layout of a [`NavMesh`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMeshParams {
    /// World position of the corner of tile `(0, 0)`.
    pub origin: Vec3,
    /// Extent of a tile along x.
    pub tile_width: f32,
    /// Extent of a tile along z.
    pub tile_height: f32,
    /// Number of tile slots. Must be a power of two.
    pub max_tiles: u32,
    /// Maximum number of polygons per tile.
    pub max_polys: u32,
}

/// A connection from one polygon to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// The polygon on the other side.
    pub target: PolyRef,
    /// The edge of the owning polygon the link crosses, `0xff` for links onto off-mesh connections.
    pub edge: u8,
    /// The neighbour tile direction, [`INTERNAL_SIDE`] for links within a tile.
    pub side: u8,
    /// Start of the shared part of the edge, in 1/255ths of the edge.
    pub bmin: u8,
    /// End of the shared part of the edge, in 1/255ths of the edge.
    pub bmax: u8,
}

/// A tile stored in a [`NavMesh`].
#[derive(Debug, Clone)]
pub struct MeshTile {
    index: u32,
    salt: u32,
    data: TileData,
    links: Vec<Vec<Link>>,
}

impl MeshTile {
    /// The stored tile contents.
    #[inline]
    pub fn data(&self) -> &TileData {
        &self.data
    }

    /// The links leaving polygon `poly`.
    #[inline]
    pub fn links(&self, poly: usize) -> &[Link] {
        &self.links[poly]
    }

    /// Height of the surface of a ground polygon under `pos`, `None` if `pos` is not above the polygon.
    pub fn poly_height(&self, poly_index: usize, pos: Vec3) -> Option<f32> {
        let poly = &self.data.polygons[poly_index];
        if poly.poly_type == PolyType::OffMeshConnection {
            return None;
        }
        let mut vertices = [Vec3::ZERO; MAX_VERTICES_PER_POLYGON];
        let n = self.data.copy_poly_vertices(poly, &mut vertices);
        if !point_in_polygon(pos, &vertices[..n]) {
            return None;
        }

        let detail = self.data.detail_meshes.get(poly_index)?;
        for triangle in self.detail_triangles(poly_index) {
            let [a, b, c] = self.detail_triangle_vertices(detail.vertex_base, triangle);
            if let Some(height) = closest_height_point_triangle(pos, a, b, c) {
                return Some(height);
            }
        }

        // Only degenerate triangles or a point on an edge get here.
        Some(self.closest_point_on_detail_edges(poly_index, pos, false).y)
    }

    /// The closest point to `pos` on the detail edges of a ground polygon.
    pub(crate) fn closest_point_on_detail_edges(
        &self,
        poly_index: usize,
        pos: Vec3,
        only_boundary: bool,
    ) -> Vec3 {
        const ANY_BOUNDARY_EDGE: u8 =
            DETAIL_EDGE_BOUNDARY | (DETAIL_EDGE_BOUNDARY << 2) | (DETAIL_EDGE_BOUNDARY << 4);
        let Some(detail) = self.data.detail_meshes.get(poly_index) else {
            return pos;
        };
        let mut dmin = f32::MAX;
        let mut tmin = 0.0;
        let mut pmin = pos;
        let mut pmax = pos;
        for triangle in self.detail_triangles(poly_index) {
            if only_boundary && triangle[3] & ANY_BOUNDARY_EDGE == 0 {
                continue;
            }
            let v = self.detail_triangle_vertices(detail.vertex_base, triangle);
            let mut j = 2;
            for k in 0..3 {
                let edge_flags = (triangle[3] >> (j * 2)) & 0x3;
                if edge_flags & DETAIL_EDGE_BOUNDARY == 0 && (only_boundary || triangle[j] < triangle[k]) {
                    // Inner edge, seen from the other triangle.
                    j = k;
                    continue;
                }
                let (d, t) = dist_point_segment_sqr_2d(pos, v[j], v[k]);
                if d < dmin {
                    dmin = d;
                    tmin = t;
                    pmin = v[j];
                    pmax = v[k];
                }
                j = k;
            }
        }
        pmin.lerp(pmax, tmin)
    }

    fn detail_triangles(&self, poly_index: usize) -> &[[u8; 4]] {
        match self.data.detail_meshes.get(poly_index) {
            Some(detail) => {
                let start = detail.triangle_base as usize;
                &self.data.detail_triangles[start..start + detail.triangle_count as usize]
            }
            None => &[],
        }
    }

    #[inline]
    fn detail_triangle_vertices(&self, vertex_base: u32, triangle: &[u8; 4]) -> [Vec3; 3] {
        let base = vertex_base as usize;
        [
            self.data.detail_vertices[base + triangle[0] as usize],
            self.data.detail_vertices[base + triangle[1] as usize],
            self.data.detail_vertices[base + triangle[2] as usize],
        ]
    }

    /// Indices of the ground polygons whose bounds overlap the box.
    pub(crate) fn query_polygons(&self, qmin: Vec3, qmax: Vec3) -> impl Iterator<Item = usize> + '_ {
        self.data
            .polygons
            .iter()
            .enumerate()
            .filter(|(_, poly)| poly.poly_type == PolyType::Ground)
            .filter(move |(_, poly)| {
                let mut vertices = self.data.poly_vertices(poly);
                let Some(first) = vertices.next() else {
                    return false;
                };
                let (bmin, bmax) = vertices.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
                bmin.cmple(qmax).all() && bmax.cmpge(qmin).all()
            })
            .map(|(i, _)| i)
    }

    /// The nearest ground polygon of this tile within the box around `center`, and the closest point on it.
    fn find_nearest_poly(&self, center: Vec3, half_extents: Vec3) -> Option<(usize, Vec3)> {
        let mut nearest = None;
        let mut nearest_distance = f32::MAX;
        for index in self.query_polygons(center - half_extents, center + half_extents) {
            let (closest, over_poly) = self.closest_point_on_poly(index, center);
            let diff = center - closest;
            let distance = if over_poly {
                // Points above the surface within climb height count as on it.
                let d = diff.y.abs() - self.data.header.walkable_climb;
                if d > 0.0 { d * d } else { 0.0 }
            } else {
                diff.length_squared()
            };
            if distance < nearest_distance {
                nearest_distance = distance;
                nearest = Some((index, closest));
            }
        }
        nearest
    }

    /// The closest point on a polygon and whether `pos` lies above or below it.
    pub(crate) fn closest_point_on_poly(&self, poly_index: usize, pos: Vec3) -> (Vec3, bool) {
        if let Some(height) = self.poly_height(poly_index, pos) {
            return (Vec3::new(pos.x, height, pos.z), true);
        }
        let poly = &self.data.polygons[poly_index];
        if poly.poly_type == PolyType::OffMeshConnection {
            let v0 = self.data.vertices[poly.vertices[0] as usize];
            let v1 = self.data.vertices[poly.vertices[1] as usize];
            let (_, t) = dist_point_segment_sqr_2d(pos, v0, v1);
            return (v0.lerp(v1, t), false);
        }
        (self.closest_point_on_detail_edges(poly_index, pos, true), false)
    }
}

/// Errors from [`NavMesh`] operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavMeshError {
    /// Tile slot count is not a power of two.
    #[error("Maximum tile count {0} is not a power of two")]
    MaxTilesNotPowerOfTwo(u32),
    /// Tiles must be allowed at least one polygon.
    #[error("Maximum polygon count per tile must be at least 1")]
    NoPolygonsPerTile,
    /// Tile and polygon indices do not fit into a reference.
    #[error(
        "{tile_bits} tile bits and {poly_bits} polygon bits exceed the {} bits available",
        crate::poly_ref::REF_INDEX_BITS
    )]
    ReferenceSpaceExceeded {
        /// Bits needed for the tile index.
        tile_bits: u32,
        /// Bits needed for the polygon index.
        poly_bits: u32,
    },
    /// Tile extents must be positive.
    #[error("Tile size must be positive, got {0}x{1}")]
    InvalidTileSize(f32, f32),
    /// A tile already occupies the location.
    #[error("A tile already exists at ({x}, {z}) layer {layer}")]
    TileExists {
        /// Tile column on the x-axis.
        x: i32,
        /// Tile column on the z-axis.
        z: i32,
        /// Layer within the column.
        layer: i32,
    },
    /// The tile has more polygons than a reference can address.
    #[error("Tile has {polygons} polygons, at most {max} are supported")]
    TooManyPolygons {
        /// Polygons in the tile.
        polygons: usize,
        /// The limit.
        max: u32,
    },
    /// Every tile slot is taken.
    #[error("All {0} tile slots are in use")]
    OutOfTiles(u32),
    /// The tile reference is stale or was never valid.
    #[error("Invalid tile reference {0:?}")]
    InvalidTileRef(TileRef),
    /// The polygon reference is stale or was never valid.
    #[error("Invalid polygon reference {0:?}")]
    InvalidPolyRef(PolyRef),
}

#[derive(Debug, Clone)]
struct TileSlot {
    salt: u32,
    tile: Option<MeshTile>,
}

/// A tiled navigation mesh.
#[derive(Debug, Clone)]
pub struct NavMesh {
    params: NavMeshParams,
    encoding: RefEncoding,
    slots: Vec<TileSlot>,
    /// Free slots, next to use last.
    free: Vec<u32>,
    /// Occupied slots per tile column.
    columns: HashMap<(i32, i32), Vec<u32>>,
}

impl NavMesh {
    /// Creates an empty navigation mesh.
    pub fn new(params: NavMeshParams) -> Result<Self, NavMeshError> {
        if !(params.tile_width > 0.0 && params.tile_height > 0.0) {
            return Err(NavMeshError::InvalidTileSize(
                params.tile_width,
                params.tile_height,
            ));
        }
        let encoding = RefEncoding::new(params.max_tiles, params.max_polys)?;
        let slots = (0..params.max_tiles)
            .map(|_| TileSlot { salt: 1, tile: None })
            .collect();
        Ok(Self {
            params,
            encoding,
            slots,
            free: (0..params.max_tiles).rev().collect(),
            columns: HashMap::new(),
        })
    }

    /// The layout the mesh was created with.
    #[inline]
    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    /// Number of tile slots.
    #[inline]
    pub fn max_tiles(&self) -> u32 {
        self.params.max_tiles
    }

    /// The tile column containing `pos`.
    pub fn calc_tile_loc(&self, pos: Vec3) -> (i32, i32) {
        let x = ((pos.x - self.params.origin.x) / self.params.tile_width).floor() as i32;
        let z = ((pos.z - self.params.origin.z) / self.params.tile_height).floor() as i32;
        (x, z)
    }

    /// Adds a tile and links it to its neighbours.
    pub fn add_tile(&mut self, data: TileData) -> Result<TileRef, NavMeshError> {
        let header = data.header;
        if self.tile_at(header.x, header.z, header.layer).is_some() {
            return Err(NavMeshError::TileExists {
                x: header.x,
                z: header.z,
                layer: header.layer,
            });
        }
        if data.polygons.len() > self.params.max_polys as usize {
            return Err(NavMeshError::TooManyPolygons {
                polygons: data.polygons.len(),
                max: self.params.max_polys,
            });
        }
        let index = self
            .free
            .pop()
            .ok_or(NavMeshError::OutOfTiles(self.params.max_tiles))?;

        let slot = &mut self.slots[index as usize];
        slot.tile = Some(MeshTile {
            index,
            salt: slot.salt,
            links: vec![Vec::new(); data.polygons.len()],
            data,
        });
        self.columns
            .entry((header.x, header.z))
            .or_default()
            .push(index);

        self.connect_internal_links(index);
        self.connect_base_off_mesh_links(index);
        self.connect_external_off_mesh_links(index, index, None);

        for other in self.column_slots(header.x, header.z) {
            if other == index {
                continue;
            }
            self.connect_external_links(index, other, None);
            self.connect_external_links(other, index, None);
            self.connect_external_off_mesh_links(index, other, None);
            self.connect_external_off_mesh_links(other, index, None);
        }
        for side in 0..8 {
            let (nx, nz) = neighbor_column(header.x, header.z, side);
            for other in self.column_slots(nx, nz) {
                self.connect_external_links(index, other, Some(side));
                self.connect_external_links(other, index, Some(opposite_side(side)));
                self.connect_external_off_mesh_links(index, other, Some(side));
                self.connect_external_off_mesh_links(other, index, Some(opposite_side(side)));
            }
        }

        tracing::trace!(
            "Added navigation tile ({}, {}) layer {} to slot {index}",
            header.x,
            header.z,
            header.layer
        );
        Ok(self.tile_ref_of(index))
    }

    /// Removes a tile, unlinks it from its neighbours and returns its data.
    pub fn remove_tile(&mut self, tile_ref: TileRef) -> Result<TileData, NavMeshError> {
        let (salt, index, _) = self.encoding.decode(PolyRef(tile_ref.0));
        let valid = self
            .slots
            .get(index as usize)
            .is_some_and(|slot| slot.tile.is_some() && slot.salt == salt);
        if !valid {
            return Err(NavMeshError::InvalidTileRef(tile_ref));
        }

        let header = self.slots[index as usize]
            .tile
            .as_ref()
            .map(|tile| tile.data.header)
            .ok_or(NavMeshError::InvalidTileRef(tile_ref))?;
        if let Some(column) = self.columns.get_mut(&(header.x, header.z)) {
            column.retain(|&i| i != index);
            if column.is_empty() {
                self.columns.remove(&(header.x, header.z));
            }
        }

        for other in self.column_slots(header.x, header.z) {
            self.unconnect_links(other, index);
        }
        for side in 0..8 {
            let (nx, nz) = neighbor_column(header.x, header.z, side);
            for other in self.column_slots(nx, nz) {
                self.unconnect_links(other, index);
            }
        }

        let salt_mask = self.encoding.salt_mask();
        let slot = &mut self.slots[index as usize];
        let tile = slot.tile.take().ok_or(NavMeshError::InvalidTileRef(tile_ref))?;
        slot.salt = (slot.salt + 1) & salt_mask;
        if slot.salt == 0 {
            slot.salt = 1;
        }
        self.free.push(index);
        tracing::trace!(
            "Removed navigation tile ({}, {}) layer {}",
            header.x,
            header.z,
            header.layer
        );
        Ok(tile.data)
    }

    /// The tile at a location.
    pub fn tile_at(&self, x: i32, z: i32, layer: i32) -> Option<&MeshTile> {
        self.tiles_at(x, z).find(|tile| tile.data.header.layer == layer)
    }

    /// All layers of a tile column.
    pub fn tiles_at(&self, x: i32, z: i32) -> impl Iterator<Item = &MeshTile> + '_ {
        self.columns
            .get(&(x, z))
            .into_iter()
            .flatten()
            .filter_map(|&index| self.slots[index as usize].tile.as_ref())
    }

    /// The reference of the tile at a location.
    pub fn tile_ref_at(&self, x: i32, z: i32, layer: i32) -> Option<TileRef> {
        self.tile_at(x, z, layer).map(|tile| self.tile_ref(tile))
    }

    /// The reference of a stored tile.
    #[inline]
    pub fn tile_ref(&self, tile: &MeshTile) -> TileRef {
        self.tile_ref_of(tile.index)
    }

    /// Every stored tile, in slot order.
    pub fn tiles(&self) -> impl Iterator<Item = &MeshTile> + '_ {
        self.slots.iter().filter_map(|slot| slot.tile.as_ref())
    }

    /// The reference of polygon 0 of a tile. OR a polygon index into it to address that polygon.
    #[inline]
    pub fn poly_ref_base(&self, tile: &MeshTile) -> PolyRef {
        self.encoding.encode(tile.salt, tile.index, 0)
    }

    /// The tile and polygon a reference points to.
    pub fn tile_and_poly_by_ref(&self, reference: PolyRef) -> Result<(&MeshTile, &Poly), NavMeshError> {
        let (salt, tile_index, poly_index) = self.encoding.decode(reference);
        let tile = self
            .slots
            .get(tile_index as usize)
            .filter(|slot| slot.salt == salt)
            .and_then(|slot| slot.tile.as_ref())
            .ok_or(NavMeshError::InvalidPolyRef(reference))?;
        let poly = tile
            .data
            .polygons
            .get(poly_index as usize)
            .ok_or(NavMeshError::InvalidPolyRef(reference))?;
        Ok((tile, poly))
    }

    /// Returns `true` if the reference points to a stored polygon.
    pub fn is_valid_poly_ref(&self, reference: PolyRef) -> bool {
        !reference.is_null() && self.tile_and_poly_by_ref(reference).is_ok()
    }

    /// The polygon index encoded in a reference.
    #[inline]
    pub fn decode_poly_index(&self, reference: PolyRef) -> usize {
        self.encoding.decode(reference).2 as usize
    }

    /// The closest point on a polygon to `pos` and whether `pos` lies above or below it.
    pub fn closest_point_on_poly(&self, reference: PolyRef, pos: Vec3) -> Result<(Vec3, bool), NavMeshError> {
        let (tile, _) = self.tile_and_poly_by_ref(reference)?;
        Ok(tile.closest_point_on_poly(self.decode_poly_index(reference), pos))
    }

    /// The closest point on the polygon boundary, or `pos` itself if it lies inside on the xz-plane.
    pub fn closest_point_on_poly_boundary(&self, reference: PolyRef, pos: Vec3) -> Result<Vec3, NavMeshError> {
        let (tile, poly) = self.tile_and_poly_by_ref(reference)?;
        let mut vertices = [Vec3::ZERO; MAX_VERTICES_PER_POLYGON];
        let n = tile.data.copy_poly_vertices(poly, &mut vertices);
        let mut distances = [0.0; MAX_VERTICES_PER_POLYGON];
        let mut params = [0.0; MAX_VERTICES_PER_POLYGON];
        if dist_point_poly_edges_sqr(pos, &vertices[..n], &mut distances, &mut params) {
            return Ok(pos);
        }
        let mut nearest = 0;
        for i in 1..n {
            if distances[i] < distances[nearest] {
                nearest = i;
            }
        }
        Ok(vertices[nearest].lerp(vertices[(nearest + 1) % n], params[nearest]))
    }

    /// Height of the surface of a polygon under `pos`.
    pub fn poly_height(&self, reference: PolyRef, pos: Vec3) -> Result<Option<f32>, NavMeshError> {
        let (tile, _) = self.tile_and_poly_by_ref(reference)?;
        Ok(tile.poly_height(self.decode_poly_index(reference), pos))
    }

    #[inline]
    fn tile_ref_of(&self, index: u32) -> TileRef {
        TileRef(self.encoding.encode(self.slots[index as usize].salt, index, 0).0)
    }

    fn column_slots(&self, x: i32, z: i32) -> Vec<u32> {
        self.columns.get(&(x, z)).cloned().unwrap_or_default()
    }

    fn tile(&self, index: u32) -> Option<&MeshTile> {
        self.slots[index as usize].tile.as_ref()
    }

    fn push_links(&mut self, index: u32, links: Vec<(usize, Link)>) {
        if let Some(tile) = self.slots[index as usize].tile.as_mut() {
            for (poly, link) in links {
                tile.links[poly].push(link);
            }
        }
    }

    fn connect_internal_links(&mut self, index: u32) {
        let Some(tile) = self.tile(index) else {
            return;
        };
        let base = self.poly_ref_base(tile);
        let mut links = Vec::new();
        for (i, poly) in tile.data.polygons.iter().enumerate() {
            if poly.poly_type == PolyType::OffMeshConnection {
                continue;
            }
            for j in 0..poly.vertex_count as usize {
                let neighbor = poly.neighbors[j];
                if neighbor == 0 || neighbor & EXT_LINK != 0 {
                    continue;
                }
                links.push((
                    i,
                    Link {
                        target: PolyRef(base.0 | (neighbor as u32 - 1)),
                        edge: j as u8,
                        side: INTERNAL_SIDE,
                        bmin: 0,
                        bmax: 0,
                    },
                ));
            }
        }
        self.push_links(index, links);
    }

    /// Connects the start of every off-mesh connection of a tile to the ground polygon below it.
    fn connect_base_off_mesh_links(&mut self, index: u32) {
        let Some(tile) = self.tile(index) else {
            return;
        };
        let base = self.poly_ref_base(tile);
        let mut links = Vec::new();
        let mut snapped = Vec::new();
        for connection in &tile.data.off_mesh_connections {
            let half_extents = Vec3::new(
                connection.radius,
                tile.data.header.walkable_climb,
                connection.radius,
            );
            let start = connection.start;
            let Some((land, nearest)) = tile.find_nearest_poly(start, half_extents) else {
                continue;
            };
            if dist_2d_sqr(nearest, start) > connection.radius * connection.radius {
                continue;
            }
            let poly = &tile.data.polygons[connection.poly as usize];
            snapped.push((poly.vertices[0] as usize, nearest));
            links.push((
                connection.poly as usize,
                Link {
                    target: PolyRef(base.0 | land as u32),
                    edge: 0,
                    side: INTERNAL_SIDE,
                    bmin: 0,
                    bmax: 0,
                },
            ));
            // The start is always reachable from the ground.
            links.push((
                land,
                Link {
                    target: PolyRef(base.0 | connection.poly as u32),
                    edge: 0xff,
                    side: INTERNAL_SIDE,
                    bmin: 0,
                    bmax: 0,
                },
            ));
        }
        self.snap_vertices(index, snapped);
        self.push_links(index, links);
    }

    /// Connects the ends of the off-mesh connections of `target` that land in `index`.
    fn connect_external_off_mesh_links(&mut self, index: u32, target: u32, side: Option<u8>) {
        let (Some(tile), Some(target_tile)) = (self.tile(index), self.tile(target)) else {
            return;
        };
        let opposite = side.map_or(INTERNAL_SIDE, opposite_side);
        let base = self.poly_ref_base(tile);
        let target_base = self.poly_ref_base(target_tile);
        let mut tile_links = Vec::new();
        let mut target_links = Vec::new();
        let mut snapped = Vec::new();
        for connection in &target_tile.data.off_mesh_connections {
            if connection.side != opposite {
                continue;
            }
            // Skip connections whose start never got connected.
            if target_tile.links[connection.poly as usize].is_empty() {
                continue;
            }
            let half_extents = Vec3::new(
                connection.radius,
                target_tile.data.header.walkable_climb,
                connection.radius,
            );
            let end = connection.end;
            let Some((land, nearest)) = tile.find_nearest_poly(end, half_extents) else {
                continue;
            };
            if dist_2d_sqr(nearest, end) > connection.radius * connection.radius {
                continue;
            }
            let poly = &target_tile.data.polygons[connection.poly as usize];
            snapped.push((poly.vertices[1] as usize, nearest));
            target_links.push((
                connection.poly as usize,
                Link {
                    target: PolyRef(base.0 | land as u32),
                    edge: 1,
                    side: opposite,
                    bmin: 0,
                    bmax: 0,
                },
            ));
            if connection.is_bidirectional() {
                tile_links.push((
                    land,
                    Link {
                        target: PolyRef(target_base.0 | connection.poly as u32),
                        edge: 0xff,
                        side: side.unwrap_or(INTERNAL_SIDE),
                        bmin: 0,
                        bmax: 0,
                    },
                ));
            }
        }
        self.snap_vertices(target, snapped);
        self.push_links(target, target_links);
        self.push_links(index, tile_links);
    }

    fn snap_vertices(&mut self, index: u32, snapped: Vec<(usize, Vec3)>) {
        if let Some(tile) = self.slots[index as usize].tile.as_mut() {
            for (vertex, position) in snapped {
                tile.data.vertices[vertex] = position;
            }
        }
    }

    /// Links the border edges of `index` facing `side` to matching border edges of `target`.
    fn connect_external_links(&mut self, index: u32, target: u32, side: Option<u8>) {
        let (Some(tile), Some(target_tile)) = (self.tile(index), self.tile(target)) else {
            return;
        };
        let target_base = self.poly_ref_base(target_tile);
        let mut links = Vec::new();
        for (i, poly) in tile.data.polygons.iter().enumerate() {
            let n = poly.vertex_count as usize;
            for j in 0..n {
                if !poly.is_border_edge(j) {
                    continue;
                }
                let dir = (poly.neighbors[j] & 0xff) as u8;
                if side.is_some_and(|side| side != dir) {
                    continue;
                }
                let va = tile.data.vertices[poly.vertices[j] as usize];
                let vb = tile.data.vertices[poly.vertices[(j + 1) % n] as usize];
                for (target_poly, portal_min, portal_max) in
                    find_connecting_polys(va, vb, target_tile, opposite_side(dir))
                {
                    let mut link = Link {
                        target: PolyRef(target_base.0 | target_poly as u32),
                        edge: j as u8,
                        side: dir,
                        bmin: 0,
                        bmax: 255,
                    };
                    let along = match dir {
                        0 | 4 => Some((va.z, vb.z)),
                        2 | 6 => Some((va.x, vb.x)),
                        _ => None,
                    };
                    if let Some((a, b)) = along {
                        let mut tmin = (portal_min - a) / (b - a);
                        let mut tmax = (portal_max - a) / (b - a);
                        if tmin > tmax {
                            std::mem::swap(&mut tmin, &mut tmax);
                        }
                        link.bmin = (tmin.clamp(0.0, 1.0) * 255.0).round() as u8;
                        link.bmax = (tmax.clamp(0.0, 1.0) * 255.0).round() as u8;
                    }
                    links.push((i, link));
                }
            }
        }
        self.push_links(index, links);
    }

    fn unconnect_links(&mut self, index: u32, target: u32) {
        let encoding = self.encoding;
        if let Some(tile) = self.slots[index as usize].tile.as_mut() {
            for links in &mut tile.links {
                links.retain(|link| encoding.decode(link.target).1 != target);
            }
        }
    }
}

/// The column next to `(x, z)` in direction `side`, counted from +x towards +z.
fn neighbor_column(x: i32, z: i32, side: u8) -> (i32, i32) {
    match side {
        0 => (x + 1, z),
        1 => (x + 1, z + 1),
        2 => (x, z + 1),
        3 => (x - 1, z + 1),
        4 => (x - 1, z),
        5 => (x - 1, z - 1),
        6 => (x, z - 1),
        7 => (x + 1, z - 1),
        _ => (x, z),
    }
}

fn slab_coord(v: Vec3, side: u8) -> f32 {
    match side {
        0 | 4 => v.x,
        2 | 6 => v.z,
        _ => 0.0,
    }
}

/// The end points of an edge projected onto the border plane, as `(along, height)` sorted by `along`.
fn slab_end_points(va: Vec3, vb: Vec3, side: u8) -> ((f32, f32), (f32, f32)) {
    let (a, b) = match side {
        0 | 4 => ((va.z, va.y), (vb.z, vb.y)),
        _ => ((va.x, va.y), (vb.x, vb.y)),
    };
    if a.0 < b.0 { (a, b) } else { (b, a) }
}

/// Returns `true` if two border edges overlap along the border and are within `climb` of each other vertically.
fn overlap_slabs(
    amin: (f32, f32),
    amax: (f32, f32),
    bmin: (f32, f32),
    bmax: (f32, f32),
    px: f32,
    climb: f32,
) -> bool {
    // Shrink the ranges a little so touching corners do not count.
    let minx = (amin.0 + px).max(bmin.0 + px);
    let maxx = (amax.0 - px).min(bmax.0 - px);
    if minx > maxx {
        return false;
    }

    let ad = (amax.1 - amin.1) / (amax.0 - amin.0);
    let ak = amin.1 - ad * amin.0;
    let bd = (bmax.1 - bmin.1) / (bmax.0 - bmin.0);
    let bk = bmin.1 - bd * bmin.0;
    let dmin = (bd * minx + bk) - (ad * minx + ak);
    let dmax = (bd * maxx + bk) - (ad * maxx + ak);

    // The edges cross.
    if dmin * dmax < 0.0 {
        return true;
    }

    let threshold = (climb * 2.0) * (climb * 2.0);
    dmin * dmin <= threshold || dmax * dmax <= threshold
}

/// Polygons of `tile` with a border edge on `side` that matches the edge `va..vb`,
/// with the shared range along the border.
fn find_connecting_polys(va: Vec3, vb: Vec3, tile: &MeshTile, side: u8) -> Vec<(usize, f32, f32)> {
    let (amin, amax) = slab_end_points(va, vb, side);
    let apos = slab_coord(va, side);
    let marker = EXT_LINK | side as u16;
    let mut result = Vec::new();
    for (i, poly) in tile.data.polygons.iter().enumerate() {
        let n = poly.vertex_count as usize;
        for j in 0..n {
            if poly.neighbors[j] != marker {
                continue;
            }
            let vc = tile.data.vertices[poly.vertices[j] as usize];
            let vd = tile.data.vertices[poly.vertices[(j + 1) % n] as usize];
            if (apos - slab_coord(vc, side)).abs() > 0.01 {
                continue;
            }
            let (bmin, bmax) = slab_end_points(vc, vd, side);
            if !overlap_slabs(amin, amax, bmin, bmax, 0.01, tile.data.header.walkable_climb) {
                continue;
            }
            result.push((i, amin.0.max(bmin.0), amax.0.min(bmax.0)));
            break;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile_data::{PolyDetail, TileHeader};

    /// A tile with a single square polygon covering its whole column, all four edges on the border.
    fn square_tile(x: i32, z: i32, size: f32) -> TileData {
        let x0 = x as f32 * size;
        let z0 = z as f32 * size;
        let vertices = vec![
            Vec3::new(x0, 0.0, z0),
            Vec3::new(x0, 0.0, z0 + size),
            Vec3::new(x0 + size, 0.0, z0 + size),
            Vec3::new(x0 + size, 0.0, z0),
        ];
        let mut poly = Poly {
            vertex_count: 4,
            flags: 1,
            area: 1,
            ..Default::default()
        };
        poly.vertices[..4].copy_from_slice(&[0, 1, 2, 3]);
        // Edges: -x, +z, +x, -z.
        poly.neighbors[..4].copy_from_slice(&[EXT_LINK | 4, EXT_LINK | 2, EXT_LINK, EXT_LINK | 6]);
        TileData {
            header: TileHeader {
                x,
                z,
                bmin: Vec3::new(x0, 0.0, z0),
                bmax: Vec3::new(x0 + size, 1.0, z0 + size),
                walkable_climb: 0.5,
                off_mesh_base: 1,
                ..Default::default()
            },
            detail_meshes: vec![PolyDetail {
                vertex_base: 0,
                vertex_count: 4,
                triangle_base: 0,
                triangle_count: 2,
            }],
            detail_vertices: vertices.clone(),
            detail_triangles: vec![[0, 1, 2, 0b01_01], [0, 2, 3, 0b01_01_00]],
            vertices,
            polygons: vec![poly],
            off_mesh_connections: Vec::new(),
        }
    }

    fn mesh(max_tiles: u32) -> NavMesh {
        NavMesh::new(NavMeshParams {
            origin: Vec3::ZERO,
            tile_width: 10.0,
            tile_height: 10.0,
            max_tiles,
            max_polys: 64,
        })
        .unwrap()
    }

    #[test]
    fn neighbouring_tiles_link_both_ways() {
        let mut navmesh = mesh(4);
        let a = navmesh.add_tile(square_tile(0, 0, 10.0)).unwrap();
        navmesh.add_tile(square_tile(1, 0, 10.0)).unwrap();

        let left = navmesh.tile_at(0, 0, 0).unwrap();
        let right = navmesh.tile_at(1, 0, 0).unwrap();
        assert_eq!(navmesh.tile_ref(left), a);
        let link = left.links(0)[0];
        assert_eq!(link.target, navmesh.poly_ref_base(right));
        assert_eq!(link.side, 0);
        assert_eq!(link.edge, 2);
        assert_eq!((link.bmin, link.bmax), (0, 255));
        assert_eq!(right.links(0)[0].target, navmesh.poly_ref_base(left));
        assert_eq!(right.links(0)[0].side, 4);
    }

    #[test]
    fn removing_a_tile_unlinks_and_invalidates() {
        let mut navmesh = mesh(4);
        navmesh.add_tile(square_tile(0, 0, 10.0)).unwrap();
        let right = navmesh.add_tile(square_tile(1, 0, 10.0)).unwrap();
        let stale = navmesh.poly_ref_base(navmesh.tile_at(1, 0, 0).unwrap());
        assert!(navmesh.is_valid_poly_ref(stale));

        let data = navmesh.remove_tile(right).unwrap();
        assert_eq!(data.header.x, 1);
        assert!(navmesh.tile_at(0, 0, 0).unwrap().links(0).is_empty());
        assert!(!navmesh.is_valid_poly_ref(stale));
        assert!(navmesh.remove_tile(right).is_err());

        // The slot is reused with a new salt.
        navmesh.add_tile(square_tile(1, 0, 10.0)).unwrap();
        let fresh = navmesh.poly_ref_base(navmesh.tile_at(1, 0, 0).unwrap());
        assert_ne!(fresh, stale);
        assert!(!navmesh.is_valid_poly_ref(stale));
    }

    #[test]
    fn rejects_duplicates_and_overflow() {
        let mut navmesh = mesh(2);
        navmesh.add_tile(square_tile(0, 0, 10.0)).unwrap();
        assert!(matches!(
            navmesh.add_tile(square_tile(0, 0, 10.0)),
            Err(NavMeshError::TileExists { x: 0, z: 0, layer: 0 })
        ));
        navmesh.add_tile(square_tile(5, 5, 10.0)).unwrap();
        assert!(matches!(
            navmesh.add_tile(square_tile(7, 7, 10.0)),
            Err(NavMeshError::OutOfTiles(2))
        ));
    }

    #[test]
    fn tile_location_floors_negative_positions() {
        let navmesh = mesh(2);
        assert_eq!(navmesh.calc_tile_loc(Vec3::new(-0.1, 0.0, 15.0)), (-1, 1));
    }

    #[test]
    fn poly_height_follows_detail_mesh() {
        let mut navmesh = mesh(2);
        let mut tile = square_tile(0, 0, 10.0);
        for vertex in &mut tile.detail_vertices {
            vertex.y = vertex.x * 0.1;
        }
        navmesh.add_tile(tile).unwrap();
        let base = navmesh.poly_ref_base(navmesh.tile_at(0, 0, 0).unwrap());
        let height = navmesh
            .poly_height(base, Vec3::new(5.0, 3.0, 5.0))
            .unwrap()
            .unwrap();
        approx::assert_relative_eq!(height, 0.5, epsilon = 1e-5);
        assert_eq!(navmesh.poly_height(base, Vec3::new(15.0, 0.0, 5.0)).unwrap(), None);

        let (closest, over) = navmesh
            .closest_point_on_poly(base, Vec3::new(12.0, 4.0, 5.0))
            .unwrap();
        assert!(!over);
        approx::assert_relative_eq!(closest.x, 10.0, epsilon = 1e-5);
        approx::assert_relative_eq!(closest.y, 1.0, epsilon = 1e-5);
    }
}
