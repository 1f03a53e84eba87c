//! Queries over a [`NavMesh`]: nearest polygon, A* corridors and string pulling.
//!
//! Surface movement, raycasts, wall distance and random sampling are implemented next to these, in the surface query module.

use bitflags::bitflags;
use glam::Vec3;
use thiserror::Error;

use crate::{
    MeshTile, NavMesh, PolyRef, QueryFilter,
    math::{dist_point_segment_sqr_2d, nearly_equal, tri_area_2d},
    node_pool::{NodeFlags, NodePool, OpenList},
    tile_data::{INTERNAL_SIDE, Poly, PolyType},
};

/// Search nodes available to a query unless configured otherwise.
pub const DEFAULT_MAX_NODES: usize = 2048;

/// Keeps the A* heuristic just below the true remaining cost.
const HEURISTIC_SCALE: f32 = 0.999;

/// Errors from [`NavMeshQuery`] operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The reference does not point to a stored polygon.
    #[error("Invalid polygon reference {0:?}")]
    InvalidPolyRef(PolyRef),
    /// A position had a NaN or infinite component.
    #[error("Position {0} is not finite")]
    NonFinitePosition(Vec3),
    /// The filter rejects the polygon the query starts on.
    #[error("Polygon {0:?} is rejected by the query filter")]
    FilteredOut(PolyRef),
    /// Two consecutive corridor polygons share no link.
    #[error("Polygons {from:?} and {to:?} are not connected")]
    NotConnected {
        /// The polygon the portal was looked up from.
        from: PolyRef,
        /// The polygon the portal should lead to.
        to: PolyRef,
    },
    /// The corridor has no polygons.
    #[error("Path corridor is empty")]
    EmptyPath,
    /// No polygon passed the filter.
    #[error("No polygon to sample a point from")]
    NothingToSample,
    /// A radius was negative or not finite.
    #[error("Radius {0} is invalid")]
    InvalidRadius(f32),
}

/// The polygon corridor found by [`NavMeshQuery::find_path`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PathResult {
    /// Polygons from the start polygon onwards.
    pub polys: Vec<PolyRef>,
    /// `false` if the end polygon was not reached and the corridor leads to the closest polygon instead.
    pub complete: bool,
    /// `true` if the search ran out of nodes.
    pub out_of_nodes: bool,
}

bitflags! {
    /// Describes a point of a straight path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct StraightPathFlags: u8 {
        /// The first point of the path.
        const START = 0x01;
        /// The last point of the path.
        const END = 0x02;
        /// The point where an off-mesh connection is entered.
        const OFF_MESH_CONNECTION = 0x04;
    }
}

/// A corner of a straight path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StraightPathPoint {
    /// Where the corner is.
    pub pos: Vec3,
    /// What kind of corner it is.
    pub flags: StraightPathFlags,
    /// The polygon entered at the corner, [`PolyRef::NULL`] for the end point.
    pub poly: PolyRef,
}

/// Runs queries against a [`NavMesh`].
///
/// Owns the scratch memory of its searches, so one query object per thread is enough.
#[derive(Debug, Clone)]
pub struct NavMeshQuery<'a> {
    pub(crate) nav_mesh: &'a NavMesh,
    pub(crate) pool: NodePool,
    pub(crate) open: OpenList,
}

impl<'a> NavMeshQuery<'a> {
    /// Creates a query with [`DEFAULT_MAX_NODES`] search nodes.
    pub fn new(nav_mesh: &'a NavMesh) -> Self {
        Self::with_max_nodes(nav_mesh, DEFAULT_MAX_NODES)
    }

    /// Creates a query whose searches visit at most `max_nodes` polygons.
    pub fn with_max_nodes(nav_mesh: &'a NavMesh, max_nodes: usize) -> Self {
        Self {
            nav_mesh,
            pool: NodePool::new(max_nodes),
            open: OpenList::default(),
        }
    }

    /// The mesh being queried.
    #[inline]
    pub fn nav_mesh(&self) -> &'a NavMesh {
        self.nav_mesh
    }

    pub(crate) fn poly(&self, reference: PolyRef) -> Result<(&'a MeshTile, &'a Poly), QueryError> {
        self.nav_mesh
            .tile_and_poly_by_ref(reference)
            .map_err(|_| QueryError::InvalidPolyRef(reference))
    }

    /// The polygons passing the filter whose bounds overlap the box.
    pub fn query_polygons(&self, bmin: Vec3, bmax: Vec3, filter: &QueryFilter) -> Vec<PolyRef> {
        let (min_x, min_z) = self.nav_mesh.calc_tile_loc(bmin);
        let (max_x, max_z) = self.nav_mesh.calc_tile_loc(bmax);
        let mut result = Vec::new();
        for z in min_z..=max_z {
            for x in min_x..=max_x {
                for tile in self.nav_mesh.tiles_at(x, z) {
                    let base = self.nav_mesh.poly_ref_base(tile);
                    result.extend(
                        tile.query_polygons(bmin, bmax)
                            .filter(|&i| filter.pass_filter(&tile.data().polygons[i]))
                            .map(|i| PolyRef(base.0 | i as u32)),
                    );
                }
            }
        }
        result
    }

    /// The polygon nearest to `center` within the box `center ± half_extents`, and the closest point on it.
    ///
    /// A point above or below a polygon within the climb height of its tile counts as lying on it.
    pub fn find_nearest_poly(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
    ) -> Option<(PolyRef, Vec3)> {
        if !center.is_finite() || !half_extents.is_finite() {
            return None;
        }
        let mut nearest = None;
        let mut nearest_distance = f32::MAX;
        for reference in self.query_polygons(center - half_extents, center + half_extents, filter) {
            let Ok((tile, _)) = self.poly(reference) else {
                continue;
            };
            let (closest, over_poly) =
                tile.closest_point_on_poly(self.nav_mesh.decode_poly_index(reference), center);
            let diff = center - closest;
            let distance = if over_poly {
                let d = diff.y.abs() - tile.data().header.walkable_climb;
                if d > 0.0 { d * d } else { 0.0 }
            } else {
                diff.length_squared()
            };
            if distance < nearest_distance {
                nearest_distance = distance;
                nearest = Some((reference, closest));
            }
        }
        nearest
    }

    /// Finds a polygon corridor from `start_ref` to `end_ref` with A*.
    ///
    /// If the end cannot be reached the corridor leads to the polygon closest to `end_pos`.
    /// At most `max_path` polygons are returned, counted from the start.
    pub fn find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<PathResult, QueryError> {
        self.poly(start_ref)?;
        self.poly(end_ref)?;
        check_finite(start_pos)?;
        check_finite(end_pos)?;

        if start_ref == end_ref {
            return Ok(PathResult {
                polys: vec![start_ref],
                complete: true,
                out_of_nodes: false,
            });
        }

        let nav_mesh = self.nav_mesh;
        self.pool.clear();
        self.open.clear();

        let Some(start_node) = self.pool.get_or_insert(start_ref) else {
            return Ok(PathResult {
                out_of_nodes: true,
                ..Default::default()
            });
        };
        {
            let node = self.pool.node_mut(start_node);
            node.pos = start_pos;
            node.cost = 0.0;
            node.total = start_pos.distance(end_pos) * HEURISTIC_SCALE;
            node.flags = NodeFlags::OPEN;
        }
        self.open.push(&self.pool, start_node);

        let mut last_best = start_node;
        let mut last_best_cost = self.pool.node(start_node).total;
        let mut out_of_nodes = false;

        while let Some(best) = self.open.pop(&mut self.pool) {
            let best_node = *self.pool.node(best);
            if best_node.poly == end_ref {
                last_best = best;
                break;
            }

            let (best_tile, best_poly) = self.poly(best_node.poly)?;
            let parent_ref = best_node.parent.map(|p| self.pool.node(p).poly);
            let best_index = nav_mesh.decode_poly_index(best_node.poly);

            for link in best_tile.links(best_index) {
                let neighbor_ref = link.target;
                if neighbor_ref.is_null() || Some(neighbor_ref) == parent_ref {
                    continue;
                }
                let Ok((_, neighbor_poly)) = self.poly(neighbor_ref) else {
                    continue;
                };
                if !filter.pass_filter(neighbor_poly) {
                    continue;
                }
                let Some(neighbor) = self.pool.get_or_insert(neighbor_ref) else {
                    out_of_nodes = true;
                    continue;
                };

                if self.pool.node(neighbor).flags.is_empty() {
                    let (left, right, _, _) = self.portal_points(best_node.poly, neighbor_ref)?;
                    self.pool.node_mut(neighbor).pos = left.lerp(right, 0.5);
                }
                let neighbor_pos = self.pool.node(neighbor).pos;

                let (cost, heuristic) = if neighbor_ref == end_ref {
                    let current = filter.cost(best_node.pos, neighbor_pos, best_poly);
                    let to_end = filter.cost(neighbor_pos, end_pos, neighbor_poly);
                    (best_node.cost + current + to_end, 0.0)
                } else {
                    let current = filter.cost(best_node.pos, neighbor_pos, best_poly);
                    (
                        best_node.cost + current,
                        neighbor_pos.distance(end_pos) * HEURISTIC_SCALE,
                    )
                };
                let total = cost + heuristic;

                let node = self.pool.node_mut(neighbor);
                if node.flags.intersects(NodeFlags::OPEN | NodeFlags::CLOSED) && total >= node.total {
                    continue;
                }
                node.parent = Some(best);
                node.cost = cost;
                node.total = total;
                node.flags.remove(NodeFlags::CLOSED);
                node.flags.insert(NodeFlags::OPEN);
                self.open.push(&self.pool, neighbor);

                if heuristic < last_best_cost {
                    last_best_cost = heuristic;
                    last_best = neighbor;
                }
            }
        }

        let mut polys = self.pool.path_to(last_best);
        let mut complete = self.pool.node(last_best).poly == end_ref;
        if polys.len() > max_path {
            polys.truncate(max_path);
            complete = false;
        }
        if !complete {
            tracing::trace!("Path search ended {} polygons away from the goal", polys.len());
        }
        Ok(PathResult {
            polys,
            complete,
            out_of_nodes,
        })
    }

    /// Pulls a string through the portals of a polygon corridor and returns its corners.
    ///
    /// The start and end are clamped onto the first and last polygon. At most `max_points`
    /// points are returned. If a portal cannot be resolved the path ends at the last good polygon.
    pub fn find_straight_path(
        &self,
        start_pos: Vec3,
        end_pos: Vec3,
        path: &[PolyRef],
        max_points: usize,
    ) -> Result<Vec<StraightPathPoint>, QueryError> {
        check_finite(start_pos)?;
        check_finite(end_pos)?;
        let (Some(&first), Some(&last)) = (path.first(), path.last()) else {
            return Err(QueryError::EmptyPath);
        };
        let mut points = Vec::new();
        if max_points == 0 {
            return Ok(points);
        }

        let closest_start = self
            .nav_mesh
            .closest_point_on_poly_boundary(first, start_pos)
            .map_err(|_| QueryError::InvalidPolyRef(first))?;
        let closest_end = self
            .nav_mesh
            .closest_point_on_poly_boundary(last, end_pos)
            .map_err(|_| QueryError::InvalidPolyRef(last))?;

        if !append_vertex(&mut points, closest_start, StraightPathFlags::START, first, max_points) {
            return Ok(points);
        }

        if path.len() > 1 {
            let mut portal_apex = closest_start;
            let mut portal_left = portal_apex;
            let mut portal_right = portal_apex;
            let mut apex_index = 0;
            let mut left_index = 0;
            let mut right_index = 0;
            let mut left_type = PolyType::Ground;
            let mut right_type = PolyType::Ground;
            let mut left_ref = first;
            let mut right_ref = first;

            let mut i = 0;
            while i < path.len() {
                let (left, right, to_type) = if i + 1 < path.len() {
                    match self.portal_points(path[i], path[i + 1]) {
                        Ok((left, right, _, to_type)) => {
                            // Starting right on the first portal, skip it.
                            if i == 0 {
                                let (d, _) = dist_point_segment_sqr_2d(portal_apex, left, right);
                                if d < 0.001 * 0.001 {
                                    i += 1;
                                    continue;
                                }
                            }
                            (left, right, to_type)
                        }
                        Err(_) => {
                            // The rest of the corridor is unusable, end on the last good polygon.
                            let clamped = self
                                .nav_mesh
                                .closest_point_on_poly_boundary(path[i], end_pos)
                                .map_err(|_| QueryError::InvalidPolyRef(path[i]))?;
                            append_vertex(
                                &mut points,
                                clamped,
                                StraightPathFlags::empty(),
                                path[i],
                                max_points,
                            );
                            return Ok(points);
                        }
                    }
                } else {
                    (closest_end, closest_end, PolyType::Ground)
                };
                let next_ref = path.get(i + 1).copied().unwrap_or(PolyRef::NULL);

                if tri_area_2d(portal_apex, portal_right, right) <= 0.0 {
                    if nearly_equal(portal_apex, portal_right)
                        || tri_area_2d(portal_apex, portal_left, right) > 0.0
                    {
                        portal_right = right;
                        right_ref = next_ref;
                        right_type = to_type;
                        right_index = i;
                    } else {
                        // The right side crossed the left, the left corner becomes the new apex.
                        portal_apex = portal_left;
                        apex_index = left_index;
                        let flags = corner_flags(left_ref, left_type);
                        if !append_vertex(&mut points, portal_apex, flags, left_ref, max_points) {
                            return Ok(points);
                        }
                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                if tri_area_2d(portal_apex, portal_left, left) >= 0.0 {
                    if nearly_equal(portal_apex, portal_left)
                        || tri_area_2d(portal_apex, portal_right, left) < 0.0
                    {
                        portal_left = left;
                        left_ref = next_ref;
                        left_type = to_type;
                        left_index = i;
                    } else {
                        portal_apex = portal_right;
                        apex_index = right_index;
                        let flags = corner_flags(right_ref, right_type);
                        if !append_vertex(&mut points, portal_apex, flags, right_ref, max_points) {
                            return Ok(points);
                        }
                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                i += 1;
            }
        }

        append_vertex(
            &mut points,
            closest_end,
            StraightPathFlags::END,
            PolyRef::NULL,
            max_points,
        );
        Ok(points)
    }

    /// The portal between two linked polygons as `(left, right)` seen from `from`, plus both polygon types.
    ///
    /// Portals onto off-mesh connections collapse to the connection end point.
    pub(crate) fn portal_points(
        &self,
        from: PolyRef,
        to: PolyRef,
    ) -> Result<(Vec3, Vec3, PolyType, PolyType), QueryError> {
        let (from_tile, from_poly) = self.poly(from)?;
        let (to_tile, to_poly) = self.poly(to)?;
        let not_connected = QueryError::NotConnected { from, to };
        let link = from_tile
            .links(self.nav_mesh.decode_poly_index(from))
            .iter()
            .find(|link| link.target == to)
            .ok_or_else(|| not_connected.clone())?;

        if from_poly.poly_type == PolyType::OffMeshConnection {
            let vertex = from_tile.data().vertices[from_poly.vertices[link.edge as usize] as usize];
            return Ok((vertex, vertex, from_poly.poly_type, to_poly.poly_type));
        }
        if to_poly.poly_type == PolyType::OffMeshConnection {
            let back = to_tile
                .links(self.nav_mesh.decode_poly_index(to))
                .iter()
                .find(|link| link.target == from)
                .ok_or(not_connected)?;
            let vertex = to_tile.data().vertices[to_poly.vertices[back.edge as usize] as usize];
            return Ok((vertex, vertex, from_poly.poly_type, to_poly.poly_type));
        }

        let n = from_poly.vertex_count as usize;
        let edge = link.edge as usize;
        let vertices = &from_tile.data().vertices;
        let v0 = vertices[from_poly.vertices[edge] as usize];
        let v1 = vertices[from_poly.vertices[(edge + 1) % n] as usize];
        let (mut left, mut right) = (v0, v1);
        // Links across tile borders may only cover part of the edge.
        if link.side != INTERNAL_SIDE && (link.bmin != 0 || link.bmax != 255) {
            let scale = 1.0 / 255.0;
            left = v0.lerp(v1, link.bmin as f32 * scale);
            right = v0.lerp(v1, link.bmax as f32 * scale);
        }
        Ok((left, right, from_poly.poly_type, to_poly.poly_type))
    }

    /// The middle of the portal between two linked polygons.
    pub(crate) fn edge_mid_point(&self, from: PolyRef, to: PolyRef) -> Result<Vec3, QueryError> {
        let (left, right, _, _) = self.portal_points(from, to)?;
        Ok(left.lerp(right, 0.5))
    }
}

pub(crate) fn check_finite(pos: Vec3) -> Result<(), QueryError> {
    if pos.is_finite() {
        Ok(())
    } else {
        Err(QueryError::NonFinitePosition(pos))
    }
}

fn corner_flags(poly: PolyRef, poly_type: PolyType) -> StraightPathFlags {
    if poly.is_null() {
        StraightPathFlags::END
    } else if poly_type == PolyType::OffMeshConnection {
        StraightPathFlags::OFF_MESH_CONNECTION
    } else {
        StraightPathFlags::empty()
    }
}

/// Appends a corner and returns `false` once the path is complete or full.
/// A corner on top of the previous one replaces its flags and polygon instead.
fn append_vertex(
    points: &mut Vec<StraightPathPoint>,
    pos: Vec3,
    flags: StraightPathFlags,
    poly: PolyRef,
    max_points: usize,
) -> bool {
    if let Some(last) = points.last_mut() {
        if nearly_equal(last.pos, pos) {
            last.flags = flags;
            last.poly = poly;
            return true;
        }
    }
    points.push(StraightPathPoint { pos, flags, poly });
    points.len() < max_points && !flags.contains(StraightPathFlags::END)
}
