//! Queries that explore the surface around a point instead of searching for a goal.

use std::collections::{HashSet, VecDeque};

use glam::Vec3;
use rand::Rng;

use crate::{
    NavMeshQuery, PolyRef, QueryError, QueryFilter,
    math::{
        dist_point_segment_sqr_2d, intersect_segment_poly_2d, point_in_polygon, poly_area_2d,
        random_point_in_convex_poly,
    },
    nav_mesh_query::check_finite,
    node_pool::NodeFlags,
    tile_data::{INTERNAL_SIDE, MAX_VERTICES_PER_POLYGON, PolyType},
};

/// Polygons [`NavMeshQuery::move_along_surface`] keeps queued at once.
const MAX_SURFACE_STACK: usize = 48;

/// Neighbours considered per polygon edge.
const MAX_EDGE_NEIGHBORS: usize = 8;

/// The result of [`NavMeshQuery::move_along_surface`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SurfaceMove {
    /// Where the movement ended. The height is interpolated, not sampled from the surface.
    pub position: Vec3,
    /// Polygons from the start polygon to the polygon containing [`SurfaceMove::position`].
    pub visited: Vec<PolyRef>,
}

/// The result of [`NavMeshQuery::raycast`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RaycastHit {
    /// Where along the ray the wall was hit, `f32::MAX` if the ray reached its end.
    pub t: f32,
    /// Normal of the wall on the xz-plane. Zero if nothing was hit.
    pub normal: Vec3,
    /// Edge of the last visited polygon that was hit.
    pub edge: Option<usize>,
    /// The polygons the ray crossed.
    pub path: Vec<PolyRef>,
}

impl RaycastHit {
    /// Returns `true` if the ray stopped at a wall.
    #[inline]
    pub fn is_hit(&self) -> bool {
        self.t != f32::MAX
    }
}

/// The result of [`NavMeshQuery::find_distance_to_wall`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallHit {
    /// Distance to the nearest wall, the search radius if none is closer.
    pub distance: f32,
    /// The nearest point on the wall, the search center if none is closer.
    pub position: Vec3,
    /// Direction from the wall towards the search center in the xz-plane, like the distance.
    /// Points down if no wall is closer.
    pub normal: Vec3,
}

impl<'a> NavMeshQuery<'a> {
    /// Moves from `start_pos` towards `end_pos` while staying on the surface, sliding along walls.
    ///
    /// Only polygons within the circle through both positions are visited, so it is meant for short moves.
    pub fn move_along_surface(
        &self,
        start_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
        max_visited: usize,
    ) -> Result<SurfaceMove, QueryError> {
        self.poly(start_ref)?;
        check_finite(start_pos)?;
        check_finite(end_pos)?;

        // Parent links of every visited polygon, indexed like `visited_refs`.
        let mut visited_refs = vec![start_ref];
        let mut parents: Vec<Option<usize>> = vec![None];
        let mut seen = HashSet::from([start_ref]);
        let mut stack = VecDeque::from([0usize]);

        let mut best_pos = start_pos;
        let mut best_distance = f32::MAX;
        let mut best_node = 0;

        let search_pos = start_pos.lerp(end_pos, 0.5);
        let search_radius = start_pos.distance(end_pos) / 2.0 + 0.001;
        let search_radius_sqr = search_radius * search_radius;

        let mut vertices = [Vec3::ZERO; MAX_VERTICES_PER_POLYGON];
        while let Some(current) = stack.pop_front() {
            let current_ref = visited_refs[current];
            let (tile, poly) = self.poly(current_ref)?;
            let n = tile.data().copy_poly_vertices(poly, &mut vertices);

            if point_in_polygon(end_pos, &vertices[..n]) {
                best_node = current;
                best_pos = end_pos;
                break;
            }

            let base = self.nav_mesh.poly_ref_base(tile);
            let poly_index = self.nav_mesh.decode_poly_index(current_ref);
            let mut j = n - 1;
            for i in 0..n {
                let mut neighbors = Vec::with_capacity(MAX_EDGE_NEIGHBORS);
                if poly.is_border_edge(j) {
                    for link in tile.links(poly_index) {
                        if link.edge as usize != j || link.target.is_null() {
                            continue;
                        }
                        let Ok((_, neighbor)) = self.poly(link.target) else {
                            continue;
                        };
                        if filter.pass_filter(neighbor) && neighbors.len() < MAX_EDGE_NEIGHBORS {
                            neighbors.push(link.target);
                        }
                    }
                } else if poly.neighbors[j] != 0 {
                    let index = (poly.neighbors[j] - 1) as usize;
                    if filter.pass_filter(&tile.data().polygons[index]) {
                        neighbors.push(PolyRef(base.0 | index as u32));
                    }
                }

                if neighbors.is_empty() {
                    // A wall, slide along it.
                    let (distance, t) = dist_point_segment_sqr_2d(end_pos, vertices[j], vertices[i]);
                    if distance < best_distance {
                        best_pos = vertices[j].lerp(vertices[i], t);
                        best_distance = distance;
                        best_node = current;
                    }
                } else {
                    for neighbor in neighbors {
                        if seen.contains(&neighbor) {
                            continue;
                        }
                        let (distance, _) = dist_point_segment_sqr_2d(search_pos, vertices[j], vertices[i]);
                        if distance > search_radius_sqr {
                            continue;
                        }
                        if stack.len() < MAX_SURFACE_STACK {
                            seen.insert(neighbor);
                            visited_refs.push(neighbor);
                            parents.push(Some(current));
                            stack.push_back(visited_refs.len() - 1);
                        }
                    }
                }
                j = i;
            }
        }

        let mut visited = Vec::new();
        let mut node = Some(best_node);
        while let Some(index) = node {
            visited.push(visited_refs[index]);
            node = parents[index];
        }
        visited.reverse();
        visited.truncate(max_visited);

        Ok(SurfaceMove {
            position: best_pos,
            visited,
        })
    }

    /// Casts a ray along the surface from `start_pos` towards `end_pos` and reports the first wall it hits.
    ///
    /// The ray works on the xz-plane and ignores height changes and off-mesh connections.
    pub fn raycast(
        &self,
        start_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<RaycastHit, QueryError> {
        self.poly(start_ref)?;
        check_finite(start_pos)?;
        check_finite(end_pos)?;

        let mut hit = RaycastHit::default();
        let mut vertices = [Vec3::ZERO; MAX_VERTICES_PER_POLYGON];
        let mut current_ref = start_ref;
        while !current_ref.is_null() {
            let (tile, poly) = self.poly(current_ref)?;
            let n = tile.data().copy_poly_vertices(poly, &mut vertices);

            let Some(intersection) = intersect_segment_poly_2d(start_pos, end_pos, &vertices[..n]) else {
                // Could not hit the polygon, keep the old t and report a hit.
                return Ok(hit);
            };
            hit.edge = intersection.leave_edge;
            if intersection.tmax > hit.t {
                hit.t = intersection.tmax;
            }
            if hit.path.len() < max_path {
                hit.path.push(current_ref);
            }

            let Some(leave_edge) = intersection.leave_edge else {
                // The ray ends inside this polygon.
                hit.t = f32::MAX;
                return Ok(hit);
            };

            let mut next_ref = PolyRef::NULL;
            for link in tile.links(self.nav_mesh.decode_poly_index(current_ref)) {
                if link.edge as usize != leave_edge {
                    continue;
                }
                let Ok((_, neighbor)) = self.poly(link.target) else {
                    continue;
                };
                if neighbor.poly_type == PolyType::OffMeshConnection || !filter.pass_filter(neighbor) {
                    continue;
                }
                if link.side == INTERNAL_SIDE || (link.bmin == 0 && link.bmax == 255) {
                    next_ref = link.target;
                    break;
                }

                // Partial border link, check the ray leaves through the linked part.
                let left = vertices[link.edge as usize];
                let right = vertices[(link.edge as usize + 1) % n];
                let scale = 1.0 / 255.0;
                let (a, b, crossing) = match link.side {
                    0 | 4 => (
                        left.z,
                        right.z,
                        start_pos.z + (end_pos.z - start_pos.z) * intersection.tmax,
                    ),
                    2 | 6 => (
                        left.x,
                        right.x,
                        start_pos.x + (end_pos.x - start_pos.x) * intersection.tmax,
                    ),
                    _ => continue,
                };
                let mut lmin = a + (b - a) * (link.bmin as f32 * scale);
                let mut lmax = a + (b - a) * (link.bmax as f32 * scale);
                if lmin > lmax {
                    std::mem::swap(&mut lmin, &mut lmax);
                }
                if (lmin..=lmax).contains(&crossing) {
                    next_ref = link.target;
                    break;
                }
            }

            if next_ref.is_null() {
                // A wall.
                let a = vertices[leave_edge];
                let b = vertices[(leave_edge + 1) % n];
                let dx = b.x - a.x;
                let dz = b.z - a.z;
                hit.normal = Vec3::new(dz, 0.0, -dx).normalize_or_zero();
                return Ok(hit);
            }
            current_ref = next_ref;
        }
        Ok(hit)
    }

    /// Finds the wall nearest to `center` within `max_radius` with a Dijkstra search over the surface.
    pub fn find_distance_to_wall(
        &mut self,
        start_ref: PolyRef,
        center: Vec3,
        max_radius: f32,
        filter: &QueryFilter,
    ) -> Result<WallHit, QueryError> {
        self.poly(start_ref)?;
        check_finite(center)?;
        if !(max_radius.is_finite() && max_radius >= 0.0) {
            return Err(QueryError::InvalidRadius(max_radius));
        }

        let nav_mesh = self.nav_mesh;
        self.pool.clear();
        self.open.clear();
        let Some(start) = self.pool.get_or_insert(start_ref) else {
            return Ok(no_wall(center, max_radius));
        };
        {
            let node = self.pool.node_mut(start);
            node.pos = center;
            node.flags = NodeFlags::OPEN;
        }
        self.open.push(&self.pool, start);

        let mut radius_sqr = max_radius * max_radius;
        let mut hit_pos = None;
        let mut vertices = [Vec3::ZERO; MAX_VERTICES_PER_POLYGON];

        while let Some(best) = self.open.pop(&mut self.pool) {
            let best_node = *self.pool.node(best);
            let (tile, poly) = self.poly(best_node.poly)?;
            let n = tile.data().copy_poly_vertices(poly, &mut vertices);
            let poly_index = nav_mesh.decode_poly_index(best_node.poly);
            let parent_ref = best_node.parent.map(|p| self.pool.node(p).poly);

            let mut j = n - 1;
            for i in 0..n {
                let solid = if poly.is_border_edge(j) {
                    // Passable only if the link on this edge leads somewhere the filter allows.
                    tile.links(poly_index)
                        .iter()
                        .find(|link| link.edge as usize == j)
                        .is_none_or(|link| {
                            self.poly(link.target)
                                .map_or(true, |(_, neighbor)| !filter.pass_filter(neighbor))
                        })
                } else if poly.neighbors[j] != 0 {
                    let neighbor = &tile.data().polygons[(poly.neighbors[j] - 1) as usize];
                    !filter.pass_filter(neighbor)
                } else {
                    true
                };
                if solid {
                    let (distance, t) = dist_point_segment_sqr_2d(center, vertices[j], vertices[i]);
                    if distance <= radius_sqr {
                        radius_sqr = distance;
                        hit_pos = Some(vertices[j].lerp(vertices[i], t));
                    }
                }
                j = i;
            }

            for link in tile.links(poly_index) {
                let neighbor_ref = link.target;
                if neighbor_ref.is_null() || Some(neighbor_ref) == parent_ref {
                    continue;
                }
                let Ok((_, neighbor_poly)) = self.poly(neighbor_ref) else {
                    continue;
                };
                if neighbor_poly.poly_type == PolyType::OffMeshConnection {
                    continue;
                }
                let a = vertices[link.edge as usize];
                let b = vertices[(link.edge as usize + 1) % n];
                let (distance, _) = dist_point_segment_sqr_2d(center, a, b);
                // The circle does not reach the next polygon.
                if distance > radius_sqr {
                    continue;
                }
                if !filter.pass_filter(neighbor_poly) {
                    continue;
                }
                let Some(neighbor) = self.pool.get_or_insert(neighbor_ref) else {
                    continue;
                };
                if self.pool.node(neighbor).flags.contains(NodeFlags::CLOSED) {
                    continue;
                }
                if self.pool.node(neighbor).flags.is_empty() {
                    let mid = self.edge_mid_point(best_node.poly, neighbor_ref)?;
                    self.pool.node_mut(neighbor).pos = mid;
                }
                let total = best_node.total + best_node.pos.distance(self.pool.node(neighbor).pos);
                let node = self.pool.node_mut(neighbor);
                if node.flags.contains(NodeFlags::OPEN) && total >= node.total {
                    continue;
                }
                node.parent = Some(best);
                node.total = total;
                node.flags.insert(NodeFlags::OPEN);
                self.open.push(&self.pool, neighbor);
            }
        }

        Ok(match hit_pos {
            Some(position) => WallHit {
                distance: radius_sqr.sqrt(),
                position,
                normal: ((center - position) * Vec3::new(1.0, 0.0, 1.0)).normalize_or(Vec3::NEG_Y),
            },
            None => no_wall(center, max_radius),
        })
    }

    /// Picks a random point on the mesh. Tiles are equally likely, polygons within a tile by area.
    pub fn find_random_point<R: Rng + ?Sized>(
        &self,
        filter: &QueryFilter,
        rng: &mut R,
    ) -> Result<(PolyRef, Vec3), QueryError> {
        let mut chosen_tile = None;
        let mut tile_sum = 0.0;
        for tile in self.nav_mesh.tiles() {
            // Every tile weighs the same.
            let area = 1.0;
            tile_sum += area;
            if rng.gen_range(0.0..1.0f32) * tile_sum <= area {
                chosen_tile = Some(tile);
            }
        }
        let tile = chosen_tile.ok_or(QueryError::NothingToSample)?;

        let base = self.nav_mesh.poly_ref_base(tile);
        let mut vertices = [Vec3::ZERO; MAX_VERTICES_PER_POLYGON];
        let mut chosen = None;
        let mut area_sum = 0.0;
        for (i, poly) in tile.data().polygons.iter().enumerate() {
            if poly.poly_type != PolyType::Ground || !filter.pass_filter(poly) {
                continue;
            }
            let n = tile.data().copy_poly_vertices(poly, &mut vertices);
            let area = poly_area_2d(&vertices[..n]);
            area_sum += area;
            if rng.gen_range(0.0..1.0f32) * area_sum <= area {
                chosen = Some((i, *poly));
            }
        }
        let (index, poly) = chosen.ok_or(QueryError::NothingToSample)?;

        let n = tile.data().copy_poly_vertices(&poly, &mut vertices);
        let s = rng.gen_range(0.0..1.0f32);
        let t = rng.gen_range(0.0..1.0f32);
        let point = random_point_in_convex_poly(&vertices[..n], s, t);
        let (point, _) = tile.closest_point_on_poly(index, point);
        Ok((PolyRef(base.0 | index as u32), point))
    }

    /// Picks a random point on the polygons reachable from `start_ref` whose edges come within `max_radius` of `center`.
    ///
    /// Polygons are weighted by area. The point can lie slightly outside the circle.
    pub fn find_random_point_around_circle<R: Rng + ?Sized>(
        &mut self,
        start_ref: PolyRef,
        center: Vec3,
        max_radius: f32,
        filter: &QueryFilter,
        rng: &mut R,
    ) -> Result<(PolyRef, Vec3), QueryError> {
        let (_, start_poly) = self.poly(start_ref)?;
        check_finite(center)?;
        if !(max_radius.is_finite() && max_radius >= 0.0) {
            return Err(QueryError::InvalidRadius(max_radius));
        }
        if !filter.pass_filter(start_poly) {
            return Err(QueryError::FilteredOut(start_ref));
        }

        let nav_mesh = self.nav_mesh;
        self.pool.clear();
        self.open.clear();
        let start = self
            .pool
            .get_or_insert(start_ref)
            .ok_or(QueryError::NothingToSample)?;
        {
            let node = self.pool.node_mut(start);
            node.pos = center;
            node.flags = NodeFlags::OPEN;
        }
        self.open.push(&self.pool, start);

        let radius_sqr = max_radius * max_radius;
        let mut area_sum = 0.0;
        let mut chosen = None;
        let mut vertices = [Vec3::ZERO; MAX_VERTICES_PER_POLYGON];

        while let Some(best) = self.open.pop(&mut self.pool) {
            let best_node = *self.pool.node(best);
            let (tile, poly) = self.poly(best_node.poly)?;

            if poly.poly_type == PolyType::Ground {
                let n = tile.data().copy_poly_vertices(poly, &mut vertices);
                let area = poly_area_2d(&vertices[..n]);
                area_sum += area;
                if rng.gen_range(0.0..1.0f32) * area_sum <= area {
                    chosen = Some(best_node.poly);
                }
            }

            let parent_ref = best_node.parent.map(|p| self.pool.node(p).poly);
            for link in tile.links(nav_mesh.decode_poly_index(best_node.poly)) {
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
                let Ok((a, b, _, _)) = self.portal_points(best_node.poly, neighbor_ref) else {
                    continue;
                };
                let (distance, _) = dist_point_segment_sqr_2d(center, a, b);
                if distance > radius_sqr {
                    continue;
                }
                let Some(neighbor) = self.pool.get_or_insert(neighbor_ref) else {
                    continue;
                };
                if self.pool.node(neighbor).flags.contains(NodeFlags::CLOSED) {
                    continue;
                }
                if self.pool.node(neighbor).flags.is_empty() {
                    self.pool.node_mut(neighbor).pos = a.lerp(b, 0.5);
                }
                let total = best_node.total + best_node.pos.distance(self.pool.node(neighbor).pos);
                let node = self.pool.node_mut(neighbor);
                if node.flags.contains(NodeFlags::OPEN) && total >= node.total {
                    continue;
                }
                node.parent = Some(best);
                node.total = total;
                node.flags.insert(NodeFlags::OPEN);
                self.open.push(&self.pool, neighbor);
            }
        }

        let reference = chosen.ok_or(QueryError::NothingToSample)?;
        let (tile, poly) = self.poly(reference)?;
        let n = tile.data().copy_poly_vertices(poly, &mut vertices);
        let s = rng.gen_range(0.0..1.0f32);
        let t = rng.gen_range(0.0..1.0f32);
        let point = random_point_in_convex_poly(&vertices[..n], s, t);
        let (point, _) = tile.closest_point_on_poly(nav_mesh.decode_poly_index(reference), point);
        Ok((reference, point))
    }
}

fn no_wall(center: Vec3, radius: f32) -> WallHit {
    WallHit {
        distance: radius,
        position: center,
        normal: Vec3::NEG_Y,
    }
}
