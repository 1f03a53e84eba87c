//! World-space queries.
//!
//! Every query converts its inputs into navigation mesh space, runs on a fresh [`NavMeshQuery`]
//! and converts the results back. Queries that find no polygon near their input degrade to
//! returning that input instead of failing.

use glam::{Affine3A, Vec3, Vec3A};
use navtile_detour::{NavMesh, NavMeshQuery, QueryFilter, StraightPathFlags};

use crate::NavigationMesh;

/// Polygons per corridor and points per straight path.
pub const MAX_POLYS: usize = 2048;

/// What a [`PathPoint`] marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PathPointFlag {
    /// A corner along the way.
    #[default]
    Normal,
    /// The first point.
    Start,
    /// The last point.
    End,
    /// The entry of an off-mesh connection.
    OffMesh,
}

impl From<StraightPathFlags> for PathPointFlag {
    fn from(flags: StraightPathFlags) -> Self {
        if flags.contains(StraightPathFlags::OFF_MESH_CONNECTION) {
            Self::OffMesh
        } else if flags.contains(StraightPathFlags::START) {
            Self::Start
        } else if flags.contains(StraightPathFlags::END) {
            Self::End
        } else {
            Self::Normal
        }
    }
}

/// A corner of a path found by [`NavigationMesh::find_path`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathPoint {
    /// World-space position.
    pub position: Vec3,
    /// What the point marks.
    pub flag: PathPointFlag,
    /// Area of the nearest enclosing area volume, 0 if there is none.
    pub area_id: u8,
}

/// The result of [`NavigationMesh::distance_to_wall`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallDistance {
    /// Distance to the nearest wall, the search radius if none is closer.
    pub distance: f32,
    /// World-space point on the nearest wall.
    pub position: Vec3,
    /// World-space direction from the wall towards the query point. Points down if there is no wall.
    pub normal: Vec3,
}

/// The result of [`NavigationMesh::raycast`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastResult {
    /// Where the ray stopped, its end if it hit nothing.
    pub position: Vec3,
    /// World-space normal of the wall that was hit. Points down if nothing was hit.
    pub normal: Vec3,
}

/// The mesh and the transforms between world and mesh space.
struct QuerySpace<'a> {
    nav_mesh: &'a NavMesh,
    transform: Affine3A,
    inverse: Affine3A,
}

impl QuerySpace<'_> {
    fn to_local(&self, point: Vec3) -> Vec3 {
        self.inverse.transform_point3(point)
    }

    fn to_world(&self, point: Vec3) -> Vec3 {
        self.transform.transform_point3(point)
    }

    fn direction_to_world(&self, direction: Vec3) -> Vec3 {
        self.transform.transform_vector3(direction).normalize_or(Vec3::NEG_Y)
    }
}

impl NavigationMesh {
    fn query_space(&self) -> Option<QuerySpace<'_>> {
        let nav_mesh = self.nav_mesh.as_ref()?;
        Some(QuerySpace {
            nav_mesh,
            transform: self.world_transform,
            inverse: self.world_transform.inverse(),
        })
    }

    /// The point on the mesh nearest to `point` within `point ± extents`, or `point` if there is none.
    pub fn find_nearest_point(&self, point: Vec3, extents: Vec3, filter: Option<&QueryFilter>) -> Vec3 {
        let Some(space) = self.query_space() else {
            return point;
        };
        let filter = filter.unwrap_or(&self.filter);
        NavMeshQuery::new(space.nav_mesh)
            .find_nearest_poly(space.to_local(point), extents, filter)
            .map_or(point, |(_, nearest)| space.to_world(nearest))
    }

    /// Moves from `start` towards `end` along the surface, sliding along walls.
    ///
    /// Visits at most `max_visited` polygons, so it suits short moves. Returns `end` if `start` is off the mesh.
    pub fn move_along_surface(
        &self,
        start: Vec3,
        end: Vec3,
        extents: Vec3,
        max_visited: usize,
        filter: Option<&QueryFilter>,
    ) -> Vec3 {
        let Some(space) = self.query_space() else {
            return end;
        };
        let filter = filter.unwrap_or(&self.filter);
        let query = NavMeshQuery::new(space.nav_mesh);
        let local_start = space.to_local(start);
        let Some((start_ref, _)) = query.find_nearest_poly(local_start, extents, filter) else {
            return end;
        };
        match query.move_along_surface(start_ref, local_start, space.to_local(end), filter, max_visited) {
            Ok(moved) => space.to_world(moved.position),
            Err(err) => {
                tracing::debug!("Could not move along the navigation mesh: {err}");
                end
            }
        }
    }

    /// Finds a path from `start` to `end`. Empty if either end is off the mesh.
    ///
    /// If `end` cannot be reached the path leads to the closest reachable point instead.
    pub fn find_path(&self, start: Vec3, end: Vec3, extents: Vec3, filter: Option<&QueryFilter>) -> Vec<PathPoint> {
        let Some(space) = self.query_space() else {
            return Vec::new();
        };
        let filter = filter.unwrap_or(&self.filter);
        let mut query = NavMeshQuery::with_max_nodes(space.nav_mesh, MAX_POLYS);
        let local_start = space.to_local(start);
        let local_end = space.to_local(end);
        let (Some((start_ref, _)), Some((end_ref, _))) = (
            query.find_nearest_poly(local_start, extents, filter),
            query.find_nearest_poly(local_end, extents, filter),
        ) else {
            return Vec::new();
        };

        let corridor = match query.find_path(start_ref, end_ref, local_start, local_end, filter, MAX_POLYS) {
            Ok(corridor) => corridor,
            Err(err) => {
                tracing::debug!("Could not find a path: {err}");
                return Vec::new();
            }
        };
        let Some(&last) = corridor.polys.last() else {
            return Vec::new();
        };
        let local_end = if last == end_ref {
            local_end
        } else {
            space
                .nav_mesh
                .closest_point_on_poly(last, local_end)
                .map_or(local_end, |(closest, _)| closest)
        };

        let points = match query.find_straight_path(local_start, local_end, &corridor.polys, MAX_POLYS) {
            Ok(points) => points,
            Err(err) => {
                tracing::debug!("Could not straighten the path: {err}");
                return Vec::new();
            }
        };
        points
            .into_iter()
            .map(|point| {
                let position = space.to_world(point.pos);
                PathPoint {
                    position,
                    flag: point.flags.into(),
                    area_id: self.area_at(position),
                }
            })
            .collect()
    }

    /// The positions of [`find_path`](Self::find_path).
    pub fn find_path_positions(
        &self,
        start: Vec3,
        end: Vec3,
        extents: Vec3,
        filter: Option<&QueryFilter>,
    ) -> Vec<Vec3> {
        self.find_path(start, end, extents, filter)
            .into_iter()
            .map(|point| point.position)
            .collect()
    }

    /// The area of the enclosing area volume whose node is closest to `position`.
    fn area_at(&self, position: Vec3) -> u8 {
        self.areas
            .iter()
            .filter(|area| area.world_bounds.contains_point(Vec3A::from(position)))
            .min_by(|a, b| {
                a.world_center
                    .distance_squared(position)
                    .total_cmp(&b.world_center.distance_squared(position))
            })
            .map_or(0, |area| area.area_id)
    }

    /// A random point on the mesh. [`Vec3::ZERO`] if the mesh is empty or not allocated.
    pub fn random_point(&mut self, filter: Option<&QueryFilter>) -> Vec3 {
        let Some(nav_mesh) = &self.nav_mesh else {
            return Vec3::ZERO;
        };
        let filter = filter.unwrap_or(&self.filter);
        match NavMeshQuery::new(nav_mesh).find_random_point(filter, &mut self.rng) {
            Ok((_, point)) => self.world_transform.transform_point3(point),
            Err(err) => {
                tracing::debug!("Could not pick a random point: {err}");
                Vec3::ZERO
            }
        }
    }

    /// A random point reachable from `center` within roughly `radius`. Returns `center` if it is off the mesh.
    pub fn random_point_in_circle(
        &mut self,
        center: Vec3,
        radius: f32,
        extents: Vec3,
        filter: Option<&QueryFilter>,
    ) -> Vec3 {
        let Some(nav_mesh) = &self.nav_mesh else {
            return center;
        };
        let filter = filter.unwrap_or(&self.filter);
        let local_center = self.world_transform.inverse().transform_point3(center);
        let mut query = NavMeshQuery::new(nav_mesh);
        let Some((start_ref, _)) = query.find_nearest_poly(local_center, extents, filter) else {
            return center;
        };
        match query.find_random_point_around_circle(start_ref, local_center, radius, filter, &mut self.rng) {
            Ok((_, point)) => self.world_transform.transform_point3(point),
            Err(err) => {
                tracing::debug!("Could not pick a random point in a circle: {err}");
                center
            }
        }
    }

    /// The distance from `point` to the nearest wall, searched up to `radius`.
    pub fn distance_to_wall(
        &self,
        point: Vec3,
        radius: f32,
        extents: Vec3,
        filter: Option<&QueryFilter>,
    ) -> WallDistance {
        let missed = WallDistance {
            distance: radius,
            position: Vec3::ZERO,
            normal: Vec3::NEG_Y,
        };
        let Some(space) = self.query_space() else {
            return missed;
        };
        let filter = filter.unwrap_or(&self.filter);
        let mut query = NavMeshQuery::new(space.nav_mesh);
        let local_point = space.to_local(point);
        let Some((start_ref, _)) = query.find_nearest_poly(local_point, extents, filter) else {
            return missed;
        };
        match query.find_distance_to_wall(start_ref, local_point, radius, filter) {
            Ok(hit) => WallDistance {
                distance: hit.distance,
                position: space.to_world(hit.position),
                normal: space.direction_to_world(hit.normal),
            },
            Err(err) => {
                tracing::debug!("Could not find the distance to a wall: {err}");
                missed
            }
        }
    }

    /// Casts a ray along the surface from `start` towards `end` and stops at the first wall.
    pub fn raycast(&self, start: Vec3, end: Vec3, extents: Vec3, filter: Option<&QueryFilter>) -> RaycastResult {
        let missed = RaycastResult {
            position: end,
            normal: Vec3::NEG_Y,
        };
        let Some(space) = self.query_space() else {
            return missed;
        };
        let filter = filter.unwrap_or(&self.filter);
        let query = NavMeshQuery::new(space.nav_mesh);
        let local_start = space.to_local(start);
        let Some((start_ref, _)) = query.find_nearest_poly(local_start, extents, filter) else {
            return missed;
        };
        let hit = match query.raycast(start_ref, local_start, space.to_local(end), filter, MAX_POLYS) {
            Ok(hit) => hit,
            Err(err) => {
                tracing::debug!("Could not cast a ray along the navigation mesh: {err}");
                return missed;
            }
        };
        if !hit.is_hit() {
            return missed;
        }
        RaycastResult {
            position: start.lerp(end, hit.t),
            normal: space.direction_to_world(hit.normal),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use navtile_recast::Aabb3d;

    use super::*;
    use crate::{
        scene::{SceneComponent, SceneNode},
        test_util::floor,
    };

    fn built(root: &SceneNode) -> NavigationMesh {
        let mut mesh = NavigationMesh::default();
        mesh.rebuild(root).unwrap();
        mesh.set_random_seed(7);
        mesh
    }

    #[test]
    fn queries_fall_back_without_a_mesh() {
        let mut mesh = NavigationMesh::default();
        let point = Vec3::new(1.0, 2.0, 3.0);
        let end = Vec3::new(4.0, 5.0, 6.0);
        assert_eq!(mesh.find_nearest_point(point, Vec3::ONE, None), point);
        assert_eq!(mesh.move_along_surface(point, end, Vec3::ONE, 3, None), end);
        assert!(mesh.find_path(point, end, Vec3::ONE, None).is_empty());
        assert_eq!(mesh.random_point(None), Vec3::ZERO);
        assert_eq!(mesh.random_point_in_circle(point, 1.0, Vec3::ONE, None), point);
        assert_eq!(
            mesh.distance_to_wall(point, 2.5, Vec3::ONE, None),
            WallDistance {
                distance: 2.5,
                position: Vec3::ZERO,
                normal: Vec3::NEG_Y
            }
        );
        assert_eq!(
            mesh.raycast(point, end, Vec3::ONE, None),
            RaycastResult {
                position: end,
                normal: Vec3::NEG_Y
            }
        );
    }

    #[test]
    fn points_far_from_the_mesh_are_returned_unchanged() {
        let mesh = built(&floor(10.0));
        let far = Vec3::new(0.0, 50.0, 0.0);
        assert_eq!(mesh.find_nearest_point(far, Vec3::ONE, None), far);
        assert!(mesh.find_path(far, Vec3::ZERO, Vec3::ONE, None).is_empty());
    }

    #[test]
    fn nearest_point_respects_the_world_transform() {
        let root = floor(10.0).with_translation(Vec3::new(100.0, 0.0, 0.0));
        let mesh = built(&root);
        let nearest = mesh.find_nearest_point(Vec3::new(101.0, 0.5, 1.0), Vec3::ONE, None);
        assert_relative_eq!(nearest.x, 101.0, epsilon = 1e-3);
        assert_relative_eq!(nearest.y, 0.0, epsilon = 0.25);
        assert_relative_eq!(nearest.z, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn straight_path_across_the_floor() {
        let root = floor(10.0).with_child(
            SceneNode::new("mud")
                .with_translation(Vec3::new(3.0, 0.0, 1.0))
                .with_component(SceneComponent::NavArea {
                    bounds: Aabb3d::new(Vec3::ZERO, Vec3::ONE),
                    area_id: 5,
                }),
        );
        let mesh = built(&root);
        let start = Vec3::new(-3.0, 0.0, 1.0);
        let end = Vec3::new(3.0, 0.0, 1.0);
        let path = mesh.find_path(start, end, Vec3::ONE, None);
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].flag, PathPointFlag::Start);
        assert_eq!(path[1].flag, PathPointFlag::End);
        assert_relative_eq!(path[0].position.x, -3.0, epsilon = 1e-3);
        assert_relative_eq!(path[1].position.x, 3.0, epsilon = 1e-3);
        assert_eq!(path[0].area_id, 0);
        assert_eq!(path[1].area_id, 5);

        let positions = mesh.find_path_positions(start, end, Vec3::ONE, None);
        assert_eq!(positions, path.iter().map(|point| point.position).collect::<Vec<_>>());
    }

    #[test]
    fn surface_moves_stop_at_the_edge() {
        let mesh = built(&floor(10.0));
        let start = Vec3::new(0.5, 0.0, 1.0);
        let moved = mesh.move_along_surface(start, Vec3::new(20.0, 0.0, 1.0), Vec3::ONE, 16, None);
        assert!(moved.x > 3.5 && moved.x < 5.0, "{moved}");
        assert_relative_eq!(moved.z, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn raycasts_hit_the_border() {
        let mesh = built(&floor(10.0));
        let start = Vec3::new(0.5, 0.0, 1.0);
        let hit = mesh.raycast(start, Vec3::new(10.0, 0.0, 1.0), Vec3::ONE, None);
        assert!(hit.position.x > 3.5 && hit.position.x < 5.0, "{}", hit.position);
        assert!(hit.normal.x < -0.9, "{}", hit.normal);

        let inside = Vec3::new(2.0, 0.0, 2.0);
        let miss = mesh.raycast(start, inside, Vec3::ONE, None);
        assert_eq!(miss.position, inside);
        assert_eq!(miss.normal, Vec3::NEG_Y);
    }

    #[test]
    fn wall_distance_near_the_border() {
        let mesh = built(&floor(10.0));
        let center = mesh.distance_to_wall(Vec3::new(0.5, 0.0, 1.0), 2.0, Vec3::ONE, None);
        assert_relative_eq!(center.distance, 2.0);

        let near = mesh.distance_to_wall(Vec3::new(3.9, 0.0, 1.0), 2.0, Vec3::ONE, None);
        assert!(near.distance < 1.2, "{}", near.distance);
        assert!(near.position.x > 3.9);
        // The query point sits below the surface, the normal stays level anyway.
        assert_relative_eq!(near.normal, Vec3::NEG_X, epsilon = 1e-2);
    }

    #[test]
    fn random_points_lie_on_the_floor() {
        let mut mesh = built(&floor(10.0));
        for _ in 0..20 {
            let point = mesh.random_point(None);
            assert!(point.x.abs() <= 5.0 && point.z.abs() <= 5.0, "{point}");
            assert_relative_eq!(point.y, 0.0, epsilon = 0.25);

            let point = mesh.random_point_in_circle(Vec3::new(1.0, 0.0, 1.0), 1.0, Vec3::ONE, None);
            assert!(point.x.abs() <= 5.0 && point.z.abs() <= 5.0, "{point}");
        }
    }

    #[test]
    fn seeded_random_points_repeat() {
        let mut a = built(&floor(10.0));
        let mut b = built(&floor(10.0));
        a.set_random_seed(42);
        b.set_random_seed(42);
        assert_eq!(a.random_point(None), b.random_point(None));
    }

    #[test]
    fn custom_filters_override_the_default() {
        let mesh = built(&floor(10.0));
        let mut blocked = QueryFilter::default();
        blocked.set_include_flags(0);
        let point = Vec3::new(1.0, 0.5, 1.0);
        assert_eq!(mesh.find_nearest_point(point, Vec3::ONE, Some(&blocked)), point);
        assert_ne!(mesh.find_nearest_point(point, Vec3::ONE, None), point);
    }
}
