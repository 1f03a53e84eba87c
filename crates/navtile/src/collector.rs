//! Gathers navigation geometry from a scene tree.

use std::collections::HashSet;

use glam::{Affine3A, Vec3, Vec3A};
use navtile_detour::OffMeshConnectionParams;
use navtile_recast::{Aabb3d, AreaBox, AreaType, TriMesh};

use crate::obstacles::NavObstacle;
use crate::scene::{CollisionShape, ModelGeometry, SceneComponent, SceneNode, ShapeKind, TriangleGeometry};

/// One piece of input to the tile builder, in navigation mesh space.
#[derive(Debug, Clone, PartialEq)]
pub enum NavigableSource {
    /// Triangles with one area per triangle.
    TriMesh(TriMesh),
    /// A shortcut between two points.
    OffMeshConnection(OffMeshConnectionParams),
    /// A box whose walkable surface gets a fixed area.
    AreaVolume(AreaBox),
}

/// A [`NavigableSource`] with its bounds, used to pick the sources relevant to a tile.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationGeometryInfo {
    /// The source.
    pub source: NavigableSource,
    /// Bounds of the source in navigation mesh space.
    pub bounds: Aabb3d,
}

/// An enabled area volume in world space, used to tag path points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavAreaVolume {
    /// World-space bounds of the volume.
    pub world_bounds: Aabb3d,
    /// World position of the node that owns the volume.
    pub world_center: Vec3,
    /// Area of the volume.
    pub area_id: u8,
}

/// The result of [`collect_geometries`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollectedGeometry {
    /// Every source below the root.
    pub geometry: Vec<NavigationGeometryInfo>,
    /// The enabled area volumes below the root.
    pub areas: Vec<NavAreaVolume>,
    /// The enabled obstacles below the root, in world space.
    pub obstacles: Vec<NavObstacle>,
}

/// Collects every navigable source below `root`, expressed relative to `root.transform`.
///
/// Triangles come from nodes marked [`SceneComponent::Navigable`], and from their subtrees for
/// recursive markers. Nodes with an obstacle or crowd agent are skipped together with their subtree.
/// A node prefers its box, triangle mesh and convex hull collision shapes over its models.
/// Off-mesh connections, area volumes and obstacles are collected from the whole tree.
pub fn collect_geometries(root: &SceneNode) -> CollectedGeometry {
    let mut markers = Markers::default();
    markers.visit(root, root.transform, true);

    let inverse = root.transform.inverse();
    let mut collected = CollectedGeometry::default();
    let mut processed = HashSet::new();
    for navigable in &markers.navigables {
        let mut collector = NodeCollector {
            inverse,
            area: navigable.area,
            recursive: navigable.recursive,
            processed: &mut processed,
            geometry: &mut collected.geometry,
        };
        collector.collect(navigable.node, navigable.world, true);
    }

    for connection in &markers.connections {
        let start_world = Vec3::from(connection.world.translation);
        let end_world = connection.world.transform_point3(connection.end_point);
        let sphere = Aabb3d::new(start_world, Vec3::splat(connection.radius));
        collected.geometry.push(NavigationGeometryInfo {
            source: NavigableSource::OffMeshConnection(OffMeshConnectionParams {
                start: inverse.transform_point3(start_world),
                end: inverse.transform_point3(end_world),
                radius: connection.radius,
                bidirectional: connection.bidirectional,
                area: connection.area_id,
                flags: connection.mask,
                user_id: 0,
            }),
            bounds: transform_aabb(&inverse, &sphere),
        });
    }

    for area in &markers.areas {
        let local = transform_aabb(&(inverse * area.world), &area.bounds);
        collected.geometry.push(NavigationGeometryInfo {
            source: NavigableSource::AreaVolume(AreaBox {
                aabb: local,
                area: AreaType(area.area_id),
            }),
            bounds: local,
        });
        collected.areas.push(NavAreaVolume {
            world_bounds: transform_aabb(&area.world, &area.bounds),
            world_center: area.world.translation.into(),
            area_id: area.area_id,
        });
    }

    collected.obstacles = markers.obstacles;

    tracing::debug!(
        "Collected {} navigation sources, {} area volumes and {} obstacles",
        collected.geometry.len(),
        collected.areas.len(),
        collected.obstacles.len()
    );
    collected
}

/// The bounds of all sources, grown by `padding`. `None` if there are no sources.
pub fn calculate_bounding_box(geometry: &[NavigationGeometryInfo], padding: Vec3) -> Option<Aabb3d> {
    let mut bounds = Aabb3d::EMPTY;
    for info in geometry {
        bounds.merge(&info.bounds);
    }
    if !bounds.is_defined() {
        return None;
    }
    bounds.min -= Vec3A::from(padding);
    bounds.max += Vec3A::from(padding);
    Some(bounds)
}

/// The bounds of `aabb` after transforming its corners.
pub fn transform_aabb(transform: &Affine3A, aabb: &Aabb3d) -> Aabb3d {
    let mut result = Aabb3d::EMPTY;
    for i in 0..8 {
        let corner = Vec3A::new(
            if i & 1 == 0 { aabb.min.x } else { aabb.max.x },
            if i & 2 == 0 { aabb.min.y } else { aabb.max.y },
            if i & 4 == 0 { aabb.min.z } else { aabb.max.z },
        );
        result.merge_point(transform.transform_point3a(corner));
    }
    result
}

struct NavigableMarker<'a> {
    node: &'a SceneNode,
    world: Affine3A,
    recursive: bool,
    area: AreaType,
}

struct ConnectionMarker {
    world: Affine3A,
    end_point: Vec3,
    radius: f32,
    bidirectional: bool,
    mask: u16,
    area_id: u8,
}

struct AreaMarker {
    world: Affine3A,
    bounds: Aabb3d,
    area_id: u8,
}

#[derive(Default)]
struct Markers<'a> {
    navigables: Vec<NavigableMarker<'a>>,
    connections: Vec<ConnectionMarker>,
    areas: Vec<AreaMarker>,
    obstacles: Vec<NavObstacle>,
}

impl<'a> Markers<'a> {
    fn visit(&mut self, node: &'a SceneNode, world: Affine3A, parent_enabled: bool) {
        let enabled = parent_enabled && node.enabled;
        for component in node.components.iter().filter(|c| enabled && c.enabled) {
            match &component.kind {
                SceneComponent::Navigable { recursive, area_id } => {
                    self.navigables.push(NavigableMarker {
                        node,
                        world,
                        recursive: *recursive,
                        area: area_id.map_or(AreaType::DEFAULT_WALKABLE, AreaType),
                    });
                }
                SceneComponent::OffMeshConnection {
                    end_point,
                    radius,
                    bidirectional,
                    mask,
                    area_id,
                } => self.connections.push(ConnectionMarker {
                    world,
                    end_point: *end_point,
                    radius: *radius,
                    bidirectional: *bidirectional,
                    mask: *mask,
                    area_id: *area_id,
                }),
                SceneComponent::NavArea { bounds, area_id } => self.areas.push(AreaMarker {
                    world,
                    bounds: *bounds,
                    area_id: *area_id,
                }),
                SceneComponent::Obstacle { radius, height } => self.obstacles.push(NavObstacle {
                    position: world.translation.into(),
                    radius: *radius,
                    height: *height,
                }),
                _ => {}
            }
        }
        for child in &node.children {
            self.visit(child, world * child.transform, enabled);
        }
    }
}

struct NodeCollector<'a> {
    inverse: Affine3A,
    area: AreaType,
    recursive: bool,
    processed: &'a mut HashSet<*const SceneNode>,
    geometry: &'a mut Vec<NavigationGeometryInfo>,
}

impl NodeCollector<'_> {
    fn collect(&mut self, node: &SceneNode, world: Affine3A, parent_enabled: bool) {
        // A node reached by several markers contributes once.
        if self.processed.contains(&std::ptr::from_ref(node)) {
            return;
        }
        if node.has_component(|c| matches!(c, SceneComponent::Obstacle { .. } | SceneComponent::CrowdAgent)) {
            return;
        }
        self.processed.insert(std::ptr::from_ref(node));

        let enabled = parent_enabled && node.enabled;
        let to_mesh_space = self.inverse * world;
        let components = move || {
            node.components
                .iter()
                .filter(move |c| enabled && c.enabled)
                .map(|c| &c.kind)
        };

        let mut shape_found = false;
        for shape in components().filter_map(|kind| match kind {
            SceneComponent::CollisionShape(shape) => Some(shape),
            _ => None,
        }) {
            if let Some(trimesh) = shape_trimesh(shape, &(to_mesh_space * shape.offset), self.area) {
                shape_found = true;
                self.push(trimesh, node);
            }
        }

        if !shape_found {
            for kind in components() {
                let (model, lod) = match kind {
                    SceneComponent::StaticModel { model, occlusion_lod } => (model, *occlusion_lod),
                    SceneComponent::TerrainPatch { model } => (model, 0),
                    _ => continue,
                };
                let mut trimesh = TriMesh::default();
                push_model(&mut trimesh, model, lod, &to_mesh_space, self.area);
                self.push(trimesh, node);
            }
        }

        if self.recursive {
            for child in &node.children {
                self.collect(child, world * child.transform, enabled);
            }
        }
    }

    fn push(&mut self, trimesh: TriMesh, node: &SceneNode) {
        let Some(bounds) = trimesh.compute_aabb().filter(|_| !trimesh.is_empty()) else {
            tracing::debug!("Skipping navigation geometry without triangles on node `{}`", node.name);
            return;
        };
        self.geometry.push(NavigationGeometryInfo {
            source: NavigableSource::TriMesh(trimesh),
            bounds,
        });
    }
}

/// Triangles of a box, triangle mesh or convex hull shape. `None` for other shapes.
fn shape_trimesh(shape: &CollisionShape, transform: &Affine3A, area: AreaType) -> Option<TriMesh> {
    let mut trimesh = TriMesh::default();
    match &shape.kind {
        ShapeKind::Box => push_box(&mut trimesh, transform, area),
        ShapeKind::TriangleMesh(model) => push_model(&mut trimesh, model, shape.lod_level, transform, area),
        ShapeKind::ConvexHull(hull) => push_geometry(&mut trimesh, hull, transform, area),
        ShapeKind::Other => return None,
    }
    Some(trimesh)
}

const BOX_VERTICES: [Vec3; 8] = [
    Vec3::new(-0.5, 0.5, -0.5),
    Vec3::new(0.5, 0.5, -0.5),
    Vec3::new(0.5, -0.5, -0.5),
    Vec3::new(-0.5, -0.5, -0.5),
    Vec3::new(-0.5, 0.5, 0.5),
    Vec3::new(0.5, 0.5, 0.5),
    Vec3::new(0.5, -0.5, 0.5),
    Vec3::new(-0.5, -0.5, 0.5),
];

// Wound so every face points outwards.
const BOX_INDICES: [u32; 36] = [
    0, 1, 2, 0, 2, 3, 1, 5, 6, 1, 6, 2, 4, 5, 1, 4, 1, 0, 5, 4, 7, 5, 7, 6, 4, 0, 3, 4, 3, 7, 1, 0,
    4, 1, 4, 5,
];

fn push_box(trimesh: &mut TriMesh, transform: &Affine3A, area: AreaType) {
    let vertices = BOX_VERTICES.map(|v| Vec3A::from(transform.transform_point3(v)));
    trimesh.push_triangles(&vertices, &BOX_INDICES, area);
}

fn push_model(trimesh: &mut TriMesh, model: &ModelGeometry, lod: usize, transform: &Affine3A, area: AreaType) {
    for index in 0..model.geometries.len() {
        if let Some(geometry) = model.lod_geometry(index, lod) {
            push_geometry(trimesh, geometry, transform, area);
        }
    }
}

fn push_geometry(trimesh: &mut TriMesh, geometry: &TriangleGeometry, transform: &Affine3A, area: AreaType) {
    if !geometry.is_usable() {
        return;
    }
    let vertices: Vec<Vec3A> = geometry
        .vertices
        .iter()
        .map(|&v| transform.transform_point3(v).into())
        .collect();
    trimesh.push_triangles(&vertices, &geometry.indices, area);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_util::quad;

    fn trimeshes(collected: &CollectedGeometry) -> Vec<&TriMesh> {
        collected
            .geometry
            .iter()
            .filter_map(|info| match &info.source {
                NavigableSource::TriMesh(trimesh) => Some(trimesh),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn geometry_is_relative_to_the_root() {
        let root = SceneNode::new("root")
            .with_translation(Vec3::new(100.0, 0.0, 0.0))
            .with_component(SceneComponent::navigable())
            .with_child(
                SceneNode::new("floor")
                    .with_translation(Vec3::new(0.0, 1.0, 0.0))
                    .with_component(SceneComponent::StaticModel {
                        model: quad(4.0),
                        occlusion_lod: 0,
                    }),
            );
        let collected = collect_geometries(&root);
        let meshes = trimeshes(&collected);
        assert_eq!(meshes.len(), 1);
        assert_eq!(meshes[0].indices.len(), 2);
        assert_eq!(meshes[0].area_types, vec![AreaType::DEFAULT_WALKABLE; 2]);
        let bounds = collected.geometry[0].bounds;
        assert_eq!(bounds.min, Vec3A::new(-2.0, 1.0, -2.0));
        assert_eq!(bounds.max, Vec3A::new(2.0, 1.0, 2.0));
    }

    #[test]
    fn collision_shapes_replace_models() {
        let node = SceneNode::new("crate")
            .with_component(SceneComponent::Navigable {
                recursive: false,
                area_id: Some(7),
            })
            .with_component(SceneComponent::StaticModel {
                model: quad(4.0),
                occlusion_lod: 0,
            })
            .with_component(SceneComponent::CollisionShape(CollisionShape::cuboid(Vec3::splat(2.0))));
        let collected = collect_geometries(&node);
        let meshes = trimeshes(&collected);
        assert_eq!(meshes.len(), 1);
        assert_eq!(meshes[0].vertices.len(), 8);
        assert_eq!(meshes[0].indices.len(), 12);
        assert!(meshes[0].area_types.iter().all(|&area| area == AreaType(7)));
        assert_eq!(collected.geometry[0].bounds.max, Vec3A::ONE);
    }

    #[test]
    fn unsupported_shapes_fall_back_to_models() {
        let node = SceneNode::new("ball")
            .with_component(SceneComponent::navigable())
            .with_component(SceneComponent::CollisionShape(CollisionShape::new(ShapeKind::Other)))
            .with_component(SceneComponent::TerrainPatch {
                model: quad(2.0),
            });
        assert_eq!(trimeshes(&collect_geometries(&node)).len(), 1);
    }

    #[test]
    fn obstacles_agents_and_disabled_nodes_are_skipped() {
        let floor = |name: &str| {
            SceneNode::new(name).with_component(SceneComponent::StaticModel {
                model: quad(2.0),
                occlusion_lod: 0,
            })
        };
        let mut disabled = floor("disabled");
        disabled.enabled = false;
        let mut disabled_component = floor("disabled component");
        disabled_component.components[0].enabled = false;

        let root = SceneNode::new("root")
            .with_component(SceneComponent::navigable())
            .with_child(
                floor("obstacle")
                    .with_translation(Vec3::new(1.0, 0.0, 2.0))
                    .with_component(SceneComponent::Obstacle {
                        radius: 1.0,
                        height: 2.0,
                    })
                    .with_child(floor("below obstacle")),
            )
            .with_child(floor("agent").with_component(SceneComponent::CrowdAgent))
            .with_child(disabled.with_child(floor("below disabled")))
            .with_child(disabled_component)
            .with_child(floor("kept"));
        let collected = collect_geometries(&root);
        assert_eq!(trimeshes(&collected).len(), 1);
        assert_eq!(
            collected.obstacles,
            vec![NavObstacle {
                position: Vec3::new(1.0, 0.0, 2.0),
                radius: 1.0,
                height: 2.0,
            }]
        );
    }

    #[test]
    fn non_recursive_markers_stop_at_their_node() {
        let root = SceneNode::new("root")
            .with_component(SceneComponent::Navigable {
                recursive: false,
                area_id: None,
            })
            .with_child(SceneNode::new("child").with_component(SceneComponent::StaticModel {
                model: quad(2.0),
                occlusion_lod: 0,
            }));
        assert!(trimeshes(&collect_geometries(&root)).is_empty());
    }

    #[test]
    fn nested_markers_do_not_duplicate_nodes() {
        let child = SceneNode::new("child")
            .with_component(SceneComponent::navigable())
            .with_component(SceneComponent::StaticModel {
                model: quad(2.0),
                occlusion_lod: 0,
            });
        let root = SceneNode::new("root")
            .with_component(SceneComponent::navigable())
            .with_child(child);
        assert_eq!(trimeshes(&collect_geometries(&root)).len(), 1);
    }

    #[test]
    fn empty_models_are_skipped() {
        let node = SceneNode::new("empty")
            .with_component(SceneComponent::navigable())
            .with_component(SceneComponent::StaticModel {
                model: Arc::new(ModelGeometry::single(TriangleGeometry::default())),
                occlusion_lod: 0,
            });
        assert!(collect_geometries(&node).geometry.is_empty());
    }

    #[test]
    fn connections_and_areas_are_collected_everywhere() {
        let root = SceneNode::new("root")
            .with_translation(Vec3::new(0.0, 0.0, 10.0))
            .with_child(
                SceneNode::new("jump")
                    .with_translation(Vec3::new(1.0, 0.0, 0.0))
                    .with_component(SceneComponent::OffMeshConnection {
                        end_point: Vec3::new(4.0, 0.0, 0.0),
                        radius: 0.5,
                        bidirectional: true,
                        mask: 1,
                        area_id: 2,
                    }),
            )
            .with_child(
                SceneNode::new("mud")
                    .with_translation(Vec3::new(5.0, 0.0, 0.0))
                    .with_component(SceneComponent::NavArea {
                        bounds: Aabb3d::new(Vec3::ZERO, Vec3::ONE),
                        area_id: 3,
                    }),
            );

        let collected = collect_geometries(&root);
        assert_eq!(collected.geometry.len(), 2);
        let NavigableSource::OffMeshConnection(connection) = &collected.geometry[0].source else {
            panic!("expected an off-mesh connection");
        };
        assert_eq!(connection.start, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(connection.end, Vec3::new(5.0, 0.0, 0.0));
        assert!(connection.bidirectional);

        let NavigableSource::AreaVolume(volume) = &collected.geometry[1].source else {
            panic!("expected an area volume");
        };
        assert_eq!(volume.aabb.min, Vec3A::new(4.0, -1.0, -1.0));
        assert_eq!(volume.area, AreaType(3));
        assert_eq!(collected.areas.len(), 1);
        assert_eq!(collected.areas[0].world_center, Vec3::new(5.0, 0.0, 10.0));
        assert_eq!(collected.areas[0].world_bounds.max, Vec3A::new(6.0, 1.0, 11.0));
    }

    #[test]
    fn padding_grows_the_scene_bounds() {
        assert_eq!(calculate_bounding_box(&[], Vec3::ONE), None);
        let info = NavigationGeometryInfo {
            source: NavigableSource::TriMesh(TriMesh::default()),
            bounds: Aabb3d::from_min_max(Vec3::ZERO, Vec3::splat(2.0)),
        };
        let bounds = calculate_bounding_box(&[info], Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(
            bounds,
            Some(Aabb3d::from_min_max(Vec3::new(-1.0, -2.0, -3.0), Vec3::new(3.0, 4.0, 5.0)))
        );
    }
}
