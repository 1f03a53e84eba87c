//! Whole scenes built into navigation meshes, saved, loaded and queried.

use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use glam::{IVec2, Vec3};
use navtile::{
    Aabb3d, DEFAULT_MAX_TILES, ModelGeometry, NavObstacle, NavigationDataError, NavigationEvent, NavigationMesh,
    POLY_REF_BITS, PathPointFlag, SceneComponent, SceneNode, TriangleGeometry,
};

/// An upward facing rectangle centered on the origin.
fn rect(half_x: f32, half_z: f32) -> Arc<ModelGeometry> {
    Arc::new(ModelGeometry::single(TriangleGeometry {
        vertices: vec![
            Vec3::new(-half_x, 0.0, -half_z),
            Vec3::new(-half_x, 0.0, half_z),
            Vec3::new(half_x, 0.0, half_z),
            Vec3::new(half_x, 0.0, -half_z),
        ],
        indices: vec![0, 1, 2, 0, 2, 3],
    }))
}

fn slab(name: &str, center: Vec3, half_x: f32, half_z: f32) -> SceneNode {
    SceneNode::new(name)
        .with_translation(center)
        .with_component(SceneComponent::StaticModel {
            model: rect(half_x, half_z),
            occlusion_lod: 0,
        })
}

fn scene(children: impl IntoIterator<Item = SceneNode>) -> SceneNode {
    children
        .into_iter()
        .fold(SceneNode::new("scene").with_component(SceneComponent::navigable()), |root, child| {
            root.with_child(child)
        })
}

/// A 10x10 floor in the middle of tile (0, 0).
fn single_floor() -> SceneNode {
    scene([slab("floor", Vec3::new(19.2, 0.0, 19.2), 5.0, 5.0)])
}

/// Two 10x10 floors side by side along x, centered on z = 10, optionally joined by a bridge.
fn two_floors(bridge: bool) -> SceneNode {
    let mut children = vec![
        slab("west", Vec3::new(-10.0, 0.0, 10.0), 5.0, 5.0),
        slab("east", Vec3::new(10.0, 0.0, 10.0), 5.0, 5.0),
    ];
    if bridge {
        children.push(slab("bridge", Vec3::new(0.0, 0.0, 10.0), 5.5, 1.5));
    }
    scene(children)
}

fn built(root: &SceneNode) -> NavigationMesh {
    let mut mesh = NavigationMesh::default();
    mesh.rebuild(root).unwrap();
    mesh
}

fn sorted_tiles(mesh: &NavigationMesh) -> Vec<IVec2> {
    let mut tiles = mesh.all_tile_indices();
    tiles.sort_by_key(|index| (index.x, index.y));
    tiles
}

#[test]
fn empty_scene_allocates_the_default_capacity() {
    let mut mesh = NavigationMesh::default();
    let events = mesh.channel();
    mesh.rebuild(&SceneNode::new("empty")).unwrap();

    assert!(mesh.is_allocated());
    assert_eq!(mesh.settings().max_tiles(), DEFAULT_MAX_TILES);
    assert!(mesh.all_tile_indices().is_empty());
    assert_eq!(events.try_iter().collect::<Vec<_>>(), vec![NavigationEvent::MeshRebuilt]);
}

#[test]
fn single_floor_builds_one_tile() {
    let mesh = built(&single_floor());
    assert_eq!(mesh.settings().max_tiles(), 1);
    assert_eq!(mesh.all_tile_indices(), vec![IVec2::ZERO]);
    assert!(mesh.has_tile(IVec2::ZERO));
    assert_eq!(mesh.tile_index(Vec3::new(19.2, 0.0, 19.2)), IVec2::ZERO);

    let nearest = mesh.find_nearest_point(Vec3::new(19.2, 0.5, 19.2), Vec3::ONE, None);
    assert_relative_eq!(nearest.x, 19.2, epsilon = 1e-3);
    assert!(nearest.y.abs() <= mesh.settings().cell_height() + 1e-3, "{nearest}");
    assert_relative_eq!(nearest.z, 19.2, epsilon = 1e-3);
}

#[test]
fn floor_centered_on_the_origin_stays_at_ground_height() {
    let mesh = built(&scene([slab("floor", Vec3::ZERO, 5.0, 5.0)]));
    // Tile indices are floored, so the padded bounds straddle four tiles around the origin.
    assert_eq!(
        sorted_tiles(&mesh),
        vec![IVec2::new(-1, -1), IVec2::new(-1, 0), IVec2::new(0, -1), IVec2::new(0, 0)]
    );

    let nearest = mesh.find_nearest_point(Vec3::ZERO, Vec3::ONE, None);
    assert!(nearest.x.abs() < 1e-3 && nearest.z.abs() < 1e-3, "{nearest}");
    assert!(nearest.y >= -1e-4, "{nearest}");
    assert!(nearest.y <= mesh.settings().cell_height() + 1e-4, "{nearest}");

    for point in [Vec3::new(2.0, 0.3, -1.5), Vec3::new(-3.0, -0.3, 3.0)] {
        let nearest = mesh.find_nearest_point(point, Vec3::ONE, None);
        assert!(nearest.y.abs() <= mesh.settings().cell_height() + 1e-4, "{nearest}");
    }
}

#[test]
fn bridge_connects_floors_across_tiles() {
    let mesh = built(&two_floors(true));
    assert_eq!(sorted_tiles(&mesh), vec![IVec2::new(-1, 0), IVec2::new(0, 0)]);

    let start = Vec3::new(-10.0, 0.0, 13.0);
    let end = Vec3::new(10.0, 0.0, 13.0);
    let path = mesh.find_path(start, end, Vec3::ONE, None);
    assert!(path.len() >= 3, "{path:?}");
    assert_eq!(path.first().map(|point| point.flag), Some(PathPointFlag::Start));
    assert_eq!(path.last().map(|point| point.flag), Some(PathPointFlag::End));

    let last = path[path.len() - 1].position;
    assert_relative_eq!(last.x, end.x, epsilon = 1e-2);
    assert_relative_eq!(last.z, end.z, epsilon = 1e-2);
    // Every corner in between hugs the bridge.
    for point in &path[1..path.len() - 1] {
        assert!((point.position.z - 10.0).abs() <= 2.0, "{:?}", point.position);
    }
}

#[test]
fn unreachable_end_is_clamped_to_the_reachable_floor() {
    let mesh = built(&two_floors(false));
    let path = mesh.find_path(Vec3::new(-10.0, 0.0, 10.0), Vec3::new(10.0, 0.0, 10.0), Vec3::ONE, None);
    let last = path.last().expect("a partial path");
    assert_eq!(last.flag, PathPointFlag::End);
    assert!(last.position.x < -4.0, "{:?}", last.position);
}

#[test]
fn off_mesh_connection_joins_separate_floors() {
    let root = two_floors(false).with_child(
        SceneNode::new("jump")
            .with_translation(Vec3::new(-6.5, 0.0, 10.0))
            .with_component(SceneComponent::OffMeshConnection {
                end_point: Vec3::new(13.0, 0.0, 0.0),
                radius: 0.5,
                bidirectional: true,
                mask: 1,
                area_id: 1,
            }),
    );
    let mesh = built(&root);
    let end = Vec3::new(10.0, 0.0, 10.0);
    let path = mesh.find_path(Vec3::new(-10.0, 0.0, 10.0), end, Vec3::ONE, None);
    assert!(path.iter().any(|point| point.flag == PathPointFlag::OffMesh), "{path:?}");
    let last = path.last().expect("a path");
    assert_relative_eq!(last.position.x, end.x, epsilon = 1e-2);
}

#[test]
fn height_range_limits_the_built_geometry() {
    let root = scene([
        slab("ground", Vec3::new(19.2, 0.0, 19.2), 5.0, 5.0),
        slab("roof", Vec3::new(19.2, 10.0, 19.2), 5.0, 5.0),
    ]);
    let mut mesh = NavigationMesh::default();
    mesh.settings_mut().set_height_range(Some((-1.0, 1.0)));
    mesh.rebuild(&root).unwrap();

    let high = Vec3::new(19.2, 10.5, 19.2);
    assert_eq!(mesh.find_nearest_point(high, Vec3::ONE, None), high);
    let low = mesh.find_nearest_point(Vec3::new(19.2, 0.5, 19.2), Vec3::ONE, None);
    assert!(low.y.abs() <= 0.25, "{low}");
}

#[test]
fn area_volumes_are_stamped_into_polygons() {
    let root = single_floor().with_child(
        SceneNode::new("water")
            .with_translation(Vec3::new(19.2, 0.0, 19.2))
            .with_component(SceneComponent::NavArea {
                bounds: Aabb3d::new(Vec3::ZERO, Vec3::new(2.0, 1.0, 5.0)),
                area_id: 3,
            }),
    );
    let mut mesh = built(&root);
    mesh.set_area_cost(3, 4.0);
    assert_relative_eq!(mesh.area_cost(3), 4.0);
    assert_relative_eq!(mesh.area_cost(4), 1.0);

    let tile = mesh.nav_mesh().and_then(|nav_mesh| nav_mesh.tile_at(0, 0, 0)).expect("a tile");
    let areas: Vec<u8> = tile.data().polygons.iter().map(|poly| poly.area).collect();
    assert!(areas.contains(&3), "{areas:?}");
    assert!(areas.contains(&255), "{areas:?}");
    assert_eq!(mesh.nav_areas().len(), 1);

    let path = mesh.find_path(
        Vec3::new(16.0, 0.0, 19.2),
        Vec3::new(19.2, 0.0, 19.2),
        Vec3::ONE,
        None,
    );
    assert_eq!(path.first().map(|point| point.area_id), Some(0));
    assert_eq!(path.last().map(|point| point.area_id), Some(3));
}

#[test]
fn rebuilding_is_idempotent() {
    let root = two_floors(true);
    let mut mesh = built(&root);
    let first = mesh.navigation_data();
    mesh.rebuild(&root).unwrap();
    assert_eq!(mesh.navigation_data(), first);
}

#[test]
fn tile_blocks_move_between_meshes() {
    let source = built(&single_floor());
    let block = source.tile_data(IVec2::ZERO);
    assert!(!block.is_empty());
    assert!(source.tile_data(IVec2::new(5, 5)).is_empty());

    let mut target = NavigationMesh::default();
    target.allocate().unwrap();
    let events = target.channel();
    target.add_tile(&block).unwrap();
    assert_eq!(events.try_recv(), Ok(NavigationEvent::TileAdded(IVec2::ZERO)));
    assert!(target.has_tile(IVec2::ZERO));

    let sample = Vec3::new(18.0, 0.5, 20.0);
    assert_eq!(
        target.find_nearest_point(sample, Vec3::ONE, None),
        source.find_nearest_point(sample, Vec3::ONE, None)
    );

    // The column is taken now.
    assert!(target.add_tile(&block).is_err());
}

#[test]
fn whole_mesh_round_trips() {
    let source = built(&two_floors(true));
    let data = source.navigation_data();

    let mut copy = NavigationMesh::default();
    let events = copy.channel();
    copy.set_navigation_data(&data).unwrap();
    assert!(events.try_recv().is_err());

    assert_eq!(sorted_tiles(&copy), sorted_tiles(&source));
    let (a, b) = (source.nav_mesh().unwrap().params(), copy.nav_mesh().unwrap().params());
    assert_eq!(a.tile_width, b.tile_width);
    assert_eq!(a.tile_height, b.tile_height);
    assert_eq!(a.max_tiles, b.max_tiles);
    assert_eq!(a.max_polys, b.max_polys);
    assert_eq!(copy.navigation_data(), data);
}

#[test]
fn incompatible_data_leaves_the_mesh_unallocated() {
    let mut data = built(&single_floor()).navigation_data();
    data[32..36].copy_from_slice(&99i32.to_le_bytes());

    let mut mesh = built(&single_floor());
    let err = mesh.set_navigation_data(&data).unwrap_err();
    assert!(matches!(err, NavigationDataError::Incompatible { version: 99 }));
    assert!(!mesh.is_allocated());
    assert!(mesh.all_tile_indices().is_empty());
}

#[test]
fn truncated_tile_keeps_the_tiles_before_it() {
    let data = built(&two_floors(true)).navigation_data();
    let mut mesh = NavigationMesh::default();
    let err = mesh.set_navigation_data(&data[..data.len() - 8]).unwrap_err();
    assert!(matches!(err, NavigationDataError::Tile { index: 1, .. }), "{err}");
    assert_eq!(mesh.all_tile_indices().len(), 1);
}

#[test]
fn capacity_never_exceeds_the_reference_space() {
    let mut mesh = NavigationMesh::default();
    for bits in 0..=12 {
        mesh.allocate_with(1 << bits).unwrap();
        let params = mesh.nav_mesh().unwrap().params();
        assert_eq!(params.max_tiles, 1 << bits);
        assert!(u64::from(params.max_tiles) * u64::from(params.max_polys) <= 1 << POLY_REF_BITS);
    }
    // Requests that are not powers of two are rounded up.
    mesh.allocate_with(100).unwrap();
    assert_eq!(mesh.nav_mesh().unwrap().max_tiles(), 128);
}

#[test]
fn tile_changes_raise_events() {
    let root = two_floors(true);
    let mut mesh = built(&root);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    mesh.subscribe(move |event| sink.lock().unwrap().push(*event));

    let built_tiles = mesh
        .build_tiles_in_region(&root, &Aabb3d::from_min_max(Vec3::new(1.0, 0.0, 1.0), Vec3::new(2.0, 0.0, 2.0)))
        .unwrap();
    assert_eq!(built_tiles, 1);
    mesh.remove_tile(IVec2::new(-1, 0));
    mesh.remove_tile(IVec2::new(7, 7));
    mesh.remove_all_tiles();

    let events = seen.lock().unwrap().clone();
    assert!(matches!(events[0], NavigationEvent::AreaRebuilt { .. }));
    assert_eq!(
        events[1..],
        [
            NavigationEvent::TileAdded(IVec2::ZERO),
            NavigationEvent::TileRemoved(IVec2::new(-1, 0)),
            NavigationEvent::AllTilesRemoved,
        ]
    );
    assert!(mesh.is_allocated());
    assert!(mesh.all_tile_indices().is_empty());

    mesh.clear();
    assert!(!mesh.is_allocated());
}

#[test]
fn transformed_root_moves_every_query() {
    let root = single_floor().with_translation(Vec3::new(0.0, 5.0, -100.0));
    let mesh = built(&root);
    assert_eq!(mesh.all_tile_indices(), vec![IVec2::ZERO]);
    assert_eq!(mesh.tile_index(Vec3::new(19.2, 5.0, -80.8)), IVec2::ZERO);

    let nearest = mesh.find_nearest_point(Vec3::new(19.2, 5.5, -80.8), Vec3::ONE, None);
    assert_relative_eq!(nearest.y, 5.0, epsilon = 0.25);
    let path = mesh.find_path_positions(
        Vec3::new(16.0, 5.0, -80.8),
        Vec3::new(22.0, 5.0, -80.8),
        Vec3::ONE,
        None,
    );
    assert_eq!(path.len(), 2);
    assert_relative_eq!(path[1].z, -80.8, epsilon = 1e-2);
}

fn horizontal_distance(a: Vec3, b: Vec3) -> f32 {
    (a - b).with_y(0.0).length()
}

#[test]
fn obstacle_cuts_the_bridge_until_removed() {
    let mut mesh = built(&two_floors(true));
    let events = mesh.channel();
    let (start, end) = (Vec3::new(-10.0, 0.0, 10.0), Vec3::new(10.0, 0.0, 10.0));
    let reaches_end = |mesh: &NavigationMesh| {
        let path = mesh.find_path(start, end, Vec3::ONE, None);
        path.last().is_some_and(|point| horizontal_distance(point.position, end) < 1e-2)
    };
    assert!(reaches_end(&mesh));

    let obstacle = NavObstacle {
        position: Vec3::new(0.0, 0.0, 10.0),
        radius: 2.5,
        height: 2.0,
    };
    let key = mesh.add_obstacle(obstacle);
    assert!(!reaches_end(&mesh));
    let path = mesh.find_path(start, end, Vec3::ONE, None);
    assert!(path.last().expect("a partial path").position.x < 0.0, "{path:?}");

    let added: Vec<_> = events.try_iter().collect();
    // The bridge straddles two tile columns.
    let rebuilt = added
        .iter()
        .filter(|event| matches!(event, NavigationEvent::AreaRebuilt { .. }))
        .count();
    assert_eq!(rebuilt, 2);
    assert_eq!(
        added.last(),
        Some(&NavigationEvent::ObstacleAdded {
            position: obstacle.position,
            radius: 2.5,
            height: 2.0,
        })
    );

    assert_eq!(mesh.remove_obstacle(key), Some(obstacle));
    assert!(reaches_end(&mesh));
    assert!(events.try_iter().any(|event| matches!(event, NavigationEvent::ObstacleRemoved { .. })));
    assert_eq!(mesh.remove_obstacle(key), None);
    assert_eq!(mesh.obstacles().count(), 0);
}

#[test]
fn moved_obstacle_follows_silently() {
    let mut mesh = built(&single_floor());
    let center = Vec3::new(19.2, 0.0, 19.2);
    let extents = Vec3::new(4.0, 1.0, 4.0);
    let key = mesh.add_obstacle(NavObstacle {
        position: center,
        radius: 2.0,
        height: 2.0,
    });
    let nearest = mesh.find_nearest_point(center, extents, None);
    assert!(horizontal_distance(nearest, center) > 1.2, "{nearest}");

    let events = mesh.channel();
    let moved = NavObstacle {
        position: center - Vec3::X * 3.5,
        radius: 2.0,
        height: 2.0,
    };
    assert!(mesh.obstacle_changed(key, moved));
    assert_eq!(mesh.obstacle(key), Some(&moved));
    let nearest = mesh.find_nearest_point(center, extents, None);
    assert!(horizontal_distance(nearest, center) < 1e-2, "{nearest}");
    assert!(events.try_iter().all(|event| matches!(event, NavigationEvent::AreaRebuilt { .. })));
}

#[test]
fn obstacle_above_the_floor_leaves_it_walkable() {
    let mut mesh = built(&single_floor());
    let center = Vec3::new(19.2, 0.0, 19.2);
    mesh.add_obstacle(NavObstacle {
        position: center + Vec3::Y * 3.0,
        radius: 2.0,
        height: 2.0,
    });
    let nearest = mesh.find_nearest_point(center, Vec3::new(4.0, 1.0, 4.0), None);
    assert!(horizontal_distance(nearest, center) < 1e-2, "{nearest}");
}

#[test]
fn scene_obstacles_are_registered_on_rebuild() {
    let center = Vec3::new(19.2, 0.0, 19.2);
    let root = single_floor().with_child(
        SceneNode::new("crate")
            .with_translation(center)
            .with_component(SceneComponent::Obstacle {
                radius: 2.0,
                height: 2.0,
            }),
    );
    let mut mesh = NavigationMesh::default();
    mesh.add_obstacle(NavObstacle {
        position: Vec3::new(-50.0, 0.0, -50.0),
        radius: 1.0,
        height: 1.0,
    });
    let events = mesh.channel();
    mesh.rebuild(&root).unwrap();

    // Only the scene's obstacles survive a rebuild.
    let obstacles: Vec<_> = mesh.obstacles().map(|(_, obstacle)| *obstacle).collect();
    assert_eq!(
        obstacles,
        vec![NavObstacle {
            position: center,
            radius: 2.0,
            height: 2.0,
        }]
    );
    let nearest = mesh.find_nearest_point(center, Vec3::new(4.0, 1.0, 4.0), None);
    assert!(horizontal_distance(nearest, center) > 1.2, "{nearest}");
    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(
        events[events.len() - 2..],
        [
            NavigationEvent::MeshRebuilt,
            NavigationEvent::ObstacleAdded {
                position: center,
                radius: 2.0,
                height: 2.0,
            },
        ]
    );
}

#[test]
fn loaded_mesh_defers_obstacles_to_the_next_rebuild() {
    let root = single_floor();
    let source = built(&root);
    let mut mesh = NavigationMesh::default();
    mesh.set_navigation_data(&source.navigation_data()).unwrap();

    let center = Vec3::new(19.2, 0.0, 19.2);
    let obstacle = NavObstacle {
        position: center,
        radius: 2.0,
        height: 2.0,
    };
    mesh.add_obstacle(obstacle);
    let extents = Vec3::new(4.0, 1.0, 4.0);
    let nearest = mesh.find_nearest_point(center, extents, None);
    assert!(horizontal_distance(nearest, center) < 1e-2, "{nearest}");
    assert_eq!(mesh.obstacles().count(), 1);

    // Tile ranges keep registered obstacles.
    mesh.build_tiles(&root, IVec2::ZERO, IVec2::ZERO).unwrap();
    let nearest = mesh.find_nearest_point(center, extents, None);
    assert!(horizontal_distance(nearest, center) > 1.2, "{nearest}");
}
