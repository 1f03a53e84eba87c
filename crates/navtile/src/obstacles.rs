//! Cylinders that block the walkable surface until they are removed.

use std::collections::BTreeSet;

use glam::{IVec2, Vec3, Vec3A};
use navtile_recast::{AreaCylinder, AreaType};

use crate::{NavigationMesh, events::NavigationEvent};

slotmap::new_key_type! {
    /// Handle of an obstacle registered with a [`NavigationMesh`].
    pub struct ObstacleKey;
}

/// An upright cylinder standing on `position`. Nothing below its top is walkable inside it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavObstacle {
    /// World position of the bottom center.
    pub position: Vec3,
    /// Horizontal reach from the center.
    pub radius: f32,
    /// Vertical reach above `position`.
    pub height: f32,
}

impl NavigationMesh {
    /// Registers an obstacle and rebuilds the tiles it touches.
    ///
    /// Without collected geometry, e.g. after loading navigation data, the obstacle only
    /// applies from the next rebuild on.
    pub fn add_obstacle(&mut self, obstacle: NavObstacle) -> ObstacleKey {
        let key = self.obstacles.insert(obstacle);
        let tiles = self.obstacle_tiles(&obstacle);
        self.rebuild_obstacle_tiles(tiles);
        self.events.send(NavigationEvent::ObstacleAdded {
            position: obstacle.position,
            radius: obstacle.radius,
            height: obstacle.height,
        });
        key
    }

    /// Unregisters an obstacle and rebuilds the tiles it touched. `None` if `key` is unknown.
    pub fn remove_obstacle(&mut self, key: ObstacleKey) -> Option<NavObstacle> {
        let obstacle = self.obstacles.remove(key)?;
        let tiles = self.obstacle_tiles(&obstacle);
        self.rebuild_obstacle_tiles(tiles);
        self.events.send(NavigationEvent::ObstacleRemoved {
            position: obstacle.position,
            radius: obstacle.radius,
            height: obstacle.height,
        });
        Some(obstacle)
    }

    /// Moves or resizes an obstacle without raising events. Returns `false` if `key` is unknown.
    pub fn obstacle_changed(&mut self, key: ObstacleKey, obstacle: NavObstacle) -> bool {
        let Some(slot) = self.obstacles.get_mut(key) else {
            return false;
        };
        let previous = std::mem::replace(slot, obstacle);
        let mut tiles = self.obstacle_tiles(&previous);
        tiles.extend(self.obstacle_tiles(&obstacle));
        self.rebuild_obstacle_tiles(tiles);
        true
    }

    /// A registered obstacle.
    pub fn obstacle(&self, key: ObstacleKey) -> Option<&NavObstacle> {
        self.obstacles.get(key)
    }

    /// Every registered obstacle.
    pub fn obstacles(&self) -> impl Iterator<Item = (ObstacleKey, &NavObstacle)> {
        self.obstacles.iter()
    }

    /// Returns `true` if the obstacle reaches into the column of tile `index`.
    pub fn is_obstacle_in_tile(&self, obstacle: &NavObstacle, index: IVec2) -> bool {
        let column = self.tile_bounding_box_column(index);
        let position = Vec3A::from(self.world_transform.inverse().transform_point3(obstacle.position));
        let closest = position.clamp(column.min, column.max);
        closest.distance(position) < obstacle.radius
    }

    /// The obstacles reaching into a tile column, as cylinders in navigation mesh space.
    pub(crate) fn obstacle_cylinders(&self, index: IVec2) -> Vec<AreaCylinder> {
        let inverse = self.world_transform.inverse();
        self.obstacles
            .values()
            .filter(|obstacle| self.is_obstacle_in_tile(obstacle, index))
            .map(|obstacle| AreaCylinder {
                position: inverse.transform_point3(obstacle.position).into(),
                radius: obstacle.radius,
                height: obstacle.height,
                area: AreaType::NOT_WALKABLE,
            })
            .collect()
    }

    fn obstacle_tiles(&self, obstacle: &NavObstacle) -> BTreeSet<(i32, i32)> {
        let position = self.world_transform.inverse().transform_point3(obstacle.position);
        let extent = Vec3::new(obstacle.radius, 0.0, obstacle.radius);
        let from = self.local_tile_index(position - extent);
        let to = self.local_tile_index(position + extent);
        let mut tiles = BTreeSet::new();
        for z in from.y..=to.y {
            for x in from.x..=to.x {
                if self.is_obstacle_in_tile(obstacle, IVec2::new(x, z)) {
                    tiles.insert((x, z));
                }
            }
        }
        tiles
    }

    fn rebuild_obstacle_tiles(&mut self, tiles: BTreeSet<(i32, i32)>) {
        if !self.is_allocated() {
            return;
        }
        let Some(geometry) = self.geometry.take() else {
            tracing::warn!("No collected geometry, obstacle applies from the next rebuild");
            return;
        };
        for (x, z) in tiles {
            if let Err(err) = self.build_tile(&geometry, x, z) {
                tracing::error!("Could not rebuild navigation mesh tile ({x}, {z}) around obstacle: {err}");
            }
        }
        self.geometry = Some(geometry);
    }
}
