//! The scene tree a [`NavigationMesh`](crate::NavigationMesh) collects its geometry from.
//!
//! Only the parts of a scene that matter for navigation are modelled: node transforms, enabled flags
//! and a closed set of components.

use std::sync::Arc;

use glam::{Affine3A, Vec3};
use navtile_recast::Aabb3d;

/// A node of the scene tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    /// Name, for diagnostics only.
    pub name: String,
    /// Transform relative to the parent. For the node passed to a build it is the world transform.
    pub transform: Affine3A,
    /// A disabled node disables all of its components and descendants.
    pub enabled: bool,
    /// Components attached to this node.
    pub components: Vec<Component>,
    /// Child nodes.
    pub children: Vec<SceneNode>,
}

impl Default for SceneNode {
    fn default() -> Self {
        Self {
            name: String::new(),
            transform: Affine3A::IDENTITY,
            enabled: true,
            components: Vec::new(),
            children: Vec::new(),
        }
    }
}

impl SceneNode {
    /// An enabled node without components or children.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sets the local transform.
    pub fn with_transform(mut self, transform: Affine3A) -> Self {
        self.transform = transform;
        self
    }

    /// Sets the local translation, keeping rotation and scale.
    pub fn with_translation(mut self, translation: Vec3) -> Self {
        self.transform.translation = translation.into();
        self
    }

    /// Attaches an enabled component.
    pub fn with_component(mut self, kind: SceneComponent) -> Self {
        self.components.push(Component::new(kind));
        self
    }

    /// Appends a child node.
    pub fn with_child(mut self, child: SceneNode) -> Self {
        self.children.push(child);
        self
    }

    /// Returns `true` if any component matches.
    pub fn has_component(&self, predicate: impl Fn(&SceneComponent) -> bool) -> bool {
        self.components.iter().any(|component| predicate(&component.kind))
    }
}

/// A component together with its own enabled flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// Disabled components are ignored.
    pub enabled: bool,
    /// What the component is.
    pub kind: SceneComponent,
}

impl Component {
    /// An enabled component.
    pub fn new(kind: SceneComponent) -> Self {
        Self {
            enabled: true,
            kind,
        }
    }
}

/// Every component kind the geometry collector understands.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneComponent {
    /// Marks the node, and its subtree if `recursive`, as navigation geometry.
    Navigable {
        /// Whether descendants contribute as well.
        recursive: bool,
        /// Area of the contributed triangles. Walkable triangles without one become fully walkable.
        area_id: Option<u8>,
    },
    /// A physics collision shape. Preferred over drawables on the same node.
    CollisionShape(CollisionShape),
    /// A renderable model.
    StaticModel {
        /// The rendered model.
        model: Arc<ModelGeometry>,
        /// The level of detail used for navigation.
        occlusion_lod: usize,
    },
    /// A patch of terrain. Always contributes its most detailed level.
    TerrainPatch {
        /// The patch geometry.
        model: Arc<ModelGeometry>,
    },
    /// A shortcut from this node to `end_point`.
    OffMeshConnection {
        /// The far end, relative to this node.
        end_point: Vec3,
        /// How close to the end points an agent has to be to use the connection.
        radius: f32,
        /// Whether the connection can be travelled in both directions.
        bidirectional: bool,
        /// Polygon flags of the connection.
        mask: u16,
        /// Area of the connection.
        area_id: u8,
    },
    /// A volume that overrides the area of the walkable surface inside it.
    NavArea {
        /// The volume, relative to this node.
        bounds: Aabb3d,
        /// The area stamped into the volume.
        area_id: u8,
    },
    /// A dynamic obstacle standing on the node's position. Its node is not baked into the mesh.
    Obstacle {
        /// Radius of the blocked cylinder.
        radius: f32,
        /// Height of the blocked cylinder above the node.
        height: f32,
    },
    /// A crowd agent. Its node is not baked into the mesh.
    CrowdAgent,
}

impl SceneComponent {
    /// A navigable marker that includes the whole subtree with walkable triangles at full area.
    pub fn navigable() -> Self {
        Self::Navigable {
            recursive: true,
            area_id: None,
        }
    }
}

/// A collision shape with its offset from the owning node.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionShape {
    /// The shape.
    pub kind: ShapeKind,
    /// Position, rotation and size of the shape relative to the node.
    pub offset: Affine3A,
    /// Level of detail of triangle mesh shapes.
    pub lod_level: usize,
}

impl CollisionShape {
    /// A shape placed at the node origin.
    pub fn new(kind: ShapeKind) -> Self {
        Self {
            kind,
            offset: Affine3A::IDENTITY,
            lod_level: 0,
        }
    }

    /// A box of the given size centered on the node.
    pub fn cuboid(size: Vec3) -> Self {
        Self {
            kind: ShapeKind::Box,
            offset: Affine3A::from_scale(size),
            lod_level: 0,
        }
    }
}

/// The shape types of [`CollisionShape`].
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeKind {
    /// The unit cube, scaled by the shape offset.
    Box,
    /// Triangles of a model.
    TriangleMesh(Arc<ModelGeometry>),
    /// A convex hull given as triangles.
    ConvexHull(Arc<TriangleGeometry>),
    /// Spheres, capsules and other analytic shapes. Navigation falls back to drawables for them.
    Other,
}

/// An indexed triangle list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TriangleGeometry {
    /// Vertex positions.
    pub vertices: Vec<Vec3>,
    /// Three indices per triangle.
    pub indices: Vec<u32>,
}

impl TriangleGeometry {
    /// Returns `true` if there is something to rasterize.
    pub fn is_usable(&self) -> bool {
        !self.vertices.is_empty() && self.indices.len() >= 3
    }
}

/// A model made of several geometries, each with one or more levels of detail.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelGeometry {
    /// `geometries[index][lod]`.
    pub geometries: Vec<Vec<TriangleGeometry>>,
}

impl ModelGeometry {
    /// A model with a single geometry and a single level of detail.
    pub fn single(geometry: TriangleGeometry) -> Self {
        Self {
            geometries: vec![vec![geometry]],
        }
    }

    /// The requested level of a geometry, or its least detailed one if `lod` is out of range.
    pub fn lod_geometry(&self, index: usize, lod: usize) -> Option<&TriangleGeometry> {
        let lods = self.geometries.get(index)?;
        lods.get(lod).or_else(|| lods.last())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lod_falls_back_to_the_coarsest_level() {
        let fine = TriangleGeometry {
            vertices: vec![Vec3::ZERO; 3],
            indices: vec![0, 1, 2],
        };
        let coarse = TriangleGeometry::default();
        let model = ModelGeometry {
            geometries: vec![vec![fine.clone(), coarse.clone()]],
        };
        assert_eq!(model.lod_geometry(0, 0), Some(&fine));
        assert_eq!(model.lod_geometry(0, 5), Some(&coarse));
        assert_eq!(model.lod_geometry(1, 0), None);
        assert!(!coarse.is_usable());
    }

    #[test]
    fn builder_helpers_compose_a_tree() {
        let node = SceneNode::new("root")
            .with_translation(Vec3::new(1.0, 2.0, 3.0))
            .with_component(SceneComponent::Obstacle { radius: 1.0, height: 2.0 })
            .with_child(SceneNode::new("child"));
        assert_eq!(node.transform.translation, Vec3::new(1.0, 2.0, 3.0).into());
        assert!(node.has_component(|c| matches!(c, SceneComponent::Obstacle { .. })));
        assert!(!node.has_component(|c| matches!(c, SceneComponent::CrowdAgent)));
        assert_eq!(node.children.len(), 1);
    }
}
