use std::sync::Arc;

use glam::Vec3;

use crate::scene::{ModelGeometry, SceneComponent, SceneNode, TriangleGeometry};

/// An upward facing square of `size` centered on the origin.
pub(crate) fn quad(size: f32) -> Arc<ModelGeometry> {
    let h = size * 0.5;
    Arc::new(ModelGeometry::single(TriangleGeometry {
        vertices: vec![
            Vec3::new(-h, 0.0, -h),
            Vec3::new(-h, 0.0, h),
            Vec3::new(h, 0.0, h),
            Vec3::new(h, 0.0, -h),
        ],
        indices: vec![0, 1, 2, 0, 2, 3],
    }))
}

/// A navigable node drawing [`quad`].
pub(crate) fn floor(size: f32) -> SceneNode {
    SceneNode::new("floor")
        .with_component(SceneComponent::navigable())
        .with_component(SceneComponent::StaticModel {
            model: quad(size),
            occlusion_lod: 0,
        })
}
