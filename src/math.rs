//! Intersection tests used by the patch selection.

use bevy::{
    math::{Vec2, Vec3A},
    render::primitives::{Aabb, Frustum},
};

/// The relation of a bounding volume to a view frustum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intersection {
    Outside,
    Intersecting,
    Inside,
}

/// Classifies the box against the half spaces of the frustum.
///
/// The test is conservative: a box lying outside of the frustum but not entirely
/// behind any single plane is reported as intersecting, never the other way around.
pub fn classify_aabb(frustum: &Frustum, aabb: &Aabb) -> Intersection {
    let min = aabb.min();
    let max = aabb.max();

    let mut intersection = Intersection::Inside;

    for half_space in &frustum.half_spaces {
        let normal = half_space.normal();
        let positive = normal.cmpge(Vec3A::ZERO);

        // corners furthest along and against the normal
        let p_vertex = Vec3A::select(positive, max, min);
        let n_vertex = Vec3A::select(positive, min, max);

        if normal.dot(p_vertex) + half_space.d() < 0.0 {
            return Intersection::Outside;
        }
        if normal.dot(n_vertex) + half_space.d() < 0.0 {
            intersection = Intersection::Intersecting;
        }
    }

    intersection
}

/// Whether the rectangle touches the circle, including its boundary.
#[inline]
pub fn patch_intersects_circle(min: Vec2, max: Vec2, center: Vec2, radius: f32) -> bool {
    let closest = center.clamp(min, max);
    center.distance_squared(closest) <= radius * radius
}
