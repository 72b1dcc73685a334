// src/culling.rs
//! CPU frustum culling for model meshes.
//!
//! Planes come straight out of the view-projection matrix (Gribb/Hartmann) for a 0..1 depth
//! range, which is what `Mat4::perspective_rh` produces. Tests are conservative: a box that
//! straddles a plane counts as visible.

use glam::{Mat4, Vec3, Vec4};

use crate::scene::Aabb;

/// Six normalized planes `(normal, distance)`; inside is `dot(n, p) + d >= 0`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    pub fn from_view_proj(vp: &Mat4) -> Self {
        let r0 = vp.row(0);
        let r1 = vp.row(1);
        let r2 = vp.row(2);
        let r3 = vp.row(3);
        let planes = [
            r3 + r0, // left
            r3 - r0, // right
            r3 + r1, // bottom
            r3 - r1, // top
            r2,      // near (depth 0)
            r3 - r2, // far
        ]
        .map(normalize_plane);
        Self { planes }
    }

    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|p| {
            let n = p.truncate();
            // Corner furthest along the plane normal.
            let positive = Vec3::select(n.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            n.dot(positive) + p.w >= 0.0
        })
    }
}

fn normalize_plane(p: Vec4) -> Vec4 {
    let len = p.truncate().length().max(1e-6);
    p / len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraState;

    fn frustum() -> Frustum {
        Frustum::from_view_proj(&CameraState::default().view_proj_matrix())
    }

    #[test]
    fn origin_box_is_visible() {
        let f = frustum();
        let b = Aabb { min: Vec3::splat(-1.0), max: Vec3::splat(1.0) };
        assert!(f.intersects_aabb(&b));
    }

    #[test]
    fn boxes_behind_or_beside_are_culled() {
        let f = frustum();
        let behind = Aabb { min: Vec3::new(-1.0, -1.0, 20.0), max: Vec3::new(1.0, 1.0, 22.0) };
        assert!(!f.intersects_aabb(&behind));
        let beside = Aabb { min: Vec3::new(200.0, -1.0, -1.0), max: Vec3::new(202.0, 1.0, 1.0) };
        assert!(!f.intersects_aabb(&beside));
    }

    #[test]
    fn straddling_box_counts_as_visible() {
        let f = frustum();
        let wide = Aabb { min: Vec3::new(-500.0, -1.0, -1.0), max: Vec3::new(500.0, 1.0, 1.0) };
        assert!(f.intersects_aabb(&wide));
    }
}
