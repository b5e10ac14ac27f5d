//! View Frustum Corners
//!
//! Builds the eight world-space corners of a view frustum and the light-space
//! box that shadow cascades are fitted to.
//!
//! Corner order:
//!
//! ```text
//!   near: 0 (-x,-y)  1 (+x,-y)  2 (+x,+y)  3 (-x,+y)
//!   far:  4 (-x,-y)  5 (+x,-y)  6 (+x,+y)  7 (-x,+y)
//! ```

use glam::{Mat4, Vec3, Vec4};

use super::near_far::clamp_projection;

const NDC_XY: [(f32, f32); 4] = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub corners: [Vec3; 8],
    pub center_near: Vec3,
    pub center_far: Vec3,
    pub center: Vec3,
    /// Unit vector from the near center to the far center.
    pub direction: Vec3,
}

impl Frustum {
    /// Frustum of `projection * view`, optionally with near/far replaced by
    /// `preferred`.
    #[must_use]
    pub fn new(view: &Mat4, projection: &Mat4, preferred: Option<(f32, f32)>) -> Self {
        let mut projection = *projection;
        if let Some((near, far)) = preferred {
            clamp_projection(&mut projection, near, far);
        }
        let inverse = (projection * *view).inverse();

        let mut corners = [Vec3::ZERO; 8];
        for (layer, depth) in [0.0, 1.0].into_iter().enumerate() {
            for (i, (x, y)) in NDC_XY.iter().enumerate() {
                let p = inverse * Vec4::new(*x, *y, depth, 1.0);
                corners[layer * 4 + i] = p.truncate() / p.w;
            }
        }

        let center_near = corners[..4].iter().copied().sum::<Vec3>() / 4.0;
        let center_far = corners[4..].iter().copied().sum::<Vec3>() / 4.0;
        Self {
            corners,
            center_near,
            center_far,
            center: (center_near + center_far) * 0.5,
            direction: (center_far - center_near).normalize_or_zero(),
        }
    }

    /// Box around the corners and `reference_points`, in the space of
    /// `world_to_local`.
    #[must_use]
    pub fn shadow_bound(&self, reference_points: &[Vec3], world_to_local: &Mat4) -> ShadowBound {
        let mut bound = ShadowBound::EMPTY;
        for p in self.corners.iter().chain(reference_points) {
            bound.expand(world_to_local.transform_point3(*p));
        }
        bound
    }
}

/// Axis-aligned box in light space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowBound {
    pub min: Vec3,
    pub max: Vec3,
}

impl ShadowBound {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    pub fn expand(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    #[inline]
    #[must_use]
    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    /// Grows every axis thinner than `min_extent` to `min_extent` around its
    /// center.
    #[must_use]
    pub fn clamped(mut self, min_extent: f32) -> Self {
        for axis in 0..3 {
            if self.max[axis] - self.min[axis] < min_extent {
                let mid = (self.max[axis] + self.min[axis]) * 0.5;
                self.min[axis] = mid - min_extent * 0.5;
                self.max[axis] = mid + min_extent * 0.5;
            }
        }
        self
    }
}
