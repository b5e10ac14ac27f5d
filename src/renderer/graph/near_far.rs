//! Shared Depth Range
//!
//! Every stage of a pipeline linearizes depth with the same `(near, far)`
//! pair. The pair is computed at most once per frame by a
//! [`NearFarTracker`] from a mask-ignoring bound of the whole scene, published
//! as the `NearFarPlanes` uniform, and applied to each camera's projection by
//! its [`NearFarClamp`].
//!
//! ```text
//!  cull (frame N) ──► NearFarSource ──► tracker (guarded by frame N)
//!                                          │
//!                     ┌────────────────────┼─────────────────────┐
//!                     ▼                    ▼                     ▼
//!              NearFarPlanes        clamp(GBuffer proj)   clamp(forward proj)
//! ```
//!
//! Projections follow wgpu conventions: right-handed view space and clip
//! depth in `[0, 1]`.

use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4};
use parking_lot::Mutex;

use super::shader::{Uniform, UniformValue};

/// Reports the depth range of the scene as seen from a view matrix.
pub trait NearFarSource {
    /// `(near, far)` distances along the view direction, or `None` if the
    /// scene is empty or entirely behind the viewer.
    fn scene_near_far(&self, view: &Mat4) -> Option<(f32, f32)>;
}

/// Any source that knows nothing: the projection's own range is used.
impl NearFarSource for () {
    fn scene_near_far(&self, _view: &Mat4) -> Option<(f32, f32)> {
        None
    }
}

/// Near/far source over a list of world-space bounding boxes.
#[derive(Debug, Clone, Default)]
pub struct BoundsNearFar {
    pub bounds: Vec<(Vec3, Vec3)>,
    /// Smallest allowed `near / far` ratio.
    pub near_far_ratio: f32,
}

impl BoundsNearFar {
    #[must_use]
    pub fn new(bounds: Vec<(Vec3, Vec3)>) -> Self {
        Self {
            bounds,
            near_far_ratio: 0.0005,
        }
    }
}

impl NearFarSource for BoundsNearFar {
    fn scene_near_far(&self, view: &Mat4) -> Option<(f32, f32)> {
        let mut near = f32::MAX;
        let mut far = f32::MIN;
        for (min, max) in &self.bounds {
            for i in 0..8 {
                let corner = Vec3::new(
                    if i & 1 == 0 { min.x } else { max.x },
                    if i & 2 == 0 { min.y } else { max.y },
                    if i & 4 == 0 { min.z } else { max.z },
                );
                let depth = -view.transform_point3(corner).z;
                near = near.min(depth);
                far = far.max(depth);
            }
        }
        if far <= 0.0 {
            return None;
        }
        Some((near.max(far * self.near_far_ratio), far))
    }
}

// ============================================================================
// Projection Helpers
// ============================================================================

#[inline]
#[must_use]
pub fn is_orthographic(projection: &Mat4) -> bool {
    projection.z_axis.w == 0.0 && projection.w_axis.w == 1.0
}

/// Reads the near/far distances encoded in a projection matrix.
#[must_use]
pub fn extract_near_far(projection: &Mat4) -> Option<(f32, f32)> {
    let z = projection.z_axis.z;
    let w = projection.w_axis.z;
    if z == 0.0 {
        return None;
    }
    let (near, far) = if is_orthographic(projection) {
        (w / z, (w - 1.0) / z)
    } else {
        (w / z, w / (z + 1.0))
    };
    (near.is_finite() && !far.is_nan()).then_some((near, far))
}

/// NDC depth a projection assigns to a point `distance` in front of the eye.
fn ndc_depth(projection: &Mat4, distance: f32) -> f32 {
    let clip = *projection * Vec4::new(0.0, 0.0, -distance, 1.0);
    clip.z / clip.w
}

/// Rewrites `projection` so that `[near, far]` maps to depth `[0, 1]`.
///
/// Orthographic matrices get their depth row rebuilt. Perspective matrices are
/// post-composed with a clip-space depth remap, which keeps any skew or offset
/// already present in the matrix.
pub fn clamp_projection(projection: &mut Mat4, near: f32, far: f32) {
    if is_orthographic(projection) {
        let range = near - far;
        if range.abs() <= f32::EPSILON {
            return;
        }
        projection.z_axis.z = 1.0 / range;
        projection.w_axis.z = near / range;
        return;
    }

    let t_near = ndc_depth(projection, near);
    let t_far = ndc_depth(projection, far);
    let span = t_far - t_near;
    if !span.is_finite() || span.abs() <= f32::EPSILON {
        return;
    }
    let s = 1.0 / span;
    let remap = Mat4::from_cols(
        Vec4::X,
        Vec4::Y,
        Vec4::new(0.0, 0.0, s, 0.0),
        Vec4::new(0.0, 0.0, -t_near * s, 1.0),
    );
    *projection = remap * *projection;
}

// ============================================================================
// Tracker & Clamp
// ============================================================================

#[derive(Debug)]
struct TrackerState {
    last_frame: Option<u64>,
    value: Vec2,
}

/// Per-pipeline `(near, far)` pair, recomputed at most once per frame.
#[derive(Debug, Clone)]
pub struct NearFarTracker {
    state: Arc<Mutex<TrackerState>>,
    uniform: Uniform,
}

impl Default for NearFarTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl NearFarTracker {
    pub const UNIFORM_NAME: &'static str = "NearFarPlanes";

    #[must_use]
    pub fn new() -> Self {
        let initial = Vec2::splat(-1.0);
        Self {
            state: Arc::new(Mutex::new(TrackerState {
                last_frame: None,
                value: initial,
            })),
            uniform: Uniform::new(Self::UNIFORM_NAME, UniformValue::Vec2(initial)),
        }
    }

    /// The current `(near, far)`; `(-1, -1)` until first computed.
    #[must_use]
    pub fn value(&self) -> Vec2 {
        self.state.lock().value
    }

    /// The shared `NearFarPlanes` uniform.
    #[inline]
    #[must_use]
    pub fn uniform(&self) -> &Uniform {
        &self.uniform
    }

    /// Frame the value was last computed for.
    #[must_use]
    pub fn last_frame(&self) -> Option<u64> {
        self.state.lock().last_frame
    }

    /// Computes the scene depth range for `frame` unless already done.
    ///
    /// Falls back to the range encoded in `projection` when the source reports
    /// nothing. NaN results are rejected and the previous value is kept.
    pub fn cull_with_near_far(
        &self,
        frame: u64,
        view: &Mat4,
        projection: &Mat4,
        source: &dyn NearFarSource,
    ) -> Vec2 {
        let mut state = self.state.lock();
        if state.last_frame.is_some_and(|last| frame <= last) {
            return state.value;
        }

        match source
            .scene_near_far(view)
            .or_else(|| extract_near_far(projection))
        {
            Some((near, far)) if near.is_nan() || far.is_nan() => {
                log::warn!("NaN near/far ({near}, {far}) at frame {frame}, keeping previous value");
            }
            Some((near, far)) => state.value = Vec2::new(near, far),
            None => {}
        }

        state.last_frame = Some(frame);
        self.uniform.set(UniformValue::Vec2(state.value));
        state.value
    }

    /// Forces a value, e.g. for a host that computes bounds itself.
    pub fn set(&self, near: f32, far: f32) {
        let mut state = self.state.lock();
        state.value = Vec2::new(near, far);
        self.uniform.set(UniformValue::Vec2(state.value));
    }
}

/// Projection clamp installed on cameras; reads the shared pair.
#[derive(Debug, Clone)]
pub struct NearFarClamp {
    tracker: NearFarTracker,
}

impl NearFarClamp {
    #[must_use]
    pub fn new(tracker: NearFarTracker) -> Self {
        Self { tracker }
    }

    #[must_use]
    pub fn tracker(&self) -> &NearFarTracker {
        &self.tracker
    }

    /// Applies the shared range to `projection` when both values are positive.
    pub fn clamp(&self, projection: &mut Mat4) -> Option<(f32, f32)> {
        let value = self.tracker.value();
        if value.x > 0.0 && value.y > 0.0 {
            clamp_projection(projection, value.x, value.y);
            Some((value.x, value.y))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-3;

    fn mat_approx(a: &Mat4, b: &Mat4) -> bool {
        a.to_cols_array()
            .iter()
            .zip(b.to_cols_array().iter())
            .all(|(x, y)| (x - y).abs() < EPSILON)
    }

    #[test]
    fn extract_perspective_and_ortho() {
        let p = Mat4::perspective_rh(1.0, 1.5, 0.5, 200.0);
        let (n, f) = extract_near_far(&p).unwrap();
        assert!((n - 0.5).abs() < EPSILON);
        assert!((f - 200.0).abs() < 0.1);

        let o = Mat4::orthographic_rh(-1.0, 1.0, -1.0, 1.0, 2.0, 30.0);
        let (n, f) = extract_near_far(&o).unwrap();
        assert!((n - 2.0).abs() < EPSILON);
        assert!((f - 30.0).abs() < EPSILON);
    }

    #[test]
    fn clamp_rebuilds_perspective() {
        let mut p = Mat4::perspective_rh(0.8, 1.6, 0.1, 1000.0);
        clamp_projection(&mut p, 1.0, 50.0);
        assert!(mat_approx(&p, &Mat4::perspective_rh(0.8, 1.6, 1.0, 50.0)));
    }

    #[test]
    fn clamp_rebuilds_orthographic() {
        let mut o = Mat4::orthographic_rh(-4.0, 4.0, -3.0, 3.0, 0.1, 100.0);
        clamp_projection(&mut o, 5.0, 20.0);
        assert!(mat_approx(
            &o,
            &Mat4::orthographic_rh(-4.0, 4.0, -3.0, 3.0, 5.0, 20.0)
        ));
    }
}
