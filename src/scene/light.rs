//! Light Sources
//!
//! Plain light descriptions as the deferred lighting pass sees them. Lights
//! report themselves visible with [`LightSource::cull`], which upserts them
//! into the [`LightRegistry`] of the current [`FrameContext`].
//!
//! [`LightRegistry`]: crate::renderer::modules::light::LightRegistry

use glam::{Mat4, Vec2, Vec3, Vec4};
use uuid::Uuid;

use crate::renderer::modules::light::LightData;
use crate::scene::frame::FrameContext;

/// Stable light identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LightId(pub Uuid);

impl LightId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LightId {
    fn default() -> Self {
        Self::new()
    }
}

/// Light type; the discriminant is the code written to the parameter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LightKind {
    Directional = 0,
    Point = 1,
    Spot = 2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LightSource {
    pub id: LightId,
    pub color: Vec3,
    pub power: f32,
    /// `w > 0` marks a positional light.
    pub position: Vec4,
    pub direction: Vec3,
    /// Attenuation range `(min, max)`.
    pub range: Vec2,
    pub spot_exponent: f32,
    /// Degrees; 180 means no cone.
    pub spot_cutoff: f32,
    pub debug_show: bool,
}

impl Default for LightSource {
    fn default() -> Self {
        Self {
            id: LightId::new(),
            color: Vec3::ONE,
            power: 1.0,
            position: Vec4::new(0.0, 0.0, 0.0, 1.0),
            direction: Vec3::NEG_Z,
            range: Vec2::new(0.0, 1.0),
            spot_exponent: 0.0,
            spot_cutoff: 180.0,
            debug_show: false,
        }
    }
}

impl LightSource {
    #[must_use]
    pub fn directional(color: Vec3, direction: Vec3) -> Self {
        Self {
            color,
            position: Vec4::ZERO,
            direction,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn point(color: Vec3, position: Vec3, range: Vec2) -> Self {
        Self {
            color,
            position: position.extend(1.0),
            range,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn spot(color: Vec3, position: Vec3, direction: Vec3, exponent: f32, cutoff: f32) -> Self {
        Self {
            color,
            position: position.extend(1.0),
            direction,
            spot_exponent: exponent,
            spot_cutoff: cutoff,
            ..Self::default()
        }
    }

    /// The light type and whether it lights without a distance limit.
    #[must_use]
    pub fn kind(&self) -> (LightKind, bool) {
        if self.position.w > 0.0 {
            if self.spot_exponent > 0.0 {
                (LightKind::Spot, false)
            } else {
                (LightKind::Point, self.range.x < self.range.y)
            }
        } else {
            (LightKind::Directional, true)
        }
    }

    /// Records this light as visible in the current frame.
    pub fn cull(&self, ctx: &mut FrameContext, model_view: Mat4) {
        let frame = ctx.frame_number();
        ctx.lights.add(LightData::new(self.clone(), model_view, frame));
    }
}
