//! Render Backend
//!
//! The seam between the stage graph and the GPU. Runners, cameras and the
//! deferred chain only talk to a [`RenderBackend`]; [`WgpuBackend`] is the
//! production implementation, tests plug in recording doubles.
//!
//! A target is bound with [`begin_target`](RenderBackend::begin_target) and
//! released with [`end_target`](RenderBackend::end_target). Binding `None`
//! selects the host's default target (the swapchain or whatever the host
//! installed). Clears requested at bind time are applied by the first draw,
//! or on release if nothing was drawn.
//!
//! [`WgpuBackend`]: super::wgpu_backend::WgpuBackend

use glam::{Mat4, UVec2, Vec4};

use crate::errors::TargetError;
use crate::renderer::graph::shader::ShaderState;
use crate::renderer::graph::texture::{Attachment, StageTexture};
use crate::scene::camera::{ClearSettings, RasterState, Viewport};

slotmap::new_key_type! {
    /// Handle to an off-screen render target owned by a backend.
    pub struct TargetId;
}

/// Lifecycle of an off-screen target owned by a runner or camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetState {
    #[default]
    Uncreated,
    Ready(TargetId),
    /// Setup or validation failed; the owner is skipped from now on.
    Failed,
}

impl TargetState {
    #[inline]
    #[must_use]
    pub fn id(self) -> Option<TargetId> {
        match self {
            Self::Ready(id) => Some(id),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_failed(self) -> bool {
        self == Self::Failed
    }
}

/// Description of an off-screen target.
#[derive(Debug, Clone, Copy)]
pub struct TargetDesc<'a> {
    pub label: &'a str,
    pub size: UVec2,
    pub attachments: &'a [Attachment],
}

pub trait RenderBackend {
    /// Whether off-screen render targets can be created at all.
    fn supports_render_targets(&self) -> bool;

    /// Allocates a target and checks it for completeness.
    fn create_target(&mut self, desc: &TargetDesc<'_>) -> Result<TargetId, TargetError>;

    /// Re-checks completeness of an existing target.
    fn validate_target(&self, target: TargetId) -> Result<(), TargetError>;

    /// Releases a target. Unknown ids are ignored.
    fn destroy_target(&mut self, _target: TargetId) {}

    /// Binds `target` (or the default target) and schedules its clears.
    fn begin_target(&mut self, target: Option<TargetId>, viewport: Viewport, clear: &ClearSettings);

    /// Projection and model-view used by subsequent draws.
    fn set_transform(&mut self, projection: Mat4, model_view: Mat4);

    /// Rasterizer overrides for subsequent scene draws.
    fn set_raster_state(&mut self, _raster: &RasterState) {}

    /// Draws a screen-aligned quad covering `rect` (normalized `x, y, w, h`).
    fn draw_screen_quad(&mut self, label: &str, rect: Vec4, state: &ShaderState);

    /// Releases the bound target, applying pending clears.
    fn end_target(&mut self);

    /// Regenerates the mip chain of `texture`.
    fn generate_mipmaps(&mut self, texture: &StageTexture);

    /// Copies the depth of `source` into the default target, scaled to `destination`.
    fn blit_depth(&mut self, source: &StageTexture, destination: Viewport);
}
