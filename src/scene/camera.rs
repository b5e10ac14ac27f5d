//! Render Cameras
//!
//! A [`Camera`] here is a render-graph camera, not a scene object: it pairs
//! view/projection matrices with a render target, clear settings, a cull mask
//! and four draw-hook slots. Stage factories create one per non-deferred stage;
//! the pipeline creates the `DefaultForward` camera from the host's main camera.
//!
//! # Draw Phases
//!
//! ```text
//!  Initial ─► Pre ─► [bind target ─► content ─► unbind] ─► Post ─► Final
//! ```
//!
//! Each phase holds a `Vec` of hooks run in registration order. `Pre` hooks
//! run before the camera binds its own target, so they may execute off-screen
//! passes of their own (the deferred chain lives there). `Final` hooks see the
//! camera's final, clamped projection.

use std::sync::Arc;

use bitflags::bitflags;
use glam::{Mat4, UVec2, Vec4};
use parking_lot::{Mutex, RwLock};

use crate::renderer::core::backend::{RenderBackend, TargetState};
use crate::renderer::graph::near_far::NearFarClamp;
use crate::renderer::graph::shader::{ShaderState, SharedShaderState};
use crate::renderer::graph::texture::Attachment;
use crate::scene::frame::FrameStamp;

/// Shared, lockable camera.
pub type SharedCamera = Arc<RwLock<Camera>>;

// ============================================================================
// Viewport & Clear
// ============================================================================

/// Pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub const fn from_size(size: UVec2) -> Self {
        Self::new(0, 0, size.x, size.y)
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    #[inline]
    #[must_use]
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

bitflags! {
    /// Buffers cleared when a target is bound.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ClearMask: u32 {
        const COLOR   = 1 << 0;
        const DEPTH   = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

impl Default for ClearMask {
    fn default() -> Self {
        Self::COLOR | Self::DEPTH
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearSettings {
    pub mask: ClearMask,
    pub color: Vec4,
    pub depth: f32,
    pub stencil: u32,
}

impl Default for ClearSettings {
    fn default() -> Self {
        Self {
            mask: ClearMask::default(),
            color: Vec4::ZERO,
            depth: 1.0,
            stencil: 0,
        }
    }
}

impl ClearSettings {
    /// No buffer is cleared.
    #[must_use]
    pub fn none() -> Self {
        Self {
            mask: ClearMask::empty(),
            ..Self::default()
        }
    }
}

// ============================================================================
// Camera Configuration
// ============================================================================

/// When a camera renders relative to the host's main camera.
///
/// Pre-render cameras run before the nested (forward) camera, post-render
/// cameras after it. Cameras of one group run in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RenderOrder {
    PreRender(i32),
    Nested,
    PostRender(i32),
}

/// Whether the view matrix is composed with the host's main camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferenceFrame {
    #[default]
    Relative,
    Absolute,
}

/// How the scene's depth range is computed during cull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NearFarMode {
    #[default]
    Off,
    BoundingVolumes,
    Primitives,
}

/// Rasterizer overrides for scene content.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RasterState {
    pub cull_face: Option<wgpu::Face>,
    pub depth_bias_constant: i32,
    pub depth_bias_slope: f32,
}

/// What a camera draws between binding and unbinding its target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraContent {
    /// Live scene geometry, drawn by the host.
    Scene,
    /// A screen-aligned quad covering `(x, y, w, h)` in normalized coordinates.
    ScreenQuad(Vec4),
}

// ============================================================================
// Draw Hooks
// ============================================================================

/// The four draw-hook slots of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawPhase {
    Initial,
    Pre,
    Post,
    Final,
}

/// What a hook sees when invoked.
pub struct DrawInfo<'a> {
    pub backend: &'a mut dyn RenderBackend,
    pub camera: &'a str,
    pub view_matrix: Mat4,
    pub projection_matrix: Mat4,
    pub viewport: Viewport,
    pub frame: FrameStamp,
}

/// Work attached to a camera draw phase.
pub trait DrawHook: Send {
    fn name(&self) -> &str {
        "DrawHook"
    }

    fn run(&mut self, info: &mut DrawInfo<'_>);
}

pub type SharedHook = Arc<Mutex<dyn DrawHook>>;

/// Hook vectors, one per phase.
#[derive(Default, Clone)]
pub struct DrawHooks {
    initial: Vec<SharedHook>,
    pre: Vec<SharedHook>,
    post: Vec<SharedHook>,
    final_: Vec<SharedHook>,
}

impl std::fmt::Debug for DrawHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawHooks")
            .field("initial", &self.initial.len())
            .field("pre", &self.pre.len())
            .field("post", &self.post.len())
            .field("final", &self.final_.len())
            .finish()
    }
}

impl DrawHooks {
    fn slot_mut(&mut self, phase: DrawPhase) -> &mut Vec<SharedHook> {
        match phase {
            DrawPhase::Initial => &mut self.initial,
            DrawPhase::Pre => &mut self.pre,
            DrawPhase::Post => &mut self.post,
            DrawPhase::Final => &mut self.final_,
        }
    }

    #[must_use]
    pub fn slot(&self, phase: DrawPhase) -> &[SharedHook] {
        match phase {
            DrawPhase::Initial => &self.initial,
            DrawPhase::Pre => &self.pre,
            DrawPhase::Post => &self.post,
            DrawPhase::Final => &self.final_,
        }
    }

    /// Appends `hook`; it runs after every hook already in the slot.
    pub fn push(&mut self, phase: DrawPhase, hook: SharedHook) {
        self.slot_mut(phase).push(hook);
    }

    /// Removes `hook` (by identity). Returns whether it was present.
    pub fn remove(&mut self, phase: DrawPhase, hook: &SharedHook) -> bool {
        let slot = self.slot_mut(phase);
        let before = slot.len();
        slot.retain(|h| !Arc::ptr_eq(h, hook));
        slot.len() != before
    }

    pub fn clear(&mut self, phase: DrawPhase) {
        self.slot_mut(phase).clear();
    }
}

// ============================================================================
// Camera
// ============================================================================

#[derive(Debug)]
pub struct Camera {
    pub name: String,
    pub view_matrix: Mat4,
    pub projection_matrix: Mat4,
    /// `None` follows the target (or the host window) size.
    pub viewport: Option<Viewport>,
    pub clear: ClearSettings,
    pub cull_mask: u32,
    pub render_order: RenderOrder,
    pub reference_frame: ReferenceFrame,
    pub near_far_mode: NearFarMode,
    /// Installed projection clamp, applied before drawing.
    pub clamp: Option<NearFarClamp>,
    pub raster: RasterState,
    pub samples: u32,
    pub content: CameraContent,
    pub state: SharedShaderState,
    pub hooks: DrawHooks,
    /// Off-screen attachments; empty renders to the host's target.
    pub attachments: Vec<Attachment>,
    pub target: TargetState,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new("Camera")
    }
}

impl Camera {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            viewport: None,
            clear: ClearSettings::default(),
            cull_mask: u32::MAX,
            render_order: RenderOrder::Nested,
            reference_frame: ReferenceFrame::Relative,
            near_far_mode: NearFarMode::Off,
            clamp: None,
            raster: RasterState::default(),
            samples: 0,
            content: CameraContent::Scene,
            state: ShaderState::new().shared(),
            hooks: DrawHooks::default(),
            attachments: Vec::new(),
            target: TargetState::Uncreated,
        }
    }

    /// A perspective camera in wgpu clip conventions.
    #[must_use]
    pub fn perspective(name: impl Into<String>, fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        let mut camera = Self::new(name);
        camera.projection_matrix = Mat4::perspective_rh(fov_y, aspect, near, far);
        camera
    }

    #[must_use]
    pub fn shared(self) -> SharedCamera {
        Arc::new(RwLock::new(self))
    }

    /// Whether the camera draws into off-screen attachments.
    #[inline]
    #[must_use]
    pub fn renders_to_texture(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Whether depth bounds are computed for this camera during cull.
    #[inline]
    #[must_use]
    pub fn computes_near_far(&self) -> bool {
        self.near_far_mode != NearFarMode::Off
    }

    /// Size of the first attachment, or of the viewport.
    #[must_use]
    pub fn target_size(&self) -> Option<UVec2> {
        self.attachments
            .iter()
            .map(|a| a.texture.size())
            .reduce(UVec2::max)
            .or_else(|| self.viewport.map(|v| v.size()))
    }

    /// Adds a hook to one of the draw slots.
    pub fn add_hook(&mut self, phase: DrawPhase, hook: SharedHook) {
        self.hooks.push(phase, hook);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl DrawHook for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn run(&mut self, _info: &mut DrawInfo<'_>) {}
    }

    #[test]
    fn hooks_keep_registration_order() {
        let mut hooks = DrawHooks::default();
        let a: SharedHook = Arc::new(Mutex::new(Named("a")));
        let b: SharedHook = Arc::new(Mutex::new(Named("b")));
        hooks.push(DrawPhase::Pre, a.clone());
        hooks.push(DrawPhase::Pre, b);
        let names: Vec<String> = hooks
            .slot(DrawPhase::Pre)
            .iter()
            .map(|h| h.lock().name().to_string())
            .collect();
        assert_eq!(names, ["a", "b"]);
        assert!(hooks.remove(DrawPhase::Pre, &a));
        assert_eq!(hooks.slot(DrawPhase::Pre).len(), 1);
        assert!(hooks.slot(DrawPhase::Final).is_empty());
    }

    #[test]
    fn render_order_sorts_groups() {
        let mut orders = vec![
            RenderOrder::PostRender(0),
            RenderOrder::Nested,
            RenderOrder::PreRender(3),
            RenderOrder::PreRender(1),
        ];
        orders.sort();
        assert_eq!(
            orders,
            [
                RenderOrder::PreRender(1),
                RenderOrder::PreRender(3),
                RenderOrder::Nested,
                RenderOrder::PostRender(0),
            ]
        );
    }

    #[test]
    fn default_clear_is_color_and_depth() {
        let clear = ClearSettings::default();
        assert_eq!(clear.mask, ClearMask::COLOR | ClearMask::DEPTH);
        assert_eq!(clear.depth, 1.0);
        assert_eq!(clear.stencil, 0);
        assert!(ClearSettings::none().mask.is_empty());
    }
}
