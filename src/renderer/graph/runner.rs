//! Runners
//!
//! A [`Runner`] is one off-screen pass of the deferred chain. It owns its
//! attachments and either draws a screen quad with a stage's shader state or
//! delegates to a custom [`RunnerDraw`].
//!
//! # Lifecycle
//!
//! ```text
//!  Uncreated ──setup ok──► Ready ──(every frame while active)──► ...
//!      │                     │
//!      └──setup failed──► Failed ◄──target incomplete after draw──┘
//! ```
//!
//! A failed runner is skipped until the chain is rebuilt. A `run_once` runner
//! deactivates itself after its first complete pass.

use std::sync::Arc;

use glam::{Mat4, UVec2, Vec4};
use parking_lot::Mutex;

use crate::renderer::core::backend::{RenderBackend, TargetDesc, TargetState};
use crate::renderer::graph::shader::SharedShaderState;
use crate::renderer::graph::texture::Attachment;
use crate::scene::camera::{ClearSettings, Viewport};

pub type SharedRunner = Arc<Mutex<Runner>>;

/// Custom draw work of a runner.
pub trait RunnerDraw: Send {
    fn draw(&mut self, backend: &mut dyn RenderBackend, viewport: Viewport);
}

pub enum RunnerContent {
    ScreenQuad {
        state: SharedShaderState,
        rect: Vec4,
    },
    Custom(Box<dyn RunnerDraw>),
}

impl std::fmt::Debug for RunnerContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScreenQuad { rect, .. } => f.debug_struct("ScreenQuad").field("rect", rect).finish(),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

#[derive(Debug)]
pub struct Runner {
    pub name: String,
    pub attachments: Vec<Attachment>,
    /// Overrides the size derived from the attachments.
    pub viewport: Option<Viewport>,
    pub projection: Mat4,
    pub model_view: Mat4,
    pub clear: ClearSettings,
    pub active: bool,
    pub run_once: bool,
    pub content: RunnerContent,
    target: TargetState,
    executions: u64,
}

impl Runner {
    #[must_use]
    pub fn new(name: impl Into<String>, content: RunnerContent) -> Self {
        Self {
            name: name.into(),
            attachments: Vec::new(),
            viewport: None,
            projection: Mat4::orthographic_rh(0.0, 1.0, 0.0, 1.0, -1.0, 1.0),
            model_view: Mat4::IDENTITY,
            clear: ClearSettings::default(),
            active: true,
            run_once: false,
            content,
            target: TargetState::Uncreated,
            executions: 0,
        }
    }

    /// A runner drawing a full-target quad with `state`.
    #[must_use]
    pub fn screen_quad(name: impl Into<String>, state: SharedShaderState) -> Self {
        Self::new(
            name,
            RunnerContent::ScreenQuad {
                state,
                rect: Vec4::new(0.0, 0.0, 1.0, 1.0),
            },
        )
    }

    #[must_use]
    pub fn custom(name: impl Into<String>, draw: Box<dyn RunnerDraw>) -> Self {
        Self::new(name, RunnerContent::Custom(draw))
    }

    #[must_use]
    pub fn with_run_once(mut self, run_once: bool) -> Self {
        self.run_once = run_once;
        self
    }

    #[must_use]
    pub fn shared(self) -> SharedRunner {
        Arc::new(Mutex::new(self))
    }

    pub fn add_attachment(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
    }

    #[inline]
    #[must_use]
    pub fn target(&self) -> TargetState {
        self.target
    }

    /// Completed passes since creation.
    #[inline]
    #[must_use]
    pub fn executions(&self) -> u64 {
        self.executions
    }

    /// Target size: the viewport if set, else the largest attachment.
    #[must_use]
    pub fn size(&self) -> UVec2 {
        self.viewport
            .map(|v| v.size())
            .or_else(|| {
                self.attachments
                    .iter()
                    .map(|a| a.texture.size())
                    .reduce(UVec2::max)
            })
            .unwrap_or(UVec2::ONE)
            .max(UVec2::ONE)
    }

    /// Whether the chain should run this runner now.
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        self.active && !self.attachments.is_empty() && !self.target.is_failed()
    }

    /// Creates the off-screen target once. Returns whether it is usable.
    pub fn setup(&mut self, backend: &mut dyn RenderBackend) -> bool {
        match self.target {
            TargetState::Ready(_) => true,
            TargetState::Failed => false,
            TargetState::Uncreated => {
                let desc = TargetDesc {
                    label: &self.name,
                    size: self.size(),
                    attachments: &self.attachments,
                };
                match backend.create_target(&desc) {
                    Ok(id) => {
                        self.target = TargetState::Ready(id);
                        true
                    }
                    Err(e) => {
                        log::warn!("Unable to setup FBO of name {}: {e}", self.name);
                        self.target = TargetState::Failed;
                        false
                    }
                }
            }
        }
    }

    /// Binds the target and schedules clears.
    pub fn start(&mut self, backend: &mut dyn RenderBackend) {
        let viewport = self.viewport.unwrap_or(Viewport::from_size(self.size()));
        backend.begin_target(self.target.id(), viewport, &self.clear);
    }

    /// Draws and re-validates the target.
    pub fn draw(&mut self, backend: &mut dyn RenderBackend) {
        let viewport = self.viewport.unwrap_or(Viewport::from_size(self.size()));
        backend.set_transform(self.projection, self.model_view);
        match &mut self.content {
            RunnerContent::ScreenQuad { state, rect } => {
                let state = state.read();
                backend.draw_screen_quad(&self.name, *rect, &state);
            }
            RunnerContent::Custom(draw) => draw.draw(backend, viewport),
        }

        if let Some(id) = self.target.id()
            && let Err(e) = backend.validate_target(id)
        {
            log::warn!("[Runner] {}: render target became incomplete: {e}", self.name);
            self.target = TargetState::Failed;
        }
    }

    /// Restores the default target, updates mipmaps and retires `run_once`
    /// runners.
    pub fn finish(&mut self, backend: &mut dyn RenderBackend) {
        backend.end_target();
        for attachment in self.attachments.iter().filter(|a| a.generate_mipmaps) {
            backend.generate_mipmaps(&attachment.texture);
        }
        self.executions += 1;
        if self.run_once {
            self.active = false;
        }
    }

    /// Runs one complete pass. Returns whether anything was drawn.
    pub fn execute(&mut self, backend: &mut dyn RenderBackend) -> bool {
        if !self.is_runnable() || !self.setup(backend) {
            return false;
        }
        self.start(backend);
        self.draw(backend);
        self.finish(backend);
        true
    }

    /// Drops the target so the next execution sets it up again.
    pub fn reset(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(id) = self.target.id() {
            backend.destroy_target(id);
        }
        self.target = TargetState::Uncreated;
    }
}
