//! Deferred Callback Chain
//!
//! [`DeferredCallback`] executes every deferred runner of a pipeline in
//! insertion order, then copies registered depth buffers into the forward
//! pass. It is installed as a draw hook in the `Pre` slot of the
//! `DefaultForward` camera; hooks registered after it in the same slot run
//! after it.
//!
//! ```text
//!  Pre slot: [ DeferredCallback, hook B, ... ]
//!                 │
//!                 ├─ runner 0: setup? ─► start ─► draw ─► finish
//!                 ├─ runner 1: (inactive, skipped)
//!                 ├─ runner 2: (failed, skipped)
//!                 └─ depth blits ─► forward viewport
//! ```

use std::sync::Arc;

use glam::UVec2;

use crate::renderer::core::backend::RenderBackend;
use crate::renderer::graph::runner::SharedRunner;
use crate::renderer::graph::texture::TextureRef;
use crate::scene::camera::{DrawHook, DrawInfo, Viewport};

#[derive(Debug)]
pub struct DeferredCallback {
    runners: Vec<SharedRunner>,
    depth_blits: Vec<TextureRef>,
    in_pipeline: bool,
    default_blit_size: UVec2,
}

impl DeferredCallback {
    /// `in_pipeline` marks the chain owned by a [`Pipeline`]; a missing depth
    /// blit is then worth a notice.
    ///
    /// [`Pipeline`]: super::pipeline::Pipeline
    #[must_use]
    pub fn new(in_pipeline: bool) -> Self {
        Self {
            runners: Vec::new(),
            depth_blits: Vec::new(),
            in_pipeline,
            default_blit_size: UVec2::new(1920, 1080),
        }
    }

    #[must_use]
    pub fn with_default_blit_size(mut self, size: UVec2) -> Self {
        self.default_blit_size = size;
        self
    }

    pub fn add_runner(&mut self, runner: SharedRunner) {
        self.runners.push(runner);
    }

    pub fn remove_runner(&mut self, runner: &SharedRunner) -> bool {
        let before = self.runners.len();
        self.runners.retain(|r| !Arc::ptr_eq(r, runner));
        self.runners.len() != before
    }

    #[inline]
    #[must_use]
    pub fn runners(&self) -> &[SharedRunner] {
        &self.runners
    }

    pub fn clear_runners(&mut self) {
        self.runners.clear();
    }

    /// Registers (or unregisters) a depth buffer for blitting into the
    /// forward pass.
    pub fn require_depth_blit(&mut self, texture: TextureRef, add: bool) {
        let present = self.depth_blits.iter().position(|t| Arc::ptr_eq(t, &texture));
        match (add, present) {
            (true, None) => self.depth_blits.push(texture),
            (false, Some(i)) => {
                self.depth_blits.remove(i);
            }
            _ => {}
        }
    }

    #[inline]
    #[must_use]
    pub fn depth_blits(&self) -> &[TextureRef] {
        &self.depth_blits
    }

    /// Runs the chain for one frame.
    pub fn execute(&mut self, backend: &mut dyn RenderBackend, forward_viewport: Option<Viewport>) {
        if !backend.supports_render_targets() {
            log::warn!("No FBO support, deferred runners are skipped");
            return;
        }

        for runner in &self.runners {
            runner.lock().execute(backend);
        }

        if self.depth_blits.is_empty() {
            if self.in_pipeline {
                log::debug!("No depth buffer registered for blitting into the forward pass");
            }
            return;
        }

        let destination = forward_viewport
            .filter(|v| v.width > 0 && v.height > 0)
            .unwrap_or(Viewport::from_size(self.default_blit_size));
        for texture in &self.depth_blits {
            backend.blit_depth(texture, destination);
        }
    }
}

impl DrawHook for DeferredCallback {
    fn name(&self) -> &str {
        "DeferredCallback"
    }

    fn run(&mut self, info: &mut DrawInfo<'_>) {
        self.execute(&mut *info.backend, Some(info.viewport));
    }
}
