//! User Input Module
//!
//! An input stage for host-drawn overlays (gizmos, selection outlines and
//! the like). It either owns a color + depth pair or draws on top of textures
//! shared from another stage, in which case nothing is cleared.

use std::sync::Weak;

use parking_lot::RwLock;

use crate::errors::{PipelineError, Result};
use crate::renderer::graph::format::BufferFormat;
use crate::renderer::graph::pipeline::{BufferSpec, Pipeline};
use crate::renderer::graph::shader::StageShaders;
use crate::renderer::graph::stage::StageHandle;
use crate::renderer::graph::texture::TextureRef;
use crate::scene::camera::{Camera, ClearMask, SharedCamera};

/// Textures to draw into instead of allocating new ones.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffers {
    pub color: Option<TextureRef>,
    pub depth: Option<TextureRef>,
}

impl SharedBuffers {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.color.is_none() && self.depth.is_none()
    }
}

#[derive(Debug)]
pub struct UserInputModule {
    name: String,
    stage: Option<StageHandle>,
    bypass_camera: Option<Weak<RwLock<Camera>>>,
}

impl UserInputModule {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: None,
            bypass_camera: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The stage created by [`create_stages`](Self::create_stages).
    #[inline]
    #[must_use]
    pub fn stage(&self) -> Option<StageHandle> {
        self.stage
    }

    /// Camera of the bypass stage, if one was given and is still alive.
    #[must_use]
    pub fn bypass_camera(&self) -> Option<SharedCamera> {
        self.bypass_camera.as_ref().and_then(Weak::upgrade)
    }

    /// Adds the input stage. With shared buffers the stage renders into them
    /// and its camera clears nothing.
    pub fn create_stages(
        &mut self,
        pipeline: &mut Pipeline,
        shaders: &StageShaders,
        cull_mask: u32,
        color_name: &str,
        depth_name: &str,
        shared: &SharedBuffers,
        bypass: Option<StageHandle>,
    ) -> Result<StageHandle> {
        let color = match &shared.color {
            Some(texture) => BufferSpec::shared(color_name, texture.clone()),
            None => BufferSpec::new(color_name, BufferFormat::RgbInt8),
        };
        let depth = match &shared.depth {
            Some(texture) => BufferSpec::shared(depth_name, texture.clone()),
            None => BufferSpec::new(depth_name, BufferFormat::Depth24Stencil8),
        };

        let handle = pipeline.add_input_stage(&self.name, cull_mask, 0, shaders, &[color, depth])?;
        let stage = pipeline
            .stage_mut(handle)
            .ok_or(PipelineError::StaleStage)?;
        stage.parent_module = Some(self.name.clone());
        if !shared.is_empty()
            && let Some(camera) = &stage.camera
        {
            camera.write().clear.mask = ClearMask::empty();
        }

        self.bypass_camera = bypass
            .and_then(|h| pipeline.stage(h))
            .and_then(|s| s.camera.as_ref())
            .map(std::sync::Arc::downgrade);
        self.stage = Some(handle);
        Ok(handle)
    }
}
