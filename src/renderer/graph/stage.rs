//! Stages
//!
//! A [`Stage`] is one named pass of the pipeline with a set of named output
//! buffers. Input, work and display stages draw through their own render
//! camera; deferred stages run through a [`Runner`] in the pipeline's
//! deferred chain.
//!
//! Output buffers are held weakly: the pipeline owns the textures, a stage
//! only names them for wiring. Downstream stages bind an upstream buffer to a
//! texture unit with [`Stage::apply_buffer_from`] (or the handle-based
//! [`Pipeline::apply_buffer`]).
//!
//! [`Runner`]: super::runner::Runner
//! [`Pipeline::apply_buffer`]: super::pipeline::Pipeline::apply_buffer

use std::sync::{Arc, Weak};

use glam::{UVec2, Vec4};
use smallvec::SmallVec;

use super::lookup::constant_texture;
use super::runner::SharedRunner;
use super::shader::{SharedShaderState, Uniform};
use super::texture::{StageTexture, TextureRef};
use crate::scene::camera::SharedCamera;

slotmap::new_key_type! {
    /// Opaque reference to a stage of one pipeline.
    pub struct StageHandle;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Renders live scene geometry.
    Input,
    /// Screen-quad pass with its own camera.
    Work,
    /// Screen-quad pass executed by the deferred chain.
    Deferred,
    /// Final screen-quad pass onto the host target.
    Display,
}

#[derive(Debug)]
pub struct Stage {
    name: String,
    kind: StageKind,
    size: UVec2,
    outputs: SmallVec<[(String, Weak<StageTexture>); 4]>,
    state: SharedShaderState,
    pub camera: Option<SharedCamera>,
    pub runner: Option<SharedRunner>,
    /// Name of the module that created this stage, if any.
    pub parent_module: Option<String>,
}

impl Stage {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: StageKind, size: UVec2, state: SharedShaderState) -> Self {
        Self {
            name: name.into(),
            kind,
            size,
            outputs: SmallVec::new(),
            state,
            camera: None,
            runner: None,
            parent_module: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn is_input(&self) -> bool {
        self.kind == StageKind::Input
    }

    #[inline]
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.kind == StageKind::Deferred
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> UVec2 {
        self.size
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> &SharedShaderState {
        &self.state
    }

    /// Registers an output buffer. A buffer with the same name is replaced.
    pub fn add_output(&mut self, name: impl Into<String>, texture: &TextureRef) {
        let name = name.into();
        let weak = Arc::downgrade(texture);
        if let Some(entry) = self.outputs.iter_mut().find(|(n, _)| *n == name) {
            log::warn!("Stage {}: output {name} is declared twice, keeping the last", self.name);
            entry.1 = weak;
        } else {
            self.outputs.push((name, weak));
        }
    }

    /// Output names in declaration order.
    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|(n, _)| n.as_str())
    }

    /// Live output textures in declaration order.
    pub fn output_textures(&self) -> impl Iterator<Item = TextureRef> + '_ {
        self.outputs.iter().filter_map(|(_, t)| t.upgrade())
    }

    /// The live texture of output `name`.
    #[must_use]
    pub fn get_buffer_texture(&self, name: &str) -> Option<TextureRef> {
        self.outputs
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, t)| t.upgrade())
    }

    /// The last depth-like output, the one bound to the depth attachment.
    #[must_use]
    pub fn depth_output(&self) -> Option<TextureRef> {
        self.outputs
            .iter()
            .rev()
            .filter_map(|(_, t)| t.upgrade())
            .find(|t| t.format().is_depth())
    }

    /// Adds `uniform` unless the state already has one with that name.
    pub fn apply_uniform(&self, uniform: Uniform) -> bool {
        self.state.write().add_uniform(uniform)
    }

    pub fn apply_texture(&self, unit: u32, sampler_name: &str, texture: TextureRef) {
        self.state.write().set_texture(unit, sampler_name, texture);
    }

    /// Binds a 1×1 texture of constant `color` to `unit`.
    pub fn apply_default_texture(&self, color: Vec4, sampler_name: &str, unit: u32) {
        let texture = constant_texture(format!("{}_{sampler_name}_Default", self.name), color);
        self.apply_texture(unit, sampler_name, Arc::new(texture));
    }

    /// Binds `buffer` of `source` to `unit` under `sampler_name`.
    ///
    /// A missing buffer is logged and leaves the unit as it was.
    pub fn apply_buffer_from(&self, source: &Stage, buffer: &str, sampler_name: &str, unit: u32) -> bool {
        match source.get_buffer_texture(buffer) {
            Some(texture) => {
                self.apply_texture(unit, sampler_name, texture);
                true
            }
            None => {
                log::warn!(
                    "{buffer} is undefined at stage {}, which sources from stage {}",
                    self.name,
                    source.name
                );
                false
            }
        }
    }
}
