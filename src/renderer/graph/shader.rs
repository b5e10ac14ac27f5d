//! Stage Shader State
//!
//! Everything a stage hands to the shading layer: the shader program, the
//! uniforms and the texture units.
//!
//! Shader text is opaque to this crate. Sources are WGSL strings supplied by
//! the host (or a pipeline description); preprocessing and define injection
//! happen upstream.
//!
//! # Uniform Layout
//!
//! Uniforms are kept sorted by name and packed in that order into a single
//! uniform block at `@group(0) @binding(0)`:
//!
//! | Value                      | Size          |
//! |----------------------------|---------------|
//! | `bool`, `int`, `float`     | 16 bytes      |
//! | `vec2`, `vec3`, `vec4`     | 16 bytes      |
//! | `mat4`                     | 64 bytes      |
//! | `mat4[N]`                  | 64 × N bytes  |
//!
//! Texture unit `u` binds its texture at `@group(1) @binding(2u)` and its
//! sampler at `@group(1) @binding(2u + 1)`.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4};
use parking_lot::RwLock;

use super::texture::TextureRef;

// ============================================================================
// Shaders & Programs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

impl ShaderKind {
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Vertex => "VS",
            Self::Fragment => "FS",
        }
    }

    #[must_use]
    pub const fn default_entry_point(self) -> &'static str {
        match self {
            Self::Vertex => "vs_main",
            Self::Fragment => "fs_main",
        }
    }
}

/// A single WGSL shader.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderSource {
    pub name: String,
    pub kind: ShaderKind,
    pub source: Arc<str>,
    pub entry_point: String,
}

impl ShaderSource {
    #[must_use]
    pub fn new(kind: ShaderKind, source: impl Into<Arc<str>>) -> Self {
        Self {
            name: String::new(),
            kind,
            source: source.into(),
            entry_point: kind.default_entry_point().to_string(),
        }
    }

    #[must_use]
    pub fn vertex(source: impl Into<Arc<str>>) -> Self {
        Self::new(ShaderKind::Vertex, source)
    }

    #[must_use]
    pub fn fragment(source: impl Into<Arc<str>>) -> Self {
        Self::new(ShaderKind::Fragment, source)
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    /// Prepends shared code (an inclusion) to this shader.
    #[must_use]
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        if !prefix.is_empty() {
            self.source = format!("{prefix}\n{}", self.source).into();
        }
        self
    }
}

/// The shader pair handed to a stage factory. Either half may be absent; a
/// missing vertex shader means the built-in full-screen triangle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageShaders {
    pub vertex: Option<ShaderSource>,
    pub fragment: Option<ShaderSource>,
}

impl StageShaders {
    #[must_use]
    pub fn new(vertex: ShaderSource, fragment: ShaderSource) -> Self {
        Self {
            vertex: Some(vertex),
            fragment: Some(fragment),
        }
    }

    #[must_use]
    pub fn fragment_only(fragment: ShaderSource) -> Self {
        Self {
            vertex: None,
            fragment: Some(fragment),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertex.is_none() && self.fragment.is_none()
    }

    /// Adds a shader in the slot matching its kind.
    pub fn insert(&mut self, shader: ShaderSource) {
        match shader.kind {
            ShaderKind::Vertex => self.vertex = Some(shader),
            ShaderKind::Fragment => self.fragment = Some(shader),
        }
    }
}

/// A named program built from a stage's shaders.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderProgram {
    pub name: String,
    pub vertex: Option<ShaderSource>,
    pub fragment: Option<ShaderSource>,
}

impl ShaderProgram {
    /// Builds `<stage>_PROGRAM` with shaders renamed `<stage>_SHADER_VS/FS`.
    #[must_use]
    pub fn for_stage(stage: &str, shaders: &StageShaders) -> Self {
        let rename = |s: &ShaderSource| {
            s.clone()
                .with_name(format!("{stage}_SHADER_{}", s.kind.suffix()))
        };
        Self {
            name: format!("{stage}_PROGRAM"),
            vertex: shaders.vertex.as_ref().map(rename),
            fragment: shaders.fragment.as_ref().map(rename),
        }
    }
}

// ============================================================================
// Uniforms
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
    Mat4Array(Vec<Mat4>),
}

impl UniformValue {
    /// Size of the packed value in bytes.
    #[must_use]
    pub fn packed_size(&self) -> usize {
        match self {
            Self::Mat4(_) => 64,
            Self::Mat4Array(m) => 64 * m.len(),
            _ => 16,
        }
    }

    /// Appends the packed value to `out`.
    pub fn pack_into(&self, out: &mut Vec<u8>) {
        let mut slot = [0.0f32; 4];
        match self {
            Self::Bool(b) => {
                out.extend_from_slice(bytemuck::bytes_of(&[u32::from(*b), 0, 0, 0]));
                return;
            }
            Self::Int(i) => {
                out.extend_from_slice(bytemuck::bytes_of(&[*i, 0, 0, 0]));
                return;
            }
            Self::Float(f) => slot[0] = *f,
            Self::Vec2(v) => slot[..2].copy_from_slice(&v.to_array()),
            Self::Vec3(v) => slot[..3].copy_from_slice(&v.to_array()),
            Self::Vec4(v) => slot = v.to_array(),
            Self::Mat4(m) => {
                out.extend_from_slice(bytemuck::bytes_of(&m.to_cols_array()));
                return;
            }
            Self::Mat4Array(ms) => {
                for m in ms {
                    out.extend_from_slice(bytemuck::bytes_of(&m.to_cols_array()));
                }
                return;
            }
        }
        out.extend_from_slice(bytemuck::bytes_of(&slot));
    }
}

/// A named uniform whose value is shared by every state it is added to.
///
/// Cloning the handle shares the value: updating `NearFarPlanes` once is
/// seen by every stage.
#[derive(Debug, Clone)]
pub struct Uniform {
    name: Arc<str>,
    value: Arc<RwLock<UniformValue>>,
}

impl Uniform {
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, value: UniformValue) -> Self {
        Self {
            name: name.into(),
            value: Arc::new(RwLock::new(value)),
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn get(&self) -> UniformValue {
        self.value.read().clone()
    }

    pub fn set(&self, value: UniformValue) {
        *self.value.write() = value;
    }

    /// Whether both handles share one value.
    #[must_use]
    pub fn shares_value_with(&self, other: &Uniform) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

// ============================================================================
// Shader State
// ============================================================================

/// A texture bound to a unit, with the sampler name the shader uses for it.
#[derive(Debug, Clone)]
pub struct TextureBinding {
    pub sampler_name: String,
    pub texture: TextureRef,
}

/// Program, uniforms and texture units of one stage.
#[derive(Debug, Clone, Default)]
pub struct ShaderState {
    program: Option<ShaderProgram>,
    uniforms: BTreeMap<Arc<str>, Uniform>,
    textures: BTreeMap<u32, TextureBinding>,
}

/// Shader state shared between a stage and the camera or runner drawing it.
pub type SharedShaderState = Arc<RwLock<ShaderState>>;

impl ShaderState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared(self) -> SharedShaderState {
        Arc::new(RwLock::new(self))
    }

    #[inline]
    #[must_use]
    pub fn program(&self) -> Option<&ShaderProgram> {
        self.program.as_ref()
    }

    pub fn set_program(&mut self, program: ShaderProgram) {
        self.program = Some(program);
    }

    /// Adds `uniform` unless one with the same name exists. Returns whether it
    /// was inserted.
    pub fn add_uniform(&mut self, uniform: Uniform) -> bool {
        if self.uniforms.contains_key(uniform.name()) {
            return false;
        }
        self.uniforms.insert(uniform.name.clone(), uniform);
        true
    }

    /// Adds or replaces `uniform`.
    pub fn set_uniform(&mut self, uniform: Uniform) {
        self.uniforms.insert(uniform.name.clone(), uniform);
    }

    #[must_use]
    pub fn uniform(&self, name: &str) -> Option<&Uniform> {
        self.uniforms.get(name)
    }

    /// Uniforms in packing (name) order.
    pub fn uniforms(&self) -> impl Iterator<Item = &Uniform> {
        self.uniforms.values()
    }

    pub fn set_texture(&mut self, unit: u32, sampler_name: impl Into<String>, texture: TextureRef) {
        self.textures.insert(
            unit,
            TextureBinding {
                sampler_name: sampler_name.into(),
                texture,
            },
        );
    }

    #[must_use]
    pub fn texture(&self, unit: u32) -> Option<&TextureBinding> {
        self.textures.get(&unit)
    }

    /// Bound units in ascending order.
    pub fn textures(&self) -> impl Iterator<Item = (u32, &TextureBinding)> {
        self.textures.iter().map(|(u, b)| (*u, b))
    }

    /// Packs every uniform in name order.
    #[must_use]
    pub fn uniform_block(&self) -> Vec<u8> {
        let size = self.uniforms.values().map(|u| u.get().packed_size()).sum();
        let mut out = Vec::with_capacity(size);
        for uniform in self.uniforms.values() {
            uniform.get().pack_into(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_naming() {
        let shaders = StageShaders::new(
            ShaderSource::vertex("// vs"),
            ShaderSource::fragment("// fs"),
        );
        let program = ShaderProgram::for_stage("Lighting", &shaders);
        assert_eq!(program.name, "Lighting_PROGRAM");
        assert_eq!(program.vertex.unwrap().name, "Lighting_SHADER_VS");
        assert_eq!(program.fragment.unwrap().name, "Lighting_SHADER_FS");
    }

    #[test]
    fn add_uniform_keeps_existing() {
        let mut state = ShaderState::new();
        assert!(state.add_uniform(Uniform::new("A", UniformValue::Float(1.0))));
        assert!(!state.add_uniform(Uniform::new("A", UniformValue::Float(2.0))));
        assert_eq!(state.uniform("A").unwrap().get(), UniformValue::Float(1.0));
    }

    #[test]
    fn uniform_block_is_name_ordered() {
        let mut state = ShaderState::new();
        state.add_uniform(Uniform::new("B", UniformValue::Mat4(Mat4::IDENTITY)));
        state.add_uniform(Uniform::new("A", UniformValue::Vec2(Vec2::new(3.0, 4.0))));
        let block = state.uniform_block();
        assert_eq!(block.len(), 16 + 64);
        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(&block);
        assert_eq!(&floats[..2], &[3.0, 4.0]);
        assert_eq!(floats[4], 1.0);
    }

    #[test]
    fn shared_uniform_updates_are_visible() {
        let near_far = Uniform::new("NearFarPlanes", UniformValue::Vec2(Vec2::splat(-1.0)));
        let mut a = ShaderState::new();
        let mut b = ShaderState::new();
        a.add_uniform(near_far.clone());
        b.add_uniform(near_far.clone());
        near_far.set(UniformValue::Vec2(Vec2::new(0.5, 50.0)));
        assert_eq!(
            b.uniform("NearFarPlanes").unwrap().get(),
            UniformValue::Vec2(Vec2::new(0.5, 50.0))
        );
        assert!(a.uniform("NearFarPlanes").unwrap().shares_value_with(&near_far));
    }
}
