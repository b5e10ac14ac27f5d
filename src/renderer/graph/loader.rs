//! Declarative Pipeline Description
//!
//! Builds a pipeline from JSON:
//!
//! ```json
//! {
//!   "pipeline": [
//!     { "name": "Deferred", "stages": [
//!       { "name": "GBuffer", "type": "input",
//!         "outputs": [ { "name": "NormalBuffer", "format": "RGBA_INT8" },
//!                      { "name": "DepthBuffer", "format": "DEPTH24_STENCIL8" } ],
//!         "shaders": [ { "name": "gbuffer.vert", "shader_type": "vertex", "source": "..." },
//!                      { "name": "gbuffer.frag", "shader_type": "fragment", "source": "..." } ] },
//!       { "name": "Lighting", "type": "deferred", "scale": 1.0,
//!         "inputs": [ { "name": "NormalBuffer", "stage": "GBuffer", "unit": 0 },
//!                     { "name": "RandomTexture", "function": "noise", "arguments": "4 4", "unit": 1 } ],
//!         "uniforms": [ { "name": "Exposure", "type": "float", "value": "1.5" } ] }
//!     ] }
//!   ],
//!   "shared": [ { "type": "inclusion", "name": "common", "source": ["fn saturate(...) ..."] } ],
//!   "settings": { "width": 1920, "height": 1080,
//!                 "masks": { "deferred": "ff0000", "forward": "ff00" } }
//! }
//! ```
//!
//! Stage types are `input`, `work`, `deferred`, `display`, `shadow_module` and
//! `light_module`. Outputs default to `RGB_INT8`. Inputs reference a buffer of
//! an earlier stage, a module (`"stage": "<module name>"`), a shared texture
//! by name, or an inline generated texture (`const`, `noise`, `poisson`).
//! Shader `include` lists prepend shared inclusions. File references (`uri`)
//! are not resolved and are reported.
//!
//! Unknown or incomplete entries are logged and skipped; unparsable JSON,
//! a description without stages and capability failures abort the load.

use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::{PipelineError, Result};
use crate::renderer::core::context::GpuCapabilities;
use crate::renderer::graph::format::BufferFormat;
use crate::renderer::graph::lookup;
use crate::renderer::graph::pipeline::{BufferSpec, Pipeline, PipelineModule};
use crate::renderer::graph::shader::{ShaderKind, ShaderSource, StageShaders, Uniform, UniformValue};
use crate::renderer::graph::stage::StageHandle;
use crate::renderer::graph::texture::TextureRef;
use crate::renderer::modules::light::LightModule;
use crate::renderer::modules::shadow::{ShadowDrawHook, ShadowModule};
use crate::renderer::settings::{VisibilityMasks, parse_mask};
use crate::scene::camera::{DrawPhase, SharedCamera, SharedHook};
use crate::scene::view::View;

// ============================================================================
// Description Types
// ============================================================================

/// Root of a pipeline description.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineDescription {
    pub pipeline: Vec<StageGroupDesc>,
    /// Heterogeneous entries dispatched on their `type`.
    pub shared: Vec<Value>,
    pub settings: SettingsDesc,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StageGroupDesc {
    pub name: String,
    pub stages: Vec<StageDesc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StageDesc {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub scale: Option<f32>,
    #[serde(alias = "runOnce")]
    pub once: bool,
    /// Hex visibility mask overriding the deferred mask of input stages.
    pub mask: Option<String>,
    pub inputs: Vec<InputDesc>,
    pub outputs: Vec<OutputDesc>,
    pub shaders: Vec<ShaderDesc>,
    pub uniforms: Vec<UniformDesc>,
    /// Free-form module parameters.
    pub parameters: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputDesc {
    pub name: String,
    pub format: Option<String>,
    pub mipmap: bool,
}

/// A texture given by function or reference.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TextureDesc {
    pub name: String,
    pub function: Option<String>,
    pub arguments: Option<String>,
    pub uri: Option<String>,
    pub filter: Option<String>,
    pub wrap: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InputDesc {
    #[serde(flatten)]
    pub texture: TextureDesc,
    pub stage: Option<String>,
    pub sampler_name: Option<String>,
    pub unit: u32,
}

/// Source text given as one string or as a list of lines.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SourceText {
    Text(String),
    Lines(Vec<String>),
}

impl SourceText {
    fn joined(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Lines(lines) => lines.iter().map(|l| format!("{l}\n")).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShaderDesc {
    pub name: String,
    #[serde(alias = "type")]
    pub shader_type: Option<String>,
    pub source: Option<SourceText>,
    pub include: Vec<String>,
    pub uri: Option<String>,
    pub entry_point: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UniformDesc {
    pub name: String,
    pub uniform_name: Option<String>,
    #[serde(alias = "type")]
    pub uniform_type: Option<String>,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InclusionDesc {
    pub name: String,
    pub source: Option<SourceText>,
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsDesc {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub masks: Option<MasksDesc>,
    pub shadow_number: Option<u32>,
    pub shadow_resolution: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MasksDesc {
    pub deferred: Option<String>,
    pub forward: Option<String>,
    pub shadow_caster: Option<String>,
}

impl MasksDesc {
    /// Applies the masks given in hex over `base`; malformed masks are
    /// reported and ignored.
    #[must_use]
    pub fn resolve(&self, base: VisibilityMasks) -> VisibilityMasks {
        let pick = |text: &Option<String>, fallback: u32, which: &str| match text {
            Some(text) => parse_mask(text).unwrap_or_else(|| {
                log::warn!("[Pipeline] Invalid {which} mask '{text}' while reading masks");
                fallback
            }),
            None => fallback,
        };
        VisibilityMasks {
            deferred: pick(&self.deferred, base.deferred, "deferred"),
            forward: pick(&self.forward, base.forward, "forward"),
            shadow_caster: pick(&self.shadow_caster, base.shadow_caster, "shadow_caster"),
        }
    }
}

impl PipelineDescription {
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ============================================================================
// Shared Resources
// ============================================================================

#[derive(Debug, Default)]
struct SharedResources {
    shaders: FxHashMap<String, ShaderSource>,
    textures: FxHashMap<String, TextureRef>,
    uniforms: FxHashMap<String, Uniform>,
    inclusions: FxHashMap<String, String>,
}

impl SharedResources {
    fn load(entries: &[Value]) -> Self {
        let mut shared = Self::default();
        for entry in entries {
            let name = entry.get("name").and_then(Value::as_str);
            let kind = entry.get("type").and_then(Value::as_str);
            let (Some(name), Some(kind)) = (name, kind) else {
                log::info!("[Pipeline] Unknown element in 'shared'");
                continue;
            };

            // Shader entries use `type` as the element type, not the stage.
            let mut element = entry.clone();
            if let Some(object) = element.as_object_mut() {
                object.remove("type");
            }

            match kind {
                k if k.contains("shader") => {
                    if let Some(shader) = parse_entry::<ShaderDesc>(element, name)
                        .and_then(|d| load_shader(&d, &shared.inclusions))
                    {
                        shared.shaders.insert(name.to_string(), shader);
                    }
                }
                k if k.contains("texture") => {
                    if let Some(texture) = parse_entry::<TextureDesc>(element, name).and_then(|d| load_texture(&d)) {
                        shared.textures.insert(name.to_string(), texture);
                    }
                }
                k if k.contains("uniform") => {
                    if let Some(uniform) = parse_entry::<UniformDesc>(element, name).map(|d| load_uniform(&d)) {
                        shared.uniforms.insert(name.to_string(), uniform);
                    }
                }
                k if k.contains("inclusion") => {
                    if let Some(inclusion) = parse_entry::<InclusionDesc>(element, name) {
                        shared.inclusions.insert(name.to_string(), load_inclusion(&inclusion));
                    }
                }
                other => log::info!("[Pipeline] Unknown element {other} in 'shared'"),
            }
        }
        shared
    }
}

fn parse_entry<T: for<'de> Deserialize<'de>>(value: Value, name: &str) -> Option<T> {
    serde_json::from_value(value)
        .map_err(|e| log::warn!("[Pipeline] Invalid shared element {name}: {e}"))
        .ok()
}

fn load_inclusion(desc: &InclusionDesc) -> String {
    if let Some(uri) = &desc.uri {
        log::warn!("[Pipeline] Inclusion {} references '{uri}', file references are not resolved", desc.name);
    }
    desc.source.as_ref().map(SourceText::joined).unwrap_or_default()
}

fn load_shader(desc: &ShaderDesc, inclusions: &FxHashMap<String, String>) -> Option<ShaderSource> {
    let mut text = String::new();
    for include in &desc.include {
        match inclusions.get(include) {
            Some(source) => {
                text.push_str(source);
                text.push('\n');
            }
            None => log::warn!("[Pipeline] Shader {} includes unknown inclusion {include}", desc.name),
        }
    }
    match (&desc.source, &desc.uri) {
        (Some(source), _) => text.push_str(&source.joined()),
        (None, Some(uri)) => {
            log::warn!("[Pipeline] Shader {} references '{uri}', file references are not resolved", desc.name);
            return None;
        }
        (None, None) => {
            log::warn!("[Pipeline] Shader {} has no source", desc.name);
            return None;
        }
    }

    let kind = match desc.shader_type.as_deref().unwrap_or("fragment") {
        t if t.contains("vert") => ShaderKind::Vertex,
        t if t.contains("frag") => ShaderKind::Fragment,
        t => {
            log::warn!("[Pipeline] Unsupported shader type {t} for {}", desc.name);
            return None;
        }
    };
    let mut shader = ShaderSource::new(kind, text).with_name(&desc.name);
    if let Some(entry) = &desc.entry_point {
        shader = shader.with_entry_point(entry);
    }
    Some(shader)
}

fn parse_numbers(text: &str) -> Vec<f32> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

fn load_texture(desc: &TextureDesc) -> Option<TextureRef> {
    if let Some(uri) = &desc.uri {
        log::warn!("[Pipeline] Texture {} references '{uri}', file references are not resolved", desc.name);
        return None;
    }
    let Some(function) = desc.function.as_deref() else {
        log::warn!("[Pipeline] No valid image loaded for: {} while loading pipeline", desc.name);
        return None;
    };
    let args = parse_numbers(desc.arguments.as_deref().unwrap_or_default());
    let arg = |i: usize, default: f32| args.get(i).copied().unwrap_or(default);

    let texture = match function {
        "const" => lookup::constant_texture(&desc.name, Vec4::new(arg(0, 0.0), arg(1, 0.0), arg(2, 0.0), arg(3, 0.0))),
        "noise" => lookup::noise_texture(&desc.name, arg(0, 4.0) as u32, arg(1, 4.0) as u32),
        "poisson" => lookup::poisson_texture(&desc.name, arg(0, 16.0) as u32, arg(1, 1.0) as u32),
        other => {
            log::warn!(
                "[Pipeline] Unknown texture function: {other} for texture {} while loading pipeline",
                desc.name
            );
            return None;
        }
    };

    let mut sampler = texture.sampler();
    match desc.wrap.as_deref() {
        Some("mirror") => sampler.address_mode = wgpu::AddressMode::MirrorRepeat,
        Some("clamp") => sampler.address_mode = wgpu::AddressMode::ClampToEdge,
        Some("repeat") => sampler.address_mode = wgpu::AddressMode::Repeat,
        _ => {}
    }
    match desc.filter.as_deref() {
        Some("nearest") => sampler.filter = wgpu::FilterMode::Nearest,
        Some(_) => sampler.filter = wgpu::FilterMode::Linear,
        None => {}
    }
    Some(Arc::new(texture.with_sampler(sampler)))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => u8::from(*b).to_string(),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}

/// Parses a uniform value from its textual form.
#[must_use]
pub fn parse_uniform_value(uniform_type: &str, text: &str) -> UniformValue {
    let v = parse_numbers(text);
    let at = |i: usize| v.get(i).copied().unwrap_or(0.0);
    match uniform_type {
        t if t.starts_with("bool") || t.starts_with("bvec") => UniformValue::Bool(at(0) > 0.0),
        t if t.contains("vec2") => UniformValue::Vec2(Vec2::new(at(0), at(1))),
        t if t.contains("vec3") => UniformValue::Vec3(Vec3::new(at(0), at(1), at(2))),
        t if t.contains("vec4") => UniformValue::Vec4(Vec4::new(at(0), at(1), at(2), at(3))),
        t if t.contains("mat4") => {
            if v.len() >= 32 && v.len() % 16 == 0 {
                UniformValue::Mat4Array(v.chunks_exact(16).map(Mat4::from_cols_slice).collect())
            } else if v.len() >= 16 {
                UniformValue::Mat4(Mat4::from_cols_slice(&v[..16]))
            } else {
                UniformValue::Mat4(Mat4::IDENTITY)
            }
        }
        t if t.contains("int") => UniformValue::Int(at(0) as i32),
        _ => UniformValue::Float(at(0)),
    }
}

fn load_uniform(desc: &UniformDesc) -> Uniform {
    let name = desc.uniform_name.as_deref().unwrap_or(&desc.name);
    let text = desc.value.as_ref().map(value_text).unwrap_or_default();
    let kind = desc.uniform_type.as_deref().unwrap_or("float");
    Uniform::new(name, parse_uniform_value(kind, &text))
}

// ============================================================================
// Loading
// ============================================================================

impl Pipeline {
    /// Parses `json` and builds the pipeline it describes. See
    /// [`load`](Self::load).
    pub fn load_json(&mut self, json: &str, view: &mut View, capabilities: &GpuCapabilities) -> Result<SharedCamera> {
        let description = PipelineDescription::parse(json)?;
        self.load(&description, view, capabilities)
    }

    /// Builds the pipeline described by `description`, hands it to `view` and
    /// returns the forward camera.
    ///
    /// Every input stage gets its depth blitted into the forward pass.
    pub fn load(
        &mut self,
        description: &PipelineDescription,
        view: &mut View,
        capabilities: &GpuCapabilities,
    ) -> Result<SharedCamera> {
        let settings = &description.settings;
        let width = settings.width.filter(|w| *w > 0).unwrap_or(self.settings().width);
        let height = settings.height.filter(|h| *h > 0).unwrap_or(self.settings().height);
        let masks = settings
            .masks
            .as_ref()
            .map_or(self.settings().masks, |m| m.resolve(self.settings().masks));
        let shadow_number = settings.shadow_number.unwrap_or(self.settings().shadow_number);
        let shadow_resolution = settings
            .shadow_resolution
            .unwrap_or(self.settings().shadow_resolution);

        if description.pipeline.iter().all(|g| g.stages.is_empty()) {
            return Err(PipelineError::InvalidDescription("no stages described".to_string()));
        }
        let shared = SharedResources::load(&description.shared);
        self.start_stages(width, height, capabilities)?;

        let mut input_stages: Vec<StageHandle> = Vec::new();
        for group in &description.pipeline {
            log::debug!("[Pipeline] Loading stage group {}", group.name);
            for stage in &group.stages {
                let handle =
                    self.load_stage(stage, &shared, masks, shadow_number, shadow_resolution, &input_stages)?;
                if let Some(handle) = handle
                    && stage.kind.as_deref() == Some("input")
                {
                    input_stages.push(handle);
                }
            }
        }

        let forward = self.apply_stages_to_view(view, masks.forward);
        for handle in &input_stages {
            self.require_depth_blit(*handle, true);
        }
        log::info!("[Pipeline] Loaded {} stages from description", self.num_stages());
        Ok(forward)
    }

    fn load_stage(
        &mut self,
        desc: &StageDesc,
        shared: &SharedResources,
        masks: VisibilityMasks,
        shadow_number: u32,
        shadow_resolution: u32,
        input_stages: &[StageHandle],
    ) -> Result<Option<StageHandle>> {
        let (Some(name), Some(kind)) = (desc.name.as_deref(), desc.kind.as_deref()) else {
            log::info!("[Pipeline] Unknown stage data: {:?}", desc.name);
            return Ok(None);
        };

        let mut shaders = StageShaders::default();
        for shader in &desc.shaders {
            let loaded = shared
                .shaders
                .get(&shader.name)
                .cloned()
                .or_else(|| load_shader(shader, &shared.inclusions));
            match loaded {
                Some(s) => shaders.insert(s),
                None => log::warn!("[Pipeline] No such shader {}", shader.name),
            }
        }

        if kind.contains("module") {
            self.load_module(name, kind, &shaders, masks, shadow_number, shadow_resolution, input_stages)?;
            return Ok(None);
        }
        if shaders.is_empty() {
            log::warn!("[Pipeline] Invalid stage data: {name}");
            return Ok(None);
        }

        let handle = if kind == "display" {
            self.add_display_stage(name, &shaders, Vec4::new(0.0, 0.0, 1.0, 1.0))?
        } else {
            let mut buffers = Vec::with_capacity(desc.outputs.len());
            for output in &desc.outputs {
                let format = match output.format.as_deref() {
                    None | Some("") => BufferFormat::RgbInt8,
                    Some(tag) => match tag.parse::<BufferFormat>() {
                        Ok(format) => format,
                        Err(_) => {
                            log::warn!("[Pipeline] Invalid output: {}", output.name);
                            continue;
                        }
                    },
                };
                let spec = BufferSpec::new(&output.name, format);
                buffers.push(if output.mipmap { spec.with_mipmaps() } else { spec });
            }
            if buffers.is_empty() {
                log::warn!("[Pipeline] No output provided: {name}");
                return Ok(None);
            }

            let scale = desc.scale.unwrap_or(1.0);
            match kind {
                "input" => {
                    let mask = desc
                        .mask
                        .as_deref()
                        .and_then(parse_mask)
                        .unwrap_or(masks.deferred);
                    self.add_input_stage(name, mask, 0, &shaders, &buffers)?
                }
                "work" => self.add_work_stage(name, scale, &shaders, &buffers)?,
                "deferred" => self.add_deferred_stage(name, scale, desc.once, &shaders, &buffers)?,
                other => {
                    log::warn!("[Pipeline] Invalid stage type {other} for {name}");
                    return Ok(None);
                }
            }
        };

        self.load_inputs(handle, desc, shared);
        if let Some(stage) = self.stage(handle) {
            for uniform in &desc.uniforms {
                let uniform = shared
                    .uniforms
                    .get(&uniform.name)
                    .cloned()
                    .unwrap_or_else(|| load_uniform(uniform));
                stage.apply_uniform(uniform);
            }
        }
        Ok(Some(handle))
    }

    fn load_inputs(&self, handle: StageHandle, desc: &StageDesc, shared: &SharedResources) {
        let Some(stage) = self.stage(handle) else {
            return;
        };
        for input in &desc.inputs {
            let name = &input.texture.name;
            if let Some(source) = &input.stage {
                if let Some(src) = self.get_stage(source) {
                    let sampler = input.sampler_name.as_deref().unwrap_or(name);
                    self.apply_buffer_as(handle, src, name, sampler, input.unit);
                    continue;
                }
                match self.get_module(source) {
                    Some(PipelineModule::Light(light)) => {
                        light.lock().apply_texture_and_uniforms(stage, name, input.unit);
                    }
                    Some(PipelineModule::Shadow(shadow)) => {
                        shadow.lock().apply_texture_and_uniforms(stage, name, input.unit);
                    }
                    _ => log::warn!("[Pipeline] No such stage {source}"),
                }
                continue;
            }

            let texture = shared
                .textures
                .get(name)
                .cloned()
                .or_else(|| load_texture(&input.texture));
            match texture {
                Some(texture) => stage.apply_texture(input.unit, name, texture),
                None => log::warn!("[Pipeline] No such texture {name}"),
            }
        }
    }

    fn load_module(
        &mut self,
        name: &str,
        kind: &str,
        shaders: &StageShaders,
        masks: VisibilityMasks,
        shadow_number: u32,
        shadow_resolution: u32,
        input_stages: &[StageHandle],
    ) -> Result<()> {
        if kind.contains("shadow") {
            let Some(last_input) = input_stages.last().and_then(|h| self.stage(*h)) else {
                log::warn!("[Pipeline] Shadow module {name} needs a preceding input stage");
                return Ok(());
            };
            let Some(gbuffer_camera) = last_input.camera.clone() else {
                return Ok(());
            };
            if shaders.is_empty() {
                log::warn!("[Pipeline] Invalid module data: {name}");
                return Ok(());
            }

            let mut module = ShadowModule::new(name, self.settings().shadow_min_extent);
            module.create_stages(self, shadow_resolution, shadow_number as usize, shaders, masks.shadow_caster)?;
            let module = Arc::new(Mutex::new(module));
            let hook: SharedHook = Arc::new(Mutex::new(ShadowDrawHook::new(&module)));
            gbuffer_camera.write().add_hook(DrawPhase::Final, hook);
            self.add_module(name, PipelineModule::Shadow(module));
        } else if kind.contains("light") {
            let module = LightModule::new(name, self.settings());
            self.add_module(name, PipelineModule::Light(Arc::new(Mutex::new(module))));
        } else {
            log::warn!("[Pipeline] Invalid module data: {name}");
        }
        Ok(())
    }
}
