//! Standard Deferred Pipeline
//!
//! The stock stage graph:
//!
//! ```text
//!  GBuffer ─┬─► Ssao ─► SsaoBlur1 ─► SsaoBlur2 ─┐
//!           │                                   ▼
//!           ├─► Lighting ◄── IBL, LightParameterMap
//!           │      │
//!           │      ▼
//!           └─► Shadowing ◄── ShadowMap (ShadowCaster0..N)
//!                  │
//!                  ▼  deferred chain
//!  Brighting ─► Downsampling1..N ─► BrightCombining ─► Blooming
//!                  │
//!                  ▼
//!  ToneMapping ─► AntiAliasing ─► Final (display)
//! ```
//!
//! Shader sources are supplied by the host through [`StandardShaders`]; the
//! graph only wires buffers, uniforms and lookup textures.

use std::sync::Arc;

use glam::{UVec2, Vec2, Vec3, Vec4};
use parking_lot::Mutex;

use crate::errors::{PipelineError, Result};
use crate::renderer::core::context::GpuCapabilities;
use crate::renderer::graph::format::BufferFormat;
use crate::renderer::graph::lookup;
use crate::renderer::graph::pipeline::{BufferSpec, Pipeline, PipelineModule};
use crate::renderer::graph::shader::{ShaderSource, StageShaders, Uniform, UniformValue};
use crate::renderer::graph::stage::StageHandle;
use crate::renderer::graph::texture::TextureRef;
use crate::renderer::modules::light::LightModule;
use crate::renderer::modules::shadow::{ShadowDrawHook, ShadowModule};
use crate::scene::camera::{DrawPhase, SharedCamera, SharedHook};
use crate::scene::view::View;

/// Height below which the bloom downsampling chain stops.
const DOWNSAMPLE_STOP: f32 = 2.0;

/// Shader sources of every standard stage.
#[derive(Debug, Clone)]
pub struct StandardShaders {
    pub quad_vs: ShaderSource,
    pub gbuffer_vs: ShaderSource,
    pub gbuffer_fs: ShaderSource,
    pub shadow_cast_vs: ShaderSource,
    pub shadow_cast_fs: ShaderSource,
    pub brdf_lut_fs: ShaderSource,
    pub env_prefilter_fs: ShaderSource,
    pub irr_convolution_fs: ShaderSource,
    pub ssao_fs: ShaderSource,
    pub ssao_blur_fs: ShaderSource,
    pub pbr_lighting_fs: ShaderSource,
    pub shadow_combine_fs: ShaderSource,
    pub brightness_fs: ShaderSource,
    pub downsample_fs: ShaderSource,
    pub brightness_combine_fs: ShaderSource,
    pub bloom_fs: ShaderSource,
    pub tonemapping_fs: ShaderSource,
    pub anti_aliasing_fs: ShaderSource,
    pub display_fs: ShaderSource,
}

impl StandardShaders {
    fn quad(&self, fragment: &ShaderSource) -> StageShaders {
        StageShaders::new(self.quad_vs.clone(), fragment.clone())
    }
}

/// Where image-based lighting comes from.
#[derive(Debug, Clone, Default)]
pub enum IblSource {
    /// No IBL; the lighting pass samples black.
    #[default]
    None,
    /// Run-once stages derive the lookup textures from this environment map.
    Environment(TextureRef),
    /// Precomputed lookup textures.
    Precomputed {
        brdf_lut: TextureRef,
        prefilter: TextureRef,
        irradiance: TextureRef,
    },
}

#[derive(Debug, Clone)]
pub struct StandardPipelineParams {
    pub shaders: StandardShaders,
    pub width: u32,
    pub height: u32,
    pub ibl: IblSource,
}

/// Handles to the parts of a standard pipeline hosts usually touch.
#[derive(Debug, Clone)]
pub struct StandardPipeline {
    pub forward_camera: SharedCamera,
    pub gbuffer: StageHandle,
    pub display: StageHandle,
    pub shadow: Arc<Mutex<ShadowModule>>,
    pub light: Arc<Mutex<LightModule>>,
}

fn uniform(name: &str, value: UniformValue) -> Uniform {
    Uniform::new(name, value)
}

/// Builds the standard graph into `pipeline` and hands it to `view`.
pub fn setup_standard_pipeline(
    pipeline: &mut Pipeline,
    view: &mut View,
    capabilities: &GpuCapabilities,
    params: &StandardPipelineParams,
) -> Result<StandardPipeline> {
    let shaders = &params.shaders;
    pipeline.start_stages(params.width, params.height, capabilities)?;
    let settings = pipeline.settings().clone();
    let masks = settings.masks;

    // GBuffer first: its camera computes the frame's near/far for every later stage.
    let gbuffer = pipeline.add_input_stage(
        "GBuffer",
        masks.deferred,
        0,
        &StageShaders::new(shaders.gbuffer_vs.clone(), shaders.gbuffer_fs.clone()),
        &[
            BufferSpec::new("NormalBuffer", BufferFormat::RgbaInt8),
            BufferSpec::new("DiffuseMetallicBuffer", BufferFormat::RgbaInt8),
            BufferSpec::new("SpecularRoughnessBuffer", BufferFormat::RgbaInt8),
            BufferSpec::new("EmissionOcclusionBuffer", BufferFormat::RgbaFloat16),
            BufferSpec::new("DepthBuffer", BufferFormat::Depth24Stencil8),
        ],
    )?;

    // === Modules ===

    let mut shadow = ShadowModule::new("Shadow", settings.shadow_min_extent);
    shadow.create_stages(
        pipeline,
        settings.shadow_resolution,
        settings.shadow_number as usize,
        &StageShaders::new(shaders.shadow_cast_vs.clone(), shaders.shadow_cast_fs.clone()),
        masks.shadow_caster,
    )?;
    let shadow = Arc::new(Mutex::new(shadow));
    let gbuffer_camera = pipeline
        .stage(gbuffer)
        .and_then(|s| s.camera.clone())
        .ok_or(PipelineError::StaleStage)?;
    let hook: SharedHook = Arc::new(Mutex::new(ShadowDrawHook::new(&shadow)));
    gbuffer_camera.write().add_hook(DrawPhase::Final, hook);
    pipeline.add_module("Shadow", PipelineModule::Shadow(shadow.clone()));

    let light = Arc::new(Mutex::new(LightModule::new("Light", &settings)));
    pipeline.add_module("Light", PipelineModule::Light(light.clone()));

    // === IBL ===

    let ibl_stages = match &params.ibl {
        IblSource::Environment(environment) => {
            let brdf_lut = pipeline.add_deferred_stage(
                "BrdfLut",
                1.0,
                true,
                &shaders.quad(&shaders.brdf_lut_fs),
                &[BufferSpec::new("BrdfLutBuffer", BufferFormat::RgFloat16)],
            )?;
            let prefilter = pipeline.add_deferred_stage(
                "Prefilter",
                1.0,
                true,
                &shaders.quad(&shaders.env_prefilter_fs),
                &[BufferSpec::new("PrefilterBuffer", BufferFormat::RgbInt8)],
            )?;
            let convolution = pipeline.add_deferred_stage(
                "IrrConvolution",
                1.0,
                true,
                &shaders.quad(&shaders.irr_convolution_fs),
                &[BufferSpec::new("IrradianceBuffer", BufferFormat::RgbInt8)],
            )?;
            if let Some(stage) = pipeline.stage(prefilter) {
                stage.apply_texture(0, "EnvironmentMap", environment.clone());
                stage.apply_uniform(uniform("GlobalRoughness", UniformValue::Float(4.0)));
            }
            if let Some(stage) = pipeline.stage(convolution) {
                stage.apply_texture(0, "EnvironmentMap", environment.clone());
            }
            Some((brdf_lut, prefilter, convolution))
        }
        _ => None,
    };

    // === SSAO ===

    let ssao = pipeline.add_work_stage(
        "Ssao",
        1.0,
        &shaders.quad(&shaders.ssao_fs),
        &[BufferSpec::new("SsaoBuffer", BufferFormat::RInt8)],
    )?;
    pipeline.apply_buffer(ssao, gbuffer, "NormalBuffer", 0);
    pipeline.apply_buffer(ssao, gbuffer, "DepthBuffer", 1);
    let noise = pipeline.create_texture(lookup::noise_texture("RandomTexture", 4, 4));
    if let Some(stage) = pipeline.stage(ssao) {
        stage.apply_texture(2, "RandomTexture", noise);
        stage.apply_uniform(uniform("AORadius", UniformValue::Float(6.0)));
        stage.apply_uniform(uniform("AOBias", UniformValue::Float(0.1)));
        stage.apply_uniform(uniform("AOPowExponent", UniformValue::Float(12.0)));
    }

    let ssao_blur1 = pipeline.add_work_stage(
        "SsaoBlur1",
        1.0,
        &shaders.quad(&shaders.ssao_blur_fs),
        &[BufferSpec::new("SsaoBlurredBuffer0", BufferFormat::RInt8)],
    )?;
    pipeline.apply_buffer(ssao_blur1, ssao, "SsaoBuffer", 0);
    if let Some(stage) = pipeline.stage(ssao_blur1) {
        stage.apply_uniform(uniform("BlurDirection", UniformValue::Vec2(Vec2::X)));
        stage.apply_uniform(uniform("BlurSharpness", UniformValue::Float(40.0)));
    }

    let ssao_blur2 = pipeline.add_work_stage(
        "SsaoBlur2",
        1.0,
        &shaders.quad(&shaders.ssao_blur_fs),
        &[BufferSpec::new("SsaoBlurredBuffer", BufferFormat::RInt8)],
    )?;
    pipeline.apply_buffer_as(ssao_blur2, ssao_blur1, "SsaoBlurredBuffer0", "SsaoBuffer", 0);
    if let Some(stage) = pipeline.stage(ssao_blur2) {
        stage.apply_uniform(uniform("BlurDirection", UniformValue::Vec2(Vec2::Y)));
        stage.apply_uniform(uniform("BlurSharpness", UniformValue::Float(40.0)));
    }

    // === Lighting ===

    let lighting = pipeline.add_work_stage(
        "Lighting",
        1.0,
        &shaders.quad(&shaders.pbr_lighting_fs),
        &[
            BufferSpec::new("ColorBuffer", BufferFormat::RgbFloat16),
            BufferSpec::new("IblAmbientBuffer", BufferFormat::RgbInt8),
        ],
    )?;
    for (unit, buffer) in [
        "NormalBuffer",
        "DiffuseMetallicBuffer",
        "SpecularRoughnessBuffer",
        "EmissionOcclusionBuffer",
        "DepthBuffer",
    ]
    .into_iter()
    .enumerate()
    {
        pipeline.apply_buffer(lighting, gbuffer, buffer, unit as u32);
    }
    match (&params.ibl, ibl_stages) {
        (_, Some((brdf_lut, prefilter, convolution))) => {
            pipeline.apply_buffer(lighting, brdf_lut, "BrdfLutBuffer", 5);
            pipeline.apply_buffer(lighting, prefilter, "PrefilterBuffer", 6);
            pipeline.apply_buffer(lighting, convolution, "IrradianceBuffer", 7);
        }
        (
            IblSource::Precomputed {
                brdf_lut,
                prefilter,
                irradiance,
            },
            None,
        ) => {
            if let Some(stage) = pipeline.stage(lighting) {
                stage.apply_texture(5, "BrdfLutBuffer", brdf_lut.clone());
                stage.apply_texture(6, "PrefilterBuffer", prefilter.clone());
                stage.apply_texture(7, "IrradianceBuffer", irradiance.clone());
            }
        }
        _ => {
            if let Some(stage) = pipeline.stage(lighting) {
                stage.apply_default_texture(Vec4::ZERO, "BrdfLutBuffer", 5);
                stage.apply_default_texture(Vec4::ZERO, "PrefilterBuffer", 6);
                stage.apply_default_texture(Vec4::ZERO, "IrradianceBuffer", 7);
            }
        }
    }
    if let Some(stage) = pipeline.stage(lighting) {
        light.lock().apply_texture_and_uniforms(stage, "LightParameterMap", 8);
    }

    // === Shadowing ===

    let shadowing = pipeline.add_work_stage(
        "Shadowing",
        1.0,
        &shaders.quad(&shaders.shadow_combine_fs),
        &[BufferSpec::new("CombinedBuffer", BufferFormat::RgbFloat16)],
    )?;
    pipeline.apply_buffer(shadowing, lighting, "ColorBuffer", 0);
    pipeline.apply_buffer(shadowing, ssao_blur2, "SsaoBlurredBuffer", 1);
    pipeline.apply_buffer(shadowing, gbuffer, "NormalBuffer", 2);
    pipeline.apply_buffer(shadowing, gbuffer, "DepthBuffer", 3);
    let poisson0 = pipeline.create_texture(lookup::poisson_texture("RandomTexture0", 16, 1));
    let poisson1 = pipeline.create_texture(lookup::poisson_texture("RandomTexture1", 16, 1));
    if let Some(stage) = pipeline.stage(shadowing) {
        stage.apply_texture(4, "RandomTexture0", poisson0);
        stage.apply_texture(5, "RandomTexture1", poisson1);
        shadow.lock().apply_texture_and_uniforms(stage, "ShadowMap", 6);
    }

    // === Bloom ===

    let brighting = pipeline.add_deferred_stage(
        "Brighting",
        1.0,
        false,
        &shaders.quad(&shaders.brightness_fs),
        &[BufferSpec::new("BrightnessBuffer0", BufferFormat::RgbInt8)],
    )?;
    pipeline.apply_buffer_as(brighting, shadowing, "CombinedBuffer", "ColorBuffer", 0);
    if let Some(stage) = pipeline.stage(brighting) {
        stage.apply_uniform(uniform("BrightnessThreshold", UniformValue::Float(0.7)));
    }

    let floor = pipeline
        .base_size()
        .max(UVec2::from(settings.min_resolution))
        .as_vec2();
    let mut downsamples = vec![brighting];
    let mut index = 1u32;
    let mut height = floor.y;
    while height > DOWNSAMPLE_STOP {
        let scale = 1.0 / (1u32 << index) as f32;
        height = floor.y * scale;
        let inv_resolution = Vec2::new(1.0 / (floor.x * scale), 1.0 / height);

        let previous = downsamples[downsamples.len() - 1];
        let stage = pipeline.add_deferred_stage(
            &format!("Downsampling{index}"),
            scale,
            false,
            &shaders.quad(&shaders.downsample_fs),
            &[BufferSpec::new(format!("BrightnessBuffer{index}"), BufferFormat::RgbInt8)],
        )?;
        pipeline.apply_buffer_as(stage, previous, &format!("BrightnessBuffer{}", index - 1), "ColorBuffer", 0);
        if let Some(s) = pipeline.stage(stage) {
            s.apply_uniform(uniform("InvBufferResolution", UniformValue::Vec2(inv_resolution)));
        }
        downsamples.push(stage);
        index += 1;
    }

    let bright_combining = pipeline.add_deferred_stage(
        "BrightCombining",
        1.0,
        false,
        &shaders.quad(&shaders.brightness_combine_fs),
        &[BufferSpec::new("BrightnessCombinedBuffer", BufferFormat::RgbInt8)],
    )?;
    for i in 1..=4usize {
        if let Some(source) = downsamples.get(i) {
            pipeline.apply_buffer(bright_combining, *source, &format!("BrightnessBuffer{i}"), i as u32 - 1);
        }
    }

    let blooming = pipeline.add_deferred_stage(
        "Blooming",
        1.0,
        false,
        &shaders.quad(&shaders.bloom_fs),
        &[BufferSpec::new("BloomBuffer", BufferFormat::RgbInt8)],
    )?;
    pipeline.apply_buffer(blooming, bright_combining, "BrightnessCombinedBuffer", 0);
    if let Some(stage) = pipeline.stage(blooming) {
        stage.apply_uniform(uniform("BloomFactor", UniformValue::Float(1.0)));
    }

    // === Tone mapping & output ===

    let tonemapping = pipeline.add_deferred_stage(
        "ToneMapping",
        1.0,
        false,
        &shaders.quad(&shaders.tonemapping_fs),
        &[BufferSpec::new("ToneMappedBuffer", BufferFormat::RgbFloat16)],
    )?;
    let last = downsamples.len() - 1;
    pipeline.apply_buffer_as(tonemapping, shadowing, "CombinedBuffer", "ColorBuffer", 0);
    pipeline.apply_buffer_as(
        tonemapping,
        downsamples[last],
        &format!("BrightnessBuffer{last}"),
        "LuminanceBuffer",
        1,
    );
    pipeline.apply_buffer(tonemapping, blooming, "BloomBuffer", 2);
    pipeline.apply_buffer(tonemapping, lighting, "IblAmbientBuffer", 3);
    if let Some(stage) = pipeline.stage(tonemapping) {
        stage.apply_uniform(uniform("LuminanceFactor", UniformValue::Vec2(Vec2::new(1.0, 10.0))));
    }

    let anti_aliasing = pipeline.add_deferred_stage(
        "AntiAliasing",
        1.0,
        false,
        &shaders.quad(&shaders.anti_aliasing_fs),
        &[BufferSpec::new("AntiAliasedBuffer", BufferFormat::RgbFloat16)],
    )?;
    pipeline.apply_buffer_as(anti_aliasing, tonemapping, "ToneMappedBuffer", "ColorBuffer", 0);

    let display = pipeline.add_display_stage(
        "Final",
        &shaders.quad(&shaders.display_fs),
        Vec4::new(0.0, 0.0, 1.0, 1.0),
    )?;
    pipeline.apply_buffer_as(display, anti_aliasing, "AntiAliasedBuffer", "ColorBuffer", 0);
    pipeline.apply_buffer(display, gbuffer, "DepthBuffer", 1);
    if let Some(stage) = pipeline.stage(display) {
        stage.apply_uniform(uniform("FogDistance", UniformValue::Vec2(Vec2::ZERO)));
        stage.apply_uniform(uniform("FogColor", UniformValue::Vec3(Vec3::splat(0.5))));
        stage.apply_uniform(uniform("ColorAttribute", UniformValue::Vec3(Vec3::ONE)));
        stage.apply_uniform(uniform("ColorBalance", UniformValue::Vec3(Vec3::ZERO)));
        stage.apply_uniform(uniform("ColorBalanceMode", UniformValue::Int(0)));
        stage.apply_uniform(uniform("VignetteRadius", UniformValue::Float(1.0)));
        stage.apply_uniform(uniform("VignetteDarkness", UniformValue::Float(0.0)));
    }

    let forward_camera = pipeline.apply_stages_to_view(view, masks.forward);
    pipeline.require_depth_blit(gbuffer, true);
    log::info!("Standard pipeline ready with {} stages", pipeline.num_stages());

    Ok(StandardPipeline {
        forward_camera,
        gbuffer,
        display,
        shadow,
        light,
    })
}
