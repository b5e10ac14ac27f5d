//! Standard Pipeline Tests
//!
//! Tests for:
//! - Stage order of the stock graph
//! - Module registration and the G-buffer shadow hook
//! - Lighting inputs (G-buffer, IBL, light table)
//! - Shadow cascades wired into the shadowing pass
//! - The bloom downsampling chain

use std::sync::Arc;

use glam::{UVec2, Vec2, Vec4};

use myth_deferred::renderer::core::context::GpuCapabilities;
use myth_deferred::renderer::graph::format::BufferFormat;
use myth_deferred::renderer::graph::lookup;
use myth_deferred::renderer::graph::pipeline::{Pipeline, PipelineModule};
use myth_deferred::renderer::graph::shader::{ShaderSource, UniformValue};
use myth_deferred::renderer::graph::stage::{Stage, StageKind};
use myth_deferred::renderer::graph::standard::{
    setup_standard_pipeline, IblSource, StandardPipeline, StandardPipelineParams, StandardShaders,
};
use myth_deferred::renderer::settings::PipelineSettings;
use myth_deferred::scene::camera::{DrawHook, DrawPhase};
use myth_deferred::scene::view::View;

fn fragment(name: &str) -> ShaderSource {
    ShaderSource::fragment(format!("// {name}\n@fragment fn fs_main() {{}}")).with_name(name)
}

fn shaders() -> StandardShaders {
    StandardShaders {
        quad_vs: ShaderSource::vertex("@vertex fn vs_main() {}").with_name("quad.vert"),
        gbuffer_vs: ShaderSource::vertex("@vertex fn vs_main() {}").with_name("gbuffer.vert"),
        gbuffer_fs: fragment("gbuffer.frag"),
        shadow_cast_vs: ShaderSource::vertex("@vertex fn vs_main() {}").with_name("shadow_cast.vert"),
        shadow_cast_fs: fragment("shadow_cast.frag"),
        brdf_lut_fs: fragment("brdf_lut.frag"),
        env_prefilter_fs: fragment("env_prefilter.frag"),
        irr_convolution_fs: fragment("irr_convolution.frag"),
        ssao_fs: fragment("ssao.frag"),
        ssao_blur_fs: fragment("ssao_blur.frag"),
        pbr_lighting_fs: fragment("pbr_lighting.frag"),
        shadow_combine_fs: fragment("shadow_combine.frag"),
        brightness_fs: fragment("brightness.frag"),
        downsample_fs: fragment("downsample.frag"),
        brightness_combine_fs: fragment("brightness_combine.frag"),
        bloom_fs: fragment("bloom.frag"),
        tonemapping_fs: fragment("tonemapping.frag"),
        anti_aliasing_fs: fragment("anti_aliasing.frag"),
        display_fs: fragment("display.frag"),
    }
}

fn build(settings: PipelineSettings, ibl: IblSource) -> (Pipeline, View, StandardPipeline) {
    let mut pipeline = Pipeline::new(settings);
    let mut view = View::new(1920, 1080);
    let params = StandardPipelineParams {
        shaders: shaders(),
        width: 1920,
        height: 1080,
        ibl,
    };
    let standard = setup_standard_pipeline(&mut pipeline, &mut view, &GpuCapabilities::default(), &params).unwrap();
    (pipeline, view, standard)
}

fn stage<'a>(pipeline: &'a Pipeline, name: &str) -> &'a Stage {
    pipeline.stage(pipeline.get_stage(name).unwrap()).unwrap()
}

fn names(pipeline: &Pipeline) -> Vec<String> {
    pipeline.stages().map(|(_, s)| s.name().to_string()).collect()
}

// ============================================================================
// Layout
// ============================================================================

#[test]
fn default_graph_has_the_stock_stage_order() {
    let (pipeline, _, _) = build(PipelineSettings::default(), IblSource::None);

    let mut expected: Vec<String> = [
        "GBuffer",
        "Ssao",
        "SsaoBlur1",
        "SsaoBlur2",
        "Lighting",
        "Shadowing",
        "Brighting",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();
    expected.extend((1..=10).map(|i| format!("Downsampling{i}")));
    expected.extend(
        ["BrightCombining", "Blooming", "ToneMapping", "AntiAliasing", "Final"]
            .iter()
            .map(ToString::to_string),
    );
    assert_eq!(names(&pipeline), expected);
    assert_eq!(pipeline.num_stages(), 22);
}

#[test]
fn stage_kinds_match_their_role() {
    let (pipeline, view, standard) = build(PipelineSettings::default(), IblSource::None);
    assert_eq!(stage(&pipeline, "GBuffer").kind(), StageKind::Input);
    assert_eq!(stage(&pipeline, "Ssao").kind(), StageKind::Work);
    assert_eq!(stage(&pipeline, "Lighting").kind(), StageKind::Work);
    assert_eq!(stage(&pipeline, "Brighting").kind(), StageKind::Deferred);
    assert_eq!(stage(&pipeline, "ToneMapping").kind(), StageKind::Deferred);
    assert_eq!(stage(&pipeline, "Final").kind(), StageKind::Display);
    assert_eq!(standard.gbuffer, pipeline.get_stage("GBuffer").unwrap());
    assert_eq!(standard.display, pipeline.get_stage("Final").unwrap());

    // Seven camera stages plus the forward camera.
    assert_eq!(view.slaves().len(), 8);
    assert_eq!(pipeline.deferred_callback().lock().runners().len(), 15);
}

#[test]
fn gbuffer_writes_the_material_buffers() {
    let (pipeline, _, _) = build(PipelineSettings::default(), IblSource::None);
    let gbuffer = stage(&pipeline, "GBuffer");
    let outputs: Vec<&str> = gbuffer.output_names().collect();
    assert_eq!(
        outputs,
        vec![
            "NormalBuffer",
            "DiffuseMetallicBuffer",
            "SpecularRoughnessBuffer",
            "EmissionOcclusionBuffer",
            "DepthBuffer"
        ]
    );
    assert_eq!(
        gbuffer.get_buffer_texture("DepthBuffer").unwrap().format(),
        BufferFormat::Depth24Stencil8
    );
    assert_eq!(gbuffer.size(), UVec2::new(1920, 1080));

    let labels: Vec<String> = pipeline
        .deferred_callback()
        .lock()
        .depth_blits()
        .iter()
        .map(|t| t.label().to_string())
        .collect();
    assert_eq!(labels, vec!["GBuffer_DepthBuffer"]);
}

#[test]
fn modules_are_registered() {
    let (pipeline, _, standard) = build(PipelineSettings::default(), IblSource::None);
    match pipeline.get_module("Shadow") {
        Some(PipelineModule::Shadow(shadow)) => assert!(Arc::ptr_eq(shadow, &standard.shadow)),
        _ => panic!("missing shadow module"),
    }
    match pipeline.get_module("Light") {
        Some(PipelineModule::Light(light)) => assert!(Arc::ptr_eq(light, &standard.light)),
        _ => panic!("missing light module"),
    }

    let camera = stage(&pipeline, "GBuffer").camera.clone().unwrap();
    let camera = camera.read();
    let hooks = camera.hooks.slot(DrawPhase::Final);
    assert_eq!(hooks.len(), 1);
    assert_eq!(hooks[0].lock().name(), "ShadowDrawHook");
}

// ============================================================================
// Lighting Inputs
// ============================================================================

#[test]
fn lighting_samples_gbuffer_and_light_table() {
    let (pipeline, _, standard) = build(PipelineSettings::default(), IblSource::None);
    let lighting = stage(&pipeline, "Lighting");
    let state = lighting.state().read();

    for (unit, name) in [
        "NormalBuffer",
        "DiffuseMetallicBuffer",
        "SpecularRoughnessBuffer",
        "EmissionOcclusionBuffer",
        "DepthBuffer",
    ]
    .into_iter()
    .enumerate()
    {
        let binding = state.texture(unit as u32).unwrap();
        assert_eq!(binding.sampler_name, name);
        assert_eq!(binding.texture.label(), format!("GBuffer_{name}"));
    }

    // No IBL: black placeholders.
    for (unit, name) in [(5, "BrdfLutBuffer"), (6, "PrefilterBuffer"), (7, "IrradianceBuffer")] {
        let binding = state.texture(unit).unwrap();
        assert_eq!(binding.sampler_name, name);
        assert_eq!(binding.texture.size(), UVec2::ONE);
    }

    let table = state.texture(8).unwrap();
    assert_eq!(table.sampler_name, "LightParameterMap");
    assert!(Arc::ptr_eq(&table.texture, standard.light.lock().parameter_texture()));
    assert!(state.uniform("LightNumber").is_some());
}

#[test]
fn environment_ibl_adds_run_once_stages() {
    let environment = Arc::new(lookup::constant_texture("Sky", Vec4::new(0.3, 0.5, 0.9, 1.0)));
    let (pipeline, _, _) = build(PipelineSettings::default(), IblSource::Environment(environment.clone()));

    let all = names(&pipeline);
    assert_eq!(&all[1..4], ["BrdfLut", "Prefilter", "IrrConvolution"]);
    assert_eq!(pipeline.num_stages(), 25);

    let prefilter = stage(&pipeline, "Prefilter");
    assert!(prefilter.runner.as_ref().unwrap().lock().run_once);
    let prefilter_state = prefilter.state().read();
    assert!(Arc::ptr_eq(&prefilter_state.texture(0).unwrap().texture, &environment));
    assert_eq!(
        prefilter_state.uniform("GlobalRoughness").unwrap().get(),
        UniformValue::Float(4.0)
    );

    let lighting = stage(&pipeline, "Lighting").state().read();
    assert_eq!(lighting.texture(5).unwrap().texture.label(), "BrdfLut_BrdfLutBuffer");
    assert_eq!(lighting.texture(7).unwrap().texture.label(), "IrrConvolution_IrradianceBuffer");
}

#[test]
fn precomputed_ibl_binds_the_given_textures() {
    let brdf_lut = Arc::new(lookup::constant_texture("Lut", Vec4::ONE));
    let prefilter = Arc::new(lookup::constant_texture("Pre", Vec4::ONE));
    let irradiance = Arc::new(lookup::constant_texture("Irr", Vec4::ONE));
    let (pipeline, _, _) = build(
        PipelineSettings::default(),
        IblSource::Precomputed {
            brdf_lut: brdf_lut.clone(),
            prefilter,
            irradiance: irradiance.clone(),
        },
    );
    assert_eq!(pipeline.num_stages(), 22);
    let lighting = stage(&pipeline, "Lighting").state().read();
    assert!(Arc::ptr_eq(&lighting.texture(5).unwrap().texture, &brdf_lut));
    assert!(Arc::ptr_eq(&lighting.texture(7).unwrap().texture, &irradiance));
}

// ============================================================================
// Shadows & Bloom
// ============================================================================

#[test]
fn shadow_cascades_feed_the_shadowing_pass() {
    let settings = PipelineSettings {
        shadow_number: 2,
        shadow_resolution: 512,
        ..PipelineSettings::default()
    };
    let (pipeline, view, standard) = build(settings, IblSource::None);

    let all = names(&pipeline);
    assert_eq!(&all[..3], ["GBuffer", "ShadowCaster0", "ShadowCaster1"]);
    assert_eq!(pipeline.num_stages(), 24);
    assert_eq!(view.slaves().len(), 10);

    let shadowing = stage(&pipeline, "Shadowing").state().read();
    let map = shadowing.texture(6).unwrap();
    assert_eq!(map.sampler_name, "ShadowMap");
    assert_eq!(map.texture.label(), "Shadow_ShadowMap");
    assert_eq!(map.texture.layers(), 2);
    assert!(shadowing
        .uniform("ShadowSpaceMatrices")
        .unwrap()
        .shares_value_with(standard.shadow.lock().matrices()));
    assert_eq!(shadowing.texture(4).unwrap().sampler_name, "RandomTexture0");
}

#[test]
fn without_cascades_no_shadow_map_is_bound() {
    let (pipeline, _, _) = build(PipelineSettings::default(), IblSource::None);
    let shadowing = stage(&pipeline, "Shadowing").state().read();
    assert!(shadowing.texture(6).is_none());
    assert!(shadowing.uniform("ShadowSpaceMatrices").is_some());
}

#[test]
fn downsampling_halves_down_to_a_few_pixels() {
    let (pipeline, _, _) = build(PipelineSettings::default(), IblSource::None);

    let first = stage(&pipeline, "Downsampling1");
    assert_eq!(first.size(), UVec2::new(960, 540));
    assert_eq!(
        first.state().read().uniform("InvBufferResolution").unwrap().get(),
        UniformValue::Vec2(Vec2::new(1.0 / 960.0, 1.0 / 540.0))
    );
    let first_input = first.state().read();
    assert_eq!(first_input.texture(0).unwrap().sampler_name, "ColorBuffer");
    assert_eq!(first_input.texture(0).unwrap().texture.label(), "Brighting_BrightnessBuffer0");

    let last = stage(&pipeline, "Downsampling10");
    assert_eq!(last.size(), UVec2::new(2, 1));

    let tonemapping = stage(&pipeline, "ToneMapping").state().read();
    let luminance = tonemapping.texture(1).unwrap();
    assert_eq!(luminance.sampler_name, "LuminanceBuffer");
    assert_eq!(luminance.texture.label(), "Downsampling10_BrightnessBuffer10");

    let combining = stage(&pipeline, "BrightCombining").state().read();
    assert_eq!(combining.textures().count(), 4);
}

#[test]
fn forward_camera_keeps_stage_output() {
    let (_, _, standard) = build(PipelineSettings::default(), IblSource::None);
    let forward = standard.forward_camera.read();
    assert!(forward.clear.mask.is_empty());
    assert_eq!(forward.hooks.slot(DrawPhase::Pre).len(), 1);
}
