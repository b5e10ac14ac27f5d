//! Pipeline Description Tests
//!
//! Tests for:
//! - JSON parsing and settings overrides
//! - Stage construction from descriptions
//! - Inputs from stages, modules, shared and generated textures
//! - Tolerance for unknown or incomplete entries

use glam::{UVec2, Vec2};

use myth_deferred::renderer::core::context::GpuCapabilities;
use myth_deferred::renderer::graph::loader::{parse_uniform_value, PipelineDescription};
use myth_deferred::renderer::graph::pipeline::{Pipeline, PipelineModule, FORWARD_CAMERA_NAME};
use myth_deferred::renderer::graph::shader::UniformValue;
use myth_deferred::renderer::graph::stage::StageKind;
use myth_deferred::renderer::modules::light::LightModule;
use myth_deferred::scene::camera::{DrawHook, DrawPhase};
use myth_deferred::scene::view::View;
use myth_deferred::PipelineError;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const DEFERRED_JSON: &str = r#"
{
  "pipeline": [
    { "name": "Deferred", "stages": [
      { "name": "GBuffer", "type": "input",
        "outputs": [ { "name": "NormalBuffer", "format": "RGBA_INT8" },
                     { "name": "DepthBuffer", "format": "DEPTH24_STENCIL8" } ],
        "shaders": [ { "name": "gbuffer.vert", "shader_type": "vertex", "source": "@vertex fn vs_main() {}" },
                     { "name": "gbuffer.frag", "shader_type": "fragment",
                       "include": ["common"], "source": ["@fragment", "fn fs_main() {}"] } ] },
      { "name": "Shadow", "type": "shadow_module",
        "shaders": [ { "name": "caster.vert", "shader_type": "vertex", "source": "v" },
                     { "name": "caster.frag", "shader_type": "fragment", "source": "f" } ] },
      { "name": "Lights", "type": "light_module" },
      { "name": "Lighting", "type": "work", "scale": 0.5,
        "outputs": [ { "name": "ColorBuffer", "format": "rgb_float16", "mipmap": true } ],
        "shaders": [ { "name": "shared_quad" } ],
        "inputs": [ { "name": "NormalBuffer", "stage": "GBuffer", "unit": 0 },
                    { "name": "DepthBuffer", "stage": "GBuffer", "sampler_name": "SceneDepth", "unit": 1 },
                    { "name": "RandomTexture", "function": "noise", "arguments": "4 4", "unit": 2 },
                    { "name": "LightParameterMap", "stage": "Lights", "unit": 3 },
                    { "name": "ShadowMap", "stage": "Shadow", "unit": 4 },
                    { "name": "Lookup", "unit": 5 } ],
        "uniforms": [ { "name": "Exposure", "type": "float", "value": "1.5" },
                      { "name": "Offset", "type": "vec2", "value": [0.25, 0.75] },
                      { "name": "GlobalTint" } ] },
      { "name": "Bloom", "type": "deferred", "runOnce": true,
        "outputs": [ { "name": "BloomBuffer" } ],
        "shaders": [ { "name": "bloom.frag", "source": "f" } ] },
      { "name": "Final", "type": "display",
        "shaders": [ { "name": "display.frag", "type": "fragment", "source": "f" } ],
        "inputs": [ { "name": "BloomBuffer", "stage": "Bloom", "sampler_name": "ColorBuffer", "unit": 0 } ] }
    ] }
  ],
  "shared": [
    { "type": "inclusion", "name": "common", "source": "fn saturate(x: f32) -> f32 { return clamp(x, 0.0, 1.0); }" },
    { "type": "shader", "name": "shared_quad", "shader_type": "fragment", "source": "@fragment fn fs_main() {}" },
    { "type": "texture", "name": "Lookup", "function": "const", "arguments": "1 0 0 1", "filter": "nearest" },
    { "type": "uniform", "name": "GlobalTint", "uniform_type": "vec3", "value": "1 0.5 0.25" },
    { "type": "sound", "name": "Ignored" }
  ],
  "settings": { "width": 1024, "height": 512, "shadow_number": 2, "shadow_resolution": 256,
                "masks": { "deferred": "ff0000", "forward": "ff00", "shadow_caster": "1000000" } }
}
"#;

fn load(json: &str) -> (Pipeline, View, myth_deferred::Result<myth_deferred::scene::SharedCamera>) {
    init_logging();
    let mut pipeline = Pipeline::default();
    let mut view = View::new(1024, 512);
    let result = pipeline.load_json(json, &mut view, &GpuCapabilities::default());
    (pipeline, view, result)
}

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn description_parses_groups_and_settings() {
    let description = PipelineDescription::parse(DEFERRED_JSON).unwrap();
    assert_eq!(description.pipeline.len(), 1);
    assert_eq!(description.pipeline[0].stages.len(), 6);
    assert_eq!(description.shared.len(), 5);
    assert_eq!(description.settings.width, Some(1024));
    assert_eq!(description.settings.shadow_number, Some(2));
    assert!(description.pipeline[0].stages[4].once);
}

#[test]
fn malformed_json_is_an_error() {
    let (_, _, result) = load("{ \"pipeline\": [ ");
    assert!(matches!(result, Err(PipelineError::JsonError(_))));
}

#[test]
fn description_without_stages_is_rejected() {
    let (pipeline, view, result) = load(r#"{ "pipeline": [ { "name": "Empty", "stages": [] } ] }"#);
    assert!(matches!(result, Err(PipelineError::InvalidDescription(_))));
    assert!(!pipeline.is_started());
    assert!(view.slaves().is_empty());
}

#[test]
fn uniform_values_parse_from_text() {
    assert_eq!(parse_uniform_value("vec3", "1, 2, 3"), UniformValue::Vec3(glam::Vec3::new(1.0, 2.0, 3.0)));
    assert_eq!(parse_uniform_value("int", "7"), UniformValue::Int(7));
    assert_eq!(parse_uniform_value("bvec2", "0"), UniformValue::Bool(false));
    assert_eq!(parse_uniform_value("", "2.5"), UniformValue::Float(2.5));
    let identities = "1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1 ".repeat(2);
    assert_eq!(
        parse_uniform_value("mat4", &identities),
        UniformValue::Mat4Array(vec![glam::Mat4::IDENTITY; 2])
    );
}

// ============================================================================
// Building
// ============================================================================

#[test]
fn stages_are_built_in_description_order() {
    let (pipeline, _, result) = load(DEFERRED_JSON);
    result.unwrap();

    let names: Vec<&str> = pipeline.stages().map(|(_, s)| s.name()).collect();
    assert_eq!(
        names,
        vec!["GBuffer", "ShadowCaster0", "ShadowCaster1", "Lighting", "Bloom", "Final"]
    );
    let kinds: Vec<StageKind> = pipeline.stages().map(|(_, s)| s.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            StageKind::Input,
            StageKind::Input,
            StageKind::Input,
            StageKind::Work,
            StageKind::Deferred,
            StageKind::Display
        ]
    );
    assert_eq!(pipeline.base_size(), UVec2::new(1024, 512));
}

#[test]
fn settings_override_masks_and_sizes() {
    let (pipeline, _, result) = load(DEFERRED_JSON);
    let forward = result.unwrap();
    assert_eq!(forward.read().name, FORWARD_CAMERA_NAME);
    assert_eq!(forward.read().cull_mask, 0xff00);

    let gbuffer = pipeline.stage(pipeline.get_stage("GBuffer").unwrap()).unwrap();
    assert_eq!(gbuffer.camera.as_ref().unwrap().read().cull_mask, 0x00ff_0000);

    let caster = pipeline.stage(pipeline.get_stage("ShadowCaster0").unwrap()).unwrap();
    let caster = caster.camera.as_ref().unwrap().read();
    assert_eq!(caster.cull_mask, 0x0100_0000);
    assert_eq!(caster.target_size(), Some(UVec2::splat(256)));

    // Scale 0.5 of max(1024x512, 1920x1080).
    let lighting = pipeline.stage(pipeline.get_stage("Lighting").unwrap()).unwrap();
    assert_eq!(lighting.size(), UVec2::new(960, 540));
}

#[test]
fn outputs_default_to_rgb_int8_and_keep_mipmaps() {
    let (pipeline, _, result) = load(DEFERRED_JSON);
    result.unwrap();
    let bloom = pipeline.stage(pipeline.get_stage("Bloom").unwrap()).unwrap();
    let buffer = bloom.get_buffer_texture("BloomBuffer").unwrap();
    assert_eq!(buffer.format(), myth_deferred::BufferFormat::RgbInt8);

    let lighting = pipeline.stage(pipeline.get_stage("Lighting").unwrap()).unwrap();
    assert!(lighting.get_buffer_texture("ColorBuffer").unwrap().mip_levels() > 1);

    let runners = pipeline.deferred_callback().lock();
    assert_eq!(runners.runners().len(), 1);
    assert!(runners.runners()[0].lock().run_once);
}

#[test]
fn inputs_resolve_stages_modules_and_textures() {
    let (pipeline, _, result) = load(DEFERRED_JSON);
    result.unwrap();
    let lighting = pipeline.stage(pipeline.get_stage("Lighting").unwrap()).unwrap();
    let state = lighting.state().read();

    assert_eq!(state.texture(0).unwrap().texture.label(), "GBuffer_NormalBuffer");
    assert_eq!(state.texture(1).unwrap().sampler_name, "SceneDepth");
    assert_eq!(state.texture(2).unwrap().texture.size(), UVec2::new(4, 4));
    assert_eq!(state.texture(3).unwrap().texture.label(), "LightParameterMap");
    assert_eq!(state.texture(4).unwrap().texture.label(), "Shadow_ShadowMap");
    assert_eq!(state.texture(5).unwrap().texture.sampler().filter, wgpu::FilterMode::Nearest);

    assert!(state.uniform(LightModule::LIGHT_NUMBER).is_some());
    assert!(state.uniform("ShadowSpaceMatrices").is_some());

    let final_stage = pipeline.stage(pipeline.get_stage("Final").unwrap()).unwrap();
    let final_state = final_stage.state().read();
    assert_eq!(final_state.texture(0).unwrap().sampler_name, "ColorBuffer");
    assert_eq!(final_state.texture(0).unwrap().texture.label(), "Bloom_BloomBuffer");
}

#[test]
fn uniforms_and_shared_shaders_are_applied() {
    let (pipeline, _, result) = load(DEFERRED_JSON);
    result.unwrap();
    let lighting = pipeline.stage(pipeline.get_stage("Lighting").unwrap()).unwrap();
    let state = lighting.state().read();

    assert_eq!(state.uniform("Exposure").unwrap().get(), UniformValue::Float(1.5));
    assert_eq!(state.uniform("Offset").unwrap().get(), UniformValue::Vec2(Vec2::new(0.25, 0.75)));
    assert_eq!(
        state.uniform("GlobalTint").unwrap().get(),
        UniformValue::Vec3(glam::Vec3::new(1.0, 0.5, 0.25))
    );

    let program = state.program().unwrap();
    assert_eq!(program.name, "Lighting_PROGRAM");
    assert!(program.vertex.is_none());
    assert!(program.fragment.as_ref().unwrap().source.contains("fs_main"));

    let gbuffer = pipeline.stage(pipeline.get_stage("GBuffer").unwrap()).unwrap();
    let gbuffer_state = gbuffer.state().read();
    let fragment = gbuffer_state.program().unwrap().fragment.as_ref().unwrap();
    assert!(fragment.source.starts_with("fn saturate"));
    assert!(fragment.source.ends_with("fn fs_main() {}\n"));
}

#[test]
fn modules_are_registered_and_hooked() {
    let (pipeline, _, result) = load(DEFERRED_JSON);
    result.unwrap();
    assert!(matches!(pipeline.get_module("Shadow"), Some(PipelineModule::Shadow(_))));
    assert!(matches!(pipeline.get_module("Lights"), Some(PipelineModule::Light(_))));
    assert_eq!(pipeline.shadow_module("Shadow").unwrap().lock().cascade_count(), 2);

    let gbuffer = pipeline.stage(pipeline.get_stage("GBuffer").unwrap()).unwrap();
    let camera = gbuffer.camera.as_ref().unwrap().read();
    let hooks = camera.hooks.slot(DrawPhase::Final);
    assert_eq!(hooks.len(), 1);
    assert_eq!(hooks[0].lock().name(), "ShadowDrawHook");
}

#[test]
fn input_stage_depth_is_blitted_into_the_forward_pass() {
    let (pipeline, view, result) = load(DEFERRED_JSON);
    result.unwrap();
    let callback = pipeline.deferred_callback().lock();
    let labels: Vec<&str> = callback.depth_blits().iter().map(|t| t.label()).collect();
    assert_eq!(labels, vec!["GBuffer_DepthBuffer"]);
    // GBuffer, two casters, Lighting, Final and the forward camera.
    assert_eq!(view.slaves().len(), 6);
}

// ============================================================================
// Tolerance
// ============================================================================

#[test]
fn incomplete_entries_are_skipped() {
    let json = r#"
    {
      "pipeline": [ { "name": "P", "stages": [
        { "name": "NoType" },
        { "type": "work", "outputs": [ { "name": "X" } ] },
        { "name": "NoShaders", "type": "work", "outputs": [ { "name": "X" } ] },
        { "name": "BadOutput", "type": "work",
          "outputs": [ { "name": "X", "format": "RGB_INT9" } ],
          "shaders": [ { "name": "a.frag", "source": "f" } ] },
        { "name": "FileShader", "type": "work",
          "outputs": [ { "name": "X" } ],
          "shaders": [ { "name": "b.frag", "uri": "shaders/b.wgsl" } ] },
        { "name": "Strange", "type": "compute",
          "outputs": [ { "name": "X" } ],
          "shaders": [ { "name": "c.frag", "source": "f" } ] },
        { "name": "Lonely", "type": "shadow_module",
          "shaders": [ { "name": "d.frag", "source": "f" } ] },
        { "name": "Ok", "type": "work",
          "outputs": [ { "name": "X" } ],
          "shaders": [ { "name": "e.frag", "source": "f" } ],
          "inputs": [ { "name": "Missing", "stage": "Nowhere", "unit": 0 },
                     { "name": "AlsoMissing", "unit": 1 },
                     { "name": "Gen", "function": "sparkles", "unit": 2 } ] }
      ] } ]
    }"#;
    let (pipeline, view, result) = load(json);
    result.unwrap();

    let names: Vec<&str> = pipeline.stages().map(|(_, s)| s.name()).collect();
    assert_eq!(names, vec!["Ok"]);
    assert!(pipeline.get_module("Lonely").is_none());
    let ok = pipeline.stage(pipeline.get_stage("Ok").unwrap()).unwrap();
    assert_eq!(ok.state().read().textures().count(), 0);
    assert_eq!(view.slaves().len(), 2);
}

#[test]
fn insufficient_capabilities_abort_the_load() {
    init_logging();
    let mut pipeline = Pipeline::default();
    let mut view = View::new(640, 480);
    let caps = GpuCapabilities {
        programmable_shading: false,
        ..GpuCapabilities::default()
    };
    let result = pipeline.load_json(DEFERRED_JSON, &mut view, &caps);
    assert!(matches!(result, Err(PipelineError::MissingCapability(_))));
    assert_eq!(pipeline.num_stages(), 0);
}
