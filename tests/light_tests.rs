//! Light Registry Tests
//!
//! Tests for:
//! - Registry upserts, pruning and the dirty flag
//! - Ranking and capacity truncation
//! - Parameter table layout
//! - Main light forwarding to the shadow module

use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4};
use parking_lot::Mutex;

use myth_deferred::renderer::core::context::GpuCapabilities;
use myth_deferred::renderer::graph::pipeline::{BufferSpec, Pipeline, PipelineModule};
use myth_deferred::renderer::graph::format::BufferFormat;
use myth_deferred::renderer::graph::shader::{ShaderSource, StageShaders, UniformValue};
use myth_deferred::renderer::modules::light::{
    eye_direction, pack_light_table, LightData, LightModule, LightRanking, LightRegistry, RecencyRanking,
};
use myth_deferred::renderer::modules::shadow::ShadowModule;
use myth_deferred::renderer::settings::PipelineSettings;
use myth_deferred::scene::frame::FrameContext;
use myth_deferred::scene::light::{LightKind, LightSource};

const EPSILON: f32 = 1e-4;

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

fn point_light(x: f32) -> LightSource {
    LightSource::point(Vec3::new(1.0, 0.5, 0.25), Vec3::new(x, 0.0, 0.0), Vec2::new(1.0, 10.0))
}

fn column(table: &[f32], width: usize, row: usize, i: usize) -> Vec4 {
    let offset = (row * width + i) * 4;
    Vec4::from_slice(&table[offset..offset + 4])
}

// ============================================================================
// Registry
// ============================================================================

#[test]
fn cull_upserts_lights_by_id() {
    let mut ctx = FrameContext::new();
    let light = point_light(0.0);

    light.cull(&mut ctx, Mat4::IDENTITY);
    ctx.advance(0.016);
    light.cull(&mut ctx, Mat4::IDENTITY);

    assert_eq!(ctx.lights.len(), 1);
    assert_eq!(ctx.lights.get(light.id).unwrap().frame, 1);
    assert!(ctx.lights.is_dirty());
    assert!(ctx.lights.check_dirty());
    assert!(!ctx.lights.check_dirty());
}

#[test]
fn prune_drops_stale_lights() {
    let mut registry = LightRegistry::new();
    let old = point_light(0.0);
    let fresh = point_light(1.0);
    registry.add(LightData::new(old.clone(), Mat4::IDENTITY, 2));
    registry.add(LightData::new(fresh.clone(), Mat4::IDENTITY, 9));
    registry.check_dirty();

    assert_eq!(registry.prune(10, 5), 1);
    assert!(registry.get(old.id).is_none());
    assert!(registry.get(fresh.id).is_some());
    assert!(registry.is_dirty());

    registry.check_dirty();
    assert_eq!(registry.prune(10, 5), 0);
    assert!(!registry.is_dirty());
}

#[test]
fn prune_keeps_lights_exactly_at_the_threshold() {
    let mut registry = LightRegistry::new();
    let boundary = point_light(0.0);
    let stale = point_light(1.0);
    registry.add(LightData::new(boundary.clone(), Mat4::IDENTITY, 5));
    registry.add(LightData::new(stale.clone(), Mat4::IDENTITY, 4));

    assert_eq!(registry.prune(10, 5), 1);
    assert!(registry.get(boundary.id).is_some());
    assert!(registry.get(stale.id).is_none());
}

#[test]
fn remove_marks_dirty_only_when_present() {
    let mut registry = LightRegistry::new();
    let light = point_light(0.0);
    registry.add(LightData::new(light.clone(), Mat4::IDENTITY, 0));
    registry.check_dirty();

    assert!(registry.remove(light.id));
    assert!(registry.check_dirty());
    assert!(!registry.remove(light.id));
    assert!(!registry.is_dirty());
    assert!(registry.is_empty());
}

#[test]
fn recency_ranking_puts_recent_lights_first() {
    let mut registry = LightRegistry::new();
    for frame in [3, 7, 1, 5] {
        registry.add(LightData::new(point_light(frame as f32), Mat4::IDENTITY, frame));
    }
    let frames: Vec<u64> = registry.sorted(&RecencyRanking).iter().map(|d| d.frame).collect();
    assert_eq!(frames, vec![7, 5, 3, 1]);
}

struct ByDistance;

impl LightRanking for ByDistance {
    fn compare(&self, a: &LightData, b: &LightData) -> std::cmp::Ordering {
        a.light.position.x.total_cmp(&b.light.position.x)
    }
}

#[test]
fn custom_ranking_orders_the_snapshot() {
    let mut registry = LightRegistry::new();
    for x in [4.0, -2.0, 9.0] {
        registry.add(LightData::new(point_light(x), Mat4::IDENTITY, 0));
    }
    let xs: Vec<f32> = registry.sorted(&ByDistance).iter().map(|d| d.light.position.x).collect();
    assert_eq!(xs, vec![-2.0, 4.0, 9.0]);
}

// ============================================================================
// Parameter Table
// ============================================================================

#[test]
fn table_rows_describe_each_light() {
    let spot = LightSource::spot(Vec3::new(0.2, 0.4, 0.6), Vec3::new(1.0, 2.0, 3.0), Vec3::NEG_Z, 8.0, 25.0);
    let model_view = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
    let data = LightData::new(spot.clone(), model_view, 0);

    let width = 4;
    let table = pack_light_table(&[data.clone()], width);
    assert_eq!(table.len(), width * 16);

    assert_eq!(column(&table, width, 0, 0), Vec4::new(0.2, 0.4, 0.6, spot.power));
    let position = column(&table, width, 1, 0);
    assert!(position.truncate().abs_diff_eq(Vec3::new(1.0, 2.0, -2.0), EPSILON));
    assert!(approx(position.w, spot.range.y));

    let direction = column(&table, width, 2, 0);
    assert!(direction.truncate().abs_diff_eq(Vec3::NEG_Z, EPSILON));
    assert!(direction.truncate().abs_diff_eq(eye_direction(&data), EPSILON));
    assert!(approx(direction.w, 8.0));

    let kind = column(&table, width, 3, 0);
    assert!(approx(kind.x, f32::from(LightKind::Spot as u8)));
    assert!(approx(kind.w, 25.0));

    // Unused columns stay zero.
    assert_eq!(column(&table, width, 0, 1), Vec4::ZERO);
}

#[test]
fn eye_direction_follows_the_model_view_rotation() {
    let light = LightSource::directional(Vec3::ONE, Vec3::NEG_Y);
    let model_view = Mat4::from_rotation_x(std::f32::consts::FRAC_PI_2);
    let data = LightData::new(light, model_view, 0);
    assert!(eye_direction(&data).abs_diff_eq(Vec3::NEG_Z, EPSILON));
}

#[test]
fn table_ignores_lights_beyond_its_width() {
    let lights: Vec<LightData> = (0..3)
        .map(|i| LightData::new(point_light(i as f32), Mat4::IDENTITY, 0))
        .collect();
    let table = pack_light_table(&lights, 2);
    assert_eq!(table.len(), 2 * 16);
    assert!(approx(column(&table, 2, 1, 1).x, 1.0));
}

// ============================================================================
// Light Module
// ============================================================================

#[test]
fn module_truncates_to_capacity() {
    let settings = PipelineSettings::default();
    let pipeline = Pipeline::new(settings.clone());
    let mut module = LightModule::new("Light", &settings);
    let mut ctx = FrameContext::new();
    for i in 0..1100 {
        point_light(i as f32).cull(&mut ctx, Mat4::IDENTITY);
    }

    assert!(module.update(&mut ctx, &pipeline));
    assert_eq!(module.packed_count(), 1024);
    assert_eq!(
        module.light_number().get(),
        UniformValue::Vec2(Vec2::new(1024.0, settings.max_lights_in_pass as f32))
    );

    let texture = module.parameter_texture().clone();
    assert_eq!(texture.label(), "LightParameterMap");
    assert_eq!(texture.width(), 1024);
    assert_eq!(texture.height(), 4);
    assert_eq!(texture.format(), BufferFormat::RgbaFloat32);
    let data = texture.take_pending().unwrap();
    assert_eq!(data.len(), 1024 * 4 * 16);

    // Nothing changed: no repack.
    assert!(!module.update(&mut ctx, &pipeline));
    assert!(!texture.has_pending_data());
}

#[test]
fn module_keeps_the_most_recently_seen_lights() {
    let settings = PipelineSettings {
        light_prune_interval: 1000,
        ..PipelineSettings::default()
    };
    let pipeline = Pipeline::new(settings.clone());
    let mut module = LightModule::new("Light", &settings);
    let mut ctx = FrameContext::new();

    // 100 new lights per frame over frames 0..=10, x encodes frame * 100 + i.
    for frame in 0..11u32 {
        if frame > 0 {
            ctx.advance(f64::from(frame) * 0.016);
        }
        for i in 0..100u32 {
            point_light((frame * 100 + i) as f32).cull(&mut ctx, Mat4::IDENTITY);
        }
    }
    assert_eq!(ctx.lights.len(), 1100);

    assert!(module.update(&mut ctx, &pipeline));
    assert_eq!(module.packed_count(), 1024);

    let bytes = module.parameter_texture().take_pending().unwrap();
    let table: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    let width = settings.light_capacity;
    let mut per_frame = [0usize; 11];
    for i in 0..width {
        let x = column(&table, width, 1, i).x;
        per_frame[(x as usize) / 100] += 1;
    }
    assert_eq!(per_frame[0], 24);
    assert!(per_frame[1..].iter().all(|&n| n == 100));
}

#[test]
fn module_prunes_on_its_interval() {
    let settings = PipelineSettings {
        light_prune_interval: 2,
        light_prune_threshold: 1,
        ..PipelineSettings::default()
    };
    let pipeline = Pipeline::new(settings.clone());
    let mut module = LightModule::new("Light", &settings);
    let mut ctx = FrameContext::new();
    point_light(0.0).cull(&mut ctx, Mat4::IDENTITY);
    module.update(&mut ctx, &pipeline);
    assert_eq!(module.packed_count(), 1);

    ctx.advance(0.1);
    ctx.advance(0.2);
    ctx.advance(0.3);
    // Frame 3 is off the interval.
    assert!(!module.update(&mut ctx, &pipeline));
    assert_eq!(ctx.lights.len(), 1);

    ctx.advance(0.4);
    assert!(module.update(&mut ctx, &pipeline));
    assert_eq!(ctx.lights.len(), 0);
    assert_eq!(module.packed_count(), 0);
}

#[test]
fn module_binds_table_and_count() {
    let settings = PipelineSettings::default();
    let mut pipeline = Pipeline::new(settings.clone());
    pipeline.start_stages(320, 240, &GpuCapabilities::default()).unwrap();
    let lighting = pipeline
        .add_work_stage(
            "Lighting",
            1.0,
            &StageShaders::fragment_only(ShaderSource::fragment("@fragment fn fs_main() {}")),
            &[BufferSpec::new("ColorBuffer", BufferFormat::RgbFloat16)],
        )
        .unwrap();
    let module = LightModule::new("Light", &settings);

    let stage = pipeline.stage(lighting).unwrap();
    assert_eq!(module.apply_texture_and_uniforms(stage, "LightParameterMap", 8), 9);
    let state = stage.state().read();
    let binding = state.texture(8).unwrap();
    assert_eq!(binding.sampler_name, "LightParameterMap");
    assert!(Arc::ptr_eq(&binding.texture, module.parameter_texture()));
    assert!(state
        .uniform(LightModule::LIGHT_NUMBER)
        .unwrap()
        .shares_value_with(module.light_number()));
}

#[test]
fn main_light_is_forwarded_to_the_shadow_module() {
    let settings = PipelineSettings::default();
    let mut pipeline = Pipeline::new(settings.clone());
    let shadow = Arc::new(Mutex::new(ShadowModule::new("Shadow", 0.1)));
    pipeline.add_module("Shadow", PipelineModule::Shadow(shadow.clone()));

    let mut module = LightModule::new("Light", &settings);
    let sun = LightSource::directional(Vec3::ONE, Vec3::new(0.0, -1.0, -1.0));
    module.set_main_light(sun, Mat4::IDENTITY, "Shadow");

    let before = shadow.lock().light_view();
    module.update(&mut FrameContext::new(), &pipeline);
    let after = shadow.lock().light_view();
    assert_ne!(before, after);

    // The light looks down its direction.
    let forward = after.inverse().transform_vector3(Vec3::NEG_Z);
    assert!(forward.abs_diff_eq(Vec3::new(0.0, -1.0, -1.0).normalize(), EPSILON));
}
