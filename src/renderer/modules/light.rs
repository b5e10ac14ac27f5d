//! Light Registry & Light Module
//!
//! Lights are collected during cull and packed during update:
//!
//! ```text
//!  cull:   LightSource::cull ──► FrameContext.lights (upsert, dirty)
//!  update: LightModule::update ──► prune (every N frames)
//!                               └► if dirty: sort ─► truncate ─► parameter table
//! ```
//!
//! Packing happens in the update phase, so the table reflects the lights
//! culled in the previous frame.
//!
//! # Parameter Table
//!
//! An `RGBA_FLOAT32` texture of `capacity × 4` texels; column `i` describes
//! light `i` of the sorted snapshot:
//!
//! | Row | RGB                              | A                |
//! |-----|----------------------------------|------------------|
//! | 0   | color                            | power            |
//! | 1   | eye-space position               | range max        |
//! | 2   | eye-space direction              | spot exponent    |
//! | 3   | type, range min, range max       | spot cutoff      |
//!
//! `LightNumber = (packed count, max lights per pass)` tells the shader how
//! many columns are valid.

use std::cmp::Ordering;
use std::sync::Arc;

use glam::{Mat4, UVec2, Vec2, Vec3, Vec4};
use rustc_hash::FxHashMap;

use crate::renderer::graph::format::BufferFormat;
use crate::renderer::graph::pipeline::{Pipeline, PipelineModule};
use crate::renderer::graph::shader::{Uniform, UniformValue};
use crate::renderer::graph::stage::Stage;
use crate::renderer::graph::texture::{SamplerSettings, StageTexture, TextureRef};
use crate::renderer::settings::PipelineSettings;
use crate::scene::frame::FrameContext;
use crate::scene::light::{LightId, LightSource};

/// Length of the segment used to turn a light direction into eye space.
const DIRECTION_LENGTH: f32 = 1000.0;

// ============================================================================
// Registry
// ============================================================================

/// A visible light as recorded during cull.
#[derive(Debug, Clone, PartialEq)]
pub struct LightData {
    pub light: LightSource,
    pub model_view: Mat4,
    /// Frame the light was last culled visible.
    pub frame: u64,
}

impl LightData {
    #[must_use]
    pub fn new(light: LightSource, model_view: Mat4, frame: u64) -> Self {
        Self {
            light,
            model_view,
            frame,
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> LightId {
        self.light.id
    }
}

/// Order in which lights claim the limited table columns.
pub trait LightRanking: Send + Sync {
    fn compare(&self, a: &LightData, b: &LightData) -> Ordering;
}

/// Most recently seen first; ties broken by id for determinism.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecencyRanking;

impl LightRanking for RecencyRanking {
    fn compare(&self, a: &LightData, b: &LightData) -> Ordering {
        b.frame.cmp(&a.frame).then_with(|| a.id().cmp(&b.id()))
    }
}

/// The set of currently visible lights of one frame context.
#[derive(Debug, Default)]
pub struct LightRegistry {
    lights: FxHashMap<LightId, LightData>,
    dirty: bool,
}

impl LightRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or refreshes a light.
    pub fn add(&mut self, data: LightData) {
        self.lights.insert(data.id(), data);
        self.dirty = true;
    }

    pub fn remove(&mut self, id: LightId) -> bool {
        let removed = self.lights.remove(&id).is_some();
        self.dirty |= removed;
        removed
    }

    /// Drops lights not seen within `threshold` frames of `frame`. Returns the
    /// number removed.
    pub fn prune(&mut self, frame: u64, threshold: u64) -> usize {
        let before = self.lights.len();
        self.lights
            .retain(|_, data| data.frame.saturating_add(threshold) >= frame);
        let removed = before - self.lights.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Returns the dirty flag and clears it.
    pub fn check_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.lights.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: LightId) -> Option<&LightData> {
        self.lights.get(&id)
    }

    /// Snapshot of every light, ordered by `ranking`.
    #[must_use]
    pub fn sorted(&self, ranking: &dyn LightRanking) -> Vec<LightData> {
        let mut result: Vec<LightData> = self.lights.values().cloned().collect();
        result.sort_by(|a, b| ranking.compare(a, b));
        result
    }
}

// ============================================================================
// Packing
// ============================================================================

/// Writes the four rows of `lights` into a `width × 4` RGBA float table.
#[must_use]
pub fn pack_light_table(lights: &[LightData], width: usize) -> Vec<f32> {
    let mut table = vec![0.0f32; width * 4 * 4];
    for (i, data) in lights.iter().take(width).enumerate() {
        let light = &data.light;
        let (kind, _) = light.kind();
        let pos0 = data.model_view.transform_point3(light.position.truncate());
        let dir = eye_direction(data);

        let rows = [
            light.color.extend(light.power),
            pos0.extend(light.range.y),
            dir.extend(light.spot_exponent),
            Vec4::new(f32::from(kind as u8), light.range.x, light.range.y, light.spot_cutoff),
        ];
        for (row, value) in rows.iter().enumerate() {
            let offset = (row * width + i) * 4;
            table[offset..offset + 4].copy_from_slice(&value.to_array());
        }
    }
    table
}

// ============================================================================
// Light Module
// ============================================================================

/// The main light, forwarded to a shadow module every update.
#[derive(Debug, Clone)]
struct MainLight {
    light: LightSource,
    world: Mat4,
    shadow_module: String,
}

/// Per-view packer of the light registry.
pub struct LightModule {
    name: String,
    parameter_texture: TextureRef,
    light_number: Uniform,
    ranking: Box<dyn LightRanking>,
    main_light: Option<MainLight>,
    capacity: usize,
    max_lights_in_pass: u32,
    prune_interval: u64,
    prune_threshold: u64,
    packed: usize,
}

impl std::fmt::Debug for LightModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightModule")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("packed", &self.packed)
            .finish_non_exhaustive()
    }
}

impl LightModule {
    pub const LIGHT_NUMBER: &'static str = "LightNumber";

    #[must_use]
    pub fn new(name: impl Into<String>, settings: &PipelineSettings) -> Self {
        let capacity = settings.light_capacity.max(1);
        let texture = StageTexture::new(
            "LightParameterMap",
            BufferFormat::RgbaFloat32,
            UVec2::new(capacity as u32, 4),
        )
        .with_sampler(SamplerSettings::nearest_clamp_border(
            wgpu::SamplerBorderColor::TransparentBlack,
        ));
        Self {
            name: name.into(),
            parameter_texture: Arc::new(texture),
            light_number: Uniform::new(
                Self::LIGHT_NUMBER,
                UniformValue::Vec2(Vec2::new(0.0, settings.max_lights_in_pass as f32)),
            ),
            ranking: Box::new(RecencyRanking),
            main_light: None,
            capacity,
            max_lights_in_pass: settings.max_lights_in_pass,
            prune_interval: settings.light_prune_interval.max(1),
            prune_threshold: settings.light_prune_threshold,
            packed: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn parameter_texture(&self) -> &TextureRef {
        &self.parameter_texture
    }

    #[inline]
    #[must_use]
    pub fn light_number(&self) -> &Uniform {
        &self.light_number
    }

    /// Lights written by the last packing.
    #[inline]
    #[must_use]
    pub fn packed_count(&self) -> usize {
        self.packed
    }

    pub fn set_ranking(&mut self, ranking: Box<dyn LightRanking>) {
        self.ranking = ranking;
    }

    /// Forwards `light` (placed by `world`) to the shadow module registered
    /// as `shadow_module` on every update.
    pub fn set_main_light(&mut self, light: LightSource, world: Mat4, shadow_module: impl Into<String>) {
        self.main_light = Some(MainLight {
            light,
            world,
            shadow_module: shadow_module.into(),
        });
    }

    pub fn clear_main_light(&mut self) {
        self.main_light = None;
    }

    /// Per-frame update. Returns whether the parameter table was rewritten.
    pub fn update(&mut self, ctx: &mut FrameContext, pipeline: &Pipeline) -> bool {
        if let Some(main) = &self.main_light {
            self.forward_main_light(main, pipeline);
        }

        let frame = ctx.frame_number();
        if frame % self.prune_interval == 0 {
            ctx.lights.prune(frame, self.prune_threshold);
        }
        if !ctx.lights.check_dirty() {
            return false;
        }

        let mut lights = ctx.lights.sorted(self.ranking.as_ref());
        lights.truncate(self.capacity);
        let table = pack_light_table(&lights, self.capacity);
        self.parameter_texture
            .write(bytemuck::cast_slice(&table).to_vec());

        self.packed = lights.len();
        self.light_number.set(UniformValue::Vec2(Vec2::new(
            self.packed as f32,
            self.max_lights_in_pass as f32,
        )));
        log::trace!("{}: packed {} lights at frame {frame}", self.name, self.packed);
        true
    }

    fn forward_main_light(&self, main: &MainLight, pipeline: &Pipeline) {
        let Some(PipelineModule::Shadow(shadow)) = pipeline.get_module(&main.shadow_module) else {
            return;
        };
        let origin = main.light.position.truncate();
        let pos0 = main.world.transform_point3(origin);
        let pos1 = main
            .world
            .transform_point3(origin + main.light.direction * DIRECTION_LENGTH);
        let mut shadow = shadow.lock();
        let max_distance = shadow.max_distance();
        shadow.set_light_state(pos0, pos1 - pos0, max_distance);
    }

    /// Binds the parameter table at `unit` and the light count uniform.
    /// Returns the next free unit.
    pub fn apply_texture_and_uniforms(&self, stage: &Stage, prefix: &str, unit: u32) -> u32 {
        stage.apply_texture(unit, prefix, self.parameter_texture.clone());
        stage.apply_uniform(self.light_number.clone());
        unit + 1
    }
}

/// Eye-space direction of a light, as packed into row 2.
#[must_use]
pub fn eye_direction(data: &LightData) -> Vec3 {
    let origin = data.light.position.truncate();
    let pos0 = data.model_view.transform_point3(origin);
    let pos1 = data
        .model_view
        .transform_point3(origin + data.light.direction * DIRECTION_LENGTH);
    (pos1 - pos0).normalize_or_zero()
}
