//! Cascaded Shadow Module
//!
//! Owns one render camera per cascade (at most [`MAX_CASCADES`]) and a layered
//! shadow texture with one layer per cascade. Every frame, once the drawing
//! camera's final projection is known, the module fits the cascades to the
//! visible part of the scene:
//!
//! ```text
//!  view frustum (near..min(far, near + max distance))
//!        │  corners ∪ reference points, in light space
//!        ▼
//!  light-space box ──clamp to min extent──► split along X
//!        │                                  {0, .05, .2, .5, 1}[0..=N]
//!        ▼
//!  cascade i: ortho(x_i..x_i+1, y_min..y_max, ±max(|z_min|, |z_max|))
//!        │
//!        ▼
//!  ShadowSpaceMatrices[i] = proj_i × light_view × view⁻¹
//! ```
//!
//! The light view is a look-at from the light position along its direction.
//! When reference points change and the light position is not retained, the
//! view is re-centered on the center of the reference points.

use std::sync::{Arc, Weak};

use glam::{Mat4, UVec2, Vec3, Vec4};
use parking_lot::Mutex;

use crate::errors::Result;
use crate::renderer::graph::format::{AttachmentPoint, BufferFormat};
use crate::renderer::graph::frustum::{Frustum, ShadowBound};
use crate::renderer::graph::near_far::extract_near_far;
use crate::renderer::graph::pipeline::Pipeline;
use crate::renderer::graph::shader::{ShaderProgram, ShaderState, StageShaders, Uniform, UniformValue};
use crate::renderer::graph::stage::{Stage, StageKind};
use crate::renderer::graph::texture::{Attachment, StageTexture, TextureRef};
use crate::scene::camera::{
    Camera, CameraContent, ClearSettings, DrawHook, DrawInfo, NearFarMode, RasterState, ReferenceFrame,
    RenderOrder, SharedCamera, Viewport,
};

/// Maximum cascade count.
pub const MAX_CASCADES: usize = 4;

/// Split ratios along light-space X; `N` cascades use the first `N + 1`.
pub const SPLIT_RATIOS: [f32; MAX_CASCADES + 1] = [0.0, 0.05, 0.2, 0.5, 1.0];

/// Distance used for the light view target when no maximum is set.
const DEFAULT_LIGHT_DISTANCE: f32 = 100.0;

/// Ranges shorter than this skip the cascade update.
const MIN_SHADOW_RANGE: f32 = 0.01;

// ============================================================================
// Cascade Split
// ============================================================================

/// Splits `[x_min, x_max]` into `count` contiguous ranges.
///
/// Boundaries follow the ratio table prefix normalized by its last entry, so
/// the first range starts at `x_min` and the last ends exactly at `x_max`.
#[must_use]
pub fn cascade_split_ranges(x_min: f32, x_max: f32, count: usize) -> Vec<(f32, f32)> {
    let count = count.clamp(1, MAX_CASCADES);
    let total = SPLIT_RATIOS[count];
    let width = x_max - x_min;
    let boundary = |i: usize| {
        if i == count {
            x_max
        } else {
            x_min + width * SPLIT_RATIOS[i] / total
        }
    };
    (0..count).map(|i| (boundary(i), boundary(i + 1))).collect()
}

// ============================================================================
// Shadow Module
// ============================================================================

#[derive(Debug)]
pub struct ShadowModule {
    name: String,
    shadow_map: Option<TextureRef>,
    matrices: Uniform,
    cameras: Vec<SharedCamera>,
    cascade_bounds: Vec<ShadowBound>,

    light_input: Mat4,
    light_view: Mat4,
    max_distance: f32,
    retain_light_position: bool,
    dirty_reference: bool,
    reference_points: Vec<Vec3>,
    min_extent: f32,

    updated_camera: Option<Weak<parking_lot::RwLock<Camera>>>,
}

impl ShadowModule {
    pub const MATRICES_NAME: &'static str = "ShadowSpaceMatrices";

    #[must_use]
    pub fn new(name: impl Into<String>, min_extent: f32) -> Self {
        Self {
            name: name.into(),
            shadow_map: None,
            matrices: Uniform::new(
                Self::MATRICES_NAME,
                UniformValue::Mat4Array(vec![Mat4::IDENTITY; MAX_CASCADES]),
            ),
            cameras: Vec::new(),
            cascade_bounds: Vec::new(),
            light_input: Mat4::IDENTITY,
            light_view: Mat4::IDENTITY,
            max_distance: -1.0,
            retain_light_position: false,
            dirty_reference: false,
            reference_points: Vec::new(),
            min_extent: min_extent.max(f32::EPSILON),
            updated_camera: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn cascade_count(&self) -> usize {
        self.cameras.len()
    }

    #[inline]
    #[must_use]
    pub fn shadow_map(&self) -> Option<&TextureRef> {
        self.shadow_map.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn matrices(&self) -> &Uniform {
        &self.matrices
    }

    #[inline]
    #[must_use]
    pub fn cameras(&self) -> &[SharedCamera] {
        &self.cameras
    }

    #[inline]
    #[must_use]
    pub fn light_view(&self) -> Mat4 {
        self.light_view
    }

    #[inline]
    #[must_use]
    pub fn max_distance(&self) -> f32 {
        self.max_distance
    }

    /// Light-space boxes the cascades were last fitted to.
    #[inline]
    #[must_use]
    pub fn cascade_bounds(&self) -> &[ShadowBound] {
        &self.cascade_bounds
    }

    /// Creates the shadow texture and one `ShadowCaster<i>` input stage per
    /// cascade.
    pub fn create_stages(
        &mut self,
        pipeline: &mut Pipeline,
        resolution: u32,
        cascade_count: usize,
        shaders: &StageShaders,
        caster_mask: u32,
    ) -> Result<()> {
        let count = cascade_count.min(MAX_CASCADES);
        self.cameras.clear();
        self.cascade_bounds.clear();
        if count == 0 {
            return Ok(());
        }

        let size = UVec2::splat(resolution.max(1));
        let shadow_map = pipeline.create_texture(
            StageTexture::new(format!("{}_ShadowMap", self.name), BufferFormat::RgbFloat16, size)
                .with_layers(count as u32),
        );
        let depth = pipeline.create_texture(StageTexture::new(
            format!("{}_ShadowDepth", self.name),
            BufferFormat::Depth32,
            size,
        ));

        let mut state = ShaderState::new();
        state.set_program(ShaderProgram::for_stage("ShadowCaster", shaders));
        let state = state.shared();

        for i in 0..count {
            let name = format!("ShadowCaster{i}");
            let mut camera = Camera::new(&name);
            camera.reference_frame = ReferenceFrame::Absolute;
            camera.clear = ClearSettings {
                color: Vec4::ONE,
                ..ClearSettings::default()
            };
            camera.raster = RasterState {
                cull_face: Some(wgpu::Face::Front),
                depth_bias_constant: 4,
                depth_bias_slope: 1.1,
            };
            camera.near_far_mode = NearFarMode::Off;
            camera.cull_mask = caster_mask;
            camera.render_order = RenderOrder::PreRender(pipeline.num_stages() as i32);
            camera.viewport = Some(Viewport::from_size(size));
            camera.content = CameraContent::Scene;
            camera.state = state.clone();
            camera.attachments = vec![
                Attachment::new(AttachmentPoint::Color(0), shadow_map.clone()).with_layer(i as u32),
                Attachment::new(AttachmentPoint::Depth, depth.clone()),
            ];
            let camera = camera.shared();

            let mut stage = Stage::new(&name, StageKind::Input, size, state.clone());
            stage.add_output("ShadowMap", &shadow_map);
            stage.camera = Some(camera.clone());
            stage.parent_module = Some(self.name.clone());
            pipeline.add_stage(stage)?;
            self.cameras.push(camera);
        }

        self.shadow_map = Some(shadow_map);
        log::info!("{}: created {count} shadow cascades at {resolution}px", self.name);
        Ok(())
    }

    /// Sets the light placement. Directions shorter than 0.1 are rejected.
    pub fn set_light_state(&mut self, position: Vec3, direction: Vec3, max_distance: f32) {
        if direction.length_squared() < 0.01 {
            log::debug!("{}: ignoring degenerate light direction {direction}", self.name);
            return;
        }
        let dir = direction.normalize();
        let mut up = if dir.dot(Vec3::Z).abs() > 0.9 { Vec3::Y } else { Vec3::Z };
        let side = up.cross(dir);
        up = dir.cross(side);

        let distance = if max_distance > 0.0 {
            max_distance
        } else {
            DEFAULT_LIGHT_DISTANCE
        };
        let view = Mat4::look_at_rh(position, position + dir * distance, up);
        if view != self.light_input {
            self.light_input = view;
            self.light_view = view;
            self.max_distance = max_distance;
            self.dirty_reference = true;
        }
    }

    /// Keeps the light position as given instead of re-centering on the
    /// reference points.
    pub fn set_retain_light_position(&mut self, retain: bool) {
        self.retain_light_position = retain;
    }

    pub fn add_reference_points(&mut self, points: &[Vec3], reset: bool) {
        if reset {
            self.reference_points.clear();
        }
        self.dirty_reference = true;
        self.reference_points.extend_from_slice(points);
    }

    /// Adds the eight corners of a box.
    pub fn add_reference_bound(&mut self, min: Vec3, max: Vec3, reset: bool) {
        let corners: [Vec3; 8] = std::array::from_fn(|i| {
            Vec3::new(
                if i & 1 == 0 { min.x } else { max.x },
                if i & 2 == 0 { min.y } else { max.y },
                if i & 4 == 0 { min.z } else { max.z },
            )
        });
        self.add_reference_points(&corners, reset);
    }

    pub fn clear_reference_points(&mut self) {
        self.reference_points.clear();
    }

    #[must_use]
    pub fn reference_points(&self) -> &[Vec3] {
        &self.reference_points
    }

    /// Update-phase entry: records the camera the cascades follow and replaces
    /// the reference points with `bounds`.
    pub fn update(&mut self, camera: &SharedCamera, bounds: &[(Vec3, Vec3)]) {
        for (i, (min, max)) in bounds.iter().enumerate() {
            self.add_reference_bound(*min, *max, i == 0);
        }
        self.updated_camera = Some(Arc::downgrade(camera));
    }

    /// The camera recorded by the last [`update`](Self::update), if alive.
    #[must_use]
    pub fn updated_camera(&self) -> Option<SharedCamera> {
        self.updated_camera.as_ref().and_then(Weak::upgrade)
    }

    /// Fits every cascade to the frustum of `view`/`projection`. Returns
    /// whether the matrices were rewritten.
    pub fn update_in_draw(&mut self, view: &Mat4, projection: &Mat4) -> bool {
        if self.cameras.is_empty() {
            return false;
        }
        let Some((near, mut far)) = extract_near_far(projection) else {
            return false;
        };
        if self.max_distance > 0.0 && near + self.max_distance < far {
            far = near + self.max_distance;
        }
        let shadow_distance = far - near;
        if shadow_distance.is_nan() || shadow_distance <= MIN_SHADOW_RANGE {
            log::debug!("{}: shadow range {shadow_distance} too short, skipped", self.name);
            return false;
        }

        if self.dirty_reference && !self.retain_light_position && !self.reference_points.is_empty() {
            self.recenter_light(shadow_distance);
        }

        let frustum = Frustum::new(view, projection, Some((near, far)));
        let bound = frustum
            .shadow_bound(&self.reference_points, &self.light_view)
            .clamped(self.min_extent);
        let depth = bound.max.z.abs().max(bound.min.z.abs());

        let view_inverse = view.inverse();
        let mut matrices = vec![Mat4::IDENTITY; MAX_CASCADES];
        let ranges = cascade_split_ranges(bound.min.x, bound.max.x, self.cameras.len());
        self.cascade_bounds.clear();
        for (i, (x0, x1)) in ranges.into_iter().enumerate() {
            let projection_i = Mat4::orthographic_rh(x0, x1, bound.min.y, bound.max.y, -depth, depth);
            matrices[i] = projection_i * self.light_view * view_inverse;

            let mut camera = self.cameras[i].write();
            camera.view_matrix = self.light_view;
            camera.projection_matrix = projection_i;
            self.cascade_bounds.push(ShadowBound {
                min: Vec3::new(x0, bound.min.y, bound.min.z),
                max: Vec3::new(x1, bound.max.y, bound.max.z),
            });
        }
        self.matrices.set(UniformValue::Mat4Array(matrices));
        true
    }

    fn recenter_light(&mut self, distance: f32) {
        let inverse = self.light_input.inverse();
        let dir = inverse.transform_vector3(Vec3::NEG_Z).normalize_or_zero();
        let up = inverse.transform_vector3(Vec3::Y).normalize_or_zero();

        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for p in &self.reference_points {
            min = min.min(*p);
            max = max.max(*p);
        }
        let center = (min + max) * 0.5;
        let eye = center - dir * distance;
        self.light_view = Mat4::look_at_rh(eye, center, up);
        self.dirty_reference = false;
    }

    /// World-space corners of cascade `index`, for debug display.
    #[must_use]
    pub fn cascade_corners(&self, index: usize) -> Option<[Vec3; 8]> {
        let camera = self.cameras.get(index)?.read();
        Some(Frustum::new(&camera.view_matrix, &camera.projection_matrix, None).corners)
    }

    /// Binds the shadow map at `start_unit` as `prefix` and adds the cascade
    /// matrices. Returns the next free unit.
    pub fn apply_texture_and_uniforms(&self, stage: &Stage, prefix: &str, start_unit: u32) -> u32 {
        let mut unit = start_unit;
        if let Some(map) = &self.shadow_map {
            stage.apply_texture(unit, prefix, map.clone());
            unit += 1;
        }
        stage.apply_uniform(self.matrices.clone());
        unit
    }
}

// ============================================================================
// Draw Hook
// ============================================================================

/// Runs [`ShadowModule::update_in_draw`] with the drawing camera's final
/// matrices.
#[derive(Debug)]
pub struct ShadowDrawHook {
    module: Weak<Mutex<ShadowModule>>,
}

impl ShadowDrawHook {
    #[must_use]
    pub fn new(module: &Arc<Mutex<ShadowModule>>) -> Self {
        Self {
            module: Arc::downgrade(module),
        }
    }
}

impl DrawHook for ShadowDrawHook {
    fn name(&self) -> &str {
        "ShadowDrawHook"
    }

    fn run(&mut self, info: &mut DrawInfo<'_>) {
        if let Some(module) = self.module.upgrade() {
            module
                .lock()
                .update_in_draw(&info.view_matrix, &info.projection_matrix);
        }
    }
}
