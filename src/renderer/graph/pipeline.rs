//! Pipeline
//!
//! [`Pipeline`] owns the ordered stage list of a deferred renderer, the
//! textures the stages write, the deferred chain, the shared shader parameters
//! and the module registry.
//!
//! # Building
//!
//! ```text
//!  start_stages(w, h, caps)
//!      │
//!      ├─ add_input_stage("GBuffer", mask, …)      camera, live scene
//!      ├─ add_deferred_stage("Lighting", 1.0, …)   runner in the chain
//!      ├─ add_work_stage("Blur", 0.5, …)           camera, screen quad
//!      └─ add_display_stage("Final", …)            post-render quad
//!      │
//!      ▼
//!  apply_stages_to_view(view, forward_mask)  ──►  slaves + DefaultForward
//! ```
//!
//! Insertion order is the only ordering: a stage can only read buffers of
//! stages added before it. Factories return a [`StageHandle`] used for wiring
//! with [`apply_buffer`](Pipeline::apply_buffer).
//!
//! # Sizing
//!
//! | Stage kind         | `scale == 1`     | other scales                                |
//! |--------------------|------------------|---------------------------------------------|
//! | input, display     | base resolution  | n/a                                         |
//! | work, deferred     | base resolution  | `max(base, min_resolution) × scale`, ≥ 1×1  |
//!
//! # Shared Parameters
//!
//! Every factory-built stage receives `NearFarPlanes` (the shared depth range)
//! and `InvScreenResolution` (`1 / base size`).

use std::sync::Arc;

use glam::{UVec2, Vec2, Vec3, Vec4};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::errors::{PipelineError, Result};
use crate::renderer::core::context::{CapabilityTier, GpuCapabilities};
use crate::renderer::graph::callback::DeferredCallback;
use crate::renderer::graph::format::{BufferFormat, assign_attachment_points};
use crate::renderer::graph::near_far::{NearFarClamp, NearFarTracker};
use crate::renderer::graph::runner::Runner;
use crate::renderer::graph::shader::{ShaderProgram, ShaderState, StageShaders, Uniform, UniformValue};
use crate::renderer::graph::stage::{Stage, StageHandle, StageKind};
use crate::renderer::graph::texture::{Attachment, StageTexture, TextureRef};
use crate::renderer::modules::light::LightModule;
use crate::renderer::modules::shadow::ShadowModule;
use crate::renderer::modules::user_input::UserInputModule;
use crate::renderer::settings::PipelineSettings;
use crate::scene::camera::{
    Camera, CameraContent, ClearMask, ClearSettings, DrawPhase, NearFarMode, ReferenceFrame, RenderOrder,
    SharedCamera, SharedHook, Viewport,
};
use crate::scene::frame::FrameContext;
use crate::scene::view::View;

/// Name of the forward camera created by [`Pipeline::apply_stages_to_view`].
pub const FORWARD_CAMERA_NAME: &str = "DefaultForward";

/// Name of the inverse resolution uniform.
pub const INV_RESOLUTION_NAME: &str = "InvScreenResolution";

// ============================================================================
// Buffer Specs & Modules
// ============================================================================

/// One output buffer requested from a stage factory.
#[derive(Debug, Clone)]
pub struct BufferSpec {
    pub name: String,
    pub format: BufferFormat,
    /// Draw into an existing texture instead of allocating one.
    pub shared: Option<TextureRef>,
    /// Allocate a mip chain and regenerate it after each pass.
    pub mipmapped: bool,
}

impl BufferSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, format: BufferFormat) -> Self {
        Self {
            name: name.into(),
            format,
            shared: None,
            mipmapped: false,
        }
    }

    #[must_use]
    pub fn shared(name: impl Into<String>, texture: TextureRef) -> Self {
        let format = texture.format();
        Self {
            name: name.into(),
            format,
            shared: Some(texture),
            mipmapped: false,
        }
    }

    #[must_use]
    pub fn with_mipmaps(mut self) -> Self {
        self.mipmapped = true;
        self
    }
}

/// The modules a pipeline can host.
#[derive(Debug, Clone)]
pub enum PipelineModule {
    Shadow(Arc<Mutex<ShadowModule>>),
    Light(Arc<Mutex<LightModule>>),
    UserInput(Arc<Mutex<UserInputModule>>),
}

impl PipelineModule {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Shadow(_) => "shadow",
            Self::Light(_) => "light",
            Self::UserInput(_) => "user_input",
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug)]
pub struct Pipeline {
    settings: PipelineSettings,
    capabilities: Option<GpuCapabilities>,
    base_size: UVec2,

    stages: SlotMap<StageHandle, Stage>,
    order: Vec<StageHandle>,
    textures: Vec<TextureRef>,
    modules: FxHashMap<String, PipelineModule>,

    near_far: NearFarTracker,
    inv_resolution: Uniform,
    deferred: Arc<Mutex<DeferredCallback>>,
    forward_camera: Option<SharedCamera>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineSettings::default())
    }
}

impl Pipeline {
    #[must_use]
    pub fn new(settings: PipelineSettings) -> Self {
        let base_size = UVec2::new(settings.width.max(1), settings.height.max(1));
        let default_blit = UVec2::from_array(settings.default_blit_size).max(UVec2::ONE);
        Self {
            settings,
            capabilities: None,
            base_size,
            stages: SlotMap::with_key(),
            order: Vec::new(),
            textures: Vec::new(),
            modules: FxHashMap::default(),
            near_far: NearFarTracker::new(),
            inv_resolution: Uniform::new(
                INV_RESOLUTION_NAME,
                UniformValue::Vec2(Vec2::ONE / base_size.as_vec2()),
            ),
            deferred: Arc::new(Mutex::new(
                DeferredCallback::new(true).with_default_blit_size(default_blit),
            )),
            forward_camera: None,
        }
    }

    // === Accessors ===

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> Option<&GpuCapabilities> {
        self.capabilities.as_ref()
    }

    /// Tier used to resolve buffer formats.
    #[must_use]
    pub fn tier(&self) -> CapabilityTier {
        self.capabilities.as_ref().map(|c| c.tier).unwrap_or_default()
    }

    #[inline]
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.capabilities.is_some()
    }

    #[inline]
    #[must_use]
    pub fn base_size(&self) -> UVec2 {
        self.base_size
    }

    #[inline]
    #[must_use]
    pub fn near_far(&self) -> &NearFarTracker {
        &self.near_far
    }

    #[inline]
    #[must_use]
    pub fn inv_resolution(&self) -> &Uniform {
        &self.inv_resolution
    }

    #[inline]
    #[must_use]
    pub fn deferred_callback(&self) -> &Arc<Mutex<DeferredCallback>> {
        &self.deferred
    }

    #[inline]
    #[must_use]
    pub fn forward_camera(&self) -> Option<&SharedCamera> {
        self.forward_camera.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    // === Construction ===

    /// Sets the base resolution and validates the device capabilities.
    ///
    /// Must be called before any stage factory.
    pub fn start_stages(&mut self, width: u32, height: u32, capabilities: &GpuCapabilities) -> Result<()> {
        capabilities.validate(self.settings.min_color_attachments)?;
        self.base_size = UVec2::new(width.max(1), height.max(1));
        self.inv_resolution
            .set(UniformValue::Vec2(Vec2::ONE / self.base_size.as_vec2()));
        self.capabilities = Some(capabilities.clone());
        log::info!(
            "Pipeline started at {}x{} ({:?} tier, {} color attachments)",
            self.base_size.x,
            self.base_size.y,
            capabilities.tier,
            capabilities.max_color_attachments
        );
        Ok(())
    }

    fn ensure_started(&self, stage: &str) -> Result<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(PipelineError::StagesNotStarted(stage.to_string()))
        }
    }

    /// Size of a work/deferred stage at `scale`.
    #[must_use]
    pub fn stage_size(&self, scale: f32) -> UVec2 {
        if (scale - 1.0).abs() <= f32::EPSILON {
            return self.base_size;
        }
        let floor = UVec2::from_array(self.settings.min_resolution);
        let scaled = self.base_size.max(floor).as_vec2() * scale;
        scaled.round().as_uvec2().max(UVec2::ONE)
    }

    /// Registers a texture owned by this pipeline.
    pub fn create_texture(&mut self, texture: StageTexture) -> TextureRef {
        let texture = Arc::new(texture);
        self.textures.push(texture.clone());
        texture
    }

    fn stage_state(&self, name: &str, shaders: &StageShaders) -> ShaderState {
        let mut state = ShaderState::new();
        if !shaders.is_empty() {
            state.set_program(ShaderProgram::for_stage(name, shaders));
        }
        state.add_uniform(self.near_far.uniform().clone());
        state.add_uniform(self.inv_resolution.clone());
        state
    }

    /// Allocates (or adopts) the textures of `buffers`, registers them as
    /// outputs of `stage` and returns the attachments to render into.
    fn allocate_buffers(&mut self, stage: &mut Stage, size: UVec2, buffers: &[BufferSpec]) -> Vec<Attachment> {
        let formats: Vec<BufferFormat> = buffers.iter().map(|b| b.format).collect();
        let points = assign_attachment_points(&formats);
        let mut attachments = Vec::with_capacity(buffers.len());

        for (spec, point) in buffers.iter().zip(points) {
            let texture = match &spec.shared {
                Some(shared) => shared.clone(),
                None => {
                    let mut texture = StageTexture::new(format!("{}_{}", stage.name(), spec.name), spec.format, size);
                    if spec.mipmapped {
                        texture = texture.with_mipmaps();
                    }
                    self.create_texture(texture)
                }
            };
            if let Some(point) = point {
                let mut attachment = Attachment::new(point, texture.clone());
                attachment.generate_mipmaps = spec.mipmapped;
                attachments.push(attachment);
            }
            stage.add_output(spec.name.clone(), &texture);
        }
        attachments
    }

    fn next_order(&self) -> i32 {
        i32::try_from(self.order.len()).unwrap_or(i32::MAX)
    }

    fn clear_settings(&self) -> ClearSettings {
        ClearSettings {
            color: Vec4::from_array(self.settings.clear_color),
            depth: self.settings.clear_depth,
            ..ClearSettings::default()
        }
    }

    /// A stage rendering live scene content filtered by `visibility_mask`.
    pub fn add_input_stage(
        &mut self,
        name: &str,
        visibility_mask: u32,
        samples: u32,
        shaders: &StageShaders,
        buffers: &[BufferSpec],
    ) -> Result<StageHandle> {
        self.ensure_started(name)?;
        let size = self.base_size;
        let state = self.stage_state(name, shaders).shared();
        let mut stage = Stage::new(name, StageKind::Input, size, state.clone());
        let attachments = self.allocate_buffers(&mut stage, size, buffers);

        let mut camera = Camera::new(name);
        camera.cull_mask = visibility_mask;
        camera.samples = samples;
        camera.render_order = RenderOrder::PreRender(self.next_order());
        camera.near_far_mode = NearFarMode::BoundingVolumes;
        camera.clamp = Some(NearFarClamp::new(self.near_far.clone()));
        camera.viewport = Some(Viewport::from_size(size));
        camera.clear = self.clear_settings();
        camera.content = CameraContent::Scene;
        camera.state = state;
        camera.attachments = attachments;
        stage.camera = Some(camera.shared());

        Ok(self.push_stage(stage))
    }

    /// A stage drawing a screen quad through its own camera.
    pub fn add_work_stage(
        &mut self,
        name: &str,
        size_scale: f32,
        shaders: &StageShaders,
        buffers: &[BufferSpec],
    ) -> Result<StageHandle> {
        self.ensure_started(name)?;
        let size = self.stage_size(size_scale);
        let state = self.stage_state(name, shaders).shared();
        let mut stage = Stage::new(name, StageKind::Work, size, state.clone());
        let attachments = self.allocate_buffers(&mut stage, size, buffers);

        let mut camera = Camera::new(name);
        camera.reference_frame = ReferenceFrame::Absolute;
        camera.render_order = RenderOrder::PreRender(self.next_order());
        camera.viewport = Some(Viewport::from_size(size));
        camera.clear = self.clear_settings();
        camera.content = CameraContent::ScreenQuad(Vec4::new(0.0, 0.0, 1.0, 1.0));
        camera.state = state;
        camera.attachments = attachments;
        stage.camera = Some(camera.shared());

        Ok(self.push_stage(stage))
    }

    /// A screen-quad stage executed by the deferred chain.
    pub fn add_deferred_stage(
        &mut self,
        name: &str,
        size_scale: f32,
        run_once: bool,
        shaders: &StageShaders,
        buffers: &[BufferSpec],
    ) -> Result<StageHandle> {
        self.ensure_started(name)?;
        let size = self.stage_size(size_scale);
        let state = self.stage_state(name, shaders).shared();
        let mut stage = Stage::new(name, StageKind::Deferred, size, state.clone());
        let attachments = self.allocate_buffers(&mut stage, size, buffers);

        let mut runner = Runner::screen_quad(name, state).with_run_once(run_once);
        runner.clear = self.clear_settings();
        runner.attachments = attachments;
        let runner = runner.shared();
        self.deferred.lock().add_runner(runner.clone());
        stage.runner = Some(runner);

        Ok(self.push_stage(stage))
    }

    /// The final screen-quad stage covering `rect` (normalized `x, y, w, h`)
    /// of the host target.
    pub fn add_display_stage(&mut self, name: &str, shaders: &StageShaders, rect: Vec4) -> Result<StageHandle> {
        self.ensure_started(name)?;
        let size = self.base_size;
        let state = self.stage_state(name, shaders).shared();
        let mut stage = Stage::new(name, StageKind::Display, size, state.clone());

        let mut camera = Camera::new(name);
        camera.reference_frame = ReferenceFrame::Absolute;
        camera.render_order = RenderOrder::PostRender(self.next_order());
        camera.viewport = Some(Viewport::from_size(size));
        camera.content = CameraContent::ScreenQuad(rect);
        camera.state = state;
        stage.camera = Some(camera.shared());

        Ok(self.push_stage(stage))
    }

    /// Appends a stage built elsewhere (modules).
    pub fn add_stage(&mut self, stage: Stage) -> Result<StageHandle> {
        self.ensure_started(stage.name())?;
        if let Some(runner) = &stage.runner {
            self.deferred.lock().add_runner(runner.clone());
        }
        Ok(self.push_stage(stage))
    }

    fn push_stage(&mut self, stage: Stage) -> StageHandle {
        log::debug!("Stage {} ({:?}) added", stage.name(), stage.kind());
        let handle = self.stages.insert(stage);
        self.order.push(handle);
        handle
    }

    // === Lookup ===

    /// Handle of the first stage named `name`.
    #[must_use]
    pub fn get_stage(&self, name: &str) -> Option<StageHandle> {
        self.order
            .iter()
            .copied()
            .find(|h| self.stages.get(*h).is_some_and(|s| s.name() == name))
    }

    #[must_use]
    pub fn stage(&self, handle: StageHandle) -> Option<&Stage> {
        self.stages.get(handle)
    }

    #[must_use]
    pub fn stage_mut(&mut self, handle: StageHandle) -> Option<&mut Stage> {
        self.stages.get_mut(handle)
    }

    /// Stages in insertion order.
    pub fn stages(&self) -> impl Iterator<Item = (StageHandle, &Stage)> {
        self.order
            .iter()
            .filter_map(|h| self.stages.get(*h).map(|s| (*h, s)))
    }

    #[inline]
    #[must_use]
    pub fn num_stages(&self) -> usize {
        self.order.len()
    }

    /// Removes a stage, detaches its runner from the chain and releases the
    /// owned textures no remaining stage writes.
    pub fn remove_stage(&mut self, handle: StageHandle) -> Option<Stage> {
        let stage = self.stages.remove(handle)?;
        self.order.retain(|h| *h != handle);
        if let Some(runner) = &stage.runner {
            self.deferred.lock().remove_runner(runner);
        }
        if let Some(texture) = stage.depth_output() {
            self.deferred.lock().require_depth_blit(texture, false);
        }

        let released: Vec<TextureRef> = stage
            .output_textures()
            .filter(|texture| {
                !self
                    .stages
                    .values()
                    .any(|other| other.output_textures().any(|t| Arc::ptr_eq(&t, texture)))
            })
            .collect();
        if !released.is_empty() {
            self.textures
                .retain(|owned| !released.iter().any(|t| Arc::ptr_eq(t, owned)));
            log::debug!("Stage {} removed, released {} textures", stage.name(), released.len());
        }
        Some(stage)
    }

    /// Drops every stage, runner, depth blit and owned texture.
    pub fn clear_stages(&mut self) {
        self.stages.clear();
        self.order.clear();
        self.textures.clear();
        let mut deferred = self.deferred.lock();
        deferred.clear_runners();
        for texture in deferred.depth_blits().to_vec() {
            deferred.require_depth_blit(texture, false);
        }
    }

    // === Wiring ===

    /// Binds `buffer` of `src` to `unit` of `dst`, sampled as `buffer`.
    pub fn apply_buffer(&self, dst: StageHandle, src: StageHandle, buffer: &str, unit: u32) -> bool {
        self.apply_buffer_as(dst, src, buffer, buffer, unit)
    }

    /// Binds `buffer` of `src` to `unit` of `dst` under `sampler_name`.
    pub fn apply_buffer_as(
        &self,
        dst: StageHandle,
        src: StageHandle,
        buffer: &str,
        sampler_name: &str,
        unit: u32,
    ) -> bool {
        match (self.stages.get(dst), self.stages.get(src)) {
            (Some(dst), Some(src)) => dst.apply_buffer_from(src, buffer, sampler_name, unit),
            _ => {
                log::warn!("apply_buffer({buffer}): stage handle is stale");
                false
            }
        }
    }

    /// (Un)registers the depth output of `stage` for blitting into the
    /// forward pass.
    pub fn require_depth_blit(&self, stage: StageHandle, add: bool) -> bool {
        let Some(stage) = self.stages.get(stage) else {
            log::warn!("require_depth_blit: stage handle is stale");
            return false;
        };
        match stage.depth_output() {
            Some(texture) => {
                self.deferred.lock().require_depth_blit(texture, add);
                true
            }
            None => {
                log::warn!("Stage {} has no depth buffer to blit", stage.name());
                false
            }
        }
    }

    // === Modules ===

    pub fn add_module(&mut self, name: impl Into<String>, module: PipelineModule) {
        let name = name.into();
        if self.modules.insert(name.clone(), module).is_some() {
            log::warn!("Module {name} replaced");
        }
    }

    #[must_use]
    pub fn get_module(&self, name: &str) -> Option<&PipelineModule> {
        self.modules.get(name)
    }

    pub fn remove_module(&mut self, name: &str) -> Option<PipelineModule> {
        self.modules.remove(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = (&str, &PipelineModule)> {
        self.modules.iter().map(|(n, m)| (n.as_str(), m))
    }

    #[must_use]
    pub fn shadow_module(&self, name: &str) -> Option<Arc<Mutex<ShadowModule>>> {
        match self.modules.get(name)? {
            PipelineModule::Shadow(m) => Some(m.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn light_module(&self, name: &str) -> Option<Arc<Mutex<LightModule>>> {
        match self.modules.get(name)? {
            PipelineModule::Light(m) => Some(m.clone()),
            _ => None,
        }
    }

    /// Update-phase work of every module: shadow modules follow the forward
    /// camera with `reference_bounds`, light modules pack the registry.
    pub fn update(&self, ctx: &mut FrameContext, reference_bounds: &[(Vec3, Vec3)]) {
        for module in self.modules.values() {
            match module {
                PipelineModule::Shadow(shadow) => {
                    if let Some(camera) = &self.forward_camera {
                        shadow.lock().update(camera, reference_bounds);
                    }
                }
                PipelineModule::Light(light) => {
                    light.lock().update(ctx, self);
                }
                PipelineModule::UserInput(_) => {}
            }
        }
    }

    // === View ===

    /// Hands the stages to `view` and creates the `DefaultForward` camera.
    ///
    /// Every non-deferred stage with a camera becomes a slave (input stages
    /// render the main scene). The forward camera copies the main camera,
    /// renders `forward_mask` content, runs the deferred chain in its `Pre`
    /// slot and keeps the stages' output (no clears) when stages exist.
    pub fn apply_stages_to_view(&mut self, view: &mut View, forward_mask: u32) -> SharedCamera {
        for (_, stage) in self.stages() {
            if stage.is_deferred() {
                continue;
            }
            if let Some(camera) = &stage.camera {
                view.add_slave(camera.clone(), stage.is_input());
            }
        }

        let mut forward = Camera::new(FORWARD_CAMERA_NAME);
        if let Some(main) = &view.main_camera {
            let main = main.read();
            forward.view_matrix = main.view_matrix;
            forward.projection_matrix = main.projection_matrix;
            forward.clear = main.clear;
            forward.samples = main.samples;
        }
        forward.near_far_mode = NearFarMode::BoundingVolumes;
        forward.cull_mask = forward_mask;
        forward.clamp = Some(NearFarClamp::new(self.near_far.clone()));
        forward.viewport = Some(Viewport::from_size(self.base_size));
        forward.render_order = RenderOrder::Nested;
        let hook: SharedHook = self.deferred.clone();
        forward.add_hook(DrawPhase::Pre, hook);
        if !self.order.is_empty() {
            forward.clear.mask = ClearMask::empty();
        }

        let forward = forward.shared();
        view.add_slave(forward.clone(), true);
        self.forward_camera = Some(forward.clone());
        log::info!("Applied {} stages to view", self.order.len());
        forward
    }
}
