//! Wgpu Backend
//!
//! The production [`RenderBackend`]. Off-screen targets live in a slot map;
//! their textures are realized on first use and any pending texel data is
//! uploaded at the same time.
//!
//! One command encoder spans a frame:
//!
//! ```text
//!  begin_frame ─► [ begin_target ─► draw* ─► end_target ]* ─► submit
//! ```
//!
//! Every draw opens its own render pass on the bound target. The first pass
//! after `begin_target` carries the requested clears as load ops; if nothing
//! is drawn, `end_target` opens an empty pass so the clears still happen.
//!
//! # Screen-Quad Bindings
//!
//! | Group | Binding      | Resource                                  |
//! |-------|--------------|-------------------------------------------|
//! | 0     | 0            | uniform block (names sorted, 16-byte slots) |
//! | 1     | `2 × unit`   | texture bound to `unit`                   |
//! | 1     | `2 × unit + 1` | its sampler                             |
//!
//! A program without a vertex shader gets the built-in full-screen triangle,
//! which outputs `@location(0) uv`.

use std::borrow::Cow;

use glam::{Mat4, UVec2, Vec4};
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;
use wgpu::util::DeviceExt;

use super::backend::{RenderBackend, TargetDesc, TargetId};
use super::context::{CapabilityTier, GpuCapabilities, GraphicsContext};
use super::mipmap::MipmapGenerator;
use crate::errors::TargetError;
use crate::renderer::graph::format::AttachmentPoint;
use crate::renderer::graph::shader::{ShaderProgram, ShaderState};
use crate::renderer::graph::texture::{Attachment, GpuTexture, SamplerSettings, StageTexture};
use crate::scene::camera::{ClearMask, ClearSettings, RasterState, Viewport};

const FULLSCREEN_VS: &str = include_str!("shaders/fullscreen.wgsl");
const DEPTH_BLIT_WGSL: &str = include_str!("shaders/depth_blit.wgsl");

/// Smallest uniform buffer bound at group 0.
const MIN_UNIFORM_BLOCK: usize = 16;

// ============================================================================
// Targets
// ============================================================================

/// The host's default target, typically the current swapchain frame.
#[derive(Debug, Clone)]
pub struct DefaultTarget {
    pub color: wgpu::TextureView,
    pub color_format: wgpu::TextureFormat,
    pub depth: Option<(wgpu::TextureView, wgpu::TextureFormat)>,
    pub size: UVec2,
}

#[derive(Debug)]
struct GpuTarget {
    label: String,
    attachments: Vec<Attachment>,
}

/// Attachment views of the bound target, colors in attachment-point order.
#[derive(Clone)]
struct PassViews {
    colors: SmallVec<[(wgpu::TextureView, wgpu::TextureFormat); 4]>,
    depth: Option<(wgpu::TextureView, wgpu::TextureFormat)>,
    size: UVec2,
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    target: Option<TargetId>,
    viewport: Viewport,
    clear: ClearSettings,
    clear_pending: bool,
}

// ============================================================================
// Pipeline Cache Keys
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SampleKind {
    Filterable,
    Unfilterable,
    Depth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TextureSlot {
    unit: u32,
    kind: SampleKind,
    array: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QuadKey {
    program: String,
    colors: SmallVec<[wgpu::TextureFormat; 4]>,
    depth: Option<wgpu::TextureFormat>,
    slots: SmallVec<[TextureSlot; 8]>,
}

#[derive(Clone)]
struct QuadPipeline {
    pipeline: wgpu::RenderPipeline,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
}

// ============================================================================
// Backend
// ============================================================================

pub struct WgpuBackend {
    ctx: GraphicsContext,
    targets: SlotMap<TargetId, GpuTarget>,
    default_target: Option<DefaultTarget>,
    binding: Option<Binding>,
    encoder: Option<wgpu::CommandEncoder>,

    quad_pipelines: FxHashMap<QuadKey, QuadPipeline>,
    samplers: FxHashMap<(SamplerSettings, SampleKind), wgpu::Sampler>,
    mipmaps: MipmapGenerator,
    depth_blit_layout: wgpu::BindGroupLayout,
    depth_blit_shader: wgpu::ShaderModule,
    depth_blit_pipelines: FxHashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,

    projection: Mat4,
    model_view: Mat4,
    raster: RasterState,
    warned_no_default: bool,
}

impl WgpuBackend {
    #[must_use]
    pub fn new(ctx: GraphicsContext) -> Self {
        let device = &ctx.device;
        let mipmaps = MipmapGenerator::new(device);
        let depth_blit_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Depth Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(DEPTH_BLIT_WGSL)),
        });
        let depth_blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Depth Blit Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Depth,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });

        Self {
            ctx,
            targets: SlotMap::with_key(),
            default_target: None,
            binding: None,
            encoder: None,
            quad_pipelines: FxHashMap::default(),
            samplers: FxHashMap::default(),
            mipmaps,
            depth_blit_layout,
            depth_blit_shader,
            depth_blit_pipelines: FxHashMap::default(),
            projection: Mat4::IDENTITY,
            model_view: Mat4::IDENTITY,
            raster: RasterState::default(),
            warned_no_default: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn context(&self) -> &GraphicsContext {
        &self.ctx
    }

    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.ctx.capabilities
    }

    /// Installs the target drawn to when `begin_target(None, ..)` is called.
    pub fn set_default_target(&mut self, target: Option<DefaultTarget>) {
        self.default_target = target;
        self.warned_no_default = false;
    }

    /// Current projection and model-view, for host scene drawing.
    #[inline]
    #[must_use]
    pub fn transform(&self) -> (Mat4, Mat4) {
        (self.projection, self.model_view)
    }

    #[inline]
    #[must_use]
    pub fn raster_state(&self) -> RasterState {
        self.raster
    }

    /// Number of live off-screen targets.
    #[must_use]
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    // === Frame ===

    /// Starts the frame's command encoder. Work recorded before this call
    /// goes into an implicitly created encoder.
    pub fn begin_frame(&mut self) {
        if self.encoder.is_some() {
            log::debug!("begin_frame called twice, keeping the open encoder");
            return;
        }
        self.encoder = Some(Self::create_encoder(&self.ctx.device));
    }

    /// Finishes and submits the frame's commands.
    pub fn submit(&mut self) -> Option<wgpu::SubmissionIndex> {
        if self.binding.is_some() {
            log::warn!("Submitting with a target still bound");
            self.end_target();
        }
        let encoder = self.encoder.take()?;
        Some(self.ctx.queue.submit(std::iter::once(encoder.finish())))
    }

    fn create_encoder(device: &wgpu::Device) -> wgpu::CommandEncoder {
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Deferred Frame Encoder"),
        })
    }

    /// Opens a render pass on the bound target for host scene drawing.
    ///
    /// Pending clears are applied and the viewport is set to the bound one.
    pub fn begin_scene_pass(&mut self, label: &str) -> Option<wgpu::RenderPass<'_>> {
        let viewport = self.binding?.viewport;
        let size = self.bound_views()?.size;
        let mut pass = self.open_pass(label)?;
        if let Some((x, y, w, h)) = pass_rect(viewport, Vec4::new(0.0, 0.0, 1.0, 1.0), size) {
            pass.set_viewport(x, y, w, h, 0.0, 1.0);
        }
        Some(pass)
    }

    // === Textures ===

    /// Allocates `texture` on first use and uploads pending data.
    fn realize<'t>(ctx: &GraphicsContext, texture: &'t StageTexture) -> &'t GpuTexture {
        let tier = ctx.capabilities.tier;
        let gpu = texture.gpu_or_init(|t| create_gpu_texture(&ctx.device, t, tier));
        if let Some(data) = texture.take_pending() {
            upload(ctx, texture, gpu, &data);
        }
        gpu
    }

    fn views_for(
        ctx: &GraphicsContext,
        targets: &SlotMap<TargetId, GpuTarget>,
        default_target: Option<&DefaultTarget>,
        target: Option<TargetId>,
    ) -> Option<PassViews> {
        let Some(id) = target else {
            let default = default_target?;
            return Some(PassViews {
                colors: smallvec::smallvec![(default.color.clone(), default.color_format)],
                depth: default.depth.clone(),
                size: default.size,
            });
        };

        let target = targets.get(id)?;
        let tier = ctx.capabilities.tier;
        let mut colors: SmallVec<[(u8, wgpu::TextureView, wgpu::TextureFormat); 4]> = SmallVec::new();
        let mut depth = None;
        let mut size = UVec2::ONE;
        for attachment in &target.attachments {
            let gpu = Self::realize(ctx, &attachment.texture);
            let layer = (attachment.layer as usize).min(gpu.layer_views.len().saturating_sub(1));
            let view = gpu.layer_views.get(layer)?.clone();
            let format = attachment.texture.format().info(tier).texture_format;
            size = attachment.texture.size();
            match attachment.point {
                AttachmentPoint::Color(i) => colors.push((i, view, format)),
                AttachmentPoint::Depth | AttachmentPoint::DepthStencil => depth = Some((view, format)),
            }
        }
        colors.sort_by_key(|(i, _, _)| *i);
        Some(PassViews {
            colors: colors.into_iter().map(|(_, v, f)| (v, f)).collect(),
            depth,
            size,
        })
    }

    fn bound_views(&mut self) -> Option<PassViews> {
        let binding = self.binding?;
        let views = Self::views_for(&self.ctx, &self.targets, self.default_target.as_ref(), binding.target);
        if views.is_none() && binding.target.is_none() && !self.warned_no_default {
            log::warn!("No default target installed, default-target draws are skipped");
            self.warned_no_default = true;
        }
        views
    }

    fn sampler(&mut self, settings: SamplerSettings, kind: SampleKind) -> wgpu::Sampler {
        let device = &self.ctx.device;
        self.samplers
            .entry((settings, kind))
            .or_insert_with(|| create_sampler(device, settings, kind))
            .clone()
    }

    // === Passes ===

    /// Opens a pass on the bound target, consuming pending clears.
    fn open_pass(&mut self, label: &str) -> Option<wgpu::RenderPass<'_>> {
        let views = self.bound_views()?;
        let binding = self.binding.as_mut()?;
        let clear = binding.clear_pending.then_some(binding.clear);
        binding.clear_pending = false;

        let color_load = |clear: Option<ClearSettings>| match clear {
            Some(c) if c.mask.contains(ClearMask::COLOR) => wgpu::LoadOp::Clear(wgpu::Color {
                r: f64::from(c.color.x),
                g: f64::from(c.color.y),
                b: f64::from(c.color.z),
                a: f64::from(c.color.w),
            }),
            _ => wgpu::LoadOp::Load,
        };

        let color_attachments: SmallVec<[Option<wgpu::RenderPassColorAttachment<'_>>; 4]> = views
            .colors
            .iter()
            .map(|(view, _)| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load(clear),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })
            })
            .collect();

        let depth_stencil_attachment = views.depth.as_ref().map(|(view, format)| {
            let depth_ops = format.has_depth_aspect().then(|| wgpu::Operations {
                load: match clear {
                    Some(c) if c.mask.contains(ClearMask::DEPTH) => wgpu::LoadOp::Clear(c.depth),
                    _ => wgpu::LoadOp::Load,
                },
                store: wgpu::StoreOp::Store,
            });
            let stencil_ops = format.has_stencil_aspect().then(|| wgpu::Operations {
                load: match clear {
                    Some(c) if c.mask.contains(ClearMask::STENCIL) => wgpu::LoadOp::Clear(c.stencil),
                    _ => wgpu::LoadOp::Load,
                },
                store: wgpu::StoreOp::Store,
            });
            wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops,
                stencil_ops,
            }
        });

        let device = &self.ctx.device;
        let encoder = self.encoder.get_or_insert_with(|| Self::create_encoder(device));
        Some(encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        }))
    }

    // === Screen Quads ===

    fn quad_pipeline(&mut self, key: &QuadKey, program: &ShaderProgram) -> Option<QuadPipeline> {
        if let Some(cached) = self.quad_pipelines.get(key) {
            return Some(cached.clone());
        }
        let Some(fragment) = &program.fragment else {
            log::warn!("Program {} has no fragment shader", program.name);
            return None;
        };

        let device = &self.ctx.device;
        log::debug!("Creating screen-quad pipeline for {}", program.name);

        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: program.vertex.as_ref().map(|v| v.name.as_str()),
            source: wgpu::ShaderSource::Wgsl(
                program
                    .vertex
                    .as_ref()
                    .map_or(Cow::Borrowed(FULLSCREEN_VS), |v| Cow::Owned(v.source.to_string())),
            ),
        });
        let vertex_entry = program.vertex.as_ref().map_or("vs_main", |v| v.entry_point.as_str());
        let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&fragment.name),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(fragment.source.to_string())),
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Stage Uniforms Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let mut texture_entries = Vec::with_capacity(key.slots.len() * 2);
        for slot in &key.slots {
            let (sample_type, sampler_type) = match slot.kind {
                SampleKind::Filterable => (
                    wgpu::TextureSampleType::Float { filterable: true },
                    wgpu::SamplerBindingType::Filtering,
                ),
                SampleKind::Unfilterable => (
                    wgpu::TextureSampleType::Float { filterable: false },
                    wgpu::SamplerBindingType::NonFiltering,
                ),
                SampleKind::Depth => (wgpu::TextureSampleType::Depth, wgpu::SamplerBindingType::NonFiltering),
            };
            texture_entries.push(wgpu::BindGroupLayoutEntry {
                binding: slot.unit * 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type,
                    view_dimension: if slot.array {
                        wgpu::TextureViewDimension::D2Array
                    } else {
                        wgpu::TextureViewDimension::D2
                    },
                    multisampled: false,
                },
                count: None,
            });
            texture_entries.push(wgpu::BindGroupLayoutEntry {
                binding: slot.unit * 2 + 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(sampler_type),
                count: None,
            });
        }
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Stage Textures Layout"),
            entries: &texture_entries,
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} Layout", program.name)),
            bind_group_layouts: &[Some(&uniform_layout), Some(&texture_layout)],
            immediate_size: 0,
        });

        let targets: SmallVec<[Option<wgpu::ColorTargetState>; 4]> = key
            .colors
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: *format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&program.name),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some(vertex_entry),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some(&fragment.entry_point),
                targets: &targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: key.depth.map(|format| wgpu::DepthStencilState {
                format,
                depth_write_enabled: Some(false),
                depth_compare: Some(wgpu::CompareFunction::Always),
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        let cached = QuadPipeline {
            pipeline,
            uniform_layout,
            texture_layout,
        };
        self.quad_pipelines.insert(key.clone(), cached.clone());
        Some(cached)
    }

    // === Depth Blit ===

    fn depth_blit_pipeline(&mut self, format: wgpu::TextureFormat) -> wgpu::RenderPipeline {
        if let Some(pipeline) = self.depth_blit_pipelines.get(&format) {
            return pipeline.clone();
        }
        let device = &self.ctx.device;
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Depth Blit Pipeline Layout"),
            bind_group_layouts: &[Some(&self.depth_blit_layout)],
            immediate_size: 0,
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("Depth Blit Pipeline {format:?}")),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &self.depth_blit_shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.depth_blit_shader,
                entry_point: Some("fs_main"),
                targets: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format,
                depth_write_enabled: Some(true),
                depth_compare: Some(wgpu::CompareFunction::Always),
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });
        self.depth_blit_pipelines.insert(format, pipeline.clone());
        pipeline
    }

    // === Validation ===

    fn check_attachments(&self, label: &str, attachments: &[Attachment]) -> Result<(), TargetError> {
        if attachments.is_empty() {
            return Err(TargetError::MissingAttachment);
        }

        let mut points: SmallVec<[AttachmentPoint; 8]> = SmallVec::new();
        for attachment in attachments {
            let point = match attachment.point {
                AttachmentPoint::DepthStencil => AttachmentPoint::Depth,
                p => p,
            };
            if points.contains(&point) {
                return Err(TargetError::DuplicateAttachment(attachment.point.to_string()));
            }
            points.push(point);
        }

        let caps = &self.ctx.capabilities;
        let colors = attachments
            .iter()
            .filter(|a| matches!(a.point, AttachmentPoint::Color(_)))
            .count() as u32;
        if colors > caps.max_color_attachments {
            return Err(TargetError::TooManyColorAttachments {
                requested: colors,
                limit: caps.max_color_attachments,
            });
        }

        let size = attachments[0].texture.size();
        for attachment in attachments {
            let texture = &attachment.texture;
            if texture.size() != size {
                return Err(TargetError::SizeMismatch {
                    label: texture.label().to_string(),
                    width: texture.width(),
                    height: texture.height(),
                    target_width: size.x,
                    target_height: size.y,
                });
            }
            let limit = caps.max_texture_dimension_2d;
            if texture.width() > limit || texture.height() > limit {
                return Err(TargetError::ExceedsLimits {
                    width: texture.width(),
                    height: texture.height(),
                    limit,
                });
            }
            let format = texture.format().info(caps.tier).texture_format;
            let renderable = format
                .guaranteed_format_features(self.ctx.device.features())
                .allowed_usages
                .contains(wgpu::TextureUsages::RENDER_ATTACHMENT);
            if !renderable || attachment.layer >= texture.layers() {
                log::debug!("{label}: attachment {} is incomplete", texture.label());
                return Err(TargetError::IncompleteAttachment(texture.label().to_string()));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("targets", &self.targets.len())
            .field("quad_pipelines", &self.quad_pipelines.len())
            .field("bound", &self.binding.map(|b| b.target))
            .finish_non_exhaustive()
    }
}

impl RenderBackend for WgpuBackend {
    fn supports_render_targets(&self) -> bool {
        self.ctx.capabilities.offscreen_targets
    }

    fn create_target(&mut self, desc: &TargetDesc<'_>) -> Result<TargetId, TargetError> {
        self.check_attachments(desc.label, desc.attachments)?;
        for attachment in desc.attachments {
            Self::realize(&self.ctx, &attachment.texture);
        }
        let id = self.targets.insert(GpuTarget {
            label: desc.label.to_string(),
            attachments: desc.attachments.to_vec(),
        });
        log::debug!(
            "Created target {} ({}x{}, {} attachments)",
            desc.label,
            desc.size.x,
            desc.size.y,
            desc.attachments.len()
        );
        Ok(id)
    }

    fn validate_target(&self, target: TargetId) -> Result<(), TargetError> {
        let target = self.targets.get(target).ok_or(TargetError::UnknownTarget)?;
        self.check_attachments(&target.label, &target.attachments)
    }

    fn destroy_target(&mut self, target: TargetId) {
        if let Some(removed) = self.targets.remove(target) {
            log::debug!("Destroyed target {}", removed.label);
        }
    }

    fn begin_target(&mut self, target: Option<TargetId>, viewport: Viewport, clear: &ClearSettings) {
        if self.binding.is_some() {
            self.end_target();
        }
        self.binding = Some(Binding {
            target,
            viewport,
            clear: *clear,
            clear_pending: !clear.mask.is_empty(),
        });
    }

    fn set_transform(&mut self, projection: Mat4, model_view: Mat4) {
        self.projection = projection;
        self.model_view = model_view;
    }

    fn set_raster_state(&mut self, raster: &RasterState) {
        self.raster = *raster;
    }

    fn draw_screen_quad(&mut self, label: &str, rect: Vec4, state: &ShaderState) {
        let Some(program) = state.program() else {
            log::warn!("{label}: no program, quad skipped");
            return;
        };
        let Some(binding) = self.binding else {
            log::warn!("{label}: no target bound, quad skipped");
            return;
        };
        let Some(views) = self.bound_views() else {
            return;
        };
        let Some((x, y, w, h)) = pass_rect(binding.viewport, rect, views.size) else {
            return;
        };

        let tier = self.ctx.capabilities.tier;
        let mut slots: SmallVec<[TextureSlot; 8]> = SmallVec::new();
        let mut resources: Vec<(u32, wgpu::TextureView, wgpu::Sampler)> = Vec::new();
        for (unit, bound) in state.textures() {
            let texture = &bound.texture;
            let gpu = Self::realize(&self.ctx, texture);
            let kind = sample_kind(texture, tier);
            let view = gpu.view.clone();
            let sampler = self.sampler(texture.sampler(), kind);
            slots.push(TextureSlot {
                unit,
                kind,
                array: texture.layers() > 1,
            });
            resources.push((unit, view, sampler));
        }

        let key = QuadKey {
            program: program.name.clone(),
            colors: views.colors.iter().map(|(_, f)| *f).collect(),
            depth: views.depth.as_ref().map(|(_, f)| *f),
            slots,
        };
        let Some(cached) = self.quad_pipeline(&key, program) else {
            return;
        };

        let device = &self.ctx.device;
        let mut block = state.uniform_block();
        if block.len() < MIN_UNIFORM_BLOCK {
            block.resize(MIN_UNIFORM_BLOCK, 0);
        }
        let uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: &block,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Stage Uniforms"),
            layout: &cached.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniforms.as_entire_binding(),
            }],
        });

        let mut entries = Vec::with_capacity(resources.len() * 2);
        for (unit, view, sampler) in &resources {
            entries.push(wgpu::BindGroupEntry {
                binding: unit * 2,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: unit * 2 + 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        let texture_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Stage Textures"),
            layout: &cached.texture_layout,
            entries: &entries,
        });

        let Some(mut pass) = self.open_pass(label) else {
            return;
        };
        pass.set_viewport(x, y, w, h, 0.0, 1.0);
        pass.set_pipeline(&cached.pipeline);
        pass.set_bind_group(0, &uniform_group, &[]);
        pass.set_bind_group(1, &texture_group, &[]);
        pass.draw(0..3, 0..1);
    }

    fn end_target(&mut self) {
        if self.binding.is_some_and(|b| b.clear_pending) {
            // Nothing was drawn; an empty pass applies the clears.
            drop(self.open_pass("Clear Pass"));
        }
        self.binding = None;
    }

    fn generate_mipmaps(&mut self, texture: &StageTexture) {
        if texture.mip_levels() < 2 {
            return;
        }
        let Some(gpu) = texture.gpu() else {
            return;
        };
        let info = texture.format().info(self.ctx.capabilities.tier);
        if !info.filterable || texture.format().is_depth() {
            log::debug!("{}: format {} cannot be mipmapped", texture.label(), texture.format());
            return;
        }
        let device = &self.ctx.device;
        let encoder = self.encoder.get_or_insert_with(|| Self::create_encoder(device));
        self.mipmaps.generate(device, encoder, &gpu.texture);
    }

    fn blit_depth(&mut self, source: &StageTexture, destination: Viewport) {
        if !source.format().is_depth() {
            log::warn!("{}: depth blit source is not a depth buffer", source.label());
            return;
        }
        let Some(default) = self.default_target.clone() else {
            log::debug!("No default target, depth blit skipped");
            return;
        };
        let Some((depth_view, depth_format)) = default.depth else {
            log::debug!("Default target has no depth buffer, depth blit skipped");
            return;
        };
        let Some((x, y, w, h)) = pass_rect(destination, Vec4::new(0.0, 0.0, 1.0, 1.0), default.size) else {
            return;
        };

        let pipeline = self.depth_blit_pipeline(depth_format);
        let gpu = Self::realize(&self.ctx, source);
        let device = &self.ctx.device;
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Depth Blit BG"),
            layout: &self.depth_blit_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&gpu.view),
            }],
        });

        let encoder = self.encoder.get_or_insert_with(|| Self::create_encoder(device));
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Depth Blit Pass"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: depth_format.has_stencil_aspect().then_some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        pass.set_viewport(x, y, w, h, 0.0, 1.0);
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Converts a bottom-left-origin viewport and normalized rect into a
/// top-left-origin pixel rectangle clipped to `target`.
fn pass_rect(viewport: Viewport, rect: Vec4, target: UVec2) -> Option<(f32, f32, f32, f32)> {
    let vp_w = viewport.width as f32;
    let vp_h = viewport.height as f32;
    let left = viewport.x as f32 + rect.x * vp_w;
    let bottom = viewport.y as f32 + rect.y * vp_h;
    let width = rect.z * vp_w;
    let height = rect.w * vp_h;
    let top = target.y as f32 - (bottom + height);

    let x0 = left.max(0.0);
    let y0 = top.max(0.0);
    let x1 = (left + width).min(target.x as f32);
    let y1 = (top + height).min(target.y as f32);
    (x1 > x0 && y1 > y0).then(|| (x0, y0, x1 - x0, y1 - y0))
}

fn sample_kind(texture: &StageTexture, tier: CapabilityTier) -> SampleKind {
    if texture.format().is_depth() {
        SampleKind::Depth
    } else if texture.format().info(tier).filterable {
        SampleKind::Filterable
    } else {
        SampleKind::Unfilterable
    }
}

fn create_sampler(device: &wgpu::Device, settings: SamplerSettings, kind: SampleKind) -> wgpu::Sampler {
    let mut address_mode = settings.address_mode;
    let mut border_color = settings.border_color;
    if address_mode == wgpu::AddressMode::ClampToBorder
        && !device.features().contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER)
    {
        log::debug!("Clamp-to-border unsupported, falling back to clamp-to-edge");
        address_mode = wgpu::AddressMode::ClampToEdge;
        border_color = None;
    }
    let filter = match kind {
        SampleKind::Filterable => settings.filter,
        SampleKind::Unfilterable | SampleKind::Depth => wgpu::FilterMode::Nearest,
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Stage Sampler"),
        address_mode_u: address_mode,
        address_mode_v: address_mode,
        address_mode_w: address_mode,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: match filter {
            wgpu::FilterMode::Linear => wgpu::MipmapFilterMode::Linear,
            wgpu::FilterMode::Nearest => wgpu::MipmapFilterMode::Nearest,
        },
        border_color,
        ..Default::default()
    })
}

fn create_gpu_texture(device: &wgpu::Device, texture: &StageTexture, tier: CapabilityTier) -> GpuTexture {
    let format = texture.format().info(tier).texture_format;
    let is_depth = texture.format().is_depth();
    let usage = if is_depth {
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
    } else {
        wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC
    };

    let raw = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(texture.label()),
        size: wgpu::Extent3d {
            width: texture.width(),
            height: texture.height(),
            depth_or_array_layers: texture.layers(),
        },
        mip_level_count: texture.mip_levels(),
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    });

    let view = raw.create_view(&wgpu::TextureViewDescriptor {
        label: Some(texture.label()),
        dimension: Some(if texture.layers() > 1 {
            wgpu::TextureViewDimension::D2Array
        } else {
            wgpu::TextureViewDimension::D2
        }),
        aspect: if is_depth {
            wgpu::TextureAspect::DepthOnly
        } else {
            wgpu::TextureAspect::All
        },
        ..Default::default()
    });

    let layer_views = (0..texture.layers())
        .map(|layer| {
            raw.create_view(&wgpu::TextureViewDescriptor {
                label: Some(texture.label()),
                dimension: Some(wgpu::TextureViewDimension::D2),
                base_mip_level: 0,
                mip_level_count: Some(1),
                base_array_layer: layer,
                array_layer_count: Some(1),
                usage: Some(wgpu::TextureUsages::RENDER_ATTACHMENT),
                ..Default::default()
            })
        })
        .collect();

    GpuTexture {
        texture: raw,
        view,
        layer_views,
    }
}

/// Writes `data` into mip 0 of every layer.
///
/// 32-bit float data aimed at a 16-bit float texture (the `Compat` fallback)
/// is narrowed on the way.
fn upload(ctx: &GraphicsContext, texture: &StageTexture, gpu: &GpuTexture, data: &[u8]) {
    if texture.format().is_depth() {
        log::warn!("{}: depth textures take no texel data", texture.label());
        return;
    }
    let bytes_per_texel = texture.format().bytes_per_texel(ctx.capabilities.tier);
    let expected = (bytes_per_texel * texture.width() * texture.height() * texture.layers()) as usize;

    let narrowed;
    let bytes = if data.len() == expected {
        data
    } else if data.len() == expected * 2 && data.len() % 4 == 0 {
        narrowed = narrow_to_f16(data);
        &narrowed
    } else {
        log::warn!(
            "{}: texel data is {} bytes, expected {expected}; upload skipped",
            texture.label(),
            data.len()
        );
        return;
    };

    ctx.queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &gpu.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytes,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(bytes_per_texel * texture.width()),
            rows_per_image: Some(texture.height()),
        },
        wgpu::Extent3d {
            width: texture.width(),
            height: texture.height(),
            depth_or_array_layers: texture.layers(),
        },
    );
}

/// Little-endian `f32` texels to little-endian `f16`.
fn narrow_to_f16(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(4)
        .flat_map(|c| half::f16::from_f32(f32::from_le_bytes([c[0], c[1], c[2], c[3]])).to_le_bytes())
        .collect()
}
