//! Stage Textures
//!
//! CPU-side descriptions of the textures stages render into and read from.
//!
//! A [`StageTexture`] is created by the pipeline (or a module) with a fixed
//! size and [`BufferFormat`]; its GPU allocation is realized lazily by the
//! render backend the first time it is attached or sampled. Ownership follows
//! the stage graph:
//!
//! - the [`Pipeline`] and runners hold strong [`TextureRef`]s,
//! - stage output maps hold `Weak` references and only name the textures,
//! - shader states hold strong references to the textures bound to them.
//!
//! Textures may carry pending texel data (parameter tables, noise); the
//! backend uploads it the next time the texture is realized.
//!
//! [`Pipeline`]: super::pipeline::Pipeline

use std::sync::{Arc, OnceLock};

use glam::UVec2;
use parking_lot::Mutex;

use super::format::{AttachmentPoint, BufferFormat};

/// Shared strong reference to a stage texture.
pub type TextureRef = Arc<StageTexture>;

/// Sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerSettings {
    pub filter: wgpu::FilterMode,
    pub address_mode: wgpu::AddressMode,
    pub border_color: Option<wgpu::SamplerBorderColor>,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            filter: wgpu::FilterMode::Linear,
            address_mode: wgpu::AddressMode::ClampToEdge,
            border_color: None,
        }
    }
}

impl SamplerSettings {
    #[must_use]
    pub const fn nearest_clamp_border(color: wgpu::SamplerBorderColor) -> Self {
        Self {
            filter: wgpu::FilterMode::Nearest,
            address_mode: wgpu::AddressMode::ClampToBorder,
            border_color: Some(color),
        }
    }
}

/// Realized GPU resources of a [`StageTexture`].
#[derive(Debug)]
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    /// View over all layers and mips (2D or 2D-array).
    pub view: wgpu::TextureView,
    /// One single-layer view per array layer, used as attachment views.
    pub layer_views: Vec<wgpu::TextureView>,
}

/// A texture produced or consumed by stages.
#[derive(Debug)]
pub struct StageTexture {
    label: String,
    size: UVec2,
    layers: u32,
    format: BufferFormat,
    mip_levels: u32,
    sampler: SamplerSettings,
    pending: Mutex<Option<Vec<u8>>>,
    gpu: OnceLock<GpuTexture>,
}

impl StageTexture {
    /// Creates a single-layer texture without mipmaps.
    #[must_use]
    pub fn new(label: impl Into<String>, format: BufferFormat, size: UVec2) -> Self {
        Self {
            label: label.into(),
            size: size.max(UVec2::ONE),
            layers: 1,
            format,
            mip_levels: 1,
            sampler: SamplerSettings::default(),
            pending: Mutex::new(None),
            gpu: OnceLock::new(),
        }
    }

    /// Sets the array layer count (shadow maps use one layer per cascade).
    #[must_use]
    pub fn with_layers(mut self, layers: u32) -> Self {
        self.layers = layers.max(1);
        self
    }

    /// Allocates a full mip chain so runners may regenerate it after drawing.
    #[must_use]
    pub fn with_mipmaps(mut self) -> Self {
        self.mip_levels = mip_level_count(self.size);
        self
    }

    #[must_use]
    pub fn with_sampler(mut self, sampler: SamplerSettings) -> Self {
        self.sampler = sampler;
        self
    }

    /// Creates a texture holding initial texel data.
    #[must_use]
    pub fn with_data(self, data: Vec<u8>) -> Self {
        *self.pending.lock() = Some(data);
        self
    }

    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> UVec2 {
        self.size
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.size.x
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.size.y
    }

    #[inline]
    #[must_use]
    pub fn layers(&self) -> u32 {
        self.layers
    }

    #[inline]
    #[must_use]
    pub fn format(&self) -> BufferFormat {
        self.format
    }

    #[inline]
    #[must_use]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    #[must_use]
    pub fn sampler(&self) -> SamplerSettings {
        self.sampler
    }

    /// Replaces the texel data to upload on the next realization.
    pub fn write(&self, data: Vec<u8>) {
        *self.pending.lock() = Some(data);
    }

    /// Whether texel data is waiting to be uploaded.
    #[must_use]
    pub fn has_pending_data(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Takes the pending texel data, leaving nothing queued.
    pub fn take_pending(&self) -> Option<Vec<u8>> {
        self.pending.lock().take()
    }

    /// The GPU allocation, if it has been realized.
    #[inline]
    #[must_use]
    pub fn gpu(&self) -> Option<&GpuTexture> {
        self.gpu.get()
    }

    /// Returns the GPU allocation, creating it with `init` on first use.
    pub fn gpu_or_init(&self, init: impl FnOnce(&Self) -> GpuTexture) -> &GpuTexture {
        self.gpu.get_or_init(|| init(self))
    }
}

/// A texture bound to one attachment point of an off-screen target.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub point: AttachmentPoint,
    pub texture: TextureRef,
    /// Array layer rendered into.
    pub layer: u32,
    /// Regenerate the mip chain after each pass.
    pub generate_mipmaps: bool,
}

impl Attachment {
    #[must_use]
    pub fn new(point: AttachmentPoint, texture: TextureRef) -> Self {
        Self {
            point,
            texture,
            layer: 0,
            generate_mipmaps: false,
        }
    }

    #[must_use]
    pub fn with_layer(mut self, layer: u32) -> Self {
        self.layer = layer;
        self
    }
}

/// Number of mip levels of a full chain for `size`.
#[must_use]
pub fn mip_level_count(size: UVec2) -> u32 {
    32 - size.x.max(size.y).max(1).leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_length() {
        assert_eq!(mip_level_count(UVec2::new(1, 1)), 1);
        assert_eq!(mip_level_count(UVec2::new(1920, 1080)), 11);
        assert_eq!(mip_level_count(UVec2::new(256, 16)), 9);
    }

    #[test]
    fn zero_sizes_are_clamped() {
        let tex = StageTexture::new("Empty", BufferFormat::RInt8, UVec2::ZERO);
        assert_eq!(tex.size(), UVec2::ONE);
    }

    #[test]
    fn pending_data_is_taken_once() {
        let tex = StageTexture::new("Data", BufferFormat::RgbaInt8, UVec2::ONE).with_data(vec![0; 4]);
        assert!(tex.has_pending_data());
        assert_eq!(tex.take_pending().map(|d| d.len()), Some(4));
        assert!(tex.take_pending().is_none());
    }
}
