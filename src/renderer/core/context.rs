//! Graphics Context
//!
//! [`GraphicsContext`] holds the core GPU handles (device, queue) shared by
//! every stage of a pipeline, together with the [`GpuCapabilities`] record the
//! stage graph consults when it is built.
//!
//! The stage graph itself never touches the device: it only needs the
//! capability record, which keeps pipeline construction testable without a
//! GPU. The device is consumed by the [`WgpuBackend`] at draw time.
//!
//! [`WgpuBackend`]: super::wgpu_backend::WgpuBackend

use std::sync::Arc;

use crate::errors::{PipelineError, Result};
use crate::renderer::settings::DeviceSettings;

/// Capability tier used to resolve buffer formats.
///
/// | Tier     | Typical backend           | 32-bit float color targets |
/// |----------|---------------------------|----------------------------|
/// | `Full`   | Vulkan / Metal / DX12     | native                     |
/// | `Compat` | GL / WebGL2 (downlevel)   | fall back to 16-bit float  |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CapabilityTier {
    #[default]
    Full,
    Compat,
}

/// What the device can do, as far as the stage graph cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuCapabilities {
    pub tier: CapabilityTier,
    /// Off-screen render targets are available.
    pub offscreen_targets: bool,
    /// Programmable vertex/fragment shading is available.
    pub programmable_shading: bool,
    /// Maximum simultaneous color attachments (multi-render-target support).
    pub max_color_attachments: u32,
    /// Maximum edge length of a 2D texture.
    pub max_texture_dimension_2d: u32,
    /// Maximum layers of a 2D array texture.
    pub max_texture_array_layers: u32,
}

impl Default for GpuCapabilities {
    fn default() -> Self {
        Self::from_limits(&wgpu::Limits::default(), CapabilityTier::Full)
    }
}

impl GpuCapabilities {
    /// Builds a capability record from device limits.
    #[must_use]
    pub fn from_limits(limits: &wgpu::Limits, tier: CapabilityTier) -> Self {
        Self {
            tier,
            offscreen_targets: true,
            programmable_shading: true,
            max_color_attachments: limits.max_color_attachments,
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
            max_texture_array_layers: limits.max_texture_array_layers,
        }
    }

    /// Derives the record from a live adapter/device pair.
    #[must_use]
    pub fn from_device(adapter: &wgpu::Adapter, device: &wgpu::Device) -> Self {
        let downlevel = adapter.get_downlevel_capabilities();
        let tier = if downlevel.is_webgpu_compliant() {
            CapabilityTier::Full
        } else {
            CapabilityTier::Compat
        };
        Self::from_limits(&device.limits(), tier)
    }

    /// Checks the capabilities the deferred pipeline cannot work without.
    ///
    /// Missing off-screen targets, missing programmable shading or fewer
    /// color attachments than `min_color_attachments` is fatal.
    pub fn validate(&self, min_color_attachments: u32) -> Result<()> {
        if !self.offscreen_targets {
            return Err(PipelineError::MissingCapability(
                "off-screen render targets".to_string(),
            ));
        }
        if !self.programmable_shading {
            return Err(PipelineError::MissingCapability(
                "programmable shading".to_string(),
            ));
        }
        if self.max_color_attachments < min_color_attachments {
            return Err(PipelineError::MissingCapability(format!(
                "multiple render targets ({} color attachments, {min_color_attachments} required)",
                self.max_color_attachments
            )));
        }
        Ok(())
    }
}

/// Core wgpu context shared by the stages of one pipeline.
#[derive(Clone)]
pub struct GraphicsContext {
    /// The wgpu device for GPU operations
    pub device: Arc<wgpu::Device>,
    /// The command queue for submitting work
    pub queue: Arc<wgpu::Queue>,
    /// Capability record derived from the adapter
    pub capabilities: GpuCapabilities,
}

impl GraphicsContext {
    /// Wraps an existing device, e.g. the one owned by the host renderer.
    #[must_use]
    pub fn from_parts(
        adapter: &wgpu::Adapter,
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
    ) -> Self {
        let capabilities = GpuCapabilities::from_device(adapter, &device);
        Self {
            device,
            queue,
            capabilities,
        }
    }

    /// Requests a headless adapter and device.
    pub async fn new_headless(settings: &DeviceSettings) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: settings.backends.unwrap_or(wgpu::Backends::all()),
            ..wgpu::InstanceDescriptor::new_without_display_handle()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: settings.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| PipelineError::AdapterRequestFailed(e.to_string()))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Deferred Pipeline Device"),
                required_features: settings.required_features,
                required_limits: settings.required_limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        let info = adapter.get_info();
        log::info!(
            "Graphics context: {} ({:?}, {:?})",
            info.name,
            info.backend,
            info.device_type
        );

        Ok(Self::from_parts(&adapter, Arc::new(device), Arc::new(queue)))
    }

    /// Blocking variant of [`new_headless`](Self::new_headless).
    pub fn new_headless_blocking(settings: &DeviceSettings) -> Result<Self> {
        pollster::block_on(Self::new_headless(settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_single_target_devices() {
        let caps = GpuCapabilities {
            max_color_attachments: 1,
            ..GpuCapabilities::default()
        };
        assert!(matches!(
            caps.validate(4),
            Err(PipelineError::MissingCapability(_))
        ));
    }

    #[test]
    fn validation_rejects_missing_offscreen_targets() {
        let caps = GpuCapabilities {
            offscreen_targets: false,
            ..GpuCapabilities::default()
        };
        assert!(caps.validate(1).is_err());
        assert!(GpuCapabilities::default().validate(4).is_ok());
    }
}
