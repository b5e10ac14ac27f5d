//! GPU Core
//!
//! Provides:
//! - GraphicsContext: device, queue and the capability record
//! - RenderBackend: the seam between the stage graph and the GPU
//! - WgpuBackend: the wgpu implementation of that seam
//! - MipmapGenerator: mip-chain regeneration for render targets

pub mod backend;
pub mod context;
pub mod mipmap;
pub mod wgpu_backend;

pub use backend::{RenderBackend, TargetDesc, TargetId, TargetState};
pub use context::{CapabilityTier, GpuCapabilities, GraphicsContext};
pub use mipmap::MipmapGenerator;
pub use wgpu_backend::{DefaultTarget, WgpuBackend};
