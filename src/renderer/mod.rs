//! Renderer
//!
//! - core: GPU context and render backends
//! - graph: the stage graph and its execution
//! - modules: shadow, light and user-input modules
//! - settings: pipeline and device configuration

pub mod core;
pub mod graph;
pub mod modules;
pub mod settings;

pub use settings::{DeviceSettings, PipelineSettings, VisibilityMasks};
