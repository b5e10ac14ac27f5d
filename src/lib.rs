#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! Myth Deferred
//!
//! A deferred-rendering stage orchestrator on wgpu. A [`Pipeline`] is a set of
//! named stages (G-buffer, screen-space work passes, deferred post passes and
//! display passes) wired together by their output buffers. Stage cameras are
//! handed to the host's [`View`]; deferred stages run as a runner chain inside
//! the forward camera.

pub mod errors;
pub mod renderer;
pub mod scene;

pub use errors::{PipelineError, Result, TargetError};
pub use renderer::core::{GpuCapabilities, GraphicsContext, RenderBackend, WgpuBackend};
pub use renderer::graph::{
    setup_standard_pipeline, BufferFormat, BufferSpec, Pipeline, PipelineDescription, ResizeHandler, Stage,
    StageHandle,
};
pub use renderer::modules::{LightModule, ShadowModule, UserInputModule};
pub use renderer::settings::PipelineSettings;
pub use scene::{Camera, FrameContext, LightSource, View};
