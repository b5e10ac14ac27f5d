//! Stage Graph
//!
//! Provides:
//! - Pipeline: stage factories, wiring, modules and view integration
//! - Stage: named outputs plus the shader state of one pass
//! - Runner / DeferredCallback: the deferred chain run inside the forward camera
//! - BufferFormat: the format table resolving stage buffers per capability tier
//! - NearFarTracker: the depth range shared by every stage
//! - ResizeHandler: host resize handling
//! - loader / standard: JSON-described and stock pipelines

pub mod callback;
pub mod format;
pub mod frustum;
pub mod loader;
pub mod lookup;
pub mod near_far;
pub mod pipeline;
pub mod resize;
pub mod runner;
pub mod shader;
pub mod stage;
pub mod standard;
pub mod texture;

pub use callback::DeferredCallback;
pub use format::{AttachmentPoint, BufferFormat};
pub use loader::PipelineDescription;
pub use near_far::{NearFarClamp, NearFarTracker};
pub use pipeline::{BufferSpec, Pipeline, PipelineModule};
pub use resize::ResizeHandler;
pub use runner::{Runner, SharedRunner};
pub use shader::{ShaderProgram, ShaderSource, ShaderState, StageShaders, Uniform, UniformValue};
pub use stage::{Stage, StageHandle, StageKind};
pub use standard::{setup_standard_pipeline, StandardPipeline, StandardPipelineParams, StandardShaders};
pub use texture::{StageTexture, TextureRef};
