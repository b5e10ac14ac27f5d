//! Error Types
//!
//! This module defines the error types used throughout the stage orchestrator.
//!
//! # Overview
//!
//! Errors fall into two groups:
//!
//! - [`PipelineError`]: fatal configuration errors. Missing GPU capabilities,
//!   factories called before [`Pipeline::start_stages`], malformed pipeline
//!   descriptions. These abort pipeline construction.
//! - [`TargetError`]: off-screen render-target completeness failures. These are
//!   recoverable; the affected runner is marked failed and skipped, the frame
//!   keeps rendering.
//!
//! Wiring misses (a buffer name that does not exist on the source stage) are
//! not errors at all: they are logged and the binding is left untouched.
//!
//! # Usage
//!
//! ```rust,ignore
//! use myth_deferred::errors::{PipelineError, Result};
//!
//! fn build(pipeline: &mut Pipeline) -> Result<()> {
//!     pipeline.start_stages(1280, 720, &caps)?;
//!     Ok(())
//! }
//! ```
//!
//! [`Pipeline::start_stages`]: crate::renderer::graph::pipeline::Pipeline::start_stages

use thiserror::Error;

/// The main error type for pipeline construction.
#[derive(Error, Debug)]
pub enum PipelineError {
    // ========================================================================
    // GPU & Capability Errors
    // ========================================================================
    /// A mandatory GPU capability is absent.
    #[error("Missing required GPU capability: {0}")]
    MissingCapability(String),

    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    // ========================================================================
    // Stage Graph Errors
    // ========================================================================
    /// A stage factory was called before `start_stages`.
    #[error("Stages not started: call start_stages() before adding stage '{0}'")]
    StagesNotStarted(String),

    /// A stage handle no longer refers to a live stage.
    #[error("Stage handle is stale or belongs to another pipeline")]
    StaleStage,

    // ========================================================================
    // Format & Parsing Errors
    // ========================================================================
    /// Unknown buffer format tag.
    #[error("Unknown buffer format: {0}")]
    UnknownFormat(String),

    /// The declarative pipeline description is malformed.
    #[error("Invalid pipeline description: {0}")]
    InvalidDescription(String),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Off-screen render-target completeness failures.
///
/// Returned by [`RenderBackend::create_target`] and
/// [`RenderBackend::validate_target`].
///
/// [`RenderBackend::create_target`]: crate::renderer::core::backend::RenderBackend::create_target
/// [`RenderBackend::validate_target`]: crate::renderer::core::backend::RenderBackend::validate_target
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    /// The target has no attachments at all.
    #[error("target has no attachments")]
    MissingAttachment,

    /// Two attachments were bound to the same attachment point.
    #[error("attachment point {0} is bound twice")]
    DuplicateAttachment(String),

    /// More color attachments than the device allows.
    #[error("{requested} color attachments requested, device limit is {limit}")]
    TooManyColorAttachments { requested: u32, limit: u32 },

    /// Attachments do not share one size.
    #[error("attachment '{label}' is {width}x{height}, target is {target_width}x{target_height}")]
    SizeMismatch {
        label: String,
        width: u32,
        height: u32,
        target_width: u32,
        target_height: u32,
    },

    /// Target size exceeds the device texture limit.
    #[error("target size {width}x{height} exceeds device limit {limit}")]
    ExceedsLimits { width: u32, height: u32, limit: u32 },

    /// The attachment format cannot be rendered to.
    #[error("attachment '{0}' uses a non-renderable format")]
    IncompleteAttachment(String),

    /// The target id is unknown to the backend.
    #[error("unknown render target")]
    UnknownTarget,

    /// No device is available to allocate the target.
    #[error("no graphics device available")]
    NoDevice,
}

/// Alias for `Result<T, PipelineError>`.
pub type Result<T> = std::result::Result<T, PipelineError>;
