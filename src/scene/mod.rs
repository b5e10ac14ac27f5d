//! Scene-Side Types
//!
//! What the stage graph renders with:
//! - Camera: matrices, target, draw hooks and the stage's shader state
//! - View: the host's main camera and the slave cameras a pipeline adds
//! - LightSource: lights reported visible during culling
//! - FrameContext: per-view frame state, including the light registry

pub mod camera;
pub mod frame;
pub mod light;
pub mod view;

pub use camera::{Camera, DrawHook, DrawInfo, DrawPhase, SharedCamera, Viewport};
pub use frame::{FrameContext, FrameStamp};
pub use light::{LightId, LightKind, LightSource};
pub use view::{SceneRenderer, View};
